//! Turns a parsed model file into runtime types
//!
//! Transforms, conditions and selectors are resolved here, once, so a bad
//! model fails before any request is made.

use crate::config::types::{
    DedupConfig, EmitConfig, EngineSettings, FieldConfig, ModelConfig, PhaseConfig, SchemaConfig,
    SinkConfig, SinkKind, UserAgentConfig,
};
use crate::crawler::{Phase, RepeatLimit};
use crate::extract::{Condition, EmissionRule, FieldSpec, HtmlExtractor, Schema, Transform};
use crate::work::{RangeGenerator, WorkGenerator};
use crate::ModelError;

/// A crawl model ready to run
#[derive(Debug)]
pub struct CrawlModel {
    pub name: String,
    pub settings: EngineSettings,
    pub user_agent: UserAgentConfig,
    pub dedup: DedupConfig,
    pub sinks: Vec<SinkConfig>,
    pub phases: Vec<Phase>,
}

impl CrawlModel {
    /// Creates an empty model with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: EngineSettings::default(),
            user_agent: UserAgentConfig::default(),
            dedup: DedupConfig::default(),
            sinks: Vec::new(),
            phases: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn sink(mut self, sink: SinkConfig) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Every schema of every phase
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.phases.iter().flat_map(|p| p.schemas.iter())
    }

    /// Single worker per phase and a log sink instead of the configured ones
    pub fn into_dummy(mut self) -> Self {
        self.settings.workers = 1;
        for phase in &mut self.phases {
            phase.workers = Some(1);
            for schema in &mut phase.schemas {
                schema.sinks.clear();
            }
        }
        self.sinks = vec![SinkConfig {
            name: "log".to_string(),
            kind: SinkKind::Log,
            queue_capacity: None,
        }];
        self
    }
}

/// Builds a validated model file into a `CrawlModel`
///
/// # Arguments
///
/// * `config` - Parsed and validated model file
/// * `default_name` - Name used when the file does not set one
pub fn build_model(config: ModelConfig, default_name: &str) -> Result<CrawlModel, ModelError> {
    let phases = config
        .phases
        .into_iter()
        .map(build_phase)
        .collect::<Result<Vec<_>, _>>()?;

    let model = CrawlModel {
        name: config.name.unwrap_or_else(|| default_name.to_string()),
        settings: EngineSettings::from(&config.engine),
        user_agent: config.user_agent,
        dedup: config.dedup,
        sinks: config.sinks,
        phases,
    };

    // Compiles every selector once to reject bad ones up front
    HtmlExtractor::for_schemas(model.schemas())?;

    Ok(model)
}

fn build_phase(config: PhaseConfig) -> Result<Phase, ModelError> {
    let mut phase = Phase::new(config.name);
    phase.active = config.active;
    phase.workers = config.workers;
    phase.synchronize = config.synchronize;
    phase.inherit = config.inherit;

    let seeds = config
        .seeds
        .iter()
        .map(|seed| config.request.build(seed.trim()));
    phase = phase.seeds(seeds);

    for generator in config.generate {
        let range = RangeGenerator::new(generator.template, generator.start, generator.end, generator.step)
            .with_request(config.request.clone());
        phase = phase.generator(Box::new(range) as WorkGenerator);
    }

    for schema in config.schema {
        phase = phase.schema(build_schema(schema)?);
    }

    if config.repeat {
        phase = phase.repeat_with(RepeatLimit::new(config.repeat_limit, config.repeat_while));
    }

    Ok(phase)
}

fn build_schema(config: SchemaConfig) -> Result<Schema, ModelError> {
    let mut schema = Schema::new(config.name);
    schema.selector = config.selector;
    schema.required = config.required;
    schema.sinks = config.sinks;
    for field in config.field {
        schema = schema.field(build_field(field)?);
    }
    Ok(schema)
}

fn build_field(config: FieldConfig) -> Result<FieldSpec, ModelError> {
    let mut field = FieldSpec::new(config.name);
    field.selector = config.selector;
    field.attr = config.attr;
    field.multiple = config.multiple;
    field.required = config.required;
    field.transforms = config
        .transforms
        .iter()
        .map(|t| t.parse::<Transform>())
        .collect::<Result<_, _>>()?;

    if let Some(emit) = config.emit {
        field = field.emit(build_emission(emit)?);
    }
    Ok(field)
}

fn build_emission(config: EmitConfig) -> Result<EmissionRule, ModelError> {
    Ok(EmissionRule {
        template: config.template,
        condition: Condition::parse_all(&config.when)?,
        copy: config.copy,
        link_parent: config.link_parent,
        active: config.active,
        duplicate: config.duplicate,
        request: config.request,
    })
}
