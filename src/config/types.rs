use crate::work::RequestTemplate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Crawl model file as written on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModelConfig {
    /// Defaults to the file stem
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub user_agent: UserAgentConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default, rename = "sink")]
    pub sinks: Vec<SinkConfig>,

    #[serde(default, rename = "phase")]
    pub phases: Vec<PhaseConfig>,
}

/// Engine defaults shared by every phase
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Workers per phase unless the phase says otherwise
    pub workers: usize,

    /// Pause before each request (milliseconds)
    pub delay_ms: u64,

    pub request_timeout_secs: u64,

    /// Transient failures tolerated per item
    pub max_retries: u32,

    /// How long the orchestrator waits on the parse queue per poll (milliseconds)
    pub parse_timeout_ms: u64,

    pub parse_queue_capacity: usize,

    pub sink_queue_capacity: usize,

    /// Seconds between progress reports; 0 disables them
    pub progress_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            delay_ms: 0,
            request_timeout_secs: 30,
            max_retries: 3,
            parse_timeout_ms: 500,
            parse_queue_capacity: 64,
            sink_queue_capacity: 32,
            progress_interval_secs: 5,
        }
    }
}

/// Engine settings with units resolved
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub workers: usize,
    pub delay: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub parse_timeout: Duration,
    pub parse_queue_capacity: usize,
    pub sink_queue_capacity: usize,
    pub progress_interval: Option<Duration>,
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            workers: config.workers,
            delay: Duration::from_millis(config.delay_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
            parse_timeout: Duration::from_millis(config.parse_timeout_ms),
            parse_queue_capacity: config.parse_queue_capacity,
            sink_queue_capacity: config.sink_queue_capacity,
            progress_interval: (config.progress_interval_secs > 0)
                .then(|| Duration::from_secs(config.progress_interval_secs)),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: String,

    /// Email address for crawler-related contact
    pub contact_email: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SumiTide".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/crawler".to_string(),
            contact_email: "crawler@example.com".to_string(),
        }
    }
}

/// Bloom filter sizing
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Items the first filter stage is sized for; later stages grow
    pub expected_items: usize,

    pub false_positive_rate: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            expected_items: 100_000,
            false_positive_rate: 0.001,
        }
    }
}

/// One `[[sink]]` entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SinkConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: SinkKind,

    /// Overrides the engine's sink queue capacity
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkKind {
    Sqlite { path: PathBuf },
    Jsonl { path: PathBuf },
    Command { command: String },
    Log,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "sqlite",
            Self::Jsonl { .. } => "jsonl",
            Self::Command { .. } => "command",
            Self::Log => "log",
        }
    }
}

/// What keeps a repeating phase going
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatWhile {
    /// While the last iteration forwarded new items
    #[default]
    Forwarded,
    /// While the last iteration extracted records
    Records,
}

/// One `[[phase]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PhaseConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub repeat: bool,

    #[serde(default)]
    pub repeat_limit: Option<usize>,

    #[serde(default)]
    pub repeat_while: RepeatWhile,

    #[serde(default = "default_true")]
    pub synchronize: bool,

    /// Take the items forwarded by the previous phase
    #[serde(default = "default_true")]
    pub inherit: bool,

    #[serde(default)]
    pub seeds: Vec<String>,

    #[serde(default)]
    pub generate: Vec<GeneratorConfig>,

    /// Request parameters for seeds and generated items
    #[serde(default)]
    pub request: RequestTemplate,

    #[serde(default)]
    pub schema: Vec<SchemaConfig>,
}

/// Numeric range over a target template
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GeneratorConfig {
    pub template: String,
    pub start: i64,
    pub end: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SchemaConfig {
    pub name: String,

    #[serde(default)]
    pub selector: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Sink names; empty sends to every sink
    #[serde(default)]
    pub sinks: Vec<String>,

    #[serde(default)]
    pub field: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,

    #[serde(default)]
    pub selector: Option<String>,

    #[serde(default)]
    pub attr: Option<String>,

    #[serde(default)]
    pub multiple: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub transforms: Vec<String>,

    #[serde(default)]
    pub emit: Option<EmitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EmitConfig {
    #[serde(default = "default_template")]
    pub template: String,

    /// OR-combined `field op operand` predicates
    #[serde(default)]
    pub when: Vec<String>,

    #[serde(default)]
    pub copy: Vec<String>,

    #[serde(default)]
    pub link_parent: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub duplicate: bool,

    #[serde(default)]
    pub request: RequestTemplate,
}

fn default_true() -> bool {
    true
}

fn default_step() -> i64 {
    1
}

fn default_template() -> String {
    crate::url::PLACEHOLDER.to_string()
}
