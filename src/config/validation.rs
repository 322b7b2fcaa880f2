use crate::config::types::{
    DedupConfig, EngineConfig, FieldConfig, GeneratorConfig, ModelConfig, PhaseConfig, SinkConfig,
    SinkKind, UserAgentConfig,
};
use crate::url::PLACEHOLDER;
use crate::ModelError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire model
///
/// Selectors, transforms and conditions are checked when the model is built,
/// since that is where they are resolved.
pub fn validate(config: &ModelConfig) -> Result<(), ModelError> {
    validate_engine_config(&config.engine)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_dedup_config(&config.dedup)?;
    let sink_names = validate_sinks(&config.sinks)?;
    validate_phases(&config.phases, &sink_names)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ModelError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ModelError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ModelError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.parse_timeout_ms < 1 {
        return Err(ModelError::Validation(
            "parse_timeout_ms must be >= 1".to_string(),
        ));
    }

    if config.parse_queue_capacity < 1 || config.sink_queue_capacity < 1 {
        return Err(ModelError::Validation(format!(
            "queue capacities must be >= 1, got parse {} and sink {}",
            config.parse_queue_capacity, config.sink_queue_capacity
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ModelError> {
    if config.crawler_name.is_empty() {
        return Err(ModelError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ModelError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ModelError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_dedup_config(config: &DedupConfig) -> Result<(), ModelError> {
    if config.expected_items < 1 {
        return Err(ModelError::Validation(
            "expected_items must be >= 1".to_string(),
        ));
    }

    if !(config.false_positive_rate > 0.0 && config.false_positive_rate < 1.0) {
        return Err(ModelError::Validation(format!(
            "false_positive_rate must be between 0 and 1 (exclusive), got {}",
            config.false_positive_rate
        )));
    }

    Ok(())
}

/// Validates sink entries and returns their names
fn validate_sinks(sinks: &[SinkConfig]) -> Result<HashSet<&str>, ModelError> {
    let mut names = HashSet::new();

    for sink in sinks {
        if sink.name.is_empty() {
            return Err(ModelError::Validation("sink name cannot be empty".to_string()));
        }

        if !names.insert(sink.name.as_str()) {
            return Err(ModelError::Validation(format!(
                "Duplicate sink name '{}'",
                sink.name
            )));
        }

        if sink.queue_capacity == Some(0) {
            return Err(ModelError::Validation(format!(
                "Sink '{}' queue_capacity must be >= 1",
                sink.name
            )));
        }

        match &sink.kind {
            SinkKind::Sqlite { path } | SinkKind::Jsonl { path } if path.as_os_str().is_empty() => {
                return Err(ModelError::Validation(format!(
                    "Sink '{}' path cannot be empty",
                    sink.name
                )));
            }
            SinkKind::Command { command } if command.trim().is_empty() => {
                return Err(ModelError::Validation(format!(
                    "Sink '{}' command cannot be empty",
                    sink.name
                )));
            }
            _ => {}
        }
    }

    Ok(names)
}

/// Validates phase entries
fn validate_phases(phases: &[PhaseConfig], sinks: &HashSet<&str>) -> Result<(), ModelError> {
    if phases.is_empty() {
        return Err(ModelError::Validation(
            "A model must define at least one [[phase]]".to_string(),
        ));
    }

    if let Some(first) = phases.first() {
        if first.seeds.is_empty() && first.generate.is_empty() {
            return Err(ModelError::Validation(format!(
                "The first phase '{}' must define seeds or generators",
                first.name
            )));
        }
    }

    for phase in phases {
        if phase.name.is_empty() {
            return Err(ModelError::Validation("phase name cannot be empty".to_string()));
        }

        if phase.workers == Some(0) {
            return Err(ModelError::Validation(format!(
                "Phase '{}' workers must be >= 1",
                phase.name
            )));
        }

        if phase.repeat_limit == Some(0) {
            return Err(ModelError::Validation(format!(
                "Phase '{}' repeat_limit must be >= 1",
                phase.name
            )));
        }

        for seed in &phase.seeds {
            if seed.trim().is_empty() {
                return Err(ModelError::InvalidUrl(format!(
                    "Phase '{}' has an empty seed",
                    phase.name
                )));
            }
        }

        for generator in &phase.generate {
            validate_generator(&phase.name, generator)?;
        }

        for schema in &phase.schema {
            if schema.name.is_empty() {
                return Err(ModelError::Validation(format!(
                    "Phase '{}' has a schema without a name",
                    phase.name
                )));
            }

            for sink in &schema.sinks {
                if !sinks.contains(sink.as_str()) {
                    return Err(ModelError::Validation(format!(
                        "Schema '{}' references unknown sink '{}'",
                        schema.name, sink
                    )));
                }
            }

            let mut fields = HashSet::new();
            for field in &schema.field {
                if !fields.insert(field.name.as_str()) {
                    return Err(ModelError::Validation(format!(
                        "Schema '{}' defines field '{}' twice",
                        schema.name, field.name
                    )));
                }
                validate_field(&schema.name, field)?;
            }
        }
    }

    Ok(())
}

fn validate_generator(phase: &str, generator: &GeneratorConfig) -> Result<(), ModelError> {
    validate_template(&generator.template)?;

    if generator.step == 0 {
        return Err(ModelError::Validation(format!(
            "Phase '{}' generator step cannot be 0",
            phase
        )));
    }

    Ok(())
}

fn validate_field(schema: &str, field: &FieldConfig) -> Result<(), ModelError> {
    if field.name.is_empty() {
        return Err(ModelError::Validation(format!(
            "Schema '{}' has a field without a name",
            schema
        )));
    }

    if let Some(emit) = &field.emit {
        validate_template(&emit.template)?;

        if let Some(key) = &emit.link_parent {
            if key.is_empty() {
                return Err(ModelError::Validation(format!(
                    "Field '{}.{}' link_parent cannot be empty",
                    schema, field.name
                )));
            }
        }
    }

    Ok(())
}

/// Validates a target template
fn validate_template(template: &str) -> Result<(), ModelError> {
    if !template.contains(PLACEHOLDER) {
        return Err(ModelError::Validation(format!(
            "Template '{}' must contain the {} placeholder",
            template, PLACEHOLDER
        )));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ModelError> {
    if email.is_empty() {
        return Err(ModelError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ModelError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ModelError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ModelConfig {
        toml::from_str(content).unwrap()
    }

    const MINIMAL: &str = r#"
[[sink]]
name = "out"
kind = "log"

[[phase]]
name = "list"
seeds = ["https://example.com/"]
"#;

    #[test]
    fn test_minimal_model_is_valid() {
        assert!(validate(&parse(MINIMAL)).is_ok());
    }

    #[test]
    fn test_rejects_empty_phase_list() {
        let config = parse("[engine]\nworkers = 2\n");
        assert!(matches!(validate(&config), Err(ModelError::Validation(_))));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = parse(MINIMAL);
        config.engine.workers = 0;
        assert!(validate(&config).is_err());

        let mut config = parse(MINIMAL);
        config.phases[0].workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_duplicate_and_unknown_sinks() {
        let duplicate = parse(
            r#"
[[sink]]
name = "out"
kind = "log"

[[sink]]
name = "out"
kind = "jsonl"
path = "out.jsonl"

[[phase]]
name = "list"
seeds = ["https://example.com/"]
"#,
        );
        assert!(validate(&duplicate).is_err());

        let unknown = parse(
            r#"
[[phase]]
name = "list"
seeds = ["https://example.com/"]

[[phase.schema]]
name = "item"
sinks = ["missing"]
"#,
        );
        let err = validate(&unknown).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let config = parse(
            r#"
[[phase]]
name = "list"

[[phase.generate]]
template = "https://example.com/page"
start = 1
end = 3
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_first_phase_needs_a_source() {
        let config = parse("[[phase]]\nname = \"list\"\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
    }
}
