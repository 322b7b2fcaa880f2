//! Crawl model configuration
//!
//! A crawl model is a TOML file `<models-dir>/<name>.toml`. It is parsed into
//! raw types, validated, and then built into runtime types: phases with
//! their sources, record schemas with resolved transforms, conditions and
//! selectors.
//!
//! # Example
//!
//! ```no_run
//! use sumi_tide::config::load_model;
//! use std::path::Path;
//!
//! let model = load_model(Path::new("models"), "books").unwrap();
//! println!("Default workers per phase: {}", model.settings.workers);
//! ```

mod build;
mod parser;
mod types;
mod validation;

// Re-export types
pub use build::{build_model, CrawlModel};
pub use types::{
    DedupConfig, EmitConfig, EngineConfig, EngineSettings, FieldConfig, GeneratorConfig,
    ModelConfig, PhaseConfig, RepeatWhile, SchemaConfig, SinkConfig, SinkKind, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_model_hash, list_models, load_model, load_model_file, load_model_with_hash, model_path,
    parse_model,
};
