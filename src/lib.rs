//! Sumi-Tide: a declarative, phased crawl engine
//!
//! A crawl model describes what to fetch, how to turn fetched content into
//! records, and which new fetches those records imply. The engine runs the
//! model as an ordered list of phases, each with its own pool of fetch
//! workers, and forwards discovered work between phases until nothing is
//! left to do.

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod extract;
pub mod output;
pub mod state;
pub mod url;
pub mod work;

use thiserror::Error;

/// Main error type for Sumi-Tide operations
#[derive(Debug, Error)]
pub enum TideError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Work queue closed for phase {phase}")]
    QueueClosed { phase: usize },

    #[error("Parse queue closed while draining phase {phase}")]
    ParseQueueClosed { phase: usize },

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::PhaseState,
        to: state::PhaseState,
    },

    #[error("Phase {index} ({name}) failed: {source}")]
    Phase {
        index: usize,
        name: String,
        #[source]
        source: Box<TideError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crawl model (configuration) errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Model '{name}' not found in {dir}")]
    NotFound { name: String, dir: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in model: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Unknown transform: {0}")]
    InvalidTransform(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Tide operations
pub type Result<T> = std::result::Result<T, TideError>;

// Re-export commonly used types
pub use config::{load_model, CrawlModel};
pub use crawler::{crawl, Coordinator, Fetcher, HttpFetcher, Phase};
pub use extract::{Extractor, HtmlExtractor, Record, Schema};
pub use output::{RunReport, Sink};
pub use state::PhaseState;
pub use work::{Payload, WorkItem};
