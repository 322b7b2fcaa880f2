//! Record extraction
//!
//! An extractor turns one fetched payload plus one record schema into zero
//! or more records. Fields of a schema may carry an emission rule; the
//! values of such fields become new work items once the orchestrator routes
//! them.
//!
//! # Components
//!
//! - `Record`, `Schema`, `FieldSpec`, `EmissionRule`: the data model
//! - `Extractor`: the pluggable extraction interface
//! - `HtmlExtractor`: CSS-selector extraction over HTML payloads
//! - `Transform`, `Condition`: field post-processing and emission filters

mod condition;
mod html;
mod transform;

pub use condition::{Condition, Operator, Predicate};
pub use html::HtmlExtractor;
pub use transform::{apply_chain, Transform};

use crate::work::{Payload, RequestTemplate};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Extraction errors
///
/// These are caught per payload: the payload is logged and skipped, the
/// phase continues.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to parse content from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Extraction failed: {0}")]
    Other(String),
}

/// One extracted record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Name of the schema that produced the record
    pub schema: String,

    /// URL of the payload the record came from
    pub source: String,

    /// Field values in schema order
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(schema: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            source: source.into(),
            fields: Vec::new(),
        }
    }

    /// Sets a field, replacing an earlier value of the same name in place
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Appends carried metadata for every key the record does not define
    pub fn inherit(&mut self, metadata: &BTreeMap<String, Value>) {
        for (key, value) in metadata {
            if self.get(key).is_none() {
                self.fields.push((key.clone(), value.clone()));
            }
        }
    }

    /// Field values as a JSON object, in field order
    pub fn fields_json(&self) -> Value {
        let map: Map<String, Value> = self.fields.iter().cloned().collect();
        Value::Object(map)
    }

    /// The whole record as a JSON object
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "schema": self.schema,
            "source": self.source,
            "fields": self.fields_json(),
        })
    }
}

/// Builds new work from a record's field values
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionRule {
    /// Target template; `{}` is replaced by each emitted value
    pub template: String,

    /// Values are emitted only if the parent record matches
    pub condition: Option<Condition>,

    /// Parent fields copied into the new item's metadata
    pub copy: Vec<String>,

    /// Metadata key holding the parent's source URL
    pub link_parent: Option<String>,

    /// Inactive items wait for the next phase
    pub active: bool,

    pub duplicate: bool,

    pub request: RequestTemplate,
}

impl Default for EmissionRule {
    fn default() -> Self {
        Self {
            template: "{}".to_string(),
            condition: None,
            copy: Vec::new(),
            link_parent: None,
            active: true,
            duplicate: false,
            request: RequestTemplate::default(),
        }
    }
}

/// How one field is read from the content
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,

    /// Selector relative to the record scope; None reads the scope itself
    pub selector: Option<String>,

    /// Attribute to read instead of the text content
    pub attr: Option<String>,

    /// Collect every match into an array instead of the first one
    pub multiple: bool,

    /// A record whose required field fails is not emitted
    pub required: bool,

    pub transforms: Vec<Transform>,

    pub emit: Option<Arc<EmissionRule>>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: None,
            attr: None,
            multiple: false,
            required: false,
            transforms: Vec::new(),
            emit: None,
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = Some(attr.into());
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn emit(mut self, rule: EmissionRule) -> Self {
        self.emit = Some(Arc::new(rule));
        self
    }
}

/// Record schema
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,

    /// Selector scoping one record per match; None yields one record per payload
    pub selector: Option<String>,

    /// Zero records from a required schema abort the phase
    pub required: bool,

    /// Sinks receiving this schema's records; empty means every sink
    pub sinks: Vec<String>,

    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: None,
            required: false,
            sinks: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn scoped(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn to_sinks(mut self, sinks: &[&str]) -> Self {
        self.sinks = sinks.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Every selector the schema uses, scope first
    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.selector
            .as_deref()
            .into_iter()
            .chain(self.fields.iter().filter_map(|f| f.selector.as_deref()))
    }
}

/// Values of one field of one record that imply new work
#[derive(Debug, Clone)]
pub struct Emission {
    pub parent: Record,
    pub field: String,
    pub values: Vec<String>,
    pub rule: Arc<EmissionRule>,
}

/// Output of one extractor call
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub emissions: Vec<Emission>,
}

impl Extraction {
    /// Derives emissions for `records` from the schema's emission rules
    pub fn collect(schema: &Schema, records: Vec<Record>) -> Self {
        let mut emissions = Vec::new();
        for record in &records {
            for field in &schema.fields {
                let Some(rule) = &field.emit else { continue };
                let values = record.get(&field.name).map(emitted_values).unwrap_or_default();
                if values.is_empty() {
                    continue;
                }
                emissions.push(Emission {
                    parent: record.clone(),
                    field: field.name.clone(),
                    values,
                    rule: Arc::clone(rule),
                });
            }
        }
        Self { records, emissions }
    }
}

/// Flattens a field value to the strings that get emitted
fn emitted_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(emitted_values).collect(),
        other => vec![other.to_string()],
    }
}

/// Turns fetched content plus a schema into records
///
/// Implementations must be deterministic for a given payload and schema.
pub trait Extractor: Send + Sync {
    fn extract(&self, payload: &Payload, schema: &Schema) -> Result<Extraction, ExtractError>;
}

impl<F> Extractor for F
where
    F: Fn(&Payload, &Schema) -> Result<Extraction, ExtractError> + Send + Sync,
{
    fn extract(&self, payload: &Payload, schema: &Schema) -> Result<Extraction, ExtractError> {
        self(payload, schema)
    }
}
