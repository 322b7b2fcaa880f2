//! HTML extractor
//!
//! Uses CSS selectors (via `scraper`) to scope records and read fields.
//! Selectors are compiled once, when the extractor is built for a model.

use crate::extract::{apply_chain, ExtractError, Extraction, Extractor, FieldSpec, Record, Schema};
use crate::work::Payload;
use crate::ModelError;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;

/// Attribute name that reads an element's inner HTML
const INNER_HTML: &str = "html";

/// CSS-selector based extractor
#[derive(Debug, Default)]
pub struct HtmlExtractor {
    selectors: HashMap<String, Selector>,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an extractor with every selector of `schemas` precompiled
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InvalidSelector` for the first selector that
    /// does not parse.
    pub fn for_schemas<'a>(schemas: impl IntoIterator<Item = &'a Schema>) -> Result<Self, ModelError> {
        let mut selectors = HashMap::new();
        for schema in schemas {
            for selector in schema.selectors() {
                if !selectors.contains_key(selector) {
                    selectors.insert(selector.to_string(), compile(selector)?);
                }
            }
        }
        Ok(Self { selectors })
    }

    fn with_selector<T>(
        &self,
        selector: &str,
        f: impl FnOnce(&Selector) -> T,
    ) -> Result<T, ExtractError> {
        match self.selectors.get(selector) {
            Some(compiled) => Ok(f(compiled)),
            None => {
                let compiled = compile(selector).map_err(|e| ExtractError::Selector {
                    selector: selector.to_string(),
                    message: e.to_string(),
                })?;
                Ok(f(&compiled))
            }
        }
    }

    fn read_field(&self, scope: ElementRef<'_>, field: &FieldSpec) -> Result<Value, ExtractError> {
        let elements: Vec<ElementRef<'_>> = match &field.selector {
            Some(selector) => self.with_selector(selector, |s| scope.select(s).collect())?,
            None => vec![scope],
        };

        let mut values = elements
            .into_iter()
            .filter_map(|el| element_value(el, field.attr.as_deref()));

        let raw = if field.multiple {
            Value::Array(values.map(Value::String).collect())
        } else {
            values.next().map(Value::String).unwrap_or(Value::Null)
        };

        Ok(apply_chain(&field.transforms, raw).unwrap_or(Value::Null))
    }

    fn build_record(
        &self,
        scope: ElementRef<'_>,
        schema: &Schema,
        source: &str,
    ) -> Result<Option<Record>, ExtractError> {
        let mut record = Record::new(&schema.name, source);
        for field in &schema.fields {
            let value = self.read_field(scope, field)?;
            if field.required && is_missing(&value) {
                tracing::debug!(
                    "Skipping {} record from {}: required field '{}' is empty",
                    schema.name,
                    source,
                    field.name
                );
                return Ok(None);
            }
            record.push(field.name.clone(), value);
        }
        Ok(Some(record))
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, payload: &Payload, schema: &Schema) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(&payload.body);

        let scopes: Vec<ElementRef<'_>> = match &schema.selector {
            Some(selector) => self.with_selector(selector, |s| document.select(s).collect())?,
            None => vec![document.root_element()],
        };

        let mut records = Vec::with_capacity(scopes.len());
        for scope in scopes {
            if let Some(record) = self.build_record(scope, schema, &payload.url)? {
                records.push(record);
            }
        }

        Ok(Extraction::collect(schema, records))
    }
}

fn compile(selector: &str) -> Result<Selector, ModelError> {
    Selector::parse(selector).map_err(|e| ModelError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn element_value(element: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    match attr {
        Some(INNER_HTML) => Some(element.inner_html()),
        Some(name) => element.value().attr(name).map(str::to_string),
        None => Some(element.text().collect::<String>().trim().to_string()),
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
