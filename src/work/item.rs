//! Work item definitions
//!
//! A work item is one unit of fetchable work: a target plus everything the
//! fetch layer needs to issue the request, and whatever metadata the record
//! that produced it chose to carry forward.

use crate::url::dedup_key;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP method of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    #[default]
    Get,
    Post,
    Put,
    Head,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression hint sent to the server as `Accept-Encoding`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Let the HTTP client negotiate
    #[default]
    Any,
    Gzip,
    Brotli,
    Identity,
}

impl Compression {
    /// Header value to request, or None to leave negotiation to the client
    pub fn accept_encoding(&self) -> Option<&'static str> {
        match self {
            Self::Any => None,
            Self::Gzip => Some("gzip"),
            Self::Brotli => Some("br"),
            Self::Identity => Some("identity"),
        }
    }
}

/// Request parameters shared by every item built from the same rule
///
/// Seeds, generators and emission rules each hold one of these and stamp
/// it onto the items they produce.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestTemplate {
    #[serde(default)]
    pub method: RequestMethod,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub compression: Compression,
}

impl RequestTemplate {
    /// Builds an active work item for `target`
    pub fn build(&self, target: impl Into<String>) -> WorkItem {
        WorkItem {
            target: target.into(),
            method: self.method,
            headers: self.headers.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
            compression: self.compression,
            active: true,
            duplicate: false,
            retries: 0,
            metadata: BTreeMap::new(),
        }
    }
}

/// One unit of fetchable work
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// URL or other resource locator
    pub target: String,

    pub method: RequestMethod,

    pub headers: BTreeMap<String, String>,

    /// Query parameters appended to the target
    pub params: BTreeMap<String, String>,

    pub body: Option<String>,

    pub compression: Compression,

    /// Inactive items are never fetched in the phase that produced them;
    /// they wait in the forward buffer for the next phase
    pub active: bool,

    /// Bypasses deduplication
    pub duplicate: bool,

    /// Number of failed attempts so far
    pub retries: u32,

    /// Values carried over from the record that emitted this item
    pub metadata: BTreeMap<String, Value>,
}

impl WorkItem {
    /// Creates an active GET item with no parameters
    pub fn new(target: impl Into<String>) -> Self {
        RequestTemplate::default().build(target)
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn allow_duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Key under which this item is tracked by the deduplicator
    pub fn dedup_key(&self) -> String {
        dedup_key(self)
    }

    /// Counts one more failed attempt and returns the new total
    pub fn record_retry(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }
}
