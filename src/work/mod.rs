//! Work items, fetched payloads and phase work sources

mod item;
mod source;

pub use item::{Compression, RequestMethod, RequestTemplate, WorkItem};
pub use source::{RangeGenerator, WorkGenerator, WorkSource};

/// Content returned by a successful fetch
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Content-Type header value
    pub content_type: Option<String>,

    /// Response body
    pub body: String,
}

impl Payload {
    /// Creates a 200 payload, mostly useful for fetchers that do not speak HTTP
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }
}
