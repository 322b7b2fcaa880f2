use crate::work::{RequestMethod, WorkItem};
use crate::UrlError;
use url::Url;

/// Normalizes a target URL for deduplication
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Require an http or https scheme
/// 3. Lowercase the scheme and host (done by the parser)
/// 4. Resolve dot segments in the path (done by the parser)
/// 5. Remove the fragment
/// 6. Sort query parameters by key, keeping the order of repeated keys
/// 7. Remove an empty query string
///
/// Unlike a link canonicalizer, the scheme, `www.` prefix and trailing slash
/// are kept: two targets that differ there may well serve different content.
///
/// # Examples
///
/// ```
/// use sumi_tide::url::normalize_target;
///
/// let url = normalize_target("HTTP://Example.COM/a/../b?z=1&a=2#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b?a=2&z=1");
/// ```
pub fn normalize_target(target: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(target.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let pairs = sorted_query_pairs(&url, std::iter::empty());
        set_query(&mut url, &pairs);
    }

    Ok(url)
}

/// Builds the key under which the deduplicator tracks a work item
///
/// The key is the normalized target with the item's extra query parameters
/// merged in. Non-GET methods and request bodies are part of the key, so a
/// POST to a URL does not shadow a GET to the same URL. Targets that are not
/// http(s) URLs are keyed by their trimmed text.
pub fn dedup_key(item: &WorkItem) -> String {
    let target = match normalize_target(&item.target) {
        Ok(mut url) => {
            if !item.params.is_empty() {
                let extra = item.params.iter().map(|(k, v)| (k.clone(), v.clone()));
                let pairs = sorted_query_pairs(&url, extra);
                set_query(&mut url, &pairs);
            }
            url.to_string()
        }
        Err(_) => {
            let mut raw = item.target.trim().to_string();
            for (key, value) in &item.params {
                raw.push(if raw.contains('?') { '&' } else { '?' });
                raw.push_str(key);
                raw.push('=');
                raw.push_str(value);
            }
            raw
        }
    };

    match (&item.method, &item.body) {
        (RequestMethod::Get, None) => target,
        (method, None) => format!("{} {}", method, target),
        (method, Some(body)) => format!("{} {} {}", method, target, body),
    }
}

fn sorted_query_pairs(
    url: &Url,
    extra: impl Iterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(extra)
        .collect();

    // Stable sort keeps repeated keys in their original order
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn set_query(url: &mut Url, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}
