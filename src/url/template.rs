use crate::UrlError;
use url::Url;

/// Placeholder replaced by the emitted value in a target template
pub const PLACEHOLDER: &str = "{}";

/// Builds a target from a template and an emitted value
///
/// Every `{}` in the template is replaced by `value`. A result that is not an
/// absolute URL is joined onto `base` when the base is one, so relative links
/// scraped from a page resolve against that page. Targets that are neither
/// URLs nor relative to a URL base are returned unchanged.
///
/// # Examples
///
/// ```
/// use sumi_tide::url::resolve_target;
///
/// let target = resolve_target("{}", "/item/7", Some("https://example.com/list")).unwrap();
/// assert_eq!(target, "https://example.com/item/7");
///
/// let target = resolve_target("https://api.example.com/q?id={}", "7", None).unwrap();
/// assert_eq!(target, "https://api.example.com/q?id=7");
/// ```
pub fn resolve_target(template: &str, value: &str, base: Option<&str>) -> Result<String, UrlError> {
    let value = value.trim();
    let filled = if template.is_empty() {
        value.to_string()
    } else {
        template.replace(PLACEHOLDER, value)
    };

    if filled.is_empty() {
        return Err(UrlError::Malformed("empty target".to_string()));
    }

    if Url::parse(&filled).is_ok() {
        return Ok(filled);
    }

    match base.and_then(|b| Url::parse(b).ok()) {
        Some(base_url) => base_url
            .join(&filled)
            .map(|url| url.to_string())
            .map_err(|e| UrlError::Parse(format!("{} (relative to {}): {}", filled, base_url, e))),
        None => Ok(filled),
    }
}
