use url::Url;

/// Returns the `host:port` pair to resolve when probing reachability
///
/// The port falls back to the scheme's default. Targets without a host or
/// without a known port yield `None`.
///
/// # Examples
///
/// ```
/// use sumi_tide::url::host_and_port;
///
/// assert_eq!(host_and_port("https://EXAMPLE.com/path"), Some(("example.com".to_string(), 443)));
/// assert_eq!(host_and_port("not a url"), None);
/// ```
pub fn host_and_port(target: &str) -> Option<(String, u16)> {
    let url = Url::parse(target).ok()?;
    let host = url.host_str()?.trim_start_matches('[').trim_end_matches(']');
    let port = url.port_or_known_default()?;
    Some((host.to_lowercase(), port))
}
