//! Utility functions for the proxy pool.

use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Token replaced with a random number in alive-check URLs to defeat caching.
pub(crate) const RAND_TOKEN: &str = "{%rand}";

/// Replace every random-substitution token in `template` with a fresh random value.
pub(crate) fn substitute_rand(template: &str) -> String {
    if !template.contains(RAND_TOKEN) {
        return template.to_string();
    }
    template.replace(RAND_TOKEN, &rand::random::<u64>().to_string())
}

/// Extract `host:port` from a proxy endpoint, falling back to the scheme's default port.
pub(crate) fn host_port(endpoint: &Url) -> Option<String> {
    let host = endpoint.host_str()?;
    let port = endpoint.port_or_known_default()?;
    if host.contains(':') && !host.starts_with('[') {
        Some(format!("[{}]:{}", host, port))
    } else {
        Some(format!("{}:{}", host, port))
    }
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_token() {
        let out = substitute_rand("http://example.com/a?x={%rand}&y={%rand}");
        assert!(!out.contains(RAND_TOKEN));
        assert!(out.starts_with("http://example.com/a?x="));
    }

    #[test]
    fn leaves_plain_urls_alone() {
        assert_eq!(substitute_rand("http://example.com/"), "http://example.com/");
    }

    #[test]
    fn host_port_uses_default_port() {
        let url = Url::parse("http://10.0.0.1").unwrap();
        assert_eq!(host_port(&url).as_deref(), Some("10.0.0.1:80"));

        let url = Url::parse("http://10.0.0.1:8080").unwrap();
        assert_eq!(host_port(&url).as_deref(), Some("10.0.0.1:8080"));
    }

    #[test]
    fn host_port_requires_port_for_unknown_schemes() {
        let url = Url::parse("socks5://10.0.0.1").unwrap();
        assert_eq!(host_port(&url), None);

        let url = Url::parse("socks5://10.0.0.1:1080").unwrap();
        assert_eq!(host_port(&url).as_deref(), Some("10.0.0.1:1080"));
    }
}
