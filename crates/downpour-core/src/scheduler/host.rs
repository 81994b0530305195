use anyhow::{Context, Result};

/// Key used to account per-host connections.
///
/// URLs are normalised down to `(scheme, host, port)` so different paths on
/// the same origin share the connection budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HostKey {
    /// Construct a host key from a URL string.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;

        let scheme = parsed.scheme().to_string();
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("URL missing host: {url}"))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("URL missing port and unknown default: {url}"))?;

        Ok(Self { scheme, host, port })
    }
}

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_url_with_default_port() {
        let key = HostKey::from_url("https://example.com/file.bin").unwrap();
        assert_eq!(key.scheme, "https");
        assert_eq!(key.host, "example.com");
        assert_eq!(key.port, 443);
    }

    #[test]
    fn key_from_url_with_explicit_port() {
        let key = HostKey::from_url("http://mirror.local:8080/a/b").unwrap();
        assert_eq!(key.port, 8080);
    }

    #[test]
    fn same_origin_different_paths_share_key() {
        let a = HostKey::from_url("https://example.com/a").unwrap();
        let b = HostKey::from_url("https://example.com/b?x=1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_url_is_an_error() {
        assert!(HostKey::from_url("not a url").is_err());
    }
}
