//! Source URL canonicalization and host allow-list matching.

use thiserror::Error;
use url::Url;

/// Errors raised while validating a source URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("URL is not parseable: {0}")]
    Unparseable(String),

    #[error("URL scheme must be http or https, got '{0}'")]
    BadScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("host '{0}' is not on the allow-list")]
    HostNotAllowed(String),
}

/// A host pattern from configuration.
///
/// Either an exact host (`video.example.com`) or a wildcard covering one
/// subdomain level and the apex (`*.example.com` matches `example.com` and
/// `www.example.com`). Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    pattern: String,
    wildcard: bool,
}

impl HostPattern {
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        if let Some(rest) = s.strip_prefix("*.") {
            Self {
                pattern: rest.to_string(),
                wildcard: true,
            }
        } else {
            Self {
                pattern: s,
                wildcard: false,
            }
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.wildcard {
            host == self.pattern || host.ends_with(&format!(".{}", self.pattern))
        } else {
            host == self.pattern
        }
    }
}

/// Canonicalize a source URL and check it against the allow-list.
///
/// Canonical form: lowercased host, default ports stripped (the `url` crate
/// does both), fragment removed, trailing `&` noise avoided by re-serializing.
pub fn canonicalize_url(raw: &str, allowed: &[HostPattern]) -> Result<String, UrlError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| UrlError::Unparseable(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::BadScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .ok_or(UrlError::MissingHost)?
        .to_ascii_lowercase();

    if !allowed.is_empty() && !allowed.iter().any(|p| p.matches(&host)) {
        return Err(UrlError::HostNotAllowed(host));
    }

    url.set_fragment(None);
    Ok(url.to_string())
}
