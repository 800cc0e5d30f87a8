use url::Url;

use crate::config::BINARY_EXTENSIONS;

/// Normalize a URL into its canonical form:
/// - resolves relative references against `base`
/// - promotes scheme-relative (`//host/...`) to https
/// - lowercases scheme and host, strips the fragment
/// - drops default ports (80 for http, 443 for https)
/// - collapses a lone trailing slash on non-root paths
///
/// Returns `None` when the result has no host or a non-http(s) scheme.
pub fn normalize(raw: &str, base: Option<&Url>) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let promoted;
    let candidate = if raw.starts_with("//") {
        promoted = format!("https:{raw}");
        promoted.as_str()
    } else {
        raw
    };

    let mut parsed = match base {
        Some(base) => base.join(candidate).ok()?,
        None => Url::parse(candidate).ok()?,
    };

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;

    parsed.set_fragment(None);

    // The url crate already lowercases scheme/host and omits default ports;
    // trailing slash collapse is the one rule we add on top.
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(&path[..path.len() - 1]);
    }

    Some(parsed)
}

/// Canonical 128-bit identity of a URL: MD5 over the normalized form,
/// rendered as 32 hex chars. Two URLs with the same key are the same page.
pub fn url_key(url: &Url) -> String {
    format!("{:x}", md5::compute(url.as_str().as_bytes()))
}

/// Lowercased host of a URL, or empty when absent.
pub fn domain_of(url: &Url) -> String {
    url.host_str().map(|h| h.to_lowercase()).unwrap_or_default()
}

/// Why the filter rejected a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    DomainNotAllowed,
    ExcludedPattern(String),
    BinaryAsset(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::DomainNotAllowed => write!(f, "host not in allowed domains"),
            RejectReason::ExcludedPattern(pattern) => {
                write!(f, "matches exclude pattern '{pattern}'")
            }
            RejectReason::BinaryAsset(ext) => write!(f, "binary asset ({ext})"),
        }
    }
}

/// Allow/deny policy applied at every frontier push.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    /// When non-empty, the host must equal one of these domains or be a
    /// subdomain of one.
    pub allowed_domains: Vec<String>,
    /// Substrings that suppress a URL anywhere in its canonical form.
    pub exclude_patterns: Vec<String>,
}

impl UrlFilter {
    pub fn new(allowed_domains: Vec<String>, exclude_patterns: Vec<String>) -> Self {
        UrlFilter {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
            exclude_patterns,
        }
    }

    pub fn check(&self, url: &Url) -> Result<(), RejectReason> {
        if !self.allowed_domains.is_empty() {
            let host = domain_of(url);
            let allowed = self
                .allowed_domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}")));
            if !allowed {
                return Err(RejectReason::DomainNotAllowed);
            }
        }

        let as_str = url.as_str();
        for pattern in &self.exclude_patterns {
            if !pattern.is_empty() && as_str.contains(pattern.as_str()) {
                return Err(RejectReason::ExcludedPattern(pattern.clone()));
            }
        }

        let path = url.path().to_lowercase();
        for ext in BINARY_EXTENSIONS {
            if path.ends_with(ext) {
                return Err(RejectReason::BinaryAsset(ext.to_string()));
            }
        }

        Ok(())
    }

    pub fn is_allowed(&self, url: &Url) -> bool {
        self.check(url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_fragment_and_default_port() {
        let url = normalize("HTTP://Example.COM:80/Path#section", None).unwrap();
        assert_eq!(url.as_str(), "http://example.com/Path");
    }

    #[test]
    fn test_normalize_trailing_slash() {
        let a = normalize("https://example.com/page/", None).unwrap();
        let b = normalize("https://example.com/page", None).unwrap();
        assert_eq!(a, b);
        // Root path keeps its slash
        let root = normalize("https://example.com/", None).unwrap();
        assert_eq!(root.path(), "/");
    }

    #[test]
    fn test_normalize_preserves_query() {
        let url = normalize("https://example.com/search?q=admission&page=2", None).unwrap();
        assert_eq!(url.query(), Some("q=admission&page=2"));
    }

    #[test]
    fn test_normalize_scheme_relative() {
        let url = normalize("//cdn.example.com/lib.js", None).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn test_normalize_relative_against_base() {
        let base = Url::parse("https://example.com/docs/guide").unwrap();
        let url = normalize("/apply", Some(&base)).unwrap();
        assert_eq!(url.as_str(), "https://example.com/apply");

        let sibling = normalize("intro.html", Some(&base)).unwrap();
        assert_eq!(sibling.as_str(), "https://example.com/docs/intro.html");
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert!(normalize("mailto:admin@example.com", None).is_none());
        assert!(normalize("javascript:void(0)", None).is_none());
        assert!(normalize("ftp://example.com/file", None).is_none());
        assert!(normalize("not a url", None).is_none());
        assert!(normalize("", None).is_none());
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in [
            "https://Example.com/A/B/?x=1",
            "http://example.com:80/page/",
            "//example.com/path#frag",
        ] {
            let once = normalize(raw, None).unwrap();
            let twice = normalize(once.as_str(), None).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_url_key_is_stable_across_spellings() {
        let a = normalize("https://example.com/a/", None).unwrap();
        let b = normalize("https://EXAMPLE.com/a#top", None).unwrap();
        assert_eq!(url_key(&a), url_key(&b));
        assert_eq!(url_key(&a).len(), 32);
    }

    #[test]
    fn test_filter_allowed_domains() {
        let filter = UrlFilter::new(vec!["example.com".to_string()], vec![]);
        let same = normalize("https://example.com/x", None).unwrap();
        let sub = normalize("https://www.example.com/x", None).unwrap();
        let other = normalize("https://other.com/x", None).unwrap();
        assert!(filter.is_allowed(&same));
        assert!(filter.is_allowed(&sub));
        assert_eq!(filter.check(&other), Err(RejectReason::DomainNotAllowed));
    }

    #[test]
    fn test_filter_exclude_patterns() {
        let filter = UrlFilter::new(vec![], vec!["/login".to_string()]);
        let url = normalize("https://example.com/login?next=/", None).unwrap();
        assert!(matches!(
            filter.check(&url),
            Err(RejectReason::ExcludedPattern(_))
        ));
    }

    #[test]
    fn test_filter_binary_assets() {
        let filter = UrlFilter::default();
        let pdf = normalize("https://example.com/brochure.PDF", None).unwrap();
        assert!(matches!(filter.check(&pdf), Err(RejectReason::BinaryAsset(_))));
        let page = normalize("https://example.com/brochure", None).unwrap();
        assert!(filter.is_allowed(&page));
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let filter = UrlFilter::default();
        let url = normalize("https://anything.example.org/path", None).unwrap();
        assert!(filter.is_allowed(&url));
    }
}
