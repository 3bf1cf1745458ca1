use crate::error::{Result, ScanError};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Scheme, host and port of a site.
///
/// Besides same-origin tests, an `Origin` knows the two literal forms in which
/// it shows up inside markup: the plain `https://host` serialization and the
/// JSON-escaped `https:\/\/host` form found in inline configuration blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    root: Url,
    raw: String,
    escaped: String,
}

impl Origin {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", input, e)))?;
        Self::from_url(&url)
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ScanError::InvalidUrl(format!(
                "{}: expected an http(s) origin",
                url
            )));
        }

        let raw = url.origin().ascii_serialization();
        let root = Url::parse(&raw).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))?;
        let escaped = raw.replace('/', "\\/");

        Ok(Self { root, raw, escaped })
    }

    /// `https://host[:port]` without a trailing slash.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The origin with every `/` escaped as `\/`.
    pub fn escaped(&self) -> &str {
        &self.escaped
    }

    /// Root URL of the origin (`https://host/`).
    pub fn url(&self) -> &Url {
        &self.root
    }

    pub fn contains(&self, url: &Url) -> bool {
        url.origin() == self.root.origin()
    }

    /// Builds the URL for a path (optionally carrying a query) on this origin.
    ///
    /// The host never changes, even for inputs such as `//other.example/x`
    /// that `Url::join` would treat as protocol-relative.
    pub fn resolve(&self, path_and_query: &str) -> Url {
        let without_fragment = path_and_query
            .split_once('#')
            .map_or(path_and_query, |(head, _)| head);
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };

        let mut url = self.root.clone();
        url.set_path(path);
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }

    /// Removes every occurrence of the origin, raw or escaped, from `value`.
    ///
    /// Both forms are matched in one left-to-right scan. The scan repeats until
    /// neither form remains, so stripping an already stripped value returns it
    /// unchanged.
    pub fn strip(&self, value: &str) -> String {
        let mut current = self.strip_once(value);
        while current.contains(&self.raw) || current.contains(&self.escaped) {
            current = self.strip_once(&current);
        }
        current
    }

    fn strip_once(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(ch) = rest.chars().next() {
            if rest.starts_with(&self.raw) {
                rest = &rest[self.raw.len()..];
            } else if rest.starts_with(&self.escaped) {
                rest = &rest[self.escaped.len()..];
            } else {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
        out
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Origin {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Path plus non-empty query of a URL, fragment dropped.
pub fn path_and_query(url: &Url) -> String {
    let mut out = url.path().to_string();
    if let Some(query) = url.query()
        && !query.is_empty()
    {
        out.push('?');
        out.push_str(query);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_only_origin() {
        let origin = Origin::parse("https://example.com/some/page?x=1").unwrap();
        assert_eq!(origin.as_str(), "https://example.com");
        assert_eq!(origin.escaped(), "https:\\/\\/example.com");
        assert_eq!(origin.url().as_str(), "https://example.com/");
    }

    #[test]
    fn test_parse_keeps_port() {
        let origin = Origin::parse("http://localhost:3001").unwrap();
        assert_eq!(origin.as_str(), "http://localhost:3001");
    }

    #[test]
    fn test_parse_rejects_non_http() {
        assert!(Origin::parse("mailto:someone@example.com").is_err());
        assert!(Origin::parse("not a url").is_err());
    }

    #[test]
    fn test_strip_both_forms() {
        let origin = Origin::parse("https://example.com").unwrap();
        let value = r#"{"a":"https:\/\/example.com\/x.png","b":"https://example.com/y"}"#;
        assert_eq!(origin.strip(value), r#"{"a":"\/x.png","b":"/y"}"#);
    }

    #[test]
    fn test_strip_is_idempotent() {
        let origin = Origin::parse("https://example.com").unwrap();
        let once = origin.strip("https://exhttps://example.comample.com/a");
        assert_eq!(once, "/a");
        assert_eq!(origin.strip(&once), once);
    }

    #[test]
    fn test_strip_leaves_other_origins() {
        let origin = Origin::parse("https://example.com").unwrap();
        assert_eq!(
            origin.strip("https://cdn.example.net/lib.js"),
            "https://cdn.example.net/lib.js"
        );
    }

    #[test]
    fn test_resolve_never_changes_host() {
        let origin = Origin::parse("https://example.com").unwrap();
        let url = origin.resolve("//evil.example/x?y=1#frag");
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.query(), Some("y=1"));
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_path_and_query_drops_empty_query() {
        let url = Url::parse("https://example.com/a?").unwrap();
        assert_eq!(path_and_query(&url), "/a");
        let url = Url::parse("https://example.com/a?b=1#c").unwrap();
        assert_eq!(path_and_query(&url), "/a?b=1");
    }
}
