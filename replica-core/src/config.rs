use crate::error::{CoreError, Result};
use replica_scanner::Origin;

/// Origins and paths shared by the gateway and batch capture.
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    /// Site pages are fetched from.
    pub proxy_origin: Option<Origin>,
    /// Origin stripped from markup; the proxy origin when unset.
    pub rewrite_origin: Option<Origin>,
    /// Default batch for capture requests that name no paths.
    pub rewrite_paths: Vec<String>,
    /// Emit `{url, type}` resource entries.
    pub tag_resources: bool,
}

/// Origins in effect for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origins {
    pub source: Origin,
    pub rewrite: Origin,
}

impl MirrorConfig {
    pub fn new(proxy_origin: Option<Origin>) -> Self {
        Self {
            proxy_origin,
            ..Self::default()
        }
    }

    pub fn with_rewrite_origin(mut self, origin: Option<Origin>) -> Self {
        self.rewrite_origin = origin;
        self
    }

    pub fn with_rewrite_paths(mut self, paths: Vec<String>) -> Self {
        self.rewrite_paths = paths;
        self
    }

    pub fn with_tagged_resources(mut self, tag_resources: bool) -> Self {
        self.tag_resources = tag_resources;
        self
    }

    /// Applies per-request overrides on top of the configured origins.
    ///
    /// Empty overrides count as absent. The rewrite origin falls back to the
    /// configured one, then to the source origin.
    pub fn origins(&self, proxy: Option<&str>, rewrite: Option<&str>) -> Result<Origins> {
        let source = match non_empty(proxy) {
            Some(value) => parse_param("proxy-origin", value)?,
            None => self.proxy_origin.clone().ok_or(CoreError::MissingOrigin)?,
        };
        let rewrite = match non_empty(rewrite) {
            Some(value) => parse_param("rewrite-origin", value)?,
            None => self
                .rewrite_origin
                .clone()
                .unwrap_or_else(|| source.clone()),
        };
        Ok(Origins { source, rewrite })
    }

    /// Paths for a batch: the request's list, else the configured list, else
    /// `fallback` alone.
    pub fn paths(&self, requested: Option<&str>, fallback: &str) -> Vec<String> {
        let requested = requested.map(parse_paths).unwrap_or_default();
        if !requested.is_empty() {
            requested
        } else if !self.rewrite_paths.is_empty() {
            self.rewrite_paths.clone()
        } else {
            vec![fallback.to_string()]
        }
    }
}

/// Splits a comma-separated path list, dropping blank items.
pub fn parse_paths(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_param(name: &str, value: &str) -> Result<Origin> {
    Origin::parse(value).map_err(|e| CoreError::InvalidUrl(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    #[test]
    fn test_origins_missing_source() {
        let config = MirrorConfig::default();
        assert!(matches!(
            config.origins(None, None),
            Err(CoreError::MissingOrigin)
        ));
        assert!(matches!(
            config.origins(Some("  "), None),
            Err(CoreError::MissingOrigin)
        ));
    }

    #[test]
    fn test_rewrite_defaults_to_source() {
        let config = MirrorConfig::new(Some(origin("http://localhost:3001")));
        let origins = config.origins(None, None).unwrap();
        assert_eq!(origins.rewrite, origins.source);
    }

    #[test]
    fn test_overrides_win_over_config() {
        let config = MirrorConfig::new(Some(origin("http://localhost:3001")))
            .with_rewrite_origin(Some(origin("https://www.example.com")));
        let origins = config
            .origins(Some("https://staging.example.com/x"), Some("https://example.org"))
            .unwrap();
        assert_eq!(origins.source.as_str(), "https://staging.example.com");
        assert_eq!(origins.rewrite.as_str(), "https://example.org");

        let origins = config.origins(Some("https://staging.example.com"), None).unwrap();
        assert_eq!(origins.rewrite.as_str(), "https://www.example.com");
    }

    #[test]
    fn test_invalid_override_names_parameter() {
        let config = MirrorConfig::default();
        let err = config.origins(Some("ftp://nope"), None).unwrap_err();
        assert!(err.to_string().contains("proxy-origin"), "{}", err);
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(parse_paths("/, /about ,,/blog/"), vec!["/", "/about", "/blog/"]);
        assert!(parse_paths("").is_empty());
    }

    #[test]
    fn test_paths_precedence() {
        let config = MirrorConfig::default();
        assert_eq!(config.paths(None, "/here"), vec!["/here"]);
        assert_eq!(config.paths(Some(""), "/here"), vec!["/here"]);

        let config = config.with_rewrite_paths(vec!["/a".into(), "/b".into()]);
        assert_eq!(config.paths(None, "/here"), vec!["/a", "/b"]);
        assert_eq!(config.paths(Some("/c"), "/here"), vec!["/c"]);
    }
}
