use crate::origin::{Origin, path_and_query};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

/// What kind of tag a captured resource was referenced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Script,
    Style,
    Srcset,
    Icon,
    Media,
    Font,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResource {
    pub path: String,
    pub kind: Option<ResourceKind>,
}

/// Accumulates same-origin resource and page paths seen during a rewrite pass.
///
/// Keys are normalized paths (path plus query, no scheme, host or fragment),
/// kept in first-seen order. A disabled collector accepts and drops
/// everything, which is what plain proxy traffic uses.
#[derive(Debug, Clone)]
pub struct Collector {
    origin: Origin,
    base: Url,
    enabled: bool,
    resources: Vec<CapturedResource>,
    resource_keys: HashSet<String>,
    pages: Vec<String>,
    page_keys: HashSet<String>,
}

impl Collector {
    pub fn new(origin: Origin) -> Self {
        let base = origin.url().clone();
        Self {
            origin,
            base,
            enabled: true,
            resources: Vec::new(),
            resource_keys: HashSet::new(),
            pages: Vec::new(),
            page_keys: HashSet::new(),
        }
    }

    pub fn disabled(origin: Origin) -> Self {
        Self {
            enabled: false,
            ..Self::new(origin)
        }
    }

    /// Sets the page that relative URLs are resolved against.
    pub fn set_page(&mut self, path: &str) {
        self.base = self.origin.resolve(path);
    }

    /// Resolves `url` against the current page and returns its normalized
    /// path, or `None` when it is unparseable or belongs to another origin.
    pub fn normalize(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        let resolved = match self.base.join(url) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Invalid URL: {} ({})", url, e);
                return None;
            }
        };

        if !self.origin.contains(&resolved) {
            debug!("Ignoring cross-origin URL: {}", resolved);
            return None;
        }

        Some(path_and_query(&resolved))
    }

    /// Records a resource. Returns true when it was not seen before.
    pub fn add(&mut self, url: &str, kind: Option<ResourceKind>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(path) = self.normalize(url) else {
            return false;
        };
        if !self.resource_keys.insert(path.clone()) {
            return false;
        }
        debug!("Captured resource: {} ({:?})", path, kind);
        self.resources.push(CapturedResource { path, kind });
        true
    }

    /// Records every URL of a `srcset` value, ignoring width and density
    /// descriptors. Returns how many new resources were added.
    pub fn add_srcset(&mut self, value: &str) -> usize {
        value
            .split(',')
            .filter_map(|candidate| candidate.split_whitespace().next())
            .filter(|url| self.add(url, Some(ResourceKind::Srcset)))
            .count()
    }

    /// Records a linked page. Only anchor targets belong here.
    pub fn add_page(&mut self, url: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(path) = self.normalize(url) else {
            return false;
        };
        if !self.page_keys.insert(path.clone()) {
            return false;
        }
        debug!("Captured page: {}", path);
        self.pages.push(path);
        true
    }

    pub fn resources(&self) -> &[CapturedResource] {
        &self.resources
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> Collector {
        Collector::new(Origin::parse("https://example.com").unwrap())
    }

    fn paths(collector: &Collector) -> Vec<&str> {
        collector.resources().iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn test_add_absolute_same_origin() {
        let mut c = collector();
        assert!(c.add("https://example.com/wp-content/logo.png?ver=2#x", Some(ResourceKind::Image)));
        assert_eq!(paths(&c), vec!["/wp-content/logo.png?ver=2"]);
        assert_eq!(c.resources()[0].kind, Some(ResourceKind::Image));
    }

    #[test]
    fn test_add_relative_resolves_against_origin() {
        let mut c = collector();
        c.add("img/a.png", None);
        c.add("/css/site.css", None);
        assert_eq!(paths(&c), vec!["/img/a.png", "/css/site.css"]);
    }

    #[test]
    fn test_add_relative_resolves_against_page() {
        let mut c = collector();
        c.set_page("/blog/post/");
        c.add("thumb.jpg", None);
        c.add("../up.jpg", None);
        assert_eq!(paths(&c), vec!["/blog/post/thumb.jpg", "/blog/up.jpg"]);
    }

    #[test]
    fn test_add_ignores_cross_origin() {
        let mut c = collector();
        assert!(!c.add("https://cdn.example.net/lib.js", None));
        assert!(!c.add("http://example.com/insecure.js", None));
        assert!(!c.add("//other.example/x.png", None));
        assert!(!c.add("data:image/png;base64,AAAA", None));
        assert!(c.resources().is_empty());
    }

    #[test]
    fn test_add_ignores_empty_and_invalid() {
        let mut c = collector();
        assert!(!c.add("   ", None));
        assert!(!c.add("http://[::1", None));
        assert!(c.resources().is_empty());
    }

    #[test]
    fn test_dedup_on_normalized_key() {
        let mut c = collector();
        assert!(c.add("https://example.com/a.js", Some(ResourceKind::Script)));
        assert!(!c.add("/a.js#top", Some(ResourceKind::Image)));
        assert!(!c.add("a.js", None));
        assert_eq!(c.resources().len(), 1);
        assert_eq!(c.resources()[0].kind, Some(ResourceKind::Script));
    }

    #[test]
    fn test_add_srcset_discards_descriptors() {
        let mut c = collector();
        assert_eq!(c.add_srcset("a.png 1x, b.png 2x"), 2);
        assert_eq!(paths(&c), vec!["/a.png", "/b.png"]);
        assert!(
            c.resources()
                .iter()
                .all(|r| r.kind == Some(ResourceKind::Srcset))
        );
    }

    #[test]
    fn test_add_srcset_with_absolute_urls_and_widths() {
        let mut c = collector();
        let added = c.add_srcset(
            "https://example.com/up/logo.png 412w, https://example.com/up/logo-300x186.png 300w, https://cdn.example.net/x.png 100w",
        );
        assert_eq!(added, 2);
        assert_eq!(paths(&c), vec!["/up/logo.png", "/up/logo-300x186.png"]);
    }

    #[test]
    fn test_pages_are_separate_from_resources() {
        let mut c = collector();
        assert!(c.add_page("https://example.com/about?lang=en#team"));
        assert!(!c.add_page("/about?lang=en"));
        assert!(!c.add_page("mailto:hello@example.com"));
        assert_eq!(c.pages(), &["/about?lang=en".to_string()]);
        assert!(c.resources().is_empty());
    }

    #[test]
    fn test_disabled_collector_drops_everything() {
        let mut c = Collector::disabled(Origin::parse("https://example.com").unwrap());
        assert!(!c.add("/a.png", None));
        assert_eq!(c.add_srcset("/a.png 1x"), 0);
        assert!(!c.add_page("/about"));
        assert!(c.resources().is_empty());
        assert!(c.pages().is_empty());
    }
}
