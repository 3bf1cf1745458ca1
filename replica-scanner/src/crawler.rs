use crate::collector::Collector;
use crate::document::{CaptureWriter, HtmlEntry};
use crate::error::{Result, ScanError};
use crate::origin::Origin;
use crate::result::CaptureSummary;
use crate::rewriter::{RewriteEngine, RewriteOutcome};
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = concat!("Replica/", env!("CARGO_PKG_VERSION"));

/// One batch capture request.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    /// Where pages are fetched from.
    pub source: Origin,
    /// Origin stripped from the markup and used to decide what gets collected.
    pub rewrite: Origin,
    /// Source paths, fetched in this order.
    pub paths: Vec<String>,
    /// Emit resources as `{url, type}` objects instead of bare paths.
    pub tag_resources: bool,
}

impl CaptureJob {
    pub fn new(source: Origin, rewrite: Option<Origin>, paths: Vec<String>) -> Self {
        let rewrite = rewrite.unwrap_or_else(|| source.clone());
        Self {
            source,
            rewrite,
            paths,
            tag_resources: false,
        }
    }

    pub fn with_tagged_resources(mut self, tag_resources: bool) -> Self {
        self.tag_resources = tag_resources;
        self
    }
}

/// HTTP side of the mirror: fetches source pages and streams capture documents.
#[derive(Debug, Clone)]
pub struct Crawler {
    client: Client,
}

impl Crawler {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Self::builder(timeout_secs)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }

    /// A client that hands redirects back to the caller, for relaying
    /// upstream responses untouched.
    pub fn passthrough(timeout_secs: u64) -> Result<Self> {
        let client = Self::builder(timeout_secs)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    fn builder(timeout_secs: u64) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches every path of `job` in order and streams the capture document
    /// into `tx`.
    ///
    /// A path that cannot be captured becomes a path-only entry and the batch
    /// moves on. Any other failure ends the batch early, but the document is
    /// still closed with what was collected so far. When the receiver is
    /// dropped the batch stops without writing anything further.
    pub async fn capture(&self, job: &CaptureJob, tx: mpsc::Sender<Bytes>) -> Result<CaptureSummary> {
        info!(
            "Capturing {} path(s) from {} (rewriting {})",
            job.paths.len(),
            job.source,
            job.rewrite
        );

        let engine = RewriteEngine::new(job.rewrite.clone());
        let mut writer = CaptureWriter::new(tx, job.tag_resources);
        let mut collector = Collector::new(job.rewrite.clone());
        let mut summary = CaptureSummary::default();

        let outcome = self
            .capture_all(job, &engine, &mut writer, &mut collector, &mut summary)
            .await;

        match outcome {
            Err(ScanError::StreamClosed) => {
                debug!("Capture consumer went away, stopping");
                return Err(ScanError::StreamClosed);
            }
            Err(e) => error!("Capture aborted: {}", e),
            Ok(()) => {}
        }

        if let Err(e) = writer.finish(&collector).await {
            debug!("Could not close capture document: {}", e);
            return Err(e);
        }

        summary.resources = collector.resources().len();
        summary.pages = collector.pages().len();
        info!(
            "Capture finished: {} captured, {} skipped, {} resources, {} pages",
            summary.captured, summary.skipped, summary.resources, summary.pages
        );
        Ok(summary)
    }

    async fn capture_all(
        &self,
        job: &CaptureJob,
        engine: &RewriteEngine,
        writer: &mut CaptureWriter,
        collector: &mut Collector,
        summary: &mut CaptureSummary,
    ) -> Result<()> {
        writer.begin().await?;

        for path in &job.paths {
            if writer.is_closed() {
                return Err(ScanError::StreamClosed);
            }

            let mut entry = HtmlEntry::new(path.as_str());
            match self.capture_page(job, engine, collector, path).await {
                Ok(Some(html)) => {
                    summary.captured += 1;
                    entry.html = Some(html);
                }
                Ok(None) => summary.skipped += 1,
                Err(e @ (ScanError::HttpError(_) | ScanError::Rewrite(_))) => {
                    warn!("Skipping {}: {}", path, e);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
            writer.entry(&entry).await?;
        }
        Ok(())
    }

    /// Returns the rewritten page, or `None` when the response was not an
    /// OK HTML document.
    async fn capture_page(
        &self,
        job: &CaptureJob,
        engine: &RewriteEngine,
        collector: &mut Collector,
        path: &str,
    ) -> Result<Option<String>> {
        let url = job.source.resolve(path);
        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let content_type = content_type(response.headers()).map(str::to_string);

        if !status.is_success() {
            warn!("Skipping {}: upstream returned {}", path, status);
            return Ok(None);
        }
        if !is_html(content_type.as_deref()) {
            warn!(
                "Skipping {}: not HTML ({})",
                path,
                content_type.as_deref().unwrap_or("no content type")
            );
            return Ok(None);
        }

        collector.set_page(path);
        collect_page(collector, |page| {
            engine
                .rewrite_stream(response.bytes_stream(), page)
                .into_text()
        })
        .await
    }
}

/// Runs one page's rewrite on a copy of the batch collector. The copy is
/// adopted only when the worker hands it back; otherwise the collector keeps
/// what earlier pages gathered.
async fn collect_page<F, Fut>(collector: &mut Collector, rewrite: F) -> Result<Option<String>>
where
    F: FnOnce(Collector) -> Fut,
    Fut: Future<Output = Result<RewriteOutcome>>,
{
    let outcome = rewrite(collector.clone()).await?;
    *collector = outcome.collector;
    outcome.html.map(Some)
}

pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

pub fn is_html(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CaptureDocument, ResourceRef};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    async fn html_mock(server: &MockServer, at: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=UTF-8")
                    .set_body_bytes(body),
            )
            .mount(server)
            .await;
    }

    async fn run(job: CaptureJob) -> (Result<CaptureSummary>, String) {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(async move {
            let crawler = Crawler::new().unwrap();
            crawler.capture(&job, tx).await
        });

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        (handle.await.unwrap(), String::from_utf8(out).unwrap())
    }

    fn job(server: &MockServer, paths: &[&str]) -> CaptureJob {
        let origin = Origin::parse(&server.uri()).unwrap();
        CaptureJob::new(origin, None, paths.iter().map(|p| p.to_string()).collect())
    }

    #[tokio::test]
    async fn test_capture_keeps_order_and_skips_failures() {
        let server = MockServer::start().await;
        html_mock(
            &server,
            "/a",
            format!(
                r#"<html><body><a href="{0}/b">B</a><img src="{0}/up/a.png"></body></html>"#,
                server.uri()
            ),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (summary, text) = run(job(&server, &["/a", "/b"])).await;
        let summary = summary.unwrap();
        assert_eq!(summary.captured, 1);
        assert_eq!(summary.skipped, 1);

        let doc: CaptureDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.html.len(), 2);
        assert_eq!(doc.html[0].path, "/a");
        let html = doc.html[0].html.as_deref().unwrap();
        assert!(html.contains(r#"<a href="/b">"#), "{}", html);
        assert!(!html.contains(&server.uri()));
        assert_eq!(doc.html[1].path, "/b");
        assert_eq!(doc.html[1].html, None);
        assert_eq!(doc.resources, vec![ResourceRef::Path("/up/a.png".into())]);
        assert_eq!(doc.pages, vec!["/b".to_string()]);
    }

    #[tokio::test]
    async fn test_capture_skips_non_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_bytes("<rss/>"),
            )
            .mount(&server)
            .await;

        let (summary, text) = run(job(&server, &["/feed.xml"])).await;
        assert_eq!(summary.unwrap().skipped, 1);
        let doc: CaptureDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.html[0].html, None);
    }

    #[tokio::test]
    async fn test_capture_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        html_mock(&server, "/new", "<html><body>moved</body></html>".into()).await;

        let (summary, text) = run(job(&server, &["/old"])).await;
        assert_eq!(summary.unwrap().captured, 1);
        let doc: CaptureDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.html[0].path, "/old");
        assert!(doc.html[0].html.as_deref().unwrap().contains("moved"));
    }

    #[tokio::test]
    async fn test_capture_resolves_relative_urls_against_page() {
        let server = MockServer::start().await;
        html_mock(
            &server,
            "/blog/post/",
            r#"<html><body><img src="thumb.jpg"><a href="../">Up</a></body></html>"#.into(),
        )
        .await;

        let (_, text) = run(job(&server, &["/blog/post/"])).await;
        let doc: CaptureDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(
            doc.resources,
            vec![ResourceRef::Path("/blog/post/thumb.jpg".into())]
        );
        assert_eq!(doc.pages, vec!["/blog/".to_string()]);
    }

    #[tokio::test]
    async fn test_capture_with_separate_rewrite_origin() {
        let server = MockServer::start().await;
        html_mock(
            &server,
            "/",
            r#"<html><body><a href="https://www.example.com/contact">C</a></body></html>"#.into(),
        )
        .await;

        let source = Origin::parse(&server.uri()).unwrap();
        let rewrite = Origin::parse("https://www.example.com").unwrap();
        let job = CaptureJob::new(source, Some(rewrite), vec!["/".into()]);

        let (_, text) = run(job).await;
        let doc: CaptureDocument = serde_json::from_str(&text).unwrap();
        assert!(
            doc.html[0]
                .html
                .as_deref()
                .unwrap()
                .contains(r#"<a href="/contact">"#)
        );
        assert_eq!(doc.pages, vec!["/contact".to_string()]);
    }

    #[tokio::test]
    async fn test_capture_unreachable_source_still_closes_document() {
        let origin = Origin::parse("http://127.0.0.1:9").unwrap();
        let job = CaptureJob::new(origin, None, vec!["/".into(), "/x".into()]);

        let (summary, text) = run(job).await;
        assert_eq!(summary.unwrap().skipped, 2);
        let doc: CaptureDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.html.len(), 2);
        assert!(doc.html.iter().all(|e| e.html.is_none()));
    }

    #[tokio::test]
    async fn test_capture_stops_when_consumer_is_gone() {
        let server = MockServer::start().await;
        html_mock(&server, "/", "<html></html>".into()).await;

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let crawler = Crawler::new().unwrap();
        let result = crawler.capture(&job(&server, &["/"]), tx).await;
        assert!(matches!(result, Err(ScanError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_lost_worker_keeps_earlier_resources() {
        let origin = Origin::parse("https://www.example.com").unwrap();
        let mut collector = Collector::new(origin);
        collector.add("/wp-content/a.png", None);
        collector.add_page("/about/");

        let result = collect_page(&mut collector, |mut page| async move {
            page.add("/wp-content/b.png", None);
            let worker = tokio::spawn(async {
                if true {
                    panic!("rewrite worker lost");
                }
            });
            match worker.await {
                Err(e) => Err(ScanError::from(e)),
                Ok(()) => Ok(RewriteOutcome {
                    collector: page,
                    html: Ok(String::new()),
                }),
            }
        })
        .await;
        assert!(matches!(result, Err(ScanError::JoinError(_))));

        let (tx, mut rx) = mpsc::channel(8);
        let mut writer = CaptureWriter::new(tx, false);
        writer.begin().await.unwrap();
        writer.finish(&collector).await.unwrap();
        drop(writer);

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        let doc: CaptureDocument = serde_json::from_slice(&out).unwrap();
        assert!(doc.html.is_empty());
        assert_eq!(
            doc.resources,
            vec![ResourceRef::Path("/wp-content/a.png".into())]
        );
        assert_eq!(doc.pages, vec!["/about/".to_string()]);
    }

    #[test]
    fn test_is_html() {
        assert!(is_html(Some("text/html")));
        assert!(is_html(Some("Text/HTML; charset=utf-8")));
        assert!(!is_html(Some("application/json")));
        assert!(!is_html(None));
    }
}
