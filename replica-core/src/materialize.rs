use crate::error::{CoreError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use replica_scanner::{CaptureDocument, Crawler, HtmlEntry, Origin, ResourceRef};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MaterializeConfig {
    /// Capture document or tracker snapshot to read.
    pub input: PathBuf,
    /// Root of the static tree. Nothing is written outside it.
    pub output: PathBuf,
    /// Where resources are downloaded from.
    pub resource_origin: Origin,
    pub show_progress: bool,
}

impl MaterializeConfig {
    /// Builds a config from user-supplied paths, expanding a leading `~`.
    pub fn new(input: &str, output: &str, resource_origin: Origin) -> Self {
        Self {
            input: expand(input),
            output: expand(output),
            resource_origin,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializeFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub pages_written: usize,
    pub resources_written: usize,
    /// Resources the origin did not serve. They leave holes in the mirror
    /// but are not failures.
    pub resources_skipped: usize,
    pub failures: Vec<MaterializeFailure>,
}

impl MaterializeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, path: &str, err: CoreError) {
        error!("Failed to materialize {}: {}", path, err);
        self.failures.push(MaterializeFailure {
            path: path.to_string(),
            error: err.to_string(),
        });
    }
}

pub async fn load_document(path: &Path) -> Result<CaptureDocument> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Output file for a page path, relative to the output root.
///
/// `/blog/` becomes `blog/index.html`, `/about` becomes `about.html`, and a
/// path whose last segment already has an extension is kept as is.
pub fn page_target(path: &str) -> Result<PathBuf> {
    let path = strip_query(path);
    let last = path.rsplit('/').next().unwrap_or_default();

    let file = if path.is_empty() || path.ends_with('/') {
        format!("{}index.html", path)
    } else if !last.contains('.') {
        format!("{}.html", path)
    } else {
        path.to_string()
    };
    confine(&file)
}

/// Output file for a resource path; the query only matters when fetching.
pub fn resource_target(path: &str) -> Result<PathBuf> {
    let target = confine(strip_query(path))?;
    if target.as_os_str().is_empty() {
        return Err(CoreError::UnsafePath(path.to_string()));
    }
    Ok(target)
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or_default()
}

/// Turns a URL path into a relative filesystem path that stays below the
/// output root.
fn confine(path: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(CoreError::UnsafePath(path.to_string())),
            s if s.contains('\\') => return Err(CoreError::UnsafePath(path.to_string())),
            s => out.push(s),
        }
    }
    Ok(out)
}

/// Writes a capture document out as a static site.
pub struct Materializer {
    config: MaterializeConfig,
    client: Client,
}

impl Materializer {
    pub fn new(config: MaterializeConfig) -> Result<Self> {
        let client = Crawler::with_timeout(30)?.client().clone();
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &MaterializeConfig {
        &self.config
    }

    /// Loads the configured input and materializes it.
    pub async fn run(&self) -> Result<MaterializeReport> {
        let document = load_document(&self.config.input).await?;
        info!(
            "Loaded {} page(s) and {} resource(s) from {}",
            document.html.len(),
            document.resources.len(),
            self.config.input.display()
        );
        Ok(self.materialize(&document).await)
    }

    /// Pages first, then resources, each in document order and one at a time.
    pub async fn materialize(&self, document: &CaptureDocument) -> MaterializeReport {
        let progress = self.progress_bar();
        let mut report = MaterializeReport::default();

        for entry in &document.html {
            progress.set_message(format!("Writing {}", entry.path));
            match self.write_page(entry).await {
                Ok(()) => report.pages_written += 1,
                Err(e) => report.fail(&entry.path, e),
            }
            progress.tick();
        }

        for resource in &document.resources {
            let path = resource.path();
            progress.set_message(format!("Fetching {}", path));
            match self.write_resource(resource).await {
                Ok(true) => report.resources_written += 1,
                Ok(false) => report.resources_skipped += 1,
                Err(e) => report.fail(path, e),
            }
            progress.tick();
        }

        progress.finish_and_clear();
        info!(
            "Materialized {} page(s), {} resource(s) ({} skipped, {} failed) into {}",
            report.pages_written,
            report.resources_written,
            report.resources_skipped,
            report.failures.len(),
            self.config.output.display()
        );
        report
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    async fn write_page(&self, entry: &HtmlEntry) -> Result<()> {
        let target = self.config.output.join(page_target(&entry.path)?);
        write_file(&target, entry.html.as_deref().unwrap_or_default().as_bytes()).await
    }

    /// Returns false when the origin did not hand the resource over.
    async fn write_resource(&self, resource: &ResourceRef) -> Result<bool> {
        let path = resource.path();
        let target = self.config.output.join(resource_target(path)?);
        let url = self.config.resource_origin.resolve(path);
        debug!("Fetching {}", url);

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                return Ok(false);
            }
        };
        if !response.status().is_success() {
            warn!("Failed to fetch {}: {}", url, response.status());
            return Ok(false);
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read {}: {}", url, e);
                return Ok(false);
            }
        };

        write_file(&target, &body).await?;
        Ok(true)
    }
}

async fn write_file(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::io(parent, e))?;
    }
    tokio::fs::write(target, contents)
        .await
        .map_err(|e| CoreError::io(target, e))?;
    info!("Wrote {}", target.display());
    Ok(())
}
