use crate::collector::{CapturedResource, Collector, ResourceKind};
use crate::error::{Result, ScanError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Output of one batch capture: rewritten pages plus everything they reference.
///
/// All fields default to empty when reading, so a tracker snapshot
/// (`{"resources": [...]}`) parses as a document too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureDocument {
    #[serde(default)]
    pub html: Vec<HtmlEntry>,
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    #[serde(default)]
    pub pages: Vec<String>,
}

/// A crawled path. `html` is absent when the path could not be captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtmlEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl HtmlEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            html: None,
        }
    }
}

/// A resource path on the wire, either bare or tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceRef {
    Path(String),
    Tagged {
        url: String,
        #[serde(rename = "type")]
        kind: ResourceKind,
    },
}

impl ResourceRef {
    pub fn from_captured(resource: &CapturedResource, tagged: bool) -> Self {
        match (tagged, resource.kind) {
            (true, Some(kind)) => ResourceRef::Tagged {
                url: resource.path.clone(),
                kind,
            },
            _ => ResourceRef::Path(resource.path.clone()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ResourceRef::Path(path) => path,
            ResourceRef::Tagged { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Fresh,
    Entries(usize),
    Finished,
}

/// Writes a [`CaptureDocument`] incrementally into a channel.
///
/// Entries go out as soon as they are produced; resources and pages follow
/// once, at [`finish`](Self::finish). Consumers that split on the fixed
/// separators (`{"html":[`, `,\n"resources":`) rely on this exact layout.
pub struct CaptureWriter {
    tx: mpsc::Sender<Bytes>,
    tag_resources: bool,
    state: WriterState,
}

impl CaptureWriter {
    pub fn new(tx: mpsc::Sender<Bytes>, tag_resources: bool) -> Self {
        Self {
            tx,
            tag_resources,
            state: WriterState::Fresh,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, chunk: String) -> Result<()> {
        self.tx
            .send(Bytes::from(chunk))
            .await
            .map_err(|_| ScanError::StreamClosed)
    }

    pub async fn begin(&mut self) -> Result<()> {
        if self.state == WriterState::Fresh {
            self.send("{\"html\":[\n".to_string()).await?;
            self.state = WriterState::Entries(0);
        }
        Ok(())
    }

    pub async fn entry(&mut self, entry: &HtmlEntry) -> Result<()> {
        self.begin().await?;
        let WriterState::Entries(count) = self.state else {
            return Err(ScanError::StreamClosed);
        };

        let mut chunk = String::new();
        if count > 0 {
            chunk.push_str(",\n");
        }
        chunk.push_str(&serde_json::to_string_pretty(entry)?);
        self.send(chunk).await?;
        self.state = WriterState::Entries(count + 1);
        Ok(())
    }

    /// Closes the html array and writes the collected resources and pages.
    pub async fn finish(&mut self, collector: &Collector) -> Result<()> {
        if self.state == WriterState::Finished {
            return Ok(());
        }
        self.begin().await?;

        let resources: Vec<ResourceRef> = collector
            .resources()
            .iter()
            .map(|r| ResourceRef::from_captured(r, self.tag_resources))
            .collect();

        let mut tail = String::from("\n]");
        tail.push_str(",\n\"resources\":\n");
        tail.push_str(&serde_json::to_string_pretty(&resources)?);
        tail.push_str(",\n\"pages\":\n");
        tail.push_str(&serde_json::to_string_pretty(collector.pages())?);
        tail.push_str("\n}\n");

        self.send(tail).await?;
        self.state = WriterState::Finished;
        Ok(())
    }
}
