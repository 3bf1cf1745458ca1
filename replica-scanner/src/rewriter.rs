use crate::collector::{Collector, ResourceKind};
use crate::error::{Result, ScanError};
use crate::origin::Origin;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use lol_html::html_content::{ContentType, Element, TextChunk};
use lol_html::{HtmlRewriter, OutputSink, Settings, element, text};
use std::cell::RefCell;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

type HandlerResult<T = ()> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Chunks buffered between the network, the tokenizer and the consumer.
const CHANNEL_DEPTH: usize = 16;

/// `link` relations that identify the source CMS and are dropped outright.
const REMOVED_LINK_RELS: &[&str] = &[
    "alternate",
    "canonical",
    "shortlink",
    "EditURI",
    "profile",
    "https://api.w.org/",
];

/// Rewrites HTML so that URLs on the tracked origin become origin-relative,
/// feeding every captured URL to a [`Collector`] in the same pass.
///
/// Handlers are registered per element kind, never per attribute, so each
/// attribute of an element is touched by exactly one handler.
#[derive(Debug, Clone)]
pub struct RewriteEngine {
    origin: Origin,
}

impl RewriteEngine {
    pub fn new(origin: Origin) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Rewrites a complete document held in memory.
    pub fn rewrite_document(&self, html: &[u8], collector: &mut Collector) -> Result<String> {
        let owned = std::mem::replace(collector, Collector::disabled(self.origin.clone()));
        let mut output = Vec::with_capacity(html.len());

        let (owned, result) = run(
            &self.origin,
            owned,
            std::iter::once(Ok(html)),
            |chunk: &[u8]| output.extend_from_slice(chunk),
        );
        *collector = owned;
        result?;

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Rewrites a byte stream without buffering the document.
    ///
    /// The tokenizer runs on a blocking worker connected to the input and the
    /// output by bounded channels. Dropping the returned stream stops the
    /// rewrite at the next chunk.
    pub fn rewrite_stream<S, E>(&self, body: S, collector: Collector) -> RewriteStream
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<ScanError> + Send + 'static,
    {
        let (input_tx, mut input_rx) = mpsc::channel::<Result<Bytes>>(CHANNEL_DEPTH);
        let (output_tx, output_rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);

        tokio::spawn(async move {
            let mut body = Box::pin(body);
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(Into::into);
                let failed = chunk.is_err();
                if input_tx.send(chunk).await.is_err() || failed {
                    break;
                }
            }
        });

        let origin = self.origin.clone();
        let task = tokio::task::spawn_blocking(move || {
            let probe = output_tx.clone();
            let chunks = std::iter::from_fn(|| {
                if probe.is_closed() {
                    return Some(Err(ScanError::StreamClosed));
                }
                input_rx.blocking_recv()
            });
            let sink = move |chunk: &[u8]| {
                if !chunk.is_empty() {
                    let _ = output_tx.blocking_send(Ok(Bytes::copy_from_slice(chunk)));
                }
            };

            let (collector, result) = run(&origin, collector, chunks, sink);
            match &result {
                Err(ScanError::StreamClosed) => debug!("Rewrite consumer went away"),
                Err(e) => {
                    let _ = probe.blocking_send(Err(io::Error::other(e.to_string())));
                }
                Ok(()) => {}
            }
            (collector, result)
        });

        RewriteStream {
            output: output_rx,
            task,
        }
    }
}

/// A rewrite in progress. Consume it either as a body stream or as text.
pub struct RewriteStream {
    output: mpsc::Receiver<io::Result<Bytes>>,
    task: JoinHandle<(Collector, Result<()>)>,
}

/// Result of a fully materialized rewrite.
#[derive(Debug)]
pub struct RewriteOutcome {
    pub collector: Collector,
    pub html: Result<String>,
}

impl RewriteStream {
    /// Rewritten bytes for relaying to a client; the worker keeps running
    /// in the background until the input ends or the stream is dropped.
    pub fn into_body(self) -> ReceiverStream<io::Result<Bytes>> {
        ReceiverStream::new(self.output)
    }

    /// Collects the rewritten document. The outer error only reports a lost
    /// worker; rewrite failures land in [`RewriteOutcome::html`].
    pub async fn into_text(mut self) -> Result<RewriteOutcome> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.output.recv().await {
            if let Ok(bytes) = chunk {
                buffer.extend_from_slice(&bytes);
            }
        }

        let (collector, result) = self.task.await?;
        let html = result.map(|()| String::from_utf8_lossy(&buffer).into_owned());
        Ok(RewriteOutcome { collector, html })
    }
}

fn run<B, I, O>(origin: &Origin, collector: Collector, chunks: I, sink: O) -> (Collector, Result<()>)
where
    B: AsRef<[u8]>,
    I: IntoIterator<Item = Result<B>>,
    O: OutputSink,
{
    let collector = RefCell::new(collector);
    let result = feed(origin, &collector, chunks, sink);
    (collector.into_inner(), result)
}

fn feed<B, I, O>(origin: &Origin, collector: &RefCell<Collector>, chunks: I, sink: O) -> Result<()>
where
    B: AsRef<[u8]>,
    I: IntoIterator<Item = Result<B>>,
    O: OutputSink,
{
    let script = RefCell::new(String::new());
    let pass = Pass {
        origin,
        collector,
        script: &script,
    };

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("a[href]", move |el| pass.anchor(el)),
                element!("link", move |el| pass.link(el)),
                element!("img", move |el| pass.media(el, ResourceKind::Image)),
                element!("source", move |el| pass.media(el, ResourceKind::Media)),
                element!("script[src]", move |el| pass.script_src(el)),
                element!("form[action]", move |el| pass.plain(el, "action")),
                element!("video", move |el| pass.video(el)),
                element!("audio", move |el| pass.audio(el)),
                element!("meta[name]", move |el| pass.meta(el)),
                element!("div[data-settings]", move |el| pass.plain(el, "data-settings")),
                text!("script:not([src])", move |chunk| pass.inline_script(chunk)),
            ],
            ..Settings::default()
        },
        sink,
    );

    for chunk in chunks {
        let chunk = chunk?;
        rewriter
            .write(chunk.as_ref())
            .map_err(|e| ScanError::Rewrite(e.to_string()))?;
    }
    rewriter
        .end()
        .map_err(|e| ScanError::Rewrite(e.to_string()))
}

/// State shared by the handlers of one rewrite.
#[derive(Clone, Copy)]
struct Pass<'a> {
    origin: &'a Origin,
    collector: &'a RefCell<Collector>,
    script: &'a RefCell<String>,
}

impl Pass<'_> {
    /// Strips the origin from attribute `name`, returning the original value.
    fn rewrite(self, el: &mut Element<'_, '_>, name: &str) -> HandlerResult<Option<String>> {
        let Some(value) = el.get_attribute(name) else {
            return Ok(None);
        };
        el.set_attribute(name, &self.origin.strip(&value))?;
        Ok(Some(value))
    }

    fn capture(self, value: &str, kind: ResourceKind) {
        self.collector
            .borrow_mut()
            .add(&unescape_amp(value), Some(kind));
    }

    fn plain(self, el: &mut Element<'_, '_>, name: &str) -> HandlerResult {
        self.rewrite(el, name)?;
        Ok(())
    }

    fn anchor(self, el: &mut Element<'_, '_>) -> HandlerResult {
        if let Some(href) = self.rewrite(el, "href")? {
            self.collector.borrow_mut().add_page(&unescape_amp(&href));
        }
        Ok(())
    }

    fn link(self, el: &mut Element<'_, '_>) -> HandlerResult {
        let rel = el.get_attribute("rel").unwrap_or_default();
        if REMOVED_LINK_RELS.contains(&rel.trim()) {
            debug!("Removing <link rel=\"{}\">", rel);
            el.remove();
            return Ok(());
        }

        let kind = link_kind(&rel, el.get_attribute("as").as_deref());
        if let Some(href) = self.rewrite(el, "href")?
            && let Some(kind) = kind
        {
            self.capture(&href, kind);
        }
        Ok(())
    }

    /// `img` and `source`: plain and lazy-loading variants of src and srcset.
    fn media(self, el: &mut Element<'_, '_>, kind: ResourceKind) -> HandlerResult {
        for name in ["src", "data-src"] {
            if let Some(value) = self.rewrite(el, name)? {
                self.capture(&value, kind);
            }
        }
        for name in ["srcset", "data-srcset"] {
            if let Some(value) = self.rewrite(el, name)? {
                self.collector
                    .borrow_mut()
                    .add_srcset(&unescape_amp(&value));
            }
        }
        Ok(())
    }

    fn script_src(self, el: &mut Element<'_, '_>) -> HandlerResult {
        if let Some(src) = self.rewrite(el, "src")? {
            self.capture(&src, ResourceKind::Script);
        }
        Ok(())
    }

    fn video(self, el: &mut Element<'_, '_>) -> HandlerResult {
        if let Some(src) = self.rewrite(el, "src")? {
            self.capture(&src, ResourceKind::Media);
        }
        if let Some(poster) = self.rewrite(el, "poster")? {
            self.capture(&poster, ResourceKind::Image);
        }
        Ok(())
    }

    fn audio(self, el: &mut Element<'_, '_>) -> HandlerResult {
        if let Some(src) = self.rewrite(el, "src")? {
            self.capture(&src, ResourceKind::Media);
        }
        Ok(())
    }

    fn meta(self, el: &mut Element<'_, '_>) -> HandlerResult {
        let name = el.get_attribute("name").unwrap_or_default();
        if name.eq_ignore_ascii_case("generator") {
            debug!("Removing <meta name=\"generator\">");
            el.remove();
        } else if name == "msapplication-TileImage"
            && let Some(content) = self.rewrite(el, "content")?
        {
            self.capture(&content, ResourceKind::Image);
        }
        Ok(())
    }

    /// Inline scripts arrive in chunks; hold them back until the whole text
    /// node is known so an origin split across chunks is still found.
    fn inline_script(self, chunk: &mut TextChunk<'_>) -> HandlerResult {
        let mut buffer = self.script.borrow_mut();
        buffer.push_str(chunk.as_str());

        if chunk.last_in_text_node() {
            let rewritten = self.origin.strip(&buffer);
            chunk.replace(&rewritten, ContentType::Html);
            buffer.clear();
        } else {
            chunk.remove();
        }
        Ok(())
    }
}

fn link_kind(rel: &str, as_attr: Option<&str>) -> Option<ResourceKind> {
    let rel = rel.to_ascii_lowercase();
    let has = |token: &str| rel.split_ascii_whitespace().any(|t| t == token);

    if has("stylesheet") {
        Some(ResourceKind::Style)
    } else if rel.contains("icon") {
        Some(ResourceKind::Icon)
    } else if has("modulepreload") {
        Some(ResourceKind::Script)
    } else if has("preload") {
        match as_attr.map(str::to_ascii_lowercase).as_deref() {
            Some("style") => Some(ResourceKind::Style),
            Some("script") => Some(ResourceKind::Script),
            Some("image") => Some(ResourceKind::Image),
            Some("font") => Some(ResourceKind::Font),
            Some("audio") | Some("video") | Some("track") => Some(ResourceKind::Media),
            _ => None,
        }
    } else {
        None
    }
}

fn unescape_amp(value: &str) -> String {
    value.replace("&amp;", "&")
}
