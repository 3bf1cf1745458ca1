pub mod collector;
pub mod crawler;
pub mod document;
pub mod error;
pub mod origin;
pub mod result;
pub mod rewriter;

pub use collector::{CapturedResource, Collector, ResourceKind};
pub use crawler::{CaptureJob, Crawler};
pub use document::{CaptureDocument, CaptureWriter, HtmlEntry, ResourceRef};
pub use error::ScanError;
pub use origin::Origin;
pub use result::CaptureSummary;
pub use rewriter::{RewriteEngine, RewriteOutcome, RewriteStream};
