use serde::{Deserialize, Serialize};

/// Counters reported once a batch capture completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Paths whose rewritten HTML was emitted.
    pub captured: usize,
    /// Paths emitted without HTML.
    pub skipped: usize,
    pub resources: usize,
    pub pages: usize,
}
