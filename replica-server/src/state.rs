//! Application state for the gateway.

use std::sync::Arc;

use replica_core::{MirrorConfig, Tracker};
use replica_scanner::{Crawler, ScanError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Origins and default batch paths.
    pub config: Arc<MirrorConfig>,
    /// Client for batch captures (follows redirects).
    pub crawler: Crawler,
    /// Client for relayed traffic (redirects returned to the caller).
    pub passthrough: Crawler,
    /// Resources seen in relayed traffic.
    pub tracker: Tracker,
}

impl AppState {
    pub fn new(config: MirrorConfig) -> Result<Self, ScanError> {
        Self::with_tracker(config, Tracker::new())
    }

    /// Creates state around an existing tracker, so callers can inspect it.
    pub fn with_tracker(config: MirrorConfig, tracker: Tracker) -> Result<Self, ScanError> {
        Ok(Self {
            config: Arc::new(config),
            crawler: Crawler::new()?,
            passthrough: Crawler::passthrough(30)?,
            tracker,
        })
    }
}
