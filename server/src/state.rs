//! Application state for the backbone hub server
//!
//! Owns the model registry, the hub configuration and the experiment
//! tracking switch. Handlers receive it as [`SharedState`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use backbone_hub::{HubConfig, Registry, TrainingBackend};
use parking_lot::RwLock;

/// Shared application state
pub struct AppState {
    pub registry: Registry<TrainingBackend>,
    pub config: HubConfig,
    /// Root directory for tracker output once tracking is enabled
    tracker_root: RwLock<Option<PathBuf>>,
    started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Registry::from_config(&config),
            config,
            tracker_root: RwLock::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn enable_tracking(&self, root: PathBuf) {
        *self.tracker_root.write() = Some(root);
    }

    pub fn tracker_root(&self) -> Option<PathBuf> {
        self.tracker_root.read().clone()
    }
}
