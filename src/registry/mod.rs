//! Model registry
//!
//! Capacity-bounded mapping from model name to a [`ModelSlot`]. The mapping
//! lock is held only for structural changes (add, remove, lookup, listing);
//! each slot has its own mutex so runs on one model are serialized while
//! different models train concurrently.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::BindDevice;
use crate::config::{HubConfig, DEFAULT_CAPACITY};
use crate::model::{BackboneAdapter, BackboneKind, DeviceKind};
use crate::training::{Checkpoint, MetricLog, TrackingInfo};
use crate::utils::error::{HubError, Result};

/// Lifecycle state of a registered model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Uninitialized,
    Initialized,
    Trained,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Uninitialized => write!(f, "uninitialized"),
            ModelState::Initialized => write!(f, "initialized"),
            ModelState::Trained => write!(f, "trained"),
        }
    }
}

/// A registered model and the results of its last successful run
#[derive(Debug)]
pub struct ModelEntry<B: AutodiffBackend> {
    pub name: String,
    pub adapter: BackboneAdapter<B>,
    pub state: ModelState,
    /// Best validation accuracy of the last successful run
    pub last_record: f64,
    pub metrics: MetricLog,
    pub checkpoint: Option<Checkpoint<B::InnerBackend>>,
    /// Accuracy of the latest evaluation on a labeled folder
    pub test_accuracy: Option<f64>,
    pub tracking: Option<TrackingInfo>,
    pub created_at: DateTime<Utc>,
}

impl<B: AutodiffBackend> ModelEntry<B> {
    pub fn new(name: String, adapter: BackboneAdapter<B>) -> Self {
        Self {
            name,
            adapter,
            state: ModelState::Uninitialized,
            last_record: 0.0,
            metrics: MetricLog::new(),
            checkpoint: None,
            test_accuracy: None,
            tracking: None,
            created_at: Utc::now(),
        }
    }

    /// Bind a new head outside a training run
    ///
    /// Results of earlier runs belong to the old head and are dropped.
    pub fn initialize_head(&mut self, label_set: Vec<String>, freeze_backbone: bool) -> Result<()> {
        self.adapter.initialize_head(label_set, freeze_backbone)?;
        self.state = ModelState::Initialized;
        self.last_record = 0.0;
        self.metrics = MetricLog::new();
        self.checkpoint = None;
        self.test_accuracy = None;
        Ok(())
    }

    pub fn label_set(&self) -> Option<&[String]> {
        self.adapter.label_set()
    }

    /// Label set or `NotInitialized`
    pub fn require_label_set(&self) -> Result<&[String]> {
        self.label_set()
            .ok_or_else(|| HubError::NotInitialized(self.name.clone()))
    }

    pub fn summary(&self, busy: bool) -> ModelSummary {
        let initialized = self.state >= ModelState::Initialized;
        let trained = self.state == ModelState::Trained;

        ModelSummary {
            name: self.name.clone(),
            backbone_kind: self.adapter.kind(),
            device: self.adapter.device_kind(),
            state: self.state,
            busy,
            num_classes: self.label_set().filter(|_| initialized).map(|l| l.len()),
            freeze_backbone: initialized.then(|| self.adapter.is_frozen()),
            parameter_count: initialized.then(|| self.adapter.parameter_count()),
            trainable_parameter_count: initialized
                .then(|| self.adapter.trainable_parameter_count()),
            last_record: trained.then_some(self.last_record),
            test_accuracy: self.test_accuracy,
            tracking: self.tracking.clone(),
            created_at: self.created_at,
        }
    }
}

/// What `list` reports for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub backbone_kind: BackboneKind,
    pub device: DeviceKind,
    pub state: ModelState,
    /// A run or evaluation currently holds the entry
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_backbone: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trainable_parameter_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_record: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingInfo>,
    pub created_at: DateTime<Utc>,
}

/// One registry slot: the entry behind its own lock plus a cached summary
#[derive(Debug)]
pub struct ModelSlot<B: AutodiffBackend> {
    entry: Mutex<ModelEntry<B>>,
    summary: RwLock<ModelSummary>,
}

impl<B: AutodiffBackend> ModelSlot<B> {
    fn new(entry: ModelEntry<B>) -> Self {
        let summary = entry.summary(false);
        Self {
            entry: Mutex::new(entry),
            summary: RwLock::new(summary),
        }
    }

    /// Run `f` with exclusive access to the entry, then refresh the summary
    pub fn with_entry<T>(&self, f: impl FnOnce(&mut ModelEntry<B>) -> T) -> T {
        let mut entry = self.entry.lock();
        let result = f(&mut entry);
        *self.summary.write() = entry.summary(false);
        result
    }

    /// Summary without waiting for a running session
    pub fn summary(&self) -> ModelSummary {
        let mut summary = self.summary.read().clone();
        summary.busy = self.entry.is_locked();
        summary
    }
}

/// Capacity-bounded set of named models
pub struct Registry<B: AutodiffBackend> {
    capacity: usize,
    models: RwLock<BTreeMap<String, Arc<ModelSlot<B>>>>,
}

impl<B: AutodiffBackend> Default for Registry<B> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<B: AutodiffBackend + BindDevice> Registry<B> {
    /// Create a model and register it under `name`
    pub fn add(&self, name: &str, kind: BackboneKind, device: DeviceKind) -> Result<ModelSummary> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::InvalidConfig("model name is empty".to_string()));
        }

        // Cheap rejection before building a backbone
        self.check_insert(&self.models.read(), name)?;

        let adapter = BackboneAdapter::create(kind, device)?;
        let slot = Arc::new(ModelSlot::new(ModelEntry::new(name.to_string(), adapter)));

        let mut models = self.models.write();
        self.check_insert(&models, name)?;
        let summary = slot.summary();
        models.insert(name.to_string(), slot);

        info!(
            "Registered model '{}' ({} on {}), {}/{} slots used",
            name,
            kind,
            device,
            models.len(),
            self.capacity
        );
        Ok(summary)
    }
}

impl<B: AutodiffBackend> Registry<B> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            models: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.capacity)
    }

    fn check_insert(&self, models: &BTreeMap<String, Arc<ModelSlot<B>>>, name: &str) -> Result<()> {
        if models.len() >= self.capacity {
            return Err(HubError::CapacityExceeded(self.capacity));
        }
        if models.contains_key(name) {
            return Err(HubError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Unregister a model; a session holding its slot finishes on its own handle
    pub fn remove(&self, name: &str) -> Result<()> {
        let name = name.trim();
        let removed = self.models.write().remove(name);
        match removed {
            Some(_) => {
                info!("Removed model '{}'", name);
                Ok(())
            }
            None => Err(HubError::NotFound(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelSlot<B>>> {
        let name = name.trim();
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::NotFound(name.to_string()))
    }

    /// Summaries ordered by name
    pub fn list(&self) -> Vec<ModelSummary> {
        let slots: Vec<Arc<ModelSlot<B>>> = self.models.read().values().cloned().collect();
        slots.iter().map(|slot| slot.summary()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.read().contains_key(name.trim())
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
