//! # Backbone Hub
//!
//! A registry for image-classification backbones (ResNet-18/34/50) built on the
//! Burn framework: register named models, train them on image folders,
//! evaluate them and predict labels for unlabeled images.
//!
//! ## Modules
//!
//! - `registry`: capacity-bounded set of named models with per-model locking
//! - `model`: ResNet backbones and the adapter that binds a label set to a head
//! - `training`: training sessions, LR scheduling, checkpoints and experiment tracking
//! - `inference`: prediction and evaluation
//! - `dataset`: image-folder loading, splits and Burn batching
//! - `utils`: logging and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use backbone_hub::prelude::*;
//!
//! let registry = Registry::<TrainingBackend>::new(10);
//! registry.add("pets", BackboneKind::Resnet18, DeviceKind::Cpu)?;
//!
//! let split = DatasetSplit::from_folder("data/pets", &SplitConfig::default(), 224)?;
//! let report = registry
//!     .get("pets")?
//!     .with_entry(|entry| TrainingSession::new(TrainingConfig::default()).run(entry, &split))?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod registry;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use backend::{backend_name, BindDevice, DefaultBackend, TrainingBackend};
pub use config::HubConfig;
pub use dataset::{DatasetSplit, SplitConfig};
pub use model::{BackboneAdapter, BackboneKind, DeviceKind, Mode};
pub use registry::{ModelEntry, ModelSlot, ModelState, ModelSummary, Registry};
pub use training::{OptimizerKind, TrainingConfig, TrainingReport, TrainingSession};
pub use utils::error::{HubError, Result};

/// Everything needed to drive the registry from an application
pub mod prelude {
    pub use crate::backend::{BindDevice, TrainingBackend};
    pub use crate::config::HubConfig;
    pub use crate::dataset::{DatasetSplit, SplitConfig};
    pub use crate::inference::{evaluate, predict, predict_directory, Evaluation, Prediction};
    pub use crate::model::{BackboneKind, DeviceKind};
    pub use crate::registry::{ModelState, ModelSummary, Registry};
    pub use crate::training::{
        Checkpoint, JsonLinesTracker, OptimizerKind, TrainingConfig, TrainingReport,
        TrainingSession,
    };
    pub use crate::utils::error::{HubError, Result};
}
