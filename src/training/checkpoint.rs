//! Best-model checkpoints
//!
//! A checkpoint is a detached copy of the weights taken when validation
//! accuracy improves. It lives in memory on the registry entry and can be
//! written to disk on request (weights through Burn's `CompactRecorder` plus a
//! JSON metadata sidecar).

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{BackboneKind, Classifier};
use crate::utils::error::{HubError, Result};

/// Snapshot of the best weights of a run
#[derive(Debug, Clone)]
pub struct Checkpoint<B: Backend> {
    /// Epoch whose validation produced this snapshot
    pub epoch: usize,
    /// Validation accuracy at that epoch
    pub accuracy: f64,
    pub model: Classifier<B>,
    pub label_set: Vec<String>,
    pub backbone_kind: BackboneKind,
    pub created_at: DateTime<Utc>,
}

/// Everything but the weights, stored next to them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub accuracy: f64,
    pub label_set: Vec<String>,
    pub backbone_kind: BackboneKind,
    pub num_params: usize,
    pub created_at: DateTime<Utc>,
}

impl<B: Backend> Checkpoint<B> {
    pub fn new(
        epoch: usize,
        accuracy: f64,
        model: Classifier<B>,
        label_set: Vec<String>,
        backbone_kind: BackboneKind,
    ) -> Self {
        Self {
            epoch,
            accuracy,
            model,
            label_set,
            backbone_kind,
            created_at: Utc::now(),
        }
    }

    pub fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            epoch: self.epoch,
            accuracy: self.accuracy,
            label_set: self.label_set.clone(),
            backbone_kind: self.backbone_kind,
            num_params: self.model.num_params(),
            created_at: self.created_at,
        }
    }

    /// Write `<dir>/<name>.mpk` and `<dir>/<name>.json`; returns the weights path
    pub fn save(&self, dir: &Path, name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let base = dir.join(file_stem(name));

        self.model
            .clone()
            .save_file(&base, &CompactRecorder::new())
            .map_err(|e| HubError::Checkpoint(format!("failed to save weights: {:?}", e)))?;

        let json = serde_json::to_string_pretty(&self.metadata())?;
        std::fs::write(base.with_extension("json"), json)?;

        let weights = base.with_extension("mpk");
        info!("Checkpoint saved to {:?}", weights);
        Ok(weights)
    }

    /// Rebuild a checkpoint written by [`Checkpoint::save`]
    pub fn load(dir: &Path, name: &str, device: &B::Device) -> Result<Self> {
        let base = dir.join(file_stem(name));
        let metadata = load_metadata(&base.with_extension("json"))?;

        let model = Classifier::<B>::new(&metadata.backbone_kind.config(), device)
            .with_head(metadata.label_set.len(), device)
            .load_file(&base, &CompactRecorder::new(), device)
            .map_err(|e| HubError::Checkpoint(format!("failed to load weights: {:?}", e)))?;

        Ok(Self {
            epoch: metadata.epoch,
            accuracy: metadata.accuracy,
            model,
            label_set: metadata.label_set,
            backbone_kind: metadata.backbone_kind,
            created_at: metadata.created_at,
        })
    }
}

/// Model names may contain dots, which the recorder would treat as an extension
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub fn load_metadata(path: &Path) -> Result<CheckpointMetadata> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| HubError::Checkpoint(format!("failed to read {:?}: {}", path, e)))?;
    serde_json::from_str(&json)
        .map_err(|e| HubError::Checkpoint(format!("invalid metadata {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_save_and_load_round_trip() {
        let device = Default::default();
        let model = Classifier::<TestBackend>::new(&BackboneKind::Resnet18.config(), &device)
            .with_head(2, &device);
        let labels = vec!["cat".to_string(), "dog".to_string()];
        let checkpoint = Checkpoint::new(1, 0.75, model, labels.clone(), BackboneKind::Resnet18);

        let dir = tempfile::tempdir().unwrap();
        let weights = checkpoint.save(dir.path(), "pets").unwrap();
        assert!(weights.exists());
        assert!(dir.path().join("pets.json").exists());

        let loaded = Checkpoint::<TestBackend>::load(dir.path(), "pets", &device).unwrap();
        assert_eq!(loaded.label_set, labels);
        assert_eq!(loaded.epoch, 1);
        assert_eq!(loaded.model.num_classes(), 2);
        assert_eq!(loaded.metadata().num_params, checkpoint.metadata().num_params);
    }

    #[test]
    fn test_missing_metadata_is_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_metadata(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, HubError::Checkpoint(_)));
    }
}
