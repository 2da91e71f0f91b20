//! Service Configuration Module
//!
//! Runtime settings shared by the registry, the dataset providers and the
//! sessions. Stored as JSON and overridable from the server command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{HubError, Result};

/// Default number of models the registry may hold at once
pub const DEFAULT_CAPACITY: usize = 10;

/// Default square input size fed to the backbones
pub const DEFAULT_IMAGE_SIZE: usize = 224;

/// Default batch size for predict-only inputs
pub const DEFAULT_PREDICT_BATCH_SIZE: usize = 4;

/// Settings for a hub instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Maximum number of registered models
    pub capacity: usize,

    /// Images are resized to `image_size x image_size`
    pub image_size: usize,

    /// Batch size used when predicting unlabeled folders
    pub predict_batch_size: usize,

    /// Seed for the train/validation split shuffle
    pub split_seed: u64,

    /// Where best checkpoints are written on request
    pub models_dir: PathBuf,

    /// Root for experiment-tracker output when tracking is enabled
    pub tracker_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            image_size: DEFAULT_IMAGE_SIZE,
            predict_batch_size: DEFAULT_PREDICT_BATCH_SIZE,
            split_seed: 42,
            models_dir: PathBuf::from("output/models"),
            tracker_dir: PathBuf::from("output/runs"),
        }
    }
}

impl HubConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(HubError::InvalidConfig(
                "capacity must be greater than 0".to_string(),
            ));
        }

        // ResNet stem and four stages downsample by 32 in total
        if self.image_size < 32 {
            return Err(HubError::InvalidConfig(
                "image_size must be at least 32".to_string(),
            ));
        }

        if self.predict_batch_size == 0 {
            return Err(HubError::InvalidConfig(
                "predict_batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
