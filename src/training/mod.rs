//! Training module
//!
//! This module provides:
//! - `TrainingConfig` and the closed set of optimizer kinds
//! - The training session (train/validate epochs, best checkpoint, metric log)
//! - Step-decay learning rate scheduling
//! - Optional experiment tracking and checkpoint persistence

pub mod checkpoint;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod tracker;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{HubError, Result};

// Re-export main types for convenience
pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use metrics::{MetricLog, MetricRecord, Phase, PhaseStats};
pub use scheduler::StepLr;
pub use session::{TrainingReport, TrainingSession};
pub use tracker::{ExperimentTracker, JsonLinesTracker, TrackerRecord, TrackingInfo};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 3;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// Default share of each class held out for validation
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.1;

/// Supported optimizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    #[serde(rename = "SGD")]
    Sgd,
    #[serde(rename = "RMSprop")]
    RmsProp,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "Adam"),
            OptimizerKind::AdamW => write!(f, "AdamW"),
            OptimizerKind::Sgd => write!(f, "SGD"),
            OptimizerKind::RmsProp => write!(f, "RMSprop"),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = HubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            _ => Err(HubError::UnsupportedOptimizerKind(s.to_string())),
        }
    }
}

/// Hyperparameters of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    /// Train the head only
    pub freeze_backbone: bool,
    pub batch_size: usize,
    pub epochs: usize,
    /// Share of each class held out for validation, in [0, 1)
    pub validation_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            learning_rate: DEFAULT_LEARNING_RATE,
            freeze_backbone: false,
            batch_size: DEFAULT_BATCH_SIZE,
            epochs: DEFAULT_EPOCHS,
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
        }
    }
}

impl TrainingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(HubError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        if self.batch_size == 0 {
            return Err(HubError::InvalidConfig(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.epochs == 0 {
            return Err(HubError::InvalidConfig(
                "epochs must be greater than 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(HubError::InvalidConfig(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_parsing() {
        assert_eq!("Adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert_eq!("adamw".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdamW);
        assert_eq!("SGD".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        assert_eq!("RMSprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);

        let err = "Adagrad".parse::<OptimizerKind>().unwrap_err();
        assert!(matches!(err, HubError::UnsupportedOptimizerKind(_)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.epochs, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad = [
            TrainingConfig {
                learning_rate: 0.0,
                ..Default::default()
            },
            TrainingConfig {
                batch_size: 0,
                ..Default::default()
            },
            TrainingConfig {
                epochs: 0,
                ..Default::default()
            },
            TrainingConfig {
                validation_fraction: 1.0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(HubError::InvalidConfig(_))));
        }
    }
}
