//! Inference module for label prediction and evaluation
//!
//! This module provides:
//! - Batch prediction through a registry entry's bound label set
//! - Prediction over folders of unlabeled images
//! - Accuracy evaluation on labeled image folders

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{evaluate, predict, predict_directory, Evaluation, Prediction};
