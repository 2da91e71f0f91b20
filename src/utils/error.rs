//! Error Handling Module
//!
//! Defines the error taxonomy shared by the registry, the sessions and the HTTP layer.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Main error type for backbone hub operations
#[derive(Error, Debug)]
pub enum HubError {
    /// A model with this name is already registered
    #[error("Model with name '{0}' already exists")]
    DuplicateName(String),

    /// No model registered under this name
    #[error("Model with name '{0}' does not exist")]
    NotFound(String),

    /// The registry is full
    #[error("The max number of models ({0}) has been reached; remove one before adding another")]
    CapacityExceeded(usize),

    /// Backbone name not in the supported set
    #[error("Unsupported backbone kind: {0}")]
    UnsupportedBackboneKind(String),

    /// Optimizer name not in the supported set
    #[error("Unsupported optimizer kind: {0}")]
    UnsupportedOptimizerKind(String),

    /// The requested device cannot be bound by the compiled backend
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The model has no label set bound yet
    #[error("Model '{0}' has not been initialized with a label set")]
    NotInitialized(String),

    /// Invalid hyperparameters or configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error while reading a dataset from disk
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// A training run failed; the entry keeps its pre-run state
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// Prediction or evaluation failed
    #[error("Prediction failed: {0}")]
    PredictionFailed(String),

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for backbone hub operations
pub type Result<T> = std::result::Result<T, HubError>;

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::InvalidConfig(err.to_string())
    }
}

impl From<image::ImageError> for HubError {
    fn from(err: image::ImageError) -> Self {
        HubError::Dataset(err.to_string())
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Wrap the error as a dataset error with a message prefix
    fn dataset_context(self, msg: &str) -> Result<T>;

    /// Wrap the error as a dataset error, building the prefix lazily
    fn with_dataset_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn dataset_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| HubError::Dataset(format!("{}: {}", msg, e)))
    }

    fn with_dataset_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| HubError::Dataset(format!("{}: {}", f(), e)))
    }
}

impl HubError {
    /// Stable machine-readable kind, used by the HTTP layer and in logs
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::DuplicateName(_) => "duplicate_name",
            HubError::NotFound(_) => "not_found",
            HubError::CapacityExceeded(_) => "capacity_exceeded",
            HubError::UnsupportedBackboneKind(_) => "unsupported_backbone_kind",
            HubError::UnsupportedOptimizerKind(_) => "unsupported_optimizer_kind",
            HubError::DeviceUnavailable(_) => "device_unavailable",
            HubError::NotInitialized(_) => "not_initialized",
            HubError::InvalidConfig(_) => "invalid_config",
            HubError::Dataset(_) => "dataset",
            HubError::TrainingFailed(_) => "training_failed",
            HubError::PredictionFailed(_) => "prediction_failed",
            HubError::Checkpoint(_) => "checkpoint",
            HubError::Io(_) => "io",
        }
    }
}

/// Render a caught panic payload as a diagnostic string
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "numeric backend panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HubError::NotFound("resnet".to_string());
        assert_eq!(format!("{}", err), "Model with name 'resnet' does not exist");
    }

    #[test]
    fn test_training_failed_keeps_cause() {
        let err = HubError::TrainingFailed("shape mismatch".to_string());
        assert!(err.to_string().contains("shape mismatch"));
        assert_eq!(err.kind(), "training_failed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HubError = io_err.into();
        assert!(matches!(err, HubError::Io(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.dataset_context("Failed to read folder").unwrap_err();
        assert!(matches!(err, HubError::Dataset(ref msg) if msg.starts_with("Failed to read folder")));
    }

    #[test]
    fn test_panic_message_downcast() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "numeric backend panicked");
    }
}
