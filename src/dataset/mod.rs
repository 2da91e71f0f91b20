//! Dataset module for image-folder data handling
//!
//! This module provides functionality for:
//! - Loading labeled image folders (`root/<class>/<image>`) from disk
//! - Seeded per-class train/validation splits
//! - Burn `Dataset`/`Batcher` integration
//! - Unlabeled folders for predict-only use

pub mod burn_dataset;
pub mod loader;
pub mod split;
pub mod unlabeled;

// Re-export main types for convenience
pub use burn_dataset::{ClassificationDataset, ImageBatch, ImageBatcher, ImageItem};
pub use loader::{list_images, load_image_chw, ImageFolder, ImageSample, IMAGE_EXTENSIONS};
pub use split::{split_samples, DatasetSplit, SplitConfig};
pub use unlabeled::UnlabeledFolder;
