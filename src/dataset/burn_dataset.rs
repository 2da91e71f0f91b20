//! Burn Dataset integration
//!
//! Implements Burn's `Dataset` and `Batcher` traits over lists of image paths.
//! Images are decoded lazily, one batch at a time.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;

use super::loader::{load_image_chw, ImageSample};
use crate::utils::error::Result;

/// A decoded image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Flattened CHW pixels in [0, 1]
    pub image: Vec<f32>,
    /// Class index
    pub label: usize,
    pub path: PathBuf,
}

impl ImageItem {
    pub fn load(sample: &ImageSample, image_size: usize) -> Result<Self> {
        Ok(Self {
            image: load_image_chw(&sample.path, image_size)?,
            label: sample.label,
            path: sample.path.clone(),
        })
    }
}

/// Labeled samples decoded on demand
#[derive(Debug, Clone)]
pub struct ClassificationDataset {
    samples: Vec<ImageSample>,
    image_size: usize,
}

impl ClassificationDataset {
    pub fn new(samples: Vec<ImageSample>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
        }
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Decoded items in order, `batch_size` at a time
    ///
    /// Decode failures are yielded instead of skipped so a bad file aborts the
    /// caller rather than silently shrinking the phase.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = Result<Vec<ImageItem>>> + '_ {
        self.samples.chunks(batch_size.max(1)).map(move |chunk| {
            chunk
                .iter()
                .map(|sample| ImageItem::load(sample, self.image_size))
                .collect()
        })
    }
}

impl Dataset<ImageItem> for ClassificationDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let sample = self.samples.get(index)?;
        match ImageItem::load(sample, self.image_size) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!("Skipping {}: {}", sample.path.display(), err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images with their targets
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks decoded items into tensors
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    /// Stack raw CHW buffers into a [n, 3, size, size] tensor
    pub fn images<B: Backend>(&self, images: &[Vec<f32>], device: &B::Device) -> Tensor<B, 4> {
        let data: Vec<f32> = images.iter().flatten().copied().collect();
        Tensor::<B, 4>::from_floats(
            TensorData::new(data, [images.len(), 3, self.image_size, self.image_size]),
            device,
        )
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();

        let targets: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [batch_size]), device);

        let buffers: Vec<Vec<f32>> = items.into_iter().map(|item| item.image).collect();
        let images = self.images(&buffers, device);

        ImageBatch { images, targets }
    }
}
