//! Inference Predictor Module
//!
//! Label prediction for batches and unlabeled folders, and accuracy
//! evaluation on labeled folders. All passes run on the detached model.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{
    ClassificationDataset, ImageBatch, ImageBatcher, ImageFolder, ImageSample, UnlabeledFolder,
};
use crate::registry::ModelEntry;
use crate::training::session::count_correct;
use crate::utils::error::{panic_message, HubError, Result};

/// Predicted label for one input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub file: String,
    pub label: String,
    /// Softmax probability of the predicted label
    pub confidence: f32,
}

/// Result of evaluating a model on a labeled folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub correct: usize,
    pub total: usize,
}

/// Run `f`, turning a backend panic into `PredictionFailed`
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| HubError::PredictionFailed(panic_message(payload)))
}

/// Arg-max class and its probability for each row
fn top1<B: Backend>(logits: Tensor<B, 2>) -> (Vec<usize>, Vec<f32>) {
    let [batch_size, _] = logits.dims();
    let probs = softmax(logits, 1);
    let indices = probs.clone().argmax(1).reshape([batch_size]);
    let confidence = probs.max_dim(1).reshape([batch_size]);

    let indices = indices
        .into_data()
        .iter::<i64>()
        .map(|i| i as usize)
        .collect();
    let confidence = confidence.into_data().iter::<f32>().collect();
    (indices, confidence)
}

fn label_of(labels: &[String], index: usize) -> Result<String> {
    labels.get(index).cloned().ok_or_else(|| {
        HubError::PredictionFailed(format!(
            "class index {} outside label set of {}",
            index,
            labels.len()
        ))
    })
}

/// Labels for a batch of shape [n, 3, h, w], in input order
pub fn predict<B: AutodiffBackend>(
    entry: &ModelEntry<B>,
    batch: Tensor<B::InnerBackend, 4>,
) -> Result<Vec<String>> {
    let labels = entry.require_label_set()?;
    let (indices, _) = guarded(|| top1(entry.adapter.infer(batch)))?;
    indices.into_iter().map(|i| label_of(labels, i)).collect()
}

/// Predict every image in `dir`, in file-name order
pub fn predict_directory<B: AutodiffBackend>(
    entry: &ModelEntry<B>,
    dir: &Path,
    image_size: usize,
    batch_size: usize,
) -> Result<Vec<Prediction>> {
    let labels = entry.require_label_set()?;
    let folder = UnlabeledFolder::open(dir, image_size)?;
    let batcher = ImageBatcher::new(image_size);
    let device = entry.adapter.device();

    let mut predictions = Vec::with_capacity(folder.len());
    for batch in folder.batches(batch_size) {
        let (files, images) = batch?;
        let (indices, confidence) = guarded(|| {
            let input = batcher.images::<B::InnerBackend>(&images, device);
            top1(entry.adapter.infer(input))
        })?;

        for ((file, index), confidence) in files.into_iter().zip(indices).zip(confidence) {
            predictions.push(Prediction {
                file,
                label: label_of(labels, index)?,
                confidence,
            });
        }
    }

    info!(
        model = %entry.name,
        "Predicted {} images from {:?}",
        predictions.len(),
        dir
    );
    Ok(predictions)
}

/// Accuracy on a labeled folder; stores the result as the entry's test accuracy
///
/// Class directories are matched by name against the entry's label set.
pub fn evaluate<B: AutodiffBackend>(
    entry: &mut ModelEntry<B>,
    dir: &Path,
    image_size: usize,
    batch_size: usize,
) -> Result<Evaluation> {
    let labels = entry.require_label_set()?.to_vec();
    let folder = ImageFolder::open(dir)?;

    let mut mapping = Vec::with_capacity(folder.num_classes());
    for class in &folder.classes {
        let index = labels.iter().position(|l| l == class).ok_or_else(|| {
            HubError::PredictionFailed(format!("class '{}' is not in the model's label set", class))
        })?;
        mapping.push(index);
    }
    let samples = folder
        .samples
        .iter()
        .map(|s| ImageSample {
            path: s.path.clone(),
            label: mapping[s.label],
        })
        .collect();

    let dataset = ClassificationDataset::new(samples, image_size);
    let batcher = ImageBatcher::new(image_size);
    let device = entry.adapter.device().clone();

    let mut correct = 0;
    let mut total = 0;
    for items in dataset.batches(batch_size) {
        let items = items?;
        total += items.len();
        correct += guarded(|| {
            let batch: ImageBatch<B::InnerBackend> = batcher.batch(items, &device);
            count_correct(entry.adapter.infer(batch.images), batch.targets)
        })?;
    }

    let accuracy = if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    };
    entry.test_accuracy = Some(accuracy);

    info!(
        model = %entry.name,
        "Test accuracy {:.3} ({}/{})",
        accuracy,
        correct,
        total
    );
    Ok(Evaluation {
        accuracy,
        correct,
        total,
    })
}
