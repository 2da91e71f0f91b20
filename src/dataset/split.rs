//! Train/validation split
//!
//! Each class is shuffled with a seeded RNG and `floor(fraction * count)` of
//! its images go to validation, so both phases see every class and the same
//! seed always produces the same split.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use super::burn_dataset::ClassificationDataset;
use super::loader::{ImageFolder, ImageSample};
use crate::utils::error::{HubError, Result};

/// Settings for splitting a labeled folder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConfig {
    /// Share of each class held out for validation, in [0, 1)
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.1,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(validation_fraction: f64, seed: u64) -> Self {
        Self {
            validation_fraction,
            seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(HubError::InvalidConfig(format!(
                "validation fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

/// Label set plus the two restartable phase datasets
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub label_set: Vec<String>,
    pub train: ClassificationDataset,
    pub valid: ClassificationDataset,
}

impl DatasetSplit {
    /// Load `root` as an image folder and split it
    pub fn from_folder<P: AsRef<Path>>(
        root: P,
        config: &SplitConfig,
        image_size: usize,
    ) -> Result<Self> {
        config.validate()?;
        let folder = ImageFolder::open(root)?;
        let (train, valid) = split_samples(&folder.samples, folder.num_classes(), config);

        info!(
            "Split {} images into {} train / {} validation",
            folder.len(),
            train.len(),
            valid.len()
        );

        Ok(Self {
            label_set: folder.classes,
            train: ClassificationDataset::new(train, image_size),
            valid: ClassificationDataset::new(valid, image_size),
        })
    }
}

/// Split samples per class; both halves keep the input order
pub fn split_samples(
    samples: &[ImageSample],
    num_classes: usize,
    config: &SplitConfig,
) -> (Vec<ImageSample>, Vec<ImageSample>) {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut held_out = vec![false; samples.len()];

    for label in 0..num_classes {
        let mut indices: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.label == label)
            .map(|(i, _)| i)
            .collect();
        let n_valid = (indices.len() as f64 * config.validation_fraction).floor() as usize;

        indices.shuffle(&mut rng);
        for &i in indices.iter().take(n_valid) {
            held_out[i] = true;
        }
    }

    let mut train = Vec::new();
    let mut valid = Vec::new();
    for (sample, is_valid) in samples.iter().zip(held_out) {
        if is_valid {
            valid.push(sample.clone());
        } else {
            train.push(sample.clone());
        }
    }
    (train, valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn samples(per_class: &[usize]) -> Vec<ImageSample> {
        per_class
            .iter()
            .enumerate()
            .flat_map(|(label, &n)| {
                (0..n).map(move |i| ImageSample {
                    path: PathBuf::from(format!("{}/{:03}.png", label, i)),
                    label,
                })
            })
            .collect()
    }

    #[test]
    fn test_split_is_per_class_floor() {
        let all = samples(&[20, 15]);
        let (train, valid) = split_samples(&all, 2, &SplitConfig::new(0.1, 7));

        assert_eq!(valid.iter().filter(|s| s.label == 0).count(), 2);
        assert_eq!(valid.iter().filter(|s| s.label == 1).count(), 1);
        assert_eq!(train.len() + valid.len(), all.len());
    }

    #[test]
    fn test_split_is_reproducible() {
        let all = samples(&[30, 30]);
        let config = SplitConfig::new(0.2, 42);
        let (_, first) = split_samples(&all, 2, &config);
        let (_, second) = split_samples(&all, 2, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_fraction_keeps_everything_for_training() {
        let all = samples(&[5, 5]);
        let (train, valid) = split_samples(&all, 2, &SplitConfig::new(0.0, 1));
        assert!(valid.is_empty());
        assert_eq!(train, all);
    }

    #[test]
    fn test_fraction_out_of_range() {
        assert!(SplitConfig::new(1.0, 0).validate().is_err());
        assert!(SplitConfig::new(-0.1, 0).validate().is_err());
        assert!(SplitConfig::new(0.5, 0).validate().is_ok());
    }
}
