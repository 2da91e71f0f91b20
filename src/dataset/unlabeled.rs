//! Unlabeled inputs for predict-only use

use std::path::{Path, PathBuf};

use super::loader::{list_images, load_image_chw};
use crate::utils::error::Result;

/// Image files of one directory, in file-name order
#[derive(Debug, Clone)]
pub struct UnlabeledFolder {
    files: Vec<PathBuf>,
    image_size: usize,
}

impl UnlabeledFolder {
    pub fn open<P: AsRef<Path>>(dir: P, image_size: usize) -> Result<Self> {
        let files = list_images(dir.as_ref())?;
        tracing::debug!("Found {} unlabeled images in {:?}", files.len(), dir.as_ref());
        Ok(Self { files, image_size })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Decoded CHW buffers, `batch_size` at a time, paired with file names
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = Result<(Vec<String>, Vec<Vec<f32>>)>> + '_ {
        self.files.chunks(batch_size.max(1)).map(move |chunk| {
            let mut names = Vec::with_capacity(chunk.len());
            let mut images = Vec::with_capacity(chunk.len());
            for path in chunk {
                images.push(load_image_chw(path, self.image_size)?);
                names.push(file_name(path));
            }
            Ok((names, images))
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
