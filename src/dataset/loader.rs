//! Image folder loader
//!
//! Reads labeled datasets laid out as `root/<class>/<image>` and flat folders
//! of unlabeled images, and decodes files into CHW float buffers.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::ImageReader;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{HubError, Result, ResultExt};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// A labeled image on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Index into the folder's class list
    pub label: usize,
}

/// Labeled dataset where each sub-directory is one class
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root: PathBuf,
    /// Class names, sorted
    pub classes: Vec<String>,
    /// Samples grouped by class, each group sorted by file name
    pub samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Scan `root` for class directories and their images
    ///
    /// ```text
    /// root/
    /// ├── cat/
    /// │   ├── 001.png
    /// │   └── 002.png
    /// └── dog/
    ///     └── ...
    /// ```
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Loading image folder from: {:?}", root);

        if !root.is_dir() {
            return Err(HubError::Dataset(format!(
                "dataset directory does not exist: {}",
                root.display()
            )));
        }

        let mut classes = Vec::new();
        for entry in std::fs::read_dir(&root)
            .with_dataset_context(|| format!("Failed to read {}", root.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(HubError::Dataset(format!(
                "no class directories found in {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let files = list_images(&root.join(class_name))?;
            debug!("Class '{}' (label {}): {} images", class_name, label, files.len());
            samples.extend(files.into_iter().map(|path| ImageSample { path, label }));
        }

        info!(
            "Found {} classes and {} images",
            classes.len(),
            samples.len()
        );

        Ok(Self {
            root,
            classes,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Image files directly inside `dir`, sorted by file name
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(HubError::Dataset(format!(
            "directory does not exist: {}",
            dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| is_image(path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(files)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Decode an image, resize it to `image_size` square and return RGB values
/// in [0, 1] laid out as [3, image_size, image_size]
pub fn load_image_chw(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let img = ImageReader::open(path)
        .with_dataset_context(|| format!("Failed to open image {}", path.display()))?
        .with_guessed_format()
        .with_dataset_context(|| format!("Failed to read image {}", path.display()))?
        .decode()
        .with_dataset_context(|| format!("Failed to decode image {}", path.display()))?
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
        .to_rgb8();

    let plane = image_size * image_size;
    let mut chw = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * image_size + x as usize;
        for channel in 0..3 {
            chw[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    Ok(chw)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Write `count` solid-colour PNGs per class under `root`
    pub(crate) fn write_folder(root: &Path, classes: &[(&str, [u8; 3])], count: usize) {
        for (name, colour) in classes {
            let dir = root.join(name);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let img = RgbImage::from_pixel(8, 8, Rgb(*colour));
                img.save(dir.join(format!("{:03}.png", i))).unwrap();
            }
        }
    }

    #[test]
    fn test_open_sorts_classes_and_files() {
        let dir = tempfile::tempdir().unwrap();
        write_folder(dir.path(), &[("dog", [0, 0, 255]), ("cat", [255, 0, 0])], 3);
        std::fs::write(dir.path().join("cat").join("notes.txt"), "x").unwrap();

        let folder = ImageFolder::open(dir.path()).unwrap();
        assert_eq!(folder.classes, vec!["cat", "dog"]);
        assert_eq!(folder.len(), 6);
        assert_eq!(folder.samples[0].label, 0);
        assert!(folder.samples[0].path.ends_with("cat/000.png"));
        assert!(folder.samples[5].path.ends_with("dog/002.png"));
    }

    #[test]
    fn test_missing_root_is_dataset_error() {
        let err = ImageFolder::open("/definitely/not/here").unwrap_err();
        assert!(matches!(err, HubError::Dataset(_)));
    }

    #[test]
    fn test_load_image_chw_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        RgbImage::from_pixel(4, 4, Rgb([255, 0, 51])).save(&path).unwrap();

        let chw = load_image_chw(&path, 2).unwrap();
        assert_eq!(chw.len(), 3 * 2 * 2);
        assert!(chw[..4].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(chw[4..8].iter().all(|v| *v == 0.0));
        assert!(chw[8..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }
}
