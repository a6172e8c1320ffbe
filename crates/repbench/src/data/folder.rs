//! # Image-Folder Dataset
//!
//! A class-per-subdirectory image dataset: each immediate subdirectory
//! of the root is one class, holding that class's image files. Items
//! carry only paths; decoding happens in the batcher.

use anyhow::{Context, bail};
use burn::data::dataset::Dataset;
use image::RgbImage;
use std::path::{Path, PathBuf};

const IMAGE_PATTERNS: &[&str] = &["*.{jpg,jpeg,png,bmp,gif,webp}"];

/// One dataset item: an image path and its class index.
#[derive(Debug, Clone)]
pub struct ImageItem {
    /// Path to the image file.
    pub path: PathBuf,

    /// Class index in the folder's sorted class list.
    pub label: usize,
}

/// A class-per-subdirectory image dataset.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    items: Vec<ImageItem>,
    classes: Vec<String>,
}

impl ImageFolder {
    /// Scan a dataset root.
    ///
    /// Class names are the sorted subdirectory names, so indices are
    /// stable between the train and val splits of the same dataset.
    pub fn scan<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref();

        let mut classes: Vec<String> = std::fs::read_dir(root)
            .with_context(|| format!("reading dataset root {}", root.display()))?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if entry.file_type().ok()?.is_dir() {
                    Some(entry.file_name().to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        classes.sort();

        if classes.is_empty() {
            bail!("no class directories under {}", root.display());
        }

        let mut items = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let class_dir = root.join(class);
            let mut files: Vec<PathBuf> =
                globwalk::GlobWalkerBuilder::from_patterns(&class_dir, IMAGE_PATTERNS)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("scanning {}", class_dir.display()))?
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry.into_path()),
                        Err(err) => {
                            tracing::warn!("skipping unreadable entry: {err}");
                            None
                        }
                    })
                    .collect();
            files.sort();

            items.extend(files.into_iter().map(|path| ImageItem { path, label }));
        }

        if items.is_empty() {
            bail!("no images under {}", root.display());
        }

        Ok(Self { items, classes })
    }

    /// The sorted class names.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of classes.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

impl Dataset<ImageItem> for ImageFolder {
    fn get(
        &self,
        index: usize,
    ) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Decode an image file to RGB.
pub fn load_rgb<P: AsRef<Path>>(path: P) -> anyhow::Result<RgbImage> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    Ok(img.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    pub fn write_class_dir(
        root: &Path,
        class: &str,
        count: usize,
    ) {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            let img = RgbImage::from_pixel(40, 40, Rgb([(i * 40) as u8, 64, 128]));
            img.save(dir.join(format!("img_{i}.png"))).unwrap();
        }
    }

    #[test]
    fn test_scan_sorted_classes() {
        let tmp = tempfile::tempdir().unwrap();
        write_class_dir(tmp.path(), "zebra", 2);
        write_class_dir(tmp.path(), "ant", 3);

        let dataset = ImageFolder::scan(tmp.path()).unwrap();
        assert_eq!(dataset.classes(), &["ant".to_string(), "zebra".to_string()]);
        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(dataset.len(), 5);

        // ant items come first and carry label 0.
        let first = dataset.get(0).unwrap();
        assert_eq!(first.label, 0);
        let last = dataset.get(4).unwrap();
        assert_eq!(last.label, 1);
    }

    #[test]
    fn test_scan_rejects_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ImageFolder::scan(tmp.path()).is_err());
    }

    #[test]
    fn test_load_rgb_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("px.png");
        RgbImage::from_pixel(3, 2, Rgb([1, 2, 3])).save(&path).unwrap();

        let img = load_rgb(&path).unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3]);
    }

    #[test]
    fn test_load_rgb_missing_file() {
        assert!(load_rgb("/definitely/not/here.png").is_err());
    }
}
