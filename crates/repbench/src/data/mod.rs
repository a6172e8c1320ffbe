//! # Datasets and Batchers

pub mod batcher;
pub mod folder;

pub use batcher::{ClassificationBatch, EvalBatcher, MultiViewBatch, MultiViewBatcher};
pub use folder::{ImageFolder, ImageItem, load_rgb};
