//! # Batchers
//!
//! Decode items into device tensors: [`MultiViewBatcher`] renders a
//! method's augmented views, [`EvalBatcher`] the deterministic
//! evaluation view.

use crate::data::folder::{ImageItem, load_rgb};
use crate::transforms::{EvalTransform, MultiViewTransform};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::{Backend, Int, Tensor};
use std::marker::PhantomData;

/// A batch of augmented views.
///
/// `views[v]` stacks view `v` of every decodable sample, so each entry
/// is a ``[batch, 3, size_v, size_v]`` tensor; sizes may differ across
/// views (multi-crop).
#[derive(Debug, Clone)]
pub struct MultiViewBatch<B: Backend> {
    /// Per-view image stacks.
    pub views: Vec<Tensor<B, 4>>,

    /// Class targets, ``[batch]``.
    pub targets: Tensor<B, 1, Int>,
}

/// A batch of evaluation images.
#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// Images, ``[batch, 3, crop, crop]``.
    pub images: Tensor<B, 4>,

    /// Class targets, ``[batch]``.
    pub targets: Tensor<B, 1, Int>,
}

/// Renders a method's augmented views.
#[derive(Debug, Clone)]
pub struct MultiViewBatcher<B: Backend> {
    transform: MultiViewTransform,
    _backend: PhantomData<B>,
}

impl<B: Backend> MultiViewBatcher<B> {
    /// Create a batcher for the given view pipeline.
    pub fn new(transform: MultiViewTransform) -> Self {
        Self {
            transform,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, MultiViewBatch<B>> for MultiViewBatcher<B> {
    fn batch(
        &self,
        items: Vec<ImageItem>,
        device: &B::Device,
    ) -> MultiViewBatch<B> {
        let mut rng = rand::rng();

        let mut per_view: Vec<Vec<Tensor<B, 3>>> =
            (0..self.transform.num_views()).map(|_| Vec::new()).collect();
        let mut labels: Vec<i32> = Vec::with_capacity(items.len());

        for item in items {
            match load_rgb(&item.path) {
                Ok(img) => {
                    for (v, data) in self.transform.apply(&img, &mut rng).into_iter().enumerate()
                    {
                        per_view[v].push(Tensor::from_data(data, device));
                    }
                    labels.push(item.label as i32);
                }
                Err(err) => tracing::warn!("skipping sample: {err:#}"),
            }
        }
        assert!(!labels.is_empty(), "no decodable images in batch");

        MultiViewBatch {
            views: per_view
                .into_iter()
                .map(|tensors| Tensor::stack(tensors, 0))
                .collect(),
            targets: Tensor::from_ints(labels.as_slice(), device),
        }
    }
}

/// Renders the deterministic evaluation view.
#[derive(Debug, Clone)]
pub struct EvalBatcher<B: Backend> {
    transform: EvalTransform,
    _backend: PhantomData<B>,
}

impl<B: Backend> EvalBatcher<B> {
    /// Create a batcher for the given evaluation transform.
    pub fn new(transform: EvalTransform) -> Self {
        Self {
            transform,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ClassificationBatch<B>> for EvalBatcher<B> {
    fn batch(
        &self,
        items: Vec<ImageItem>,
        device: &B::Device,
    ) -> ClassificationBatch<B> {
        let mut images: Vec<Tensor<B, 3>> = Vec::with_capacity(items.len());
        let mut labels: Vec<i32> = Vec::with_capacity(items.len());

        for item in items {
            match load_rgb(&item.path) {
                Ok(img) => {
                    images.push(Tensor::from_data(self.transform.apply(&img), device));
                    labels.push(item.label as i32);
                }
                Err(err) => tracing::warn!("skipping sample: {err:#}"),
            }
        }
        assert!(!images.is_empty(), "no decodable images in batch");

        ClassificationBatch {
            images: Tensor::stack(images, 0),
            targets: Tensor::from_ints(labels.as_slice(), device),
        }
    }
}
