//! # Self-Supervised Objectives
//!
//! Loss terms are plain structs over ``burn`` tensors; each method
//! module owns one and calls it from its training step.

pub mod barlow;
pub mod dcl;
pub mod dino;
pub mod negative_cosine;
pub mod ntxent;
pub mod swav;
pub mod vicreg;

use burn::prelude::{Backend, Tensor};

/// Mask value for excluded similarity terms.
///
/// Finite so the fill survives half-precision backends; exp() of the
/// scaled value still underflows to zero.
pub(crate) const MASK_VALUE: f64 = -1.0e9;

/// L2-normalize rows of a ``[batch, dim]`` tensor.
pub fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x
        .clone()
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .clamp_min(1e-12);
    x / norm
}

/// Row-wise log-sum-exp of a ``[batch, m]`` tensor.
///
/// # Returns
///
/// A ``[batch, 1]`` tensor.
pub fn logsumexp<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let max = x.clone().max_dim(1);
    (x - max.clone()).exp().sum_dim(1).log() + max
}

/// An ``[n, n]`` identity matrix.
pub fn identity<B: Backend>(
    n: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; n * n];
    for i in 0..n {
        values[i * n + i] = 1.0;
    }
    Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([n, n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;

    #[test]
    fn test_l2_normalize() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([3.0, 4.0, 0.0, 2.0], &device)
            .reshape([2, 2]);

        let normed = l2_normalize(x);
        let data = normed.into_data().to_vec::<f32>().unwrap();
        assert!((data[0] - 0.6).abs() < 1e-6);
        assert!((data[1] - 0.8).abs() < 1e-6);
        assert!((data[2] - 0.0).abs() < 1e-6);
        assert!((data[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_logsumexp_matches_naive() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, -1.0, 0.0, 1.0], &device)
            .reshape([2, 3]);

        let lse = logsumexp(x.clone()).into_data().to_vec::<f32>().unwrap();
        let naive: Vec<f32> = x
            .exp()
            .sum_dim(1)
            .log()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        for (a, b) in lse.iter().zip(naive.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_identity() {
        let device = Default::default();
        let eye = identity::<TestBackend>(3, &device);
        let data = eye.into_data().to_vec::<f32>().unwrap();
        assert_eq!(
            data,
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        );
    }
}
