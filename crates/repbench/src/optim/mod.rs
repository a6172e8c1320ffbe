//! # Optimizers and LR Schedules

pub mod lars;
pub mod scheduler;

pub use lars::{Lars, LarsConfig, LarsState};
pub use scheduler::{WarmupCosineScheduler, WarmupCosineSchedulerConfig};

/// Square-root batch-size learning-rate scaling.
///
/// Improves small-batch short-schedule training relative to linear
/// scaling; see Appendix B.1 of the SimCLR paper.
pub fn sqrt_scaled_lr(
    base: f64,
    batch_size: usize,
) -> f64 {
    base * (batch_size as f64).sqrt()
}
