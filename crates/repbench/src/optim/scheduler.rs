//! # Warmup + Cosine Learning-Rate Schedule
//!
//! Linear warmup to a peak, then cosine decay to a final value; the
//! per-step schedule every pretraining recipe here uses.

use burn::LearningRate;
use burn::config::Config;
use burn::lr_scheduler::LrScheduler;
use burn::prelude::Backend;
use std::f64::consts::PI;

/// [`WarmupCosineScheduler`] Config.
#[derive(Config, Debug)]
pub struct WarmupCosineSchedulerConfig {
    /// Peak learning rate, reached at the end of warmup.
    pub peak_lr: f64,

    /// Total scheduled steps.
    pub total_steps: usize,

    /// Fraction of `total_steps` spent in linear warmup.
    #[config(default = 0.1)]
    pub warmup_fraction: f64,

    /// Final learning rate at the end of the schedule.
    #[config(default = 0.0)]
    pub final_lr: f64,
}

impl WarmupCosineSchedulerConfig {
    /// Initialize a [`WarmupCosineScheduler`].
    ///
    /// # Panics
    ///
    /// If `total_steps` is zero or the warmup fraction is outside
    /// ``[0, 1]``.
    pub fn init(&self) -> WarmupCosineScheduler {
        assert!(self.total_steps > 0, "total_steps must be positive");
        assert!(
            (0.0..=1.0).contains(&self.warmup_fraction),
            "warmup_fraction must be within [0, 1]"
        );

        WarmupCosineScheduler {
            peak_lr: self.peak_lr,
            final_lr: self.final_lr,
            warmup_steps: (self.total_steps as f64 * self.warmup_fraction).round() as usize,
            total_steps: self.total_steps,
            current_step: 0,
        }
    }
}

/// Linear warmup followed by cosine decay.
#[derive(Debug, Clone)]
pub struct WarmupCosineScheduler {
    peak_lr: f64,
    final_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    current_step: usize,
}

impl WarmupCosineScheduler {
    /// The learning rate at a given step.
    pub fn lr_at(
        &self,
        step: usize,
    ) -> f64 {
        if step < self.warmup_steps {
            return self.peak_lr * (step + 1) as f64 / self.warmup_steps as f64;
        }
        if step >= self.total_steps {
            return self.final_lr;
        }

        let progress =
            (step - self.warmup_steps) as f64 / (self.total_steps - self.warmup_steps) as f64;
        let cosine = 0.5 * (1.0 + (PI * progress).cos());
        self.final_lr + (self.peak_lr - self.final_lr) * cosine
    }
}

impl LrScheduler for WarmupCosineScheduler {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let lr = self.lr_at(self.current_step);
        self.current_step += 1;
        lr
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.current_step
    }

    fn load_record<B: Backend>(
        mut self,
        record: Self::Record<B>,
    ) -> Self {
        self.current_step = record;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;

    #[test]
    fn test_warmup_ramps_linearly() {
        let sched = WarmupCosineSchedulerConfig::new(1.0, 100)
            .with_warmup_fraction(0.1)
            .init();

        assert!((sched.lr_at(0) - 0.1).abs() < 1e-9);
        assert!((sched.lr_at(4) - 0.5).abs() < 1e-9);
        assert!((sched.lr_at(9) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_decays_to_final() {
        let sched = WarmupCosineSchedulerConfig::new(2.0, 100)
            .with_warmup_fraction(0.1)
            .with_final_lr(0.2)
            .init();

        // Peak right after warmup, final value at the end.
        assert!((sched.lr_at(10) - 2.0).abs() < 1e-9);
        assert!(sched.lr_at(50) < 2.0);
        assert!(sched.lr_at(50) > 0.2);
        assert!((sched.lr_at(100) - 0.2).abs() < 1e-9);
        assert!((sched.lr_at(5000) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_step_is_monotone_after_warmup() {
        let mut sched = WarmupCosineSchedulerConfig::new(1.0, 50)
            .with_warmup_fraction(0.2)
            .init();

        let mut last = f64::MAX;
        let mut rising_done = false;
        for i in 0..50 {
            let lr = LrScheduler::step(&mut sched);
            if i >= 10 {
                assert_that!(lr <= last, is(true));
                rising_done = true;
            }
            last = lr;
        }
        assert!(rising_done);
    }

    #[test]
    fn test_record_round_trip() {
        let mut sched = WarmupCosineSchedulerConfig::new(1.0, 10).init();
        LrScheduler::step(&mut sched);
        LrScheduler::step(&mut sched);

        let record = LrScheduler::to_record::<crate::testing::TestBackend>(&sched);
        assert_eq!(record, 2);

        let fresh = WarmupCosineSchedulerConfig::new(1.0, 10).init();
        let restored = fresh.load_record::<crate::testing::TestBackend>(record);
        assert!((restored.lr_at(record) - sched.lr_at(2)).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "total_steps must be positive")]
    fn test_zero_steps_rejected() {
        WarmupCosineSchedulerConfig::new(1.0, 0).init();
    }
}
