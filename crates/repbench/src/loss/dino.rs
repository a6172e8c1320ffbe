//! # DINO Self-Distillation Loss
//!
//! Cross-entropy between sharpened teacher assignments (over global
//! views) and student predictions (over every view), with a momentum
//! center keeping the teacher from collapsing.

use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{log_softmax, softmax};

/// DINO loss.
#[derive(Debug, Clone)]
pub struct DinoLoss {
    /// Student softmax temperature.
    pub student_temp: f64,

    /// Teacher temperature at the end of warmup.
    pub teacher_temp: f64,

    /// Teacher temperature at the start of training.
    pub warmup_teacher_temp: f64,

    /// Epochs of linear teacher-temperature warmup.
    pub warmup_epochs: usize,

    /// Momentum of the teacher-output center.
    pub center_momentum: f64,
}

impl Default for DinoLoss {
    fn default() -> Self {
        Self {
            student_temp: 0.1,
            teacher_temp: 0.07,
            warmup_teacher_temp: 0.04,
            warmup_epochs: 30,
            center_momentum: 0.9,
        }
    }
}

impl DinoLoss {
    /// Teacher temperature for the given epoch (linear warmup).
    pub fn teacher_temp_at(
        &self,
        epoch: usize,
    ) -> f64 {
        if epoch >= self.warmup_epochs {
            self.teacher_temp
        } else {
            let t = epoch as f64 / self.warmup_epochs as f64;
            self.warmup_teacher_temp + (self.teacher_temp - self.warmup_teacher_temp) * t
        }
    }

    /// Momentum update of the center from a batch of teacher outputs.
    ///
    /// # Arguments
    ///
    /// - `center`: ``[1, dim]`` running center.
    /// - `teacher_out`: concatenated ``[views * batch, dim]`` teacher
    ///   outputs of the step.
    pub fn update_center<B: Backend>(
        &self,
        center: Tensor<B, 2>,
        teacher_out: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let batch_center = teacher_out.detach().mean_dim(0);
        center.mul_scalar(self.center_momentum)
            + batch_center.mul_scalar(1.0 - self.center_momentum)
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// - `teacher_out`: per-global-view ``[batch, dim]`` teacher logits.
    /// - `student_out`: per-view ``[batch, dim]`` student logits; the
    ///   first `teacher_out.len()` entries are the same global views.
    /// - `center`: ``[1, dim]`` teacher center.
    /// - `epoch`: current epoch, for temperature warmup.
    pub fn forward<B: Backend>(
        &self,
        teacher_out: &[Tensor<B, 2>],
        student_out: &[Tensor<B, 2>],
        center: Tensor<B, 2>,
        epoch: usize,
    ) -> Tensor<B, 1> {
        assert!(!teacher_out.is_empty(), "teacher views must be non-empty");
        assert!(
            student_out.len() >= teacher_out.len(),
            "student must cover at least the teacher views"
        );

        let teacher_temp = self.teacher_temp_at(epoch);
        let device = center.device();

        let mut total = Tensor::<B, 1>::zeros([1], &device);
        let mut terms = 0usize;

        for (t_idx, t_out) in teacher_out.iter().enumerate() {
            let t_probs = softmax(
                (t_out.clone() - center.clone()).div_scalar(teacher_temp),
                1,
            )
            .detach();

            for (s_idx, s_out) in student_out.iter().enumerate() {
                // A view does not distill into itself.
                if s_idx == t_idx {
                    continue;
                }
                let s_logprobs = log_softmax(s_out.clone().div_scalar(self.student_temp), 1);
                let ce = (t_probs.clone() * s_logprobs).sum_dim(1).mean().neg();
                total = total + ce;
                terms += 1;
            }
        }

        total.div_scalar(terms as f64)
    }
}
