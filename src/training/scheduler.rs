//! Learning Rate Scheduler Module
//!
//! Step decay counted in optimizer steps: the rate is multiplied by `gamma`
//! every `step_size` completed training batches.

use serde::{Deserialize, Serialize};

/// Batches between two decays
pub const DEFAULT_STEP_SIZE: usize = 50;

/// Multiplicative decay factor
pub const DEFAULT_GAMMA: f64 = 0.1;

/// Step-decay learning rate schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLr {
    initial_lr: f64,
    step_size: usize,
    gamma: f64,
    steps: usize,
}

impl StepLr {
    pub fn new(initial_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            initial_lr,
            step_size: step_size.max(1),
            gamma,
            steps: 0,
        }
    }

    /// Decay by 0.1 every 50 batches
    pub fn with_defaults(initial_lr: f64) -> Self {
        Self::new(initial_lr, DEFAULT_STEP_SIZE, DEFAULT_GAMMA)
    }

    /// Rate in effect for the next optimizer step
    pub fn current_lr(&self) -> f64 {
        let decays = (self.steps / self.step_size) as i32;
        self.initial_lr * self.gamma.powi(decays)
    }

    /// Record one completed training batch
    pub fn step(&mut self) {
        self.steps += 1;
    }

    /// Number of batches recorded so far
    pub fn steps(&self) -> usize {
        self.steps
    }
}
