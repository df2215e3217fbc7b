//! Running weighted averages for loss and accuracy

use serde::{Deserialize, Serialize};

use crate::utils::error::{LesionError, Result};

/// Running weighted average with O(1) updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningMetric {
    name: String,
    current_value: f64,
    running_sum: f64,
    sample_count: f64,
}

impl RunningMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_value: 0.0,
            running_sum: 0.0,
            sample_count: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record `value` with weight `weight`
    pub fn update(&mut self, value: f64, weight: f64) {
        self.current_value = value;
        self.running_sum += value * weight;
        self.sample_count += weight;
    }

    /// Record `value` with weight 1
    pub fn update_one(&mut self, value: f64) {
        self.update(value, 1.0);
    }

    pub fn reset(&mut self) {
        self.current_value = 0.0;
        self.running_sum = 0.0;
        self.sample_count = 0.0;
    }

    /// Last recorded value
    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn count(&self) -> f64 {
        self.sample_count
    }

    /// Weighted mean of everything recorded since the last reset
    pub fn average(&self) -> Result<f64> {
        if self.sample_count == 0.0 {
            return Err(LesionError::EmptyMetric(self.name.clone()));
        }
        Ok(self.running_sum / self.sample_count)
    }
}
