//! Training history collector
//!
//! The trainer appends its periodic running averages here; the run writes
//! the result to `history.json` and renders `history.svg` at the end.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::charts::{write_line_chart, DataSeries, COLOR_PRIMARY, COLOR_SECONDARY};
use crate::utils::error::Result;

/// Running train loss / accuracy sampled every logging interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricHistory {
    pub train_loss: Vec<f64>,
    pub train_accuracy: Vec<f64>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, loss: f64, accuracy: f64) {
        self.train_loss.push(loss);
        self.train_accuracy.push(accuracy);
    }

    pub fn len(&self) -> usize {
        self.train_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train_loss.is_empty()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Render loss and accuracy curves as SVG
    pub fn save_chart(&self, path: &Path) -> Result<()> {
        let series = [
            DataSeries::new("train loss", self.train_loss.clone(), COLOR_PRIMARY),
            DataSeries::new("train acc", self.train_accuracy.clone(), COLOR_SECONDARY),
        ];
        write_line_chart("Training History", "logging step", &series, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = MetricHistory::new();
        history.record(1.8, 0.31);
        history.record(1.2, 0.55);
        assert_eq!(history.len(), 2);

        let json = dir.path().join("history.json");
        history.save_json(&json).unwrap();
        let saved: MetricHistory = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(saved, history);

        let svg = dir.path().join("history.svg");
        history.save_chart(&svg).unwrap();
        assert!(fs::read_to_string(&svg).unwrap().contains("train loss"));
    }
}
