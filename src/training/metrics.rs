//! Per-phase training metrics
//!
//! `PhaseStats` accumulates batch statistics while a phase runs; `MetricLog`
//! is the append-only record of finished phases for one run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two phases of an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Valid,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Valid => write!(f, "valid"),
        }
    }
}

/// Loss and accuracy of one finished phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub phase: Phase,
    pub epoch: usize,
    pub loss: f64,
    /// In [0, 1]
    pub accuracy: f64,
}

/// Running sums for one phase
#[derive(Debug, Clone, Default)]
pub struct PhaseStats {
    weighted_loss: f64,
    correct: usize,
    total: usize,
}

impl PhaseStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch: its mean loss, correct predictions and size
    pub fn add_batch(&mut self, mean_loss: f64, correct: usize, batch_len: usize) {
        self.weighted_loss += mean_loss * batch_len as f64;
        self.correct += correct;
        self.total += batch_len;
    }

    pub fn count(&self) -> usize {
        self.total
    }

    /// Mean loss over the phase, 0 when no sample was seen
    pub fn loss(&self) -> f64 {
        if self.total > 0 {
            self.weighted_loss / self.total as f64
        } else {
            0.0
        }
    }

    /// Fraction correct, 0 when no sample was seen
    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn finish(&self, phase: Phase, epoch: usize) -> MetricRecord {
        MetricRecord {
            phase,
            epoch,
            loss: self.loss(),
            accuracy: self.accuracy(),
        }
    }
}

/// Ordered metric records of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricLog {
    records: Vec<MetricRecord>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MetricRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Records of one phase in epoch order
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &MetricRecord> + '_ {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_stats_weights_by_batch_size() {
        let mut stats = PhaseStats::new();
        stats.add_batch(1.0, 3, 4);
        stats.add_batch(4.0, 1, 2);

        assert_eq!(stats.count(), 6);
        assert!((stats.loss() - 2.0).abs() < 1e-9);
        assert!((stats.accuracy() - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_phase_records_zero() {
        let record = PhaseStats::new().finish(Phase::Valid, 2);
        assert_eq!(record.loss, 0.0);
        assert_eq!(record.accuracy, 0.0);
        assert_eq!(record.epoch, 2);
    }

    #[test]
    fn test_log_filters_by_phase() {
        let mut log = MetricLog::new();
        for epoch in 0..2 {
            log.push(PhaseStats::new().finish(Phase::Train, epoch));
            log.push(PhaseStats::new().finish(Phase::Valid, epoch));
        }

        let epochs: Vec<usize> = log.phase(Phase::Valid).map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![0, 1]);

        let json = serde_json::to_string(&log).unwrap();
        assert!(json.starts_with("[{\"phase\":\"train\""));
    }
}
