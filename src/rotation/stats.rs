//! Statistics for a pass over the policy set.

use std::time::Duration;

use crate::rotation::RollOutcome;

/// Counters from one pass of roll attempts.
#[derive(Debug, Clone, Default)]
pub struct RollStats {
    /// Number of policies a roll was attempted for.
    pub attempted: usize,

    /// Number of rolls that created a partition.
    pub rolled: usize,

    /// Number of attempts that found nothing to do.
    pub skipped: usize,

    /// Number of attempts that failed.
    pub failed: usize,

    /// Errors encountered, prefixed with the policy id.
    pub errors: Vec<String>,

    /// Time taken for the pass.
    pub duration: Duration,
}

impl RollStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&mut self, outcome: &RollOutcome) {
        self.attempted += 1;
        match outcome {
            RollOutcome::Rolled(_) => self.rolled += 1,
            RollOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn record_error(&mut self, error: String) {
        self.attempted += 1;
        self.failed += 1;
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Attempted: {}, Rolled: {}, Skipped: {}, Failed: {}, Duration: {:?}",
            self.attempted, self.rolled, self.skipped, self.failed, self.duration
        )
    }
}
