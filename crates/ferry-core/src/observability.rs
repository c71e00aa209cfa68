use serde::{Deserialize, Serialize};

/// Aggregate counters of one upload queue.
///
/// `total` counts distinct source URLs. `succeeded + failed <= total`, with
/// equality once every submission has resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub active: usize,
    pub queued: usize,
    pub cached: usize,

    /// Submissions answered from the result cache without a new task.
    #[serde(default)]
    pub cache_hits: usize,
}

impl QueueStats {
    /// Percentage of `total` that succeeded (0.0 when nothing was submitted).
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64 * 100.0
    }

    pub fn resolved(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.resolved() == self.total && self.active == 0 && self.queued == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_handles_empty_queue() {
        assert_eq!(QueueStats::default().success_rate(), 0.0);
        assert!(QueueStats::default().is_complete());
    }

    #[test]
    fn success_rate_is_percentage() {
        let stats = QueueStats {
            total: 4,
            succeeded: 3,
            failed: 1,
            ..QueueStats::default()
        };
        assert_eq!(stats.success_rate(), 75.0);
        assert!(stats.is_complete());

        let running = QueueStats {
            active: 1,
            ..stats
        };
        assert!(!running.is_complete());
    }
}
