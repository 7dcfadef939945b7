//! Pause backoff schedule.

use std::time::Duration;

/// Ordered pause durations, one per consecutive pause cycle.
///
/// The n-th consecutive pause (1-indexed) waits `delays[n - 1]` before the
/// queue resumes on its own. Running past the end of the schedule means the
/// store is persistently unhealthy and the queue gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Delay for the `index`-th consecutive pause.
    ///
    /// # Returns
    /// `None` when `index` is 0 or beyond the schedule (exhausted).
    ///
    /// Example with the default 5s, 15s, 30s, 60s, 120s:
    /// - pause 1: 5s
    /// - pause 3: 30s
    /// - pause 6: exhausted
    pub fn delay_for(&self, index: usize) -> Option<Duration> {
        index
            .checked_sub(1)
            .and_then(|i| self.delays.get(i))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_secs(&[5, 15, 30, 60, 120])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_is_ascending() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.len(), 5);

        let delays: Vec<_> = (1..=5).map(|i| schedule.delay_for(i).unwrap()).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(delays[0], Duration::from_secs(5));
        assert_eq!(delays[4], Duration::from_secs(120));
    }

    #[test]
    fn out_of_range_indexes_are_exhausted() {
        let schedule = BackoffSchedule::from_secs(&[1, 2]);
        assert_eq!(schedule.delay_for(0), None);
        assert_eq!(schedule.delay_for(2), Some(Duration::from_secs(2)));
        assert_eq!(schedule.delay_for(3), None);
    }
}
