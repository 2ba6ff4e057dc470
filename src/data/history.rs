//! Bounded in-memory history for live display.

use super::sample::Sample;
use crate::error::{MonitorError, MonitorResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Fixed-capacity FIFO window of the most recent samples.
///
/// One writer (the polling task) and any number of readers. Readers get a
/// snapshot of `Arc`s taken under the lock, so they never see a sample that
/// is half written and never hold the lock while they render.
#[derive(Debug)]
pub struct HistoryCache {
    capacity: usize,
    samples: Mutex<VecDeque<Arc<Sample>>>,
}

impl HistoryCache {
    /// # Errors
    ///
    /// [`MonitorError::Configuration`] for a zero capacity.
    pub fn new(capacity: usize) -> MonitorResult<Self> {
        if capacity == 0 {
            return Err(MonitorError::Configuration(
                "history capacity must be at least 1".into(),
            ));
        }
        Ok(Self {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    /// Add `sample` at the tail, evicting from the head past capacity.
    pub fn append(&self, sample: impl Into<Arc<Sample>>) {
        let mut samples = self.samples.lock();
        samples.push_back(sample.into());
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Consistent snapshot, oldest first.
    pub fn get_all(&self) -> Vec<Arc<Sample>> {
        self.samples.lock().iter().cloned().collect()
    }

    /// Newest sample.
    pub fn latest(&self) -> Option<Arc<Sample>> {
        self.samples.lock().back().cloned()
    }

    /// Current number of samples.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Whether nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Maximum number of samples kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{FieldValue, SampleSchema};

    fn sample(n: i64) -> Sample {
        Sample::now(SampleSchema::new(["N"]), vec![FieldValue::Int(n)]).unwrap()
    }

    fn value(sample: &Sample) -> i64 {
        match sample.values()[0] {
            FieldValue::Int(n) => n,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let cache = HistoryCache::new(3).unwrap();
        for n in 1..=5 {
            cache.append(sample(n));
        }
        let values: Vec<i64> = cache.get_all().iter().map(|s| value(s)).collect();
        assert_eq!(values, vec![3, 4, 5]);
        assert_eq!(cache.len(), 3);
        assert_eq!(value(&cache.latest().unwrap()), 5);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            HistoryCache::new(0),
            Err(MonitorError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_cache() {
        let cache = HistoryCache::new(2).unwrap();
        assert!(cache.is_empty());
        assert!(cache.latest().is_none());
        assert!(cache.get_all().is_empty());
    }

    #[test]
    fn test_snapshots_consistent_under_concurrent_append() {
        let cache = Arc::new(HistoryCache::new(50).unwrap());
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for n in 0..5_000 {
                    cache.append(sample(n));
                }
            })
        };

        for _ in 0..500 {
            let snapshot = cache.get_all();
            assert!(snapshot.len() <= 50);
            let values: Vec<i64> = snapshot.iter().map(|s| value(s)).collect();
            assert!(values.windows(2).all(|w| w[1] == w[0] + 1));
        }

        writer.join().unwrap();
        let values: Vec<i64> = cache.get_all().iter().map(|s| value(s)).collect();
        assert_eq!(values, (4_950..5_000).collect::<Vec<_>>());
    }
}
