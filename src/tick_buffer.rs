/// file: src/tick_buffer.rs
/// description: Bounded, order-preserving buffer of recent price samples for
/// one symbol. Oldest samples are evicted on overflow.
use crate::protocol::TickSample;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct TickBuffer {
    samples: VecDeque<TickSample>,
    capacity: usize,
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        TickBuffer {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one sample, evicting the oldest when full.
    pub fn push(&mut self, sample: TickSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Replaces the contents with a history backfill. When the backfill is
    /// larger than capacity only the most recent samples are kept.
    pub fn seed<I: IntoIterator<Item = TickSample>>(&mut self, backfill: I) {
        self.samples.clear();
        for sample in backfill {
            self.push(sample);
        }
    }

    /// Owned copy of the current contents, oldest first. Callers never see
    /// the live buffer.
    pub fn snapshot(&self) -> Vec<TickSample> {
        self.samples.iter().copied().collect()
    }

    pub fn last(&self) -> Option<&TickSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: i64) -> TickSample {
        TickSample {
            quote: n as f64,
            epoch: n,
        }
    }

    #[test]
    fn keeps_only_most_recent_when_overflowing() {
        let mut buffer = TickBuffer::new(300);
        for n in 0..450 {
            buffer.push(sample(n));
        }
        assert_eq!(buffer.len(), 300);
        let snap = buffer.snapshot();
        assert_eq!(snap.first().unwrap().epoch, 150);
        assert_eq!(snap.last().unwrap().epoch, 449);
        // arrival order preserved
        for pair in snap.windows(2) {
            assert!(pair[0].epoch < pair[1].epoch);
        }
    }

    #[test]
    fn seed_then_push_appends_at_end() {
        let mut buffer = TickBuffer::new(300);
        buffer.seed((0..50).map(sample));
        assert_eq!(buffer.len(), 50);

        buffer.push(sample(50));
        assert_eq!(buffer.len(), 51);
        assert_eq!(buffer.last().unwrap().epoch, 50);
    }

    #[test]
    fn seed_larger_than_capacity_keeps_tail() {
        let mut buffer = TickBuffer::new(10);
        buffer.seed((0..25).map(sample));
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.snapshot().first().unwrap().epoch, 15);
    }

    #[test]
    fn snapshot_is_detached_from_live_buffer() {
        let mut buffer = TickBuffer::new(10);
        buffer.push(sample(1));
        let snap = buffer.snapshot();
        buffer.push(sample(2));
        assert_eq!(snap.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buffer = TickBuffer::new(10);
        buffer.seed((0..5).map(sample));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
