// Bounded multi-channel history buffers shared across all generators
//
// The store is the single point of mutual exclusion in the engine: callers
// hold its lock across a read-modify-push sequence for one logical tick so
// that driver reads observe a consistent snapshot.

use crate::types::{Channel, MAX_BUFFER_SIZE};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// The four bounded value channels of one series
#[derive(Debug, Default)]
pub struct SeriesBuffers {
    x: VecDeque<f64>,
    e: VecDeque<f64>,
    d: VecDeque<f64>,
    s: VecDeque<f64>,
}

impl SeriesBuffers {
    fn channel(&self, channel: Channel) -> &VecDeque<f64> {
        match channel {
            Channel::X => &self.x,
            Channel::E => &self.e,
            Channel::D => &self.d,
            Channel::S => &self.s,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut VecDeque<f64> {
        match channel {
            Channel::X => &mut self.x,
            Channel::E => &mut self.e,
            Channel::D => &mut self.d,
            Channel::S => &mut self.s,
        }
    }
}

/// Bounded per-series ring buffers, addressed by series id and channel
#[derive(Debug, Default)]
pub struct HistoryStore {
    series: HashMap<String, SeriesBuffers>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            series: HashMap::new(),
            capacity,
        }
    }

    /// Register a series; entries are created once at setup
    pub fn register(&mut self, id: &str) {
        self.series.entry(id.to_string()).or_default();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.series.contains_key(id)
    }

    /// Append a value, evicting the oldest entry once capacity is reached
    pub fn push(&mut self, id: &str, channel: Channel, value: f64) {
        let capacity = self.capacity;
        let buf = self
            .series
            .entry(id.to_string())
            .or_default()
            .channel_mut(channel);
        if buf.len() >= capacity {
            buf.pop_front();
        }
        buf.push_back(value);
    }

    /// Fill a channel wholesale, bypassing eviction. File-backed sources
    /// load their full sample set once and index into it cyclically.
    pub fn seed(&mut self, id: &str, channel: Channel, values: Vec<f64>) {
        let buf = self
            .series
            .entry(id.to_string())
            .or_default()
            .channel_mut(channel);
        buf.clear();
        buf.extend(values);
    }

    /// Absolute lookup, index 0 = oldest entry
    pub fn at(&self, id: &str, channel: Channel, index: usize) -> Option<f64> {
        self.series.get(id)?.channel(channel).get(index).copied()
    }

    /// Look up a value by lag from the newest entry (lag 0 = latest)
    pub fn get(&self, id: &str, channel: Channel, lag: usize) -> Option<f64> {
        let buf = self.series.get(id)?.channel(channel);
        if lag >= buf.len() {
            return None;
        }
        buf.get(buf.len() - 1 - lag).copied()
    }

    pub fn len(&self, id: &str, channel: Channel) -> usize {
        self.series
            .get(id)
            .map(|b| b.channel(channel).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, id: &str, channel: Channel) -> bool {
        self.len(id, channel) == 0
    }

    /// Snapshot of one channel, oldest first
    pub fn values(&self, id: &str, channel: Channel) -> Vec<f64> {
        self.series
            .get(id)
            .map(|b| b.channel(channel).iter().copied().collect())
            .unwrap_or_default()
    }

    /// The newest `n` values of a channel, oldest first
    pub fn tail(&self, id: &str, channel: Channel, n: usize) -> Vec<f64> {
        self.series
            .get(id)
            .map(|b| {
                let buf = b.channel(channel);
                let skip = buf.len().saturating_sub(n);
                buf.iter().skip(skip).copied().collect()
            })
            .unwrap_or_default()
    }
}

/// The shared handle every generator and sink callback holds
pub type SharedHistory = Arc<Mutex<HistoryStore>>;

pub fn shared() -> SharedHistory {
    Arc::new(Mutex::new(HistoryStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_lagged_get() {
        let mut store = HistoryStore::new();
        store.push("a", Channel::X, 1.0);
        store.push("a", Channel::X, 2.0);
        store.push("a", Channel::X, 3.0);

        assert_eq!(store.get("a", Channel::X, 0), Some(3.0));
        assert_eq!(store.get("a", Channel::X, 2), Some(1.0));
        assert_eq!(store.get("a", Channel::X, 3), None);
    }

    #[test]
    fn test_eviction_bound_holds() {
        let mut store = HistoryStore::with_capacity(4);
        for i in 0..100 {
            store.push("a", Channel::X, i as f64);
            store.push("a", Channel::E, i as f64);
            assert!(store.len("a", Channel::X) <= 4);
            assert!(store.len("a", Channel::E) <= 4);
        }
        // oldest entries evicted first
        assert_eq!(store.get("a", Channel::X, 3), Some(96.0));
        assert_eq!(store.get("a", Channel::X, 0), Some(99.0));
    }

    #[test]
    fn test_unknown_series_yields_none() {
        let store = HistoryStore::new();
        assert_eq!(store.get("ghost", Channel::X, 0), None);
        assert_eq!(store.len("ghost", Channel::E), 0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut store = HistoryStore::new();
        store.push("a", Channel::X, 1.0);
        store.push("a", Channel::D, 2.0);
        assert_eq!(store.get("a", Channel::X, 0), Some(1.0));
        assert_eq!(store.get("a", Channel::D, 0), Some(2.0));
        assert_eq!(store.get("a", Channel::E, 0), None);
    }

    #[test]
    fn test_tail_returns_newest_first_ordered_oldest_to_newest() {
        let mut store = HistoryStore::new();
        for i in 0..5 {
            store.push("a", Channel::D, i as f64);
        }
        assert_eq!(store.tail("a", Channel::D, 2), vec![3.0, 4.0]);
        assert_eq!(store.tail("a", Channel::D, 10).len(), 5);
    }
}
