//! Network-adjusted time.
//!
//! *Network-adjusted time* is the local clock nudged by the median offset
//! reported by connected peers in their `version` handshake. We keep only
//! offsets, not absolute times, so the tracker is the local time plus the
//! current median offset.
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::net::LocalTime;

/// Never adjusted more than this far from the system clock.
pub const MAX_TIME_ADJUSTMENT: TimeOffset = 70 * 60;

/// Minimum number of samples before the offset is ever adjusted.
pub const MIN_TIME_SAMPLES: usize = 5;

/// Maximum number of samples retained.
pub const MAX_TIME_SAMPLES: usize = 200;

pub type TimeOffset = i64;

pub trait Clock: Clone {
    fn local_time(&self) -> LocalTime;
}

pub trait AdjustedClock<K>: Clock {
    fn record_offset(&mut self, source: K, sample: TimeOffset);
    fn set(&mut self, local_time: LocalTime);
}

impl<K: Eq + Clone + Hash> AdjustedClock<K> for AdjustedTime<K> {
    fn record_offset(&mut self, source: K, sample: TimeOffset) {
        AdjustedTime::record_offset(self, source, sample)
    }

    fn set(&mut self, local_time: LocalTime) {
        AdjustedTime::set_local_time(self, local_time)
    }
}

/// Clock with interior mutability, so it can be shared between the reactor
/// thread and whatever owns the `StateMachine`.
#[derive(Debug, Clone)]
pub struct RefClock<T: Clock> {
    inner: Arc<Mutex<T>>,
}

impl<T: Clock> std::ops::Deref for RefClock<T> {
    type Target = Arc<Mutex<T>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<K: Eq + Clone + Hash> AdjustedClock<K> for RefClock<AdjustedTime<K>> {
    fn record_offset(&mut self, source: K, sample: TimeOffset) {
        self.inner.lock().unwrap().record_offset(source, sample);
    }

    fn set(&mut self, local_time: LocalTime) {
        self.inner.lock().unwrap().set_local_time(local_time);
    }
}

impl<T: Clock> From<T> for RefClock<T> {
    fn from(other: T) -> Self {
        Self { inner: Arc::new(Mutex::new(other)) }
    }
}

impl<T: Clock> Clock for RefClock<T> {
    fn local_time(&self) -> LocalTime {
        self.inner.lock().unwrap().local_time()
    }
}

impl Clock for LocalTime {
    fn local_time(&self) -> LocalTime {
        *self
    }
}

/// Network-adjusted time tracker: local time plus the median peer offset.
#[derive(Debug, Clone)]
pub struct AdjustedTime<K> {
    /// Sources already sampled, so a peer can't submit more than one offset.
    sources: HashSet<K>,
    samples: Vec<TimeOffset>,
    offset: TimeOffset,
    local_time: LocalTime,
}

impl<K: Eq + Clone + Hash> Clock for AdjustedTime<K> {
    fn local_time(&self) -> LocalTime {
        self.local_time()
    }
}

impl<K: Hash + Eq> Default for AdjustedTime<K> {
    fn default() -> Self {
        Self::new(LocalTime::default())
    }
}

impl<K: Hash + Eq> AdjustedTime<K> {
    /// Starts with a single sample of zero.
    pub fn new(local_time: LocalTime) -> Self {
        let offset = 0;
        let mut samples = Vec::with_capacity(MAX_TIME_SAMPLES);
        samples.push(offset);
        let sources = HashSet::with_capacity(MAX_TIME_SAMPLES);

        Self { sources, samples, offset, local_time }
    }

    pub fn record_offset(&mut self, source: K, sample: TimeOffset) {
        // Matches Bitcoin Core: the sample count caps at MAX_TIME_SAMPLES + 1
        // because of the initial zero sample, and since that cap is even,
        // the offset never gets a last chance to adjust on the final sample.
        // We reproduce that quirk rather than fix it, since peers relying on
        // network time expect this exact behavior.
        if self.sources.len() == MAX_TIME_SAMPLES {
            return;
        }
        if !self.sources.insert(source) {
            return;
        }
        self.samples.push(sample);

        let mut offsets = self.samples.clone();
        let count = offsets.len();
        offsets.sort_unstable();

        if count < MIN_TIME_SAMPLES {
            return;
        }

        if count % 2 == 1 {
            let median_offset: TimeOffset = offsets[count / 2];
            if median_offset.abs() <= MAX_TIME_ADJUSTMENT {
                self.offset = median_offset;
            } else {
                self.offset = 0;
            }
            tracing::debug!(target: "net", "time offset adjusted to {}s", self.offset);
        }
    }

    pub fn set_local_time(&mut self, time: LocalTime) {
        self.local_time = time;
    }

    pub fn local_time(&self) -> LocalTime {
        self.local_time
    }
}
