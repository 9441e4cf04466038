//! In-process counter store.
//!
//! Provides a concurrent, sharded counter store backed by DashMap. All
//! namespaces created by one `MemoryStoreFactory` share a single map and are
//! separated by their key prefix.
//!
//! Expired entries are replaced when their key is written again. On top of
//! that, the first write after every `SWEEP_INTERVAL` drops all expired
//! entries in the shared map, so keys that never come back do not pile up.

use crate::application::ports::{
    Clock, ConsumeError, CounterState, CounterStore, StoreError, StoreFactory,
};
use crate::domain::policy::CounterOptions;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const SWEEP_INTERVAL_MS: u64 = 60_000;

/// Minimum time between two sweeps of the shared map.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(SWEEP_INTERVAL_MS);

/// One counter entry.
#[derive(Debug, Clone, Copy)]
struct Slot {
    points: u32,
    /// `None` for windows that never expire
    expires_at: Option<SystemTime>,
}

impl Slot {
    fn open(now: SystemTime, duration_secs: u64) -> Self {
        let expires_at = match duration_secs {
            0 => None,
            secs => Some(now + Duration::from_secs(secs)),
        };
        Self {
            points: 0,
            expires_at,
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn state(&self, now: SystemTime) -> CounterState {
        let ms_before_next = self
            .expires_at
            .and_then(|at| at.duration_since(now).ok())
            .map_or(0, |left| u64::try_from(left.as_millis()).unwrap_or(u64::MAX));
        CounterState::new(self.points, ms_before_next)
    }
}

type SharedSlots = Arc<DashMap<String, Slot>>;

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

/// Schedules sweeps of one shared map.
#[derive(Debug, Default)]
struct Sweeper {
    /// Epoch milliseconds before which no sweep runs
    next_at_ms: AtomicU64,
}

impl Sweeper {
    /// Claim the sweep due at `now`. Only one caller per interval wins.
    fn claim(&self, now: SystemTime) -> bool {
        let now_ms = epoch_millis(now);
        let due = self.next_at_ms.load(Ordering::Acquire);
        if now_ms < due {
            return false;
        }
        let next = now_ms.saturating_add(SWEEP_INTERVAL_MS);
        self.next_at_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Counter namespace held in process memory.
///
/// `consume` and `penalty` run under the DashMap entry lock for the key, so
/// concurrent callers on the same key are serialized.
#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    slots: SharedSlots,
    sweeper: Arc<Sweeper>,
    options: CounterOptions,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create a standalone namespace with its own map.
    pub fn new(options: CounterOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            sweeper: Arc::new(Sweeper::default()),
            options,
            clock,
        }
    }

    /// Add `points` to the entry for `key`, opening a fresh window if the
    /// entry is missing or expired.
    fn add(&self, key: &str, points: u32, duration_secs: u64) -> CounterState {
        let now = self.clock.now();
        if self.sweeper.claim(now) {
            self.retain_live(now);
        }

        let mut slot = match self.slots.entry(self.options.prefixed(key)) {
            Entry::Occupied(occupied) => {
                let mut slot = occupied.into_ref();
                if slot.is_expired(now) {
                    *slot = Slot::open(now, duration_secs);
                }
                slot
            }
            Entry::Vacant(vacant) => vacant.insert(Slot::open(now, duration_secs)),
        };
        slot.points = slot.points.saturating_add(points);
        slot.state(now)
    }

    /// Number of entries across all namespaces sharing this map, expired
    /// ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the shared map is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired entry in the shared map.
    ///
    /// Writes already do this at most once per `SWEEP_INTERVAL`.
    pub fn purge_expired(&self) -> usize {
        self.retain_live(self.clock.now())
    }

    fn retain_live(&self, now: SystemTime) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn consume(&self, key: &str) -> Result<CounterState, ConsumeError> {
        let state = self.add(key, 1, self.options.duration_secs);
        if state.consumed_points > self.options.points {
            return Err(ConsumeError::Exhausted(state));
        }
        Ok(state)
    }

    async fn penalty(
        &self,
        key: &str,
        points: u32,
        custom_duration_secs: Option<u64>,
    ) -> Result<CounterState, StoreError> {
        let duration = custom_duration_secs.unwrap_or(self.options.duration_secs);
        Ok(self.add(key, points, duration))
    }

    async fn get(&self, key: &str) -> Result<Option<CounterState>, StoreError> {
        let now = self.clock.now();
        let key = self.options.prefixed(key);

        self.slots.remove_if(&key, |_, slot| slot.is_expired(now));
        Ok(self.slots.get(&key).map(|slot| slot.state(now)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(&self.options.prefixed(key));
        Ok(())
    }

    fn options(&self) -> &CounterOptions {
        &self.options
    }
}

/// Creates in-memory namespaces over one shared map.
#[derive(Debug, Clone)]
pub struct MemoryStoreFactory {
    slots: SharedSlots,
    sweeper: Arc<Sweeper>,
    clock: Arc<dyn Clock>,
}

impl MemoryStoreFactory {
    /// Create a factory reading expiry from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            sweeper: Arc::new(Sweeper::default()),
            clock,
        }
    }

    /// Create a namespace as a concrete store, e.g. to call `purge_expired`.
    pub fn create_memory(&self, options: CounterOptions) -> MemoryCounterStore {
        MemoryCounterStore {
            slots: Arc::clone(&self.slots),
            sweeper: Arc::clone(&self.sweeper),
            options,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn create(&self, options: CounterOptions) -> Arc<dyn CounterStore> {
        Arc::new(self.create_memory(options))
    }
}
