//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of block windows and retry timestamps.
///
/// # Examples
///
/// ```
/// use brute_throttle::infrastructure::mocks::MockClock;
/// use brute_throttle::application::ports::Clock;
/// use std::time::{Duration, SystemTime};
///
/// let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
/// let clock = MockClock::new(start);
///
/// assert_eq!(clock.now(), start);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
///
/// clock.set(start);
/// assert_eq!(clock.now(), start);
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<SystemTime>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific time.
    pub fn new(start: SystemTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut time = self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time += duration;
    }

    /// Set the clock to a specific time.
    pub fn set(&self, time: SystemTime) {
        *self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock") =
            time;
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        *self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}
