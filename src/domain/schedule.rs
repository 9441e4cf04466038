//! Escalating lockout delays.
//!
//! The schedule grows Fibonacci-style from the minimum wait until it reaches
//! the maximum wait, where it plateaus. It is computed once per guard and
//! indexed by the number of failures already recorded for a key.

/// Ordered sequence of lockout delays in milliseconds.
///
/// Invariants:
/// - the first element is the minimum wait (floored at 1ms)
/// - the last element is exactly the maximum wait
/// - the sequence is non-decreasing
///
/// # Example
/// ```
/// use brute_throttle::DelaySchedule;
///
/// let schedule = DelaySchedule::build(500, 5_000);
/// assert_eq!(schedule.delays(), &[500, 500, 1_000, 1_500, 2_500, 4_000, 5_000]);
///
/// // Attempts past the end of the schedule plateau at the maximum wait
/// assert_eq!(schedule.delay_for_attempt(3), 1_000);
/// assert_eq!(schedule.delay_for_attempt(100), 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelaySchedule {
    delays: Vec<u64>,
    max_wait: u64,
}

impl DelaySchedule {
    /// Build the schedule for the given wait bounds (milliseconds).
    ///
    /// If `min_wait >= max_wait` the schedule collapses to `[max_wait]`.
    pub fn build(min_wait: u64, max_wait: u64) -> Self {
        let min_wait = min_wait.max(1);
        let mut delays = vec![min_wait];

        while let Some(&last) = delays.last() {
            if last >= max_wait {
                break;
            }
            let second_last = if delays.len() > 1 {
                delays[delays.len() - 2]
            } else {
                0
            };
            delays.push(last.saturating_add(second_last));
        }

        if let Some(last) = delays.last_mut() {
            *last = max_wait;
        }

        Self { delays, max_wait }
    }

    /// Delay for the given 1-based failure ordinal.
    pub fn delay_for_attempt(&self, count: u32) -> u64 {
        delay_for_attempt(count, &self.delays, self.max_wait)
    }

    /// The computed delays, in escalation order.
    pub fn delays(&self) -> &[u64] {
        &self.delays
    }

    /// Number of escalation steps before the delay saturates.
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    /// A built schedule always holds at least one step.
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// The plateau delay.
    pub fn max_wait(&self) -> u64 {
        self.max_wait
    }
}

/// Look up `schedule[count - 1]`, saturating at `max_wait` outside `1..=len`.
pub fn delay_for_attempt(count: u32, schedule: &[u64], max_wait: u64) -> u64 {
    let Some(index) = (count as usize).checked_sub(1) else {
        return max_wait;
    };
    schedule.get(index).copied().unwrap_or(max_wait)
}
