//! Hybrid timestamps and read-time validation.
//!
//! Reads carry a hybrid time; writes advance it. A read at an explicit
//! timestamp observes exactly the state as of that timestamp. Reads at
//! future timestamps within the clock-error window wait until the local
//! clock catches up; reads beyond the window are rejected.

use crate::core::error::{Result, Status};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A hybrid timestamp: physical microseconds plus a logical component
/// to order events within one microsecond.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct HybridTime {
    /// Microseconds since the Unix epoch.
    pub physical_micros: u64,
    /// Logical counter within one microsecond.
    pub logical: u16,
}

impl HybridTime {
    pub const MIN: HybridTime = HybridTime {
        physical_micros: 0,
        logical: 0,
    };

    pub const MAX: HybridTime = HybridTime {
        physical_micros: u64::MAX,
        logical: u16::MAX,
    };

    pub const fn from_micros(micros: u64) -> Self {
        Self {
            physical_micros: micros,
            logical: 0,
        }
    }

    /// Whether this timestamp carries a real value.
    pub fn is_valid(&self) -> bool {
        *self != Self::MIN
    }

    /// Raise `self` to at least `other`. Used to accumulate restart-read
    /// hints across iterators.
    pub fn make_at_least(&mut self, other: HybridTime) {
        if other > *self {
            *self = other;
        }
    }
}

impl std::fmt::Display for HybridTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ {}us l: {} }}", self.physical_micros, self.logical)
    }
}

/// The hybrid time a read executes at, plus how the caller obtained it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPoint {
    /// Read whatever is latest at the serving replica.
    Latest,
    /// Snapshot read at an explicit timestamp.
    Snapshot(HybridTime),
}

/// Wall-clock source with a bounded error window.
///
/// The window bounds how far in the future a snapshot read time may lie
/// before it is rejected instead of waited for.
#[derive(Debug, Clone)]
pub struct Clock {
    max_error: Duration,
}

impl Clock {
    pub fn new(max_error: Duration) -> Self {
        Self { max_error }
    }

    /// Current hybrid time from the wall clock.
    pub fn now(&self) -> HybridTime {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros() as u64;
        HybridTime::from_micros(micros)
    }

    pub fn max_error(&self) -> Duration {
        self.max_error
    }

    /// Validate a snapshot read time against the clock-error window.
    ///
    /// Returns how long the caller must wait before the read time is
    /// guaranteed safe (zero when it already is). A read time beyond
    /// `now + max_error` cannot become safe by waiting a bounded amount
    /// and is rejected.
    pub fn safe_wait(&self, read_time: HybridTime) -> Result<Duration> {
        let now = self.now();
        if read_time <= now {
            return Ok(Duration::ZERO);
        }
        let ahead = Duration::from_micros(read_time.physical_micros - now.physical_micros);
        if ahead > self.max_error {
            return Err(Status::invalid_argument(format!(
                "read time {} is more than {}us ahead of the clock",
                read_time,
                self.max_error.as_micros()
            )));
        }
        Ok(ahead)
    }
}

impl Default for Clock {
    fn default() -> Self {
        // 500ms matches the default clock-error assumption of the
        // replicated deployment.
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_time_ordering() {
        let a = HybridTime::from_micros(100);
        let b = HybridTime {
            physical_micros: 100,
            logical: 1,
        };
        let c = HybridTime::from_micros(101);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_make_at_least() {
        let mut ht = HybridTime::MIN;
        ht.make_at_least(HybridTime::from_micros(50));
        assert_eq!(ht, HybridTime::from_micros(50));
        ht.make_at_least(HybridTime::from_micros(10));
        assert_eq!(ht, HybridTime::from_micros(50));
    }

    #[test]
    fn test_past_read_time_needs_no_wait() {
        let clock = Clock::default();
        let past = HybridTime::from_micros(1);
        assert_eq!(clock.safe_wait(past).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_far_future_read_time_rejected() {
        let clock = Clock::new(Duration::from_millis(100));
        let mut future = clock.now();
        future.physical_micros += 10_000_000;
        let err = clock.safe_wait(future).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn test_near_future_read_time_waits() {
        let clock = Clock::new(Duration::from_secs(10));
        let mut future = clock.now();
        future.physical_micros += 2_000_000;
        let wait = clock.safe_wait(future).unwrap();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(10));
    }
}
