use std::fmt;

use chrono::{DateTime, Utc};

const MICROS_PER_SEC: i64 = 1_000_000;

/// Wall-clock timestamp as carried on the wire: whole seconds since the Unix
/// epoch plus a microsecond fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct WireTime {
    /// Seconds since the Unix epoch, truncated to 32 bits.
    pub secs: u32,
    /// Microseconds within the second, below 1_000_000.
    pub micros: u32,
}

impl WireTime {
    /// Creates a timestamp from its wire fields.
    pub fn new(secs: u32, micros: u32) -> Self {
        WireTime { secs, micros }
    }

    /// Converts a UTC date into wire representation.
    ///
    /// The seconds field is truncated to 32 bits. Leap-second instants, which
    /// chrono reports with a fraction past one second, are pinned to the last
    /// microsecond of the second.
    ///
    /// ```
    /// use chrono::DateTime;
    /// use mping::clock::WireTime;
    /// let date = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
    /// assert_eq!(WireTime::from_datetime(date), WireTime::new(1_700_000_000, 250_000));
    /// ```
    pub fn from_datetime(date: DateTime<Utc>) -> Self {
        WireTime {
            secs: date.timestamp() as u32,
            micros: date.timestamp_subsec_micros().min(999_999),
        }
    }

    /// Signed number of microseconds elapsed from `earlier` to `self`.
    ///
    /// The result is negative when `earlier` lies in the future, which happens
    /// when the clock that produced it runs ahead of ours.
    pub fn micros_since(&self, earlier: WireTime) -> i64 {
        let secs = self.secs as i64 - earlier.secs as i64;
        let micros = self.micros as i64 - earlier.micros as i64;
        secs * MICROS_PER_SEC + micros
    }
}

impl fmt::Display for WireTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// Source of wall-clock time for probe timestamps and RTT computation.
pub trait Clock {
    /// Current time in wire representation.
    fn now(&self) -> WireTime;
}

/// Clock backed by the system real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> WireTime {
        WireTime::from_datetime(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_datetime_test() {
        const TEST_CASES: &[(i64, u32, u32)] = &[
            (0, 0, 0),
            (1_525_987, 151_000_000, 151_000),
            (2_584_229, 999_999_999, 999_999),
        ];

        for &(secs, nanos, micros) in TEST_CASES {
            let sample = DateTime::<Utc>::from_timestamp(secs, nanos).expect("Invalid timestamp");
            let wire = WireTime::from_datetime(sample);
            assert_eq!(wire.secs as i64, secs, "Mismatch in seconds field");
            assert_eq!(wire.micros, micros, "Mismatch in microseconds field");
        }
    }

    #[test]
    fn micros_since_positive() {
        let sent = WireTime::new(100, 900_000);
        let received = WireTime::new(101, 100_500);
        assert_eq!(received.micros_since(sent), 200_500);
    }

    #[test]
    fn micros_since_same_instant() {
        let t = WireTime::new(42, 42);
        assert_eq!(t.micros_since(t), 0);
    }

    #[test]
    fn micros_since_negative_when_earlier_is_ahead() {
        let sent = WireTime::new(10, 500);
        let received = WireTime::new(10, 0);
        assert_eq!(received.micros_since(sent), -500);

        let sent = WireTime::new(12, 0);
        let received = WireTime::new(10, 999_999);
        assert_eq!(received.micros_since(sent), -1_000_001);
    }

    #[test]
    fn system_clock_micros_in_range() {
        let now = SystemClock.now();
        assert!(now.micros < 1_000_000);
        assert!(now.secs > 0);
    }

    #[test]
    fn display_pads_fraction() {
        assert_eq!(WireTime::new(5, 42).to_string(), "5.000042");
    }
}
