use std::{
    convert::TryFrom,
    ops::Add,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use serde::{de, Deserialize, Deserializer, Serialize};

/// The number of milliseconds since the [`UNIX_EPOCH`].
///
/// - Internally represented by a non-negative [`i64`] to ease interoperability
///   with the database layer, which doesn't support unsigned ints.
/// - Can represent any time from January 1st, 1970 00:00:00.000 UTC to roughly
///   292 million years in the future.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct TimestampMs(i64);

impl TimestampMs {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a new [`TimestampMs`] from the current [`SystemTime`].
    ///
    /// Panics if the current time is not within bounds.
    pub fn now() -> Self {
        Self::try_from(SystemTime::now()).unwrap()
    }

    /// Creates a [`TimestampMs`] from a raw millisecond value.
    ///
    /// Panics if the value is negative; intended for constants and test
    /// fixtures.
    pub const fn from_millis(millis: i64) -> Self {
        assert!(millis >= 0);
        Self(millis)
    }

    /// Returns the contained [`i64`].
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Adds a [`Duration`], returning [`None`] on overflow.
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let millis = i64::try_from(duration.as_millis()).ok()?;
        self.0.checked_add(millis).map(Self)
    }

    /// Subtracts a [`Duration`], returning [`None`] if the result would be
    /// before the epoch.
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        let millis = i64::try_from(duration.as_millis()).ok()?;
        let value = self.0.checked_sub(millis)?;
        (value >= 0).then_some(Self(value))
    }

    /// Returns the [`Duration`] elapsed since `earlier`, or [`None`] if
    /// `earlier` is actually later than `self`.
    pub fn duration_since(self, earlier: Self) -> Option<Duration> {
        u64::try_from(self.0.checked_sub(earlier.0)?)
            .ok()
            .map(Duration::from_millis)
    }
}

impl Add<Duration> for TimestampMs {
    type Output = Self;
    fn add(self, duration: Duration) -> Self {
        self.checked_add(duration).expect("timestamp overflow")
    }
}

/// Get a [`SystemTime`] corresponding to this timestamp.
impl From<TimestampMs> for SystemTime {
    fn from(timestamp: TimestampMs) -> Self {
        let timestamp_u64 = u64::try_from(timestamp.0)
            .expect("Non-negative invariant was violated");
        UNIX_EPOCH + Duration::from_millis(timestamp_u64)
    }
}

/// Attempts to convert a [`SystemTime`] into a [`TimestampMs`].
///
/// Returns an error if the [`SystemTime`] is not within bounds.
impl TryFrom<SystemTime> for TimestampMs {
    type Error = anyhow::Error;
    fn try_from(system_time: SystemTime) -> anyhow::Result<Self> {
        system_time
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .map(i64::try_from)
            .map(|res| res.map(Self))
            .context("Current time is before January 1st, 1970")?
            .context("Current time is more than 292 million years past epoch")
    }
}

/// Enforces that the inner [`i64`] is non-negative.
impl<'de> Deserialize<'de> for TimestampMs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        if value >= 0 {
            Ok(TimestampMs(value))
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Signed(value),
                &"Unix timestamp must be non-negative",
            ))
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::arbitrary::Arbitrary;
    use proptest::strategy::{BoxedStrategy, Strategy};

    use super::*;
    use crate::test_utils::roundtrip;

    impl Arbitrary for TimestampMs {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (0..i64::MAX).prop_map(Self).boxed()
        }
    }

    #[test]
    fn timestamp_roundtrip() {
        roundtrip::json_string_roundtrip_proptest::<TimestampMs>();
    }

    #[test]
    fn deserialize_enforces_nonnegative() {
        assert_eq!(serde_json::from_str::<TimestampMs>("42").unwrap().0, 42);
        assert_eq!(serde_json::from_str::<TimestampMs>("0").unwrap().0, 0);
        assert!(serde_json::from_str::<TimestampMs>("-42").is_err());
    }

    #[test]
    fn duration_math() {
        let t0 = TimestampMs(10_000);
        let t1 = t0 + Duration::from_secs(30);
        assert_eq!(t1.as_i64(), 40_000);
        assert_eq!(t1.duration_since(t0), Some(Duration::from_secs(30)));
        assert_eq!(t0.duration_since(t1), None);
        assert_eq!(t0.checked_sub(Duration::from_secs(30)), None);
    }
}
