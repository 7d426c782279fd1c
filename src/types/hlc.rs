//! Hybrid logical clock
//!
//! A 64-bit timestamp packing wall-clock milliseconds into the upper 48 bits
//! and a logical counter into the lower 16. Unsigned comparison of the packed
//! integer yields a total order that approximately tracks wall time.

use crate::core::error::Error;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bits reserved for the logical counter
pub const LOGICAL_BITS: u32 = 16;

/// Maximum tolerated forward drift of a remote clock, in milliseconds
pub const MAX_DRIFT_MS: u64 = 60_000;

/// Packed hybrid logical clock timestamp: `(wall_ms << 16) | counter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HlcTimestamp(u64);

impl HlcTimestamp {
    /// The zero timestamp, ordered before every real timestamp
    pub const ZERO: HlcTimestamp = HlcTimestamp(0);

    /// Pack wall milliseconds and a logical counter
    pub fn encode(wall_ms: u64, counter: u16) -> Self {
        Self((wall_ms << LOGICAL_BITS) | u64::from(counter))
    }

    /// The wall-clock millisecond component
    pub fn wall_ms(self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// The logical counter component
    pub fn counter(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// The raw packed integer
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw packed integer
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// True for the zero timestamp
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// HLCs cross JSON as decimal strings (the 64-bit range exceeds the f64-safe
// integer window). Numbers are accepted on input for small fixture values.
impl Serialize for HlcTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for HlcTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HlcVisitor;

        impl<'de> Visitor<'de> for HlcVisitor {
            type Value = HlcTimestamp;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a decimal string or unsigned integer HLC timestamp")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<HlcTimestamp, E> {
                value
                    .parse::<u64>()
                    .map(HlcTimestamp)
                    .map_err(|_| E::custom(format!("invalid HLC timestamp '{value}'")))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<HlcTimestamp, E> {
                Ok(HlcTimestamp(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<HlcTimestamp, E> {
                u64::try_from(value)
                    .map(HlcTimestamp)
                    .map_err(|_| E::custom("negative HLC timestamp"))
            }
        }

        deserializer.deserialize_any(HlcVisitor)
    }
}

/// Monotonic hybrid logical clock.
///
/// `now` and `recv` update a single packed `AtomicU64` through a CAS loop, so
/// concurrent callers can never observe a non-monotone sequence.
#[derive(Debug, Default)]
pub struct HlcClock {
    last: AtomicU64,
}

impl HlcClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self { last: AtomicU64::new(0) }
    }

    /// Create a clock seeded from a persisted timestamp
    pub fn starting_at(ts: HlcTimestamp) -> Self {
        Self { last: AtomicU64::new(ts.as_u64()) }
    }

    fn wall_now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Next local timestamp: `max(prev + 1, encode(wall_now, 0))`.
    ///
    /// Two calls without an intervening wall-clock change differ by at least
    /// one in the logical component.
    pub fn now(&self) -> HlcTimestamp {
        let wall = HlcTimestamp::encode(Self::wall_now_ms(), 0).as_u64();
        let updated = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(prev.saturating_add(1).max(wall))
            })
            .unwrap_or(0);
        // fetch_update returns the previous value; recompute the stored one.
        HlcTimestamp(updated.saturating_add(1).max(wall))
    }

    /// Merge a remote timestamp: `max(internal, remote) + 1` in the logical
    /// component. Fails when the remote wall clock leads the local one by
    /// more than [`MAX_DRIFT_MS`].
    pub fn recv(&self, remote: HlcTimestamp) -> Result<HlcTimestamp, Error> {
        let local_wall_ms = Self::wall_now_ms();
        let remote_wall_ms = remote.wall_ms();
        if remote_wall_ms > local_wall_ms.saturating_add(MAX_DRIFT_MS) {
            return Err(Error::ClockDrift {
                remote_wall_ms,
                local_wall_ms,
                max_drift_ms: MAX_DRIFT_MS,
            });
        }

        let updated = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(prev.max(remote.as_u64()).saturating_add(1))
            })
            .unwrap_or(0);
        Ok(HlcTimestamp(updated.max(remote.as_u64()).saturating_add(1)))
    }

    /// The last timestamp handed out, without advancing the clock
    pub fn peek(&self) -> HlcTimestamp {
        HlcTimestamp(self.last.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_round_trip() {
        let ts = HlcTimestamp::encode(1_000_000, 42);
        assert_eq!(ts.wall_ms(), 1_000_000);
        assert_eq!(ts.counter(), 42);
        assert_eq!(HlcTimestamp::from_u64(ts.as_u64()), ts);
    }

    #[test]
    fn ordering_is_unsigned_packed_comparison() {
        let a = HlcTimestamp::encode(100, 5);
        let b = HlcTimestamp::encode(100, 6);
        let c = HlcTimestamp::encode(101, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(HlcTimestamp::ZERO < a);
    }

    #[test]
    fn serde_uses_decimal_strings() {
        let ts = HlcTimestamp::encode(1_000_000, 1);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, format!("\"{}\"", ts.as_u64()));
        let back: HlcTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
        // Integer form also accepted
        let from_int: HlcTimestamp = serde_json::from_str("65536000").unwrap();
        assert_eq!(from_int.wall_ms(), 1000);
    }

    #[test]
    fn now_is_strictly_increasing() {
        let clock = HlcClock::new();
        let mut prev = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next > prev, "now() went backwards: {prev} -> {next}");
            prev = next;
        }
    }

    #[test]
    fn recv_advances_past_remote() {
        let clock = HlcClock::new();
        let remote = HlcTimestamp::encode(HlcClock::wall_now_ms(), 7);
        let merged = clock.recv(remote).unwrap();
        assert!(merged > remote);
        assert!(clock.now() > merged);
    }

    #[test]
    fn recv_rejects_excessive_drift() {
        let clock = HlcClock::new();
        let remote = HlcTimestamp::encode(HlcClock::wall_now_ms() + MAX_DRIFT_MS + 1_000, 0);
        match clock.recv(remote) {
            Err(Error::ClockDrift { .. }) => {}
            other => panic!("expected ClockDrift, got {other:?}"),
        }
        // Within the bound is accepted.
        let near = HlcTimestamp::encode(HlcClock::wall_now_ms() + MAX_DRIFT_MS - 1_000, 0);
        assert!(clock.recv(near).is_ok());
    }

    #[test]
    fn recv_is_monotone_under_contention() {
        use std::sync::Arc;
        let clock = Arc::new(HlcClock::new());
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let clock = Arc::clone(&clock);
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::with_capacity(200);
                for i in 0..200u64 {
                    let remote = HlcTimestamp::encode(1_000 + t, (i % 16) as u16);
                    seen.push(clock.recv(remote).unwrap());
                }
                seen
            }));
        }
        for handle in handles {
            let seen = handle.join().unwrap();
            for pair in seen.windows(2) {
                assert!(pair[0] < pair[1]);
            }
        }
    }

    proptest! {
        #[test]
        fn interleaved_now_recv_never_decreases(
            remotes in proptest::collection::vec((0u64..1u64 << 40, 0u16..100), 1..64)
        ) {
            let clock = HlcClock::new();
            let mut prev = HlcTimestamp::ZERO;
            for (wall, counter) in remotes {
                let out = match clock.recv(HlcTimestamp::encode(wall, counter)) {
                    Ok(ts) => ts,
                    Err(_) => clock.now(),
                };
                prop_assert!(out > prev);
                prev = out;
                let out = clock.now();
                prop_assert!(out > prev);
                prev = out;
            }
        }
    }
}
