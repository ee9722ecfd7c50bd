use std::time::{Duration, SystemTime};

use crate::errors::{ErrorKind, Result};
use crate::native::RawEvent;
use crate::uapi;

use super::values::LineValue;

/// Kernel timestamp of an edge event.
///
/// The clock is whichever source the line was requested with, so values
/// are only comparable between events of the same request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    pub const fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + (nanos / 1_000_000_000) as u64,
            nanos: nanos % 1_000_000_000,
        }
    }

    pub const fn from_nanos(ns: u64) -> Self {
        Self {
            secs: ns / 1_000_000_000,
            nanos: (ns % 1_000_000_000) as u32,
        }
    }

    /// Read `CLOCK_MONOTONIC`.
    pub fn now() -> std::io::Result<Self> {
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        let res = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if res == -1 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self::new(ts.tv_sec as u64, ts.tv_nsec as u32))
    }

    pub const fn secs(&self) -> u64 {
        self.secs
    }

    pub const fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    pub const fn as_nanos(&self) -> u128 {
        self.secs as u128 * 1_000_000_000 + self.nanos as u128
    }

    pub const fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        self.as_duration().saturating_sub(earlier.as_duration())
    }

    /// `self`, or the first nanosecond after `previous` if `self` is not
    /// later than it.
    pub fn next_after(self, previous: Timestamp) -> Self {
        if self > previous {
            self
        } else {
            Self::from_nanos((previous.as_nanos() + 1) as u64)
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
}

/// A decoded edge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    edge: Edge,
    timestamp: Timestamp,
}

impl Event {
    /// Decode a native event record.
    ///
    /// Any tag other than rising or falling edge is a kernel contract
    /// violation and fails with [`ErrorKind::Decode`].
    pub fn decode(raw: RawEvent) -> Result<Self> {
        let edge = match raw.edge {
            uapi::v2::EVENT_RISING_EDGE => Edge::Rising,
            uapi::v2::EVENT_FALLING_EDGE => Edge::Falling,
            other => return Err(ErrorKind::Decode(other).into()),
        };

        Ok(Self {
            edge,
            timestamp: Timestamp::new(raw.seconds, raw.nanoseconds),
        })
    }

    pub const fn edge(&self) -> Edge {
        self.edge
    }

    /// The level the line changed to: active after a rising edge.
    pub const fn value(&self) -> LineValue {
        match self.edge {
            Edge::Rising => LineValue::Active,
            Edge::Falling => LineValue::Inactive,
        }
    }

    /// Raw `(seconds, nanoseconds)` pair
    pub const fn timestamp(&self) -> (u64, u32) {
        (self.timestamp.secs, self.timestamp.nanos)
    }

    pub const fn raw_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The timestamp as calendar time, i.e. `seconds + nanoseconds / 1e9`
    /// past the Unix epoch. Only meaningful for lines requested with
    /// [`EventClock::RealTime`](super::options::EventClock::RealTime).
    pub fn time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.timestamp.as_duration()
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} @ {}>", self.value(), self.timestamp)
    }
}
