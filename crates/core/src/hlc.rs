use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;
use crate::ids::ByteArrayVisitor;

/// Default bound on how far ahead of local wall time a merged timestamp may be.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 300_000;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Hybrid logical clock timestamp used as the change-entry timestamp.
///
/// Encoded as 12 bytes: wall_ms (big-endian u64) then counter (big-endian u32),
/// so byte order and timestamp order agree.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default)]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub const ZERO: Hlc = Hlc {
        wall_ms: 0,
        counter: 0,
    };

    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let mut wall = [0u8; 8];
        let mut counter = [0u8; 4];
        wall.copy_from_slice(&bytes[..8]);
        counter.copy_from_slice(&bytes[8..]);
        Self {
            wall_ms: u64::from_be_bytes(wall),
            counter: u32::from_be_bytes(counter),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidData(format!("hlc must be 12 bytes, got {}", bytes.len())))?;
        Ok(Self::from_bytes(&arr))
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then(self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_ms, self.counter)
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = deserializer.deserialize_bytes(ByteArrayVisitor::<12>)?;
        Ok(Hlc::from_bytes(&bytes))
    }
}

/// Per-writer clock producing strictly increasing timestamps.
#[derive(Debug, Clone)]
pub struct HlcClock {
    last: Hlc,
    max_drift_ms: u64,
}

impl HlcClock {
    pub fn new() -> Self {
        Self::with_max_drift(DEFAULT_MAX_DRIFT_MS)
    }

    pub fn with_max_drift(max_drift_ms: u64) -> Self {
        Self {
            last: Hlc::ZERO,
            max_drift_ms,
        }
    }

    pub fn last(&self) -> Hlc {
        self.last
    }

    /// Next local timestamp, strictly greater than anything issued or observed.
    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        let next = if now > self.last.wall_ms {
            Hlc::new(now, 0)
        } else {
            Hlc::new(self.last.wall_ms, self.last.counter + 1)
        };
        self.last = next;
        Ok(next)
    }

    /// Advance past a timestamp already in the local log. No drift check.
    pub fn seed(&mut self, hlc: Hlc) {
        if hlc > self.last {
            self.last = hlc;
        }
    }

    /// Fold in a timestamp read from another copy so later local ticks sort after it.
    ///
    /// Fails when the remote timestamp is further ahead of local wall time than the
    /// configured drift bound; the clock is left unchanged in that case.
    pub fn observe(&mut self, remote: Hlc) -> Result<(), CoreError> {
        let now = physical_now()?;
        if remote.wall_ms > now.saturating_add(self.max_drift_ms) {
            return Err(CoreError::HlcDriftTooLarge {
                delta_ms: remote.wall_ms - now,
                max_ms: self.max_drift_ms,
            });
        }
        if remote > self.last {
            self.last = remote;
        }
        Ok(())
    }
}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}
