use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Wall-clock milliseconds plus a counter that breaks ties within the same
/// millisecond (or while the wall clock runs backwards).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Stamp {
    wall_ms: u64,
    counter: u32,
}

impl Stamp {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then(self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_ms, self.counter)
    }
}

/// Issues strictly increasing stamps for audit entries.
#[derive(Debug, Default)]
pub struct TransitionClock {
    last: Option<Stamp>,
}

impl TransitionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) -> Result<Stamp, CoreError> {
        let now = physical_now()?;
        Ok(self.tick_at(now))
    }

    fn tick_at(&mut self, now: u64) -> Stamp {
        let stamp = match self.last {
            Some(last) if now <= last.wall_ms => Stamp::new(last.wall_ms, last.counter + 1),
            _ => Stamp::new(now, 0),
        };
        self.last = Some(stamp);
        stamp
    }
}
