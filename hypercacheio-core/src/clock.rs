//! Abstraction over wall-clock time so expiration logic is testable
//! without sleeping. Mirrors the `Clock`/`SystemClock` split used
//! throughout the cache store and peer manager.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn unix_now_secs(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}
