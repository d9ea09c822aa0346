//! Millisecond time source, injectable so tests can drive TTL expiry deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic-ish millisecond clock.
///
/// `now_ms` must be non-decreasing across calls from the caller's point of view; the exact
/// epoch doesn't matter as long as it is consistent with the values stored in `expires_at_ms`.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall-clock time, in milliseconds since the Unix epoch.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before the Unix epoch")
            .as_millis() as i64
    }
}

/// A clock a test can set and advance by hand.
#[derive(Debug)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// `true` iff an entry with the given expiration is expired as of `now_ms`.
///
/// `expires_at_ms == 0` means "never expires"; a non-positive value encountered elsewhere
/// (e.g. a stray negative TTL replayed from the WAL) is clamped to "never" by callers before
/// it reaches here, so this is the single place the `> 0` check lives.
pub fn is_expired(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms > 0 && now_ms >= expires_at_ms
}
