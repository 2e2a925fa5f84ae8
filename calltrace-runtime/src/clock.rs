//! Monotonic time source for span timestamps.
//!
//! Calendar time is unsuitable here: it can jump backwards, and reading it
//! through the high-level APIs may allocate. Every traced call samples the
//! clock twice, so the default backend is the cheapest monotonic counter the
//! platform offers.

#[cfg(not(target_os = "linux"))]
use std::time::Instant;

/// Capability trait for nanosecond monotonic timestamps.
///
/// The only requirement is that `now_nanos` never decreases on a single
/// thread; the zero point is arbitrary.
pub trait MonotonicClock: Send + Sync {
    fn now_nanos(&self) -> u64;
}

/// Default clock. On Linux this reads `CLOCK_MONOTONIC` directly through
/// `clock_gettime`, which is vDSO-backed and allocation-free.
#[derive(Debug, Default)]
pub struct SystemClock;

#[cfg(target_os = "linux")]
impl MonotonicClock for SystemClock {
    fn now_nanos(&self) -> u64 {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: ts is a valid, writable timespec and CLOCK_MONOTONIC is
        // always available on Linux.
        #[allow(unsafe_code)]
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
    }
}

#[cfg(not(target_os = "linux"))]
impl MonotonicClock for SystemClock {
    fn now_nanos(&self) -> u64 {
        use once_cell::sync::Lazy;
        static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
        u64::try_from(EPOCH.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Hand-advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, nanos: u64) {
        self.now.fetch_add(nanos, std::sync::atomic::Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_nanos(), 0);
        clock.advance(250);
        assert_eq!(clock.now_nanos(), 250);
    }
}
