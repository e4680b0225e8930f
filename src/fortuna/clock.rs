use std::time::Duration;

/// Source of the current time for reseed scheduling.
///
/// Only differences between readings matter, so any monotonic origin works.
/// Closures returning a `Duration` implement this, which is how tests drive
/// the reseed clock by hand.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
}

impl<F> TimeSource for F
where
    F: Fn() -> Duration + Send + Sync,
{
    fn now(&self) -> Duration {
        self()
    }
}

/// Reads CLOCK_MONOTONIC.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl TimeSource for MonotonicClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(monotonic_ns())
    }
}

pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}
