pub mod hwrng;
pub mod procfs;
pub mod queue;
pub mod timestamp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand_core::{OsRng, TryRngCore};
use zeroize::Zeroize;

use crate::config::SourcesConfig;
use crate::error::Error;
use crate::fortuna::{Fortuna, MAX_ENTROPY_LEN, POOL_COUNT};

/// Source ids recorded alongside every contribution.
pub const SOURCE_SEED: u8 = 0;
pub const SOURCE_HWRNG: u8 = 1;
pub const SOURCE_CTXT: u8 = 2;
pub const SOURCE_TIMESTAMP: u8 = 3;
pub const SOURCE_WRITE: u8 = 4;

/// A periodic entropy producer.
pub struct Source {
    pub id: u8,
    pub name: &'static str,
    pub interval: Duration,
    /// Fills a prefix of the buffer and returns its length.
    pub sample: fn(&mut [u8]) -> Result<usize, Error>,
}

/// The periodic sources enabled in `config`.
pub fn sources(config: &SourcesConfig) -> Vec<Source> {
    let mut out = Vec::new();
    if config.enable_hwrng {
        out.push(Source {
            id: SOURCE_HWRNG,
            name: "hwrng",
            interval: Duration::from_millis(config.hwrng_interval_ms),
            sample: hwrng::sample,
        });
    }
    if config.enable_ctxt {
        out.push(Source {
            id: SOURCE_CTXT,
            name: "ctxt",
            interval: Duration::from_millis(config.ctxt_interval_ms),
            sample: procfs::sample,
        });
    }
    if config.enable_timestamp {
        out.push(Source {
            id: SOURCE_TIMESTAMP,
            name: "timestamp",
            interval: Duration::from_millis(config.timestamp_interval_ms),
            sample: timestamp::sample,
        });
    }
    out
}

/// Puts two independent 32-byte OS RNG samples into pool 0, enough for the
/// first read to reseed.
pub fn seed(fortuna: &Fortuna) -> Result<(), Error> {
    let mut buf = [0u8; MAX_ENTROPY_LEN];
    for _ in 0..2 {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| Error::NoEntropy(format!("OS RNG unavailable: {}", e)))?;
        let added = fortuna.add_entropy(SOURCE_SEED, 0, &buf);
        buf.zeroize();
        added?;
    }
    Ok(())
}

/// Runs `source` on its own thread until `shutdown` is set. Each successful
/// sample goes to the next pool in turn; failures are logged and skipped.
pub fn spawn(fortuna: Arc<Fortuna>, source: Source, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut pool = 0usize;
        let mut buf = [0u8; MAX_ENTROPY_LEN];

        log::info!(
            target: "fortunad::source",
            "{} started: id={} interval={}ms",
            source.name, source.id, source.interval.as_millis(),
        );

        while !shutdown.load(Ordering::Relaxed) {
            match (source.sample)(&mut buf) {
                Ok(0) => {}
                Ok(n) => match fortuna.add_entropy(source.id, pool as u8, &buf[..n]) {
                    Ok(()) => pool = (pool + 1) % POOL_COUNT,
                    Err(Error::Closed) => break,
                    Err(e) => log::warn!(target: "fortunad::source", "{}: {}", source.name, e),
                },
                Err(e) => {
                    log::debug!(target: "fortunad::source", "{} unavailable: {}", source.name, e);
                }
            }
            buf.zeroize();
            interruptible_sleep(source.interval, &shutdown);
        }

        log::info!(target: "fortunad::source", "{} stopped", source.name);
    })
}

/// Sleeps in 250ms steps, checking `shutdown` between each.
pub fn interruptible_sleep(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(250);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::Relaxed) {
        let s = remaining.min(step);
        thread::sleep(s);
        remaining = remaining.saturating_sub(s);
    }
}
