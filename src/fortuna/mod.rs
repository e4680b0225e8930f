//! Fortuna accumulator: 32 entropy pools feeding an AES-256-CTR generator.
//!
//! All state sits behind one mutex. A reseed reads pool 0's length, drains
//! the scheduled pools and rewrites the generator key as a single step, so
//! no finer-grained locking is possible.

pub mod clock;
pub mod generator;
pub mod pool;

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use zeroize::Zeroize;

use crate::error::Error;

pub use clock::{MonotonicClock, TimeSource};
use generator::Generator;
pub use generator::MAX_REQUEST;
use pool::{EntropyPool, DIGEST_LEN};

pub const POOL_COUNT: usize = 32;

/// Pool 0 must hold at least this many bytes before a reseed.
pub const MIN_POOL_SIZE: u64 = 64;

/// Minimum spacing between reseeds.
pub const RESEED_INTERVAL: Duration = Duration::from_millis(100);

/// Largest payload accepted by a single `add_entropy` call.
pub const MAX_ENTROPY_LEN: usize = 32;

/// What `get_random_bytes` does when no reseed has happened yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnseeded {
    /// Return `Error::NotSeeded` immediately.
    Fail,
    /// Wait up to the given time for enough entropy to arrive.
    Block(Duration),
}

struct State {
    pools: [EntropyPool; POOL_COUNT],
    generator: Generator,
    last_reseed: Option<Duration>,
    reseed_count: u64,
    scratch: [u8; POOL_COUNT * DIGEST_LEN],
    closed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            pools: std::array::from_fn(|_| EntropyPool::new()),
            generator: Generator::new(),
            last_reseed: None,
            reseed_count: 0,
            scratch: [0u8; POOL_COUNT * DIGEST_LEN],
            closed: false,
        }
    }

    /// Reseeds the generator if pool 0 is full enough and the last reseed is
    /// old enough. Returns whether a reseed happened.
    fn maybe_reseed(&mut self, now: Duration) -> bool {
        if self.pools[0].length() < MIN_POOL_SIZE {
            return false;
        }
        if let Some(last) = self.last_reseed {
            if now.saturating_sub(last) < RESEED_INTERVAL {
                return false;
            }
        }

        self.reseed_count += 1;

        let mut used = 0;
        let slots = self.scratch.chunks_exact_mut(DIGEST_LEN);
        for ((i, pool), slot) in self.pools.iter_mut().enumerate().zip(slots) {
            // Pool i joins every 2^i-th reseed; once one is skipped all
            // higher pools are too.
            if self.reseed_count % (1u64 << i) != 0 {
                break;
            }
            pool.finalize_into(slot);
            pool.clear();
            used += 1;
        }

        self.generator.reseed(&self.scratch[..used * DIGEST_LEN]);
        self.scratch.zeroize();
        self.last_reseed = Some(now);

        log::debug!("reseed #{} from {} pools", self.reseed_count, used);
        true
    }

    fn wipe(&mut self) {
        self.generator.zeroize();
        for pool in self.pools.iter_mut() {
            pool.clear();
        }
        self.scratch.zeroize();
        self.last_reseed = None;
    }
}

/// Shared handle to one generator instance. Wrap in an `Arc` to share it
/// between entropy producers and readers.
pub struct Fortuna {
    state: Mutex<State>,
    entropy_added: Condvar,
    clock: Box<dyn TimeSource>,
    on_unseeded: OnUnseeded,
}

impl Fortuna {
    pub fn new<T: TimeSource + 'static>(clock: T) -> Self {
        Self::with_policy(clock, OnUnseeded::Fail)
    }

    pub fn with_policy<T: TimeSource + 'static>(clock: T, on_unseeded: OnUnseeded) -> Self {
        Self {
            state: Mutex::new(State::new()),
            entropy_added: Condvar::new(),
            clock: Box::new(clock),
            on_unseeded,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Nothing panics while holding the lock, so a poisoned state is still
        // consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mixes `data` into pool `pool_index`, framed by the source id and the
    /// payload length.
    pub fn add_entropy(&self, source_id: u8, pool_index: u8, data: &[u8]) -> Result<(), Error> {
        if pool_index as usize >= POOL_COUNT {
            return Err(Error::PoolIndex(pool_index));
        }
        if data.is_empty() || data.len() > MAX_ENTROPY_LEN {
            return Err(Error::EntropyLength(data.len()));
        }

        let mut state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        let pool = &mut state.pools[pool_index as usize];
        pool.absorb(&[source_id]);
        pool.absorb(&[data.len() as u8]);
        pool.absorb(data);
        drop(state);

        self.entropy_added.notify_all();
        Ok(())
    }

    /// Returns exactly `n` random bytes or fails without producing any.
    pub fn get_random_bytes(&self, n: usize) -> Result<Vec<u8>, Error> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > MAX_REQUEST {
            return Err(Error::RequestTooLarge(n));
        }

        let mut state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        let now = self.clock.now();
        state.maybe_reseed(now);

        if !state.generator.is_seeded() {
            state = self.wait_for_seed(state)?;
        }

        state.generator.generate(n)
    }

    fn wait_for_seed<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
    ) -> Result<MutexGuard<'a, State>, Error> {
        let timeout = match self.on_unseeded {
            OnUnseeded::Fail => return Err(Error::NotSeeded),
            OnUnseeded::Block(t) => t,
        };

        // A timeout past the end of `Instant` means wait indefinitely.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let remaining = match deadline {
                Some(d) => d.saturating_duration_since(Instant::now()),
                None => RESEED_INTERVAL,
            };
            if remaining.is_zero() {
                return Err(Error::NotSeeded);
            }
            // Wake at least every reseed interval so the time gate gets
            // re-evaluated even when no entropy arrives.
            let (guard, _) = self
                .entropy_added
                .wait_timeout(state, remaining.min(RESEED_INTERVAL))
                .unwrap_or_else(|e| e.into_inner());
            state = guard;

            if state.closed {
                return Err(Error::Closed);
            }
            let now = self.clock.now();
            state.maybe_reseed(now);
            if state.generator.is_seeded() {
                return Ok(state);
            }
        }
    }

    /// Zeroes the generator key and counter and every pool. Later calls fail
    /// with `Error::Closed`.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.wipe();
            state.closed = true;
        }
        drop(state);
        self.entropy_added.notify_all();
    }

    pub fn is_seeded(&self) -> bool {
        self.lock().generator.is_seeded()
    }

    pub fn reseed_count(&self) -> u64 {
        self.lock().reseed_count
    }

    pub fn pool_length(&self, pool_index: usize) -> Option<u64> {
        self.lock().pools.get(pool_index).map(EntropyPool::length)
    }

    #[cfg(test)]
    fn pool_digest(&self, pool_index: usize) -> [u8; DIGEST_LEN] {
        let mut out = [0u8; DIGEST_LEN];
        self.lock().pools[pool_index].finalize_into(&mut out);
        out
    }
}

impl Drop for Fortuna {
    fn drop(&mut self) {
        self.lock().wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Clock that only moves when the test says so, in milliseconds.
    #[derive(Clone, Default)]
    struct FakeClock(Arc<AtomicU64>);

    impl FakeClock {
        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl TimeSource for FakeClock {
        fn now(&self) -> Duration {
            Duration::from_millis(self.0.load(Ordering::SeqCst))
        }
    }

    /// Two framed 31-byte payloads put 66 bytes into the pool.
    fn fill_pool0(f: &Fortuna) {
        f.add_entropy(1, 0, &[0xaa; 31]).unwrap();
        f.add_entropy(1, 0, &[0x55; 31]).unwrap();
    }

    #[test]
    fn test_first_reseed_end_to_end() {
        let clock = FakeClock::default();
        let f = Fortuna::new(clock.clone());

        fill_pool0(&f);
        assert!(f.pool_length(0).unwrap() >= MIN_POOL_SIZE);
        clock.advance(150);

        let out = f.get_random_bytes(32).unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(f.reseed_count(), 1);
        assert_eq!(f.pool_length(0), Some(0));
        assert!(f.is_seeded());
    }

    #[test]
    fn test_zero_bytes_before_seeding() {
        let f = Fortuna::new(FakeClock::default());
        assert!(f.get_random_bytes(0).unwrap().is_empty());

        let blocking = Fortuna::with_policy(
            FakeClock::default(),
            OnUnseeded::Block(Duration::from_secs(5)),
        );
        assert!(blocking.get_random_bytes(0).unwrap().is_empty());
    }

    #[test]
    fn test_unseeded_fail_policy() {
        let f = Fortuna::new(FakeClock::default());
        assert!(matches!(f.get_random_bytes(16), Err(Error::NotSeeded)));

        // Not enough in pool 0 yet.
        f.add_entropy(1, 0, &[1; 32]).unwrap();
        assert!(matches!(f.get_random_bytes(16), Err(Error::NotSeeded)));
        assert_eq!(f.reseed_count(), 0);
    }

    #[test]
    fn test_unseeded_block_policy_wakes_on_entropy() {
        let f = Arc::new(Fortuna::with_policy(
            FakeClock::default(),
            OnUnseeded::Block(Duration::from_secs(10)),
        ));

        let reader = {
            let f = Arc::clone(&f);
            thread::spawn(move || f.get_random_bytes(24))
        };

        thread::sleep(Duration::from_millis(50));
        fill_pool0(&f);

        let out = reader.join().unwrap().unwrap();
        assert_eq!(out.len(), 24);
        assert_eq!(f.reseed_count(), 1);
    }

    #[test]
    fn test_unseeded_block_policy_times_out() {
        let f = Fortuna::with_policy(
            FakeClock::default(),
            OnUnseeded::Block(Duration::from_millis(30)),
        );
        assert!(matches!(f.get_random_bytes(8), Err(Error::NotSeeded)));
    }

    #[test]
    fn test_unbounded_block_timeout() {
        let f = Arc::new(Fortuna::with_policy(
            FakeClock::default(),
            OnUnseeded::Block(Duration::MAX),
        ));

        let reader = {
            let f = Arc::clone(&f);
            thread::spawn(move || f.get_random_bytes(8))
        };

        thread::sleep(Duration::from_millis(50));
        fill_pool0(&f);
        assert_eq!(reader.join().unwrap().unwrap().len(), 8);
    }

    #[test]
    fn test_reseed_interval_gate() {
        let clock = FakeClock::default();
        let f = Fortuna::new(clock.clone());

        fill_pool0(&f);
        f.get_random_bytes(16).unwrap();
        assert_eq!(f.reseed_count(), 1);

        fill_pool0(&f);
        clock.advance(99);
        f.get_random_bytes(16).unwrap();
        assert_eq!(f.reseed_count(), 1);
        assert!(f.pool_length(0).unwrap() >= MIN_POOL_SIZE);

        clock.advance(1);
        f.get_random_bytes(16).unwrap();
        assert_eq!(f.reseed_count(), 2);
        assert_eq!(f.pool_length(0), Some(0));
    }

    #[test]
    fn test_reseed_schedule() {
        let clock = FakeClock::default();
        let f = Fortuna::new(clock.clone());
        let k = 4;
        let mut included = [0u32; POOL_COUNT];

        for _ in 0..(1 << k) {
            fill_pool0(&f);
            for i in 1..POOL_COUNT {
                f.add_entropy(2, i as u8, &[i as u8]).unwrap();
            }
            clock.advance(100);
            f.get_random_bytes(16).unwrap();
            for (i, count) in included.iter_mut().enumerate() {
                if f.pool_length(i) == Some(0) {
                    *count += 1;
                }
            }
        }

        assert_eq!(f.reseed_count(), 1 << k);
        for (i, &count) in included.iter().enumerate() {
            let expected = if i <= k { 1u32 << (k - i) } else { 0 };
            assert_eq!(count, expected, "pool {}", i);
        }
        // Untouched pools kept every contribution: 16 framed one-byte adds.
        assert_eq!(f.pool_length(31), Some(16 * 3));
    }

    #[test]
    fn test_framing_binds_source_and_length() {
        let a = Fortuna::new(FakeClock::default());
        a.add_entropy(1, 3, b"first").unwrap();
        a.add_entropy(1, 3, b"second").unwrap();

        let b = Fortuna::new(FakeClock::default());
        b.add_entropy(1, 3, b"firstsecond").unwrap();
        assert_ne!(a.pool_digest(3), b.pool_digest(3));

        let c = Fortuna::new(FakeClock::default());
        c.add_entropy(2, 3, b"first").unwrap();
        c.add_entropy(2, 3, b"second").unwrap();
        assert_ne!(a.pool_digest(3), c.pool_digest(3));
        assert_eq!(a.pool_length(3), c.pool_length(3));
    }

    #[test]
    fn test_add_entropy_bounds() {
        let f = Fortuna::new(FakeClock::default());
        assert!(matches!(f.add_entropy(0, 32, &[1]), Err(Error::PoolIndex(32))));
        assert!(matches!(f.add_entropy(0, 0, &[]), Err(Error::EntropyLength(0))));
        assert!(matches!(
            f.add_entropy(0, 0, &[0; 33]),
            Err(Error::EntropyLength(33))
        ));
        assert_eq!(f.pool_length(0), Some(0));

        f.add_entropy(0, 31, &[0; 32]).unwrap();
        assert_eq!(f.pool_length(31), Some(34));
    }

    #[test]
    fn test_request_too_large() {
        let f = Fortuna::new(FakeClock::default());
        fill_pool0(&f);
        assert!(matches!(
            f.get_random_bytes(MAX_REQUEST + 1),
            Err(Error::RequestTooLarge(_))
        ));
        assert_eq!(f.get_random_bytes(MAX_REQUEST).unwrap().len(), MAX_REQUEST);
    }

    #[test]
    fn test_zero_request_leaves_state_alone() {
        let clock = FakeClock::default();
        let f = Fortuna::new(clock.clone());
        fill_pool0(&f);
        f.get_random_bytes(1).unwrap();

        fill_pool0(&f);
        clock.advance(500);
        let len = f.pool_length(0);
        assert!(f.get_random_bytes(0).unwrap().is_empty());
        assert_eq!(f.reseed_count(), 1);
        assert_eq!(f.pool_length(0), len);
    }

    #[test]
    fn test_outputs_differ_across_reseed() {
        let clock = FakeClock::default();
        let f = Fortuna::new(clock.clone());
        fill_pool0(&f);
        let a = f.get_random_bytes(64).unwrap();
        fill_pool0(&f);
        clock.advance(200);
        let b = f.get_random_bytes(64).unwrap();
        assert_eq!(f.reseed_count(), 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_entropy_same_output() {
        let run = || {
            let f = Fortuna::new(FakeClock::default());
            fill_pool0(&f);
            f.get_random_bytes(48).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_close_wipes_and_rejects() {
        let f = Fortuna::new(FakeClock::default());
        fill_pool0(&f);
        f.add_entropy(1, 5, &[9; 8]).unwrap();
        f.get_random_bytes(8).unwrap();

        f.close();
        assert!(!f.is_seeded());
        for i in 0..POOL_COUNT {
            assert_eq!(f.pool_length(i), Some(0));
        }
        assert!(matches!(f.get_random_bytes(8), Err(Error::Closed)));
        assert!(matches!(f.add_entropy(1, 0, &[1]), Err(Error::Closed)));
        f.close();
    }

    #[test]
    fn test_close_leaves_no_entropy_in_memory() {
        let secret = b"\x91\x1c\xe3\x44\xa7\x0b\x5d\xf2\x68\x3a";
        let f = Fortuna::new(FakeClock::default());
        f.add_entropy(9, 7, secret).unwrap();

        fn raw<T>(v: &T) -> &[u8] {
            unsafe { std::slice::from_raw_parts(v as *const T as *const u8, std::mem::size_of::<T>()) }
        }
        let holds_secret = |state: &State| {
            let found = |bytes: &[u8]| bytes.windows(secret.len()).any(|w| w == secret);
            state.pools.iter().any(|p| found(raw(p)))
                || found(raw(&state.generator))
                || found(&state.scratch)
        };

        assert!(holds_secret(&*f.lock()));
        f.close();
        assert!(!holds_secret(&*f.lock()));
    }

    #[test]
    fn test_concurrent_producers_and_readers() {
        let f = Arc::new(Fortuna::new(MonotonicClock));
        fill_pool0(&f);

        let requested = Arc::new(AtomicUsize::new(0));
        let returned = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for src in 1..=4u8 {
            let f = Arc::clone(&f);
            handles.push(thread::spawn(move || {
                for i in 0..500usize {
                    let pool = (i % POOL_COUNT) as u8;
                    f.add_entropy(src, pool, &[src; 32]).unwrap();
                }
            }));
        }
        for t in 0..4usize {
            let f = Arc::clone(&f);
            let requested = Arc::clone(&requested);
            let returned = Arc::clone(&returned);
            handles.push(thread::spawn(move || {
                for i in 0..200usize {
                    let n = 1 + (i * 7 + t) % 300;
                    requested.fetch_add(n, Ordering::SeqCst);
                    let out = f.get_random_bytes(n).unwrap();
                    returned.fetch_add(out.len(), Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(
            requested.load(Ordering::SeqCst),
            returned.load(Ordering::SeqCst)
        );
        assert!(f.reseed_count() >= 1);
    }
}
