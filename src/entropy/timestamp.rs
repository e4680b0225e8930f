use crate::error::Error;
use crate::fortuna::clock::monotonic_ns;
use crate::mixer;

/// Timestamps taken per sample.
const ROUNDS: usize = 16;

/// Hashes a short run of CLOCK_MONOTONIC readings separated by a
/// data-dependent busy-spin. The low bits of each reading pick up cache,
/// scheduler and interrupt jitter.
pub fn sample(buf: &mut [u8]) -> Result<usize, Error> {
    let mut stamps = [0u8; ROUNDS * 8];
    let mut acc: u64 = 0;

    for (i, slot) in stamps.chunks_exact_mut(8).enumerate() {
        let spins = 500 + (acc & 0xff) as usize;
        let mut x: u64 = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        for _ in 0..spins {
            x = x.wrapping_mul(0x5DEECE66D).wrapping_add(0xB);
        }
        std::hint::black_box(x);

        let ts = monotonic_ns();
        acc = acc.wrapping_add(ts);
        slot.copy_from_slice(&ts.to_le_bytes());
    }

    let digest = mixer::condition(&[("timestamp", &stamps)]);
    let n = buf.len().min(digest.len());
    buf[..n].copy_from_slice(&digest[..n]);
    Ok(n)
}
