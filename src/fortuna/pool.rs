use sha2::compress256;
use sha2::digest::consts::U64;
use sha2::digest::generic_array::GenericArray;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Width of a pool digest in bytes.
pub const DIGEST_LEN: usize = 32;

const BLOCK_LEN: usize = 64;

const IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a,
    0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// One bucket of pending entropy: a running SHA-256 state plus the number of
/// bytes fed into it since the last clear.
///
/// The chaining state and the partial input block are held here rather than
/// in a `sha2::Sha256`, so `clear` and drop can overwrite every byte that
/// input passed through.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EntropyPool {
    state: [u32; 8],
    buffer: [u8; BLOCK_LEN],
    buffered: usize,
    size: u64,
}

impl EntropyPool {
    pub fn new() -> Self {
        Self {
            state: IV,
            buffer: [0u8; BLOCK_LEN],
            buffered: 0,
            size: 0,
        }
    }

    pub fn absorb(&mut self, mut bytes: &[u8]) {
        self.size += bytes.len() as u64;

        if self.buffered > 0 {
            let take = bytes.len().min(BLOCK_LEN - self.buffered);
            self.buffer[self.buffered..self.buffered + take].copy_from_slice(&bytes[..take]);
            self.buffered += take;
            bytes = &bytes[take..];
            if self.buffered < BLOCK_LEN {
                return;
            }
            compress_one(&mut self.state, &self.buffer);
            self.buffer.zeroize();
            self.buffered = 0;
        }

        let mut blocks = bytes.chunks_exact(BLOCK_LEN);
        for block in &mut blocks {
            compress256(&mut self.state, std::slice::from_ref(as_block(block)));
        }
        let rest = blocks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffered = rest.len();
    }

    pub fn length(&self) -> u64 {
        self.size
    }

    /// Writes the digest of everything absorbed so far into the first
    /// `DIGEST_LEN` bytes of `out`. The pool keeps its state; the caller
    /// clears it.
    pub fn finalize_into(&self, out: &mut [u8]) {
        let mut state = self.state;
        let mut block = self.buffer;

        block[self.buffered] = 0x80;
        block[self.buffered + 1..].fill(0);
        if self.buffered + 1 > BLOCK_LEN - 8 {
            compress_one(&mut state, &block);
            block.fill(0);
        }
        let bits = self.size.wrapping_mul(8);
        block[BLOCK_LEN - 8..].copy_from_slice(&bits.to_be_bytes());
        compress_one(&mut state, &block);

        for (word, chunk) in state.iter().zip(out[..DIGEST_LEN].chunks_exact_mut(4)) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }

        state.zeroize();
        block.zeroize();
    }

    /// Empties the pool and overwrites any buffered input.
    pub fn clear(&mut self) {
        self.zeroize();
        self.state = IV;
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

fn as_block(bytes: &[u8]) -> &GenericArray<u8, U64> {
    GenericArray::from_slice(bytes)
}

fn compress_one(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
    compress256(state, std::slice::from_ref(as_block(block)));
}

/// SHA-256 of the concatenation of `parts` into `out[..DIGEST_LEN]`, with no
/// copy of the input left behind.
pub fn sha256_into(parts: &[&[u8]], out: &mut [u8]) {
    let mut h = EntropyPool::new();
    for part in parts {
        h.absorb(part);
    }
    h.finalize_into(out);
}
