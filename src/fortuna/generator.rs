use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Error;

use super::pool::sha256_into;

pub const KEY_LEN: usize = 32;
pub const BLOCK_LEN: usize = 16;

/// Largest single request, 2^20 bytes.
pub const MAX_REQUEST: usize = 1 << 20;

/// AES-256 counter-mode keystream generator.
///
/// The counter is a 128-bit big-endian integer that wraps at 2^128. It starts
/// at zero and only a reseed moves it off zero, so a nonzero counter means
/// the generator has been seeded at least once.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Generator {
    key: [u8; KEY_LEN],
    counter: [u8; BLOCK_LEN],
}

impl Generator {
    pub fn new() -> Self {
        Self {
            key: [0u8; KEY_LEN],
            counter: [0u8; BLOCK_LEN],
        }
    }

    /// Replaces the key with SHA256(SHA256(key) || seed) and bumps the
    /// counter. Empty seed material is ignored.
    pub fn reseed(&mut self, seed: &[u8]) {
        if seed.is_empty() {
            return;
        }

        let mut inner = [0u8; KEY_LEN];
        sha256_into(&[&self.key[..]], &mut inner);
        sha256_into(&[&inner[..], seed], &mut self.key);
        inner.zeroize();

        self.increment();
    }

    pub fn is_seeded(&self) -> bool {
        self.counter.iter().any(|&b| b != 0)
    }

    /// Returns `n` bytes of keystream and rekeys.
    pub fn generate(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; n];
        self.fill(&mut out)?;
        Ok(out)
    }

    /// Fills `buf` with keystream, then replaces the key with two fresh
    /// blocks so the state left behind cannot reproduce `buf`.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        if buf.len() > MAX_REQUEST {
            return Err(Error::RequestTooLarge(buf.len()));
        }
        if !self.is_seeded() {
            return Err(Error::NotSeeded);
        }

        let cipher = Aes256::new(GenericArray::from_slice(&self.key));

        let full = buf.len() / BLOCK_LEN * BLOCK_LEN;
        let (head, tail) = buf.split_at_mut(full);
        for chunk in head.chunks_exact_mut(BLOCK_LEN) {
            self.encrypt_counter(&cipher, chunk);
        }
        if !tail.is_empty() {
            let mut block = [0u8; BLOCK_LEN];
            self.encrypt_counter(&cipher, &mut block);
            tail.copy_from_slice(&block[..tail.len()]);
            block.zeroize();
        }

        let mut next_key = [0u8; KEY_LEN];
        for chunk in next_key.chunks_exact_mut(BLOCK_LEN) {
            self.encrypt_counter(&cipher, chunk);
        }
        self.key = next_key;
        next_key.zeroize();

        Ok(())
    }

    fn encrypt_counter(&mut self, cipher: &Aes256, out: &mut [u8]) {
        let block = GenericArray::from_mut_slice(out);
        block.copy_from_slice(&self.counter);
        cipher.encrypt_block(block);
        self.increment();
    }

    fn increment(&mut self) {
        for byte in self.counter.iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ([u8; KEY_LEN], [u8; BLOCK_LEN]) {
        (self.key, self.counter)
    }

    #[cfg(test)]
    pub(crate) fn with_state(key: [u8; KEY_LEN], counter: [u8; BLOCK_LEN]) -> Self {
        Self { key, counter }
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}
