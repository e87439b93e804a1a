//! Deterministic seed expander
//!
//! Stretches a seed into an arbitrary-length byte stream with SHA-1:
//!
//! - split the seed in two halves (first half is `floor(n/2)` bytes)
//! - `anchor1 = SHA1(first)`, `anchor2 = SHA1(second)`
//! - `block = SHA1(anchor1 || block || anchor2)`, starting from a zero block
//!
//! Output is consumed from `block` byte by byte; the block is regenerated
//! whenever all 20 bytes have been handed out.

use sha1::{Digest, Sha1};

const BLOCK_LEN: usize = 20;

/// Rolling SHA-1 expander over a fixed seed.
pub struct Expander {
    anchor1: [u8; BLOCK_LEN],
    anchor2: [u8; BLOCK_LEN],
    block: [u8; BLOCK_LEN],
    taken: usize,
}

impl Expander {
    pub fn new(seed: &[u8]) -> Self {
        let (first, second) = seed.split_at(seed.len() / 2);

        let mut expander = Self {
            anchor1: Sha1::digest(first).into(),
            anchor2: Sha1::digest(second).into(),
            block: [0u8; BLOCK_LEN],
            taken: 0,
        };
        expander.refill();
        expander
    }

    fn refill(&mut self) {
        let mut hasher = Sha1::new();
        hasher.update(self.anchor1);
        hasher.update(self.block);
        hasher.update(self.anchor2);
        self.block = hasher.finalize().into();
        self.taken = 0;
    }

    /// Fill `out` with the next `out.len()` bytes of the stream.
    pub fn fill(&mut self, out: &mut [u8]) {
        for byte in out.iter_mut() {
            if self.taken == BLOCK_LEN {
                self.refill();
            }
            *byte = self.block[self.taken];
            self.taken += 1;
        }
    }

    /// Next `n` bytes of the stream.
    pub fn generate(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        self.fill(&mut out);
        out
    }

    /// Next `N` bytes as a fixed array, for key material.
    pub fn generate_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        self.fill(&mut out);
        out
    }
}

impl Drop for Expander {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.anchor1.zeroize();
        self.anchor2.zeroize();
        self.block.zeroize();
    }
}
