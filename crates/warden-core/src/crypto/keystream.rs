//! Directional keystream cipher for the verification channel
//!
//! Each session owns two instances, one per direction. The keystream is
//! RC4 keyed with the 16-byte session key; encryption and decryption are
//! the same XOR. Buffers must be processed in strict arrival order: a
//! skipped or reordered buffer desynchronizes the direction for good.

use std::fmt;

use rc4::cipher::generic_array::GenericArray;
use rc4::{consts::U16, KeyInit, Rc4, StreamCipher};

/// Stateful XOR keystream for one direction of a session.
pub struct KeystreamCipher {
    inner: Rc4<U16>,
    processed: u64,
}

impl KeystreamCipher {
    /// Initialize a fresh keystream from `key`, positioned at byte 0.
    pub fn prepare(key: &[u8; 16]) -> Self {
        let key = GenericArray::from(*key);
        Self {
            inner: Rc4::<U16>::new(&key),
            processed: 0,
        }
    }

    /// XOR `buf` in place with the next `buf.len()` keystream bytes.
    pub fn process(&mut self, buf: &mut [u8]) {
        self.inner.apply_keystream(buf);
        self.processed += buf.len() as u64;
    }

    /// Owned variant of [`process`](Self::process).
    pub fn process_vec(&mut self, mut buf: Vec<u8>) -> Vec<u8> {
        self.process(&mut buf);
        buf
    }

    /// Number of keystream bytes consumed since `prepare`.
    pub fn position(&self) -> u64 {
        self.processed
    }
}

// Keystream state is key-equivalent; never print it.
impl fmt::Debug for KeystreamCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystreamCipher")
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}
