//! Key material containers that zero themselves on drop
//!
//! Session keys live for the whole client session and are swapped once
//! during the handshake. Both the retired and the live key must leave no
//! copy behind, so every key buffer goes through [`SecureKey`].

use std::fmt;
use zeroize::Zeroize;

/// Length of every symmetric key used by the verification channel.
pub const SESSION_KEY_LEN: usize = 16;

/// Symmetric key for one direction of the verification channel.
pub type SessionKey = SecureKey<SESSION_KEY_LEN>;

/// Fixed-size key buffer, wiped on drop and on replacement.
pub struct SecureKey<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> SecureKey<N> {
    pub fn new(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    pub fn as_array(&self) -> &[u8; N] {
        &self.bytes
    }

    /// First key byte. The check request obfuscates type bytes with it.
    pub fn low_byte(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(0)
    }

    /// Swap in new key material. The old bytes are wiped first.
    pub fn replace(&mut self, bytes: [u8; N]) {
        self.bytes.zeroize();
        self.bytes = bytes;
    }
}

impl<const N: usize> Drop for SecureKey<N> {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> fmt::Debug for SecureKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureKey<{N}>(..)")
    }
}
