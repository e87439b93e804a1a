//! Check-response integrity checksum
//!
//! The client prefixes every check response with a 32-bit checksum of the
//! reply payload: SHA-1 of the payload, folded by XOR of its five
//! little-endian 32-bit words.

use sha1::{Digest, Sha1};

/// Fold a 160-bit digest to 32 bits.
pub fn fold_digest(digest: &[u8; 20]) -> u32 {
    digest
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .fold(0, |acc, word| acc ^ word)
}

/// Checksum over a check-response payload.
pub fn response_checksum(payload: &[u8]) -> u32 {
    let digest: [u8; 20] = Sha1::digest(payload).into();
    fold_digest(&digest)
}

/// True when `declared` matches the checksum of `payload`.
pub fn verify_response_checksum(declared: u32, payload: &[u8]) -> bool {
    response_checksum(payload) == declared
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fold_digest() {
        let mut digest = [0u8; 20];
        digest[0] = 0x01;
        digest[4] = 0x02;
        digest[19] = 0x80;
        assert_eq!(fold_digest(&digest), 0x8000_0003);
    }

    #[test]
    fn test_roundtrip_accepts_honest_payload() {
        let payload = [0x01, 0x00, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF];
        let sum = response_checksum(&payload);
        assert!(verify_response_checksum(sum, &payload));
    }

    proptest! {
        #[test]
        fn prop_single_byte_corruption_fails(
            payload in proptest::collection::vec(any::<u8>(), 1..128),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let sum = response_checksum(&payload);
            let mut corrupted = payload.clone();
            let at = index.index(corrupted.len());
            corrupted[at] ^= flip;
            prop_assert!(!verify_response_checksum(sum, &corrupted));
        }
    }
}
