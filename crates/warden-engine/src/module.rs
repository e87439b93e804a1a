//! Verification module capability
//!
//! A session is generic over the module it pushes to the client. The
//! provider is pure data: the binary, the handshake seed, the digest a
//! genuine client derives from that seed, and the key pair both sides
//! switch to once the handshake succeeds.

use std::sync::Arc;

use warden_core::wire::{HASH_LEN, SEED_LEN};

/// Static description of a client verification module.
pub trait ModuleProvider {
    /// Module binary as shipped to the client, before per-session
    /// encryption.
    fn bytes(&self) -> &[u8];

    /// Seed sent with the hash request.
    fn seed(&self) -> &[u8; SEED_LEN];

    /// Digest a client running this module returns for [`seed`](Self::seed).
    fn expected_seed_hash(&self) -> &[u8; HASH_LEN];

    /// Inbound key after the handshake.
    fn client_key_seed(&self) -> &[u8; 16];

    /// Outbound key after the handshake.
    fn server_key_seed(&self) -> &[u8; 16];
}

/// Module built from constants fixed per client build.
#[derive(Debug, Clone)]
pub struct StaticModule {
    bytes: Arc<[u8]>,
    seed: [u8; SEED_LEN],
    seed_hash: [u8; HASH_LEN],
    client_key_seed: [u8; 16],
    server_key_seed: [u8; 16],
}

impl StaticModule {
    pub fn new(
        bytes: impl Into<Arc<[u8]>>,
        seed: [u8; SEED_LEN],
        seed_hash: [u8; HASH_LEN],
        client_key_seed: [u8; 16],
        server_key_seed: [u8; 16],
    ) -> Self {
        Self {
            bytes: bytes.into(),
            seed,
            seed_hash,
            client_key_seed,
            server_key_seed,
        }
    }
}

impl ModuleProvider for StaticModule {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn seed(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }

    fn expected_seed_hash(&self) -> &[u8; HASH_LEN] {
        &self.seed_hash
    }

    fn client_key_seed(&self) -> &[u8; 16] {
        &self.client_key_seed
    }

    fn server_key_seed(&self) -> &[u8; 16] {
        &self.server_key_seed
    }
}

/// Diagnostic fingerprint of a module as issued to one session.
pub fn fingerprint(module: &[u8], module_id: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(module);
    hasher.update(module_id);
    hex::encode(&hasher.finalize().as_bytes()[..16])
}
