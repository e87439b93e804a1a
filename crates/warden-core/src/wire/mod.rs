//! Wire format of the verification channel
//!
//! Every message is a 1-byte opcode followed by an opcode-specific body.
//! Multi-byte integers are little-endian. Whole frames (opcode included)
//! pass through the direction's keystream before hitting the transport.

pub mod frame;

pub use frame::{FrameReader, FrameWriter};

/// Maximum module bytes carried by one module-cache frame
pub const MODULE_CHUNK_SIZE: usize = 500;

/// Length of the handshake seed carried by the hash request
pub const SEED_LEN: usize = 16;

/// Length of the client's hash reply (SHA-1)
pub const HASH_LEN: usize = 20;

/// Module identifier length
pub const MODULE_ID_LEN: usize = 16;

/// Reply byte the client module emits when a scanned pattern was found
pub const FOUND_MARKER: u8 = 0xE9;

/// Messages sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerOpcode {
    /// Module id, key and size; asks the client to load the module.
    ModuleUse = 0x00,
    /// One chunk of the module binary.
    ModuleCache = 0x01,
    /// Batch of integrity checks.
    CheatChecksRequest = 0x02,
    /// Seed the client must hash with the loaded module.
    HashRequest = 0x05,
}

impl ServerOpcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOpcode {
    ModuleMissing = 0x00,
    ModuleOk = 0x01,
    CheatChecksResult = 0x02,
    MemChecksResult = 0x03,
    HashResult = 0x04,
    ModuleFailed = 0x05,
}

impl TryFrom<u8> for ClientOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0x00 => Self::ModuleMissing,
            0x01 => Self::ModuleOk,
            0x02 => Self::CheatChecksResult,
            0x03 => Self::MemChecksResult,
            0x04 => Self::HashResult,
            0x05 => Self::ModuleFailed,
            other => return Err(other),
        })
    }
}

/// Module-use frame: opcode, module id, module key, module size.
pub fn module_use_frame(module_id: &[u8; MODULE_ID_LEN], module_key: &[u8; 16], size: u32) -> Vec<u8> {
    FrameWriter::new(ServerOpcode::ModuleUse)
        .bytes(module_id)
        .bytes(module_key)
        .u32(size)
        .finish()
}

/// Split a module into module-cache frames of at most [`MODULE_CHUNK_SIZE`]
/// bytes each, in order.
pub fn module_cache_frames(module: &[u8]) -> Vec<Vec<u8>> {
    module
        .chunks(MODULE_CHUNK_SIZE)
        .map(|chunk| {
            FrameWriter::new(ServerOpcode::ModuleCache)
                .u16(chunk.len() as u16)
                .bytes(chunk)
                .finish()
        })
        .collect()
}

/// Hash-request frame: opcode and the bound seed.
pub fn hash_request_frame(seed: &[u8; SEED_LEN]) -> Vec<u8> {
    FrameWriter::new(ServerOpcode::HashRequest).bytes(seed).finish()
}
