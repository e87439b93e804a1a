//! Check batch scheduling
//!
//! Every session keeps one shuffled draw pool per category. A cycle draws
//! each active category's quota, mixes the draws so wire order says nothing
//! about categories, and drops whatever does not fit the byte budget.
//! Dropped checks are not deferred; they come back after their pool is
//! reshuffled.

use hmac::{Hmac, Mac};
use rand::seq::SliceRandom;
use rand::Rng;
use sha1::Sha1;
use thiserror::Error;
use tracing::debug;
use warden_core::wire::{FrameWriter, ServerOpcode};

use crate::catalog::{Catalog, CheckCategory, CheckDefinition, CheckId, CheckKind};
use crate::config::VerifierConfig;

type HmacSha1 = Hmac<Sha1>;

/// Bytes in a check-request frame that exist regardless of the batch:
/// opcode, string table terminator, timing check, trailing key byte.
pub const FIXED_REQUEST_OVERHEAD: usize = 4;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("check {0} is not in the catalog")]
    UnknownCheck(CheckId),

    #[error("check {id} of kind {kind:?} cannot be sent in a batch")]
    NotSchedulable { id: CheckId, kind: CheckKind },

    #[error("too many string operands in one batch")]
    StringTableFull,

    #[error("module check digest: {0}")]
    Digest(#[from] hmac::digest::InvalidLength),
}

/// Shuffled draw list for one category.
#[derive(Debug, Clone)]
pub struct CategoryPool {
    ids: Vec<CheckId>,
    cursor: usize,
}

impl CategoryPool {
    /// New pools start exhausted so the first cycle shuffles them.
    pub fn new(ids: Vec<CheckId>) -> Self {
        let cursor = ids.len();
        Self { ids, cursor }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.ids.len()
    }

    pub fn reshuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.ids.shuffle(rng);
        self.cursor = 0;
    }

    /// Take up to `quota` ids. Never wraps past the end of the pool.
    pub fn draw(&mut self, quota: usize) -> &[CheckId] {
        let start = self.cursor;
        let end = (start + quota).min(self.ids.len());
        self.cursor = end;
        &self.ids[start..end]
    }
}

/// Per-session batch builder.
#[derive(Debug, Clone)]
pub struct CategoryScheduler {
    pools: Vec<(CheckCategory, CategoryPool)>,
}

impl CategoryScheduler {
    pub fn new(catalog: &Catalog) -> Self {
        let pools = CheckCategory::ALL
            .iter()
            .map(|&category| (category, CategoryPool::new(catalog.ids_in(category))))
            .collect();
        Self { pools }
    }

    pub fn pool(&self, category: CheckCategory) -> Option<&CategoryPool> {
        self.pools
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, pool)| pool)
    }

    /// Ids for the next batch, in wire order. The mandatory timing check is
    /// not included; [`encode_request`] adds it.
    pub fn next_batch<R: Rng + ?Sized>(
        &mut self,
        catalog: &Catalog,
        config: &VerifierConfig,
        has_player: bool,
        rng: &mut R,
    ) -> Vec<CheckId> {
        let mut drawn = Vec::new();

        for (category, pool) in &mut self.pools {
            if !config.category_active(*category, has_player) {
                continue;
            }
            if pool.is_exhausted() {
                pool.reshuffle(rng);
            }
            let quota = config.quotas.for_category(*category) as usize;
            drawn.extend_from_slice(pool.draw(quota));
        }

        drawn.shuffle(rng);

        let mut used = 0usize;
        let mut strings = 0usize;
        drawn.retain(|&id| {
            let Some(check) = catalog.get(id) else {
                return false;
            };
            let size = encoded_size(check);
            if used + size > config.batch_budget {
                debug!(check_id = id, size, used, "check dropped, batch budget exhausted");
                return false;
            }
            if carries_string(check.kind) {
                if strings == MAX_STRINGS {
                    debug!(check_id = id, "check dropped, string table full");
                    return false;
                }
                strings += 1;
            }
            used += size;
            true
        });

        drawn
    }
}

/// String table entries one request can address with a one-byte index.
pub const MAX_STRINGS: usize = u8::MAX as usize;

/// Whether the check's record points into the string table.
pub fn carries_string(kind: CheckKind) -> bool {
    matches!(kind, CheckKind::Mpq | CheckKind::LuaEval | CheckKind::Driver)
}

/// Request bytes a check occupies, string table entry included.
pub fn encoded_size(check: &CheckDefinition) -> usize {
    let string_cost = 1 + check.text.len();
    match check.kind {
        CheckKind::Memory => 1 + 1 + 4 + 1,
        CheckKind::PageScanA | CheckKind::PageScanB => 1 + check.data.len() + 4 + 1,
        CheckKind::Mpq | CheckKind::LuaEval => 1 + 1 + string_cost,
        CheckKind::Driver => 1 + check.data.len() + 1 + string_cost,
        CheckKind::Module => 1 + 4 + 20,
        CheckKind::Timing | CheckKind::Proc => 1,
    }
}

/// HMAC-SHA1 of a module name keyed with the per-request seed.
pub fn module_check_digest(seed: u32, name: &[u8]) -> Result<[u8; 20], ScheduleError> {
    let mut mac = HmacSha1::new_from_slice(&seed.to_le_bytes())?;
    mac.update(name);
    Ok(mac.finalize().into_bytes().into())
}

/// Append `text` to the string table, returning its 1-based index.
fn push_string<'a>(strings: &mut Vec<&'a str>, text: &'a str) -> Result<u8, ScheduleError> {
    strings.push(text);
    u8::try_from(strings.len()).map_err(|_| ScheduleError::StringTableFull)
}

/// Build the plaintext check-request frame for `ids`.
///
/// Layout: opcode, string table, terminator, timing check, records,
/// trailing `xor_key`. Type bytes are XORed with `xor_key`.
pub fn encode_request<R: Rng + ?Sized>(
    catalog: &Catalog,
    ids: &[CheckId],
    xor_key: u8,
    rng: &mut R,
) -> Result<Vec<u8>, ScheduleError> {
    let mut strings: Vec<&str> = Vec::new();
    let mut records = Vec::new();

    for &id in ids {
        let check = catalog.get(id).ok_or(ScheduleError::UnknownCheck(id))?;
        records.push(check.kind.type_byte() ^ xor_key);

        match check.kind {
            CheckKind::Memory => {
                // Index 0 addresses the client executable itself.
                records.push(0x00);
                records.extend_from_slice(&check.address.to_le_bytes());
                records.push(check.length);
            }
            CheckKind::PageScanA | CheckKind::PageScanB => {
                records.extend_from_slice(&check.data);
                records.extend_from_slice(&check.address.to_le_bytes());
                records.push(check.length);
            }
            CheckKind::Mpq | CheckKind::LuaEval => {
                records.push(push_string(&mut strings, &check.text)?);
            }
            CheckKind::Driver => {
                let index = push_string(&mut strings, &check.text)?;
                records.extend_from_slice(&check.data);
                records.push(index);
            }
            CheckKind::Module => {
                let seed: u32 = rng.gen();
                records.extend_from_slice(&seed.to_le_bytes());
                records.extend_from_slice(&module_check_digest(seed, check.text.as_bytes())?);
            }
            CheckKind::Timing | CheckKind::Proc => {
                return Err(ScheduleError::NotSchedulable { id, kind: check.kind });
            }
        }
    }

    let mut frame = FrameWriter::new(ServerOpcode::CheatChecksRequest);
    for text in &strings {
        frame = frame.u8(text.len() as u8).bytes(text.as_bytes());
    }
    Ok(frame
        .u8(0x00)
        .u8(CheckKind::Timing.type_byte() ^ xor_key)
        .bytes(&records)
        .u8(xor_key)
        .finish())
}
