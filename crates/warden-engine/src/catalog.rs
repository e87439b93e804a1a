//! Check catalog
//!
//! Immutable table of check definitions, loaded once at startup and shared
//! by every session behind an `Arc`. Loading fails closed: a disabled
//! engine or an empty table yields an empty catalog and no check cycles.
//! Bad rows are skipped with a diagnostic, never fatal.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use warden_core::wire::FOUND_MARKER;

use crate::config::VerifierConfig;

/// Dense catalog identifier of a check.
pub type CheckId = u16;

/// Longest Lua expression the client sandbox accepts.
pub const MAX_LUA_EXPRESSION_LEN: usize = 170;

/// Seed plus digest carried by page and driver scans.
pub const SCAN_PATTERN_LEN: usize = 24;

/// Length of the digest an MPQ check replies with.
pub const MPQ_DIGEST_LEN: usize = 20;

/// Check kinds, tagged with the type byte the client module dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CheckKind {
    Memory = 0xF3,
    PageScanA = 0xB2,
    PageScanB = 0xBF,
    Mpq = 0x98,
    LuaEval = 0x8B,
    Driver = 0x71,
    Timing = 0x57,
    Proc = 0x7E,
    Module = 0xD9,
}

impl CheckKind {
    pub fn type_byte(self) -> u8 {
        self as u8
    }

    /// Draw pool this kind belongs to. Timing and Proc are never pooled.
    pub fn category(self) -> Option<CheckCategory> {
        match self {
            Self::Driver | Self::PageScanA | Self::PageScanB | Self::Module => {
                Some(CheckCategory::Inject)
            }
            Self::LuaEval => Some(CheckCategory::Lua),
            Self::Mpq | Self::Memory => Some(CheckCategory::Modded),
            Self::Timing | Self::Proc => None,
        }
    }
}

impl TryFrom<u8> for CheckKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0xF3 => Self::Memory,
            0xB2 => Self::PageScanA,
            0xBF => Self::PageScanB,
            0x98 => Self::Mpq,
            0x8B => Self::LuaEval,
            0x71 => Self::Driver,
            0x57 => Self::Timing,
            0x7E => Self::Proc,
            0xD9 => Self::Module,
            other => return Err(other),
        })
    }
}

/// Scheduling categories, each with its own draw pool and quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckCategory {
    Inject,
    Lua,
    Modded,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 3] = [Self::Inject, Self::Lua, Self::Modded];
}

/// What happens when a check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[repr(u8)]
pub enum PenaltyAction {
    Log = 0,
    Kick = 1,
    Ban = 2,
}

impl PenaltyAction {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Log => "None",
            Self::Kick => "Kick",
            Self::Ban => "Ban",
        }
    }
}

impl TryFrom<u8> for PenaltyAction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::Log),
            1 => Ok(Self::Kick),
            2 => Ok(Self::Ban),
            other => Err(other),
        }
    }
}

/// One validated check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDefinition {
    pub id: CheckId,
    pub kind: CheckKind,
    pub address: u32,
    pub length: u8,
    /// Scan pattern for page and driver checks.
    pub data: Vec<u8>,
    /// String operand: file name, Lua expression, driver or module name.
    pub text: String,
    /// Bytes the client must reply with. Empty for Lua checks.
    pub expected: Vec<u8>,
    pub comment: String,
    pub action: PenaltyAction,
}

/// Raw catalog row as persisted. Binary columns are hex strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogRow {
    pub id: CheckId,
    pub kind: u8,
    pub data: Option<String>,
    pub text: Option<String>,
    pub address: u32,
    pub length: u8,
    pub result: Option<String>,
    pub comment: Option<String>,
}

/// Raw per-check action override row.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ActionOverride {
    pub check_id: CheckId,
    pub action: u8,
}

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("unknown check kind 0x{0:02X}")]
    UnknownKind(u8),
    #[error("duplicate check id")]
    Duplicate,
    #[error("column `{column}` is not valid hex")]
    BadHex { column: &'static str },
    #[error("column `{column}` is required for this kind")]
    Missing { column: &'static str },
    #[error("column `{column}` has length {actual}, expected {expected}")]
    BadLength {
        column: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("column `{column}` is too long ({actual} > {max})")]
    TooLong {
        column: &'static str,
        max: usize,
        actual: usize,
    },
}

/// Loaded, read-only check table.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    checks: BTreeMap<CheckId, CheckDefinition>,
    enabled: bool,
}

impl Catalog {
    /// Empty catalog; sessions built on it never schedule checks.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Validate and load `rows`. Never fails: invalid rows are skipped.
    pub fn load<I>(rows: I, config: &VerifierConfig) -> Self
    where
        I: IntoIterator<Item = CatalogRow>,
    {
        if !config.enabled {
            info!("verification disabled, loading checks skipped");
            return Self::disabled();
        }

        let mut checks = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut skipped = 0usize;

        for row in rows {
            let id = row.id;
            let result = if seen.insert(id) {
                validate_row(row, config.default_action)
            } else {
                Err(RowError::Duplicate)
            };

            match result {
                Ok(check) => {
                    checks.insert(id, check);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(check_id = id, error = %e, "skipping invalid check definition");
                }
            }
        }

        if checks.is_empty() {
            warn!(skipped, "check table is empty, verification disabled");
            return Self::disabled();
        }

        info!(loaded = checks.len(), skipped, "loaded check catalog");
        Self {
            checks,
            enabled: true,
        }
    }

    /// Apply per-check action overrides. Returns how many were applied.
    pub fn apply_overrides<I>(&mut self, overrides: I) -> usize
    where
        I: IntoIterator<Item = ActionOverride>,
    {
        let mut applied = 0;
        for row in overrides {
            let Ok(action) = PenaltyAction::try_from(row.action) else {
                warn!(check_id = row.check_id, action = row.action, "override action out of range, skipped");
                continue;
            };
            match self.checks.get_mut(&row.check_id) {
                Some(check) => {
                    check.action = action;
                    applied += 1;
                }
                None => {
                    warn!(check_id = row.check_id, "override references unknown check, skipped");
                }
            }
        }
        if applied > 0 {
            info!(applied, "loaded check action overrides");
        }
        applied
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, id: CheckId) -> Option<&CheckDefinition> {
        self.checks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Ids of every check that belongs to `category`, ascending.
    pub fn ids_in(&self, category: CheckCategory) -> Vec<CheckId> {
        self.checks
            .values()
            .filter(|c| c.kind.category() == Some(category))
            .map(|c| c.id)
            .collect()
    }
}

fn decode_hex(value: Option<&str>, column: &'static str) -> Result<Vec<u8>, RowError> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => hex::decode(s).map_err(|_| RowError::BadHex { column }),
        None => Ok(Vec::new()),
    }
}

fn require_len(bytes: &[u8], expected: usize, column: &'static str) -> Result<(), RowError> {
    if bytes.is_empty() {
        return Err(RowError::Missing { column });
    }
    if bytes.len() != expected {
        return Err(RowError::BadLength {
            column,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn require_text(text: &str) -> Result<(), RowError> {
    if text.is_empty() {
        return Err(RowError::Missing { column: "text" });
    }
    Ok(())
}

fn validate_row(row: CatalogRow, default_action: PenaltyAction) -> Result<CheckDefinition, RowError> {
    let kind = CheckKind::try_from(row.kind).map_err(RowError::UnknownKind)?;
    let data = decode_hex(row.data.as_deref(), "data")?;
    let mut expected = decode_hex(row.result.as_deref(), "result")?;
    let text = row.text.unwrap_or_default();

    // Strings travel with a one-byte length prefix.
    if text.len() > u8::MAX as usize {
        return Err(RowError::TooLong {
            column: "text",
            max: u8::MAX as usize,
            actual: text.len(),
        });
    }

    match kind {
        CheckKind::Memory => {
            if row.length == 0 {
                return Err(RowError::Missing { column: "length" });
            }
            require_len(&expected, row.length as usize, "result")?;
        }
        CheckKind::PageScanA | CheckKind::PageScanB => {
            require_len(&data, SCAN_PATTERN_LEN, "data")?;
            if row.length == 0 {
                return Err(RowError::Missing { column: "length" });
            }
        }
        CheckKind::Driver => {
            require_len(&data, SCAN_PATTERN_LEN, "data")?;
            require_text(&text)?;
        }
        CheckKind::Module => require_text(&text)?,
        CheckKind::Mpq => {
            require_text(&text)?;
            require_len(&expected, MPQ_DIGEST_LEN, "result")?;
        }
        CheckKind::LuaEval => {
            require_text(&text)?;
            if text.len() > MAX_LUA_EXPRESSION_LEN {
                return Err(RowError::TooLong {
                    column: "text",
                    max: MAX_LUA_EXPRESSION_LEN,
                    actual: text.len(),
                });
            }
            // Lua replies are logged, never compared.
            expected.clear();
        }
        CheckKind::Proc => {
            require_text(&text)?;
            if data.is_empty() {
                return Err(RowError::Missing { column: "data" });
            }
        }
        CheckKind::Timing => {}
    }

    if matches!(
        kind,
        CheckKind::PageScanA | CheckKind::PageScanB | CheckKind::Driver | CheckKind::Module
    ) {
        if expected.is_empty() {
            expected.push(FOUND_MARKER);
        } else if expected.len() != 1 {
            return Err(RowError::BadLength {
                column: "result",
                expected: 1,
                actual: expected.len(),
            });
        }
    }

    Ok(CheckDefinition {
        id: row.id,
        kind,
        address: row.address,
        length: row.length,
        data,
        text,
        expected,
        comment: row.comment.unwrap_or_default(),
        action: default_action,
    })
}
