// Copyright (c) 2025-2026 Nyx Systems LLC.
// SPDX-License-Identifier: SEE LICENSE IN ../../LICENSE
//
// This file is part of Warden (client integrity verification).
// Free for non-commercial use. Commercial use requires a license.
// See LICENSE and COMMERCIAL_LICENSE.md for details.

// Warden verification engine
// Drives the per-session verification protocol on top of warden-core

pub mod catalog;
pub mod config;
pub mod host;
pub mod module;
pub mod penalty;
pub mod registry;
pub mod scheduler;
pub mod session;

pub use catalog::{
    ActionOverride, Catalog, CatalogRow, CheckCategory, CheckDefinition, CheckId, CheckKind,
    PenaltyAction,
};
pub use config::{CategoryQuotas, VerifierConfig};
pub use host::{AccountStore, SessionHost, SessionId, Transport};
pub use module::{ModuleProvider, StaticModule};
pub use penalty::PenaltyExecutor;
pub use registry::Verifier;
pub use session::{Session, SessionError, SessionState};
