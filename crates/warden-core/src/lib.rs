// Copyright (c) 2025-2026 Nyx Systems LLC.
// SPDX-License-Identifier: SEE LICENSE IN ../../LICENSE
//
// This file is part of Warden (client integrity verification).
// Free for non-commercial use. Commercial use requires a license.
// See LICENSE and COMMERCIAL_LICENSE.md for details.

#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]

pub mod error;
pub mod wire;

pub mod crypto {
    pub mod checksum;
    pub mod expander;
    pub mod keystream;
}

/// Key material hygiene
pub mod secure_memory;

pub use crypto::expander::Expander;
pub use crypto::keystream::KeystreamCipher;
pub use secure_memory::{SecureKey, SessionKey};
