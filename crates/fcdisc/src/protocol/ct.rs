// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directory (name) server requests carried over FC-CT.

use super::addr::FcId;
use super::params::Fc4Roles;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name server command codes used during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CtCommand {
    /// Get port identifiers by FC-4 type.
    #[serde(rename = "GID_FT")]
    GidFt,
    /// Register FC-4 types.
    #[serde(rename = "RFT_ID")]
    RftId,
    /// Register FC-4 features.
    #[serde(rename = "RFF_ID")]
    RffId,
}

impl CtCommand {
    pub const fn code(self) -> u16 {
        match self {
            Self::GidFt => 0x0171,
            Self::RftId => 0x0217,
            Self::RffId => 0x021F,
        }
    }
}

impl fmt::Display for CtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GidFt => "GID_FT",
            Self::RftId => "RFT_ID",
            Self::RffId => "RFF_ID",
        })
    }
}

/// Name server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtRequest {
    GidFt { fc4_type: u8 },
    RftId { port_id: FcId, fc4_types: Vec<u8> },
    RffId { port_id: FcId, fc4_type: u8, roles: Fc4Roles },
}

impl CtRequest {
    pub fn command(&self) -> CtCommand {
        match self {
            Self::GidFt { .. } => CtCommand::GidFt,
            Self::RftId { .. } => CtCommand::RftId,
            Self::RffId { .. } => CtCommand::RffId,
        }
    }
}
