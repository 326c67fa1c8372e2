// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Extended Link Service command codes and LS_RJT reason/explanation codes (FC-LS).

use serde::{Deserialize, Serialize};
use std::fmt;

/// ELS command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElsCommand {
    LsRjt,
    LsAcc,
    Plogi,
    Flogi,
    Logo,
    Rtv,
    Rls,
    Echo,
    Rrq,
    Prli,
    Prlo,
    Pdisc,
    Fdisc,
    Adisc,
    Farp,
    Farpr,
    Rps,
    Rpl,
    Rscn,
    Scr,
    Rnid,
}

impl ElsCommand {
    /// Command code carried in the first payload byte.
    pub const fn code(self) -> u8 {
        match self {
            Self::LsRjt => 0x01,
            Self::LsAcc => 0x02,
            Self::Plogi => 0x03,
            Self::Flogi => 0x04,
            Self::Logo => 0x05,
            Self::Rtv => 0x0E,
            Self::Rls => 0x0F,
            Self::Echo => 0x10,
            Self::Rrq => 0x12,
            Self::Prli => 0x20,
            Self::Prlo => 0x21,
            Self::Pdisc => 0x50,
            Self::Fdisc => 0x51,
            Self::Adisc => 0x52,
            Self::Farp => 0x54,
            Self::Farpr => 0x55,
            Self::Rps => 0x56,
            Self::Rpl => 0x57,
            Self::Rscn => 0x61,
            Self::Scr => 0x62,
            Self::Rnid => 0x78,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::LsRjt,
            0x02 => Self::LsAcc,
            0x03 => Self::Plogi,
            0x04 => Self::Flogi,
            0x05 => Self::Logo,
            0x0E => Self::Rtv,
            0x0F => Self::Rls,
            0x10 => Self::Echo,
            0x12 => Self::Rrq,
            0x20 => Self::Prli,
            0x21 => Self::Prlo,
            0x50 => Self::Pdisc,
            0x51 => Self::Fdisc,
            0x52 => Self::Adisc,
            0x54 => Self::Farp,
            0x55 => Self::Farpr,
            0x56 => Self::Rps,
            0x57 => Self::Rpl,
            0x61 => Self::Rscn,
            0x62 => Self::Scr,
            0x78 => Self::Rnid,
            _ => return None,
        })
    }

    /// FLOGI and FDISC obtain an N_Port ID from the fabric.
    pub const fn is_fabric_login(self) -> bool {
        matches!(self, Self::Flogi | Self::Fdisc)
    }
}

impl fmt::Display for ElsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LsRjt => "LS_RJT",
            Self::LsAcc => "LS_ACC",
            Self::Plogi => "PLOGI",
            Self::Flogi => "FLOGI",
            Self::Logo => "LOGO",
            Self::Rtv => "RTV",
            Self::Rls => "RLS",
            Self::Echo => "ECHO",
            Self::Rrq => "RRQ",
            Self::Prli => "PRLI",
            Self::Prlo => "PRLO",
            Self::Pdisc => "PDISC",
            Self::Fdisc => "FDISC",
            Self::Adisc => "ADISC",
            Self::Farp => "FARP-REQ",
            Self::Farpr => "FARP-REPLY",
            Self::Rps => "RPS",
            Self::Rpl => "RPL",
            Self::Rscn => "RSCN",
            Self::Scr => "SCR",
            Self::Rnid => "RNID",
        };
        f.write_str(name)
    }
}

/// LS_RJT reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCommand,
    LogicalError,
    LogicalBusy,
    ProtocolError,
    UnableToPerform,
    CommandNotSupported,
    CommandInProgress,
    VendorUnique,
    Other(u8),
}

impl RejectReason {
    pub const fn code(self) -> u8 {
        match self {
            Self::InvalidCommand => 0x01,
            Self::LogicalError => 0x03,
            Self::LogicalBusy => 0x05,
            Self::ProtocolError => 0x07,
            Self::UnableToPerform => 0x09,
            Self::CommandNotSupported => 0x0B,
            Self::CommandInProgress => 0x0E,
            Self::VendorUnique => 0xFF,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::InvalidCommand,
            0x03 => Self::LogicalError,
            0x05 => Self::LogicalBusy,
            0x07 => Self::ProtocolError,
            0x09 => Self::UnableToPerform,
            0x0B => Self::CommandNotSupported,
            0x0E => Self::CommandInProgress,
            0xFF => Self::VendorUnique,
            other => Self::Other(other),
        }
    }
}

/// LS_RJT reason code explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectExplanation {
    NothingMore,
    ServiceParamOptions,
    InvalidReceiveSize,
    InvalidPortName,
    InvalidNodeName,
    InvalidCommonServiceParams,
    InvalidOriginatorId,
    CommandInProgress,
    LoginRequired,
    InvalidNportId,
    OutOfResources,
    CannotSupplyData,
    RequestNotSupported,
    Other(u8),
}

impl RejectExplanation {
    pub const fn code(self) -> u8 {
        match self {
            Self::NothingMore => 0x00,
            Self::ServiceParamOptions => 0x01,
            Self::InvalidReceiveSize => 0x07,
            Self::InvalidPortName => 0x0D,
            Self::InvalidNodeName => 0x0E,
            Self::InvalidCommonServiceParams => 0x0F,
            Self::InvalidOriginatorId => 0x15,
            Self::CommandInProgress => 0x19,
            Self::LoginRequired => 0x1E,
            Self::InvalidNportId => 0x1F,
            Self::OutOfResources => 0x29,
            Self::CannotSupplyData => 0x2A,
            Self::RequestNotSupported => 0x2C,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::NothingMore,
            0x01 => Self::ServiceParamOptions,
            0x07 => Self::InvalidReceiveSize,
            0x0D => Self::InvalidPortName,
            0x0E => Self::InvalidNodeName,
            0x0F => Self::InvalidCommonServiceParams,
            0x15 => Self::InvalidOriginatorId,
            0x19 => Self::CommandInProgress,
            0x1E => Self::LoginRequired,
            0x1F => Self::InvalidNportId,
            0x29 => Self::OutOfResources,
            0x2A => Self::CannotSupplyData,
            0x2C => Self::RequestNotSupported,
            other => Self::Other(other),
        }
    }
}

/// Body of an LS_RJT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LsRjt {
    pub reason: RejectReason,
    pub explanation: RejectExplanation,
}

impl LsRjt {
    pub const fn new(reason: RejectReason, explanation: RejectExplanation) -> Self {
        Self {
            reason,
            explanation,
        }
    }

    /// Frame received from a port that has not completed PLOGI.
    pub const LOGIN_REQUIRED: LsRjt =
        LsRjt::new(RejectReason::UnableToPerform, RejectExplanation::LoginRequired);

    pub const UNSUPPORTED: LsRjt =
        LsRjt::new(RejectReason::CommandNotSupported, RejectExplanation::NothingMore);

    pub const BAD_SERVICE_PARAMS: LsRjt = LsRjt::new(
        RejectReason::UnableToPerform,
        RejectExplanation::ServiceParamOptions,
    );

    pub const IN_PROGRESS: LsRjt = LsRjt::new(
        RejectReason::UnableToPerform,
        RejectExplanation::CommandInProgress,
    );

    pub const BUSY: LsRjt = LsRjt::new(RejectReason::LogicalBusy, RejectExplanation::NothingMore);
}

impl fmt::Display for LsRjt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LS_RJT reason x{:02x} explanation x{:02x}",
            self.reason.code(),
            self.explanation.code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_roundtrip_known_set() {
        for cmd in [
            ElsCommand::Plogi,
            ElsCommand::Flogi,
            ElsCommand::Fdisc,
            ElsCommand::Rscn,
            ElsCommand::Rnid,
        ] {
            assert_eq!(ElsCommand::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(ElsCommand::from_code(0x7F), None);
    }

    #[test]
    fn test_reject_codes_fall_back_to_other() {
        assert_eq!(RejectReason::from_code(0x05), RejectReason::LogicalBusy);
        assert_eq!(RejectReason::from_code(0x42), RejectReason::Other(0x42));
        assert_eq!(RejectExplanation::from_code(0x19), RejectExplanation::CommandInProgress);
        assert_eq!(RejectExplanation::Other(0x55).code(), 0x55);
    }

    #[test]
    fn test_fabric_login_commands() {
        assert!(ElsCommand::Flogi.is_fabric_login());
        assert!(ElsCommand::Fdisc.is_fabric_login());
        assert!(!ElsCommand::Plogi.is_fabric_login());
    }
}
