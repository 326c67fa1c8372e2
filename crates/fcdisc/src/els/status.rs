// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion statuses reported by the transport and their classification.

use crate::error::TransportError;
use crate::protocol::{AccPayload, LsRjt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local (adapter-side) reject codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalReject {
    NoResources,
    /// Out of exchange resources.
    NoXri,
    LoopOpenFailure,
    InvalidRpi,
    SequenceTimeout,
    IllegalFrame,
    IllegalCommand,
    Aborted,
    LinkDown,
    InvalidContext,
}

impl From<TransportError> for LocalReject {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::LinkDown => Self::LinkDown,
            TransportError::NoResources => Self::NoResources,
            TransportError::Unavailable => Self::IllegalCommand,
            TransportError::InvalidHandle(_) => Self::InvalidContext,
        }
    }
}

/// Final status of one exchange attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success(AccPayload),
    LsRjt(LsRjt),
    LocalReject(LocalReject),
    NportBusy,
    FabricBusy,
    NportReject { temporary: bool },
    FabricReject { temporary: bool },
}

/// Failure classes used by callers that do not care about exact codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// LS_RJT or port/fabric reject from the far side.
    ProtocolReject,
    /// Busy, out of resources, timeout or another local condition.
    LocalTransport,
    /// Link dropped or the exchange was aborted.
    LinkLost,
}

impl CompletionStatus {
    /// Status handed to exchanges cut short by a link drop.
    pub const LINK_DOWN: CompletionStatus = CompletionStatus::LocalReject(LocalReject::LinkDown);

    /// `None` for success.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Success(_) => None,
            Self::LsRjt(_) | Self::NportReject { .. } | Self::FabricReject { .. } => {
                Some(ErrorClass::ProtocolReject)
            }
            Self::LocalReject(LocalReject::Aborted | LocalReject::LinkDown) => {
                Some(ErrorClass::LinkLost)
            }
            Self::LocalReject(_) | Self::NportBusy | Self::FabricBusy => {
                Some(ErrorClass::LocalTransport)
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Reason and explanation of an LS_RJT.
    pub fn ls_rjt(&self) -> Option<LsRjt> {
        match self {
            Self::LsRjt(rjt) => Some(*rjt),
            _ => None,
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => write!(f, "success"),
            Self::LsRjt(rjt) => write!(f, "LS_RJT {}", rjt),
            Self::LocalReject(code) => write!(f, "local reject {:?}", code),
            Self::NportBusy => write!(f, "N_Port busy"),
            Self::FabricBusy => write!(f, "fabric busy"),
            Self::NportReject { temporary } => write!(f, "P_RJT (temporary={})", temporary),
            Self::FabricReject { temporary } => write!(f, "F_RJT (temporary={})", temporary),
        }
    }
}

/// Failed exchange as seen by the state machine and sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElsFailure {
    pub class: ErrorClass,
    pub status: CompletionStatus,
}

impl ElsFailure {
    /// Failure reported for exchanges lost with the link.
    pub fn link_lost() -> Self {
        Self {
            class: ErrorClass::LinkLost,
            status: CompletionStatus::LINK_DOWN,
        }
    }

    /// Failure synthesised from a synchronous transport error.
    pub fn from_transport(err: TransportError) -> Self {
        let status = CompletionStatus::LocalReject(err.into());
        let class = status.class().unwrap_or(ErrorClass::LocalTransport);
        Self { class, status }
    }
}

impl fmt::Display for ElsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.status.fmt(f)
    }
}

/// Outcome delivered to an external waiter. Exactly one per exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Success(AccPayload),
    Failed(CompletionStatus),
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(CompletionStatus::Success(AccPayload::Empty).class(), None);
        assert_eq!(
            CompletionStatus::LsRjt(LsRjt::BUSY).class(),
            Some(ErrorClass::ProtocolReject)
        );
        assert_eq!(
            CompletionStatus::LocalReject(LocalReject::Aborted).class(),
            Some(ErrorClass::LinkLost)
        );
        assert_eq!(CompletionStatus::LINK_DOWN.class(), Some(ErrorClass::LinkLost));
        assert_eq!(
            CompletionStatus::LocalReject(LocalReject::NoXri).class(),
            Some(ErrorClass::LocalTransport)
        );
        assert_eq!(CompletionStatus::FabricBusy.class(), Some(ErrorClass::LocalTransport));
    }

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(ElsFailure::from_transport(TransportError::LinkDown).class, ErrorClass::LinkLost);
        assert_eq!(
            ElsFailure::from_transport(TransportError::NoResources).status,
            CompletionStatus::LocalReject(LocalReject::NoResources)
        );
    }
}
