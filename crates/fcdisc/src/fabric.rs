// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fabric login sequencing: port states, user-visible vport status and the
//! decisions taken on a FLOGI/FDISC accept.
//!
//! The adapter drives the sequence (see `adapter::sequencer`); this module
//! holds the parts that do not need the exchange engine.

use crate::els::FailureHint;
use crate::protocol::{FcId, ServiceParams, Wwn};
use serde::Serialize;
use std::fmt;

/// Port login progress, in sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    LinkDown,
    LocalConfigLink,
    Flogi,
    Fdisc,
    /// VFI/VPI registration.
    FabricConfigLink,
    NsRegistration,
    NsQuery,
    Discovery,
    Ready,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LinkDown => "link-down",
            Self::LocalConfigLink => "config-link",
            Self::Flogi => "flogi",
            Self::Fdisc => "fdisc",
            Self::FabricConfigLink => "fabric-config-link",
            Self::NsRegistration => "ns-registration",
            Self::NsQuery => "ns-query",
            Self::Discovery => "discovery",
            Self::Ready => "ready",
        })
    }
}

/// Operator-visible vport status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VportStatus {
    Unknown,
    Initializing,
    Active,
    LinkDown,
    Disabled,
    NoFabricSupport,
    NoFabricResources,
    FabricRejectedWwn,
    Failed(String),
}

impl From<FailureHint> for VportStatus {
    fn from(hint: FailureHint) -> Self {
        match hint {
            FailureHint::NoFabricResources => Self::NoFabricResources,
            FailureHint::FabricRejectedWwn => Self::FabricRejectedWwn,
        }
    }
}

impl fmt::Display for VportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Initializing => f.write_str("initializing"),
            Self::Active => f.write_str("active"),
            Self::LinkDown => f.write_str("link down"),
            Self::Disabled => f.write_str("disabled"),
            Self::NoFabricSupport => f.write_str("no fabric support"),
            Self::NoFabricResources => f.write_str("no fabric resources"),
            Self::FabricRejectedWwn => f.write_str("fabric rejected WWN"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Link topology learned from the fabric login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Unknown,
    Fabric,
    PointToPoint,
}

/// Fabric parameters recorded from an F_Port accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricParams {
    /// Address granted to the local port.
    pub did: FcId,
    pub fabric_name: Wwn,
    /// Fabric grants additional N_Port IDs through FDISC.
    pub npiv: bool,
    pub e_d_tov_ms: u32,
    pub r_a_tov_ms: u32,
}

/// What a FLOGI/FDISC accept tells us about the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricLogin {
    /// An F_Port answered.
    Fabric(FabricParams),
    /// An N_Port answered; we have the higher WWPN and originate the PLOGI.
    PointToPointOriginator,
    /// An N_Port answered; the peer has the higher WWPN and logs in to us.
    PointToPointResponder,
    /// Our own FLOGI came back.
    Loopback,
}

/// Classify a FLOGI/FDISC accept received by the port named `local_wwpn`.
/// `d_id` is the destination of the accept frame.
pub fn classify_login(local_wwpn: Wwn, acc: &ServiceParams, d_id: FcId) -> FabricLogin {
    if acc.fport {
        return FabricLogin::Fabric(FabricParams {
            did: d_id,
            fabric_name: acc.wwnn,
            npiv: acc.multiple_nport_ids,
            e_d_tov_ms: acc.e_d_tov_ms,
            r_a_tov_ms: acc.r_a_tov_ms,
        });
    }
    match local_wwpn.cmp(&acc.wwpn) {
        std::cmp::Ordering::Greater => FabricLogin::PointToPointOriginator,
        std::cmp::Ordering::Less => FabricLogin::PointToPointResponder,
        std::cmp::Ordering::Equal => FabricLogin::Loopback,
    }
}

/// Whether a fabric re-login invalidates existing remote port logins.
///
/// A first login (no previous fabric name) never does.
pub fn fabric_changed(prev_name: Wwn, prev_did: FcId, current: &FabricParams) -> bool {
    if prev_name.is_zero() {
        return false;
    }
    prev_name != current.fabric_name || (prev_did.is_assigned() && prev_did != current.did)
}
