// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote port (node) objects.
//!
//! A node is shared as [`NodeRef`] (`Arc<Mutex<Node>>`). The registry holds one
//! reference, every outstanding exchange holds one more, so the strong count is
//! the node's reference count. Timers only hold `Weak` handles.

use crate::protocol::{Command, ElsCommand, Fc4Roles, FcId, ServiceParams, Wwn};
use crate::timer::TimerId;
use crate::transport::LoginHandle;
use crate::vport::VportId;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a node.
pub type NodeRef = Arc<Mutex<Node>>;

/// Discovery state, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeState {
    Unused,
    PlogiIssue,
    AdiscIssue,
    RegLoginIssue,
    PrliIssue,
    LogoIssue,
    Unmapped,
    Mapped,
    Npr,
    Freed,
}

impl NodeState {
    pub const ALL: [NodeState; 10] = [
        NodeState::Unused,
        NodeState::PlogiIssue,
        NodeState::AdiscIssue,
        NodeState::RegLoginIssue,
        NodeState::PrliIssue,
        NodeState::LogoIssue,
        NodeState::Unmapped,
        NodeState::Mapped,
        NodeState::Npr,
        NodeState::Freed,
    ];

    /// Node is logged in and visible to the upper layer.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Mapped | Self::Unmapped)
    }

    /// A login handle may exist in this state.
    pub fn may_hold_login(self) -> bool {
        self >= Self::PlogiIssue && self < Self::Freed
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unused => "UNUSED",
            Self::PlogiIssue => "PLOGI",
            Self::AdiscIssue => "ADISC",
            Self::RegLoginIssue => "REGLOGIN",
            Self::PrliIssue => "PRLI",
            Self::LogoIssue => "LOGO",
            Self::Unmapped => "UNMAPPED",
            Self::Mapped => "MAPPED",
            Self::Npr => "NPR",
            Self::Freed => "FREED",
        })
    }
}

bitflags! {
    /// Pending-exchange and discovery flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u32 {
        const PLOGI_SENT = 1 << 0;
        const PRLI_SENT = 1 << 1;
        const ADISC_SENT = 1 << 2;
        const LOGO_SENT = 1 << 3;
        /// Name-server or RSCN processing wants this node (re)discovered.
        const NEEDS_DISCOVERY = 1 << 8;
        /// Login still registered; ADISC may revalidate it.
        const ADISC_CAPABLE = 1 << 9;
        /// Retry-delay timer armed.
        const DELAY_ARMED = 1 << 10;
        /// Remove once the last exchange completes.
        const REMOVAL_PENDING = 1 << 11;
        /// Placeholder kept after removal to absorb late frames.
        const DISABLED = 1 << 12;
        /// We sent the PLOGI that created the current login.
        const LOCAL_PLOGI = 1 << 13;
        /// Login was accepted with a registration attached.
        const ACC_REG_LOGIN = 1 << 14;

        const PENDING = Self::PLOGI_SENT.bits()
            | Self::PRLI_SENT.bits()
            | Self::ADISC_SENT.bits()
            | Self::LOGO_SENT.bits();
    }
}

impl NodeFlags {
    /// Pending bit tracked for an outbound command, if any.
    pub fn pending_for(command: Command) -> NodeFlags {
        match command {
            Command::Els(ElsCommand::Plogi) => Self::PLOGI_SENT,
            Command::Els(ElsCommand::Prli) => Self::PRLI_SENT,
            Command::Els(ElsCommand::Adisc) => Self::ADISC_SENT,
            Command::Els(ElsCommand::Logo) => Self::LOGO_SENT,
            _ => Self::empty(),
        }
    }
}

/// Remote port object.
#[derive(Debug)]
pub struct Node {
    /// Port the node was discovered on.
    pub vport: VportId,
    /// Current N_Port ID; moves with identity merges.
    pub did: FcId,
    /// Port name from the last login, zero until known.
    pub wwpn: Wwn,
    /// Node name from the last login.
    pub wwnn: Wwn,
    /// Discovery state; only the state machine writes it.
    pub state: NodeState,
    /// Pending exchange bits and discovery markers.
    pub flags: NodeFlags,
    /// Consecutive failed logins since the last success.
    pub retry: u32,
    /// Armed relogin timer, cancelled on any state change that makes it moot.
    pub retry_timer: Option<TimerId>,
    /// Hardware login handle (RPI); reserved before registration completes.
    pub login: Option<LoginHandle>,
    /// Registration of `login` confirmed by the transport.
    pub login_registered: bool,
    /// FCP roles announced by PRLI.
    pub roles: Fc4Roles,
    /// Service parameters of the accepted login.
    pub service_params: Option<ServiceParams>,
    /// Exchanges currently owned by the ELS engine for this node.
    pub outstanding: u32,
}

impl Node {
    /// Unused node bound to `did`, no identity yet.
    pub fn new(vport: VportId, did: FcId) -> Self {
        Self {
            vport,
            did,
            wwpn: Wwn::ZERO,
            wwnn: Wwn::ZERO,
            state: NodeState::Unused,
            flags: NodeFlags::empty(),
            retry: 0,
            retry_timer: None,
            login: None,
            login_registered: false,
            roles: Fc4Roles::default(),
            service_params: None,
            outstanding: 0,
        }
    }

    /// Wrap into the shared handle the registry and exchanges hold.
    pub fn into_ref(self) -> NodeRef {
        Arc::new(Mutex::new(self))
    }

    /// Fabric service node (name server, fabric controller, ...).
    pub fn is_fabric_service(&self) -> bool {
        self.did.is_well_known()
    }

    /// Whether an exchange of `command` is in flight.
    pub fn has_pending(&self, command: Command) -> bool {
        let bit = NodeFlags::pending_for(command);
        !bit.is_empty() && self.flags.contains(bit)
    }

    /// Snapshot for listeners.
    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            vport: self.vport,
            did: self.did,
            wwpn: self.wwpn,
            wwnn: self.wwnn,
            state: self.state,
            flags: self.flags,
            login: self.login,
            login_registered: self.login_registered,
            roles: self.roles,
            outstanding: self.outstanding,
        }
    }
}

/// Point-in-time copy of a node, handed to listeners and snapshots. Fields
/// mirror [`Node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub vport: VportId,
    pub did: FcId,
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    pub state: NodeState,
    pub flags: NodeFlags,
    pub login: Option<LoginHandle>,
    pub login_registered: bool,
    pub roles: Fc4Roles,
    /// Exchanges in flight when the snapshot was taken.
    pub outstanding: u32,
}

/// Upper-layer hook for attaching/detaching transport-visible remote ports.
pub trait RemotePortListener: Send + Sync {
    /// Called after every state change.
    fn on_node_state_changed(&self, node: &NodeInfo, old: NodeState);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering_matches_lifecycle() {
        assert!(NodeState::Unused < NodeState::PlogiIssue);
        assert!(NodeState::Npr < NodeState::Freed);
        assert!(!NodeState::Unused.may_hold_login());
        assert!(NodeState::PlogiIssue.may_hold_login());
        assert!(NodeState::Npr.may_hold_login());
        assert!(!NodeState::Freed.may_hold_login());
    }

    #[test]
    fn test_pending_bits() {
        let mut node = Node::new(VportId::PHYSICAL, FcId::new(0x010200));
        assert!(!node.has_pending(ElsCommand::Plogi.into()));
        node.flags.insert(NodeFlags::PLOGI_SENT);
        assert!(node.has_pending(ElsCommand::Plogi.into()));
        assert!(!node.has_pending(ElsCommand::Echo.into()));
        assert!(node.flags.intersects(NodeFlags::PENDING));
    }

    #[test]
    fn test_ready_states() {
        assert!(NodeState::Mapped.is_ready());
        assert!(NodeState::Unmapped.is_ready());
        assert!(!NodeState::Npr.is_ready());
    }
}
