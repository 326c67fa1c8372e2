// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Physical and virtual (NPIV) port contexts.

use crate::fabric::{PortState, Topology, VportStatus};
use crate::node::NodeState;
use crate::protocol::{FcId, ServiceParams, Wwn};
use crate::registry::NodeRegistry;
use crate::rscn::RscnBatch;
use crate::timer::TimerId;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// Port index. Index 0 is the physical port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VportId(pub u16);

impl VportId {
    /// The physical port.
    pub const PHYSICAL: VportId = VportId(0);

    pub fn is_physical(self) -> bool {
        self == Self::PHYSICAL
    }
}

impl fmt::Display for VportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vport{}", self.0)
    }
}

/// Bookkeeping of one name-server discovery run.
#[derive(Debug, Default)]
pub struct DiscoveryRun {
    /// A run started and has not completed.
    pub active: bool,
    /// Addresses waiting for a PLOGI/ADISC slot.
    pub pending: VecDeque<FcId>,
    /// Addresses with a login in flight.
    pub in_flight: BTreeSet<FcId>,
    /// Discovery timeout.
    pub timer: Option<TimerId>,
}

impl DiscoveryRun {
    /// Forget the run. Returns the timeout to cancel.
    pub fn reset(&mut self) -> Option<TimerId> {
        self.active = false;
        self.pending.clear();
        self.in_flight.clear();
        self.timer.take()
    }
}

/// Per-port state.
#[derive(Debug)]
pub struct Vport {
    pub id: VportId,
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    /// Assigned N_Port ID.
    pub did: FcId,
    /// N_Port ID of the previous fabric login.
    pub prev_did: FcId,
    /// Fabric or point-to-point, learned from the login accept.
    pub topology: Topology,
    /// Fabric grants additional N_Port IDs.
    pub fabric_npiv: bool,
    /// Local NPIV switch (physical port only).
    pub npiv_enabled: bool,
    /// Fabric name from the last fabric login, zero before the first.
    pub fabric_name: Wwn,
    /// Service parameters from the last fabric accept.
    pub fabric_params: Option<ServiceParams>,
    pub state: PortState,
    pub status: VportStatus,
    /// VPI registration confirmed since the last link up.
    pub vpi_registered: bool,
    /// Remote ports seen through this port.
    pub registry: NodeRegistry,
    pub rscn: RscnBatch,
    pub discovery: DiscoveryRun,
}

impl Vport {
    pub fn new(
        id: VportId,
        wwpn: Wwn,
        wwnn: Wwn,
        max_nodes: usize,
        rscn_capacity: usize,
    ) -> Self {
        Self {
            id,
            wwpn,
            wwnn,
            did: FcId::UNASSIGNED,
            prev_did: FcId::UNASSIGNED,
            topology: Topology::Unknown,
            fabric_npiv: false,
            npiv_enabled: false,
            fabric_name: Wwn::ZERO,
            fabric_params: None,
            state: PortState::LinkDown,
            status: VportStatus::Unknown,
            vpi_registered: false,
            registry: NodeRegistry::new(id, max_nodes),
            rscn: RscnBatch::new(rscn_capacity),
            discovery: DiscoveryRun::default(),
        }
    }

    /// Move the login sequencer, logging the transition.
    pub fn set_state(&mut self, state: PortState) {
        if self.state != state {
            tracing::debug!("[fabric] {} {} -> {}", self.id, self.state, state);
            self.state = state;
        }
    }

    /// Update the user-visible status.
    pub fn set_status(&mut self, status: VportStatus) {
        if self.status != status {
            tracing::info!("[fabric] {} status {}", self.id, status);
            self.status = status;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == PortState::Ready
    }

    /// Whether the port reached a terminal failure status.
    pub fn has_failed(&self) -> bool {
        matches!(
            self.status,
            VportStatus::Failed(_)
                | VportStatus::NoFabricSupport
                | VportStatus::NoFabricResources
                | VportStatus::FabricRejectedWwn
                | VportStatus::Disabled
        )
    }

    /// PLOGIs and ADISCs currently in flight for discovery.
    pub fn discovery_counts(&self) -> (usize, usize) {
        let mut plogi = 0;
        let mut adisc = 0;
        for did in &self.discovery.in_flight {
            if let Some(node) = self.registry.find(*did) {
                match node.lock().state {
                    NodeState::AdiscIssue => adisc += 1,
                    NodeState::PlogiIssue => plogi += 1,
                    _ => {}
                }
            }
        }
        (plogi, adisc)
    }
}
