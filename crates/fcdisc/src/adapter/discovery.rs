// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name server discovery and RSCN passes.

use super::{Adapter, ElsResult};
use crate::els::ErrorClass;
use crate::fabric::{PortState, Topology, VportStatus};
use crate::fsm::{self, EventArg, NodeEvent};
use crate::node::{NodeFlags, NodeRef, NodeState};
use crate::protocol::params::FC4_TYPE_FCP;
use crate::protocol::{AccPayload, CtRequest, FcId, RequestPayload};
use crate::timer::{TimerId, TimerKind};
use crate::vport::VportId;
use std::collections::BTreeSet;
use tokio::time::Instant;

/// A login exchange (or its registration) is still running.
fn in_progress(state: NodeState) -> bool {
    matches!(
        state,
        NodeState::PlogiIssue
            | NodeState::AdiscIssue
            | NodeState::RegLoginIssue
            | NodeState::PrliIssue
            | NodeState::LogoIssue
    )
}

impl Adapter {
    /// Query the name server for every FCP port.
    pub(super) fn start_ns_query(&mut self, id: VportId) {
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        if vport.topology != Topology::Fabric {
            vport.rscn.clear();
            return;
        }
        vport.set_state(PortState::NsQuery);
        if vport.rscn.is_pending() && !vport.rscn.is_flushing() {
            vport.rscn.begin_flush();
        }
        self.begin_discovery(id);

        let payload = RequestPayload::Ct(CtRequest::GidFt {
            fc4_type: FC4_TYPE_FCP,
        });
        if !self.issue_to_service(id, FcId::NAME_SERVER, payload) {
            // Nothing new to learn; settle with the nodes we have.
            if let Some(vport) = self.vports.get_mut(&id) {
                vport.set_state(PortState::Discovery);
            }
        }
    }

    /// Mark a discovery run active and (re)arm its timeout.
    pub(super) fn begin_discovery(&mut self, id: VportId) {
        let deadline = Instant::now() + self.config.discovery_timeout();
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        vport.discovery.active = true;
        if let Some(previous) = vport.discovery.timer.take() {
            self.timers.cancel(previous);
        }
        vport.discovery.timer = Some(self.timers.schedule(deadline, TimerKind::DiscoveryTimeout(id)));
    }

    pub(super) fn on_gid_ft(&mut self, id: VportId, result: ElsResult) {
        let (listed, authoritative) = match result {
            Ok(AccPayload::PortIds(ids)) => (ids, true),
            Ok(_) => (Vec::new(), true),
            Err(failure) if failure.class == ErrorClass::LinkLost => return,
            // The name server knows no FCP port.
            Err(failure) if failure.class == ErrorClass::ProtocolReject => (Vec::new(), true),
            Err(failure) => {
                tracing::warn!("[disc] {} GID_FT failed: {}", id, failure.status);
                (Vec::new(), false)
            }
        };

        let (own, rscn_pass) = match self.vports.get(&id) {
            Some(vport) if vport.state == PortState::NsQuery => (
                vport.did,
                vport.rscn.is_flushing() && !vport.rscn.is_full_discovery(),
            ),
            _ => return,
        };
        tracing::debug!("[disc] {} name server lists {} ports", id, listed.len());

        let mut seen = BTreeSet::new();
        for did in listed {
            if did == own || did.is_well_known() || !did.is_assigned() || !seen.insert(did) {
                continue;
            }
            let covered = self
                .vports
                .get(&id)
                .is_some_and(|v| !rscn_pass || v.rscn.matches(did));
            if !covered {
                continue;
            }
            let node = match self.node_for(id, did) {
                Ok(node) => node,
                Err(err) => {
                    tracing::warn!("[disc] {} cannot track {}: {}", id, did, err);
                    continue;
                }
            };
            let queue = {
                let mut n = node.lock();
                let idle = matches!(n.state, NodeState::Unused | NodeState::Npr)
                    && !n.flags.contains(NodeFlags::REMOVAL_PENDING);
                if idle {
                    n.flags.insert(NodeFlags::NEEDS_DISCOVERY);
                }
                idle
            };
            if let Some(vport) = self.vports.get_mut(&id) {
                if queue && !vport.discovery.pending.contains(&did) {
                    vport.discovery.pending.push_back(did);
                }
            }
        }

        if authoritative {
            let gone: Vec<NodeRef> = match self.vports.get(&id) {
                Some(vport) => vport
                    .registry
                    .remote_ports()
                    .into_iter()
                    .filter(|node| {
                        let did = node.lock().did;
                        !seen.contains(&did) && (!rscn_pass || vport.rscn.matches(did))
                    })
                    .collect(),
                None => Vec::new(),
            };
            for node in gone {
                let did = node.lock().did;
                tracing::info!("[disc] {} {} left the fabric", id, did);
                self.remove_node(&node);
            }
        }

        if let Some(vport) = self.vports.get_mut(&id) {
            vport.set_state(PortState::Discovery);
        }
    }

    /// Remove a node; logged-in nodes go through recovery first.
    pub(super) fn remove_node(&mut self, node: &NodeRef) {
        let state = node.lock().state;
        if state == NodeState::Freed {
            return;
        }
        if state.is_ready() {
            self.dispatch(node, NodeEvent::DeviceRecovery, EventArg::None);
        }
        self.dispatch(node, NodeEvent::DeviceRm, EventArg::None);
    }

    /// Advance every running discovery.
    pub(super) fn drive_discovery(&mut self) {
        if self.unloaded || !self.link_up {
            return;
        }
        let running: Vec<VportId> = self
            .vports
            .values()
            .filter(|v| v.discovery.active && v.state == PortState::Discovery)
            .map(|v| v.id)
            .collect();
        for id in running {
            self.discovery_progress(id);
        }
    }

    fn discovery_progress(&mut self, id: VportId) {
        let limit = self.config.max_concurrent_discovery;
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };

        let settled: Vec<FcId> = vport
            .discovery
            .in_flight
            .iter()
            .copied()
            .filter(|did| match vport.registry.find(*did) {
                Some(node) => {
                    let n = node.lock();
                    !in_progress(n.state) && !n.flags.contains(NodeFlags::DELAY_ARMED)
                }
                None => true,
            })
            .collect();
        for did in settled {
            vport.discovery.in_flight.remove(&did);
        }

        loop {
            let Some(vport) = self.vports.get_mut(&id) else {
                return;
            };
            if vport.discovery.in_flight.len() >= limit {
                break;
            }
            let Some(did) = vport.discovery.pending.pop_front() else {
                break;
            };
            let Some(node) = vport.registry.find(did) else {
                continue;
            };
            if self.login_node(&node) {
                if let Some(vport) = self.vports.get_mut(&id) {
                    vport.discovery.in_flight.insert(did);
                }
            }
        }

        let idle = self.vports.get(&id).is_some_and(|v| {
            v.discovery.active && v.discovery.pending.is_empty() && v.discovery.in_flight.is_empty()
        });
        if idle {
            self.discovery_done(id);
        }
    }

    /// Start a login with `node`: ADISC when a registered login can be
    /// revalidated, PLOGI otherwise. Returns false if nothing was started.
    pub(super) fn login_node(&mut self, node: &NodeRef) -> bool {
        let use_adisc = self.config.use_adisc;
        let transition = {
            let mut n = node.lock();
            if n.flags.intersects(NodeFlags::REMOVAL_PENDING | NodeFlags::DISABLED) {
                return false;
            }
            let adisc = use_adisc
                && !n.is_fabric_service()
                && n.flags.contains(NodeFlags::ADISC_CAPABLE)
                && n.login_registered;
            let started = if adisc { fsm::start_adisc(&mut n) } else { None };
            started.or_else(|| fsm::start_plogi(&mut n))
        };
        match transition {
            Some(transition) => {
                self.apply(node, transition, None);
                true
            }
            None => false,
        }
    }

    fn discovery_done(&mut self, id: VportId) {
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        let rerun = if vport.rscn.is_flushing() {
            vport.rscn.complete_flush()
        } else {
            vport.rscn.is_pending()
        };
        if let Some(timer) = vport.discovery.reset() {
            self.timers.cancel(timer);
        }
        if rerun {
            tracing::debug!("[disc] {} changes arrived during discovery, running again", id);
            self.process_rscn(id);
            return;
        }

        vport.set_state(PortState::Ready);
        vport.set_status(VportStatus::Active);
        let ready = vport
            .registry
            .remote_ports()
            .iter()
            .filter(|node| node.lock().state.is_ready())
            .count();
        tracing::info!("[disc] {} discovery complete, {} remote ports logged in", id, ready);
        if id.is_physical() {
            self.start_pending_vports();
        }
    }

    /// Recover the nodes an RSCN batch covers and query the name server again.
    pub(super) fn process_rscn(&mut self, id: VportId) {
        let Some(vport) = self.vports.get(&id) else {
            return;
        };
        let affected: Vec<NodeRef> = vport
            .registry
            .remote_ports()
            .into_iter()
            .filter(|node| {
                let n = node.lock();
                !matches!(n.state, NodeState::Unused | NodeState::Freed) && vport.rscn.matches(n.did)
            })
            .collect();
        tracing::info!(
            "[rscn] {} processing ({} affected nodes{})",
            id,
            affected.len(),
            if vport.rscn.is_full_discovery() {
                ", full discovery"
            } else {
                ""
            }
        );
        for node in affected {
            self.dispatch(&node, NodeEvent::DeviceRecovery, EventArg::None);
        }
        self.start_ns_query(id);
    }

    pub(super) fn on_discovery_timeout(&mut self, id: VportId, timer: TimerId) {
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        if vport.discovery.timer != Some(timer) {
            return;
        }
        vport.discovery.timer = None;
        tracing::warn!(
            "[disc] {} discovery timed out ({} pending, {} in flight)",
            id,
            vport.discovery.pending.len(),
            vport.discovery.in_flight.len()
        );
        vport.discovery.pending.clear();
        let stuck: Vec<NodeRef> = std::mem::take(&mut vport.discovery.in_flight)
            .into_iter()
            .filter_map(|did| vport.registry.find(did))
            .collect();
        for node in stuck {
            self.els.abort_node(&node, None);
            let state = node.lock().state;
            if in_progress(state) {
                self.dispatch(&node, NodeEvent::DeviceRecovery, EventArg::None);
            }
        }
        self.discovery_done(id);
    }
}
