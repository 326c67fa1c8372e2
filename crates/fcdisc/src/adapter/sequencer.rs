// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fabric login sequence.
//!
//! Physical port: FLOGI, VFI and VPI registration, name server login,
//! RFT_ID/RFF_ID, SCR, then name server discovery. Virtual ports follow the
//! same path with FDISC and without VFI registration. Point-to-point links
//! skip fabric registration entirely.

use super::{local_params, Adapter, ElsResult};
use crate::els::{ElsFailure, ErrorClass, FailureHint, Finished};
use crate::error::{FcError, TransportError};
use crate::fabric::{
    classify_login, fabric_changed, FabricLogin, FabricParams, PortState, Topology, VportStatus,
};
use crate::fsm::{EventArg, NodeEvent};
use crate::node::{NodeFlags, NodeRef, NodeState};
use crate::protocol::params::FC4_TYPE_FCP;
use crate::protocol::{
    AccPayload, Command, CtCommand, CtRequest, ElsCommand, FcId, RequestPayload, ServiceParams,
};
use crate::vport::VportId;

impl Adapter {
    // ========================================================================
    // Link events
    // ========================================================================

    /// Link came up: start the fabric login of the physical port.
    pub fn link_up(&mut self) {
        if self.unloaded || self.link_up {
            return;
        }
        self.link_up = true;
        self.els.set_link(true);
        tracing::info!("[fabric] {} link up", self.config.name);
        if let Some(vport) = self.vports.get_mut(&VportId::PHYSICAL) {
            vport.set_state(PortState::LocalConfigLink);
            vport.set_status(VportStatus::Initializing);
        }
        self.start_fabric_login(VportId::PHYSICAL);
    }

    /// Link went down: fail every exchange, stop discovery and put every
    /// node into recovery. Logins stay registered for ADISC.
    pub fn link_down(&mut self) {
        if self.unloaded {
            return;
        }
        self.link_up = false;
        self.els.set_link(false);
        tracing::info!("[fabric] {} link down", self.config.name);

        for vport in self.vports.values_mut() {
            vport.rscn.clear();
            if let Some(timer) = vport.discovery.reset() {
                self.timers.cancel(timer);
            }
            vport.vpi_registered = false;
            vport.set_state(PortState::LinkDown);
            if vport.status != VportStatus::Disabled {
                vport.set_status(VportStatus::LinkDown);
            }
        }

        for done in self.els.fail_all_link_lost() {
            self.route_result(done, Err(ElsFailure::link_lost()), None);
        }

        let nodes: Vec<NodeRef> = self
            .vports
            .values()
            .flat_map(|v| v.registry.nodes())
            .collect();
        for node in nodes {
            let state = node.lock().state;
            if !matches!(state, NodeState::Unused | NodeState::Freed) {
                self.dispatch(&node, NodeEvent::DeviceRecovery, EventArg::None);
            }
        }
    }

    // ========================================================================
    // FLOGI / FDISC
    // ========================================================================

    pub(super) fn start_fabric_login(&mut self, id: VportId) {
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        let params = local_params(&self.config, vport);
        let (state, payload) = if id.is_physical() {
            (PortState::Flogi, RequestPayload::Flogi(params))
        } else {
            (PortState::Fdisc, RequestPayload::Fdisc(params))
        };
        vport.set_state(state);
        vport.set_status(VportStatus::Initializing);

        let node = match self.node_for(id, FcId::FABRIC) {
            Ok(node) => node,
            Err(err) => {
                self.fail_vport(id, VportStatus::Failed(format!("no fabric node: {}", err)));
                return;
            }
        };
        if let Err(err) = self.els.issue(id, FcId::UNASSIGNED, &node, payload, None) {
            tracing::warn!("[fabric] {} fabric login not sent: {}", id, err);
            if !matches!(err, FcError::LinkDown | FcError::Unloading) {
                self.fail_vport(id, VportStatus::Failed(err.to_string()));
            }
        }
    }

    pub(super) fn on_fabric_login(&mut self, id: VportId, result: ElsResult, hint: Option<FailureHint>) {
        let (params, d_id) = match result {
            Ok(AccPayload::Login { params, d_id }) => (params, d_id),
            Ok(_) => {
                self.fail_vport(id, VportStatus::Failed("malformed fabric login accept".into()));
                return;
            }
            Err(failure) if failure.class == ErrorClass::LinkLost => return,
            Err(failure) => {
                let command = if id.is_physical() {
                    ElsCommand::Flogi
                } else {
                    ElsCommand::Fdisc
                };
                let status = hint.map_or_else(
                    || VportStatus::Failed(format!("{} failed: {}", command, failure.status)),
                    VportStatus::from,
                );
                tracing::warn!("[fabric] {} {} failed permanently: {}", id, command, failure.status);
                if id.is_physical() {
                    self.link_down();
                }
                self.fail_vport(id, status);
                return;
            }
        };

        let Some(vport) = self.vports.get(&id) else {
            return;
        };
        match classify_login(vport.wwpn, &params, d_id) {
            FabricLogin::Fabric(fabric) => self.fabric_login_accepted(id, params, fabric),
            FabricLogin::PointToPointOriginator => self.point_to_point(id, params, true),
            FabricLogin::PointToPointResponder => self.point_to_point(id, params, false),
            FabricLogin::Loopback => {
                tracing::warn!("[fabric] {} received its own fabric login", id);
                self.fail_vport(id, VportStatus::Failed("loopback".into()));
            }
        }
    }

    fn fabric_login_accepted(&mut self, id: VportId, params: ServiceParams, fabric: FabricParams) {
        let changed = match self.vports.get(&id) {
            Some(vport) => fabric_changed(vport.fabric_name, vport.did, &fabric),
            None => return,
        };
        if changed {
            tracing::info!("[fabric] {} fabric changed, dropping every login", id);
            self.recover_nodes(id, true);
        }

        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        vport.prev_did = vport.did;
        vport.did = fabric.did;
        vport.fabric_name = fabric.fabric_name;
        vport.fabric_npiv = fabric.npiv;
        vport.fabric_params = Some(params);
        vport.topology = Topology::Fabric;
        vport.set_state(PortState::FabricConfigLink);
        tracing::info!(
            "[fabric] {} logged in to fabric {} as {} (npiv {})",
            id,
            fabric.fabric_name,
            fabric.did,
            fabric.npiv
        );

        let registered = if id.is_physical() {
            self.transport.register_vfi(id, fabric.fabric_name)
        } else {
            self.transport.register_vpi(id, fabric.did)
        };
        if let Err(err) = registered {
            self.registration_failed(id, err);
        }
    }

    /// Drive every node of `id` through recovery, optionally dropping the
    /// logins they hold.
    fn recover_nodes(&mut self, id: VportId, unregister: bool) {
        let nodes = self
            .vports
            .get(&id)
            .map(|v| v.registry.nodes())
            .unwrap_or_default();
        for node in nodes {
            let state = node.lock().state;
            if matches!(state, NodeState::Unused | NodeState::Freed) {
                continue;
            }
            self.dispatch(&node, NodeEvent::DeviceRecovery, EventArg::None);
            if unregister {
                let handle = {
                    let mut n = node.lock();
                    n.login_registered = false;
                    n.flags.remove(NodeFlags::ADISC_CAPABLE);
                    n.login.take()
                };
                if let Some(handle) = handle {
                    self.unregister_login(id, handle);
                }
            }
        }
    }

    // ========================================================================
    // VFI / VPI registration
    // ========================================================================

    pub(super) fn on_reg_vfi(&mut self, id: VportId, result: Result<(), TransportError>) {
        let did = match self.vports.get(&id) {
            Some(vport) if vport.state == PortState::FabricConfigLink => vport.did,
            _ => return,
        };
        let registered = result.and_then(|()| self.transport.register_vpi(id, did));
        if let Err(err) = registered {
            self.registration_failed(id, err);
        }
    }

    pub(super) fn on_reg_vpi(&mut self, id: VportId, result: Result<(), TransportError>) {
        let active = self
            .vports
            .get(&id)
            .is_some_and(|v| v.state == PortState::FabricConfigLink);
        if !active {
            return;
        }
        if let Err(err) = result {
            self.registration_failed(id, err);
            return;
        }
        if let Some(vport) = self.vports.get_mut(&id) {
            vport.vpi_registered = true;
        }
        self.start_ns_login(id);
    }

    fn registration_failed(&mut self, id: VportId, err: TransportError) {
        tracing::warn!("[fabric] {} fabric registration failed: {}", id, err);
        self.fail_vport(id, VportStatus::Failed(format!("registration failed: {}", err)));
    }

    // ========================================================================
    // Name server login and registration
    // ========================================================================

    fn start_ns_login(&mut self, id: VportId) {
        if let Some(vport) = self.vports.get_mut(&id) {
            vport.set_state(PortState::NsRegistration);
        }
        let ns = match self.node_for(id, FcId::NAME_SERVER) {
            Ok(node) => node,
            Err(err) => {
                self.fail_vport(id, VportStatus::Failed(format!("no name server node: {}", err)));
                return;
            }
        };
        let ready = ns.lock().state.is_ready();
        if ready {
            self.ns_ready(id);
        } else if !self.login_node(&ns) {
            tracing::debug!("[fabric] {} name server login already in progress", id);
        }

        if self.config.fdmi_enabled {
            match self.node_for(id, FcId::MANAGEMENT_SERVER) {
                Ok(ms) => {
                    self.login_node(&ms);
                }
                Err(err) => tracing::warn!("[fabric] {} no management server node: {}", id, err),
            }
        }
    }

    /// The name server node changed state during registration.
    pub(super) fn name_server_changed(&mut self, id: VportId, state: NodeState, flags: NodeFlags) {
        match self.vports.get(&id) {
            Some(vport) if vport.state == PortState::NsRegistration => {}
            _ => return,
        }
        if state.is_ready() {
            self.ns_ready(id);
        } else if state == NodeState::Npr && !flags.contains(NodeFlags::DELAY_ARMED) {
            self.fail_vport(id, VportStatus::Failed("name server login failed".into()));
        }
    }

    fn ns_ready(&mut self, id: VportId) {
        let Some(did) = self.vports.get(&id).map(|v| v.did) else {
            return;
        };
        tracing::info!("[fabric] {} name server login complete", id);
        let payload = RequestPayload::Ct(CtRequest::RftId {
            port_id: did,
            fc4_types: vec![FC4_TYPE_FCP],
        });
        if !self.issue_to_service(id, FcId::NAME_SERVER, payload) {
            self.next_registration_step(id, CtCommand::RftId.into());
        }
    }

    pub(super) fn on_ns_registration(&mut self, done: &Finished, result: ElsResult) {
        if let Err(failure) = &result {
            if failure.class == ErrorClass::LinkLost {
                return;
            }
            // Registration failures do not stop discovery.
            tracing::warn!("[fabric] {} {} failed: {}", done.vport, done.command, failure.status);
        }
        self.next_registration_step(done.vport, done.command);
    }

    /// RFT_ID -> RFF_ID -> SCR -> GID_FT.
    fn next_registration_step(&mut self, id: VportId, after: Command) {
        let did = match self.vports.get(&id) {
            Some(vport) if vport.state == PortState::NsRegistration => vport.did,
            _ => return,
        };
        match after {
            Command::Ct(CtCommand::RftId) => {
                let payload = RequestPayload::Ct(CtRequest::RffId {
                    port_id: did,
                    fc4_type: FC4_TYPE_FCP,
                    roles: self.config.roles(),
                });
                if !self.issue_to_service(id, FcId::NAME_SERVER, payload) {
                    self.next_registration_step(id, CtCommand::RffId.into());
                }
            }
            Command::Ct(CtCommand::RffId) => {
                if !self.issue_to_service(id, FcId::FABRIC_CONTROLLER, RequestPayload::Scr) {
                    self.start_ns_query(id);
                }
            }
            _ => self.start_ns_query(id),
        }
    }

    // ========================================================================
    // Point-to-point
    // ========================================================================

    fn point_to_point(&mut self, id: VportId, params: ServiceParams, originator: bool) {
        if !id.is_physical() {
            self.fail_vport(id, VportStatus::NoFabricSupport);
            return;
        }
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        vport.topology = Topology::PointToPoint;
        vport.fabric_npiv = false;
        vport.fabric_name = params.wwnn;
        vport.fabric_params = Some(params);

        if !originator {
            // The peer logs in to us; our address comes with its PLOGI.
            vport.did = FcId::UNASSIGNED;
            vport.set_state(PortState::Ready);
            vport.set_status(VportStatus::Active);
            tracing::info!("[fabric] {} point-to-point, waiting for peer {}", id, params.wwpn);
            self.start_pending_vports();
            return;
        }

        vport.did = FcId::P2P_LOCAL;
        vport.set_state(PortState::Discovery);
        tracing::info!("[fabric] {} point-to-point, logging in to peer {}", id, params.wwpn);
        self.begin_discovery(id);
        match self.node_for(id, FcId::P2P_REMOTE) {
            Ok(node) => {
                node.lock().flags.insert(NodeFlags::NEEDS_DISCOVERY);
                if let Some(vport) = self.vports.get_mut(&id) {
                    vport.discovery.pending.push_back(FcId::P2P_REMOTE);
                }
            }
            Err(err) => tracing::warn!("[fabric] {} no peer node: {}", id, err),
        }
    }

    // ========================================================================
    // Virtual ports and failures
    // ========================================================================

    /// Start FDISC on virtual ports that are waiting for the physical port.
    pub(super) fn start_pending_vports(&mut self) {
        let Some(physical) = self.vports.get(&VportId::PHYSICAL) else {
            return;
        };
        if !self.link_up || !physical.is_ready() {
            return;
        }
        let fabric = physical.topology == Topology::Fabric && physical.fabric_npiv;
        let waiting: Vec<VportId> = self
            .vports
            .values()
            .filter(|v| {
                !v.id.is_physical()
                    && v.state == PortState::LinkDown
                    && matches!(
                        v.status,
                        VportStatus::Unknown | VportStatus::Initializing | VportStatus::LinkDown
                    )
            })
            .map(|v| v.id)
            .collect();
        for id in waiting {
            if fabric {
                self.start_fabric_login(id);
            } else if let Some(vport) = self.vports.get_mut(&id) {
                vport.set_status(VportStatus::NoFabricSupport);
            }
        }
    }

    pub(super) fn fail_vport(&mut self, id: VportId, status: VportStatus) {
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        tracing::warn!("[fabric] {} failed: {}", id, status);
        if let Some(timer) = vport.discovery.reset() {
            self.timers.cancel(timer);
        }
        vport.set_state(PortState::LinkDown);
        vport.set_status(status);
    }
}
