// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-adapter discovery engine.
//!
//! [`Adapter`] owns the vports, node registries, exchange table, RSCN batches
//! and timers of one HBA. Transport events, timer expirations and
//! administrative requests are processed one at a time; [`spawn`] runs the
//! adapter as a tokio actor, or it can be embedded and driven synchronously.
//!
//! State machine actions are executed here. Node locks are never held across
//! a call into the exchange engine or the transport.

pub mod actor;
mod discovery;
mod inbound;
mod sequencer;

pub use actor::{spawn, AdapterHandle};

use crate::config::{ConfigError, EngineConfig};
use crate::els::{
    CompletionOutcome, ElsEngine, ElsFailure, ExchangeOutcome, FailureHint, Finished, RetryPolicy,
};
use crate::error::{FcError, Result, TransportError, ValidationError};
use crate::fabric::{PortState, Topology, VportStatus};
use crate::fsm::{self, Action, EventArg, FsmContext, NodeEvent, Transition};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::node::{NodeFlags, NodeInfo, NodeRef, NodeState, RemotePortListener};
use crate::protocol::{
    AccPayload, AdiscParams, Command, CtCommand, ElsCommand, FcId, InboundFrame, LsRjt,
    PrliParams, Reply, RequestPayload, ServiceParams, Wwn,
};
use crate::timer::{TimerId, TimerKind, Timers};
use crate::transport::{ElsReply, ExchangeId, LoginHandle, Transport, TransportEvent};
use crate::vport::{Vport, VportId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Result of a finished exchange as seen by the state machine.
pub(crate) type ElsResult = std::result::Result<AccPayload, ElsFailure>;

/// Point-in-time view of one vport.
#[derive(Debug, Clone)]
pub struct VportSnapshot {
    pub id: VportId,
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    /// Assigned N_Port ID, unassigned before login.
    pub did: FcId,
    pub state: PortState,
    pub status: VportStatus,
    pub topology: Topology,
    pub fabric_name: Wwn,
    /// Every bound node, fabric services included.
    pub nodes: Vec<NodeInfo>,
}

impl VportSnapshot {
    /// Nodes logged in and visible to the upper layer.
    pub fn ready_nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes
            .iter()
            .filter(|n| n.state.is_ready() && !n.did.is_well_known())
    }
}

/// Point-in-time view of the adapter.
#[derive(Debug, Clone)]
pub struct AdapterSnapshot {
    /// Adapter name from the configuration.
    pub name: String,
    pub link_up: bool,
    pub unloaded: bool,
    /// Every vport is ready or has failed.
    pub settled: bool,
    /// Exchanges tracked by the ELS engine.
    pub outstanding: usize,
    /// Armed timers: retries, discovery timeouts.
    pub timers: usize,
    pub vports: Vec<VportSnapshot>,
    pub metrics: MetricsSnapshot,
}

impl AdapterSnapshot {
    /// View of one vport, if it exists.
    pub fn vport(&self, id: VportId) -> Option<&VportSnapshot> {
        self.vports.iter().find(|v| v.id == id)
    }
}

/// Local service parameters advertised by `vport`.
pub(crate) fn local_params(config: &EngineConfig, vport: &Vport) -> ServiceParams {
    ServiceParams::local(vport.wwpn, vport.wwnn, config.e_d_tov_ms, config.r_a_tov_ms)
}

fn issue_failure(err: &FcError) -> ElsFailure {
    match err {
        FcError::Transport(err) => ElsFailure::from_transport(err.clone()),
        _ => ElsFailure::link_lost(),
    }
}

/// One HBA: physical port, virtual ports and everything hanging off them.
pub struct Adapter {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    els: ElsEngine,
    vports: BTreeMap<VportId, Vport>,
    timers: Timers,
    listeners: Vec<Arc<dyn RemotePortListener>>,
    metrics: Arc<EngineMetrics>,
    link_up: bool,
    unloaded: bool,
    next_vport: u16,
}

impl Adapter {
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(EngineMetrics::new());
        let policy = RetryPolicy::new(&config.retry_rules, config.max_els_retries);
        let els = ElsEngine::new(
            Arc::clone(&transport),
            policy,
            config.els_timeout(),
            Arc::clone(&metrics),
        );

        let mut physical = Vport::new(
            VportId::PHYSICAL,
            config.wwpn,
            config.wwnn,
            config.max_nodes,
            config.rscn_capacity,
        );
        physical.npiv_enabled = config.npiv_enabled;
        let mut vports = BTreeMap::new();
        vports.insert(VportId::PHYSICAL, physical);

        tracing::info!(
            "[adapter] {} created (wwpn {}, wwnn {})",
            config.name,
            config.wwpn,
            config.wwnn
        );
        Ok(Self {
            config,
            transport,
            els,
            vports,
            timers: Timers::new(),
            listeners: Vec::new(),
            metrics,
            link_up: false,
            unloaded: false,
            next_vport: 0,
        })
    }

    /// Register a hook called on every node state change.
    pub fn add_listener(&mut self, listener: Arc<dyn RemotePortListener>) {
        self.listeners.push(listener);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    pub fn vport(&self, id: VportId) -> Option<&Vport> {
        self.vports.get(&id)
    }

    /// Node bound to `did` on `vport`.
    pub fn node(&self, vport: VportId, did: FcId) -> Option<NodeRef> {
        self.vports.get(&vport)?.registry.find(did)
    }

    /// Exchanges currently tracked by the ELS engine.
    pub fn outstanding(&self) -> usize {
        self.els.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Every vport finished its login sequence, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.vports
            .values()
            .all(|v| v.is_ready() || v.has_failed())
    }

    /// Copy of the adapter state for callers outside the actor.
    pub fn snapshot(&self) -> AdapterSnapshot {
        AdapterSnapshot {
            name: self.config.name.clone(),
            link_up: self.link_up,
            unloaded: self.unloaded,
            settled: self.is_settled(),
            outstanding: self.els.len(),
            timers: self.timers.len(),
            vports: self.vports.values().map(Self::vport_snapshot).collect(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn vport_snapshot(vport: &Vport) -> VportSnapshot {
        VportSnapshot {
            id: vport.id,
            wwpn: vport.wwpn,
            wwnn: vport.wwnn,
            did: vport.did,
            state: vport.state,
            status: vport.status.clone(),
            topology: vport.topology,
            fabric_name: vport.fabric_name,
            nodes: vport.registry.snapshot(),
        }
    }

    // ========================================================================
    // Event loop entry points
    // ========================================================================

    /// Process one event reported by the transport.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.unloaded {
            if let TransportEvent::Completion { exchange, status } = event {
                self.els.on_complete(exchange, status);
            }
            return;
        }
        match event {
            TransportEvent::Completion { exchange, status } => {
                let outcome = self.els.on_complete(exchange, status);
                self.handle_outcome(outcome);
            }
            TransportEvent::RegLogin {
                vport,
                did,
                handle,
                result,
            } => self.on_reg_login(vport, did, handle, result),
            TransportEvent::RegVfi { vport, result } => self.on_reg_vfi(vport, result),
            TransportEvent::RegVpi { vport, result } => self.on_reg_vpi(vport, result),
            TransportEvent::Unsolicited(frame) => self.on_unsolicited(frame),
            TransportEvent::LinkUp => self.link_up(),
            TransportEvent::LinkDown => self.link_down(),
        }
        self.drive_discovery();
    }

    /// Handle every timer and exchange deadline due at `now`.
    pub fn fire_timers(&mut self, now: Instant) {
        if self.unloaded {
            return;
        }
        for outcome in self.els.expire(now) {
            self.handle_outcome(outcome);
        }
        for (id, kind) in self.timers.pop_due(now) {
            match kind {
                TimerKind::NodeRetry { node, .. } => {
                    if let Some(node) = node.upgrade() {
                        self.on_node_retry(&node, id);
                    }
                }
                TimerKind::ExchangeRetry(exchange) => {
                    if let Some(outcome) = self.els.reissue(exchange) {
                        self.handle_outcome(outcome);
                    }
                }
                TimerKind::DiscoveryTimeout(vport) => self.on_discovery_timeout(vport, id),
            }
        }
        self.drive_discovery();
    }

    /// Earliest timer or exchange deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timers.next_deadline(), self.els.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_node_retry(&mut self, node: &NodeRef, id: TimerId) {
        let due = {
            let mut n = node.lock();
            if n.retry_timer != Some(id) {
                return;
            }
            n.retry_timer = None;
            let armed = n.flags.contains(NodeFlags::DELAY_ARMED);
            n.flags.remove(NodeFlags::DELAY_ARMED);
            armed
                && n.state == NodeState::Npr
                && !n.flags.intersects(NodeFlags::REMOVAL_PENDING | NodeFlags::DISABLED)
        };
        if due {
            self.login_node(node);
        }
    }

    fn handle_outcome(&mut self, outcome: CompletionOutcome) {
        match outcome {
            CompletionOutcome::Success { done, payload } => self.route_result(done, Ok(payload), None),
            CompletionOutcome::Failed {
                done,
                failure,
                hint,
            } => self.route_result(done, Err(failure), hint),
            CompletionOutcome::Retry { id, delay } => {
                self.timers
                    .schedule(Instant::now() + delay, TimerKind::ExchangeRetry(id));
            }
            CompletionOutcome::Stale => {}
        }
    }

    /// Hand a finished exchange to whoever is waiting for it.
    fn route_result(&mut self, done: Finished, result: ElsResult, hint: Option<FailureHint>) {
        match done.command {
            Command::Els(ElsCommand::Flogi | ElsCommand::Fdisc) => {
                self.on_fabric_login(done.vport, result, hint);
            }
            Command::Els(ElsCommand::Scr) | Command::Ct(CtCommand::RftId | CtCommand::RffId) => {
                self.on_ns_registration(&done, result);
            }
            Command::Ct(CtCommand::GidFt) => self.on_gid_ft(done.vport, result),
            Command::Els(command) => match NodeEvent::completed(command) {
                Some(event) => self.on_node_completion(&done, event, result),
                None => tracing::debug!(
                    "[adapter] {} {} to {} finished ({})",
                    done.vport,
                    command,
                    done.d_id,
                    if result.is_ok() { "accepted" } else { "failed" }
                ),
            },
        }
        self.finish_removal_if_idle(&done.node);
    }

    fn on_node_completion(&mut self, done: &Finished, event: NodeEvent, result: ElsResult) {
        let mut node = Arc::clone(&done.node);
        if event == NodeEvent::CmplPlogi {
            if let Ok(AccPayload::Login { params, .. }) = &result {
                let bind = {
                    let n = node.lock();
                    n.state == NodeState::PlogiIssue && !n.is_fabric_service()
                };
                if bind {
                    match self.bind_identity(&node, params.wwpn, params.wwnn) {
                        Ok(survivor) => node = survivor,
                        Err(err) => {
                            tracing::warn!("[adapter] {} {}: {}", done.vport, done.d_id, err);
                        }
                    }
                }
            }
        }
        self.dispatch(&node, event, EventArg::Response(result));
    }

    /// Bind the names announced by a login to `node`, merging it into an
    /// existing node that already owns them. Returns the node that now owns
    /// the address.
    fn bind_identity(&mut self, node: &NodeRef, wwpn: Wwn, wwnn: Wwn) -> Result<NodeRef> {
        let vport_id = node.lock().vport;

        // Exchanges the previous owner still has in flight target its old
        // address.
        let owner = self
            .vports
            .get(&vport_id)
            .and_then(|v| v.registry.find_by_wwpn(wwpn))
            .filter(|owner| !Arc::ptr_eq(owner, node));
        if let Some(owner) = owner {
            let aborted = self.els.abort_node(&owner, None);
            if aborted > 0 {
                tracing::debug!(
                    "[adapter] {} {} aborted {} exchanges to its old address",
                    vport_id,
                    wwpn,
                    aborted
                );
            }
        }

        let vport = self
            .vports
            .get_mut(&vport_id)
            .ok_or(FcError::UnknownVport(vport_id.0))?;
        let merge = vport.registry.confirm_identity(node, wwpn, wwnn)?;

        if let Some(handle) = merge.stale_login {
            self.unregister_login(vport_id, handle);
        }
        if let Some(retired) = &merge.retired {
            let moved = self.els.rebind(retired, &merge.survivor);
            self.cancel_node_retry(retired);
            self.cancel_node_retry(&merge.survivor);
            EngineMetrics::bump(&self.metrics.nodes_freed);
            tracing::info!(
                "[adapter] {} {} merged into existing node ({} exchanges moved)",
                vport_id,
                wwpn,
                moved
            );
            let retired_info = retired.lock().info();
            self.notify(&retired_info, merge.retired_was);
            let survivor_info = merge.survivor.lock().info();
            if survivor_info.state != merge.survivor_was {
                self.notify(&survivor_info, merge.survivor_was);
            }
        }
        Ok(merge.survivor)
    }

    fn finish_removal_if_idle(&mut self, node: &NodeRef) {
        let idle = {
            let n = node.lock();
            n.state == NodeState::Npr
                && n.flags.contains(NodeFlags::REMOVAL_PENDING)
                && n.outstanding == 0
        };
        if idle {
            self.dispatch(node, NodeEvent::DeviceRm, EventArg::None);
        }
    }

    fn on_reg_login(
        &mut self,
        vport: VportId,
        did: FcId,
        handle: LoginHandle,
        result: std::result::Result<(), TransportError>,
    ) {
        let node = self
            .vports
            .get(&vport)
            .and_then(|v| v.registry.find(did))
            .filter(|node| node.lock().login == Some(handle));
        match node {
            Some(node) => self.dispatch(&node, NodeEvent::CmplRegLogin, EventArg::RegLogin(result)),
            None => {
                tracing::debug!("[adapter] {} late registration of {} for {}", vport, handle, did);
                if result.is_ok() {
                    self.unregister_login(vport, handle);
                }
            }
        }
    }

    // ========================================================================
    // State machine plumbing
    // ========================================================================

    /// Feed `event` to `node` and execute the resulting actions.
    pub(crate) fn dispatch(&mut self, node: &NodeRef, event: NodeEvent, arg: EventArg) {
        let vport_id = node.lock().vport;
        let Some(vport) = self.vports.get(&vport_id) else {
            return;
        };
        let ctx = FsmContext {
            wwpn: vport.wwpn,
            wwnn: vport.wwnn,
            did: vport.did,
            roles: self.config.roles(),
            service_params: local_params(&self.config, vport),
            retry_delay: self.config.node_retry_delay(),
            max_retries: self.config.max_els_retries,
            metrics: &*self.metrics,
        };
        let transition = fsm::dispatch(&ctx, &mut node.lock(), event, &arg);
        self.apply(node, transition, arg.request());
    }

    fn apply(&mut self, node: &NodeRef, transition: Transition, request: Option<&InboundFrame>) {
        let Transition { old, new, actions } = transition;
        let vport_id = node.lock().vport;

        if old != new {
            let info = node.lock().info();
            self.notify(&info, old);
        }

        for action in actions {
            match action {
                Action::Accept(payload) => self.respond(vport_id, request, Reply::Acc(payload)),
                Action::AcceptPlogi => {
                    if let (Some(frame), Some(vport)) = (request, self.vports.get(&vport_id)) {
                        let params = local_params(&self.config, vport);
                        let reply = Reply::Acc(AccPayload::Login {
                            params,
                            d_id: frame.s_id,
                        });
                        self.reply(vport_id, frame, reply);
                    }
                    self.register_login(node);
                }
                Action::Reject(rjt) => self.respond(vport_id, request, Reply::Rjt(rjt)),
                Action::Issue(command) => self.issue_for_node(node, command),
                Action::RegisterLogin => self.register_login(node),
                Action::UnregisterLogin(handle) => self.unregister_login(vport_id, handle),
                Action::AbortExchanges(command) => {
                    self.els.abort_node(node, command.map(Command::from));
                }
                Action::ScheduleRetry(delay) => self.schedule_node_retry(node, delay),
                Action::CancelRetry => self.cancel_node_retry(node),
            }
        }

        if old != new {
            self.after_transition(node, new);
        }
    }

    /// Port-level consequences of a node reaching `new`. Skipped when a
    /// nested dispatch already moved the node on.
    fn after_transition(&mut self, node: &NodeRef, new: NodeState) {
        let (state, flags, vport_id, did) = {
            let n = node.lock();
            (n.state, n.flags, n.vport, n.did)
        };
        if state != new {
            return;
        }
        if state == NodeState::Freed {
            self.node_freed(node, vport_id, did);
        } else if did == FcId::NAME_SERVER {
            self.name_server_changed(vport_id, state, flags);
        }
    }

    fn node_freed(&mut self, node: &NodeRef, vport_id: VportId, did: FcId) {
        self.cancel_node_retry(node);
        let Some(vport) = self.vports.get_mut(&vport_id) else {
            return;
        };
        if vport.registry.remove(node) {
            EngineMetrics::bump(&self.metrics.nodes_freed);
            vport.discovery.in_flight.remove(&did);
            vport.discovery.pending.retain(|d| *d != did);
            tracing::debug!("[adapter] {} node {} freed", vport_id, did);
        }
    }

    fn notify(&self, info: &NodeInfo, old: NodeState) {
        for listener in &self.listeners {
            listener.on_node_state_changed(info, old);
        }
    }

    fn issue_for_node(&mut self, node: &NodeRef, command: ElsCommand) {
        let vport_id = node.lock().vport;
        let Some(vport) = self.vports.get(&vport_id) else {
            return;
        };
        let payload = match command {
            ElsCommand::Plogi => RequestPayload::Plogi(local_params(&self.config, vport)),
            ElsCommand::Prli => RequestPayload::Prli(PrliParams::fcp(self.config.roles())),
            ElsCommand::Adisc => RequestPayload::Adisc(AdiscParams {
                wwpn: vport.wwpn,
                wwnn: vport.wwnn,
                port_id: vport.did,
            }),
            ElsCommand::Logo => RequestPayload::Logo {
                wwpn: vport.wwpn,
                port_id: vport.did,
            },
            other => {
                tracing::warn!("[adapter] {} cannot issue {} for a node", vport_id, other);
                return;
            }
        };
        let s_id = vport.did;
        if let Err(err) = self.els.issue(vport_id, s_id, node, payload, None) {
            let did = node.lock().did;
            tracing::debug!("[adapter] {} {} to {} not sent: {}", vport_id, command, did, err);
            if let Some(event) = NodeEvent::completed(command) {
                self.dispatch(node, event, EventArg::Response(Err(issue_failure(&err))));
            }
        }
    }

    fn register_login(&mut self, node: &NodeRef) {
        let (vport, did, params) = {
            let n = node.lock();
            (n.vport, n.did, n.service_params)
        };
        let result = match params {
            Some(params) => self.transport.register_login(vport, did, &params),
            None => Err(TransportError::Unavailable),
        };
        match result {
            Ok(handle) => {
                tracing::debug!("[adapter] {} {} login {} reserved", vport, did, handle);
                node.lock().login = Some(handle);
            }
            Err(err) => {
                tracing::debug!("[adapter] {} {} login registration failed: {}", vport, did, err);
                self.dispatch(node, NodeEvent::CmplRegLogin, EventArg::RegLogin(Err(err)));
            }
        }
    }

    fn unregister_login(&self, vport: VportId, handle: LoginHandle) {
        if let Err(err) = self.transport.unregister_login(vport, handle) {
            tracing::debug!("[adapter] {} unregister {} failed: {}", vport, handle, err);
        }
    }

    fn schedule_node_retry(&mut self, node: &NodeRef, delay: Duration) {
        let (vport, did, previous) = {
            let mut n = node.lock();
            (n.vport, n.did, n.retry_timer.take())
        };
        if let Some(previous) = previous {
            self.timers.cancel(previous);
        }
        let id = self.timers.schedule(
            Instant::now() + delay,
            TimerKind::NodeRetry {
                vport,
                did,
                node: Arc::downgrade(node),
            },
        );
        node.lock().retry_timer = Some(id);
    }

    fn cancel_node_retry(&mut self, node: &NodeRef) {
        let id = {
            let mut n = node.lock();
            n.flags.remove(NodeFlags::DELAY_ARMED);
            n.retry_timer.take()
        };
        if let Some(id) = id {
            self.timers.cancel(id);
        }
    }

    fn respond(&self, vport: VportId, request: Option<&InboundFrame>, reply: Reply) {
        match request {
            Some(frame) => self.reply(vport, frame, reply),
            None => tracing::debug!("[adapter] {} no request to answer with {:?}", vport, reply),
        }
    }

    /// Answer an unsolicited frame.
    fn reply(&self, vport: VportId, frame: &InboundFrame, reply: Reply) {
        if matches!(reply, Reply::Rjt(_)) {
            EngineMetrics::bump(&self.metrics.unsolicited_rejected);
        }
        let reply = ElsReply {
            vport,
            s_id: frame.d_id,
            d_id: frame.s_id,
            ox_id: frame.ox_id,
            reply,
        };
        if let Err(err) = self.transport.send_reply(reply) {
            tracing::debug!("[adapter] {} reply to {} not sent: {}", vport, frame.s_id, err);
        }
    }

    /// Node bound to `did`, created (or revived) if needed.
    fn node_for(&mut self, vport_id: VportId, did: FcId) -> Result<NodeRef> {
        let vport = self
            .vports
            .get_mut(&vport_id)
            .ok_or(FcError::UnknownVport(vport_id.0))?;
        let existed = vport.registry.find(did).is_some();
        let node = vport.registry.get_or_create(did)?;
        if !existed {
            EngineMetrics::bump(&self.metrics.nodes_created);
        }
        Ok(node)
    }

    /// Issue a request to a fabric service (name server, fabric controller).
    fn issue_to_service(&mut self, vport_id: VportId, did: FcId, payload: RequestPayload) -> bool {
        let command = payload.command();
        let node = match self.node_for(vport_id, did) {
            Ok(node) => node,
            Err(err) => {
                tracing::warn!("[fabric] {} no node for {}: {}", vport_id, did, err);
                return false;
            }
        };
        let s_id = self.vports.get(&vport_id).map_or(FcId::UNASSIGNED, |v| v.did);
        match self.els.issue(vport_id, s_id, &node, payload, None) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!("[fabric] {} {} to {} not sent: {}", vport_id, command, did, err);
                false
            }
        }
    }

    /// Tear a node down regardless of its state.
    fn force_free(&mut self, node: &NodeRef) {
        self.els.abort_node(node, None);
        let state = node.lock().state;
        if state == NodeState::Freed {
            return;
        }
        if state.is_ready() {
            self.dispatch(node, NodeEvent::DeviceRecovery, EventArg::None);
        }
        self.dispatch(node, NodeEvent::DeviceRm, EventArg::None);
    }

    // ========================================================================
    // Administrative operations
    // ========================================================================

    /// Create an NPIV port. FDISC starts once the physical port is ready on a
    /// fabric that grants additional addresses.
    pub fn create_vport(&mut self, wwpn: Wwn, wwnn: Wwn) -> Result<VportId> {
        if !self.config.npiv_enabled {
            return Err(ConfigError::Invalid("NPIV is disabled on this adapter".into()).into());
        }
        if wwpn.is_zero() {
            return Err(ValidationError::ZeroPortName.into());
        }
        if wwnn.is_zero() {
            return Err(ValidationError::ZeroNodeName.into());
        }
        if self.vports.values().any(|v| v.wwpn == wwpn) {
            return Err(ValidationError::WwnCollision(wwpn).into());
        }

        self.next_vport += 1;
        let id = VportId(self.next_vport);
        let mut vport = Vport::new(id, wwpn, wwnn, self.config.max_nodes, self.config.rscn_capacity);
        vport.set_status(if self.link_up {
            VportStatus::Initializing
        } else {
            VportStatus::LinkDown
        });
        self.vports.insert(id, vport);
        tracing::info!("[adapter] {} created {} (wwpn {})", self.config.name, id, wwpn);

        if self.link_up {
            self.start_pending_vports();
        }
        Ok(id)
    }

    /// Delete an NPIV port, freeing its nodes.
    pub fn delete_vport(&mut self, id: VportId) -> Result<()> {
        if id.is_physical() {
            return Err(FcError::UnknownVport(id.0));
        }
        let nodes = self
            .vports
            .get(&id)
            .ok_or(FcError::UnknownVport(id.0))?
            .registry
            .nodes();
        let aborted = self.els.abort_vport(id);
        for node in nodes {
            self.force_free(&node);
        }
        if let Some(mut vport) = self.vports.remove(&id) {
            if let Some(timer) = vport.discovery.reset() {
                self.timers.cancel(timer);
            }
        }
        tracing::info!("[adapter] {} deleted {} ({} exchanges aborted)", self.config.name, id, aborted);
        Ok(())
    }

    /// Abort every exchange of one node. A node waiting on one of them goes
    /// to NPR. Returns the number of exchanges aborted.
    pub fn abort_node(&mut self, vport: VportId, did: FcId) -> Result<usize> {
        let node = self.lookup(vport, did)?;
        let aborted = self.els.abort_node(&node, None);
        let waiting = matches!(
            node.lock().state,
            NodeState::PlogiIssue
                | NodeState::AdiscIssue
                | NodeState::PrliIssue
                | NodeState::LogoIssue
        );
        if waiting {
            self.dispatch(&node, NodeEvent::DeviceRecovery, EventArg::None);
        }
        self.drive_discovery();
        Ok(aborted)
    }

    /// Explicitly log out of a remote port, optionally removing it afterwards.
    pub fn logout_node(&mut self, vport: VportId, did: FcId, remove: bool) -> Result<()> {
        let node = self.lookup(vport, did)?;
        let transition = fsm::start_logo(&mut node.lock(), remove);
        match transition {
            Some(transition) => {
                self.apply(&node, transition, None);
                Ok(())
            }
            None => Err(FcError::ProtocolReject(LsRjt::LOGIN_REQUIRED)),
        }
    }

    /// Issue a link-service request outside the login state machine (ECHO,
    /// RNID, RTV, RLS, ...). The waiter receives exactly one outcome.
    pub fn issue_els(
        &mut self,
        vport: VportId,
        did: FcId,
        payload: RequestPayload,
        waiter: Option<oneshot::Sender<ExchangeOutcome>>,
    ) -> Result<ExchangeId> {
        let command = payload.command();
        let managed = command.els().is_some_and(|cmd| {
            NodeEvent::completed(cmd).is_some() || cmd.is_fabric_login() || cmd == ElsCommand::Scr
        });
        if managed || matches!(command, Command::Ct(_)) {
            return Err(FcError::ProtocolReject(LsRjt::UNSUPPORTED));
        }
        let node = self.node_for(vport, did)?;
        let s_id = self
            .vports
            .get(&vport)
            .map_or(FcId::UNASSIGNED, |v| v.did);
        self.els.issue(vport, s_id, &node, payload, waiter)
    }

    fn lookup(&self, vport: VportId, did: FcId) -> Result<NodeRef> {
        self.vports
            .get(&vport)
            .ok_or(FcError::UnknownVport(vport.0))?
            .registry
            .find(did)
            .ok_or(FcError::NodeRemoved(did))
    }

    /// Abort everything, free every node and stop reacting to events.
    /// Calling it again does nothing.
    pub fn unload(&mut self) {
        if self.unloaded {
            return;
        }
        self.els.set_unloading();
        let aborted = self.els.abort_all();

        for vport in self.vports.values_mut() {
            vport.rscn.clear();
            if let Some(timer) = vport.discovery.reset() {
                self.timers.cancel(timer);
            }
        }
        let nodes: Vec<NodeRef> = self
            .vports
            .values()
            .flat_map(|v| v.registry.nodes())
            .collect();
        let freed = nodes.len();
        for node in nodes {
            self.force_free(&node);
        }
        self.timers.clear();

        for vport in self.vports.values_mut() {
            vport.vpi_registered = false;
            vport.set_state(PortState::LinkDown);
            vport.set_status(VportStatus::LinkDown);
        }
        self.link_up = false;
        self.els.set_link(false);
        self.unloaded = true;
        tracing::info!(
            "[adapter] {} unloaded ({} exchanges aborted, {} nodes freed)",
            self.config.name,
            aborted,
            freed
        );
    }
}
