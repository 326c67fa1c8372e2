// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated fabric.
//!
//! [`LoopbackFabric`] answers requests the way a switch and a set of remote
//! N_Ports would, delivering completions through the adapter's event channel.
//! Used by the simulator and by tests. Individual exchanges can be held back
//! or failed with a scripted status.

use super::{
    CommandHandle, CompletionSender, ElsReply, ElsRequest, ExchangeId, LoginHandle, Transport,
    TransportEvent,
};
use crate::els::{CompletionStatus, LocalReject};
use crate::error::TransportError;
use crate::protocol::{
    AccPayload, AdiscParams, Command, CtRequest, Fc4Roles, FcId, InboundFrame,
    LinkErrorStatus, LsRjt, PrliParams, RequestPayload, RscnPage, ServiceParams, Wwn,
};
use crate::vport::VportId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// First N_Port ID handed out by the simulated switch.
const FIRST_PORT_ID: u32 = 0x01_01_00;

fn default_true() -> bool {
    true
}

/// Remote N_Port attached to the simulated fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePort {
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    pub did: FcId,
    #[serde(default)]
    pub initiator: bool,
    #[serde(default = "default_true")]
    pub target: bool,
    /// Registered with the name server and answering logins.
    #[serde(default = "default_true")]
    pub online: bool,
}

impl RemotePort {
    pub fn target(wwpn: Wwn, wwnn: Wwn, did: FcId) -> Self {
        Self {
            wwpn,
            wwnn,
            did,
            initiator: false,
            target: true,
            online: true,
        }
    }

    fn params(&self) -> ServiceParams {
        ServiceParams::local(self.wwpn, self.wwnn, 2000, 10_000)
    }

    fn roles(&self) -> Fc4Roles {
        Fc4Roles {
            initiator: self.initiator,
            target: self.target,
        }
    }
}

/// Shape of the simulated link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopbackTopology {
    /// Switched fabric with a name server.
    Fabric { name: Wwn, npiv: bool },
    /// Direct attachment to the first remote port.
    PointToPoint,
}

impl Default for LoopbackTopology {
    fn default() -> Self {
        Self::Fabric {
            name: Wwn::new(0x1000_0005_1e00_0001),
            npiv: true,
        }
    }
}

struct Scripted {
    command: Command,
    did: Option<FcId>,
    status: CompletionStatus,
}

struct Held {
    exchange: ExchangeId,
    command: Command,
}

#[derive(Default)]
struct State {
    link_up: bool,
    next_handle: u64,
    next_login: u32,
    /// Addresses granted by FLOGI/FDISC, in grant order.
    granted: BTreeMap<VportId, FcId>,
    ports: Vec<RemotePort>,
    requests: Vec<ElsRequest>,
    replies: Vec<ElsReply>,
    logins: BTreeMap<LoginHandle, (VportId, FcId)>,
    scripted: Vec<Scripted>,
    hold: HashSet<Command>,
    held: BTreeMap<CommandHandle, Held>,
    aborted: Vec<CommandHandle>,
    failing_reg_login: HashSet<FcId>,
    unregistered: usize,
    refuse_aborts: bool,
    vfi_registrations: usize,
    vpi_registrations: usize,
    /// Switch name and first address after a fabric replacement.
    fabric_name: Option<Wwn>,
    first_port_id: Option<u32>,
}

/// In-memory fabric transport.
pub struct LoopbackFabric {
    topology: LoopbackTopology,
    events: CompletionSender,
    state: Mutex<State>,
}

impl LoopbackFabric {
    /// Empty fabric with the link up.
    pub fn new(events: CompletionSender, topology: LoopbackTopology) -> Self {
        Self {
            topology,
            events,
            state: Mutex::new(State {
                link_up: true,
                ..State::default()
            }),
        }
    }

    /// Fabric already populated with `ports`.
    pub fn with_ports(
        events: CompletionSender,
        topology: LoopbackTopology,
        ports: Vec<RemotePort>,
    ) -> Self {
        let fabric = Self::new(events, topology);
        fabric.state.lock().ports = ports;
        fabric
    }

    // ========================================================================
    // Scenario control
    // ========================================================================

    /// Attach a new port; it shows up at the next name-server query.
    pub fn add_port(&self, port: RemotePort) {
        self.state.lock().ports.push(port);
    }

    /// Take a port on or off the fabric. Returns false if unknown.
    pub fn set_online(&self, wwpn: Wwn, online: bool) -> bool {
        let mut state = self.state.lock();
        match state.ports.iter_mut().find(|p| p.wwpn == wwpn) {
            Some(port) => {
                port.online = online;
                true
            }
            None => false,
        }
    }

    /// Move a port to a new address (zoning change, cable move).
    pub fn move_port(&self, wwpn: Wwn, did: FcId) -> bool {
        let mut state = self.state.lock();
        match state.ports.iter_mut().find(|p| p.wwpn == wwpn) {
            Some(port) => {
                port.did = did;
                true
            }
            None => false,
        }
    }

    /// Make every later abort fail as if the exchange were already gone.
    pub fn refuse_aborts(&self) {
        self.state.lock().refuse_aborts = true;
    }

    /// Replace the switch: later fabric logins report `name` and grant
    /// addresses from `first_port_id`.
    pub fn replace_switch(&self, name: Wwn, first_port_id: FcId) {
        let mut state = self.state.lock();
        state.fabric_name = Some(name);
        state.first_port_id = Some(first_port_id.raw());
    }

    /// Drop or restore the link. Submissions fail while it is down.
    pub fn set_link(&self, up: bool) {
        self.state.lock().link_up = up;
        let event = if up {
            TransportEvent::LinkUp
        } else {
            TransportEvent::LinkDown
        };
        self.events.send(event);
    }

    /// Complete the next matching request with `status` instead of the
    /// simulated answer.
    pub fn fail_next(&self, command: impl Into<Command>, did: Option<FcId>, status: CompletionStatus) {
        self.state.lock().scripted.push(Scripted {
            command: command.into(),
            did,
            status,
        });
    }

    /// Leave requests of this kind outstanding until released or aborted.
    pub fn hold(&self, command: impl Into<Command>) {
        self.state.lock().hold.insert(command.into());
    }

    /// Stop holding `command` and complete every held exchange of that kind
    /// with `status`. Returns the number completed.
    pub fn release(&self, command: impl Into<Command>, status: CompletionStatus) -> usize {
        let command = command.into();
        let released: Vec<ExchangeId> = {
            let mut state = self.state.lock();
            state.hold.remove(&command);
            let handles: Vec<CommandHandle> = state
                .held
                .iter()
                .filter(|(_, h)| h.command == command)
                .map(|(handle, _)| *handle)
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| state.held.remove(&handle))
                .map(|h| h.exchange)
                .collect()
        };
        for exchange in &released {
            self.events.complete(*exchange, status.clone());
        }
        released.len()
    }

    /// Fail login registrations for `did`.
    pub fn fail_reg_login(&self, did: FcId) {
        self.state.lock().failing_reg_login.insert(did);
    }

    /// Deliver an unsolicited frame to the adapter.
    pub fn inject(&self, frame: InboundFrame) -> bool {
        self.events.send(TransportEvent::Unsolicited(frame))
    }

    /// Deliver an RSCN from the fabric controller to `vport`.
    pub fn send_rscn(&self, vport: VportId, pages: Vec<RscnPage>) -> bool {
        let d_id = self.granted(vport).unwrap_or(FcId::UNASSIGNED);
        self.inject(InboundFrame {
            s_id: FcId::FABRIC_CONTROLLER,
            d_id,
            ox_id: 0,
            payload: RequestPayload::Rscn(pages),
        })
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Address the fabric granted to `vport`.
    pub fn granted(&self, vport: VportId) -> Option<FcId> {
        self.state.lock().granted.get(&vport).copied()
    }

    /// Every request submitted so far.
    pub fn requests(&self) -> Vec<ElsRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests of one kind, optionally to one destination.
    pub fn sent(&self, command: impl Into<Command>, did: Option<FcId>) -> usize {
        let command = command.into();
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.command() == command && did.map_or(true, |d| d == r.d_id))
            .count()
    }

    pub fn replies(&self) -> Vec<ElsReply> {
        self.state.lock().replies.clone()
    }

    /// Login handles currently registered.
    pub fn logins(&self) -> usize {
        self.state.lock().logins.len()
    }

    /// Requests parked by [`LoopbackFabric::hold`].
    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Aborts the engine issued.
    pub fn aborted(&self) -> usize {
        self.state.lock().aborted.len()
    }

    /// Logins released so far.
    pub fn unregistered(&self) -> usize {
        self.state.lock().unregistered
    }

    /// VFI and VPI registrations so far.
    pub fn registrations(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.vfi_registrations, state.vpi_registrations)
    }

    // ========================================================================
    // Responder
    // ========================================================================

    fn switch_params(&self, name: Wwn, npiv: bool) -> ServiceParams {
        ServiceParams {
            fport: true,
            multiple_nport_ids: npiv,
            ..ServiceParams::local(name, name, 2000, 10_000)
        }
    }

    fn online_port(state: &State, did: FcId) -> Option<RemotePort> {
        state.ports.iter().find(|p| p.did == did && p.online).cloned()
    }

    fn answer(&self, state: &mut State, request: &ElsRequest) -> CompletionStatus {
        let did = request.d_id;
        let command = request.command();
        if let Some(pos) = state
            .scripted
            .iter()
            .position(|s| s.command == command && s.did.map_or(true, |d| d == did))
        {
            return state.scripted.remove(pos).status;
        }

        let remote = Self::online_port(state, did);
        let fabric = match &self.topology {
            LoopbackTopology::Fabric { name, npiv } => {
                Some((state.fabric_name.unwrap_or(*name), *npiv))
            }
            LoopbackTopology::PointToPoint => None,
        };
        let first_port_id = state.first_port_id.unwrap_or(FIRST_PORT_ID);

        let acc = match (&request.payload, fabric) {
            (RequestPayload::Flogi(_), Some((name, npiv))) => {
                let granted = FcId::new(first_port_id);
                state.granted.insert(request.vport, granted);
                AccPayload::Login {
                    params: self.switch_params(name, npiv),
                    d_id: granted,
                }
            }
            (RequestPayload::Flogi(_), None) => match state.ports.first() {
                Some(peer) => AccPayload::Login {
                    params: peer.params(),
                    d_id: FcId::UNASSIGNED,
                },
                None => return CompletionStatus::LocalReject(LocalReject::SequenceTimeout),
            },
            (RequestPayload::Fdisc(_), Some((name, npiv))) => {
                let granted = FcId::new(first_port_id + u32::from(request.vport.0));
                state.granted.insert(request.vport, granted);
                AccPayload::Login {
                    params: self.switch_params(name, npiv),
                    d_id: granted,
                }
            }
            (RequestPayload::Plogi(_), Some((name, npiv))) if did.is_well_known() => {
                AccPayload::Login {
                    params: self.switch_params(name, npiv),
                    d_id: request.s_id,
                }
            }
            (RequestPayload::Plogi(_), None) if did == FcId::P2P_REMOTE => {
                match state.ports.first() {
                    Some(peer) => AccPayload::Login {
                        params: peer.params(),
                        d_id: request.s_id,
                    },
                    None => return CompletionStatus::NportReject { temporary: false },
                }
            }
            (RequestPayload::Ct(CtRequest::GidFt { .. }), Some(_)) => {
                let mut ids: Vec<FcId> = state
                    .ports
                    .iter()
                    .filter(|p| p.online && (p.target || p.initiator))
                    .map(|p| p.did)
                    .collect();
                ids.sort();
                AccPayload::PortIds(ids)
            }
            (RequestPayload::Ct(_) | RequestPayload::Scr, Some(_)) => AccPayload::Empty,
            (RequestPayload::Plogi(_), _) => match remote {
                Some(port) => AccPayload::Login {
                    params: port.params(),
                    d_id: request.s_id,
                },
                None => return CompletionStatus::NportReject { temporary: false },
            },
            (RequestPayload::Prli(_), _) => match Self::peer(state, remote, did) {
                Some(port) => AccPayload::Prli(PrliParams::fcp(port.roles())),
                None => return CompletionStatus::LsRjt(LsRjt::UNSUPPORTED),
            },
            (RequestPayload::Adisc(_), _) => match Self::peer(state, remote, did) {
                Some(port) => AccPayload::Adisc(AdiscParams {
                    wwpn: port.wwpn,
                    wwnn: port.wwnn,
                    port_id: did,
                }),
                None => return CompletionStatus::NportReject { temporary: false },
            },
            (RequestPayload::Logo { .. } | RequestPayload::Prlo(_), _) => AccPayload::Empty,
            (RequestPayload::Echo(data), _) => AccPayload::Echo(data.clone()),
            (RequestPayload::Rtv, _) => AccPayload::Rtv {
                r_a_tov_ms: 10_000,
                e_d_tov_ms: 2_000,
            },
            (RequestPayload::Rnid, _) => match remote {
                Some(port) => AccPayload::Rnid {
                    wwpn: port.wwpn,
                    wwnn: port.wwnn,
                },
                None => return CompletionStatus::LsRjt(LsRjt::UNSUPPORTED),
            },
            _ => return CompletionStatus::LsRjt(LsRjt::UNSUPPORTED),
        };
        CompletionStatus::Success(acc)
    }

    /// Remote port answering at `did`; in point-to-point the peer sits at
    /// the fixed remote address.
    fn peer(state: &State, remote: Option<RemotePort>, did: FcId) -> Option<RemotePort> {
        remote.or_else(|| {
            if did == FcId::P2P_REMOTE {
                state.ports.first().cloned()
            } else {
                None
            }
        })
    }
}

impl Transport for LoopbackFabric {
    fn submit_command(&self, request: ElsRequest) -> Result<CommandHandle, TransportError> {
        let mut state = self.state.lock();
        if !state.link_up {
            return Err(TransportError::LinkDown);
        }
        state.next_handle += 1;
        let handle = CommandHandle(state.next_handle);
        let command = request.command();
        let exchange = request.exchange;
        state.requests.push(request.clone());

        if state.hold.contains(&command) {
            state.held.insert(handle, Held { exchange, command });
            return Ok(handle);
        }
        let status = self.answer(&mut state, &request);
        drop(state);
        self.events.complete(exchange, status);
        Ok(handle)
    }

    fn send_reply(&self, reply: ElsReply) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.link_up {
            return Err(TransportError::LinkDown);
        }
        state.replies.push(reply);
        Ok(())
    }

    fn register_login(
        &self,
        vport: VportId,
        did: FcId,
        _params: &ServiceParams,
    ) -> Result<LoginHandle, TransportError> {
        let (handle, result) = {
            let mut state = self.state.lock();
            if !state.link_up {
                return Err(TransportError::LinkDown);
            }
            state.next_login += 1;
            let handle = LoginHandle(state.next_login);
            let result = if state.failing_reg_login.contains(&did) {
                Err(TransportError::NoResources)
            } else {
                state.logins.insert(handle, (vport, did));
                Ok(())
            };
            (handle, result)
        };
        self.events.send(TransportEvent::RegLogin {
            vport,
            did,
            handle,
            result,
        });
        Ok(handle)
    }

    fn unregister_login(&self, _vport: VportId, handle: LoginHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        match state.logins.remove(&handle) {
            Some(_) => {
                state.unregistered += 1;
                Ok(())
            }
            None => Err(TransportError::InvalidHandle(u64::from(handle.0))),
        }
    }

    fn register_vfi(&self, vport: VportId, _fabric_name: Wwn) -> Result<(), TransportError> {
        self.state.lock().vfi_registrations += 1;
        self.events.send(TransportEvent::RegVfi {
            vport,
            result: Ok(()),
        });
        Ok(())
    }

    fn register_vpi(&self, vport: VportId, _did: FcId) -> Result<(), TransportError> {
        self.state.lock().vpi_registrations += 1;
        self.events.send(TransportEvent::RegVpi {
            vport,
            result: Ok(()),
        });
        Ok(())
    }

    fn abort(&self, handle: CommandHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.refuse_aborts {
            return Err(TransportError::InvalidHandle(handle.0));
        }
        state.held.remove(&handle);
        state.aborted.push(handle);
        Ok(())
    }

    fn link_error_status(&self) -> LinkErrorStatus {
        LinkErrorStatus {
            loss_of_sync: 1,
            ..LinkErrorStatus::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ElsCommand;
    use crate::transport::{completion_channel, CompletionReceiver};
    use std::time::Duration;

    const TARGET: Wwn = Wwn::new(0x2100_0024_ff00_0001);

    fn request(exchange: u64, d_id: FcId, payload: RequestPayload) -> ElsRequest {
        ElsRequest {
            exchange: ExchangeId(exchange),
            vport: VportId::PHYSICAL,
            s_id: FcId::new(FIRST_PORT_ID),
            d_id,
            payload,
            timeout: Duration::from_secs(20),
        }
    }

    fn completion(rx: &mut CompletionReceiver) -> CompletionStatus {
        match rx.try_recv() {
            Ok(TransportEvent::Completion { status, .. }) => status,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn test_flogi_grants_address() {
        let (tx, mut rx) = completion_channel();
        let fabric = LoopbackFabric::new(tx, LoopbackTopology::default());
        let sp = ServiceParams::local(Wwn::new(1), Wwn::new(2), 2000, 10_000);
        fabric
            .submit_command(request(1, FcId::FABRIC, RequestPayload::Flogi(sp)))
            .expect("submit");

        match completion(&mut rx) {
            CompletionStatus::Success(AccPayload::Login { params, d_id }) => {
                assert!(params.fport);
                assert!(params.multiple_nport_ids);
                assert_eq!(d_id, FcId::new(FIRST_PORT_ID));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fabric.granted(VportId::PHYSICAL), Some(FcId::new(FIRST_PORT_ID)));
    }

    #[test]
    fn test_name_server_lists_online_ports() {
        let (tx, mut rx) = completion_channel();
        let ports = vec![
            RemotePort::target(TARGET, Wwn::new(0x20), FcId::new(0x010300)),
            RemotePort {
                online: false,
                ..RemotePort::target(Wwn::new(0x31), Wwn::new(0x30), FcId::new(0x010200))
            },
        ];
        let fabric = LoopbackFabric::with_ports(tx, LoopbackTopology::default(), ports);
        let payload = RequestPayload::Ct(CtRequest::GidFt { fc4_type: 8 });
        fabric
            .submit_command(request(1, FcId::NAME_SERVER, payload))
            .expect("submit");
        assert_eq!(
            completion(&mut rx),
            CompletionStatus::Success(AccPayload::PortIds(vec![FcId::new(0x010300)]))
        );
    }

    #[test]
    fn test_unknown_destination_is_rejected() {
        let (tx, mut rx) = completion_channel();
        let fabric = LoopbackFabric::new(tx, LoopbackTopology::default());
        let sp = ServiceParams::local(Wwn::new(1), Wwn::new(2), 2000, 10_000);
        fabric
            .submit_command(request(1, FcId::new(0x010900), RequestPayload::Plogi(sp)))
            .expect("submit");
        assert_eq!(
            completion(&mut rx),
            CompletionStatus::NportReject { temporary: false }
        );
    }

    #[test]
    fn test_scripted_failure_and_hold() {
        let (tx, mut rx) = completion_channel();
        let fabric = LoopbackFabric::new(tx, LoopbackTopology::default());
        fabric.fail_next(ElsCommand::Scr, None, CompletionStatus::FabricBusy);
        fabric
            .submit_command(request(1, FcId::FABRIC_CONTROLLER, RequestPayload::Scr))
            .expect("submit");
        assert_eq!(completion(&mut rx), CompletionStatus::FabricBusy);

        fabric.hold(ElsCommand::Scr);
        fabric
            .submit_command(request(2, FcId::FABRIC_CONTROLLER, RequestPayload::Scr))
            .expect("submit");
        assert!(rx.try_recv().is_err());
        assert_eq!(fabric.held(), 1);

        assert_eq!(fabric.release(ElsCommand::Scr, CompletionStatus::NportBusy), 1);
        assert_eq!(completion(&mut rx), CompletionStatus::NportBusy);
    }

    #[test]
    fn test_link_down_refuses_submission() {
        let (tx, _rx) = completion_channel();
        let fabric = LoopbackFabric::new(tx, LoopbackTopology::default());
        fabric.set_link(false);
        let err = fabric
            .submit_command(request(1, FcId::FABRIC_CONTROLLER, RequestPayload::Scr))
            .expect_err("link down");
        assert_eq!(err, TransportError::LinkDown);
    }

    #[test]
    fn test_login_registration_reports_event() {
        let (tx, mut rx) = completion_channel();
        let fabric = LoopbackFabric::new(tx, LoopbackTopology::default());
        let sp = ServiceParams::local(TARGET, Wwn::new(2), 2000, 10_000);
        let handle = fabric
            .register_login(VportId::PHYSICAL, FcId::new(0x010300), &sp)
            .expect("register");
        match rx.try_recv() {
            Ok(TransportEvent::RegLogin { handle: h, result, .. }) => {
                assert_eq!(h, handle);
                assert!(result.is_ok());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fabric.logins(), 1);
        fabric
            .unregister_login(VportId::PHYSICAL, handle)
            .expect("unregister");
        assert!(fabric.unregister_login(VportId::PHYSICAL, handle).is_err());
    }
}
