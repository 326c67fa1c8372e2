// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote port discovery state machine.
//!
//! Dispatch is an exhaustive match over `(NodeState, NodeEvent)` that yields a
//! handler. Handlers are pure: they update the node and return [`Action`]s for
//! the adapter to execute. Pairs without a handler are illegal transitions:
//! logged, counted and otherwise ignored.

mod handlers;

use crate::els::ElsFailure;
use crate::error::TransportError;
use crate::metrics::EngineMetrics;
use crate::node::{Node, NodeFlags, NodeState};
use crate::protocol::{
    AccPayload, AdiscParams, ElsCommand, Fc4Roles, FcId, InboundFrame, LsRjt, PrliParams,
    RequestPayload, ServiceParams, Wwn,
};
use crate::transport::LoginHandle;
use std::fmt;
use std::time::Duration;

/// Events fed to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    RcvPlogi,
    RcvPrli,
    RcvLogo,
    RcvAdisc,
    RcvPdisc,
    RcvPrlo,
    CmplPlogi,
    CmplPrli,
    CmplLogo,
    CmplAdisc,
    CmplRegLogin,
    DeviceRm,
    DeviceRecovery,
}

impl NodeEvent {
    pub const ALL: [NodeEvent; 13] = [
        NodeEvent::RcvPlogi,
        NodeEvent::RcvPrli,
        NodeEvent::RcvLogo,
        NodeEvent::RcvAdisc,
        NodeEvent::RcvPdisc,
        NodeEvent::RcvPrlo,
        NodeEvent::CmplPlogi,
        NodeEvent::CmplPrli,
        NodeEvent::CmplLogo,
        NodeEvent::CmplAdisc,
        NodeEvent::CmplRegLogin,
        NodeEvent::DeviceRm,
        NodeEvent::DeviceRecovery,
    ];

    /// Event raised by an unsolicited request.
    pub fn received(command: ElsCommand) -> Option<NodeEvent> {
        Some(match command {
            ElsCommand::Plogi => Self::RcvPlogi,
            ElsCommand::Prli => Self::RcvPrli,
            ElsCommand::Logo => Self::RcvLogo,
            ElsCommand::Adisc => Self::RcvAdisc,
            ElsCommand::Pdisc => Self::RcvPdisc,
            ElsCommand::Prlo => Self::RcvPrlo,
            _ => return None,
        })
    }

    /// Event raised by the completion of an exchange we issued.
    pub fn completed(command: ElsCommand) -> Option<NodeEvent> {
        Some(match command {
            ElsCommand::Plogi => Self::CmplPlogi,
            ElsCommand::Prli => Self::CmplPrli,
            ElsCommand::Logo => Self::CmplLogo,
            ElsCommand::Adisc => Self::CmplAdisc,
            _ => return None,
        })
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Data accompanying an event.
#[derive(Debug, Clone)]
pub enum EventArg {
    None,
    Request(InboundFrame),
    Response(Result<AccPayload, ElsFailure>),
    RegLogin(Result<(), TransportError>),
}

impl EventArg {
    pub fn request(&self) -> Option<&InboundFrame> {
        match self {
            Self::Request(frame) => Some(frame),
            _ => None,
        }
    }

    /// Service parameters of a received PLOGI/PDISC.
    fn login_params(&self) -> Option<&ServiceParams> {
        self.request().and_then(|frame| frame.payload.service_params())
    }

    /// Names announced by a received ADISC or PDISC.
    fn announced_names(&self) -> Option<(Wwn, Wwn)> {
        match &self.request()?.payload {
            RequestPayload::Adisc(params) => Some((params.wwpn, params.wwnn)),
            RequestPayload::Pdisc(params) => Some((params.wwpn, params.wwnn)),
            _ => None,
        }
    }

    fn response(&self) -> Option<&Result<AccPayload, ElsFailure>> {
        match self {
            Self::Response(result) => Some(result),
            _ => None,
        }
    }
}

/// Work requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Answer the triggering request with LS_ACC.
    Accept(AccPayload),
    /// Accept a PLOGI and register the login it creates.
    AcceptPlogi,
    Reject(LsRjt),
    Issue(ElsCommand),
    /// Register the login described by the node's service parameters.
    RegisterLogin,
    UnregisterLogin(LoginHandle),
    /// Abort outstanding exchanges of the node (`None` = all of them).
    AbortExchanges(Option<ElsCommand>),
    ScheduleRetry(Duration),
    CancelRetry,
}

/// Local port facts the handlers need.
#[derive(Debug, Clone, Copy)]
pub struct FsmContext<'a> {
    pub wwpn: Wwn,
    pub wwnn: Wwn,
    pub did: FcId,
    pub roles: Fc4Roles,
    pub service_params: ServiceParams,
    /// Delay before a node in NPR logs in again.
    pub retry_delay: Duration,
    /// Delayed-retry budget of a node.
    pub max_retries: u32,
    pub metrics: &'a EngineMetrics,
}

impl FsmContext<'_> {
    /// PRLI payload advertising the local roles.
    pub fn prli(&self) -> PrliParams {
        PrliParams::fcp(self.roles)
    }

    /// ADISC payload naming the local port.
    pub fn adisc(&self) -> AdiscParams {
        AdiscParams {
            wwpn: self.wwpn,
            wwnn: self.wwnn,
            port_id: self.did,
        }
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub old: NodeState,
    pub new: NodeState,
    /// Side effects for the adapter, in order.
    pub actions: Vec<Action>,
}

impl Transition {
    fn unchanged(state: NodeState) -> Self {
        Self {
            old: state,
            new: state,
            actions: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

type Handler = fn(&FsmContext<'_>, &mut Node, &EventArg, &mut Vec<Action>);

/// Handler for a state/event pair; `None` for illegal pairs.
fn lookup(state: NodeState, event: NodeEvent) -> Option<Handler> {
    use handlers as h;
    use NodeEvent::*;
    use NodeState::*;

    let handler: Handler = match (state, event) {
        (Unused, RcvPlogi) => h::accept_plogi,
        (Unused, RcvPrli | RcvAdisc | RcvPdisc | RcvPrlo) => h::reject_login_required,
        (Unused, RcvLogo) => h::accept_empty,
        (Unused, CmplLogo | DeviceRecovery) => h::stay,
        (Unused, DeviceRm) => h::free,
        (Unused, CmplPlogi | CmplPrli | CmplAdisc | CmplRegLogin) => return None,

        (PlogiIssue, RcvPlogi) => h::plogi_collision,
        (PlogiIssue, RcvPrli) => h::reject_login_required,
        (PlogiIssue, RcvLogo) => h::plogi_issue_rcv_logo,
        (PlogiIssue, RcvAdisc | RcvPdisc | RcvPrlo) => h::plogi_issue_rcv_abort_reject,
        (PlogiIssue, CmplPlogi) => h::cmpl_plogi,
        (PlogiIssue, CmplLogo) => h::stay,
        (PlogiIssue, CmplRegLogin) => h::record_reg_login,
        (PlogiIssue, CmplPrli | CmplAdisc) => return None,
        (PlogiIssue, DeviceRm) => h::abort_free,
        (PlogiIssue, DeviceRecovery) => h::abort_npr,

        (AdiscIssue, RcvPlogi) => h::abort_accept_plogi,
        (AdiscIssue, RcvPrli) => h::accept_prli,
        (AdiscIssue, RcvLogo) => h::abort_accept_logo_npr,
        (AdiscIssue, RcvAdisc | RcvPdisc) => h::verify_names,
        (AdiscIssue, RcvPrlo) => h::accept_prlo_abort_npr,
        (AdiscIssue, CmplAdisc) => h::cmpl_adisc,
        (AdiscIssue, CmplPlogi | CmplPrli | CmplLogo | CmplRegLogin) => return None,
        (AdiscIssue, DeviceRm) => h::abort_free,
        (AdiscIssue, DeviceRecovery) => h::abort_npr,

        (RegLoginIssue, RcvPlogi) => h::accept_plogi,
        (RegLoginIssue, RcvPrli) => h::accept_prli,
        (RegLoginIssue, RcvLogo) => h::accept_logo_npr,
        (RegLoginIssue, RcvAdisc | RcvPdisc) => h::verify_names,
        (RegLoginIssue, RcvPrlo) => h::accept_empty,
        (RegLoginIssue, CmplRegLogin) => h::cmpl_reg_login,
        (RegLoginIssue, CmplPlogi | CmplPrli | CmplLogo | CmplAdisc) => return None,
        (RegLoginIssue, DeviceRm) => h::free,
        (RegLoginIssue, DeviceRecovery) => h::unreg_npr,

        (PrliIssue, RcvPlogi) => h::abort_accept_plogi,
        (PrliIssue, RcvPrli) => h::accept_prli,
        (PrliIssue, RcvLogo) => h::abort_accept_logo_npr,
        (PrliIssue, RcvAdisc | RcvPdisc) => h::verify_names,
        (PrliIssue, RcvPrlo) => h::accept_empty,
        (PrliIssue, CmplPrli) => h::cmpl_prli,
        (PrliIssue, CmplPlogi | CmplLogo | CmplAdisc | CmplRegLogin) => return None,
        (PrliIssue, DeviceRm) => h::abort_free,
        (PrliIssue, DeviceRecovery) => h::abort_npr,

        (LogoIssue, RcvPlogi) => h::reject_busy,
        (LogoIssue, RcvPrli | RcvAdisc | RcvPdisc) => h::reject_login_required,
        (LogoIssue, RcvLogo | RcvPrlo) => h::accept_empty,
        (LogoIssue, CmplLogo) => h::cmpl_logo,
        (LogoIssue, CmplPlogi | CmplPrli | CmplAdisc | CmplRegLogin) => return None,
        (LogoIssue, DeviceRm) => h::abort_free,
        (LogoIssue, DeviceRecovery) => h::abort_npr,

        (Unmapped, RcvPlogi) => h::accept_plogi,
        (Unmapped, RcvPrli) => h::accept_prli_remap,
        (Unmapped, RcvLogo) => h::accept_logo_npr,
        (Unmapped, RcvAdisc | RcvPdisc) => h::verify_names,
        (Unmapped, RcvPrlo) => h::accept_empty,
        (Unmapped, CmplPlogi | CmplPrli | CmplLogo | CmplAdisc | CmplRegLogin) => return None,
        (Unmapped, DeviceRm) => h::free,
        (Unmapped, DeviceRecovery) => h::recover_keep_login,

        (Mapped, RcvPlogi) => h::accept_plogi,
        (Mapped, RcvPrli) => h::accept_prli,
        (Mapped, RcvLogo | RcvPrlo) => h::accept_logout_relogin,
        (Mapped, RcvAdisc | RcvPdisc) => h::verify_names,
        (Mapped, CmplPlogi | CmplPrli | CmplLogo | CmplAdisc | CmplRegLogin) => return None,
        (Mapped, DeviceRm) => return None,
        (Mapped, DeviceRecovery) => h::recover_keep_login,

        (Npr, RcvPlogi) => h::accept_plogi,
        (Npr, RcvPrli) => h::npr_rcv_prli,
        (Npr, RcvLogo) => h::npr_rcv_logo,
        (Npr, RcvAdisc | RcvPdisc) => h::npr_rcv_adisc,
        (Npr, RcvPrlo) => h::accept_empty,
        (Npr, CmplPlogi | CmplPrli | CmplAdisc) => h::npr_stale_completion,
        (Npr, CmplLogo) => h::npr_cmpl_logo,
        (Npr, CmplRegLogin) => h::record_reg_login,
        (Npr, DeviceRm) => h::npr_device_rm,
        (Npr, DeviceRecovery) => h::npr_device_recovery,

        (Freed, DeviceRm) => h::stay,
        (Freed, _) => return None,
    };
    Some(handler)
}

/// Whether `event` has a handler in `state`.
pub fn is_defined(state: NodeState, event: NodeEvent) -> bool {
    lookup(state, event).is_some()
}

/// Feed `event` to `node`.
pub fn dispatch(ctx: &FsmContext<'_>, node: &mut Node, event: NodeEvent, arg: &EventArg) -> Transition {
    let old = node.state;
    let Some(handler) = lookup(old, event) else {
        return illegal_transition(ctx, node, event);
    };

    let mut actions = Vec::new();
    handler(ctx, node, arg, &mut actions);
    let new = node.state;

    // Login handles do not survive Unused or Freed.
    if matches!(new, NodeState::Unused | NodeState::Freed) {
        if let Some(handle) = node.login.take() {
            node.login_registered = false;
            actions.push(Action::UnregisterLogin(handle));
        }
        if new == NodeState::Freed
            && node.retry_timer.is_some()
            && !actions.contains(&Action::CancelRetry)
        {
            node.flags.remove(NodeFlags::DELAY_ARMED);
            actions.push(Action::CancelRetry);
        }
    }

    if old != new {
        tracing::debug!(
            "[fsm] {} {} {}: {} -> {}",
            node.vport,
            node.did,
            event,
            old,
            new
        );
    }
    Transition { old, new, actions }
}

fn illegal_transition(ctx: &FsmContext<'_>, node: &Node, event: NodeEvent) -> Transition {
    tracing::warn!(
        "[fsm] {} {} illegal event {} in state {}",
        node.vport,
        node.did,
        event,
        node.state
    );
    EngineMetrics::bump(&ctx.metrics.illegal_transitions);
    Transition::unchanged(node.state)
}

/// Start a PLOGI from Unused or NPR.
pub fn start_plogi(node: &mut Node) -> Option<Transition> {
    begin(node, NodeState::PlogiIssue, ElsCommand::Plogi)
}

/// Revalidate a still-registered login with ADISC from NPR.
pub fn start_adisc(node: &mut Node) -> Option<Transition> {
    if node.login.is_none() || !node.login_registered {
        return None;
    }
    begin(node, NodeState::AdiscIssue, ElsCommand::Adisc)
}

/// Explicit logout of a logged-in node.
pub fn start_logo(node: &mut Node, remove: bool) -> Option<Transition> {
    if !node.state.is_ready() && node.state != NodeState::Npr {
        return None;
    }
    if remove {
        node.flags.insert(NodeFlags::REMOVAL_PENDING);
    }
    begin(node, NodeState::LogoIssue, ElsCommand::Logo)
}

fn begin(node: &mut Node, state: NodeState, command: ElsCommand) -> Option<Transition> {
    let old = node.state;
    let from_ok = match command {
        ElsCommand::Logo => true,
        _ => matches!(old, NodeState::Unused | NodeState::Npr),
    };
    if !from_ok || node.has_pending(command.into()) {
        return None;
    }
    let mut actions = Vec::new();
    if node.flags.contains(NodeFlags::DELAY_ARMED) {
        node.flags.remove(NodeFlags::DELAY_ARMED);
        actions.push(Action::CancelRetry);
    }
    node.flags.remove(NodeFlags::NEEDS_DISCOVERY);
    node.state = state;
    actions.push(Action::Issue(command));
    tracing::debug!("[fsm] {} {} start {}: {} -> {}", node.vport, node.did, command, old, state);
    Some(Transition {
        old,
        new: state,
        actions,
    })
}
