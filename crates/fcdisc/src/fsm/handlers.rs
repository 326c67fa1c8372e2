// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State machine handlers, one per distinct behaviour of the transition table.

use super::{Action, EventArg, FsmContext};
use crate::els::ErrorClass;
use crate::node::{Node, NodeFlags, NodeState};
use crate::protocol::{
    AccPayload, ElsCommand, Fc4Roles, LsRjt, RejectExplanation, RejectReason, RequestPayload,
};

const NAME_MISMATCH: LsRjt =
    LsRjt::new(RejectReason::UnableToPerform, RejectExplanation::InvalidPortName);

// Shared steps.

/// Release the login handle, registered or merely reserved.
fn unreg(node: &mut Node, actions: &mut Vec<Action>) {
    if let Some(handle) = node.login.take() {
        actions.push(Action::UnregisterLogin(handle));
    }
    node.login_registered = false;
    node.flags.remove(NodeFlags::ADISC_CAPABLE | NodeFlags::ACC_REG_LOGIN);
}

fn cancel_retry(node: &mut Node, actions: &mut Vec<Action>) {
    if node.flags.contains(NodeFlags::DELAY_ARMED) {
        node.flags.remove(NodeFlags::DELAY_ARMED);
        actions.push(Action::CancelRetry);
    }
}

/// Arm a delayed relogin unless the node ran out of retries.
fn schedule_retry(ctx: &FsmContext<'_>, node: &mut Node, actions: &mut Vec<Action>) {
    if node.retry >= ctx.max_retries || node.flags.contains(NodeFlags::DELAY_ARMED) {
        return;
    }
    node.retry += 1;
    node.flags.insert(NodeFlags::DELAY_ARMED);
    actions.push(Action::ScheduleRetry(ctx.retry_delay));
}

/// Logged in: Mapped when the peer is a target, Unmapped otherwise.
fn settle(node: &mut Node) {
    node.state = if node.roles.target {
        NodeState::Mapped
    } else {
        NodeState::Unmapped
    };
    node.retry = 0;
    node.flags
        .remove(NodeFlags::NEEDS_DISCOVERY | NodeFlags::ADISC_CAPABLE | NodeFlags::REMOVAL_PENDING);
}

pub(super) fn free(_: &FsmContext<'_>, node: &mut Node, _: &EventArg, actions: &mut Vec<Action>) {
    unreg(node, actions);
    node.state = NodeState::Freed;
}

pub(super) fn stay(_: &FsmContext<'_>, _: &mut Node, _: &EventArg, _: &mut Vec<Action>) {}

// Unsolicited requests.

pub(super) fn reject_login_required(
    _: &FsmContext<'_>,
    _: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::Reject(LsRjt::LOGIN_REQUIRED));
}

pub(super) fn reject_busy(_: &FsmContext<'_>, _: &mut Node, _: &EventArg, actions: &mut Vec<Action>) {
    actions.push(Action::Reject(LsRjt::BUSY));
}

pub(super) fn accept_empty(_: &FsmContext<'_>, _: &mut Node, _: &EventArg, actions: &mut Vec<Action>) {
    actions.push(Action::Accept(AccPayload::Empty));
}

/// Accept a PLOGI: drop any previous login and register the new one.
pub(super) fn accept_plogi(
    _: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    let Some(params) = arg.login_params().copied() else {
        actions.push(Action::Reject(LsRjt::BAD_SERVICE_PARAMS));
        return;
    };
    cancel_retry(node, actions);
    unreg(node, actions);
    node.wwpn = params.wwpn;
    node.wwnn = params.wwnn;
    node.service_params = Some(params);
    node.roles = Fc4Roles::default();
    node.flags.remove(NodeFlags::LOCAL_PLOGI);
    node.flags.insert(NodeFlags::ACC_REG_LOGIN);
    actions.push(Action::AcceptPlogi);
    node.state = NodeState::RegLoginIssue;
}

pub(super) fn abort_accept_plogi(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::AbortExchanges(None));
    accept_plogi(ctx, node, arg, actions);
}

/// PLOGI crossed with our own: the higher port name keeps its PLOGI.
pub(super) fn plogi_collision(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    let Some(remote) = arg.login_params().map(|p| p.wwpn) else {
        actions.push(Action::Reject(LsRjt::BAD_SERVICE_PARAMS));
        return;
    };
    if ctx.wwpn > remote {
        actions.push(Action::Reject(LsRjt::IN_PROGRESS));
        return;
    }
    actions.push(Action::AbortExchanges(Some(ElsCommand::Plogi)));
    accept_plogi(ctx, node, arg, actions);
}

pub(super) fn plogi_issue_rcv_logo(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::Accept(AccPayload::Empty));
    actions.push(Action::AbortExchanges(Some(ElsCommand::Plogi)));
    unreg(node, actions);
    node.state = NodeState::Npr;
    schedule_retry(ctx, node, actions);
}

pub(super) fn plogi_issue_rcv_abort_reject(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::AbortExchanges(Some(ElsCommand::Plogi)));
    actions.push(Action::Reject(LsRjt::LOGIN_REQUIRED));
    unreg(node, actions);
    node.state = NodeState::Npr;
    schedule_retry(ctx, node, actions);
}

/// Accept a PRLI and record the roles it announces.
pub(super) fn accept_prli(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    if let Some(RequestPayload::Prli(params)) = arg.request().map(|f| &f.payload) {
        node.roles = params.roles();
    }
    actions.push(Action::Accept(AccPayload::Prli(ctx.prli())));
}

/// PRLI on an unmapped node may reveal a target.
pub(super) fn accept_prli_remap(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    accept_prli(ctx, node, arg, actions);
    if node.roles.target {
        node.state = NodeState::Mapped;
    }
}

pub(super) fn accept_logo_npr(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::Accept(AccPayload::Empty));
    unreg(node, actions);
    node.state = NodeState::Npr;
}

pub(super) fn abort_accept_logo_npr(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::AbortExchanges(None));
    accept_logo_npr(ctx, node, arg, actions);
}

/// LOGO or PRLO on a mapped node: log out and come back later.
pub(super) fn accept_logout_relogin(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    accept_logo_npr(ctx, node, arg, actions);
    node.roles = Fc4Roles::default();
    schedule_retry(ctx, node, actions);
}

pub(super) fn accept_prlo_abort_npr(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::Accept(AccPayload::Empty));
    actions.push(Action::AbortExchanges(None));
    node.state = NodeState::Npr;
}

/// ADISC/PDISC: accept when the announced names match what we know.
pub(super) fn verify_names(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    let matches = arg
        .announced_names()
        .is_some_and(|(wwpn, wwnn)| wwpn == node.wwpn && wwnn == node.wwnn);
    if !matches {
        actions.push(Action::Reject(NAME_MISMATCH));
        return;
    }
    let payload = match arg.request().map(|f| &f.payload) {
        Some(RequestPayload::Pdisc(_)) => AccPayload::Login {
            params: ctx.service_params,
            d_id: node.did,
        },
        _ => AccPayload::Adisc(ctx.adisc()),
    };
    actions.push(Action::Accept(payload));
}

// Completions of our own requests.

pub(super) fn cmpl_plogi(
    _: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    let params = match arg.response() {
        Some(Ok(AccPayload::Login { params, .. })) => *params,
        _ => {
            unreg(node, actions);
            node.state = NodeState::Npr;
            return;
        }
    };
    if let Err(err) = params.validate() {
        tracing::warn!("[fsm] {} {} PLOGI accept rejected: {}", node.vport, node.did, err);
        unreg(node, actions);
        node.state = NodeState::Npr;
        return;
    }
    unreg(node, actions);
    node.wwpn = params.wwpn;
    node.wwnn = params.wwnn;
    node.service_params = Some(params);
    node.flags.insert(NodeFlags::LOCAL_PLOGI);
    node.flags.remove(NodeFlags::ACC_REG_LOGIN);
    actions.push(Action::RegisterLogin);
    node.state = NodeState::RegLoginIssue;
}

/// Registration finished for a login we are not waiting on.
pub(super) fn record_reg_login(
    _: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    _: &mut Vec<Action>,
) {
    match arg {
        EventArg::RegLogin(Ok(())) if node.login.is_some() => node.login_registered = true,
        _ => {
            node.login = None;
            node.login_registered = false;
        }
    }
}

pub(super) fn cmpl_reg_login(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    if !matches!(arg, EventArg::RegLogin(Ok(()))) {
        unreg(node, actions);
        node.state = NodeState::Npr;
        schedule_retry(ctx, node, actions);
        return;
    }
    node.login_registered = true;
    if node.flags.contains(NodeFlags::LOCAL_PLOGI) && !node.is_fabric_service() {
        actions.push(Action::Issue(ElsCommand::Prli));
        node.state = NodeState::PrliIssue;
    } else {
        settle(node);
    }
}

pub(super) fn cmpl_prli(
    _: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    _: &mut Vec<Action>,
) {
    match arg.response() {
        Some(Ok(AccPayload::Prli(params))) => {
            node.roles = params.roles();
            settle(node);
        }
        Some(Err(failure)) if failure.class == ErrorClass::LinkLost => {
            node.state = NodeState::Npr;
        }
        _ => {
            // Logged in, but no FCP process login.
            node.roles = Fc4Roles::default();
            settle(node);
        }
    }
}

pub(super) fn cmpl_adisc(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    let confirmed = match arg.response() {
        Some(Ok(AccPayload::Adisc(params))) => {
            params.wwpn == node.wwpn && params.wwnn == node.wwnn
        }
        _ => false,
    };
    if confirmed {
        settle(node);
        return;
    }
    unreg(node, actions);
    node.state = NodeState::Npr;
    schedule_retry(ctx, node, actions);
}

pub(super) fn cmpl_logo(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    unreg(node, actions);
    node.roles = Fc4Roles::default();
    node.state = if node.flags.contains(NodeFlags::REMOVAL_PENDING) {
        NodeState::Freed
    } else {
        NodeState::Npr
    };
}

// Device removal and recovery.

pub(super) fn abort_free(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::AbortExchanges(None));
    free(ctx, node, arg, actions);
}

pub(super) fn abort_npr(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::AbortExchanges(None));
    if node.login_registered {
        node.flags.insert(NodeFlags::ADISC_CAPABLE);
    }
    node.state = NodeState::Npr;
}

pub(super) fn unreg_npr(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    unreg(node, actions);
    node.state = NodeState::Npr;
}

/// Logged-in node loses contact: keep the login so ADISC can revalidate it.
pub(super) fn recover_keep_login(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    _: &mut Vec<Action>,
) {
    if node.login_registered {
        node.flags.insert(NodeFlags::ADISC_CAPABLE);
    }
    node.state = NodeState::Npr;
}

// NPR.

pub(super) fn npr_rcv_prli(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::Reject(LsRjt::LOGIN_REQUIRED));
    let idle = !node
        .flags
        .intersects(NodeFlags::PENDING | NodeFlags::DELAY_ARMED | NodeFlags::REMOVAL_PENDING);
    if idle {
        actions.push(Action::Issue(ElsCommand::Plogi));
        node.state = NodeState::PlogiIssue;
    }
}

pub(super) fn npr_rcv_logo(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    actions.push(Action::Accept(AccPayload::Empty));
    unreg(node, actions);
}

pub(super) fn npr_rcv_adisc(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    if node.login_registered {
        verify_names(ctx, node, arg, actions);
    } else {
        actions.push(Action::Reject(LsRjt::LOGIN_REQUIRED));
    }
}

/// Late completion in NPR: finish a deferred removal once idle.
pub(super) fn npr_stale_completion(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    if node.flags.contains(NodeFlags::REMOVAL_PENDING) && node.outstanding == 0 {
        free(ctx, node, arg, actions);
    }
}

pub(super) fn npr_cmpl_logo(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    unreg(node, actions);
    npr_stale_completion(ctx, node, arg, actions);
}

pub(super) fn npr_device_rm(
    ctx: &FsmContext<'_>,
    node: &mut Node,
    arg: &EventArg,
    actions: &mut Vec<Action>,
) {
    cancel_retry(node, actions);
    if node.outstanding > 0 {
        node.flags.insert(NodeFlags::REMOVAL_PENDING);
        return;
    }
    free(ctx, node, arg, actions);
}

pub(super) fn npr_device_recovery(
    _: &FsmContext<'_>,
    node: &mut Node,
    _: &EventArg,
    actions: &mut Vec<Action>,
) {
    cancel_retry(node, actions);
    node.flags.remove(NodeFlags::REMOVAL_PENDING);
    node.retry = 0;
}
