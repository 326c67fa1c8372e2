// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retry and backoff policy.
//!
//! An ordered rule table: the first rule matching the command, destination
//! and status decides whether the exchange is retried, after which delay and
//! up to how many times. Configured rules are consulted before the built-in
//! table. The policy is immutable once built.

use super::status::{CompletionStatus, ErrorClass, LocalReject};
use crate::protocol::{Command, ElsCommand, FcId, RejectExplanation, RejectReason};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Budget used by the "no resources" rule.
pub const NO_RESOURCE_MAX_RETRIES: u32 = 250;
/// Budget used by the long-lived login retry rules.
pub const LONG_MAX_RETRIES: u32 = 48;

/// Status selector of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusMatch {
    LocalReject {
        codes: Vec<LocalReject>,
    },
    LsRjt {
        reason: RejectReason,
        #[serde(default)]
        explanation: Option<RejectExplanation>,
    },
    NportBusy,
    FabricBusy,
    /// P_RJT or F_RJT; `temporary = None` matches both kinds.
    PortReject {
        #[serde(default)]
        temporary: Option<bool>,
    },
    Any,
}

impl StatusMatch {
    pub fn matches(&self, status: &CompletionStatus) -> bool {
        match (self, status) {
            (Self::Any, _) => !status.is_success(),
            (Self::LocalReject { codes }, CompletionStatus::LocalReject(code)) => {
                codes.contains(code)
            }
            (Self::LsRjt { reason, explanation }, CompletionStatus::LsRjt(rjt)) => {
                *reason == rjt.reason && explanation.map_or(true, |e| e == rjt.explanation)
            }
            (Self::NportBusy, CompletionStatus::NportBusy) => true,
            (Self::FabricBusy, CompletionStatus::FabricBusy) => true,
            (
                Self::PortReject { temporary },
                CompletionStatus::NportReject { temporary: t }
                | CompletionStatus::FabricReject { temporary: t },
            ) => temporary.map_or(true, |want| want == *t),
            _ => false,
        }
    }
}

/// User-visible failure reported on the vport when a rule gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHint {
    NoFabricResources,
    FabricRejectedWwn,
}

/// One row of the retry table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRule {
    /// Commands the rule applies to; empty matches any.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Destination restriction.
    #[serde(default)]
    pub did: Option<FcId>,
    /// Only the completion of the first attempt matches.
    #[serde(default)]
    pub first_attempt_only: bool,
    pub status: StatusMatch,
    /// Whether a match is retried at all.
    #[serde(default)]
    pub retry: bool,
    /// Delay before the resubmission.
    #[serde(default)]
    pub delay_ms: u64,
    /// Retries allowed before the failure is terminal.
    #[serde(default)]
    pub max_retries: u32,
    /// Once at least this many retries were made, `escalated_delay_ms`
    /// replaces `delay_ms`.
    #[serde(default)]
    pub escalate_after: Option<u32>,
    #[serde(default)]
    pub escalated_delay_ms: u64,
    #[serde(default)]
    pub hint: Option<FailureHint>,
}

impl RetryRule {
    fn new(commands: &[Command], status: StatusMatch) -> Self {
        Self {
            commands: commands.to_vec(),
            did: None,
            first_attempt_only: false,
            status,
            retry: false,
            delay_ms: 0,
            max_retries: 0,
            escalate_after: None,
            escalated_delay_ms: 0,
            hint: None,
        }
    }

    fn retry(mut self, delay_ms: u64, max_retries: u32) -> Self {
        self.retry = true;
        self.delay_ms = delay_ms;
        self.max_retries = max_retries;
        self
    }

    fn escalate(mut self, after: u32, delay_ms: u64) -> Self {
        self.escalate_after = Some(after);
        self.escalated_delay_ms = delay_ms;
        self
    }

    fn to(mut self, did: FcId) -> Self {
        self.did = Some(did);
        self
    }

    fn first_attempt(mut self) -> Self {
        self.first_attempt_only = true;
        self
    }

    fn hint(mut self, hint: FailureHint) -> Self {
        self.hint = Some(hint);
        self
    }

    fn applies(&self, command: Command, did: FcId, status: &CompletionStatus, retries: u32) -> bool {
        (self.commands.is_empty() || self.commands.contains(&command))
            && self.did.map_or(true, |d| d == did)
            && (!self.first_attempt_only || retries == 0)
            && self.status.matches(status)
    }
}

/// Verdict for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Resubmit the exchange.
    pub retry: bool,
    pub delay: Duration,
    /// Budget of the matching rule.
    pub max_retries: u32,
    pub hint: Option<FailureHint>,
}

impl RetryDecision {
    const GIVE_UP: RetryDecision = RetryDecision {
        retry: false,
        delay: Duration::ZERO,
        max_retries: 0,
        hint: None,
    };
}

const PLOGI: Command = Command::Els(ElsCommand::Plogi);
const PRLI: Command = Command::Els(ElsCommand::Prli);
const FLOGI: Command = Command::Els(ElsCommand::Flogi);
const FDISC: Command = Command::Els(ElsCommand::Fdisc);

fn ls_rjt(reason: RejectReason, explanation: Option<RejectExplanation>) -> StatusMatch {
    StatusMatch::LsRjt {
        reason,
        explanation,
    }
}

fn local(codes: &[LocalReject]) -> StatusMatch {
    StatusMatch::LocalReject {
        codes: codes.to_vec(),
    }
}

/// Built-in retry table.
pub fn default_rules(default_max: u32) -> Vec<RetryRule> {
    use LocalReject::*;

    vec![
        RetryRule::new(&[], local(&[NoResources, NoXri]))
            .retry(0, NO_RESOURCE_MAX_RETRIES)
            .escalate(101, 100),
        RetryRule::new(&[PLOGI], local(&[LoopOpenFailure]))
            .first_attempt()
            .retry(1000, default_max),
        RetryRule::new(&[PLOGI], local(&[InvalidRpi]))
            .to(FcId::NAME_SERVER)
            .retry(1000, LONG_MAX_RETRIES),
        RetryRule::new(&[FLOGI, FDISC], local(&[SequenceTimeout])).retry(1000, LONG_MAX_RETRIES),
        RetryRule::new(&[], local(&[SequenceTimeout, IllegalFrame, InvalidRpi]))
            .retry(100, default_max),
        RetryRule::new(&[], local(&[Aborted, LinkDown])),
        RetryRule::new(&[], StatusMatch::NportBusy).retry(100, default_max),
        RetryRule::new(&[], StatusMatch::FabricBusy).retry(100, default_max),
        RetryRule::new(&[PLOGI, PRLI], ls_rjt(RejectReason::LogicalBusy, None))
            .retry(1000, LONG_MAX_RETRIES),
        RetryRule::new(&[FLOGI, FDISC], ls_rjt(RejectReason::LogicalBusy, None))
            .retry(0, LONG_MAX_RETRIES)
            .escalate(32, 1000),
        RetryRule::new(
            &[PLOGI],
            ls_rjt(
                RejectReason::UnableToPerform,
                Some(RejectExplanation::CommandInProgress),
            ),
        )
        .retry(1000, LONG_MAX_RETRIES),
        RetryRule::new(
            &[],
            ls_rjt(
                RejectReason::UnableToPerform,
                Some(RejectExplanation::CommandInProgress),
            ),
        )
        .retry(1000, default_max),
        RetryRule::new(
            &[FDISC],
            ls_rjt(
                RejectReason::UnableToPerform,
                Some(RejectExplanation::OutOfResources),
            ),
        )
        .hint(FailureHint::NoFabricResources),
        RetryRule::new(&[PLOGI], ls_rjt(RejectReason::UnableToPerform, None))
            .retry(1000, default_max + 1),
        RetryRule::new(
            &[FDISC],
            ls_rjt(
                RejectReason::ProtocolError,
                Some(RejectExplanation::InvalidPortName),
            ),
        )
        .hint(FailureHint::FabricRejectedWwn),
        RetryRule::new(
            &[FDISC],
            ls_rjt(
                RejectReason::ProtocolError,
                Some(RejectExplanation::InvalidNportId),
            ),
        )
        .hint(FailureHint::FabricRejectedWwn),
        RetryRule::new(&[], StatusMatch::PortReject { temporary: Some(true) })
            .retry(100, default_max),
    ]
}

/// Immutable retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl RetryPolicy {
    /// Configured `rules` take precedence over the built-in table.
    pub fn new(rules: &[RetryRule], default_max: u32) -> Self {
        let mut all = rules.to_vec();
        all.extend(default_rules(default_max));
        Self { rules: all }
    }

    /// Rules in evaluation order: overrides first.
    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    /// Decide what to do after attempt number `retries + 1` failed.
    pub fn lookup(
        &self,
        command: Command,
        did: FcId,
        status: &CompletionStatus,
        retries: u32,
    ) -> RetryDecision {
        match status.class() {
            None | Some(ErrorClass::LinkLost) => return RetryDecision::GIVE_UP,
            Some(_) => {}
        }
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.applies(command, did, status, retries))
        else {
            return RetryDecision::GIVE_UP;
        };

        let delay_ms = match rule.escalate_after {
            Some(after) if retries >= after => rule.escalated_delay_ms,
            _ => rule.delay_ms,
        };
        RetryDecision {
            retry: rule.retry && retries < rule.max_retries,
            delay: Duration::from_millis(delay_ms),
            max_retries: rule.max_retries,
            hint: rule.hint,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&[], 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LsRjt;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn rjt(reason: RejectReason, explanation: RejectExplanation) -> CompletionStatus {
        CompletionStatus::LsRjt(LsRjt::new(reason, explanation))
    }

    const REMOTE: FcId = FcId::new(0x010200);

    #[test]
    fn test_no_resources_escalates_and_terminates() {
        let p = policy();
        let status = CompletionStatus::LocalReject(LocalReject::NoXri);
        let first = p.lookup(PLOGI, REMOTE, &status, 0);
        assert!(first.retry);
        assert_eq!(first.delay, Duration::ZERO);

        // Still immediate at 100 retries, slowed down past it.
        assert_eq!(p.lookup(PLOGI, REMOTE, &status, 100).delay, Duration::ZERO);
        let later = p.lookup(PLOGI, REMOTE, &status, 101);
        assert!(later.retry);
        assert_eq!(later.delay, Duration::from_millis(100));

        let no_resources = CompletionStatus::LocalReject(LocalReject::NoResources);
        assert_eq!(p.lookup(PLOGI, REMOTE, &no_resources, 100).delay, Duration::ZERO);
        assert_eq!(
            p.lookup(PLOGI, REMOTE, &no_resources, 101).delay,
            Duration::from_millis(100)
        );

        assert!(p.lookup(PLOGI, REMOTE, &status, 249).retry);
        // Completion of attempt 251 is terminal.
        assert!(!p.lookup(PLOGI, REMOTE, &status, 250).retry);
    }

    #[test]
    fn test_link_loss_never_retried() {
        let p = policy();
        for code in [LocalReject::Aborted, LocalReject::LinkDown] {
            let decision = p.lookup(PLOGI, REMOTE, &CompletionStatus::LocalReject(code), 0);
            assert!(!decision.retry);
        }
    }

    #[test]
    fn test_loop_open_failure_first_attempt_only() {
        let p = policy();
        let status = CompletionStatus::LocalReject(LocalReject::LoopOpenFailure);
        let first = p.lookup(PLOGI, REMOTE, &status, 0);
        assert!(first.retry);
        assert_eq!(first.delay, Duration::from_millis(1000));
        assert!(!p.lookup(PLOGI, REMOTE, &status, 1).retry);
        assert!(!p.lookup(PRLI, REMOTE, &status, 0).retry);
    }

    #[test]
    fn test_invalid_rpi_name_server_uses_long_budget() {
        let p = policy();
        let status = CompletionStatus::LocalReject(LocalReject::InvalidRpi);
        let ns = p.lookup(PLOGI, FcId::NAME_SERVER, &status, 10);
        assert!(ns.retry);
        assert_eq!(ns.max_retries, LONG_MAX_RETRIES);

        let other = p.lookup(PLOGI, REMOTE, &status, 0);
        assert_eq!(other.delay, Duration::from_millis(100));
        assert_eq!(other.max_retries, 3);
    }

    #[test]
    fn test_logical_busy_fabric_login_delay() {
        let p = policy();
        let status = rjt(RejectReason::LogicalBusy, RejectExplanation::NothingMore);
        assert_eq!(p.lookup(FLOGI, FcId::FABRIC, &status, 5).delay, Duration::ZERO);
        assert_eq!(
            p.lookup(FLOGI, FcId::FABRIC, &status, 32).delay,
            Duration::from_millis(1000)
        );
        assert!(!p.lookup(FDISC, FcId::FABRIC, &status, 48).retry);

        let plogi = p.lookup(PLOGI, REMOTE, &status, 0);
        assert_eq!(plogi.delay, Duration::from_millis(1000));
        assert_eq!(plogi.max_retries, LONG_MAX_RETRIES);
    }

    #[test]
    fn test_unable_to_perform_variants() {
        let p = policy();
        let in_progress = rjt(
            RejectReason::UnableToPerform,
            RejectExplanation::CommandInProgress,
        );
        assert_eq!(p.lookup(PLOGI, REMOTE, &in_progress, 0).max_retries, 48);
        assert_eq!(p.lookup(PRLI, REMOTE, &in_progress, 0).max_retries, 3);

        let plain = rjt(RejectReason::UnableToPerform, RejectExplanation::NothingMore);
        assert_eq!(p.lookup(PLOGI, REMOTE, &plain, 0).max_retries, 4);
        assert!(!p.lookup(PRLI, REMOTE, &plain, 0).retry);
    }

    #[test]
    fn test_fdisc_rejects_carry_hints() {
        let p = policy();
        let no_res = rjt(
            RejectReason::UnableToPerform,
            RejectExplanation::OutOfResources,
        );
        let decision = p.lookup(FDISC, FcId::FABRIC, &no_res, 0);
        assert!(!decision.retry);
        assert_eq!(decision.hint, Some(FailureHint::NoFabricResources));

        let bad_name = rjt(RejectReason::ProtocolError, RejectExplanation::InvalidPortName);
        assert_eq!(
            p.lookup(FDISC, FcId::FABRIC, &bad_name, 0).hint,
            Some(FailureHint::FabricRejectedWwn)
        );
    }

    #[test]
    fn test_port_reject_temporary_only() {
        let p = policy();
        assert!(p
            .lookup(PLOGI, REMOTE, &CompletionStatus::NportReject { temporary: true }, 0)
            .retry);
        assert!(!p
            .lookup(PLOGI, REMOTE, &CompletionStatus::FabricReject { temporary: false }, 0)
            .retry);
    }

    #[test]
    fn test_configured_rules_take_precedence() {
        let rule = RetryRule::new(&[PLOGI], StatusMatch::NportBusy).retry(5, 9);
        let p = RetryPolicy::new(&[rule], 3);
        let decision = p.lookup(PLOGI, REMOTE, &CompletionStatus::NportBusy, 4);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::from_millis(5));
        assert_eq!(decision.max_retries, 9);
        // Other commands still fall through to the built-in rule.
        assert_eq!(
            p.lookup(PRLI, REMOTE, &CompletionStatus::NportBusy, 0).max_retries,
            3
        );
    }

    #[test]
    fn test_unmatched_status_is_terminal() {
        let p = policy();
        let status = rjt(RejectReason::CommandNotSupported, RejectExplanation::NothingMore);
        assert_eq!(p.lookup(PLOGI, REMOTE, &status, 0), RetryDecision::GIVE_UP);
    }
}
