// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ELS command engine.
//!
//! Submits requests, tracks outstanding exchanges, classifies completions and
//! applies the retry policy. Every exchange owns a [`NodeRef`]; dropping the
//! exchange clears the node's pending bit and outstanding count, so each exit
//! path (success, failure, abort) releases the node exactly once.

pub mod retry;
pub mod status;

pub use retry::{FailureHint, RetryDecision, RetryPolicy, RetryRule, StatusMatch};
pub use status::{CompletionStatus, ElsFailure, ErrorClass, ExchangeOutcome, LocalReject};

use crate::error::{FcError, Result, TransportError};
use crate::metrics::EngineMetrics;
use crate::node::{NodeFlags, NodeRef};
use crate::protocol::{AccPayload, Command, FcId, RequestPayload};
use crate::transport::{CommandHandle, ElsRequest, ExchangeId, Transport};
use crate::vport::VportId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// One outstanding request.
#[derive(Debug)]
pub struct Exchange {
    /// Engine-assigned identifier, also the transport's completion key.
    pub id: ExchangeId,
    pub vport: VportId,
    /// Node the exchange is charged to; moved by [`ElsEngine::rebind`].
    pub node: NodeRef,
    pub command: Command,
    pub s_id: FcId,
    pub d_id: FcId,
    /// Request, kept for resubmission.
    pub payload: RequestPayload,
    /// Retries made so far.
    pub retries: u32,
    /// `None` while parked for a retry.
    pub deadline: Option<Instant>,
    /// Transport handle of the submission in flight.
    pub handle: Option<CommandHandle>,
    waiter: Option<oneshot::Sender<ExchangeOutcome>>,
}

impl Exchange {
    fn notify(&mut self, outcome: ExchangeOutcome) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(outcome);
        }
    }

    fn is_parked(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.notify(ExchangeOutcome::Aborted);
        let mut node = self.node.lock();
        node.outstanding = node.outstanding.saturating_sub(1);
        node.flags.remove(NodeFlags::pending_for(self.command));
    }
}

/// Identity of a finished exchange, handed back with its result.
#[derive(Debug, Clone)]
pub struct Finished {
    pub id: ExchangeId,
    pub vport: VportId,
    pub node: NodeRef,
    pub command: Command,
    pub d_id: FcId,
    /// Request that was answered.
    pub request: RequestPayload,
}

/// Result of feeding a completion to the engine.
#[derive(Debug)]
pub enum CompletionOutcome {
    Success {
        done: Finished,
        payload: AccPayload,
    },
    /// Exchange parked; the caller schedules [`ElsEngine::reissue`].
    Retry { id: ExchangeId, delay: Duration },
    Failed {
        done: Finished,
        failure: ElsFailure,
        hint: Option<FailureHint>,
    },
    /// Unknown exchange, or the adapter is unloading.
    Stale,
}

/// Outstanding exchange table plus retry policy.
pub struct ElsEngine {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    metrics: Arc<EngineMetrics>,
    exchanges: BTreeMap<ExchangeId, Exchange>,
    next_id: u64,
    timeout: Duration,
    link_up: bool,
    unloading: bool,
}

impl ElsEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        timeout: Duration,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            transport,
            policy,
            metrics,
            exchanges: BTreeMap::new(),
            next_id: 0,
            timeout,
            link_up: false,
            unloading: false,
        }
    }

    /// Track the link; submissions fail fast while it is down.
    pub fn set_link(&mut self, up: bool) {
        self.link_up = up;
    }

    pub fn link_up(&self) -> bool {
        self.link_up
    }

    /// Refuse new exchanges and treat every later completion as stale.
    pub fn set_unloading(&mut self) {
        self.unloading = true;
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Exchanges in flight or parked.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn get(&self, id: ExchangeId) -> Option<&Exchange> {
        self.exchanges.get(&id)
    }

    /// Exchanges owned by `node`.
    pub fn outstanding_for(&self, node: &NodeRef) -> usize {
        self.exchanges
            .values()
            .filter(|ex| Arc::ptr_eq(&ex.node, node))
            .count()
    }

    /// Submit a request for `node` and track it.
    pub fn issue(
        &mut self,
        vport: VportId,
        s_id: FcId,
        node: &NodeRef,
        payload: RequestPayload,
        waiter: Option<oneshot::Sender<ExchangeOutcome>>,
    ) -> Result<ExchangeId> {
        if self.unloading {
            return Err(FcError::Unloading);
        }
        if !self.link_up {
            return Err(FcError::LinkDown);
        }

        let d_id = node.lock().did;
        let command = payload.command();
        self.next_id += 1;
        let id = ExchangeId(self.next_id);
        let request = ElsRequest {
            exchange: id,
            vport,
            s_id,
            d_id,
            payload: payload.clone(),
            timeout: self.timeout,
        };
        let handle = self.transport.submit_command(request).map_err(|err| match err {
            TransportError::LinkDown => FcError::LinkDown,
            other => FcError::Transport(other),
        })?;

        {
            let mut n = node.lock();
            n.outstanding += 1;
            n.flags.insert(NodeFlags::pending_for(command));
        }
        tracing::debug!("[els] {} {} -> {} ({})", command, s_id, d_id, id);
        self.exchanges.insert(
            id,
            Exchange {
                id,
                vport,
                node: Arc::clone(node),
                command,
                s_id,
                d_id,
                payload,
                retries: 0,
                deadline: Some(Instant::now() + self.timeout),
                handle: Some(handle),
                waiter,
            },
        );
        EngineMetrics::bump(&self.metrics.exchanges_issued);
        Ok(id)
    }

    /// Classify a completion and apply the retry policy.
    pub fn on_complete(&mut self, id: ExchangeId, status: CompletionStatus) -> CompletionOutcome {
        if self.unloading {
            EngineMetrics::bump(&self.metrics.stale_completions);
            return CompletionOutcome::Stale;
        }
        let Some(exchange) = self.exchanges.get_mut(&id) else {
            tracing::debug!("[els] completion for unknown {}", id);
            EngineMetrics::bump(&self.metrics.stale_completions);
            return CompletionOutcome::Stale;
        };

        let class = status.class();
        let mut hint = None;
        if class.is_some() {
            let decision =
                self.policy
                    .lookup(exchange.command, exchange.d_id, &status, exchange.retries);
            if decision.retry && self.link_up {
                exchange.retries += 1;
                exchange.handle = None;
                exchange.deadline = None;
                tracing::debug!(
                    "[els] {} to {} failed ({}), retry {}/{} in {:?}",
                    exchange.command,
                    exchange.d_id,
                    status,
                    exchange.retries,
                    decision.max_retries,
                    decision.delay
                );
                EngineMetrics::bump(&self.metrics.exchanges_retried);
                return CompletionOutcome::Retry {
                    id,
                    delay: decision.delay,
                };
            }
            hint = decision.hint;
        }

        let Some(mut exchange) = self.exchanges.remove(&id) else {
            return CompletionOutcome::Stale;
        };
        let done = Self::finished(&exchange);
        match (class, status) {
            (None, CompletionStatus::Success(payload)) => {
                exchange.notify(ExchangeOutcome::Success(payload.clone()));
                CompletionOutcome::Success { done, payload }
            }
            (class, status) => {
                tracing::debug!(
                    "[els] {} to {} failed after {} retries: {}",
                    exchange.command,
                    exchange.d_id,
                    exchange.retries,
                    status
                );
                EngineMetrics::bump(&self.metrics.exchanges_failed);
                exchange.notify(ExchangeOutcome::Failed(status.clone()));
                CompletionOutcome::Failed {
                    done,
                    failure: ElsFailure {
                        class: class.unwrap_or(ErrorClass::LocalTransport),
                        status,
                    },
                    hint,
                }
            }
        }
    }

    /// Resubmit a parked exchange. `None` when it went out again (or is gone).
    pub fn reissue(&mut self, id: ExchangeId) -> Option<CompletionOutcome> {
        if !self.exchanges.get(&id)?.is_parked() {
            return None;
        }
        if self.unloading {
            self.abort_ids(&[id]);
            return Some(CompletionOutcome::Stale);
        }
        if !self.link_up {
            return Some(self.on_complete(id, CompletionStatus::LINK_DOWN));
        }
        let exchange = self.exchanges.get_mut(&id)?;
        let request = ElsRequest {
            exchange: id,
            vport: exchange.vport,
            s_id: exchange.s_id,
            d_id: exchange.d_id,
            payload: exchange.payload.clone(),
            timeout: self.timeout,
        };
        match self.transport.submit_command(request) {
            Ok(handle) => {
                exchange.handle = Some(handle);
                exchange.deadline = Some(Instant::now() + self.timeout);
                None
            }
            Err(err) => {
                tracing::debug!("[els] resubmit of {} failed: {}", id, err);
                Some(self.on_complete(id, CompletionStatus::LocalReject(err.into())))
            }
        }
    }

    /// Abort every exchange owned by `node`, optionally only one command.
    pub fn abort_node(&mut self, node: &NodeRef, command: Option<Command>) -> usize {
        let ids: Vec<ExchangeId> = self
            .exchanges
            .values()
            .filter(|ex| Arc::ptr_eq(&ex.node, node) && command.map_or(true, |c| c == ex.command))
            .map(|ex| ex.id)
            .collect();
        self.abort_ids(&ids)
    }

    /// Abort every exchange of one vport.
    pub fn abort_vport(&mut self, vport: VportId) -> usize {
        let ids: Vec<ExchangeId> = self
            .exchanges
            .values()
            .filter(|ex| ex.vport == vport)
            .map(|ex| ex.id)
            .collect();
        self.abort_ids(&ids)
    }

    /// Abort every exchange. Returns how many were aborted.
    pub fn abort_all(&mut self) -> usize {
        let ids: Vec<ExchangeId> = self.exchanges.keys().copied().collect();
        self.abort_ids(&ids)
    }

    fn abort_ids(&mut self, ids: &[ExchangeId]) -> usize {
        let mut aborted = 0;
        for id in ids {
            let Some(mut exchange) = self.exchanges.remove(id) else {
                continue;
            };
            if let Some(handle) = exchange.handle {
                self.abort_on_wire(*id, handle);
            }
            tracing::debug!("[els] aborted {} {} to {}", id, exchange.command, exchange.d_id);
            exchange.notify(ExchangeOutcome::Aborted);
            EngineMetrics::bump(&self.metrics.exchanges_aborted);
            aborted += 1;
        }
        aborted
    }

    /// Fail every exchange with link-lost: waiters see the failure, nothing is retried.
    pub fn fail_all_link_lost(&mut self) -> Vec<Finished> {
        let exchanges = std::mem::take(&mut self.exchanges);
        let mut done = Vec::with_capacity(exchanges.len());
        for (id, mut exchange) in exchanges {
            if let Some(handle) = exchange.handle {
                self.abort_on_wire(id, handle);
            }
            EngineMetrics::bump(&self.metrics.exchanges_failed);
            done.push(Self::finished(&exchange));
            exchange.notify(ExchangeOutcome::Failed(CompletionStatus::LINK_DOWN));
        }
        done
    }

    /// Move exchanges of a retired node to the survivor of an identity merge.
    ///
    /// The registry already added the retired node's outstanding count and
    /// pending bits to the survivor.
    pub fn rebind(&mut self, from: &NodeRef, to: &NodeRef) -> usize {
        let mut moved = 0;
        for exchange in self.exchanges.values_mut() {
            if Arc::ptr_eq(&exchange.node, from) {
                exchange.node = Arc::clone(to);
                moved += 1;
            }
        }
        moved
    }

    /// Earliest deadline of a submitted exchange.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.exchanges.values().filter_map(|ex| ex.deadline).min()
    }

    /// Abort exchanges whose deadline passed and complete them with a
    /// sequence timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<CompletionOutcome> {
        let ids: Vec<ExchangeId> = self
            .exchanges
            .values()
            .filter(|ex| ex.deadline.is_some_and(|d| d <= now))
            .map(|ex| ex.id)
            .collect();
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(handle) = self.exchanges.get(&id).and_then(|ex| ex.handle) {
                self.abort_on_wire(id, handle);
            }
            tracing::debug!("[els] {} timed out", id);
            outcomes.push(
                self.on_complete(id, CompletionStatus::LocalReject(LocalReject::SequenceTimeout)),
            );
        }
        outcomes
    }

    fn abort_on_wire(&self, id: ExchangeId, handle: CommandHandle) {
        if let Err(err) = self.transport.abort(handle) {
            tracing::warn!("[els] abort of {} failed: {}", id, err);
        }
    }

    fn finished(exchange: &Exchange) -> Finished {
        Finished {
            id: exchange.id,
            vport: exchange.vport,
            node: Arc::clone(&exchange.node),
            command: exchange.command,
            d_id: exchange.d_id,
            request: exchange.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests;
