// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tokio actor wrapping an [`Adapter`].
//!
//! ```text
//!   AdapterHandle ── cmd_tx (bounded) ──┐
//!                                       ▼
//!   ┌────────────────────────────────────────────────┐
//!   │  tokio::select! {                              │
//!   │      cmd   = cmd_rx.recv()    => admin request │
//!   │      event = events.recv()    => transport     │
//!   │      _     = sleep_until(..)  => timers        │
//!   │  }                                             │
//!   └────────────────────────────────────────────────┘
//! ```
//!
//! Every event is handled to completion before the next one is taken, so
//! the adapter needs no internal locking beyond its node mutexes.

use super::{Adapter, AdapterSnapshot};
use crate::els::ExchangeOutcome;
use crate::error::{FcError, Result};
use crate::protocol::{FcId, RequestPayload, Wwn};
use crate::transport::{CompletionReceiver, ExchangeId};
use crate::vport::VportId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Command channel capacity (provides backpressure to callers).
const CMD_CHANNEL_CAPACITY: usize = 64;

/// Poll interval of [`AdapterHandle::wait_settled`].
const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Commands
// ============================================================================

enum AdapterCommand {
    CreateVport {
        wwpn: Wwn,
        wwnn: Wwn,
        reply: oneshot::Sender<Result<VportId>>,
    },
    DeleteVport {
        id: VportId,
        reply: oneshot::Sender<Result<()>>,
    },
    AbortNode {
        vport: VportId,
        did: FcId,
        reply: oneshot::Sender<Result<usize>>,
    },
    Logout {
        vport: VportId,
        did: FcId,
        remove: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    IssueEls {
        vport: VportId,
        did: FcId,
        payload: RequestPayload,
        waiter: oneshot::Sender<ExchangeOutcome>,
        reply: oneshot::Sender<Result<ExchangeId>>,
    },
    Snapshot {
        reply: oneshot::Sender<AdapterSnapshot>,
    },
    Unload {
        reply: oneshot::Sender<AdapterSnapshot>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle to a running adapter actor.
#[derive(Clone)]
pub struct AdapterHandle {
    cmd_tx: mpsc::Sender<AdapterCommand>,
}

impl AdapterHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> AdapterCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| FcError::ActorGone)?;
        rx.await.map_err(|_| FcError::ActorGone)
    }

    pub async fn create_vport(&self, wwpn: Wwn, wwnn: Wwn) -> Result<VportId> {
        self.request(|reply| AdapterCommand::CreateVport { wwpn, wwnn, reply })
            .await?
    }

    pub async fn delete_vport(&self, id: VportId) -> Result<()> {
        self.request(|reply| AdapterCommand::DeleteVport { id, reply })
            .await?
    }

    /// Abort every exchange of a node; see [`Adapter::abort_node`].
    pub async fn abort_node(&self, vport: VportId, did: FcId) -> Result<usize> {
        self.request(|reply| AdapterCommand::AbortNode { vport, did, reply })
            .await?
    }

    pub async fn logout(&self, vport: VportId, did: FcId, remove: bool) -> Result<()> {
        self.request(|reply| AdapterCommand::Logout {
            vport,
            did,
            remove,
            reply,
        })
        .await?
    }

    /// Issue a link-service request and wait for its outcome.
    pub async fn issue_els(
        &self,
        vport: VportId,
        did: FcId,
        payload: RequestPayload,
    ) -> Result<ExchangeOutcome> {
        let (waiter, outcome) = oneshot::channel();
        self.request(|reply| AdapterCommand::IssueEls {
            vport,
            did,
            payload,
            waiter,
            reply,
        })
        .await??;
        outcome.await.map_err(|_| FcError::ActorGone)
    }

    pub async fn snapshot(&self) -> Result<AdapterSnapshot> {
        self.request(|reply| AdapterCommand::Snapshot { reply }).await
    }

    /// Wait until every vport is ready or has failed. Returns the last
    /// snapshot taken, settled or not.
    pub async fn wait_settled(&self, timeout: Duration) -> Result<AdapterSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot().await?;
            if snapshot.settled || Instant::now() >= deadline {
                return Ok(snapshot);
            }
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }

    /// Unload the adapter and stop the actor. Returns the final snapshot.
    pub async fn unload(&self) -> Result<AdapterSnapshot> {
        self.request(|reply| AdapterCommand::Unload { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Run `adapter` on the current tokio runtime, fed by `events`.
pub fn spawn(adapter: Adapter, events: CompletionReceiver) -> AdapterHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
    tokio::spawn(run(adapter, cmd_rx, events));
    AdapterHandle { cmd_tx }
}

async fn run(
    mut adapter: Adapter,
    mut commands: mpsc::Receiver<AdapterCommand>,
    mut events: CompletionReceiver,
) {
    tracing::debug!("[adapter] {} actor started", adapter.config().name);
    loop {
        let deadline = adapter.next_deadline();
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd) => {
                    if !handle_command(&mut adapter, cmd) {
                        break;
                    }
                }
                None => {
                    // Every handle dropped.
                    adapter.unload();
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => adapter.handle_event(event),
                None => {
                    tracing::warn!("[adapter] {} transport went away", adapter.config().name);
                    adapter.unload();
                    break;
                }
            },
            () = sleep_until(deadline) => adapter.fire_timers(Instant::now()),
        }
    }
    tracing::debug!("[adapter] {} actor stopped", adapter.config().name);
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Returns false when the actor should stop.
fn handle_command(adapter: &mut Adapter, cmd: AdapterCommand) -> bool {
    // A dropped reply receiver only means the caller stopped waiting.
    match cmd {
        AdapterCommand::CreateVport { wwpn, wwnn, reply } => {
            let _ = reply.send(adapter.create_vport(wwpn, wwnn));
        }
        AdapterCommand::DeleteVport { id, reply } => {
            let _ = reply.send(adapter.delete_vport(id));
        }
        AdapterCommand::AbortNode { vport, did, reply } => {
            let _ = reply.send(adapter.abort_node(vport, did));
        }
        AdapterCommand::Logout {
            vport,
            did,
            remove,
            reply,
        } => {
            let _ = reply.send(adapter.logout_node(vport, did, remove));
        }
        AdapterCommand::IssueEls {
            vport,
            did,
            payload,
            waiter,
            reply,
        } => {
            let _ = reply.send(adapter.issue_els(vport, did, payload, Some(waiter)));
        }
        AdapterCommand::Snapshot { reply } => {
            let _ = reply.send(adapter.snapshot());
        }
        AdapterCommand::Unload { reply } => {
            adapter.unload();
            let _ = reply.send(adapter.snapshot());
            return false;
        }
    }
    true
}
