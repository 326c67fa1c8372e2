// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hardware command/completion boundary.
//!
//! The engine never touches queues, mailboxes or DMA buffers. It submits typed
//! requests through [`Transport`] and receives completions, login registration
//! results and unsolicited frames as [`TransportEvent`]s on a channel that
//! feeds the adapter actor.

pub mod loopback;

use crate::els::CompletionStatus;
use crate::error::TransportError;
use crate::protocol::{
    Command, FcId, InboundFrame, LinkErrorStatus, Reply, RequestPayload, ServiceParams, Wwn,
};
use crate::vport::VportId;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Engine-side exchange identifier (carried through the transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xid {}", self.0)
    }
}

/// Transport-side handle of a submitted command, used to abort it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandHandle(pub u64);

/// Hardware login handle (RPI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoginHandle(pub u32);

impl fmt::Display for LoginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpi {}", self.0)
    }
}

/// Outbound ELS or CT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElsRequest {
    /// Key the completion must carry.
    pub exchange: ExchangeId,
    pub vport: VportId,
    pub s_id: FcId,
    pub d_id: FcId,
    pub payload: RequestPayload,
    /// Per-attempt timeout; the engine also enforces it.
    pub timeout: Duration,
}

impl ElsRequest {
    pub fn command(&self) -> Command {
        self.payload.command()
    }
}

/// Response to an unsolicited request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElsReply {
    pub vport: VportId,
    pub s_id: FcId,
    pub d_id: FcId,
    /// Originator exchange of the request being answered.
    pub ox_id: u16,
    pub reply: Reply,
}

/// Everything the transport reports back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Completion {
        exchange: ExchangeId,
        status: CompletionStatus,
    },
    RegLogin {
        vport: VportId,
        did: FcId,
        handle: LoginHandle,
        result: Result<(), TransportError>,
    },
    RegVfi {
        vport: VportId,
        result: Result<(), TransportError>,
    },
    RegVpi {
        vport: VportId,
        result: Result<(), TransportError>,
    },
    Unsolicited(InboundFrame),
    LinkUp,
    LinkDown,
}

/// Sending side of the transport event channel.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

/// Receiving side, owned by the adapter actor.
pub type CompletionReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the channel a transport uses to reach the adapter.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender { tx }, rx)
}

impl CompletionSender {
    /// Returns false once the adapter has gone away.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Report the completion of `exchange`.
    pub fn complete(&self, exchange: ExchangeId, status: CompletionStatus) -> bool {
        self.send(TransportEvent::Completion { exchange, status })
    }
}

/// Hardware command transport.
///
/// Calls are made from the adapter actor and must not block. Results that
/// take time arrive later as [`TransportEvent`]s.
pub trait Transport: Send + Sync {
    /// Submit a request. Fails immediately if the link is down or the
    /// hardware is unavailable.
    fn submit_command(&self, request: ElsRequest) -> Result<CommandHandle, TransportError>;

    fn send_reply(&self, reply: ElsReply) -> Result<(), TransportError>;

    /// Reserve a login handle and start its registration. The outcome is
    /// reported as [`TransportEvent::RegLogin`].
    fn register_login(
        &self,
        vport: VportId,
        did: FcId,
        params: &ServiceParams,
    ) -> Result<LoginHandle, TransportError>;

    fn unregister_login(&self, vport: VportId, handle: LoginHandle) -> Result<(), TransportError>;

    /// Register the virtual fabric. Reported as [`TransportEvent::RegVfi`].
    fn register_vfi(&self, vport: VportId, fabric_name: Wwn) -> Result<(), TransportError>;

    /// Register the virtual port. Reported as [`TransportEvent::RegVpi`].
    fn register_vpi(&self, vport: VportId, did: FcId) -> Result<(), TransportError>;

    fn abort(&self, handle: CommandHandle) -> Result<(), TransportError>;

    fn link_error_status(&self) -> LinkErrorStatus;
}
