// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine error types.

use crate::config::ConfigError;
use crate::protocol::{FcId, LsRjt, Wwn};
use thiserror::Error;

/// Errors reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("link is down")]
    LinkDown,

    #[error("hardware unavailable")]
    Unavailable,

    #[error("no transport resources")]
    NoResources,

    #[error("invalid transport handle {0}")]
    InvalidHandle(u64),
}

/// Payload validation failures. Terminal for the triggering exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("port name is zero")]
    ZeroPortName,

    #[error("node name is zero")]
    ZeroNodeName,

    #[error("receive data field size {0} out of range")]
    ReceiveSize(u16),

    #[error("class 3 service not offered")]
    Class3Unsupported,

    #[error("port name {0} already bound to another address")]
    WwnCollision(Wwn),
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum FcError {
    #[error("rejected by peer: {0}")]
    ProtocolReject(LsRjt),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("link is down")]
    LinkDown,

    #[error("adapter is unloading")]
    Unloading,

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("node allocation exhausted")]
    AllocationExhausted,

    #[error("address {0} already owned by an active node")]
    DuplicateIdentifier(FcId),

    #[error("node {0} is being removed")]
    NodeRemoved(FcId),

    #[error("unknown vport {0}")]
    UnknownVport(u16),

    #[error("adapter actor has stopped")]
    ActorGone,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, FcError>;
