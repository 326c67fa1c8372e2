// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fibre Channel protocol constants and typed payloads.
//!
//! Frames are kept typed end to end; the transport owns byte encoding. The
//! one exception is RSCN, whose affected-port pages are decoded from words.

pub mod addr;
pub mod ct;
pub mod els;
pub mod frame;
pub mod params;
pub mod rscn;

pub use addr::{FcId, Wwn};
pub use ct::{CtCommand, CtRequest};
pub use els::{ElsCommand, LsRjt, RejectExplanation, RejectReason};
pub use frame::{AccPayload, Command, InboundFrame, Reply, RequestPayload};
pub use params::{AdiscParams, Fc4Roles, LinkErrorStatus, PrliParams, ServiceParams};
pub use rscn::{AddressFormat, RscnPage};
