// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed request, accept and reply payloads exchanged with the transport.

use super::addr::{FcId, Wwn};
use super::ct::{CtCommand, CtRequest};
use super::els::{ElsCommand, LsRjt};
use super::params::{AdiscParams, LinkErrorStatus, PrliParams, ServiceParams};
use super::rscn::RscnPage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything that can be issued as an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Els(ElsCommand),
    Ct(CtCommand),
}

impl Command {
    pub fn els(self) -> Option<ElsCommand> {
        match self {
            Self::Els(cmd) => Some(cmd),
            Self::Ct(_) => None,
        }
    }
}

impl From<ElsCommand> for Command {
    fn from(cmd: ElsCommand) -> Self {
        Self::Els(cmd)
    }
}

impl From<CtCommand> for Command {
    fn from(cmd: CtCommand) -> Self {
        Self::Ct(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Els(cmd) => cmd.fmt(f),
            Self::Ct(cmd) => cmd.fmt(f),
        }
    }
}

/// Request payloads, both for outbound exchanges and unsolicited inbound frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Plogi(ServiceParams),
    Flogi(ServiceParams),
    Fdisc(ServiceParams),
    Pdisc(ServiceParams),
    Prli(PrliParams),
    Prlo(PrliParams),
    Adisc(AdiscParams),
    Logo { wwpn: Wwn, port_id: FcId },
    Scr,
    Rscn(Vec<RscnPage>),
    Echo(Vec<u8>),
    Rnid,
    Rls { port_id: FcId },
    Rps,
    Rpl,
    Rtv,
    Rrq { ox_id: u16, rx_id: u16 },
    /// FARP request: asks the port named `match_wwpn` to log in to the requester.
    Farp { requester: Wwn, match_wwpn: Wwn },
    Farpr { responder: Wwn },
    Ct(CtRequest),
}

impl RequestPayload {
    pub fn command(&self) -> Command {
        let els = match self {
            Self::Plogi(_) => ElsCommand::Plogi,
            Self::Flogi(_) => ElsCommand::Flogi,
            Self::Fdisc(_) => ElsCommand::Fdisc,
            Self::Pdisc(_) => ElsCommand::Pdisc,
            Self::Prli(_) => ElsCommand::Prli,
            Self::Prlo(_) => ElsCommand::Prlo,
            Self::Adisc(_) => ElsCommand::Adisc,
            Self::Logo { .. } => ElsCommand::Logo,
            Self::Scr => ElsCommand::Scr,
            Self::Rscn(_) => ElsCommand::Rscn,
            Self::Echo(_) => ElsCommand::Echo,
            Self::Rnid => ElsCommand::Rnid,
            Self::Rls { .. } => ElsCommand::Rls,
            Self::Rps => ElsCommand::Rps,
            Self::Rpl => ElsCommand::Rpl,
            Self::Rtv => ElsCommand::Rtv,
            Self::Rrq { .. } => ElsCommand::Rrq,
            Self::Farp { .. } => ElsCommand::Farp,
            Self::Farpr { .. } => ElsCommand::Farpr,
            Self::Ct(req) => return Command::Ct(req.command()),
        };
        Command::Els(els)
    }

    /// Service parameters carried by login-class requests.
    pub fn service_params(&self) -> Option<&ServiceParams> {
        match self {
            Self::Plogi(sp) | Self::Flogi(sp) | Self::Fdisc(sp) | Self::Pdisc(sp) => Some(sp),
            _ => None,
        }
    }
}

/// LS_ACC (or CT accept) bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccPayload {
    Empty,
    /// Login accept. `d_id` is the destination of the accept frame, which for
    /// FLOGI/FDISC is the N_Port ID the fabric assigned to us.
    Login { params: ServiceParams, d_id: FcId },
    Prli(PrliParams),
    Adisc(AdiscParams),
    Echo(Vec<u8>),
    Rtv { r_a_tov_ms: u32, e_d_tov_ms: u32 },
    Rnid { wwpn: Wwn, wwnn: Wwn },
    LinkStatus(LinkErrorStatus),
    PortList(Vec<(FcId, Wwn)>),
    Farpr { responder: Wwn },
    /// GID_FT accept.
    PortIds(Vec<FcId>),
}

/// Response to an unsolicited request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Acc(AccPayload),
    Rjt(LsRjt),
}

/// Unsolicited frame delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub s_id: FcId,
    pub d_id: FcId,
    pub ox_id: u16,
    pub payload: RequestPayload,
}

impl InboundFrame {
    pub fn command(&self) -> Command {
        self.payload.command()
    }
}
