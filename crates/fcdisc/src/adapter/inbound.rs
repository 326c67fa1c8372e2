// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unsolicited ELS service.

use super::{local_params, Adapter};
use crate::fabric::Topology;
use crate::fsm::{EventArg, NodeEvent};
use crate::metrics::EngineMetrics;
use crate::node::NodeState;
use crate::protocol::{AccPayload, ElsCommand, InboundFrame, LsRjt, Reply, RequestPayload};
use crate::rscn::RscnDisposition;
use crate::vport::VportId;

impl Adapter {
    /// Answer or route one unsolicited frame.
    pub(super) fn on_unsolicited(&mut self, frame: InboundFrame) {
        let vport_id = self
            .vports
            .values()
            .find(|v| v.did.is_assigned() && v.did == frame.d_id)
            .map_or(VportId::PHYSICAL, |v| v.id);

        let Some(command) = frame.command().els() else {
            self.reply(vport_id, &frame, Reply::Rjt(LsRjt::UNSUPPORTED));
            return;
        };
        tracing::trace!("[els] {} {} from {}", vport_id, command, frame.s_id);

        match command {
            ElsCommand::Rscn => self.on_rscn(vport_id, frame),
            ElsCommand::Plogi => self.on_plogi(vport_id, frame),
            ElsCommand::Prli
            | ElsCommand::Logo
            | ElsCommand::Adisc
            | ElsCommand::Pdisc
            | ElsCommand::Prlo => self.on_node_request(vport_id, command, frame),
            ElsCommand::Farp => self.on_farp(vport_id, frame),
            ElsCommand::Flogi => self.on_flogi(vport_id, frame),
            _ => self.service_reply(vport_id, &frame),
        }
    }

    fn on_rscn(&mut self, id: VportId, frame: InboundFrame) {
        self.reply(id, &frame, Reply::Acc(AccPayload::Empty));
        EngineMetrics::bump(&self.metrics.rscn_received);
        let RequestPayload::Rscn(pages) = &frame.payload else {
            return;
        };
        let Some(vport) = self.vports.get_mut(&id) else {
            return;
        };
        if vport.topology != Topology::Fabric {
            tracing::debug!("[rscn] {} ignored outside a fabric", id);
            return;
        }
        match vport.rscn.receive(pages) {
            RscnDisposition::Deferred => {
                EngineMetrics::bump(&self.metrics.rscn_deferred);
                tracing::debug!("[rscn] {} {} pages deferred", id, pages.len());
            }
            RscnDisposition::Merged => {
                tracing::debug!("[rscn] {} {} pages merged", id, pages.len());
                if vport.is_ready() {
                    self.process_rscn(id);
                }
            }
        }
    }

    fn on_plogi(&mut self, id: VportId, frame: InboundFrame) {
        let Some(params) = frame.payload.service_params().copied() else {
            self.reply(id, &frame, Reply::Rjt(LsRjt::BAD_SERVICE_PARAMS));
            return;
        };
        if let Err(err) = params.validate() {
            tracing::debug!("[els] {} PLOGI from {} rejected: {}", id, frame.s_id, err);
            self.reply(id, &frame, Reply::Rjt(err.reject()));
            return;
        }

        if let Some(vport) = self.vports.get_mut(&id) {
            // The originator of a point-to-point link picks both addresses.
            if vport.topology == Topology::PointToPoint && !vport.did.is_assigned() {
                vport.did = frame.d_id;
                tracing::info!("[fabric] {} point-to-point address {} assigned by peer", id, frame.d_id);
            }
        }

        let node = match self.node_for(id, frame.s_id) {
            Ok(node) => node,
            Err(err) => {
                tracing::warn!("[els] {} PLOGI from {}: {}", id, frame.s_id, err);
                self.reply(id, &frame, Reply::Rjt(LsRjt::BUSY));
                return;
            }
        };
        let node = match self.bind_identity(&node, params.wwpn, params.wwnn) {
            Ok(node) => node,
            Err(err) => {
                tracing::warn!("[els] {} PLOGI from {}: {}", id, frame.s_id, err);
                self.reply(id, &frame, Reply::Rjt(LsRjt::BAD_SERVICE_PARAMS));
                return;
            }
        };
        self.dispatch(&node, NodeEvent::RcvPlogi, EventArg::Request(frame));
    }

    fn on_node_request(&mut self, id: VportId, command: ElsCommand, frame: InboundFrame) {
        let node = self
            .vports
            .get(&id)
            .and_then(|v| v.registry.find(frame.s_id));
        let (Some(node), Some(event)) = (node, NodeEvent::received(command)) else {
            // Nothing to log out of.
            let reply = if command == ElsCommand::Logo {
                Reply::Acc(AccPayload::Empty)
            } else {
                Reply::Rjt(LsRjt::LOGIN_REQUIRED)
            };
            self.reply(id, &frame, reply);
            return;
        };
        self.dispatch(&node, event, EventArg::Request(frame));
    }

    fn on_farp(&mut self, id: VportId, frame: InboundFrame) {
        let RequestPayload::Farp { match_wwpn, .. } = &frame.payload else {
            return;
        };
        let match_wwpn = *match_wwpn;
        let Some(wwpn) = self.vports.get(&id).map(|v| v.wwpn) else {
            return;
        };
        if match_wwpn != wwpn {
            self.reply(id, &frame, Reply::Rjt(LsRjt::UNSUPPORTED));
            return;
        }
        self.reply(id, &frame, Reply::Acc(AccPayload::Farpr { responder: wwpn }));

        match self.node_for(id, frame.s_id) {
            Ok(node) => {
                let idle = matches!(node.lock().state, NodeState::Unused | NodeState::Npr);
                if idle {
                    self.login_node(&node);
                }
            }
            Err(err) => tracing::warn!("[els] {} FARP from {}: {}", id, frame.s_id, err),
        }
    }

    /// FLOGI from a directly attached N_Port.
    fn on_flogi(&mut self, id: VportId, frame: InboundFrame) {
        let Some(vport) = self.vports.get(&id) else {
            return;
        };
        let reply = if vport.topology == Topology::Fabric {
            Reply::Rjt(LsRjt::UNSUPPORTED)
        } else {
            Reply::Acc(AccPayload::Login {
                params: local_params(&self.config, vport),
                d_id: frame.s_id,
            })
        };
        self.reply(id, &frame, reply);
    }

    /// Requests answered without touching any node.
    fn service_reply(&mut self, id: VportId, frame: &InboundFrame) {
        let Some(vport) = self.vports.get(&id) else {
            return;
        };
        let acc = match &frame.payload {
            RequestPayload::Echo(data) => Some(AccPayload::Echo(data.clone())),
            RequestPayload::Rtv => Some(AccPayload::Rtv {
                r_a_tov_ms: self.config.r_a_tov_ms,
                e_d_tov_ms: self.config.e_d_tov_ms,
            }),
            RequestPayload::Rnid => Some(AccPayload::Rnid {
                wwpn: vport.wwpn,
                wwnn: vport.wwnn,
            }),
            RequestPayload::Rls { .. } | RequestPayload::Rps => {
                Some(AccPayload::LinkStatus(self.transport.link_error_status()))
            }
            RequestPayload::Rpl => Some(AccPayload::PortList(
                self.vports
                    .values()
                    .filter(|v| v.did.is_assigned())
                    .map(|v| (v.did, v.wwpn))
                    .collect(),
            )),
            RequestPayload::Rrq { .. } | RequestPayload::Farpr { .. } => Some(AccPayload::Empty),
            _ => None,
        };
        let reply = match acc {
            Some(acc) => Reply::Acc(acc),
            None => Reply::Rjt(LsRjt::UNSUPPORTED),
        };
        self.reply(id, frame, reply);
    }
}
