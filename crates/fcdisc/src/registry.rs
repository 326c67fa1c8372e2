// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-vport node registry.
//!
//! Owns the registry reference of every remote port and guarantees that at
//! most one non-freed node is bound to each address. Mutations are
//! synchronous and immediately visible to the state machine.

use crate::error::{FcError, Result, ValidationError};
use crate::node::{Node, NodeFlags, NodeInfo, NodeRef, NodeState};
use crate::protocol::{FcId, Wwn};
use crate::transport::LoginHandle;
use crate::vport::VportId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of [`NodeRegistry::confirm_identity`].
#[derive(Debug)]
pub struct IdentityMerge {
    /// Node that now owns the address and the announced identity.
    pub survivor: NodeRef,
    /// Node retired by the merge (now Freed and detached), if any.
    pub retired: Option<NodeRef>,
    /// Login handle made obsolete by the merge or by an identity change.
    pub stale_login: Option<LoginHandle>,
    /// State of the survivor before the merge.
    pub survivor_was: NodeState,
    /// State of the retired node before the merge.
    pub retired_was: NodeState,
}

impl IdentityMerge {
    /// Whether two nodes were folded into one.
    pub fn merged(&self) -> bool {
        self.retired.is_some()
    }
}

/// Remote ports known to one vport, keyed by address.
#[derive(Debug)]
pub struct NodeRegistry {
    vport: VportId,
    limit: usize,
    nodes: BTreeMap<FcId, NodeRef>,
}

impl NodeRegistry {
    /// Empty registry for `vport` holding at most `limit` nodes.
    pub fn new(vport: VportId, limit: usize) -> Self {
        Self {
            vport,
            limit,
            nodes: BTreeMap::new(),
        }
    }

    /// Allocate a node for `did`.
    pub fn create(&mut self, did: FcId) -> Result<NodeRef> {
        if let Some(existing) = self.nodes.get(&did) {
            if existing.lock().state != NodeState::Freed {
                return Err(FcError::DuplicateIdentifier(did));
            }
        }
        if self.nodes.len() >= self.limit {
            return Err(FcError::AllocationExhausted);
        }
        let node = Node::new(self.vport, did).into_ref();
        self.nodes.insert(did, Arc::clone(&node));
        tracing::debug!("[registry] {} created node {}", self.vport, did);
        Ok(node)
    }

    /// Non-freed node bound to `did` (disabled placeholders included).
    pub fn find(&self, did: FcId) -> Option<NodeRef> {
        self.nodes
            .get(&did)
            .filter(|node| node.lock().state != NodeState::Freed)
            .cloned()
    }

    /// Remote port announcing `wwpn`. Fabric service nodes share the switch
    /// name and are never matched.
    pub fn find_by_wwpn(&self, wwpn: Wwn) -> Option<NodeRef> {
        if wwpn.is_zero() {
            return None;
        }
        self.nodes
            .values()
            .find(|node| {
                let n = node.lock();
                n.wwpn == wwpn && n.state != NodeState::Freed && !n.is_fabric_service()
            })
            .cloned()
    }

    /// Find or create the node for `did`, reviving a disabled placeholder.
    pub fn get_or_create(&mut self, did: FcId) -> Result<NodeRef> {
        match self.find(did) {
            Some(node) => {
                if node.lock().flags.contains(NodeFlags::DISABLED) {
                    self.enable(&node)?;
                }
                Ok(node)
            }
            None => self.create(did),
        }
    }

    /// Turn `node` into an Unused placeholder that absorbs late frames.
    /// Returns the login handle the caller must unregister.
    pub fn disable(&mut self, node: &NodeRef) -> Option<LoginHandle> {
        let mut n = node.lock();
        n.state = NodeState::Unused;
        n.flags = NodeFlags::DISABLED;
        n.retry = 0;
        n.roles = Default::default();
        n.login_registered = false;
        n.login.take()
    }

    /// Promote a disabled placeholder back to an active node.
    pub fn enable(&mut self, node: &NodeRef) -> Result<()> {
        let mut n = node.lock();
        if n.state == NodeState::Freed || n.flags.contains(NodeFlags::REMOVAL_PENDING) {
            return Err(FcError::NodeRemoved(n.did));
        }
        n.flags.remove(NodeFlags::DISABLED);
        Ok(())
    }

    /// Bind the identity announced in a login response to `node`.
    ///
    /// If another node already owns `wwpn`, it survives: it takes over the
    /// address, state and reserved login of `node`, which is retired (Freed,
    /// detached). Pending bits and outstanding counts of both nodes add up
    /// on the survivor, since the exchanges of either may still be live.
    pub fn confirm_identity(&mut self, node: &NodeRef, wwpn: Wwn, wwnn: Wwn) -> Result<IdentityMerge> {
        if wwpn.is_zero() {
            return Err(ValidationError::ZeroPortName.into());
        }

        let other = self
            .find_by_wwpn(wwpn)
            .filter(|other| !Arc::ptr_eq(other, node));

        let Some(survivor) = other else {
            let mut n = node.lock();
            let mut stale_login = None;
            if !n.wwpn.is_zero() && n.wwpn != wwpn {
                tracing::info!(
                    "[registry] {} node {} changed identity {} -> {}",
                    self.vport,
                    n.did,
                    n.wwpn,
                    wwpn
                );
                stale_login = n.login.take();
                n.login_registered = false;
                n.flags.remove(NodeFlags::ADISC_CAPABLE);
            }
            n.wwpn = wwpn;
            n.wwnn = wwnn;
            let state = n.state;
            drop(n);
            return Ok(IdentityMerge {
                survivor: Arc::clone(node),
                retired: None,
                stale_login,
                survivor_was: state,
                retired_was: state,
            });
        };

        let (did, old_did, stale_login, survivor_was, retired_was) = {
            let mut from = node.lock();
            let mut to = survivor.lock();
            let old_did = to.did;
            let stale_login = to.login.take();
            let survivor_was = to.state;
            let retired_was = from.state;

            to.did = from.did;
            to.state = from.state;
            to.flags |= from.flags & NodeFlags::PENDING;
            to.flags.remove(NodeFlags::DISABLED | NodeFlags::ADISC_CAPABLE);
            to.outstanding += from.outstanding;
            to.login = from.login.take();
            to.login_registered = from.login_registered;
            to.service_params = from.service_params.take();
            to.wwnn = wwnn;

            from.state = NodeState::Freed;
            from.flags = NodeFlags::empty();
            from.outstanding = 0;
            from.login_registered = false;
            (to.did, old_did, stale_login, survivor_was, retired_was)
        };

        if old_did != did {
            if let Some(bound) = self.nodes.get(&old_did) {
                if Arc::ptr_eq(bound, &survivor) {
                    self.nodes.remove(&old_did);
                }
            }
        }
        self.nodes.insert(did, Arc::clone(&survivor));
        tracing::info!(
            "[registry] {} {} moved from {} to {}",
            self.vport,
            wwpn,
            old_did,
            did
        );

        Ok(IdentityMerge {
            survivor,
            retired: Some(Arc::clone(node)),
            stale_login,
            survivor_was,
            retired_was,
        })
    }

    /// Detach a Freed node. Returns false if `node` was not bound.
    pub fn remove(&mut self, node: &NodeRef) -> bool {
        let did = node.lock().did;
        match self.nodes.get(&did) {
            Some(bound) if Arc::ptr_eq(bound, node) => {
                self.nodes.remove(&did);
                true
            }
            _ => false,
        }
    }

    /// Bound nodes, fabric services included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All bound nodes, in address order.
    pub fn nodes(&self) -> Vec<NodeRef> {
        self.nodes.values().cloned().collect()
    }

    /// Bound remote ports (fabric service nodes excluded).
    pub fn remote_ports(&self) -> Vec<NodeRef> {
        self.nodes
            .values()
            .filter(|node| !node.lock().is_fabric_service())
            .cloned()
            .collect()
    }

    /// Snapshot of every bound node, in address order.
    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.nodes.values().map(|node| node.lock().info()).collect()
    }
}

#[cfg(test)]
mod tests;
