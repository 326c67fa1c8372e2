// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::*;

const WWPN_A: Wwn = Wwn::new(0x2100_0024_ff00_000a);
const WWNN_A: Wwn = Wwn::new(0x2000_0024_ff00_000a);

fn registry() -> NodeRegistry {
    NodeRegistry::new(VportId::PHYSICAL, 8)
}

#[test]
fn test_create_and_find() {
    let mut reg = registry();
    let did = FcId::new(0x010200);
    let node = reg.create(did).expect("create");
    assert_eq!(node.lock().state, NodeState::Unused);
    assert!(Arc::ptr_eq(&reg.find(did).expect("bound"), &node));
    assert!(reg.find(FcId::new(0x010300)).is_none());
    assert_eq!(reg.len(), 1);
}

#[test]
fn test_duplicate_address_is_refused() {
    let mut reg = registry();
    let did = FcId::new(0x010200);
    reg.create(did).expect("create");
    assert!(matches!(reg.create(did), Err(FcError::DuplicateIdentifier(d)) if d == did));
}

#[test]
fn test_freed_slot_can_be_reused() {
    let mut reg = registry();
    let did = FcId::new(0x010200);
    let node = reg.create(did).expect("create");
    node.lock().state = NodeState::Freed;
    assert!(reg.find(did).is_none());
    let again = reg.create(did).expect("re-create");
    assert!(!Arc::ptr_eq(&again, &node));
}

#[test]
fn test_limit_is_enforced() {
    let mut reg = NodeRegistry::new(VportId::PHYSICAL, 2);
    reg.create(FcId::new(0x010201)).expect("first");
    reg.create(FcId::new(0x010202)).expect("second");
    assert!(matches!(
        reg.create(FcId::new(0x010203)),
        Err(FcError::AllocationExhausted)
    ));
}

#[test]
fn test_wwpn_lookup_skips_fabric_services() {
    let mut reg = registry();
    let ns = reg.create(FcId::NAME_SERVER).expect("ns");
    ns.lock().wwpn = WWPN_A;
    assert!(reg.find_by_wwpn(WWPN_A).is_none());

    let node = reg.create(FcId::new(0x010200)).expect("node");
    node.lock().wwpn = WWPN_A;
    assert!(Arc::ptr_eq(&reg.find_by_wwpn(WWPN_A).expect("match"), &node));
    assert!(reg.find_by_wwpn(Wwn::ZERO).is_none());
    assert_eq!(reg.remote_ports().len(), 1);
}

#[test]
fn test_disable_then_revive() {
    let mut reg = registry();
    let did = FcId::new(0x010200);
    let node = reg.create(did).expect("create");
    {
        let mut n = node.lock();
        n.state = NodeState::Npr;
        n.login = Some(LoginHandle(12));
        n.login_registered = true;
    }

    assert_eq!(reg.disable(&node), Some(LoginHandle(12)));
    {
        let n = node.lock();
        assert_eq!(n.state, NodeState::Unused);
        assert!(n.flags.contains(NodeFlags::DISABLED));
        assert!(!n.login_registered);
    }

    let revived = reg.get_or_create(did).expect("revive");
    assert!(Arc::ptr_eq(&revived, &node));
    assert!(!node.lock().flags.contains(NodeFlags::DISABLED));
}

#[test]
fn test_enable_refuses_node_being_removed() {
    let mut reg = registry();
    let node = reg.create(FcId::new(0x010200)).expect("create");
    node.lock().flags.insert(NodeFlags::DISABLED | NodeFlags::REMOVAL_PENDING);
    assert!(matches!(reg.enable(&node), Err(FcError::NodeRemoved(_))));
}

#[test]
fn test_confirm_identity_binds_names() {
    let mut reg = registry();
    let node = reg.create(FcId::new(0x010200)).expect("create");
    let merge = reg.confirm_identity(&node, WWPN_A, WWNN_A).expect("confirm");
    assert!(!merge.merged());
    assert!(merge.stale_login.is_none());
    assert_eq!(node.lock().wwpn, WWPN_A);
}

#[test]
fn test_confirm_identity_rejects_zero_name() {
    let mut reg = registry();
    let node = reg.create(FcId::new(0x010200)).expect("create");
    assert!(matches!(
        reg.confirm_identity(&node, Wwn::ZERO, WWNN_A),
        Err(FcError::Validation(ValidationError::ZeroPortName))
    ));
}

#[test]
fn test_identity_change_drops_old_login() {
    let mut reg = registry();
    let node = reg.create(FcId::new(0x010200)).expect("create");
    {
        let mut n = node.lock();
        n.wwpn = WWPN_A;
        n.login = Some(LoginHandle(3));
        n.login_registered = true;
    }
    let other = Wwn::new(0x2100_0024_ff00_00bb);
    let merge = reg.confirm_identity(&node, other, WWNN_A).expect("confirm");
    assert_eq!(merge.stale_login, Some(LoginHandle(3)));
    let n = node.lock();
    assert_eq!(n.wwpn, other);
    assert!(n.login.is_none());
    assert!(!n.login_registered);
}

#[test]
fn test_port_moved_to_new_address_is_merged() {
    let mut reg = registry();
    let old_did = FcId::new(0x010200);
    let new_did = FcId::new(0x010400);

    // Known port, previously at old_did, still holding its old login.
    let known = reg.create(old_did).expect("known");
    {
        let mut n = known.lock();
        n.wwpn = WWPN_A;
        n.state = NodeState::Npr;
        n.login = Some(LoginHandle(1));
        n.roles.target = true;
    }

    // Discovery created a fresh node at the new address and logged in.
    let fresh = reg.create(new_did).expect("fresh");
    {
        let mut n = fresh.lock();
        n.state = NodeState::RegLoginIssue;
        n.flags.insert(NodeFlags::PRLI_SENT | NodeFlags::NEEDS_DISCOVERY);
        n.outstanding = 1;
        n.login = Some(LoginHandle(2));
    }

    let merge = reg.confirm_identity(&fresh, WWPN_A, WWNN_A).expect("merge");
    assert!(merge.merged());
    assert!(Arc::ptr_eq(&merge.survivor, &known));
    assert_eq!(merge.stale_login, Some(LoginHandle(1)));

    {
        let s = known.lock();
        assert_eq!(s.did, new_did);
        assert_eq!(s.state, NodeState::RegLoginIssue);
        assert_eq!(s.login, Some(LoginHandle(2)));
        assert_eq!(s.outstanding, 1);
        assert!(s.flags.contains(NodeFlags::PRLI_SENT));
        assert!(s.roles.target);
    }
    {
        let r = fresh.lock();
        assert_eq!(r.state, NodeState::Freed);
        assert!(r.login.is_none());
        assert_eq!(r.outstanding, 0);
    }

    assert!(reg.find(old_did).is_none());
    assert!(Arc::ptr_eq(&reg.find(new_did).expect("bound"), &known));
    assert_eq!(reg.len(), 1);
}

#[test]
fn test_merge_keeps_exchanges_of_both_nodes() {
    let mut reg = registry();
    let old_did = FcId::new(0x010200);
    let new_did = FcId::new(0x010400);

    // Known port revalidating at its old address.
    let known = reg.create(old_did).expect("known");
    {
        let mut n = known.lock();
        n.wwpn = WWPN_A;
        n.state = NodeState::AdiscIssue;
        n.flags.insert(NodeFlags::ADISC_SENT);
        n.outstanding = 1;
    }
    let fresh = reg.create(new_did).expect("fresh");
    {
        let mut n = fresh.lock();
        n.state = NodeState::PlogiIssue;
        n.flags.insert(NodeFlags::PRLI_SENT);
        n.outstanding = 2;
    }

    let merge = reg.confirm_identity(&fresh, WWPN_A, WWNN_A).expect("merge");
    assert_eq!(merge.survivor_was, NodeState::AdiscIssue);
    assert_eq!(merge.retired_was, NodeState::PlogiIssue);

    let s = known.lock();
    assert_eq!(s.outstanding, 3);
    assert!(s.flags.contains(NodeFlags::ADISC_SENT | NodeFlags::PRLI_SENT));
    assert_eq!(s.state, NodeState::PlogiIssue);
}

#[test]
fn test_remove_only_detaches_bound_node() {
    let mut reg = registry();
    let did = FcId::new(0x010200);
    let node = reg.create(did).expect("create");
    let stray = Node::new(VportId::PHYSICAL, did).into_ref();
    assert!(!reg.remove(&stray));
    assert!(reg.remove(&node));
    assert!(reg.is_empty());
}

#[test]
fn test_snapshot_is_in_address_order() {
    let mut reg = registry();
    reg.create(FcId::new(0x010300)).expect("b");
    reg.create(FcId::new(0x010100)).expect("a");
    let dids: Vec<FcId> = reg.snapshot().into_iter().map(|n| n.did).collect();
    assert_eq!(dids, vec![FcId::new(0x010100), FcId::new(0x010300)]);
}
