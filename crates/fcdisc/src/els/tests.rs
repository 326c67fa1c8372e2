// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::*;
use crate::node::{Node, NodeState};
use crate::protocol::{ElsCommand, ServiceParams, Wwn};
use crate::registry::NodeRegistry;
use crate::transport::completion_channel;
use crate::transport::loopback::{LoopbackFabric, LoopbackTopology};

const LOCAL: FcId = FcId::new(0x010100);
const REMOTE: FcId = FcId::new(0x010200);

struct Harness {
    fabric: Arc<LoopbackFabric>,
    metrics: Arc<EngineMetrics>,
    els: ElsEngine,
    _rx: crate::transport::CompletionReceiver,
}

/// Engine over a fabric that holds every PLOGI, so tests drive completions.
fn harness() -> Harness {
    let (tx, rx) = completion_channel();
    let fabric = Arc::new(LoopbackFabric::new(tx, LoopbackTopology::default()));
    fabric.hold(ElsCommand::Plogi);
    let metrics = Arc::new(EngineMetrics::new());
    let mut els = ElsEngine::new(
        fabric.clone(),
        RetryPolicy::default(),
        Duration::from_secs(20),
        Arc::clone(&metrics),
    );
    els.set_link(true);
    Harness {
        fabric,
        metrics,
        els,
        _rx: rx,
    }
}

fn node(did: FcId) -> NodeRef {
    Node::new(VportId::PHYSICAL, did).into_ref()
}

fn plogi() -> RequestPayload {
    RequestPayload::Plogi(ServiceParams::local(
        Wwn::new(0x2000_0000_c9aa_0001),
        Wwn::new(0x1000_0000_c9aa_0001),
        2000,
        10_000,
    ))
}

#[test]
fn test_issue_marks_node_and_success_releases_it() {
    let mut h = harness();
    let n = node(REMOTE);

    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("issue");
    {
        let g = n.lock();
        assert_eq!(g.outstanding, 1);
        assert!(g.flags.contains(NodeFlags::PLOGI_SENT));
    }
    assert_eq!(Arc::strong_count(&n), 2);
    assert_eq!(h.fabric.sent(ElsCommand::Plogi, Some(REMOTE)), 1);

    let outcome = h.els.on_complete(id, CompletionStatus::Success(AccPayload::Empty));
    assert!(matches!(outcome, CompletionOutcome::Success { .. }));
    drop(outcome);

    let g = n.lock();
    assert_eq!(g.outstanding, 0);
    assert!(!g.flags.intersects(NodeFlags::PENDING));
    drop(g);
    assert_eq!(Arc::strong_count(&n), 1);
    assert!(h.els.is_empty());
}

#[test]
fn test_issue_fails_fast_when_link_down_or_unloading() {
    let mut h = harness();
    let n = node(REMOTE);

    h.els.set_link(false);
    assert!(matches!(
        h.els.issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None),
        Err(FcError::LinkDown)
    ));

    h.els.set_link(true);
    h.els.set_unloading();
    assert!(matches!(
        h.els.issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None),
        Err(FcError::Unloading)
    ));

    assert_eq!(h.fabric.sent(ElsCommand::Plogi, None), 0);
    assert_eq!(n.lock().outstanding, 0);
}

#[test]
fn test_transport_link_down_maps_to_link_down() {
    let mut h = harness();
    let n = node(REMOTE);
    h.fabric.set_link(false);
    assert!(matches!(
        h.els.issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None),
        Err(FcError::LinkDown)
    ));
    assert!(h.els.is_empty());
}

#[test]
fn test_no_resource_retries_stop_at_rule_maximum() {
    let mut h = harness();
    let n = node(REMOTE);
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("issue");
    let status = CompletionStatus::LocalReject(LocalReject::NoResources);

    for attempt in 1..=250u32 {
        match h.els.on_complete(id, status.clone()) {
            CompletionOutcome::Retry { delay, .. } => {
                // Retry count before this completion is attempt - 1.
                let expected = if attempt - 1 > 100 { 100 } else { 0 };
                assert_eq!(delay, Duration::from_millis(expected), "attempt {attempt}");
            }
            other => panic!("attempt {attempt}: unexpected {other:?}"),
        }
        assert!(h.els.reissue(id).is_none());
    }
    assert_eq!(h.els.get(id).map(|ex| ex.retries), Some(250));

    // Completion of attempt 251 is terminal.
    match h.els.on_complete(id, status) {
        CompletionOutcome::Failed { failure, .. } => {
            assert_eq!(failure.class, ErrorClass::LocalTransport);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.els.is_empty());
    assert_eq!(h.metrics.snapshot().exchanges_retried, 250);
    assert_eq!(h.metrics.snapshot().exchanges_failed, 1);
    assert_eq!(n.lock().outstanding, 0);
}

#[test]
fn test_parked_exchange_keeps_node_reference() {
    let mut h = harness();
    let n = node(REMOTE);
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("issue");
    let outcome = h.els.on_complete(id, CompletionStatus::NportBusy);
    assert!(matches!(outcome, CompletionOutcome::Retry { .. }));
    assert_eq!(Arc::strong_count(&n), 2);
    assert!(n.lock().flags.contains(NodeFlags::PLOGI_SENT));
    assert!(h.els.next_deadline().is_none());
}

#[test]
fn test_reissue_after_link_loss_fails() {
    let mut h = harness();
    let n = node(REMOTE);
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("issue");
    h.els.on_complete(id, CompletionStatus::FabricBusy);
    h.els.set_link(false);

    match h.els.reissue(id) {
        Some(CompletionOutcome::Failed { failure, .. }) => {
            assert_eq!(failure.class, ErrorClass::LinkLost);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.els.is_empty());
}

#[test]
fn test_link_lost_is_never_retried() {
    let mut h = harness();
    let n = node(REMOTE);
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("issue");
    let outcome = h.els.on_complete(id, CompletionStatus::LINK_DOWN);
    assert!(matches!(
        outcome,
        CompletionOutcome::Failed { failure, .. } if failure.class == ErrorClass::LinkLost
    ));
}

#[test]
fn test_unknown_completion_is_stale() {
    let mut h = harness();
    let outcome = h
        .els
        .on_complete(ExchangeId(99), CompletionStatus::Success(AccPayload::Empty));
    assert!(matches!(outcome, CompletionOutcome::Stale));
    assert_eq!(h.metrics.snapshot().stale_completions, 1);
}

#[test]
fn test_waiter_sees_exactly_one_outcome() {
    let mut h = harness();
    let n = node(REMOTE);

    let (tx, mut rx) = oneshot::channel();
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), Some(tx))
        .expect("issue");
    h.els.on_complete(id, CompletionStatus::Success(AccPayload::Empty));
    assert_eq!(rx.try_recv().expect("outcome"), ExchangeOutcome::Success(AccPayload::Empty));

    let (tx, mut rx) = oneshot::channel();
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), Some(tx))
        .expect("issue");
    assert_eq!(h.els.abort_node(&n, None), 1);
    assert_eq!(rx.try_recv().expect("outcome"), ExchangeOutcome::Aborted);
    assert_eq!(h.fabric.aborted(), 1);

    let (tx, mut rx) = oneshot::channel();
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), Some(tx))
        .expect("issue");
    let done = h.els.fail_all_link_lost();
    assert_eq!(done.len(), 1);
    assert_eq!(
        rx.try_recv().expect("outcome"),
        ExchangeOutcome::Failed(CompletionStatus::LINK_DOWN)
    );
    drop(done);
    assert_eq!(Arc::strong_count(&n), 1);
    assert_eq!(n.lock().outstanding, 0);
}

#[test]
fn test_abort_node_filters_by_command() {
    let mut h = harness();
    h.fabric.hold(ElsCommand::Prli);
    let n = node(REMOTE);
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("plogi");
    let prli = RequestPayload::Prli(crate::protocol::PrliParams::fcp(Default::default()));
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &n, prli, None)
        .expect("prli");

    assert_eq!(h.els.abort_node(&n, Some(ElsCommand::Plogi.into())), 1);
    assert_eq!(h.els.outstanding_for(&n), 1);
    let g = n.lock();
    assert!(!g.flags.contains(NodeFlags::PLOGI_SENT));
    assert!(g.flags.contains(NodeFlags::PRLI_SENT));
}

#[test]
fn test_unload_aborts_everything_and_ignores_late_completions() {
    let mut h = harness();
    let a = node(REMOTE);
    let b = node(FcId::new(0x010300));
    let first = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &a, plogi(), None)
        .expect("a1");
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &a, RequestPayload::Echo(vec![1]), None)
        .expect("a2");
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &b, plogi(), None)
        .expect("b1");

    h.els.set_unloading();
    assert_eq!(h.els.abort_all(), 3);
    assert!(h.els.is_empty());
    assert_eq!(a.lock().outstanding, 0);
    assert_eq!(Arc::strong_count(&a), 1);
    assert_eq!(Arc::strong_count(&b), 1);

    let late = h
        .els
        .on_complete(first, CompletionStatus::Success(AccPayload::Empty));
    assert!(matches!(late, CompletionOutcome::Stale));
    assert_eq!(h.metrics.snapshot().exchanges_aborted, 3);
}

#[test]
fn test_expired_exchange_completes_with_timeout() {
    let mut h = harness();
    let n = node(REMOTE);
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &n, plogi(), None)
        .expect("issue");
    let deadline = h.els.next_deadline().expect("deadline");

    assert!(h.els.expire(deadline - Duration::from_millis(1)).is_empty());
    let outcomes = h.els.expire(deadline);
    assert_eq!(outcomes.len(), 1);
    // Sequence timeout on PLOGI is retried after 100 ms.
    assert!(matches!(
        outcomes[0],
        CompletionOutcome::Retry { id: retried, delay } if retried == id && delay == Duration::from_millis(100)
    ));
}

#[test]
fn test_failed_transport_abort_still_releases_exchanges() {
    let mut h = harness();
    let first = node(REMOTE);
    let second = node(FcId::new(0x010300));
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &first, plogi(), None)
        .expect("issue");
    let (tx, mut rx) = oneshot::channel();
    h.els
        .issue(VportId::PHYSICAL, LOCAL, &second, plogi(), Some(tx))
        .expect("issue");
    h.fabric.refuse_aborts();

    assert_eq!(h.els.abort_node(&first, None), 1);
    assert_eq!(first.lock().outstanding, 0);

    let done = h.els.fail_all_link_lost();
    assert_eq!(done.len(), 1);
    drop(done);
    assert_eq!(
        rx.try_recv().expect("outcome"),
        ExchangeOutcome::Failed(CompletionStatus::LINK_DOWN)
    );
    assert_eq!(second.lock().outstanding, 0);

    let third = node(FcId::new(0x010400));
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &third, plogi(), None)
        .expect("issue");
    let deadline = h.els.next_deadline().expect("deadline");
    let outcomes = h.els.expire(deadline);
    assert!(matches!(outcomes[..], [CompletionOutcome::Retry { id: retried, .. }] if retried == id));
    assert_eq!(h.fabric.aborted(), 0);
}

#[test]
fn test_rebind_moves_exchanges_to_survivor() {
    let mut h = harness();
    let retired = node(REMOTE);
    let survivor = node(FcId::new(0x010400));
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &retired, plogi(), None)
        .expect("issue");

    // Identity merge hands the outstanding count over first.
    {
        let mut from = retired.lock();
        let mut to = survivor.lock();
        to.outstanding += from.outstanding;
        to.flags.insert(from.flags & NodeFlags::PENDING);
        from.outstanding = 0;
        from.state = NodeState::Freed;
    }
    assert_eq!(h.els.rebind(&retired, &survivor), 1);
    assert_eq!(Arc::strong_count(&retired), 1);

    h.els.on_complete(id, CompletionStatus::Success(AccPayload::Empty));
    assert_eq!(survivor.lock().outstanding, 0);
    assert_eq!(retired.lock().outstanding, 0);
}

#[test]
fn test_merge_keeps_survivor_exchange_accounted() {
    let mut h = harness();
    let mut reg = NodeRegistry::new(VportId::PHYSICAL, 8);
    let wwpn = Wwn::new(0x2100_0024_ff00_0001);

    let known = reg.create(REMOTE).expect("known");
    {
        let mut n = known.lock();
        n.wwpn = wwpn;
        n.state = NodeState::AdiscIssue;
    }
    let id = h
        .els
        .issue(VportId::PHYSICAL, LOCAL, &known, plogi(), None)
        .expect("issue");
    let fresh = reg.create(FcId::new(0x010500)).expect("fresh");

    let merge = reg
        .confirm_identity(&fresh, wwpn, Wwn::new(0x2000_0024_ff00_0001))
        .expect("merge");
    assert!(Arc::ptr_eq(&merge.survivor, &known));
    assert_eq!(h.els.rebind(&fresh, &known), 0);
    assert_eq!(known.lock().outstanding as usize, h.els.outstanding_for(&known));
    assert_eq!(h.els.outstanding_for(&known), 1);

    drop(merge);
    h.els.on_complete(id, CompletionStatus::Success(AccPayload::Empty));
    assert_eq!(known.lock().outstanding, 0);
    assert!(h.els.is_empty());
}
