// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::unreadable_literal)] // WWNs and port IDs
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! End-to-end discovery tests
//!
//! Runs the adapter actor against the loopback fabric: file configuration,
//! fabric login, NPIV, RSCN handling and discovery timeouts.

use fcdisc::protocol::ElsCommand;
use fcdisc::transport::loopback::{LoopbackFabric, LoopbackTopology, RemotePort};
use fcdisc::{
    completion_channel, spawn, Adapter, AdapterHandle, AdapterSnapshot, EngineConfig, FcError, FcId, NodeState,
    PortState, RscnPage, VportId, VportStatus, Wwn,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(60);

fn targets() -> Vec<RemotePort> {
    (1..=3)
        .map(|i| {
            RemotePort::target(
                Wwn::new(0x2100_0024_ff00_0000 + i),
                Wwn::new(0x2000_0024_ff00_0000 + i),
                FcId::new(0x01_02_00 + ((i as u32) << 8)),
            )
        })
        .collect()
}

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

/// Poll snapshots until `done` holds.
async fn wait_for(handle: &AdapterHandle, done: impl Fn(&AdapterSnapshot) -> bool) -> AdapterSnapshot {
    for _ in 0..1_000 {
        let snapshot = handle.snapshot().await.expect("snapshot");
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("adapter never reached the expected state");
}

fn start(config: EngineConfig, ports: Vec<RemotePort>) -> (Arc<LoopbackFabric>, AdapterHandle) {
    let (tx, rx) = completion_channel();
    let fabric = Arc::new(LoopbackFabric::with_ports(
        tx,
        LoopbackTopology::default(),
        ports,
    ));
    let adapter = Adapter::new(config, fabric.clone()).expect("adapter");
    (fabric, spawn(adapter, rx))
}

#[tokio::test]
async fn test_config_file_to_discovered_fabric() {
    let file = write_config(
        r#"
name = "fc1"
wwpn = "10:00:00:90:fa:00:00:01"
wwnn = "20:00:00:90:fa:00:00:01"
max_concurrent_discovery = 2
"#,
    );
    let config = EngineConfig::from_file(file.path()).expect("config");
    assert_eq!(config.name, "fc1");
    assert_eq!(config.max_concurrent_discovery, 2);

    let (fabric, handle) = start(config, targets());
    fabric.set_link(true);

    let snapshot = handle.wait_settled(SETTLE).await.expect("snapshot");
    assert!(snapshot.settled);
    assert!(snapshot.link_up);
    let physical = snapshot.vport(VportId::PHYSICAL).expect("physical");
    assert_eq!(physical.state, PortState::Ready);
    assert_eq!(physical.status, VportStatus::Active);
    assert_eq!(physical.did, FcId::new(0x01_01_00));
    assert_eq!(physical.ready_nodes().count(), 3);
    assert!(physical
        .ready_nodes()
        .all(|n| n.state == NodeState::Mapped && n.roles.target));
    assert_eq!(snapshot.metrics.nodes_freed, 0);

    handle.unload().await.expect("unload");
    assert!(matches!(handle.snapshot().await, Err(FcError::ActorGone)));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let file = write_config(
        r#"
wwpn = "10:00:00:90:fa:00:00:01"
wwnn = "20:00:00:90:fa:00:00:01"
initiator = false
"#,
    );
    assert!(EngineConfig::from_file(file.path()).is_err());

    let missing = EngineConfig::from_file("/nonexistent/fcdisc.toml");
    assert!(matches!(missing, Err(fcdisc::ConfigError::Io(_))));
}

#[tokio::test]
async fn test_npiv_ports_discover_independently() {
    let config = EngineConfig::new(Wwn::new(0x1000_0090_fa00_0001), Wwn::new(0x2000_0090_fa00_0001));
    let (fabric, handle) = start(config, targets());
    fabric.set_link(true);
    handle.wait_settled(SETTLE).await.expect("physical");

    let first = handle
        .create_vport(Wwn::new(0x1000_0090_fa00_0101), Wwn::new(0x2000_0090_fa00_0101))
        .await
        .expect("vport");
    let second = handle
        .create_vport(Wwn::new(0x1000_0090_fa00_0102), Wwn::new(0x2000_0090_fa00_0102))
        .await
        .expect("vport");
    let snapshot = handle.wait_settled(SETTLE).await.expect("vports");

    for id in [first, second] {
        let vport = snapshot.vport(id).expect("vport");
        assert_eq!(vport.state, PortState::Ready);
        assert_eq!(vport.ready_nodes().count(), 3);
        assert_eq!(fabric.granted(id), Some(vport.did));
    }
    assert_ne!(
        snapshot.vport(first).expect("first").did,
        snapshot.vport(second).expect("second").did
    );

    handle.delete_vport(first).await.expect("delete");
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert!(snapshot.vport(first).is_none());
    assert!(matches!(
        handle.delete_vport(first).await,
        Err(FcError::UnknownVport(_))
    ));
    handle.unload().await.expect("unload");
}

#[tokio::test]
async fn test_rscn_tracks_fabric_changes() {
    let config = EngineConfig::new(Wwn::new(0x1000_0090_fa00_0001), Wwn::new(0x2000_0090_fa00_0001));
    let ports = targets();
    let (fabric, handle) = start(config, ports.clone());
    fabric.set_link(true);
    handle.wait_settled(SETTLE).await.expect("settled");

    // One port leaves, a new one joins.
    fabric.set_online(ports[0].wwpn, false);
    let newcomer = RemotePort::target(
        Wwn::new(0x2100_0024_ff00_0010),
        Wwn::new(0x2000_0024_ff00_0010),
        FcId::new(0x01_09_00),
    );
    fabric.add_port(newcomer.clone());
    fabric.send_rscn(
        VportId::PHYSICAL,
        vec![RscnPage::port(ports[0].did), RscnPage::port(newcomer.did)],
    );

    let snapshot = wait_for(&handle, |s| s.metrics.rscn_received == 1 && s.settled).await;

    let physical = snapshot.vport(VportId::PHYSICAL).expect("physical");
    let dids: Vec<FcId> = physical.ready_nodes().map(|n| n.did).collect();
    assert!(!dids.contains(&ports[0].did));
    assert!(dids.contains(&ports[1].did));
    assert!(dids.contains(&ports[2].did));
    assert!(dids.contains(&newcomer.did));
    // Ports outside the batch were not touched.
    assert_eq!(fabric.sent(ElsCommand::Adisc, Some(ports[1].did)), 0);

    handle.unload().await.expect("unload");
}

#[tokio::test(start_paused = true)]
async fn test_discovery_timeout_releases_stuck_logins() {
    let mut config =
        EngineConfig::new(Wwn::new(0x1000_0090_fa00_0001), Wwn::new(0x2000_0090_fa00_0001));
    config.discovery_timeout_ms = 5_000;
    config.els_timeout_ms = 120_000;
    let (fabric, handle) = start(config, targets()[..2].to_vec());

    // Targets accept PLOGI but never answer PRLI.
    fabric.hold(ElsCommand::Prli);
    fabric.set_link(true);

    let snapshot = handle.wait_settled(SETTLE).await.expect("settled");
    assert!(snapshot.settled);
    let physical = snapshot.vport(VportId::PHYSICAL).expect("physical");
    assert_eq!(physical.state, PortState::Ready);
    assert_eq!(physical.ready_nodes().count(), 0);
    assert_eq!(fabric.aborted(), 2);
    assert!(physical
        .nodes
        .iter()
        .filter(|n| !n.did.is_well_known())
        .all(|n| n.state == NodeState::Npr));

    let last = handle.unload().await.expect("unload");
    assert!(last.unloaded);
    assert_eq!(last.outstanding, 0);
}

#[tokio::test]
async fn test_explicit_link_services() {
    let config = EngineConfig::new(Wwn::new(0x1000_0090_fa00_0001), Wwn::new(0x2000_0090_fa00_0001));
    let ports = targets();
    let (fabric, handle) = start(config, ports.clone());
    fabric.set_link(true);
    handle.wait_settled(SETTLE).await.expect("settled");

    let outcome = handle
        .issue_els(
            VportId::PHYSICAL,
            ports[1].did,
            fcdisc::RequestPayload::Rtv,
        )
        .await
        .expect("rtv");
    assert!(matches!(outcome, fcdisc::ExchangeOutcome::Success(_)));

    handle
        .logout(VportId::PHYSICAL, ports[2].did, true)
        .await
        .expect("logout");
    let gone = ports[2].did;
    wait_for(&handle, |s| {
        s.vport(VportId::PHYSICAL)
            .is_some_and(|v| v.nodes.iter().all(|n| n.did != gone))
    })
    .await;
    assert_eq!(fabric.sent(ElsCommand::Logo, Some(ports[2].did)), 1);

    handle.unload().await.expect("unload");
}
