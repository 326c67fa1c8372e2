// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fibre Channel discovery and extended link services engine
//!
//! Brings an HBA port onto a fabric (or a point-to-point link), registers
//! with the name server, discovers remote ports and keeps their logins
//! current as the fabric changes.
//!
//! # Features
//!
//! - **Fabric login**: FLOGI/FDISC, VFI/VPI registration, NPIV ports
//! - **Discovery**: GID_FT query, bounded PLOGI/ADISC fan-out, timeouts
//! - **Node state machine**: PLOGI, PRLI, ADISC, LOGO and unsolicited requests
//! - **RSCN**: page aggregation, deferral during a running pass
//! - **ELS engine**: exchange tracking, retry rules, timeouts, abort
//!
//! # Quick Start
//!
//! ```no_run
//! use fcdisc::transport::loopback::{LoopbackFabric, LoopbackTopology, RemotePort};
//! use fcdisc::{completion_channel, Adapter, EngineConfig, FcId, Wwn};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> fcdisc::Result<()> {
//! let (tx, rx) = completion_channel();
//! let fabric = Arc::new(LoopbackFabric::with_ports(
//!     tx,
//!     LoopbackTopology::default(),
//!     vec![RemotePort::target(
//!         Wwn::new(0x2100_0024_ff00_0001),
//!         Wwn::new(0x2000_0024_ff00_0001),
//!         FcId::new(0x010200),
//!     )],
//! ));
//! let config = EngineConfig::new(Wwn::new(0x1000_0090_fa00_0001), Wwn::new(0x2000_0090_fa00_0001));
//! let handle = fcdisc::spawn(Adapter::new(config, fabric.clone())?, rx);
//!
//! fabric.set_link(true);
//! let snapshot = handle.wait_settled(Duration::from_secs(5)).await?;
//! for vport in &snapshot.vports {
//!     println!("{}: {} remote ports", vport.id, vport.ready_nodes().count());
//! }
//! handle.unload().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "fc0"
//! wwpn = "10:00:00:90:fa:00:00:01"
//! wwnn = "20:00:00:90:fa:00:00:01"
//! max_concurrent_discovery = 16
//! npiv_enabled = true
//! ```

pub mod adapter;
pub mod config;
pub mod els;
pub mod error;
pub mod fabric;
pub mod fsm;
pub mod metrics;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod rscn;
pub mod timer;
pub mod transport;
pub mod vport;

pub use adapter::{spawn, Adapter, AdapterHandle, AdapterSnapshot, VportSnapshot};
pub use config::{ConfigError, EngineConfig};
pub use els::{CompletionStatus, ExchangeOutcome};
pub use error::{FcError, Result, TransportError, ValidationError};
pub use fabric::{PortState, Topology, VportStatus};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use node::{NodeInfo, NodeState, RemotePortListener};
pub use protocol::{FcId, RequestPayload, RscnPage, Wwn};
pub use transport::{completion_channel, Transport, TransportEvent};
pub use vport::VportId;
