// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! fcdisc fabric simulator
//!
//! Runs the discovery engine against an in-memory fabric and prints what it
//! found.
//!
//! # Usage
//!
//! ```bash
//! # Write an example scenario
//! fcdisc-sim gen-scenario --output fabric.toml
//!
//! # Run it
//! fcdisc-sim run --scenario fabric.toml
//!
//! # Check an engine configuration file
//! fcdisc-sim validate --config fc0.toml
//! ```

mod scenario;

use clap::{Parser, Subcommand};
use fcdisc::transport::loopback::LoopbackFabric;
use fcdisc::{
    completion_channel, spawn, Adapter, AdapterHandle, AdapterSnapshot, EngineConfig, RscnPage,
    VportId,
};
use scenario::{Scenario, Step};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Fibre Channel discovery simulator
#[derive(Parser, Debug)]
#[command(name = "fcdisc-sim")]
#[command(about = "Run the fcdisc engine against a simulated Fibre Channel fabric")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario and print the discovered remote ports
    Run {
        /// Scenario file path
        #[arg(short, long)]
        scenario: PathBuf,

        /// Print the node table after every step, not only at the end
        #[arg(long)]
        verbose: bool,
    },

    /// Generate an example scenario file
    GenScenario {
        /// Output file path
        #[arg(short, long, default_value = "fabric.toml")]
        output: PathBuf,
    },

    /// Validate an engine configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::Run { scenario, verbose } => cmd_run(scenario, verbose).await,
        Commands::GenScenario { output } => cmd_gen_scenario(output),
        Commands::Validate { config } => cmd_validate(config),
    }
}

async fn cmd_run(path: PathBuf, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::from_file(&path)?;
    let settle = Duration::from_millis(scenario.settle_timeout_ms);

    println!("fcdisc simulator v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!(
        "Adapter {} ({}), {} remote ports, {} vports, {} steps",
        scenario.adapter.name,
        scenario.adapter.wwpn,
        scenario.ports.len(),
        scenario.vports.len(),
        scenario.steps.len()
    );
    println!();

    let (tx, rx) = completion_channel();
    let fabric = Arc::new(LoopbackFabric::with_ports(
        tx,
        scenario.fabric.clone(),
        scenario.ports.clone(),
    ));
    let handle = spawn(Adapter::new(scenario.adapter.clone(), fabric.clone())?, rx);

    fabric.set_link(true);
    let mut snapshot = settle_or_warn(&handle, settle, "link up").await?;

    for vport in &scenario.vports {
        match handle.create_vport(vport.wwpn, vport.wwnn).await {
            Ok(id) => tracing::info!("created {} ({})", id, vport.wwpn),
            Err(e) => tracing::warn!("vport {} not created: {}", vport.wwpn, e),
        }
    }
    if !scenario.vports.is_empty() {
        snapshot = settle_or_warn(&handle, settle, "vports").await?;
    }

    for (i, step) in scenario.steps.iter().enumerate() {
        if verbose {
            print_snapshot(&snapshot);
        }
        println!("--- step {}: {:?}", i + 1, step);
        apply_step(&fabric, step);
        // Let the adapter see the change before waiting for it to settle.
        tokio::time::sleep(Duration::from_millis(50)).await;
        snapshot = settle_or_warn(&handle, settle, "step").await?;
    }

    print_snapshot(&snapshot);
    let last = handle.unload().await?;
    print_metrics(&last);
    Ok(())
}

async fn settle_or_warn(
    handle: &AdapterHandle,
    timeout: Duration,
    phase: &str,
) -> Result<AdapterSnapshot, fcdisc::FcError> {
    let snapshot = handle.wait_settled(timeout).await?;
    if !snapshot.settled {
        tracing::warn!("{}: adapter did not settle within {:?}", phase, timeout);
    }
    Ok(snapshot)
}

fn apply_step(fabric: &LoopbackFabric, step: &Step) {
    match step {
        Step::Rscn { dids } => {
            let pages = dids.iter().map(|did| RscnPage::port(*did)).collect();
            fabric.send_rscn(VportId::PHYSICAL, pages);
        }
        Step::Offline { wwpn } => {
            fabric.set_online(*wwpn, false);
        }
        Step::Online { wwpn } => {
            fabric.set_online(*wwpn, true);
        }
        Step::Move { wwpn, did } => {
            fabric.move_port(*wwpn, *did);
        }
        Step::AddPort { port } => fabric.add_port(port.clone()),
        Step::LinkDown => fabric.set_link(false),
        Step::LinkUp => fabric.set_link(true),
    }
}

fn cmd_gen_scenario(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = Scenario::example().to_toml()?;

    let content = format!(
        r#"# fcdisc simulator scenario
# Generated by fcdisc-sim gen-scenario

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated scenario file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match EngineConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Adapter: {}", config.name);
            println!("  WWPN/WWNN:       {} / {}", config.wwpn, config.wwnn);
            println!(
                "  Discovery:       {} concurrent, {} ms timeout, ADISC {}",
                config.max_concurrent_discovery,
                config.discovery_timeout_ms,
                if config.use_adisc { "on" } else { "off" }
            );
            println!(
                "  NPIV:            {}",
                if config.npiv_enabled { "enabled" } else { "disabled" }
            );
            println!("  Retry overrides: {}", config.retry_rules.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_snapshot(snapshot: &AdapterSnapshot) {
    for vport in &snapshot.vports {
        println!(
            "{} wwpn {} did {} {:?} {} [{}]",
            vport.id, vport.wwpn, vport.did, vport.topology, vport.state, vport.status
        );
        for node in vport.nodes.iter().filter(|n| !n.did.is_well_known()) {
            let roles = match (node.roles.initiator, node.roles.target) {
                (true, true) => "initiator+target",
                (true, false) => "initiator",
                (false, true) => "target",
                (false, false) => "-",
            };
            println!(
                "    {}  {}  {:<14} {}",
                node.did, node.wwpn, node.state, roles
            );
        }
    }
    println!();
}

fn print_metrics(snapshot: &AdapterSnapshot) {
    let m = &snapshot.metrics;
    println!("--- Engine Statistics ---");
    println!(
        "  Exchanges: {} issued, {} retried, {} failed, {} aborted, {} stale",
        m.exchanges_issued, m.exchanges_retried, m.exchanges_failed, m.exchanges_aborted, m.stale_completions
    );
    println!(
        "  RSCN: {} received, {} deferred",
        m.rscn_received, m.rscn_deferred
    );
    println!(
        "  Nodes: {} created, {} freed, {} illegal transitions",
        m.nodes_created, m.nodes_freed, m.illegal_transitions
    );
}
