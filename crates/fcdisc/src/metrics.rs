// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine metrics.
//!
//! Atomic counters for exchanges, state machine anomalies, RSCN traffic
//! and node lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine metrics.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Exchanges submitted to the transport (first attempts only).
    pub exchanges_issued: AtomicU64,
    /// Exchanges parked for a retry.
    pub exchanges_retried: AtomicU64,
    /// Exchanges that ended in a terminal failure.
    pub exchanges_failed: AtomicU64,
    /// Exchanges aborted before completion.
    pub exchanges_aborted: AtomicU64,
    /// Completions for unknown exchanges, or delivered after unload.
    pub stale_completions: AtomicU64,
    /// Events with no handler for the node's state.
    pub illegal_transitions: AtomicU64,
    /// RSCNs accepted, deferred ones included.
    pub rscn_received: AtomicU64,
    /// RSCNs that arrived while a flush was running.
    pub rscn_deferred: AtomicU64,
    /// Nodes allocated by the registries.
    pub nodes_created: AtomicU64,
    /// Nodes freed or retired by an identity merge.
    pub nodes_freed: AtomicU64,
    /// Unsolicited requests answered with LS_RJT.
    pub unsolicited_rejected: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub exchanges_issued: u64,
    pub exchanges_retried: u64,
    pub exchanges_failed: u64,
    pub exchanges_aborted: u64,
    pub stale_completions: u64,
    pub illegal_transitions: u64,
    pub rscn_received: u64,
    pub rscn_deferred: u64,
    pub nodes_created: u64,
    pub nodes_freed: u64,
    pub unsolicited_rejected: u64,
}

impl EngineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            exchanges_issued: AtomicU64::new(0),
            exchanges_retried: AtomicU64::new(0),
            exchanges_failed: AtomicU64::new(0),
            exchanges_aborted: AtomicU64::new(0),
            stale_completions: AtomicU64::new(0),
            illegal_transitions: AtomicU64::new(0),
            rscn_received: AtomicU64::new(0),
            rscn_deferred: AtomicU64::new(0),
            nodes_created: AtomicU64::new(0),
            nodes_freed: AtomicU64::new(0),
            unsolicited_rejected: AtomicU64::new(0),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exchanges_issued: self.exchanges_issued.load(Ordering::Relaxed),
            exchanges_retried: self.exchanges_retried.load(Ordering::Relaxed),
            exchanges_failed: self.exchanges_failed.load(Ordering::Relaxed),
            exchanges_aborted: self.exchanges_aborted.load(Ordering::Relaxed),
            stale_completions: self.stale_completions.load(Ordering::Relaxed),
            illegal_transitions: self.illegal_transitions.load(Ordering::Relaxed),
            rscn_received: self.rscn_received.load(Ordering::Relaxed),
            rscn_deferred: self.rscn_deferred.load(Ordering::Relaxed),
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_freed: self.nodes_freed.load(Ordering::Relaxed),
            unsolicited_rejected: self.unsolicited_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
