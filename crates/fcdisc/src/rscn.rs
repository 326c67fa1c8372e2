// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSCN aggregation.
//!
//! Affected-port pages are merged into a batch that is flushed when the
//! resulting discovery pass completes. Pages arriving during a flush are
//! parked and promoted into a new batch afterwards.

use crate::protocol::{AddressFormat, FcId, RscnPage};

/// What happened to a received page list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RscnDisposition {
    /// Merged into the active batch; discovery should restart.
    Merged,
    /// A flush is running; pages kept for the next pass.
    Deferred,
}

/// Accumulated change notifications of one vport.
#[derive(Debug, Clone)]
pub struct RscnBatch {
    capacity: usize,
    pages: Vec<RscnPage>,
    deferred: Vec<RscnPage>,
    flushing: bool,
    deferred_flag: bool,
    full_discovery: bool,
}

impl RscnBatch {
    /// Empty batch holding at most `capacity` pages before it falls back to
    /// full discovery.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pages: Vec::new(),
            deferred: Vec::new(),
            flushing: false,
            deferred_flag: false,
            full_discovery: false,
        }
    }

    /// Take in the pages of one RSCN. While a flush runs they are deferred and
    /// the next pass becomes a full discovery.
    pub fn receive(&mut self, pages: &[RscnPage]) -> RscnDisposition {
        if self.flushing {
            self.deferred.extend_from_slice(pages);
            self.deferred_flag = true;
            self.full_discovery = true;
            return RscnDisposition::Deferred;
        }
        self.merge(pages);
        RscnDisposition::Merged
    }

    fn merge(&mut self, pages: &[RscnPage]) {
        for page in pages {
            if self.full_discovery {
                break;
            }
            if page.format == AddressFormat::Fabric {
                self.go_full();
                break;
            }
            if self.pages.iter().any(|p| p.subsumes(page)) {
                continue;
            }
            self.pages.retain(|p| !page.subsumes(p));
            if self.pages.len() >= self.capacity {
                self.go_full();
                break;
            }
            self.pages.push(*page);
        }
    }

    fn go_full(&mut self) {
        self.full_discovery = true;
        self.pages.clear();
    }

    /// Whether `did` is affected by the active batch.
    pub fn matches(&self, did: FcId) -> bool {
        self.full_discovery || self.pages.iter().any(|p| p.covers(did))
    }

    /// Active batch holds pages or full-discovery mode.
    pub fn is_pending(&self) -> bool {
        self.full_discovery || !self.pages.is_empty()
    }

    /// A discovery pass is consuming the batch.
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn is_full_discovery(&self) -> bool {
        self.full_discovery
    }

    /// Pages arrived during the current flush.
    pub fn is_deferred(&self) -> bool {
        self.deferred_flag
    }

    pub fn pages(&self) -> &[RscnPage] {
        &self.pages
    }

    /// Guard the batch for the discovery pass about to run.
    pub fn begin_flush(&mut self) {
        self.flushing = true;
    }

    /// Finish the running flush. Returns true when deferred pages were
    /// promoted and another pass is required.
    pub fn complete_flush(&mut self) -> bool {
        self.flushing = false;
        self.pages.clear();
        self.full_discovery = false;
        if !self.deferred_flag {
            return false;
        }
        self.deferred_flag = false;
        let deferred = std::mem::take(&mut self.deferred);
        // Anything that raced with a flush is rediscovered in full.
        self.full_discovery = true;
        self.merge(&deferred);
        true
    }

    /// Drop everything (link down, unload).
    pub fn clear(&mut self) {
        self.pages.clear();
        self.deferred.clear();
        self.flushing = false;
        self.deferred_flag = false;
        self.full_discovery = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(raw: u32) -> RscnPage {
        RscnPage::port(FcId::new(raw))
    }

    #[test]
    fn test_merge_deduplicates_and_subsumes() {
        let mut batch = RscnBatch::new(8);
        assert_eq!(batch.receive(&[port(0x010203), port(0x010203)]), RscnDisposition::Merged);
        assert_eq!(batch.pages().len(), 1);

        batch.receive(&[RscnPage::new(AddressFormat::Area, FcId::new(0x010200))]);
        assert_eq!(batch.pages().len(), 1);
        assert_eq!(batch.pages()[0].format, AddressFormat::Area);

        batch.receive(&[port(0x010204)]);
        assert_eq!(batch.pages().len(), 1);
        assert!(batch.matches(FcId::new(0x0102AA)));
        assert!(!batch.matches(FcId::new(0x010300)));
    }

    #[test]
    fn test_capacity_overflow_switches_to_full_discovery() {
        let mut batch = RscnBatch::new(2);
        batch.receive(&[port(0x010101), port(0x010202), port(0x010303)]);
        assert!(batch.is_full_discovery());
        assert!(batch.pages().is_empty());
        assert!(batch.matches(FcId::new(0x7F0000)));
    }

    #[test]
    fn test_fabric_page_switches_to_full_discovery() {
        let mut batch = RscnBatch::new(8);
        batch.receive(&[RscnPage::new(AddressFormat::Fabric, FcId::UNASSIGNED)]);
        assert!(batch.is_full_discovery());
    }

    #[test]
    fn test_rscn_during_flush_is_deferred_not_lost() {
        let mut batch = RscnBatch::new(8);
        batch.receive(&[port(0x010101)]);
        batch.begin_flush();

        assert_eq!(batch.receive(&[port(0x020202)]), RscnDisposition::Deferred);
        assert!(batch.is_deferred());
        assert!(batch.is_full_discovery());

        // Flush completes: the deferred page starts a new pass.
        assert!(batch.complete_flush());
        assert!(!batch.is_flushing());
        assert!(batch.is_pending());
        assert!(batch.matches(FcId::new(0x020202)));

        // The second pass does not report yet another one.
        batch.begin_flush();
        assert!(!batch.complete_flush());
        assert!(!batch.is_pending());
    }

    #[test]
    fn test_complete_without_deferral_clears_batch() {
        let mut batch = RscnBatch::new(8);
        batch.receive(&[port(0x010101)]);
        batch.begin_flush();
        assert!(!batch.complete_flush());
        assert!(!batch.matches(FcId::new(0x010101)));
    }
}
