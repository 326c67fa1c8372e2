// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Actor-owned deadline table.
//!
//! Timers never run code on expiry; the adapter pops due entries and handles
//! them in its own loop. Cancelling removes the entry, so a cancelled timer
//! can never fire late.

use crate::node::Node;
use crate::protocol::FcId;
use crate::transport::ExchangeId;
use crate::vport::VportId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Weak;
use tokio::time::Instant;

/// Timer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What to do when a timer expires.
#[derive(Debug, Clone)]
pub enum TimerKind {
    /// Delayed login retry for a node in NPR.
    NodeRetry {
        vport: VportId,
        did: FcId,
        node: Weak<Mutex<Node>>,
    },
    /// Resubmit a parked exchange.
    ExchangeRetry(ExchangeId),
    /// End a discovery run that stopped making progress.
    DiscoveryTimeout(VportId),
}

/// Deadline-ordered timer table.
#[derive(Debug, Default)]
pub struct Timers {
    next_id: u64,
    queue: BTreeMap<(Instant, TimerId), TimerKind>,
    deadlines: HashMap<TimerId, Instant>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer firing at `at`.
    pub fn schedule(&mut self, at: Instant, kind: TimerKind) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.queue.insert((at, id), kind);
        self.deadlines.insert(id, at);
        id
    }

    /// Remove a pending timer. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<TimerKind> {
        let at = self.deadlines.remove(&id)?;
        self.queue.remove(&(at, id))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Earliest pending deadline, for the actor's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(TimerId, TimerKind)> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, id), kind) = entry.remove_entry();
            self.deadlines.remove(&id);
            due.push((id, kind));
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut timers = Timers::new();
        let now = Instant::now();
        let late = timers.schedule(
            now + Duration::from_millis(20),
            TimerKind::DiscoveryTimeout(VportId::PHYSICAL),
        );
        let early = timers.schedule(
            now + Duration::from_millis(10),
            TimerKind::ExchangeRetry(ExchangeId(7)),
        );

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));
        assert!(timers.pop_due(now).is_empty());

        let due = timers.pop_due(now + Duration::from_millis(30));
        let ids: Vec<_> = due.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![early, late]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut timers = Timers::new();
        let now = Instant::now();
        let id = timers.schedule(now, TimerKind::ExchangeRetry(ExchangeId(1)));
        assert!(timers.is_pending(id));
        assert!(timers.cancel(id).is_some());
        assert!(timers.cancel(id).is_none());
        assert!(timers.pop_due(now + Duration::from_secs(1)).is_empty());
    }
}
