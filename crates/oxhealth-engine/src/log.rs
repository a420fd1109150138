//! Per-host alarm event log: a bounded, newest-first list of status
//! transitions behind a read-write lock.

use oxhealth_common::types::{AlarmEvent, AlarmStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

/// The event log owns its entries; readers iterate borrowed records under
/// the read lock. Appends go to the front, so iteration order is strictly
/// decreasing `unique_id`.
pub struct AlarmLog {
    max: usize,
    next_unique_id: AtomicU32,
    events: RwLock<VecDeque<AlarmEvent>>,
}

impl AlarmLog {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            next_unique_id: AtomicU32::new(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Claim the next host-monotonic event id. Every event gets one at
    /// creation, whether or not it is ever appended.
    pub fn next_unique_id(&self) -> u32 {
        self.next_unique_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Read access for scans; newest first.
    pub fn read(&self) -> RwLockReadGuard<'_, VecDeque<AlarmEvent>> {
        self.events.read().unwrap()
    }

    /// Id of the newest entry, 0 when the log is empty.
    pub fn newest_unique_id(&self) -> u32 {
        self.events
            .read()
            .unwrap()
            .front()
            .map(|ae| ae.unique_id)
            .unwrap_or(0)
    }

    /// Prepend an event. Entries appended under the write lock become
    /// visible atomically to readers.
    pub fn append(&self, event: AlarmEvent) {
        let mut events = self.events.write().unwrap();
        debug_assert!(
            events.front().map_or(true, |f| f.unique_id < event.unique_id),
            "event ids must be appended in increasing order"
        );
        events.push_front(event);
    }

    /// The most recent prior notification of the same alarm: walk entries
    /// older than `unique_id` and return the status of the first one the
    /// notifier actually ran for.
    pub fn find_prior_exec_run(&self, unique_id: u32, alarm_id: u32) -> Option<AlarmStatus> {
        let events = self.events.read().unwrap();
        events
            .iter()
            .filter(|ae| ae.unique_id < unique_id)
            .find(|ae| ae.alarm_id == alarm_id && ae.flags.exec_run)
            .map(|ae| ae.new_status)
    }

    /// Write back dispatcher bookkeeping for one entry. Returns whether the
    /// entry was still resident.
    pub fn update_event(&self, unique_id: u32, f: impl FnOnce(&mut AlarmEvent)) -> bool {
        let mut events = self.events.write().unwrap();
        match events.iter_mut().find(|ae| ae.unique_id == unique_id) {
            Some(ae) => {
                f(ae);
                true
            }
            None => false,
        }
    }

    /// Mark every surviving entry as superseded, so a reloaded
    /// configuration does not re-notify old state.
    pub fn mark_updated(&self) {
        let mut events = self.events.write().unwrap();
        for ae in events.iter_mut() {
            if ae.new_status != AlarmStatus::Removed {
                ae.flags.updated = true;
            }
        }
    }

    pub fn needs_trim(&self) -> bool {
        self.len() > self.max
    }

    /// Cut the log back to two thirds of its bound, keeping the newest
    /// entries. Each detached entry is dropped exactly once.
    pub fn trim(&self) {
        let mut events = self.events.write().unwrap();
        if events.len() <= self.max {
            return;
        }
        let keep = self.max * 2 / 3;
        tracing::debug!(dropped = events.len() - keep, keep, "trimming alarm log");
        events.truncate(keep);
    }
}
