//! Transaction ids, commit log and snapshot visibility.
//!
//! A row version is visible to a snapshot when its inserting transaction
//! committed before the snapshot was taken and its deleting transaction (if
//! any) did not.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::tuple::HeapTuple;

/// Transaction identifier. Ids are handed out monotonically starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Xid(pub u64);

impl Xid {
    /// Transaction id used for rows loaded at bootstrap (always committed).
    pub const FROZEN: Xid = Xid(1);
}

/// Final or in-flight state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XidStatus {
    InProgress,
    Committed,
    Aborted,
}

/// Immutable point-in-time visibility marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// First transaction id not yet assigned when the snapshot was taken.
    pub xmax: Xid,
    /// Transactions that were running when the snapshot was taken.
    pub in_progress: BTreeSet<Xid>,
}

impl Snapshot {
    /// Whether effects of `xid` are part of this snapshot, given the commit log.
    fn sees(&self, xid: Xid, clog: &CommitLog) -> bool {
        xid < self.xmax
            && !self.in_progress.contains(&xid)
            && clog.status(xid) == XidStatus::Committed
    }

    /// Tuple visibility under this snapshot.
    pub fn tuple_visible(&self, tuple: &HeapTuple, clog: &CommitLog) -> bool {
        if !self.sees(tuple.xmin, clog) {
            return false;
        }
        match tuple.xmax {
            Some(xmax) => !self.sees(xmax, clog),
            None => true,
        }
    }
}

/// Commit log tracking every assigned transaction id.
#[derive(Debug)]
pub struct CommitLog {
    inner: RwLock<CommitLogInner>,
}

#[derive(Debug)]
struct CommitLogInner {
    next_xid: u64,
    status: HashMap<Xid, XidStatus>,
}

impl Default for CommitLog {
    fn default() -> Self {
        let mut status = HashMap::new();
        status.insert(Xid::FROZEN, XidStatus::Committed);
        Self {
            inner: RwLock::new(CommitLogInner {
                next_xid: Xid::FROZEN.0 + 1,
                status,
            }),
        }
    }
}

impl CommitLog {
    /// Assigns a new in-progress transaction id.
    pub fn begin(&self) -> Xid {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let xid = Xid(guard.next_xid);
        guard.next_xid += 1;
        guard.status.insert(xid, XidStatus::InProgress);
        xid
    }

    pub fn commit(&self, xid: Xid) -> bool {
        self.finish(xid, XidStatus::Committed)
    }

    pub fn abort(&self, xid: Xid) -> bool {
        self.finish(xid, XidStatus::Aborted)
    }

    fn finish(&self, xid: Xid, outcome: XidStatus) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match guard.status.get_mut(&xid) {
            Some(status) if *status == XidStatus::InProgress => {
                *status = outcome;
                true
            }
            _ => false,
        }
    }

    /// Unknown ids are treated as aborted.
    pub fn status(&self, xid: Xid) -> XidStatus {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard
            .status
            .get(&xid)
            .copied()
            .unwrap_or(XidStatus::Aborted)
    }

    /// Takes a snapshot of the currently committed state.
    pub fn snapshot(&self) -> Snapshot {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let in_progress = guard
            .status
            .iter()
            .filter(|(_, status)| **status == XidStatus::InProgress)
            .map(|(xid, _)| *xid)
            .collect();
        Snapshot {
            xmax: Xid(guard.next_xid),
            in_progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(xmin: Xid, xmax: Option<Xid>) -> HeapTuple {
        HeapTuple {
            xmin,
            xmax,
            values: Vec::new(),
        }
    }

    #[test]
    fn snapshot_ignores_later_and_running_transactions() {
        let clog = CommitLog::default();
        let committed = clog.begin();
        clog.commit(committed);
        let running = clog.begin();

        let snapshot = clog.snapshot();
        let later = clog.begin();
        clog.commit(later);
        clog.commit(running);

        assert!(snapshot.tuple_visible(&tuple(committed, None), &clog));
        assert!(!snapshot.tuple_visible(&tuple(running, None), &clog));
        assert!(!snapshot.tuple_visible(&tuple(later, None), &clog));
    }

    #[test]
    fn deleted_rows_stay_visible_to_older_snapshots() {
        let clog = CommitLog::default();
        let snapshot = clog.snapshot();
        let deleter = clog.begin();
        clog.commit(deleter);

        let row = tuple(Xid::FROZEN, Some(deleter));
        assert!(snapshot.tuple_visible(&row, &clog));
        assert!(!clog.snapshot().tuple_visible(&row, &clog));
    }

    #[test]
    fn aborted_insert_is_never_visible() {
        let clog = CommitLog::default();
        let xid = clog.begin();
        clog.abort(xid);
        assert!(!clog.snapshot().tuple_visible(&tuple(xid, None), &clog));
        assert!(!clog.commit(xid));
    }
}
