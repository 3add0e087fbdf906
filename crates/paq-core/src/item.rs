//! One requested transfer and its state machine.
//!
//! Items live in an arena owned by the scheduler and are addressed by
//! [`ItemId`] handles; queues and workers never own items.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::hash::HashList;

/// Stable handle into the scheduler's item arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub(crate) usize);

impl ItemId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Lifecycle of a fetch request.
///
/// `Idle → Queued → Fetching → {Done | FailedRetryable | FailedTerminal |
/// Cancelled}`, with `FailedRetryable → Queued` for bounded retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Created but not yet routed to a queue.
    Idle,
    /// Waiting in a queue or sent to a worker, no transfer started yet.
    Queued,
    /// The method reported the transfer as started.
    Fetching,
    /// Completed. `ims_hit` means the conditional fetch matched and no bytes
    /// were transferred.
    Done { ims_hit: bool },
    /// Failed but eligible for requeueing.
    FailedRetryable,
    /// Failed for good; never retried automatically.
    FailedTerminal,
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Done { .. } | ItemState::FailedTerminal | ItemState::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal edge of the state
    /// machine. Terminal states accept no further transitions.
    pub fn can_transition(&self, next: &ItemState) -> bool {
        use ItemState::*;
        match (self, next) {
            (Idle, Queued) => true,
            (Queued, Fetching) => true,
            // a queued request may fail or finish without an explicit start
            // report (IMS hits and fast local methods skip 200)
            (Queued, Done { .. }) | (Queued, FailedRetryable) | (Queued, FailedTerminal) => true,
            (Fetching, Done { .. }) | (Fetching, FailedRetryable) | (Fetching, FailedTerminal) => {
                true
            }
            (FailedRetryable, Queued) => true,
            (FailedRetryable, FailedTerminal) => true,
            // post-download verification can demote a completed item
            (Done { .. }, FailedTerminal) => true,
            (s, Cancelled) => !s.is_terminal(),
            _ => false,
        }
    }
}

/// One file to acquire: target URI, destination, expectations, progress.
#[derive(Debug, Clone)]
pub struct FetchItem {
    /// Target locator, e.g. `http://deb.example.org/pool/a.deb`.
    pub uri: String,
    /// Local destination path handed to the method.
    pub dest: PathBuf,
    /// Expected final size, when the index told us.
    pub expected_size: Option<u64>,
    /// Digests the completed file must match (verification collaborator).
    pub expected_hashes: HashList,
    /// Timestamp for a conditional fetch; methods answer `IMS-Hit` when the
    /// remote copy is not newer.
    pub last_modified: Option<DateTime<Utc>>,
    /// Offset of already-present local data the method may resume from.
    pub resume_point: u64,
    /// Hard cap on accepted payload size, if any.
    pub maximum_size: Option<u64>,
    /// Transient-failure requeue count.
    pub retries: u32,
    pub state: ItemState,
    /// Total size reported by the method at transfer start (0 = unknown).
    pub total_size: u64,
    /// Bytes reported fetched on completion.
    pub bytes_fetched: u64,
    /// Human-readable reason for the most recent failure.
    pub error: Option<String>,
}

impl FetchItem {
    pub fn new(uri: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            dest: dest.into(),
            expected_size: None,
            expected_hashes: HashList::default(),
            last_modified: None,
            resume_point: 0,
            maximum_size: None,
            retries: 0,
            state: ItemState::Idle,
            total_size: 0,
            bytes_fetched: 0,
            error: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_hashes(mut self, hashes: HashList) -> Self {
        self.expected_hashes = hashes;
        self
    }

    pub fn with_last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = Some(when);
        self
    }

    pub fn with_resume_point(mut self, offset: u64) -> Self {
        self.resume_point = offset;
        self
    }

    pub fn with_maximum_size(mut self, cap: u64) -> Self {
        self.maximum_size = Some(cap);
        self
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Move to `next`, logging (rather than panicking on) illegal edges so a
    /// misbehaving method cannot crash the engine.
    pub fn transition(&mut self, next: ItemState) {
        if !self.state.can_transition(&next) {
            tracing::warn!(
                uri = %self.uri,
                "ignoring illegal item transition {:?} -> {:?}",
                self.state,
                next
            );
            return;
        }
        self.state = next;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, terminal: bool) {
        self.error = Some(reason.into());
        self.transition(if terminal {
            ItemState::FailedTerminal
        } else {
            ItemState::FailedRetryable
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> FetchItem {
        FetchItem::new("http://example.org/a.deb", "/tmp/a.deb")
    }

    #[test]
    fn happy_path_transitions() {
        let mut it = item();
        it.transition(ItemState::Queued);
        it.transition(ItemState::Fetching);
        it.transition(ItemState::Done { ims_hit: false });
        assert!(it.state.is_terminal());
    }

    #[test]
    fn retryable_failure_returns_to_queued() {
        let mut it = item();
        it.transition(ItemState::Queued);
        it.transition(ItemState::Fetching);
        it.mark_failed("connection reset", false);
        assert_eq!(it.state, ItemState::FailedRetryable);
        it.transition(ItemState::Queued);
        assert_eq!(it.state, ItemState::Queued);
        assert_eq!(it.error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn verification_can_demote_done() {
        let mut it = item();
        it.transition(ItemState::Queued);
        it.transition(ItemState::Done { ims_hit: false });
        it.mark_failed("hash mismatch", true);
        assert_eq!(it.state, ItemState::FailedTerminal);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut it = item();
        it.transition(ItemState::Queued);
        it.mark_failed("bad uri", true);
        it.transition(ItemState::Queued);
        assert_eq!(it.state, ItemState::FailedTerminal, "terminal is final");
        it.transition(ItemState::Cancelled);
        assert_eq!(it.state, ItemState::FailedTerminal);
    }

    #[test]
    fn cancel_applies_to_any_live_state() {
        for setup in [ItemState::Idle, ItemState::Queued, ItemState::Fetching] {
            let mut it = item();
            it.state = setup;
            it.transition(ItemState::Cancelled);
            assert_eq!(it.state, ItemState::Cancelled);
        }
    }
}
