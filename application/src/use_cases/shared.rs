//! Shared utilities for use cases.
//!
//! Contains cancellation checking and the shared world-state handle used by
//! the execution coordinator (single writer) and the engagement loop
//! (readers).

use std::sync::{Arc, RwLock};

use pentree_domain::{Finding, FindingError, MergeSummary, WorldState};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Check if cancellation has been requested.
pub(crate) fn is_cancelled(token: &Option<CancellationToken>) -> bool {
    token.as_ref().is_some_and(CancellationToken::is_cancelled)
}

/// The world-state lock was poisoned by a panic in a writer.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("World state corrupted: {0}")]
pub struct StoreCorruption(pub String);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommitError {
    #[error(transparent)]
    Corrupted(#[from] StoreCorruption),

    #[error("Findings rejected: {0}")]
    Rejected(#[from] FindingError),
}

/// Shared handle to the engagement's world state.
///
/// A commit merges a whole batch while holding the write lock, so results
/// of two invocations never interleave.
#[derive(Debug, Clone, Default)]
pub struct SharedWorldState {
    inner: Arc<RwLock<WorldState>>,
}

impl SharedWorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&WorldState) -> R) -> Result<R, StoreCorruption> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StoreCorruption(e.to_string()))?;
        Ok(f(&guard))
    }

    pub fn commit(&self, findings: Vec<Finding>) -> Result<MergeSummary, CommitError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StoreCorruption(e.to_string()))?;
        Ok(guard.merge_all(findings)?)
    }

    pub fn snapshot(&self) -> Result<WorldState, StoreCorruption> {
        self.read(WorldState::clone)
    }

    /// Poisons the lock, as a panicking writer would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.write();
            panic!("writer panicked");
        })
        .join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pentree_domain::{FindingKind, TaskId};

    fn host(address: &str) -> Finding {
        Finding::new(FindingKind::Host, TaskId::new("t1")).with_identity("address", address)
    }

    #[test]
    fn test_commit_and_read() {
        let world = SharedWorldState::new();
        let summary = world.commit(vec![host("10.0.0.5"), host("10.0.0.6")]).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(world.read(|w| w.len()).unwrap(), 2);
    }

    #[test]
    fn test_rejected_batch_leaves_state_untouched() {
        let world = SharedWorldState::new();
        let err = world
            .commit(vec![host("10.0.0.5"), Finding::new(FindingKind::Service, TaskId::new("t1"))])
            .unwrap_err();
        assert!(matches!(err, CommitError::Rejected(_)));
        assert_eq!(world.read(|w| w.len()).unwrap(), 0);
    }

    #[test]
    fn test_poisoned_lock_is_corruption() {
        let world = SharedWorldState::new();
        world.poison();
        assert!(world.read(|w| w.len()).is_err());
        assert!(matches!(
            world.commit(vec![host("10.0.0.5")]),
            Err(CommitError::Corrupted(_))
        ));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(!is_cancelled(&None));
        let token = CancellationToken::new();
        let some = Some(token.clone());
        assert!(!is_cancelled(&some));
        token.cancel();
        assert!(is_cancelled(&some));
    }
}
