//! Creation ledger and rollback
//!
//! The ledger records every entry this run created, in the order the creates
//! completed, together with the tree position of the node it belongs to. It
//! is only read to undo work: a failed subtree takes its slice of the ledger
//! and the coordinator deletes that slice in reverse creation order, so
//! referencing entries go before the entries they reference. An entry that a
//! node outside the failed subtree reused stays in the ledger.

use crate::services::entry_repository::EntryRepository;
use crate::types::{EntryHandle, NodePath};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One confirmed create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub handle: EntryHandle,
    pub path: NodePath,
    /// Nodes that reused this entry instead of creating their own
    pub reused_by: Vec<NodePath>,
}

impl LedgerEntry {
    /// Whether this entry belongs only to the subtree at `path`
    fn owned_by(&self, path: &NodePath) -> bool {
        self.path.is_within(path) && self.reused_by.iter().all(|p| p.is_within(path))
    }
}

/// Ordered record of the entries created by one run
#[derive(Debug, Default)]
pub struct CreationLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl CreationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry whose create the store confirmed
    pub async fn record(&self, handle: EntryHandle, path: NodePath) {
        self.entries.lock().await.push(LedgerEntry {
            handle,
            path,
            reused_by: Vec::new(),
        });
    }

    /// Note that the node at `path` reused an entry; no-op for entries this
    /// run did not create
    pub async fn record_reuse(&self, uid: &str, path: NodePath) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.handle.uid == uid) {
            entry.reused_by.push(path);
        }
    }

    /// Remove and return the entries created for `path` and its descendants,
    /// in creation order
    ///
    /// Entries also reused from outside the subtree are left in place.
    pub async fn take_subtree(&self, path: &NodePath) -> Vec<LedgerEntry> {
        let mut entries = self.entries.lock().await;
        let (taken, kept): (Vec<_>, Vec<_>) = entries.drain(..).partition(|entry| entry.owned_by(path));
        for entry in kept.iter().filter(|e| e.path.is_within(path)) {
            tracing::info!(uid = %entry.handle.uid, reused_by = ?entry.reused_by, "Keeping entry reused elsewhere");
        }
        *entries = kept;
        taken
    }

    pub async fn take_all(&self) -> Vec<LedgerEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    pub async fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// An entry rollback could not delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    pub handle: EntryHandle,
    pub reason: String,
}

/// Entries left behind by a rollback; reported as a warning, never as the
/// run's primary error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackIncomplete {
    pub failures: Vec<RollbackFailure>,
}

impl fmt::Display for RollbackIncomplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rollback incomplete, {} entries remain:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " {} ({});", failure.handle, failure.reason)?;
        }
        Ok(())
    }
}

/// An entry rollback deliberately left in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedEntry {
    pub handle: EntryHandle,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    /// Deleted entries, in deletion order
    pub deleted: Vec<EntryHandle>,
    pub protected: Vec<ProtectedEntry>,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackOutcome {
    pub fn merge(&mut self, other: RollbackOutcome) {
        self.deleted.extend(other.deleted);
        self.protected.extend(other.protected);
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.protected.is_empty() && self.failures.is_empty()
    }

    pub fn incomplete(&self) -> Option<RollbackIncomplete> {
        if self.failures.is_empty() {
            None
        } else {
            Some(RollbackIncomplete {
                failures: self.failures.clone(),
            })
        }
    }
}

pub struct RollbackCoordinator {
    repository: Arc<EntryRepository>,
    ledger: Arc<CreationLedger>,
    /// Keep entries that a surviving entry still references
    protect_referenced: bool,
}

impl RollbackCoordinator {
    pub fn new(repository: Arc<EntryRepository>, ledger: Arc<CreationLedger>, protect_referenced: bool) -> Self {
        Self {
            repository,
            ledger,
            protect_referenced,
        }
    }

    /// Roll back the entries created for `path` and its descendants
    pub async fn rollback_subtree(&self, path: &NodePath) -> RollbackOutcome {
        let slice = self.ledger.take_subtree(path).await;
        self.rollback(slice).await
    }

    /// Roll back everything this run created
    pub async fn rollback_all(&self) -> RollbackOutcome {
        let slice = self.ledger.take_all().await;
        self.rollback(slice).await
    }

    /// Delete a ledger slice in reverse creation order
    ///
    /// Individual failures are collected and the rest of the slice is still
    /// attempted. With reference protection on, an entry is kept while any
    /// referrer survives: an entry outside the run, an entry another subtree
    /// reused, or a slice entry this pass could not delete.
    pub async fn rollback(&self, slice: Vec<LedgerEntry>) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();
        if slice.is_empty() {
            return outcome;
        }
        let mut removed: HashSet<String> = HashSet::new();
        tracing::warn!(entries = slice.len(), "Rolling back created entries");

        for entry in slice.into_iter().rev() {
            let handle = entry.handle;

            if self.protect_referenced {
                match self.repository.referencing_entries(&handle).await {
                    Ok(referrers) => {
                        let surviving: Vec<String> =
                            referrers.into_iter().filter(|uid| !removed.contains(uid)).collect();
                        if !surviving.is_empty() {
                            tracing::warn!(
                                uid = %handle.uid,
                                referenced_by = ?surviving,
                                "Entry still referenced, not deleting"
                            );
                            outcome.protected.push(ProtectedEntry {
                                handle,
                                reason: format!("referenced by {}", surviving.join(", ")),
                            });
                            continue;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(uid = %handle.uid, error = %e, "Reference check failed, not deleting");
                        outcome.protected.push(ProtectedEntry {
                            handle,
                            reason: format!("reference check failed: {}", e),
                        });
                        continue;
                    }
                }
            }

            match self.repository.delete(&handle).await {
                Ok(existed) => {
                    tracing::info!(uid = %handle.uid, content_type = %handle.content_type, existed, "Rolled back entry");
                    removed.insert(handle.uid.clone());
                    outcome.deleted.push(handle);
                }
                Err(e) => {
                    tracing::error!(uid = %handle.uid, error = %e, "Rollback delete failed");
                    outcome.failures.push(RollbackFailure {
                        handle,
                        reason: e.to_string(),
                    });
                }
            }
        }

        outcome
    }
}
