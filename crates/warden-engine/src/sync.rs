//! Reconciliation: converge the remote whitelist onto the store.
//!
//! Two passes, run in order. Pass A demotes secondary accounts per
//! identity and deletes their rows. Pass B reads the approved set
//! after those deletions and strips remote names nothing in the store
//! justifies. Neither pass ever issues a remote add; only the approval
//! path does that.

use serde::Serialize;
use std::collections::HashSet;
use warden_events::topics;
use warden_store::AccessRequest;

use crate::{dedup, Engine, EngineError};

/// One name the run could not remove from the remote list.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRemoval {
    pub name: String,
    pub reason: String,
}

/// Outcome of one reconciliation run. `removed` is Pass A's names
/// followed by Pass B's, in the order they were handled. An empty
/// report is the common case: nothing to do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub removed: Vec<String>,
    pub failed: Vec<FailedRemoval>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.failed.is_empty()
    }
}

impl Engine {
    /// Dedup pass scoped to one identity, used right after an approval
    /// with the just-approved name as the preference.
    pub async fn cleanup_identity(
        &self,
        identity: i64,
        keep_name: Option<&str>,
    ) -> Result<SyncReport, EngineError> {
        let rows = self.store().list_approved_by_identity_async(identity).await?;
        let (_primary, secondaries) = dedup::select_primary(&rows, keep_name);
        let secondaries: Vec<AccessRequest> = secondaries.into_iter().cloned().collect();
        let mut report = SyncReport::default();
        self.revoke(&secondaries, &mut report).await?;
        Ok(report)
    }

    /// Full run: dedup sweep over every identity, then drift sweep
    /// against the remote listing. Individual remote failures are
    /// recorded and the run continues; only store failures abort.
    pub async fn reconcile(&self) -> Result<SyncReport, EngineError> {
        let mut report = SyncReport::default();

        // Pass A: one primary per identity, recency wins.
        let approved = self.store().list_all_approved_async().await?;
        for group in group_by_identity(&approved) {
            let (_primary, secondaries) = dedup::select_primary(group, None);
            let secondaries: Vec<AccessRequest> = secondaries.into_iter().cloned().collect();
            self.revoke(&secondaries, &mut report).await?;
        }

        // Pass B: the approved set is re-read here so it reflects Pass
        // A's deletions. The remote folds case, the store preserves it,
        // so the comparison is case-insensitive.
        let approved_fold: HashSet<String> = self
            .store()
            .approved_names_async()
            .await?
            .into_iter()
            .map(|n| n.to_lowercase())
            .collect();
        match self.remote.list().await {
            Ok(live) => {
                for name in live {
                    if approved_fold.contains(&name.to_lowercase()) {
                        continue;
                    }
                    match self.remote.remove(&name).await {
                        Ok(()) => report.removed.push(name),
                        Err(err) => {
                            tracing::warn!(%name, %err, "failed to remove drifted name");
                            report.failed.push(FailedRemoval {
                                name,
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "remote listing unavailable; drift sweep skipped");
            }
        }

        self.bus.publish(topics::TOPIC_WHITELIST_SYNCED, &report);
        Ok(report)
    }

    /// Best-effort remote removal, authoritative row removal. The row
    /// is deleted whatever the remote call did: it no longer represents
    /// an authorized grant, and keeping it would make every later run
    /// re-attempt the same revoke.
    async fn revoke(
        &self,
        secondaries: &[AccessRequest],
        report: &mut SyncReport,
    ) -> Result<(), EngineError> {
        for req in secondaries {
            if let Err(err) = self.remote.remove(&req.in_game_name).await {
                tracing::warn!(name = %req.in_game_name, %err, "failed to remove secondary name");
                report.failed.push(FailedRemoval {
                    name: req.in_game_name.clone(),
                    reason: err.to_string(),
                });
            }
            self.store().delete_async(req.id).await?;
            report.removed.push(req.in_game_name.clone());
        }
        Ok(())
    }
}

/// Split a store-ordered listing into per-identity slices. Rows of one
/// identity are contiguous per the store's ordering contract.
fn group_by_identity(rows: &[AccessRequest]) -> Vec<&[AccessRequest]> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].identity != rows[start].identity {
            out.push(&rows[start..i]);
            start = i;
        }
    }
    out
}
