//! Whitelist consistency engine.
//!
//! The request store holds reviewed approval decisions; the game
//! server's live whitelist is driven one name at a time over RCON.
//! This crate owns the request lifecycle (`decide`), the one-account-
//! per-identity policy (`dedup`), and the two-pass reconciliation that
//! converges the remote list onto the store (`sync`).

pub mod dedup;
pub mod sync;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use warden_events::{topics, Bus};
use warden_rcon::{RconError, RemoteAllowlist};
use warden_store::{AccessRequest, RequestStatus, RequestStore};

pub use sync::{FailedRemoval, SyncReport};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{3,16}$").expect("name regex"));

/// Canonical in-game username: 3..=16 chars of `[A-Za-z0-9_]`.
pub fn valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request {0} not found")]
    NotFound(i64),
    #[error("request {0} was already decided")]
    AlreadyDecided(i64),
    #[error("remote whitelist unavailable: {0}")]
    RemoteUnavailable(#[from] RconError),
    #[error("invalid in-game name: {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Deny,
}

impl Verdict {
    fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approve => "approved",
            Verdict::Deny => "denied",
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    store: RequestStore,
    remote: Arc<dyn RemoteAllowlist>,
    bus: Bus,
}

impl Engine {
    pub fn new(store: RequestStore, remote: Arc<dyn RemoteAllowlist>, bus: Bus) -> Self {
        Self { store, remote, bus }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Intake: validate the name before touching the store, insert a
    /// pending request, announce it.
    pub async fn submit(
        &self,
        identity: i64,
        origin_channel: i64,
        in_game_name: &str,
        comment: Option<&str>,
    ) -> Result<i64, EngineError> {
        if !valid_name(in_game_name) {
            return Err(EngineError::InvalidName(in_game_name.to_string()));
        }
        let id = self
            .store
            .insert_async(identity, origin_channel, in_game_name, comment)
            .await?;
        self.bus.publish(
            topics::TOPIC_REQUEST_SUBMITTED,
            &json!({"request_id": id, "identity": identity, "in_game_name": in_game_name}),
        );
        Ok(id)
    }

    /// Settle one pending request. Two admins racing on the same id get
    /// exactly one winner; the loser sees `AlreadyDecided`.
    pub async fn decide(
        &self,
        id: i64,
        verdict: Verdict,
        reviewer: i64,
    ) -> Result<AccessRequest, EngineError> {
        let req = self
            .store
            .get_async(id)
            .await?
            .ok_or(EngineError::NotFound(id))?;
        if req.status != RequestStatus::Pending {
            return Err(EngineError::AlreadyDecided(id));
        }
        match verdict {
            Verdict::Approve => {
                // Remote add goes first: a failure leaves the row pending
                // so the reviewer can retry. The store never claims a name
                // the server was not told about.
                self.remote.add(&req.in_game_name).await?;
                let won = self
                    .store
                    .transition_if_pending_async(id, RequestStatus::Approved, reviewer)
                    .await?;
                if !won {
                    return Err(EngineError::AlreadyDecided(id));
                }
                self.bus.publish(
                    topics::TOPIC_REQUEST_APPROVED,
                    &json!({
                        "request_id": id,
                        "origin_channel": req.origin_channel,
                        "in_game_name": req.in_game_name.clone(),
                    }),
                );
                self.publish_decided(id, verdict, reviewer);
                // One whitelisted account per identity: demote whatever
                // this identity had approved before, keeping the name
                // that was just approved.
                match self
                    .cleanup_identity(req.identity, Some(&req.in_game_name))
                    .await
                {
                    Ok(report) if !report.removed.is_empty() => {
                        tracing::info!(
                            identity = req.identity,
                            removed = ?report.removed,
                            "demoted secondary accounts after approval"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(identity = req.identity, %err, "post-approval cleanup failed");
                    }
                }
            }
            Verdict::Deny => {
                let won = self
                    .store
                    .transition_if_pending_async(id, RequestStatus::Denied, reviewer)
                    .await?;
                if !won {
                    return Err(EngineError::AlreadyDecided(id));
                }
                self.bus.publish(
                    topics::TOPIC_REQUEST_DENIED,
                    &json!({"request_id": id, "origin_channel": req.origin_channel}),
                );
                self.publish_decided(id, verdict, reviewer);
            }
        }
        self.store
            .get_async(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    fn publish_decided(&self, id: i64, verdict: Verdict, reviewer: i64) {
        self.bus.publish(
            topics::TOPIC_REQUEST_DECIDED,
            &json!({"request_id": id, "verdict": verdict.as_str(), "decided_by": reviewer}),
        );
    }
}
