//! Persistent store of whitelist access requests.
//!
//! The store is the source of truth for *intended* whitelist state; the
//! game server's live list is a projection that reconciliation keeps
//! aligned. All mutation goes through two narrow operations: a
//! conditional pending-only transition and a row delete.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "denied" => Ok(RequestStatus::Denied),
            other => Err(anyhow!("unknown request status: {}", other)),
        }
    }
}

/// One application for whitelist access. `in_game_name` is immutable
/// after insert; `decided_at`/`decided_by` stay NULL until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: i64,
    pub identity: i64,
    pub origin_channel: i64,
    pub in_game_name: String,
    pub comment: Option<String>,
    pub status: RequestStatus,
    pub created_at: String,
    pub decided_at: Option<String>,
    pub decided_by: Option<i64>,
}

/// One entry of a requester's name history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRecord {
    pub in_game_name: String,
    pub status: RequestStatus,
    pub decided_at: Option<String>,
}

#[derive(Clone)]
pub struct RequestStore {
    db_path: PathBuf,
}

const REQUEST_COLUMNS: &str =
    "id,identity,origin_channel,in_game_name,comment,status,created_at,decided_at,decided_by";

// Most recently decided first, undecided last, then most recently created.
const APPROVED_ORDER: &str = "decided_at DESC NULLS LAST, created_at DESC, id DESC";

impl RequestStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let db_path = dir.join("requests.sqlite");
        let conn = Connection::open(&db_path)?;
        // Pragmas tuned for async server usage
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Busy timeout (default 5000ms; override with WARDEN_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("WARDEN_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Self::init_schema(&conn)?;
        Ok(Self { db_path })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS access_requests (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              identity INTEGER NOT NULL,
              origin_channel INTEGER NOT NULL,
              in_game_name TEXT NOT NULL,
              comment TEXT,
              status TEXT NOT NULL DEFAULT 'pending',
              created_at TEXT NOT NULL,
              decided_at TEXT,
              decided_by INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_requests_identity ON access_requests(identity);
            CREATE INDEX IF NOT EXISTS idx_requests_status ON access_requests(status);
            CREATE INDEX IF NOT EXISTS idx_requests_name ON access_requests(in_game_name);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn insert(
        &self,
        identity: i64,
        origin_channel: i64,
        in_game_name: &str,
        comment: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        conn.execute(
            "INSERT INTO access_requests(identity,origin_channel,in_game_name,comment,status,created_at) \
             VALUES(?,?,?,?,'pending',?)",
            params![identity, origin_channel, in_game_name, comment, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<Option<AccessRequest>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM access_requests WHERE id=? LIMIT 1");
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt.query_row([id], row_to_request).optional()?;
        Ok(row)
    }

    /// Atomic pending-only transition; the affected-row count reports
    /// whether this caller won. False means already decided or unknown id.
    pub fn transition_if_pending(
        &self,
        id: i64,
        status: RequestStatus,
        decided_by: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let n = conn.execute(
            "UPDATE access_requests SET status=?, decided_at=?, decided_by=? \
             WHERE id=? AND status='pending'",
            params![status.as_str(), now, decided_by, id],
        )?;
        Ok(n > 0)
    }

    pub fn list_approved_by_identity(&self, identity: i64) -> Result<Vec<AccessRequest>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM access_requests \
             WHERE identity=? AND status='approved' ORDER BY {APPROVED_ORDER}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([identity])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_request(row)?);
        }
        Ok(out)
    }

    /// All approved rows, grouped by identity (rows of one identity are
    /// contiguous and recency-ordered within the group).
    pub fn list_all_approved(&self) -> Result<Vec<AccessRequest>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM access_requests \
             WHERE status='approved' ORDER BY identity, {APPROVED_ORDER}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_request(row)?);
        }
        Ok(out)
    }

    pub fn approved_names(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT in_game_name FROM access_requests WHERE status='approved'")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, String>(0)?);
        }
        Ok(out)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM access_requests WHERE id=?", params![id])?;
        Ok(n > 0)
    }

    /// Most recently decided approved holder of a name (whois lookup).
    pub fn identity_for_name(&self, in_game_name: &str) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT identity FROM access_requests \
             WHERE in_game_name=? AND status='approved' ORDER BY {APPROVED_ORDER} LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let id: Option<i64> = stmt
            .query_row([in_game_name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    pub fn names_for_identity(&self, identity: i64) -> Result<Vec<NameRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT in_game_name,status,decided_at FROM access_requests \
             WHERE identity=? ORDER BY {APPROVED_ORDER}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([identity])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let status_s: String = row.get(1)?;
            out.push(NameRecord {
                in_game_name: row.get(0)?,
                status: parse_status(&status_s, 1)?,
                decided_at: row.get(2)?,
            });
        }
        Ok(out)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn insert_async(
        &self,
        identity: i64,
        origin_channel: i64,
        in_game_name: &str,
        comment: Option<&str>,
    ) -> Result<i64> {
        let s = self.clone();
        let name = in_game_name.to_string();
        let comment = comment.map(|c| c.to_string());
        tokio::task::spawn_blocking(move || {
            s.insert(identity, origin_channel, &name, comment.as_deref())
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn get_async(&self, id: i64) -> Result<Option<AccessRequest>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.get(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn transition_if_pending_async(
        &self,
        id: i64,
        status: RequestStatus,
        decided_by: i64,
    ) -> Result<bool> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.transition_if_pending(id, status, decided_by))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_approved_by_identity_async(&self, identity: i64) -> Result<Vec<AccessRequest>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.list_approved_by_identity(identity))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_all_approved_async(&self) -> Result<Vec<AccessRequest>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.list_all_approved())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn approved_names_async(&self) -> Result<Vec<String>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.approved_names())
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn delete_async(&self, id: i64) -> Result<bool> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.delete(id))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn identity_for_name_async(&self, in_game_name: &str) -> Result<Option<i64>> {
        let s = self.clone();
        let name = in_game_name.to_string();
        tokio::task::spawn_blocking(move || s.identity_for_name(&name))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn names_for_identity_async(&self, identity: i64) -> Result<Vec<NameRecord>> {
        let s = self.clone();
        tokio::task::spawn_blocking(move || s.names_for_identity(identity))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

fn parse_status(s: &str, idx: usize) -> rusqlite::Result<RequestStatus> {
    s.parse().map_err(|e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessRequest> {
    let status_s: String = row.get(5)?;
    Ok(AccessRequest {
        id: row.get(0)?,
        identity: row.get(1)?,
        origin_channel: row.get(2)?,
        in_game_name: row.get(3)?,
        comment: row.get(4)?,
        status: parse_status(&status_s, 5)?,
        created_at: row.get(6)?,
        decided_at: row.get(7)?,
        decided_by: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RequestStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RequestStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn insert_then_get_roundtrip() {
        let (_dir, store) = store();
        let id = store.insert(10, 77, "Steve", Some("friend of Alex")).unwrap();
        let req = store.get(id).unwrap().expect("row");
        assert_eq!(req.identity, 10);
        assert_eq!(req.origin_channel, 77);
        assert_eq!(req.in_game_name, "Steve");
        assert_eq!(req.comment.as_deref(), Some("friend of Alex"));
        assert_eq!(req.status, RequestStatus::Pending);
        assert!(req.decided_at.is_none());
        assert!(req.decided_by.is_none());
    }

    #[test]
    fn get_unknown_id_is_none() {
        let (_dir, store) = store();
        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn transition_is_pending_only() {
        let (_dir, store) = store();
        let id = store.insert(10, 77, "Steve", None).unwrap();
        assert!(store
            .transition_if_pending(id, RequestStatus::Approved, 1)
            .unwrap());
        // Second decision loses; row unchanged.
        assert!(!store
            .transition_if_pending(id, RequestStatus::Denied, 2)
            .unwrap());
        let req = store.get(id).unwrap().unwrap();
        assert_eq!(req.status, RequestStatus::Approved);
        assert_eq!(req.decided_by, Some(1));
    }

    #[test]
    fn transition_unknown_id_is_false() {
        let (_dir, store) = store();
        assert!(!store
            .transition_if_pending(42, RequestStatus::Approved, 1)
            .unwrap());
    }

    #[test]
    fn approved_listing_orders_by_recency() {
        let (_dir, store) = store();
        let older = store.insert(10, 77, "Alt", None).unwrap();
        let newer = store.insert(10, 77, "Primary", None).unwrap();
        store
            .transition_if_pending(older, RequestStatus::Approved, 1)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .transition_if_pending(newer, RequestStatus::Approved, 1)
            .unwrap();
        let rows = store.list_approved_by_identity(10).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.in_game_name.as_str()).collect();
        assert_eq!(names, vec!["Primary", "Alt"]);
    }

    #[test]
    fn approved_names_skip_pending_and_denied() {
        let (_dir, store) = store();
        let a = store.insert(10, 77, "Steve", None).unwrap();
        let b = store.insert(11, 77, "Ghost", None).unwrap();
        store.insert(12, 77, "Limbo", None).unwrap();
        store
            .transition_if_pending(a, RequestStatus::Approved, 1)
            .unwrap();
        store
            .transition_if_pending(b, RequestStatus::Denied, 1)
            .unwrap();
        let names = store.approved_names().unwrap();
        assert_eq!(names, vec!["Steve".to_string()]);
    }

    #[test]
    fn delete_removes_row() {
        let (_dir, store) = store();
        let id = store.insert(10, 77, "Steve", None).unwrap();
        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn identity_for_name_prefers_latest_decision() {
        let (_dir, store) = store();
        let a = store.insert(10, 77, "Steve", None).unwrap();
        let b = store.insert(20, 77, "Steve", None).unwrap();
        store
            .transition_if_pending(a, RequestStatus::Approved, 1)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .transition_if_pending(b, RequestStatus::Approved, 1)
            .unwrap();
        assert_eq!(store.identity_for_name("Steve").unwrap(), Some(20));
        assert_eq!(store.identity_for_name("Nobody").unwrap(), None);
    }

    #[test]
    fn names_for_identity_includes_all_statuses() {
        let (_dir, store) = store();
        let a = store.insert(10, 77, "Steve", None).unwrap();
        store.insert(10, 77, "Pendy", None).unwrap();
        store
            .transition_if_pending(a, RequestStatus::Approved, 1)
            .unwrap();
        let records = store.names_for_identity(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].in_game_name, "Steve");
        assert_eq!(records[0].status, RequestStatus::Approved);
        assert_eq!(records[1].status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn async_wrappers_roundtrip() {
        let (_dir, store) = store();
        let id = store.insert_async(10, 77, "Steve", None).await.unwrap();
        assert!(store
            .transition_if_pending_async(id, RequestStatus::Approved, 1)
            .await
            .unwrap());
        let names = store.approved_names_async().await.unwrap();
        assert_eq!(names, vec!["Steve".to_string()]);
    }
}
