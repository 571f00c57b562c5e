//! Remote access-list client: the game server's whitelist driven over
//! RCON, one name at a time. The transport offers no transactions and
//! no batching, so every capability here is a single command/response
//! exchange on a fresh session.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const TYPE_AUTH: i32 = 3;
const TYPE_EXEC: i32 = 2;
// Max command payload the vanilla server accepts; anything we send is
// far below this, so a longer frame coming back is a framing bug.
const MAX_FRAME: i32 = 4096;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("rcon i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("rcon authentication rejected")]
    AuthRejected,
    #[error("rcon call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed rcon frame")]
    BadFrame,
}

#[derive(Debug, Clone)]
pub struct RconConfig {
    pub addr: String,
    pub password: String,
    pub timeout: Duration,
}

impl RconConfig {
    pub fn new(addr: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            password: password.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// The remote whitelist as the engine sees it: add, remove, list.
#[async_trait]
pub trait RemoteAllowlist: Send + Sync {
    async fn add(&self, name: &str) -> Result<(), RconError>;
    async fn remove(&self, name: &str) -> Result<(), RconError>;
    async fn list(&self) -> Result<Vec<String>, RconError>;
}

/// Session-per-call RCON client. The transport is assumed unreliable
/// and cheap to reconnect relative to whitelist-mutation frequency, so
/// no connection is reused across calls.
pub struct RconAllowlist {
    cfg: RconConfig,
}

impl RconAllowlist {
    pub fn new(cfg: RconConfig) -> Self {
        Self { cfg }
    }

    async fn command(&self, cmd: &str) -> Result<String, RconError> {
        tokio::time::timeout(self.cfg.timeout, self.session(cmd))
            .await
            .map_err(|_| RconError::Timeout(self.cfg.timeout))?
    }

    async fn session(&self, cmd: &str) -> Result<String, RconError> {
        let mut stream = TcpStream::connect(&self.cfg.addr).await?;
        write_frame(&mut stream, 1, TYPE_AUTH, &self.cfg.password).await?;
        let (auth_id, _ty, _body) = read_frame(&mut stream).await?;
        if auth_id == -1 {
            return Err(RconError::AuthRejected);
        }
        write_frame(&mut stream, 2, TYPE_EXEC, cmd).await?;
        let (_id, _ty, body) = read_frame(&mut stream).await?;
        tracing::debug!(target: "warden-rcon", cmd, response = %body, "rcon exchange");
        Ok(body)
    }
}

#[async_trait]
impl RemoteAllowlist for RconAllowlist {
    async fn add(&self, name: &str) -> Result<(), RconError> {
        self.command(&format!("whitelist add {}", name)).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RconError> {
        self.command(&format!("whitelist remove {}", name)).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, RconError> {
        let raw = self.command("whitelist list").await?;
        Ok(parse_list_response(&raw))
    }
}

/// Parse the human-oriented status line of `whitelist list`:
/// `"<preamble>: <comma-separated names>"`. A line with no separator
/// (e.g. a "no entries" message) is a valid empty list, not an error.
pub fn parse_list_response(raw: &str) -> Vec<String> {
    match raw.split_once(':') {
        Some((_, names)) => names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    }
}

async fn write_frame<S>(stream: &mut S, id: i32, ty: i32, body: &str) -> Result<(), RconError>
where
    S: AsyncWrite + Unpin,
{
    // <len><id><type><body>\0\0, all little-endian i32 fields.
    let len = (body.len() + 10) as i32;
    let mut buf = Vec::with_capacity(body.len() + 14);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&ty.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<S>(stream: &mut S) -> Result<(i32, i32, String), RconError>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    let len = i32::from_le_bytes(head);
    if !(10..=MAX_FRAME).contains(&len) {
        return Err(RconError::BadFrame);
    }
    let mut frame = vec![0u8; len as usize];
    stream.read_exact(&mut frame).await?;
    let id = i32::from_le_bytes(frame[0..4].try_into().map_err(|_| RconError::BadFrame)?);
    let ty = i32::from_le_bytes(frame[4..8].try_into().map_err(|_| RconError::BadFrame)?);
    let body = String::from_utf8_lossy(&frame[8..len as usize - 2]).into_owned();
    Ok((id, ty, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_populated_list() {
        let names = parse_list_response("There are 2 whitelisted players: Steve, Alex");
        assert_eq!(names, vec!["Steve".to_string(), "Alex".to_string()]);
    }

    #[test]
    fn no_separator_means_empty() {
        assert!(parse_list_response("No whitelist").is_empty());
    }

    #[test]
    fn empty_tail_after_separator_means_empty() {
        assert!(parse_list_response("There are 0 whitelisted players:").is_empty());
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, 7, TYPE_EXEC, "whitelist list")
            .await
            .unwrap();
        let (id, ty, body) = read_frame(&mut b).await.unwrap();
        assert_eq!(id, 7);
        assert_eq!(ty, TYPE_EXEC);
        assert_eq!(body, "whitelist list");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME + 1).to_le_bytes()).await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(RconError::BadFrame)));
    }
}
