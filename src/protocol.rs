//! Wire protocol between watching nodes and the coordinator
//!
//! Every frame is a big-endian `u32` payload length followed by a bincode
//! payload:
//!
//! ```text
//! +---------+---------------------------+
//! | length  | payload (bincode)         |
//! | 4 bytes | `length` bytes            |
//! +---------+---------------------------+
//! ```
//!
//! A request frame carries an [`Envelope`] (credential plus [`Request`]); the
//! reply is one [`Response`] frame. Paths travel as plain strings and are
//! validated by the receiver before anything touches the filesystem.

use crate::error::{SyncError, WireError};
use crate::table::RemoteTable;
use crate::types::Millis;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload.
pub const MAX_FRAME: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    GetSignature { path: String },
    GetDelta { path: String, signature: Vec<u8> },
    ApplyPatch { path: String, delta: Vec<u8>, source_modified_at: Millis },
    ListFileTable,
    DeletePath { path: String },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::GetSignature { .. } => "get_signature",
            Request::GetDelta { .. } => "get_delta",
            Request::ApplyPatch { .. } => "apply_patch",
            Request::ListFileTable => "list_file_table",
            Request::DeletePath { .. } => "delete_path",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub credential: String,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Signature(Vec<u8>),
    Delta(Vec<u8>),
    Applied(bool),
    Table(RemoteTable),
    Deleted(bool),
    Error(WireError),
}

/// Shared secret checked on every request.
///
/// Comparison is over BLAKE3 digests, so its running time does not depend on
/// where the candidate first differs.
#[derive(Clone)]
pub struct Credential {
    secret: String,
    digest: blake3::Hash,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let digest = blake3::hash(secret.as_bytes());
        Self { secret, digest }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn matches(&self, candidate: &str) -> bool {
        // blake3::Hash equality is constant time.
        blake3::hash(candidate.as_bytes()) == self.digest
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, SyncError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME as usize {
        return Err(SyncError::Protocol(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME}",
            payload.len()
        )));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn check_len(len: u32) -> Result<usize, SyncError> {
    if len > MAX_FRAME {
        return Err(SyncError::Protocol(format!("frame of {len} bytes exceeds limit of {MAX_FRAME}")));
    }
    Ok(len as usize)
}

fn transport(err: std::io::Error) -> SyncError {
    SyncError::Transport(err.to_string())
}

/// Write one frame and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), SyncError> {
    let frame = encode(message)?;
    writer.write_all(&frame).map_err(transport)?;
    writer.flush().map_err(transport)?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream before the header.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>, SyncError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(transport(e)),
    }
    let len = check_len(u32::from_be_bytes(header))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(transport)?;
    Ok(Some(bincode::deserialize(&payload)?))
}

pub async fn write_frame_async<W, T>(writer: &mut W, message: &T) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await.map_err(transport)?;
    writer.flush().await.map_err(transport)?;
    Ok(())
}

pub async fn read_frame_async<R, T>(reader: &mut R) -> Result<Option<T>, SyncError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(transport(e)),
    }
    let len = check_len(u32::from_be_bytes(header))?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(transport)?;
    Ok(Some(bincode::deserialize(&payload)?))
}
