//! Network client for a remote coordinator
//!
//! Synchronous on purpose: the reconciliation loop processes one path at a
//! time and blocks on every call. The connection is opened lazily, reused
//! across calls, and dropped after any transport failure so the next call
//! reconnects.

use crate::coordinator::Coordinator;
use crate::error::SyncError;
use crate::paths::RelPath;
use crate::protocol::{read_frame, write_frame, Credential, Envelope, Request, Response};
use crate::table::RemoteTable;
use crate::types::Millis;
use parking_lot::Mutex;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            io: Duration::from_secs(30),
        }
    }
}

pub struct RemoteCoordinator {
    addr: String,
    credential: Credential,
    timeouts: ClientTimeouts,
    conn: Mutex<Option<TcpStream>>,
}

impl RemoteCoordinator {
    pub fn new(addr: impl Into<String>, credential: Credential, timeouts: ClientTimeouts) -> Self {
        Self {
            addr: addr.into(),
            credential,
            timeouts,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connect(&self) -> Result<TcpStream, SyncError> {
        let addrs = self
            .addr
            .to_socket_addrs()
            .map_err(|e| SyncError::Transport(format!("cannot resolve {}: {e}", self.addr)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeouts.connect) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeouts.io))?;
                    stream.set_write_timeout(Some(self.timeouts.io))?;
                    stream.set_nodelay(true)?;
                    debug!(addr = %addr, "Connected to coordinator");
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(SyncError::Transport(match last_err {
            Some(e) => format!("cannot connect to {}: {e}", self.addr),
            None => format!("{} resolved to no addresses", self.addr),
        }))
    }

    fn call(&self, request: Request) -> Result<Response, SyncError> {
        let name = request.name();
        let mut conn = self.conn.lock();
        if conn.is_none() {
            *conn = Some(self.connect()?);
        }
        let stream = conn.as_ref().ok_or_else(|| SyncError::Transport("no connection".into()))?;

        let envelope = Envelope {
            credential: self.credential.secret().to_string(),
            request,
        };
        let result = exchange(stream, &envelope);
        if let Err(e) = &result {
            warn!(request = name, error = %e, "Dropping coordinator connection");
            *conn = None;
        }

        match result? {
            Response::Error(wire) => Err(wire.into()),
            response => Ok(response),
        }
    }
}

fn exchange(stream: &TcpStream, envelope: &Envelope) -> Result<Response, SyncError> {
    write_frame(&mut BufWriter::new(stream), envelope)?;
    read_frame(&mut BufReader::new(stream))?
        .ok_or_else(|| SyncError::Transport("coordinator closed the connection".into()))
}

fn unexpected(request: &str, response: Response) -> SyncError {
    SyncError::Protocol(format!("unexpected response to {request}: {response:?}"))
}

impl Coordinator for RemoteCoordinator {
    fn get_signature(&self, path: &RelPath) -> Result<Vec<u8>, SyncError> {
        match self.call(Request::GetSignature { path: path.to_string() })? {
            Response::Signature(bytes) => Ok(bytes),
            other => Err(unexpected("get_signature", other)),
        }
    }

    fn get_delta(&self, path: &RelPath, signature: &[u8]) -> Result<Vec<u8>, SyncError> {
        match self.call(Request::GetDelta {
            path: path.to_string(),
            signature: signature.to_vec(),
        })? {
            Response::Delta(bytes) => Ok(bytes),
            other => Err(unexpected("get_delta", other)),
        }
    }

    fn apply_patch(&self, path: &RelPath, delta: &[u8], source_modified_at: Millis) -> Result<bool, SyncError> {
        match self.call(Request::ApplyPatch {
            path: path.to_string(),
            delta: delta.to_vec(),
            source_modified_at,
        })? {
            Response::Applied(applied) => Ok(applied),
            other => Err(unexpected("apply_patch", other)),
        }
    }

    fn list_file_table(&self) -> Result<RemoteTable, SyncError> {
        match self.call(Request::ListFileTable)? {
            Response::Table(table) => Ok(table),
            other => Err(unexpected("list_file_table", other)),
        }
    }

    fn delete_path(&self, path: &RelPath) -> Result<bool, SyncError> {
        match self.call(Request::DeletePath { path: path.to_string() })? {
            Response::Deleted(deleted) => Ok(deleted),
            other => Err(unexpected("delete_path", other)),
        }
    }
}
