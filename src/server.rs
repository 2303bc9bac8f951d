//! Coordinator network server
//!
//! Accepts TCP connections on a tokio runtime, one task per connection. Each
//! request is authenticated, its path validated, and the filesystem work run on
//! the blocking pool so slow patches never stall the accept loop.

use crate::coordinator::Coordinator;
use crate::error::{SyncError, WireError};
use crate::paths::RelPath;
use crate::protocol::{read_frame_async, write_frame_async, Credential, Envelope, Request, Response};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info, warn};

/// Answer one request. Credential and path checks happen before the
/// coordinator is touched.
pub fn dispatch(coordinator: &dyn Coordinator, credential: &Credential, envelope: Envelope) -> Response {
    if !credential.matches(&envelope.credential) {
        warn!(request = envelope.request.name(), "Rejected request with bad credential");
        return Response::Error(WireError::Auth);
    }
    let name = envelope.request.name();
    match handle(coordinator, envelope.request) {
        Ok(response) => response,
        Err(e) => {
            debug!(request = name, error = %e, "Request failed");
            Response::Error(WireError::from(&e))
        }
    }
}

fn handle(coordinator: &dyn Coordinator, request: Request) -> Result<Response, SyncError> {
    Ok(match request {
        Request::GetSignature { path } => Response::Signature(coordinator.get_signature(&RelPath::parse(&path)?)?),
        Request::GetDelta { path, signature } => {
            Response::Delta(coordinator.get_delta(&RelPath::parse(&path)?, &signature)?)
        }
        Request::ApplyPatch {
            path,
            delta,
            source_modified_at,
        } => Response::Applied(coordinator.apply_patch(&RelPath::parse(&path)?, &delta, source_modified_at)?),
        Request::ListFileTable => Response::Table(coordinator.list_file_table()?),
        Request::DeletePath { path } => Response::Deleted(coordinator.delete_path(&RelPath::parse(&path)?)?),
    })
}

struct Handler {
    coordinator: Arc<dyn Coordinator>,
    credential: Arc<Credential>,
}

pub struct CoordinatorServer {
    listener: TcpListener,
    handler: Arc<Handler>,
}

impl CoordinatorServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        coordinator: Arc<dyn Coordinator>,
        credential: Credential,
    ) -> Result<Self, SyncError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Coordinator listening");
        Ok(Self {
            listener,
            handler: Arc::new(Handler {
                coordinator,
                credential: Arc::new(credential),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SyncError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process is stopped.
    pub async fn serve(self) -> Result<(), SyncError> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Connections already accepted finish
    /// their in-flight request on their own tasks.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), SyncError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Coordinator shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Connection accepted");
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, handler).await {
                            warn!(peer = %peer, error = %e, "Connection closed with error");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, handler: Arc<Handler>) -> Result<(), SyncError> {
    stream.set_nodelay(true)?;
    loop {
        let envelope: Envelope = match read_frame_async(&mut stream).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(()),
            Err(e @ SyncError::Protocol(_)) => {
                // The stream position is unknown after a bad frame; answer and hang up.
                write_frame_async(&mut stream, &Response::Error(WireError::from(&e))).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let handler_ref = handler.clone();
        let response = tokio::task::spawn_blocking(move || {
            dispatch(handler_ref.coordinator.as_ref(), &handler_ref.credential, envelope)
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = %e, "Request handler panicked");
            Response::Error(WireError::Internal("request handler failed".into()))
        });

        write_frame_async(&mut stream, &response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorService, CoordinatorSettings};
    use tempfile::TempDir;

    fn envelope(credential: &str, request: Request) -> Envelope {
        Envelope {
            credential: credential.into(),
            request,
        }
    }

    #[test]
    fn test_bad_credential_is_rejected_before_dispatch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "keep").unwrap();
        let coordinator = CoordinatorService::new(dir.path(), CoordinatorSettings::default());
        let credential = Credential::new("right");

        let response = dispatch(
            &coordinator,
            &credential,
            envelope("wrong", Request::DeletePath { path: "a.txt".into() }),
        );
        assert_eq!(response, Response::Error(WireError::Auth));
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_traversal_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let coordinator = CoordinatorService::new(dir.path(), CoordinatorSettings::default());
        let credential = Credential::new("right");

        let response = dispatch(
            &coordinator,
            &credential,
            envelope(
                "right",
                Request::GetSignature {
                    path: "../outside.txt".into(),
                },
            ),
        );
        assert!(matches!(response, Response::Error(WireError::PathSafety(_))));
    }

    #[test]
    fn test_list_file_table_dispatch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let coordinator = CoordinatorService::new(dir.path(), CoordinatorSettings::default());
        let credential = Credential::new("right");

        match dispatch(&coordinator, &credential, envelope("right", Request::ListFileTable)) {
            Response::Table(table) => assert_eq!(table.files.len(), 1),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
