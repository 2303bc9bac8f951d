use crate::support::{secs_ago, write_with_mtime};
use driftsync::client::{ClientTimeouts, RemoteCoordinator};
use driftsync::coordinator::{Coordinator, CoordinatorService, CoordinatorSettings};
use driftsync::error::SyncError;
use driftsync::protocol::Credential;
use driftsync::reconcile::{EngineSettings, MemorySeenIndex, ReconciliationEngine};
use driftsync::server::CoordinatorServer;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;

struct RunningServer {
    runtime: tokio::runtime::Runtime,
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), SyncError>>,
}

impl RunningServer {
    fn start(root: &std::path::Path, secret: &str) -> Self {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let coordinator: Arc<dyn Coordinator> =
            Arc::new(CoordinatorService::new(root, CoordinatorSettings::default()));
        let server = runtime
            .block_on(CoordinatorServer::bind("127.0.0.1:0", coordinator, Credential::new(secret)))
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = runtime.spawn(server.serve_until(async {
            let _ = rx.await;
        }));
        Self {
            runtime,
            addr,
            shutdown,
            handle,
        }
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
        self.runtime.block_on(self.handle).unwrap().unwrap();
    }
}

fn client(addr: SocketAddr, secret: &str) -> RemoteCoordinator {
    RemoteCoordinator::new(
        addr.to_string(),
        Credential::new(secret),
        ClientTimeouts {
            connect: Duration::from_secs(2),
            io: Duration::from_secs(10),
        },
    )
}

#[test]
fn nodes_sync_through_a_real_socket() {
    let coordinator_dir = TempDir::new().unwrap();
    let server = RunningServer::start(coordinator_dir.path(), "secret");

    let a_dir = TempDir::new().unwrap();
    let b_dir = TempDir::new().unwrap();
    let engine = |dir: &TempDir| {
        ReconciliationEngine::new(
            dir.path(),
            client(server.addr, "secret"),
            Box::new(MemorySeenIndex::new()),
            EngineSettings::default(),
        )
    };
    let a = engine(&a_dir);
    let b = engine(&b_dir);

    write_with_mtime(&a_dir.path().join("docs/report.txt"), &"quarterly numbers\n".repeat(500), secs_ago(60));
    assert_eq!(a.run_cycle().unwrap().uploaded, 1);
    assert_eq!(b.run_cycle().unwrap().downloaded, 1);
    assert_eq!(
        fs::read(b_dir.path().join("docs/report.txt")).unwrap(),
        fs::read(a_dir.path().join("docs/report.txt")).unwrap()
    );

    fs::remove_file(a_dir.path().join("docs/report.txt")).unwrap();
    assert_eq!(a.run_cycle().unwrap().deleted_remote, 1);
    assert_eq!(b.run_cycle().unwrap().deleted_local, 1);
    assert!(!b_dir.path().join("docs/report.txt").exists());

    drop(a);
    drop(b);
    server.stop();
}

#[test]
fn wrong_credential_is_rejected_over_the_wire() {
    let coordinator_dir = TempDir::new().unwrap();
    fs::write(coordinator_dir.path().join("keep.txt"), "mine").unwrap();
    let server = RunningServer::start(coordinator_dir.path(), "secret");

    let intruder = client(server.addr, "guess");
    assert!(matches!(intruder.list_file_table(), Err(SyncError::Auth)));
    let path = driftsync::RelPath::parse("keep.txt").unwrap();
    assert!(matches!(intruder.delete_path(&path), Err(SyncError::Auth)));
    assert!(coordinator_dir.path().join("keep.txt").exists());

    let table = client(server.addr, "secret").list_file_table().unwrap();
    assert_eq!(table.files.len(), 1);

    drop(intruder);
    server.stop();
}
