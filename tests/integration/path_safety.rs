use crate::support::{secs_ago, Cluster};
use driftsync::coordinator::Coordinator;
use driftsync::error::WireError;
use driftsync::protocol::{Credential, Envelope, Request, Response};
use driftsync::server::dispatch;
use driftsync::RelPath;

#[test]
fn traversal_and_absolute_paths_are_rejected() {
    for bad in ["../escape.txt", "a/../../escape.txt", "/etc/passwd", "C:/windows/x", "", "a/b.txt.locked"] {
        assert!(RelPath::parse(bad).is_err(), "{bad:?} was accepted");
    }
    assert_eq!(RelPath::parse("a\\b/./c.txt").unwrap().as_str(), "a/b/c.txt");
}

#[test]
fn coordinator_rejects_unsafe_paths_before_touching_disk() {
    let cluster = Cluster::new(0);
    let credential = Credential::new("secret");
    let outside = cluster.coordinator_dir.path().parent().unwrap().join("escape.txt");

    let requests = vec![
        Request::ApplyPatch {
            path: "../escape.txt".into(),
            delta: vec![],
            source_modified_at: 1,
        },
        Request::DeletePath {
            path: "../escape.txt".into(),
        },
        Request::GetDelta {
            path: "/etc/passwd".into(),
            signature: vec![],
        },
    ];
    for request in requests {
        let response = dispatch(
            cluster.coordinator.as_ref(),
            &credential,
            Envelope {
                credential: "secret".into(),
                request,
            },
        );
        assert!(
            matches!(response, Response::Error(WireError::PathSafety(_))),
            "unexpected response: {response:?}"
        );
    }
    assert!(!outside.exists());
}

#[test]
fn control_artifacts_in_the_tree_are_never_synced() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    node.write("notes.txt.locked", "stray lock", secs_ago(10));
    node.write(".notes.txt.removed", "123", secs_ago(10));
    node.write("notes.txt", "real", secs_ago(10));

    let report = node.engine.run_cycle().unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.tombstones_collected, 1);
    assert!(!cluster.coordinator_path("notes.txt.locked").exists());
    let table = cluster.coordinator.list_file_table().unwrap();
    assert_eq!(table.files.len(), 1);
}
