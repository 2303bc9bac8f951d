use crate::support::{secs_ago, tombstone_files, Cluster};
use driftsync::coordinator::{Coordinator, CoordinatorService, CoordinatorSettings};
use driftsync::types::now_millis;
use std::fs;
use std::time::Duration;

#[test]
fn deletion_reaches_other_node_and_leaves_no_client_tombstones() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    a.write("dir/gone.txt", "short-lived", secs_ago(100));
    cluster.round();
    assert!(b.path("dir/gone.txt").exists());

    fs::remove_file(a.path("dir/gone.txt")).unwrap();
    let report = a.engine.run_cycle().unwrap();
    assert_eq!(report.tombstones_created, 1);
    assert_eq!(report.deleted_remote, 1);
    assert!(!cluster.coordinator_path("dir/gone.txt").exists());

    let report = b.engine.run_cycle().unwrap();
    assert_eq!(report.deleted_local, 1);
    assert!(!b.path("dir/gone.txt").exists());

    cluster.round();
    assert!(tombstone_files(a.dir.path()).is_empty());
    assert!(tombstone_files(b.dir.path()).is_empty());
    assert_eq!(cluster.round(), 0);
}

#[test]
fn coordinator_tombstone_expires_after_ttl() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    node.write("a.txt", "x", secs_ago(100));
    cluster.round();
    fs::remove_file(node.path("a.txt")).unwrap();
    cluster.round();

    let table = cluster.coordinator.list_file_table().unwrap();
    assert_eq!(table.tombstones.len(), 1);

    let short_lived = CoordinatorService::new(
        cluster.coordinator_dir.path(),
        CoordinatorSettings {
            tombstone_ttl: Duration::from_millis(1),
            ..CoordinatorSettings::default()
        },
    );
    std::thread::sleep(Duration::from_millis(5));
    assert!(short_lived.list_file_table().unwrap().tombstones.is_empty());
    assert!(tombstone_files(cluster.coordinator_dir.path()).is_empty());
}

#[test]
fn edit_after_deletion_revives_the_file() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    a.write("doc.txt", "original", secs_ago(100));
    cluster.round();

    // B deletes, but A's later edit reaches the coordinator first.
    fs::remove_file(b.path("doc.txt")).unwrap();
    let future = (now_millis() / 1000 + 60) * 1000;
    a.write("doc.txt", "edited later", future);
    a.engine.run_cycle().unwrap();

    let report = b.engine.run_cycle().unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(b.read("doc.txt").as_deref(), Some("edited later"));
    assert!(tombstone_files(b.dir.path()).is_empty());
}

#[test]
fn recreated_file_is_uploaded_over_coordinator_tombstone() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    node.write("a.txt", "first life", secs_ago(100));
    cluster.round();
    fs::remove_file(node.path("a.txt")).unwrap();
    cluster.round();
    assert!(!cluster.coordinator_path("a.txt").exists());

    let future = (now_millis() / 1000 + 60) * 1000;
    node.write("a.txt", "second life", future);
    let report = node.engine.run_cycle().unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(
        fs::read_to_string(cluster.coordinator_path("a.txt")).unwrap(),
        "second life"
    );
    assert!(cluster.coordinator.list_file_table().unwrap().tombstones.is_empty());
}

#[test]
fn stale_node_cannot_resurrect_deleted_file() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    a.write("old.txt", "stale", secs_ago(100));
    cluster.round();

    fs::remove_file(a.path("old.txt")).unwrap();
    a.engine.run_cycle().unwrap();

    // B still holds the pre-deletion copy; it loses the copy instead of re-uploading it.
    b.engine.run_cycle().unwrap();
    assert!(!b.path("old.txt").exists());
    assert!(!cluster.coordinator_path("old.txt").exists());
}

/// A deletion noticed late is stamped with its directory's mtime, so an edit
/// made elsewhere after the deletion is kept rather than deleted.
#[cfg(unix)]
#[test]
fn late_noticed_deletion_does_not_override_newer_remote_edit() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    a.write("draft.txt", "first", secs_ago(300));
    cluster.round();

    fs::remove_file(a.path("draft.txt")).unwrap();
    let root = fs::File::open(a.dir.path()).unwrap();
    root.set_modified(driftsync::types::from_millis(secs_ago(200))).unwrap();

    b.write("draft.txt", "edited after the deletion", secs_ago(100));
    assert_eq!(b.engine.run_cycle().unwrap().uploaded, 1);

    let report = a.engine.run_cycle().unwrap();
    assert_eq!(report.tombstones_created, 1);
    assert_eq!(report.deleted_remote, 0);
    assert_eq!(report.downloaded, 1);
    assert_eq!(a.read("draft.txt").as_deref(), Some("edited after the deletion"));
    assert!(tombstone_files(a.dir.path()).is_empty());
}
