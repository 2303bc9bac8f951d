use crate::support::{secs_ago, Cluster};
use driftsync::error::SyncError;
use std::fs;

#[test]
fn held_lock_fails_one_path_and_lets_the_rest_through() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    node.write("busy.txt", "wait for me", secs_ago(30));
    node.write("free.txt", "go ahead", secs_ago(30));

    // Another process holds the coordinator's lock on busy.txt.
    fs::write(cluster.coordinator_path("busy.txt.locked"), "4242").unwrap();
    let report = node.engine.run_cycle().unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].path.as_str(), "busy.txt");
    assert!(report.failures[0].retryable);
    assert!(cluster.coordinator_path("free.txt").exists());
    assert!(!cluster.coordinator_path("busy.txt").exists());

    fs::remove_file(cluster.coordinator_path("busy.txt.locked")).unwrap();
    let report = node.engine.run_cycle().unwrap();
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed(), 0);
}

#[test]
fn lock_timeout_is_reported_as_retryable_error() {
    let cluster = Cluster::new(1);
    let path = driftsync::RelPath::parse("x.txt").unwrap();
    let _guard = cluster.coordinator.locks().acquire(&path).unwrap();
    match cluster.coordinator.locks().acquire(&path) {
        Err(err @ SyncError::LockTimeout { .. }) => assert!(err.is_retryable()),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("lock acquired twice"),
    };
}

#[test]
fn concurrent_uploads_of_one_path_never_interleave() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    let body_a = "A".repeat(10_000);
    let body_b = "B".repeat(10_000);
    a.write("contested.txt", &body_a, secs_ago(20));
    b.write("contested.txt", &body_b, secs_ago(10));

    std::thread::scope(|s| {
        s.spawn(|| a.engine.run_cycle().unwrap());
        s.spawn(|| b.engine.run_cycle().unwrap());
    });

    let on_coordinator = fs::read_to_string(cluster.coordinator_path("contested.txt")).unwrap();
    assert!(on_coordinator == body_a || on_coordinator == body_b);

    cluster.round();
    cluster.round();
    assert_eq!(a.read("contested.txt").as_deref(), Some(body_b.as_str()));
    assert_eq!(b.read("contested.txt").as_deref(), Some(body_b.as_str()));
}
