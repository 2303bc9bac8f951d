use crate::support::{secs_ago, Cluster};

#[test]
fn greater_timestamp_survives_on_both_nodes() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    let t1 = secs_ago(300);
    let t3 = secs_ago(200);
    let t2 = secs_ago(100);

    a.write("doc.txt", "v1", t1);
    a.engine.run_cycle().unwrap();
    b.engine.run_cycle().unwrap();
    assert_eq!(b.read("doc.txt").as_deref(), Some("v1"));

    a.write("doc.txt", "v2", t2);
    b.write("doc.txt", "v3", t3);

    // B reaches the coordinator first with the older edit.
    b.engine.run_cycle().unwrap();
    a.engine.run_cycle().unwrap();
    b.engine.run_cycle().unwrap();

    assert_eq!(a.read("doc.txt").as_deref(), Some("v2"));
    assert_eq!(b.read("doc.txt").as_deref(), Some("v2"));
}

#[test]
fn equal_content_is_not_transferred_despite_different_mtimes() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    a.write("same.txt", "identical", secs_ago(100));
    a.engine.run_cycle().unwrap();

    b.write("same.txt", "identical", secs_ago(5));
    let report = b.engine.run_cycle().unwrap();
    assert_eq!(report.changes(), 0);
    assert_eq!(report.skipped, 1);
}

#[test]
fn equal_timestamps_settle_on_one_copy() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));
    let stamp = secs_ago(60);
    a.write("tie.txt", "alpha", stamp);
    b.write("tie.txt", "omega", stamp);

    for _ in 0..3 {
        cluster.round();
    }

    let winner = a.read("tie.txt").unwrap();
    assert_eq!(b.read("tie.txt").unwrap(), winner);
    assert_eq!(cluster.round(), 0);
}
