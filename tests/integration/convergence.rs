use crate::support::{mtime, secs_ago, Cluster};

#[test]
fn divergent_nodes_converge_within_two_rounds() {
    let cluster = Cluster::new(2);
    let (a, b) = (cluster.node(0), cluster.node(1));

    for i in 0..5 {
        a.write(&format!("from_a/{i}.txt"), &format!("a content {i}"), secs_ago(100 + i));
        b.write(&format!("from_b/{i}.txt"), &format!("b content {i}"), secs_ago(200 + i));
    }
    a.write("shared.txt", "older edit", secs_ago(50));
    b.write("shared.txt", "newer edit", secs_ago(10));

    cluster.round();
    cluster.round();

    for i in 0..5 {
        let from_a = format!("from_a/{i}.txt");
        let from_b = format!("from_b/{i}.txt");
        assert_eq!(b.read(&from_a).as_deref(), Some(format!("a content {i}").as_str()));
        assert_eq!(a.read(&from_b).as_deref(), Some(format!("b content {i}").as_str()));
    }
    assert_eq!(a.read("shared.txt").as_deref(), Some("newer edit"));
    assert_eq!(b.read("shared.txt").as_deref(), Some("newer edit"));
    assert_eq!(
        std::fs::read_to_string(cluster.coordinator_path("shared.txt")).unwrap(),
        "newer edit"
    );
}

#[test]
fn converged_cluster_transfers_nothing() {
    let cluster = Cluster::new(2);
    cluster.node(0).write("docs/readme.md", "# hello", secs_ago(30));
    cluster.node(1).write("notes.txt", "remember", secs_ago(20));

    cluster.round();
    cluster.round();

    assert_eq!(cluster.round(), 0);
    assert_eq!(cluster.round(), 0);
}

#[test]
fn downloaded_file_keeps_coordinator_mtime() {
    let cluster = Cluster::new(2);
    let stamp = secs_ago(3600);
    cluster.node(0).write("a.bin", "payload", stamp);

    cluster.round();

    assert_eq!(mtime(&cluster.coordinator_path("a.bin")), stamp);
    assert_eq!(mtime(&cluster.node(1).path("a.bin")), stamp);
}

#[test]
fn delta_upload_rewrites_only_changed_content() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    let body: String = (0..200).map(|i| format!("line {i}\n")).collect();
    node.write("big.txt", &body, secs_ago(60));
    cluster.round();

    let edited = body.replace("line 100\n", "line one hundred\n");
    node.write("big.txt", &edited, secs_ago(5));
    let report = node.engine.run_cycle().unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(std::fs::read_to_string(cluster.coordinator_path("big.txt")).unwrap(), edited);
}

#[test]
fn stale_temp_files_are_swept() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    node.write(".orphan.txt.4242.syncing", "half written", secs_ago(7200));
    node.write("real.txt", "content", secs_ago(10));

    node.engine.run_cycle().unwrap();

    assert!(!node.path(".orphan.txt.4242.syncing").exists());
    assert!(!cluster.coordinator_path(".orphan.txt.4242.syncing").exists());
    assert!(cluster.coordinator_path("real.txt").exists());
}
