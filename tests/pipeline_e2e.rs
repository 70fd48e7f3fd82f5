//! End-to-end runs of collect → scan → erase over in-process fakes and the
//! file state backend.

use std::path::Path;

use image_eraser::core::model::{Container, Image, RemovalOutcome, SkipReason};
use image_eraser::events::RecordingEventSink;
use image_eraser::pipeline::{Collector, CollectorOptions, Eraser, EraserOptions, Scanner};
use image_eraser::runtime::fake::FakeRuntime;
use image_eraser::state::{ClusterState, FileStateStore, MemoryStateStore};
use image_eraser::verify::{StaticAnswer, StaticVerifier};

const RUN: &str = "run-e2e";

fn collect_opts(node: &str, dir: &Path) -> CollectorOptions {
    CollectorOptions {
        node: node.to_string(),
        run_id: RUN.to_string(),
        exclusion_path: dir.join("excluded"),
        extra_patterns: Vec::new(),
    }
}

fn erase_opts(node: &str, dir: &Path) -> EraserOptions {
    EraserOptions {
        node: node.to_string(),
        run_id: RUN.to_string(),
        exclusion_path: dir.join("excluded"),
        extra_patterns: Vec::new(),
        image_list: None,
        dry_run: false,
        tag_fallback: true,
    }
}

#[tokio::test]
async fn unused_image_becomes_candidate() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(
        vec![Image::new("sha256:aaa", &["registry.local/app:v1"])],
        Vec::new(),
    );
    let state = MemoryStateStore::new();
    Collector::new(&runtime, &state, None)
        .run(&collect_opts("node-a", tmp.path()))
        .await
        .unwrap();

    let job = state.get(RUN).await.unwrap();
    let set = &job.spec.nodes["node-a"];
    assert_eq!(set.len(), 1);
    assert_eq!(
        set.get("sha256:aaa").unwrap().tags,
        vec!["registry.local/app:v1".to_string()]
    );
}

#[tokio::test]
async fn running_image_is_never_a_candidate() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(
        vec![Image::new("sha256:aaa", &["nginx:1.25"])],
        vec![Container::running("web", "nginx:1.25")],
    );
    let state = MemoryStateStore::new();
    Collector::new(&runtime, &state, None)
        .run(&collect_opts("node-a", tmp.path()))
        .await
        .unwrap();
    assert!(state.get(RUN).await.unwrap().spec.nodes["node-a"].is_empty());
}

#[tokio::test]
async fn wildcard_exclusion_protects_matching_tags() {
    let tmp = tempfile::tempdir().unwrap();
    let excluded = tmp.path().join("excluded");
    std::fs::create_dir_all(&excluded).unwrap();
    std::fs::write(
        excluded.join("base-images"),
        r#"{"excluded": ["docker.io/library/alpine:*"]}"#,
    )
    .unwrap();
    let runtime = FakeRuntime::new(
        vec![
            Image::new("sha256:aaa", &["docker.io/library/alpine:3.18"]),
            Image::new("sha256:bbb", &["docker.io/library/alpine:latest"]),
            Image::new("sha256:ccc", &["docker.io/library/alpine2:3.18"]),
        ],
        Vec::new(),
    );
    let state = MemoryStateStore::new();
    let report = Collector::new(&runtime, &state, None)
        .run(&collect_opts("node-a", tmp.path()))
        .await
        .unwrap();
    assert_eq!(report.excluded, 2);
    let digests: Vec<&str> = report.candidates.digests().collect();
    assert_eq!(digests, vec!["sha256:ccc"]);
}

#[tokio::test]
async fn already_removed_image_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let list = tmp.path().join("images.json");
    std::fs::write(&list, r#"["sha256:deadbeef"]"#).unwrap();
    let runtime = FakeRuntime::new(Vec::new(), Vec::new());
    let state = MemoryStateStore::new();
    let mut opts = erase_opts("node-a", tmp.path());
    opts.image_list = Some(list);

    let out = Eraser::new(&runtime, &state, None).run(&opts).await.unwrap();
    assert_eq!(
        out.report.outcome("sha256:deadbeef"),
        Some(&RemovalOutcome::NotFound)
    );
    assert_eq!(out.report.failed_count(), 0);
}

#[tokio::test]
async fn one_verifier_error_is_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::new(
        vec![
            Image::new("sha256:a1", &["good:1"]),
            Image::new("sha256:b2", &["bad:1"]),
            Image::new("sha256:c3", &["broken:1"]),
        ],
        Vec::new(),
    );
    let state = MemoryStateStore::new();
    Collector::new(&runtime, &state, None)
        .run(&collect_opts("node-a", tmp.path()))
        .await
        .unwrap();

    let verifier = StaticVerifier::new(StaticAnswer::Verified)
        .with("bad:1", StaticAnswer::Vulnerable)
        .with("broken:1", StaticAnswer::Error("timeout".to_string()));
    let report = Scanner::new(&verifier, &state, None)
        .run(RUN)
        .await
        .unwrap();
    assert_eq!(report.scanned(), 3);

    let job = state.get(RUN).await.unwrap();
    assert_eq!(job.status.vulnerable.len(), 1);
    assert_eq!(job.status.vulnerable[0].digest, "sha256:b2");
    assert_eq!(job.status.failed.len(), 1);
    assert_eq!(job.status.failed[0].digest, "sha256:c3");
}

#[tokio::test]
async fn two_nodes_through_file_backend() {
    let tmp = tempfile::tempdir().unwrap();
    let state = FileStateStore::new(tmp.path().join("state"));

    let node_a = FakeRuntime::new(
        vec![
            Image::new("sha256:old", &["app:v1"]),
            Image::new("sha256:cur", &["app:v2"]),
        ],
        vec![Container::running("web", "app:v2")],
    );
    let node_b = FakeRuntime::new(
        vec![
            Image::new("sha256:old", &["app:v1"]),
            Image::new("sha256:cur", &["app:v2"]),
            Image::new("sha256:tool", &["tool:1"]),
        ],
        Vec::new(),
    );

    Collector::new(&node_a, &state, None)
        .run(&collect_opts("node-a", tmp.path()))
        .await
        .unwrap();
    Collector::new(&node_b, &state, None)
        .run(&collect_opts("node-b", tmp.path()))
        .await
        .unwrap();

    let job = state.get(RUN).await.unwrap();
    assert_eq!(job.spec.nodes.len(), 2);
    assert_eq!(job.candidates().len(), 3);

    let verifier = StaticVerifier::new(StaticAnswer::Vulnerable)
        .with("tool:1", StaticAnswer::Verified);
    Scanner::new(&verifier, &state, None).run(RUN).await.unwrap();

    // Between scan and erase a container on node-b starts using app:v1.
    node_b.set_containers(vec![Container::running("late", "app:v1")]);

    let sink = RecordingEventSink::new();
    let out_a = Eraser::new(&node_a, &state, None)
        .with_events(&sink)
        .run(&erase_opts("node-a", tmp.path()))
        .await
        .unwrap();
    let out_b = Eraser::new(&node_b, &state, None)
        .with_events(&sink)
        .run(&erase_opts("node-b", tmp.path()))
        .await
        .unwrap();

    assert_eq!(
        out_a.report.outcome("sha256:old"),
        Some(&RemovalOutcome::Removed {
            handle: "sha256:old".to_string()
        })
    );
    assert!(matches!(
        out_a.report.outcome("sha256:cur"),
        Some(RemovalOutcome::Skipped {
            reason: SkipReason::Running,
            ..
        })
    ));
    assert!(matches!(
        out_b.report.outcome("sha256:old"),
        Some(RemovalOutcome::Skipped {
            reason: SkipReason::Running,
            ..
        })
    ));
    assert_eq!(
        out_b.report.outcome("sha256:cur"),
        Some(&RemovalOutcome::Removed {
            handle: "sha256:cur".to_string()
        })
    );
    assert!(out_b.report.outcome("sha256:tool").is_none());

    assert_eq!(node_a.image_digests(), vec!["sha256:cur".to_string()]);
    assert_eq!(
        node_b.image_digests(),
        vec!["sha256:old".to_string(), "sha256:tool".to_string()]
    );
    assert_eq!(sink.events().len(), 2);

    let job = state.get(RUN).await.unwrap();
    assert_eq!(job.status.removals.len(), 2);
    assert_eq!(job.status.removals["node-a"].removed_count(), 1);
    assert_eq!(job.status.removals["node-b"].removed_count(), 1);
    assert_eq!(job.status.vulnerable.len(), 2);
}

#[tokio::test]
async fn repulled_tag_on_another_node_is_left_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let state = FileStateStore::new(tmp.path().join("state"));

    let node_a = FakeRuntime::new(vec![Image::new("sha256:old", &["app:v1"])], Vec::new());
    // node-b pulled app:v1 after it was re-pushed; same tag, different content.
    let node_b = FakeRuntime::new(vec![Image::new("sha256:new", &["app:v1"])], Vec::new());

    Collector::new(&node_a, &state, None)
        .run(&collect_opts("node-a", tmp.path()))
        .await
        .unwrap();

    let verifier = StaticVerifier::new(StaticAnswer::Vulnerable);
    Scanner::new(&verifier, &state, None).run(RUN).await.unwrap();

    let out_b = Eraser::new(&node_b, &state, None)
        .run(&erase_opts("node-b", tmp.path()))
        .await
        .unwrap();
    assert_eq!(
        out_b.report.outcome("sha256:old"),
        Some(&RemovalOutcome::NotFound)
    );
    assert!(out_b.report.outcome("sha256:new").is_none());
    assert!(node_b.removal_calls().is_empty());
    assert_eq!(node_b.image_digests(), vec!["sha256:new".to_string()]);

    let out_a = Eraser::new(&node_a, &state, None)
        .run(&erase_opts("node-a", tmp.path()))
        .await
        .unwrap();
    assert_eq!(out_a.report.removed_count(), 1);
    assert!(node_a.image_digests().is_empty());
}
