//! End-to-end change-monitor tests against the real watcher backend.

use crawlfs_core::{new_doc_id, ChangeMonitor, DocId, StdFileDelegate};
use crawlfs_core::testing::AccumulatingPusher;

use std::{path::Path, sync::Arc, time::Duration};

use tempfile::tempdir;
use tokio::{fs, time::sleep};
use tracing::debug;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn monitor_with_pusher() -> (ChangeMonitor, Arc<AccumulatingPusher>) {
	let pusher = Arc::new(AccumulatingPusher::new());
	(
		ChangeMonitor::new(Arc::new(StdFileDelegate), pusher.clone()),
		pusher,
	)
}

async fn doc_id_of(path: &Path) -> DocId {
	new_doc_id(path, &StdFileDelegate).await.unwrap()
}

/// Polls until `doc_id` shows up among the pushed records.
async fn wait_for_push(pusher: &AccumulatingPusher, doc_id: &DocId) -> bool {
	for _ in 0..50 {
		let records = pusher.records().await;
		if records.iter().any(|record| record.doc_id == *doc_id) {
			return true;
		}
		debug!(?records, "Expected push not seen yet;");
		sleep(Duration::from_millis(100)).await;
	}
	false
}

#[tokio::test]
async fn created_file_pushes_the_watched_directory() {
	init_tracing();
	let root = tempdir().unwrap();
	let (monitor, pusher) = monitor_with_pusher();

	// `watch` returning means the watch is armed, no settling sleep needed.
	monitor.watch(root.path()).await.unwrap();

	fs::write(root.path().join("x.txt"), b"new content")
		.await
		.unwrap();

	let dir_id = doc_id_of(root.path()).await;
	assert!(dir_id.is_directory());
	assert!(
		wait_for_push(&pusher, &dir_id).await,
		"no push for the parent directory arrived"
	);

	monitor.stop_all().await;
}

#[tokio::test]
async fn removed_file_pushes_old_name_and_parent() {
	init_tracing();
	let root = tempdir().unwrap();
	let file = root.path().join("doomed.txt");
	fs::write(&file, b"short-lived").await.unwrap();

	// Resolve identifiers while the file still exists.
	let file_id = doc_id_of(&file).await;
	let dir_id = doc_id_of(root.path()).await;

	let (monitor, pusher) = monitor_with_pusher();
	monitor.watch(root.path()).await.unwrap();

	fs::remove_file(&file).await.unwrap();

	assert!(
		wait_for_push(&pusher, &file_id).await,
		"no push for the removed file arrived"
	);
	assert!(
		wait_for_push(&pusher, &dir_id).await,
		"no push for the parent directory arrived"
	);

	monitor.stop_all().await;
}

#[tokio::test]
async fn second_watch_on_same_path_is_a_no_op() {
	init_tracing();
	let root = tempdir().unwrap();
	let (monitor, _pusher) = monitor_with_pusher();

	monitor.watch(root.path()).await.unwrap();
	monitor.watch(root.path()).await.unwrap();

	assert_eq!(monitor.watched_paths().await.len(), 1);

	monitor.stop_all().await;
	assert!(monitor.watched_paths().await.is_empty());
}

#[tokio::test]
async fn stop_all_then_watch_again_rebuilds_the_entry() {
	init_tracing();
	let root = tempdir().unwrap();
	let (monitor, _pusher) = monitor_with_pusher();

	monitor.watch(root.path()).await.unwrap();
	monitor.stop_all().await;
	assert!(monitor.watched_paths().await.is_empty());

	// Watch state is in-memory only; an explicit new request starts over.
	monitor.watch(root.path()).await.unwrap();
	assert_eq!(monitor.watched_paths().await.len(), 1);

	monitor.stop_all().await;
}

#[tokio::test]
async fn watching_two_directories_runs_independent_workers() {
	init_tracing();
	let root_a = tempdir().unwrap();
	let root_b = tempdir().unwrap();
	let (monitor, pusher) = monitor_with_pusher();

	monitor.watch(root_a.path()).await.unwrap();
	monitor.watch(root_b.path()).await.unwrap();
	assert_eq!(monitor.watched_paths().await.len(), 2);

	fs::write(root_b.path().join("only-b.txt"), b"b").await.unwrap();

	let dir_b_id = doc_id_of(root_b.path()).await;
	assert!(
		wait_for_push(&pusher, &dir_b_id).await,
		"no push from the second watcher arrived"
	);

	monitor.stop_all().await;
	assert!(monitor.watched_paths().await.is_empty());
}
