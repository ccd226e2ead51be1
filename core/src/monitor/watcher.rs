//! Per-path watch worker: owns the OS watcher, arms it, then loops over a
//! merged stream of change events and the stop signal.

use crate::{
	delegate::FileDelegate,
	doc_id::new_doc_id,
	pusher::{DocIdPusher, PushRecord},
};

use std::{
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use notify::{
	event::{EventKind, ModifyKind, RenameMode},
	Config, Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::{spawn, sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};

use super::WatchError;

/// Registry entry for one watched path. The worker task owns the OS watch
/// handle; this side only keeps what shutdown needs.
#[derive(Debug)]
pub(super) struct PathWatcher {
	stop_tx: chan::Sender<()>,
	handle: Option<JoinHandle<()>>,
}

impl PathWatcher {
	/// Spawns the worker for `path`. The returned receiver fires exactly
	/// once: `Ok` after the underlying watch has been armed, `Err` on any
	/// fatal startup failure.
	pub(super) fn spawn(
		path: PathBuf,
		delegate: Arc<dyn FileDelegate>,
		pusher: Arc<dyn DocIdPusher>,
	) -> (Self, oneshot::Receiver<Result<(), WatchError>>) {
		let (stop_tx, stop_rx) = chan::bounded(1);
		let (start_tx, start_rx) = oneshot::channel();

		let handle = spawn(run(path, stop_rx, start_tx, delegate, pusher));

		(
			Self {
				stop_tx,
				handle: Some(handle),
			},
			start_rx,
		)
	}

	/// Builds an entry around an arbitrary task, so registry lifecycle tests
	/// can control exactly when a worker exits.
	#[cfg(test)]
	pub(super) fn from_parts(stop_tx: chan::Sender<()>, handle: JoinHandle<()>) -> Self {
		Self {
			stop_tx,
			handle: Some(handle),
		}
	}

	/// Raises the stop signal and hands out the join handle, leaving the
	/// join itself to the caller so no registry lock is held across it.
	pub(super) fn begin_shutdown(&mut self) -> Option<JoinHandle<()>> {
		if self.stop_tx.try_send(()).is_err() {
			trace!("Watcher already asked to stop");
		}
		self.handle.take()
	}

	/// Stops the worker and waits for it to exit. The join is never
	/// abandoned; a worker that panicked is logged and considered gone.
	pub(super) async fn shutdown(mut self) {
		if let Some(handle) = self.begin_shutdown() {
			if let Err(e) = handle.await {
				error!(?e, "Failed to join watcher task;");
			}
		}
	}
}

impl Drop for PathWatcher {
	fn drop(&mut self) {
		// Last resort for entries dropped without an explicit shutdown.
		if let Some(handle) = self.begin_shutdown() {
			spawn(async move {
				if let Err(e) = handle.await {
					error!(?e, "Failed to join watcher task;");
				}
			});
		}
	}
}

async fn run(
	path: PathBuf,
	stop_rx: chan::Receiver<()>,
	start_tx: oneshot::Sender<Result<(), WatchError>>,
	delegate: Arc<dyn FileDelegate>,
	pusher: Arc<dyn DocIdPusher>,
) {
	let (events_tx, events_rx) = chan::unbounded();

	let mut watcher = match RecommendedWatcher::new(
		move |result| {
			if !events_tx.is_closed() && events_tx.send_blocking(result).is_err() {
				error!("Tried to send file system event to a closed channel");
			}
		},
		Config::default(),
	) {
		Ok(watcher) => watcher,
		Err(e) => {
			let _ = start_tx.send(Err(e.into()));
			return;
		}
	};

	if let Err(e) = watcher.watch(&path, RecursiveMode::Recursive) {
		let _ = start_tx.send(Err(e.into()));
		return;
	}

	// The watch is armed; from here on the requester may proceed.
	if start_tx.send(Ok(())).is_err() {
		trace!("Watch requester went away before startup completed");
	}
	debug!(path = %path.display(), "Now watching path");

	event_loop(&path, events_rx, stop_rx, &*delegate, &*pusher).await;

	if let Err(e) = watcher.unwatch(&path) {
		trace!(?e, "Unable to unwatch path on shutdown;");
	}
	debug!(path = %path.display(), "Path watcher shut down");
}

/// Waits on change events and the stop signal at once; no timeout, an idle
/// directory legitimately waits forever.
pub(super) async fn event_loop(
	watch_path: &Path,
	events_rx: chan::Receiver<notify::Result<Event>>,
	stop_rx: chan::Receiver<()>,
	delegate: &dyn FileDelegate,
	pusher: &dyn DocIdPusher,
) {
	enum StreamMessage {
		NewEvent(notify::Result<Event>),
		Stop,
	}

	let mut msg_stream = pin!((
		events_rx.map(StreamMessage::NewEvent),
		stop_rx.map(|()| StreamMessage::Stop),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::NewEvent(Ok(event)) => {
				handle_event(watch_path, event, delegate, pusher).await;
			}

			StreamMessage::NewEvent(Err(e)) => error!(?e, "Watcher error;"),

			StreamMessage::Stop => {
				debug!(path = %watch_path.display(), "Stopping path watcher event loop");
				break;
			}
		}
	}
}

async fn handle_event(
	watch_path: &Path,
	event: Event,
	delegate: &dyn FileDelegate,
	pusher: &dyn DocIdPusher,
) {
	trace!(?event, "Received file system event;");

	if event.need_rescan() {
		// The notification buffer overflowed and some changes will never be
		// reported individually. Accepted limitation: record it and keep
		// the watch running.
		warn!(
			path = %watch_path.display(),
			"File system notification buffer overflow, some change notifications may have been lost"
		);
	}

	let Event { kind, paths, .. } = event;
	for (path_index, path) in paths.iter().enumerate() {
		let Some(action) = ChangeAction::classify(&kind, path_index) else {
			continue;
		};
		for target in action.push_targets(path) {
			push_path(&target, delegate, pusher).await;
		}
	}
}

/// What a change record means for the re-crawl queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ChangeAction {
	Modified,
	Added,
	Removed,
	RenamedFrom,
	RenamedTo,
}

impl ChangeAction {
	/// Maps an event kind to a change action for the path at `path_index`
	/// within the event. Events we don't act on (access notifications and
	/// the like) map to `None`.
	pub(super) fn classify(kind: &EventKind, path_index: usize) -> Option<Self> {
		match kind {
			EventKind::Create(_) => (path_index == 0).then_some(Self::Added),
			EventKind::Remove(_) => (path_index == 0).then_some(Self::Removed),
			EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
				(path_index == 0).then_some(Self::RenamedFrom)
			}
			EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
				(path_index == 0).then_some(Self::RenamedTo)
			}
			// A paired rename carries the old path first, the new second.
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match path_index {
				0 => Some(Self::RenamedFrom),
				1 => Some(Self::RenamedTo),
				_ => None,
			},
			// An unqualified rename may name either side; treating it as a
			// removal covers both, since the push consults current state.
			EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => {
				(path_index == 0).then_some(Self::Removed)
			}
			EventKind::Modify(_) | EventKind::Any => (path_index == 0).then_some(Self::Modified),
			EventKind::Access(_) | EventKind::Other => None,
		}
	}

	/// The paths to feed to the crawl queue for this action: a
	/// modification re-crawls the object itself, an addition its parent
	/// listing, a removal both.
	pub(super) fn push_targets(&self, path: &Path) -> Vec<PathBuf> {
		let parent = path
			.parent()
			.filter(|parent| *parent != Path::new(""))
			.map(Path::to_path_buf);

		match self {
			Self::Modified => vec![path.to_path_buf()],
			Self::Added | Self::RenamedTo => parent.into_iter().collect(),
			Self::Removed | Self::RenamedFrom => std::iter::once(path.to_path_buf())
				.chain(parent)
				.collect(),
		}
	}
}

async fn push_path(path: &Path, delegate: &dyn FileDelegate, pusher: &dyn DocIdPusher) {
	let doc_id = match new_doc_id(path, delegate).await {
		Ok(doc_id) => doc_id,
		Err(e) => {
			warn!(path = %path.display(), "Skipping path: {e}");
			return;
		}
	};

	// Deleted, moved or renamed objects are pushed under their old name, so
	// a missing target is still fed.
	let deleted_or_moved = !delegate.exists(path).await;
	let is_plain_object = match (
		delegate.is_regular_file(path).await,
		delegate.is_directory(path).await,
	) {
		(Ok(is_file), Ok(is_dir)) => is_file || is_dir,
		(Err(e), _) | (_, Err(e)) => {
			warn!(path = %path.display(), "Unable to classify path: {e}");
			return;
		}
	};

	if deleted_or_moved || is_plain_object {
		debug!(%doc_id, "Pushing doc id");
		pusher
			.push(PushRecord {
				doc_id,
				crawl_immediately: true,
			})
			.await;
	} else {
		info!(
			path = %path.display(),
			"Skipping path, it is not a regular file or directory"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{AccumulatingPusher, MockFileDelegate};

	use notify::event::{CreateKind, DataChange, Flag, RemoveKind};
	use pretty_assertions::assert_eq;
	use tracing_test::traced_test;

	fn event(kind: EventKind, paths: &[&str]) -> Event {
		paths
			.iter()
			.fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
	}

	/// Runs the event loop over the given synthetic events until the event
	/// channel drains, then returns everything that was pushed.
	async fn run_events(
		delegate: &MockFileDelegate,
		events: Vec<Event>,
	) -> Vec<PushRecord> {
		let pusher = AccumulatingPusher::new();
		let (events_tx, events_rx) = chan::unbounded();
		let (_, stop_rx) = chan::bounded(1);

		for event in events {
			events_tx.send(Ok(event)).await.unwrap();
		}
		// Closing both channels ends the merged stream deterministically.
		drop(events_tx);

		event_loop(Path::new("/watched"), events_rx, stop_rx, delegate, &pusher).await;

		pusher.take().await
	}

	fn doc_ids(records: &[PushRecord]) -> Vec<&str> {
		records.iter().map(|record| record.doc_id.as_str()).collect()
	}

	#[tokio::test]
	async fn added_file_pushes_its_parent_only() {
		let delegate = MockFileDelegate::new()
			.with_dir("/watched")
			.with_file("/watched/x.txt");

		let records = run_events(
			&delegate,
			vec![event(EventKind::Create(CreateKind::File), &["/watched/x.txt"])],
		)
		.await;

		assert_eq!(doc_ids(&records), vec!["/watched/"]);
		assert!(records[0].crawl_immediately);
	}

	#[tokio::test]
	async fn removed_file_pushes_itself_and_its_parent() {
		// The file is already gone from the tree, as it would be on disk.
		let delegate = MockFileDelegate::new().with_dir("/watched");

		let records = run_events(
			&delegate,
			vec![event(EventKind::Remove(RemoveKind::File), &["/watched/x.txt"])],
		)
		.await;

		assert_eq!(doc_ids(&records), vec!["/watched/x.txt", "/watched/"]);
	}

	#[tokio::test]
	async fn modified_file_pushes_itself() {
		let delegate = MockFileDelegate::new()
			.with_dir("/watched")
			.with_file("/watched/x.txt");

		let records = run_events(
			&delegate,
			vec![event(
				EventKind::Modify(ModifyKind::Data(DataChange::Any)),
				&["/watched/x.txt"],
			)],
		)
		.await;

		assert_eq!(doc_ids(&records), vec!["/watched/x.txt"]);
	}

	#[tokio::test]
	async fn paired_rename_pushes_old_name_and_both_parents() {
		let delegate = MockFileDelegate::new()
			.with_dir("/watched")
			.with_file("/watched/new.txt");

		let records = run_events(
			&delegate,
			vec![event(
				EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
				&["/watched/old.txt", "/watched/new.txt"],
			)],
		)
		.await;

		// Old name (gone from disk) plus its parent, then the new name's parent.
		assert_eq!(
			doc_ids(&records),
			vec!["/watched/old.txt", "/watched/", "/watched/"]
		);
	}

	#[tokio::test]
	async fn special_objects_are_skipped() {
		let delegate = MockFileDelegate::new()
			.with_dir("/watched")
			.with_special("/watched/fifo");

		let records = run_events(
			&delegate,
			vec![event(
				EventKind::Modify(ModifyKind::Data(DataChange::Any)),
				&["/watched/fifo"],
			)],
		)
		.await;

		assert_eq!(records, Vec::new());
	}

	#[tokio::test]
	async fn too_long_targets_are_skipped_not_pushed() {
		let long_name = format!("/watched/{}", "a".repeat(300));
		let delegate = MockFileDelegate::new()
			.with_dir("/watched")
			.with_file(&long_name);

		let records = run_events(
			&delegate,
			vec![event(
				EventKind::Modify(ModifyKind::Data(DataChange::Any)),
				&[long_name.as_str()],
			)],
		)
		.await;

		assert_eq!(records, Vec::new());
	}

	#[tokio::test]
	#[traced_test]
	async fn overflow_is_logged_and_non_fatal() {
		let delegate = MockFileDelegate::new()
			.with_dir("/watched")
			.with_file("/watched/x.txt");

		let records = run_events(
			&delegate,
			vec![
				event(EventKind::Other, &[]).set_flag(Flag::Rescan),
				// The loop keeps delivering after the overflow.
				event(
					EventKind::Modify(ModifyKind::Data(DataChange::Any)),
					&["/watched/x.txt"],
				),
			],
		)
		.await;

		assert!(logs_contain("notification buffer overflow"));
		assert_eq!(doc_ids(&records), vec!["/watched/x.txt"]);
	}

	#[tokio::test]
	async fn stop_signal_ends_the_loop() {
		let delegate = MockFileDelegate::new().with_dir("/watched");
		let pusher = AccumulatingPusher::new();
		let (_events_tx, events_rx) = chan::unbounded::<notify::Result<Event>>();
		let (stop_tx, stop_rx) = chan::bounded(1);

		stop_tx.send(()).await.unwrap();
		// Returns instead of waiting forever on the still-open event channel.
		event_loop(Path::new("/watched"), events_rx, stop_rx, &delegate, &pusher).await;
	}

	#[test]
	fn access_events_are_ignored() {
		use notify::event::{AccessKind, AccessMode};

		assert_eq!(
			ChangeAction::classify(&EventKind::Access(AccessKind::Close(AccessMode::Write)), 0),
			None
		);
		assert_eq!(ChangeAction::classify(&EventKind::Other, 0), None);
	}

	#[test]
	fn push_targets_for_root_paths_have_no_parent() {
		assert_eq!(
			ChangeAction::Added.push_targets(Path::new("/")),
			Vec::<PathBuf>::new()
		);
		assert_eq!(
			ChangeAction::Removed.push_targets(Path::new("/")),
			vec![PathBuf::from("/")]
		);
	}
}
