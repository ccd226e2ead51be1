//! Live per-directory change watches.
//!
//! Each watched path gets one worker that turns filesystem change events
//! into re-crawl push requests; all workers are coordinated through one
//! process-wide registry so a path is never watched twice and teardown can
//! find everything.

use crate::{delegate::FileDelegate, pusher::DocIdPusher};

use std::{
	collections::HashMap,
	io,
	path::{Path, PathBuf},
	sync::Arc,
};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, trace};

mod watcher;

use watcher::PathWatcher;

#[derive(Error, Debug)]
pub enum WatchError {
	#[error("Watch path is not a directory (path: {0:?})")]
	NotADirectory(PathBuf),
	#[error("Watcher error: (error: {0})")]
	Notify(#[from] notify::Error),
	#[error("Watcher worker exited before signaling startup (path: {0:?})")]
	StartAborted(PathBuf),
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}

/// Process-wide registry of live watches.
///
/// At most one entry exists per distinct path; all registry mutation goes
/// through the one internal lock, held only for the duration of the map
/// operation, never across the start handshake or a join.
pub struct ChangeMonitor {
	delegate: Arc<dyn FileDelegate>,
	pusher: Arc<dyn DocIdPusher>,
	watchers: Mutex<HashMap<PathBuf, PathWatcher>>,
}

impl ChangeMonitor {
	pub fn new(delegate: Arc<dyn FileDelegate>, pusher: Arc<dyn DocIdPusher>) -> Self {
		Self {
			delegate,
			pusher,
			watchers: Mutex::new(HashMap::new()),
		}
	}

	/// Starts watching `path`, blocking until the watch is active.
	///
	/// A second request for an already-watched path is a no-op returning
	/// `Ok`. The registry entry is created *before* the underlying watch is
	/// armed, so concurrent requests for the same path can never race into
	/// two workers; the caller then waits on a one-shot signal the worker
	/// raises exactly once, on successful arming or on fatal startup
	/// failure.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub async fn watch(&self, path: impl AsRef<Path>) -> Result<(), WatchError> {
		let path = path.as_ref().to_path_buf();

		if !self.delegate.is_directory(&path).await? {
			return Err(WatchError::NotADirectory(path));
		}

		let start_rx = {
			let mut watchers = self.watchers.lock().await;
			if watchers.contains_key(&path) {
				trace!("Already watching path");
				return Ok(());
			}

			let (watcher, start_rx) = PathWatcher::spawn(
				path.clone(),
				Arc::clone(&self.delegate),
				Arc::clone(&self.pusher),
			);
			watchers.insert(path.clone(), watcher);
			debug!(watcher_count = watchers.len(), "Registered new path watcher");

			start_rx
		};

		match start_rx.await {
			Ok(Ok(())) => {
				trace!("Watcher is now active");
				Ok(())
			}
			Ok(Err(e)) => {
				self.unregister(&path).await;
				Err(e)
			}
			// The worker dropped the start signal without firing it.
			Err(_) => {
				self.unregister(&path).await;
				Err(WatchError::StartAborted(path))
			}
		}
	}

	/// Stops every watch and clears the registry. Safe with zero active
	/// watches; also called on process teardown.
	pub async fn stop_all(&self) {
		// Drain the map under the lock, so a watch request racing the
		// teardown observes an empty registry and starts fresh instead of
		// keying off an entry that is about to die.
		let drained = std::mem::take(&mut *self.watchers.lock().await);

		let handles = drained
			.into_iter()
			.filter_map(|(path, mut watcher)| {
				debug!(path = %path.display(), "Asking watcher for shutdown");
				watcher.begin_shutdown()
			})
			.collect::<Vec<_>>();

		// A join is never abandoned.
		for handle in handles {
			if let Err(e) = handle.await {
				error!(?e, "Failed to join watcher task;");
			}
		}
		debug!("All path watchers stopped");
	}

	/// The paths currently registered, sorted. Mostly useful to tests and
	/// diagnostics.
	pub async fn watched_paths(&self) -> Vec<PathBuf> {
		let mut paths = self
			.watchers
			.lock()
			.await
			.keys()
			.cloned()
			.collect::<Vec<_>>();
		paths.sort();
		paths
	}

	async fn unregister(&self, path: &Path) {
		let watcher = self.watchers.lock().await.remove(path);
		if let Some(watcher) = watcher {
			watcher.shutdown().await;
		}
	}
}
