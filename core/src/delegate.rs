//! Plain filesystem access used by the crawl traversal and the change
//! monitor, kept behind a trait so tests can run against an in-memory tree.

use std::{
	io,
	path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
#[cfg(windows)]
use normpath::PathExt;
use tokio::fs;

/// Attribute and canonical-form provider for filesystem objects.
///
/// All classification is no-follow: a symlink to a directory is neither a
/// regular file nor a directory.
#[async_trait]
pub trait FileDelegate: Send + Sync {
	/// Resolves `path` to its canonical absolute form.
	///
	/// Must also succeed for paths that no longer exist, since deleted
	/// objects still need identifiers when their removal is pushed.
	async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

	async fn is_directory(&self, path: &Path) -> io::Result<bool>;

	async fn is_regular_file(&self, path: &Path) -> io::Result<bool>;

	async fn exists(&self, path: &Path) -> bool;
}

/// [`FileDelegate`] over the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileDelegate;

#[async_trait]
impl FileDelegate for StdFileDelegate {
	async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
		match fs::canonicalize(path).await {
			Ok(resolved) => plain_form(resolved),
			Err(e) if e.kind() == io::ErrorKind::NotFound => resolve_missing(path).await,
			Err(e) => Err(e),
		}
	}

	async fn is_directory(&self, path: &Path) -> io::Result<bool> {
		match fs::symlink_metadata(path).await {
			Ok(metadata) => Ok(metadata.is_dir()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn is_regular_file(&self, path: &Path) -> io::Result<bool> {
		match fs::symlink_metadata(path).await {
			Ok(metadata) => Ok(metadata.is_file()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn exists(&self, path: &Path) -> bool {
		fs::symlink_metadata(path).await.is_ok()
	}
}

/// `fs::canonicalize` yields `\\?\`-prefixed verbatim paths on Windows;
/// normalization drops the prefix again unless the path is long enough to
/// require it.
#[cfg(windows)]
fn plain_form(resolved: PathBuf) -> io::Result<PathBuf> {
	Ok(resolved.normalize()?.into_path_buf())
}

#[cfg(not(windows))]
fn plain_form(resolved: PathBuf) -> io::Result<PathBuf> {
	Ok(resolved)
}

/// Canonicalizes a path whose final components do not exist on disk.
///
/// On Windows, `normalize_virtually` computes the absolute non-verbatim form
/// without touching the filesystem, which is exactly what a vanished path
/// needs. Elsewhere the longest existing prefix is resolved and the
/// remainder appended lexically.
async fn resolve_missing(path: &Path) -> io::Result<PathBuf> {
	#[cfg(windows)]
	return Ok(path.normalize_virtually()?.into_path_buf());

	#[cfg(not(windows))]
	{
		resolve_missing_by_prefix(path).await
	}
}

#[cfg(not(windows))]
async fn resolve_missing_by_prefix(path: &Path) -> io::Result<PathBuf> {
	let absolute = if path.is_absolute() {
		lexical_normalize(path)
	} else {
		lexical_normalize(&std::env::current_dir()?.join(path))
	};

	let mut tail = Vec::new();
	let mut head = absolute.as_path();
	let resolved = loop {
		match fs::canonicalize(head).await {
			Ok(resolved) => break resolved,
			Err(e) if e.kind() == io::ErrorKind::NotFound => match (head.parent(), head.file_name()) {
				(Some(parent), Some(name)) => {
					tail.push(name.to_owned());
					head = parent;
				}
				// A root that doesn't exist locally; keep it as written.
				_ => break head.to_path_buf(),
			},
			Err(e) => return Err(e),
		}
	};

	Ok(tail.into_iter().rev().fold(resolved, |acc, segment| acc.join(segment)))
}

/// Resolves `.` and `..` without touching the filesystem.
pub(crate) fn lexical_normalize(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				// Popping at the root is a no-op, `/..` stays `/`.
				out.pop();
			}
			other => out.push(other.as_os_str()),
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;
	use tempfile::tempdir;

	#[tokio::test]
	async fn canonicalize_missing_path_resolves_existing_prefix() {
		let root = tempdir().unwrap();
		let canonical_root = fs::canonicalize(root.path()).await.unwrap();

		let missing = root.path().join("not").join("created").join("x.txt");
		let resolved = StdFileDelegate.canonicalize(&missing).await.unwrap();

		assert_eq!(
			resolved,
			canonical_root.join("not").join("created").join("x.txt")
		);
	}

	#[tokio::test]
	async fn canonicalize_missing_path_normalizes_dot_segments() {
		let root = tempdir().unwrap();
		let canonical_root = fs::canonicalize(root.path()).await.unwrap();

		let twisted = root.path().join("a").join("..").join("b").join(".").join("c");
		let resolved = StdFileDelegate.canonicalize(&twisted).await.unwrap();

		assert_eq!(resolved, canonical_root.join("b").join("c"));
	}

	#[cfg(windows)]
	#[tokio::test]
	async fn canonical_forms_carry_no_verbatim_prefix() {
		let root = tempdir().unwrap();

		let resolved = StdFileDelegate.canonicalize(root.path()).await.unwrap();
		assert!(!resolved.to_string_lossy().starts_with(r"\\?\"));

		let missing = root.path().join("gone").join("x.txt");
		let resolved = StdFileDelegate.canonicalize(&missing).await.unwrap();
		assert!(resolved.is_absolute());
		assert!(!resolved.to_string_lossy().starts_with(r"\\?\"));
		assert!(resolved.ends_with(Path::new("gone").join("x.txt")));
	}

	#[tokio::test]
	async fn classification_is_no_follow_and_missing_is_false() {
		let root = tempdir().unwrap();
		let file = root.path().join("plain.txt");
		fs::write(&file, b"plain").await.unwrap();

		assert!(StdFileDelegate.is_regular_file(&file).await.unwrap());
		assert!(!StdFileDelegate.is_directory(&file).await.unwrap());
		assert!(StdFileDelegate.is_directory(root.path()).await.unwrap());

		let missing = root.path().join("gone");
		assert!(!StdFileDelegate.is_regular_file(&missing).await.unwrap());
		assert!(!StdFileDelegate.is_directory(&missing).await.unwrap());
		assert!(!StdFileDelegate.exists(&missing).await);
	}
}
