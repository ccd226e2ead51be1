//! Canonical document identifiers for crawlable filesystem objects.
//!
//! A [`DocId`] is derived 1:1 from the canonical absolute form of a path:
//! separators are normalized to forward slashes, directories carry a
//! trailing slash, and a leading UNC `//` is rewritten to the escaped `\\`
//! form downstream consumers expect.

use crate::delegate::FileDelegate;

use std::{
	fmt, io,
	path::{Path, PathBuf},
};

use thiserror::Error;

/// Windows legacy `MAX_PATH`. Identifiers at or above this length are
/// rejected outright rather than truncated.
pub const MAX_DOC_ID_LEN: usize = 260;

#[derive(Error, Debug)]
pub enum DocIdError {
	#[error("Invalid path (path: {path:?}); (error: {source})")]
	InvalidPath { path: PathBuf, source: io::Error },
	#[error("Document identifier is too long (id: {0:?})")]
	PathTooLong(String),
}

/// Canonical string identifier of a crawlable object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(String);

impl DocId {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Whether this identifier names a directory.
	pub fn is_directory(&self) -> bool {
		self.0.ends_with('/')
	}
}

impl fmt::Display for DocId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for DocId {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Derives the document identifier for `path`.
///
/// The path is resolved to its canonical absolute form first, so two spellings
/// of the same object always produce the same identifier.
pub async fn new_doc_id(
	path: &Path,
	delegate: &dyn FileDelegate,
) -> Result<DocId, DocIdError> {
	let canonical = delegate
		.canonicalize(path)
		.await
		.map_err(|source| DocIdError::InvalidPath {
			path: path.to_path_buf(),
			source,
		})?;

	let mut id = canonical.to_string_lossy().replace('\\', "/");

	let is_directory = delegate
		.is_directory(&canonical)
		.await
		.map_err(|source| DocIdError::InvalidPath {
			path: canonical.clone(),
			source,
		})?;
	if is_directory && !id.ends_with('/') {
		id.push('/');
	}

	// UNC identifiers keep an escaped double-backslash prefix; only the
	// first occurrence is rewritten.
	if id.starts_with("//") {
		id = id.replacen("//", "\\\\", 1);
	}

	if id.len() >= MAX_DOC_ID_LEN {
		return Err(DocIdError::PathTooLong(id));
	}

	Ok(DocId(id))
}
