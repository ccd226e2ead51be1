//! DFS topology classification and resolution.
//!
//! A DFS path is either a namespace root, a link under a namespace pointing
//! at one or more physical `\\server\share` targets, or not DFS at all. The
//! metadata transport lives behind [`DfsProvider`] so the resolver logic is
//! testable off-Windows; the production provider over netapi is in
//! [`windows`].
//!
//! All operations here are synchronous and block the calling crawl thread
//! for the duration of the underlying query.

use crate::acl::{extract_dacl, Acl, AclError};

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::trace;

#[cfg(windows)]
pub mod windows;

/// Root-flavor bits within `DFS_INFO_3.State`; set for namespace roots
/// (standalone or domain-based), clear for links.
pub const DFS_ROOT_FLAVOR_MASK: u32 = 0x0000_0300;

/// `DFS_STORAGE_STATE_ONLINE`.
pub const DFS_STORAGE_STATE_ONLINE: u32 = 0x0000_0002;

#[derive(Error, Debug)]
pub enum DfsError {
	/// Expected and actionable: the link exists but every target is
	/// offline. Callers skip the object and retry on a later crawl pass.
	#[error("The DFS path has no active storage (path: {0:?})")]
	NoActiveStorage(PathBuf),
	#[error("DFS query failed (path: {path:?}); (status: {status})")]
	Api { path: PathBuf, status: u32 },
	#[error("ACL extraction failed (error: {0})")]
	Acl(#[from] AclError),
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// One physical target behind a DFS link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsStorage {
	pub server: String,
	pub share: String,
	pub state: u32,
}

impl DfsStorage {
	pub fn is_online(&self) -> bool {
		self.state == DFS_STORAGE_STATE_ONLINE
	}

	/// The `\\server\share` root this target resolves to.
	pub fn unc_root(&self) -> PathBuf {
		PathBuf::from(format!("\\\\{}\\{}", self.server, self.share))
	}
}

/// DFS metadata for one path, as returned by a level-3 info query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsInfo {
	pub state: u32,
	pub storages: Vec<DfsStorage>,
}

impl DfsInfo {
	pub fn is_root(&self) -> bool {
		self.state & DFS_ROOT_FLAVOR_MASK != 0
	}
}

/// Topology classification of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfsStatus {
	NotDfs,
	Namespace,
	Link(Vec<DfsStorage>),
}

/// Transport for DFS metadata queries.
pub trait DfsProvider: Send + Sync {
	/// Level-3 info for `path`. `Ok(None)` means the query failed, i.e. the
	/// path is not under DFS control.
	fn get_info(&self, path: &Path) -> Result<Option<DfsInfo>, DfsError>;

	/// Raw level-1 enumeration of everything under a namespace, including
	/// the namespace entry itself.
	fn enumerate(&self, namespace: &Path) -> Result<Vec<PathBuf>, DfsError>;

	/// The explicit security descriptor set on a DFS link, if any.
	fn link_security_descriptor(&self, link: &Path) -> Result<Option<Vec<u8>>, DfsError>;

	/// The security descriptor of the local filesystem object at `path`.
	fn file_security_descriptor(&self, path: &Path) -> Result<Vec<u8>, DfsError>;
}

pub struct DfsResolver<P> {
	provider: P,
}

impl<P: DfsProvider> DfsResolver<P> {
	pub fn new(provider: P) -> Self {
		Self { provider }
	}

	/// Whether `path` is a DFS namespace root.
	///
	/// A namespace has zero segments below its share root, but so does an
	/// ordinary share or filesystem root; only the metadata query settles
	/// it. The zero-segment pre-check keeps the frequent non-root calls
	/// from paying for a query at all.
	pub fn is_namespace(&self, path: &Path) -> Result<bool, DfsError> {
		if name_count(path) > 0 {
			return Ok(false);
		}
		Ok(self
			.provider
			.get_info(path)?
			.is_some_and(|info| info.is_root()))
	}

	/// Whether `path` is a DFS link. Anything at the top level of a plain
	/// share looks the same until the metadata query answers.
	pub fn is_link(&self, path: &Path) -> Result<bool, DfsError> {
		Ok(self
			.provider
			.get_info(path)?
			.is_some_and(|info| !info.is_root()))
	}

	pub fn classify(&self, path: &Path) -> Result<DfsStatus, DfsError> {
		Ok(match self.provider.get_info(path)? {
			None => DfsStatus::NotDfs,
			Some(info) if info.is_root() => DfsStatus::Namespace,
			Some(info) => DfsStatus::Link(info.storages),
		})
	}

	/// Resolves a DFS link to the root of its active storage target.
	///
	/// Returns `Ok(None)` when `path` is not a link. The first Online
	/// target wins; a link with every target offline is reported as
	/// [`DfsError::NoActiveStorage`], never silently resolved to a stale
	/// target.
	pub fn resolve_link(&self, path: &Path) -> Result<Option<PathBuf>, DfsError> {
		let Some(info) = self.provider.get_info(path)? else {
			return Ok(None);
		};
		if info.is_root() {
			return Ok(None);
		}

		info.storages
			.iter()
			.find(|storage| storage.is_online())
			.map(|storage| {
				let root = storage.unc_root();
				trace!(link = %path.display(), storage = %root.display(), "Resolved DFS link;");
				Some(root)
			})
			.ok_or_else(|| DfsError::NoActiveStorage(path.to_path_buf()))
	}

	/// Enumerates the links under a namespace.
	///
	/// The raw enumeration includes the namespace entry itself (zero
	/// segments below the root), which is filtered out. Enumerated links
	/// tend to come back with normalized server names (upper-cased, or
	/// FQDN, or both), so every link is re-rooted onto the namespace root
	/// exactly as the caller supplied it.
	pub fn enumerate_links(&self, namespace: &Path) -> Result<Vec<PathBuf>, DfsError> {
		Ok(self
			.provider
			.enumerate(namespace)?
			.into_iter()
			.filter(|link| name_count(link) > 0)
			.map(|link| rebase(namespace, &link))
			.collect())
	}

	/// The share ACL of a DFS link.
	///
	/// An explicit security descriptor on the link wins. Absent one,
	/// permissions are inherited from the local filesystem of the namespace
	/// server, so the fallback reads the DACL of the object backing the
	/// link's parent namespace path.
	pub fn share_acl(&self, link: &Path) -> Result<Option<Acl>, DfsError> {
		let buf = match self.provider.link_security_descriptor(link)? {
			Some(buf) => buf,
			None => {
				let namespace = parent_path(link).unwrap_or_else(|| link.to_path_buf());
				trace!(
					link = %link.display(),
					namespace = %namespace.display(),
					"No explicit DFS link ACL, falling back to namespace filesystem ACL;"
				);
				self.provider.file_security_descriptor(&namespace)?
			}
		};
		Ok(extract_dacl(&buf)?)
	}

	/// The DACL of the local filesystem object backing a namespace path.
	pub fn namespace_acl(&self, namespace: &Path) -> Result<Option<Acl>, DfsError> {
		let buf = self.provider.file_security_descriptor(namespace)?;
		Ok(extract_dacl(&buf)?)
	}
}

/// Textual UNC view of a path, tolerant of both separator styles. DFS
/// metadata comes back with arbitrary casing and separators, so `Path`
/// prefix handling alone is not enough, particularly off-Windows.
struct UncPath {
	server: String,
	share: String,
	segments: Vec<String>,
}

impl UncPath {
	fn parse(text: &str) -> Option<Self> {
		let rest = text
			.strip_prefix("\\\\")
			.or_else(|| text.strip_prefix("//"))?;
		let mut parts = rest.split(['/', '\\']).filter(|part| !part.is_empty());
		let server = parts.next()?.to_string();
		let share = parts.next()?.to_string();
		let segments = parts.map(str::to_string).collect();
		Some(Self {
			server,
			share,
			segments,
		})
	}
}

/// Number of meaningful segments below the share root. Zero for a share or
/// namespace root, positive for links and deeper paths.
pub fn name_count(path: &Path) -> usize {
	if let Some(unc) = UncPath::parse(&path.to_string_lossy()) {
		return unc.segments.len();
	}
	path.components()
		.filter(|component| matches!(component, Component::Normal(_)))
		.count()
}

/// Re-roots `link` onto the caller-supplied `namespace` root, preserving
/// the caller's casing and host form. Non-UNC links are passed through.
fn rebase(namespace: &Path, link: &Path) -> PathBuf {
	let Some(unc) = UncPath::parse(&link.to_string_lossy()) else {
		return link.to_path_buf();
	};

	let namespace_text = namespace.to_string_lossy();
	let root = namespace_text.trim_end_matches(['/', '\\']);
	let separator = if root.contains('/') && !root.contains('\\') {
		'/'
	} else {
		'\\'
	};

	let mut out = root.to_string();
	for segment in &unc.segments {
		out.push(separator);
		out.push_str(segment);
	}
	PathBuf::from(out)
}

/// Parent of a path, UNC-aware: the parent of `\\server\share\link` is
/// `\\server\share`, and a share root has no parent.
fn parent_path(path: &Path) -> Option<PathBuf> {
	let text = path.to_string_lossy();
	let Some(unc) = UncPath::parse(&text) else {
		return path.parent().map(Path::to_path_buf);
	};

	if unc.segments.is_empty() {
		return None;
	}

	let trimmed = text.trim_end_matches(['/', '\\']);
	let cut = trimmed.rfind(['/', '\\'])?;
	Some(PathBuf::from(&trimmed[..cut]))
}
