//! Test doubles for the collaborator seams: an in-memory file delegate, an
//! accumulating push sink and a scriptable DFS metadata provider.

use crate::{
	acl::AceKind,
	delegate::{lexical_normalize, FileDelegate},
	dfs::{DfsError, DfsInfo, DfsProvider},
	pusher::{DocIdPusher, PushRecord},
};

use std::{
	collections::{HashMap, HashSet},
	io,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

/// In-memory [`FileDelegate`] over a declared set of directories and files.
/// Canonicalization is purely lexical, so Windows-style UNC paths can be
/// exercised on any host.
#[derive(Debug, Default)]
pub struct MockFileDelegate {
	dirs: HashSet<PathBuf>,
	files: HashSet<PathBuf>,
	specials: HashSet<PathBuf>,
}

impl MockFileDelegate {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
		self.dirs.insert(path.as_ref().to_path_buf());
		self
	}

	pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
		self.files.insert(path.as_ref().to_path_buf());
		self
	}

	/// An object that exists but is neither a regular file nor a directory
	/// (a pipe, a device node, ...).
	pub fn with_special(mut self, path: impl AsRef<Path>) -> Self {
		self.specials.insert(path.as_ref().to_path_buf());
		self
	}
}

#[async_trait]
impl FileDelegate for MockFileDelegate {
	async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
		Ok(lexical_normalize(path))
	}

	async fn is_directory(&self, path: &Path) -> io::Result<bool> {
		Ok(self.dirs.contains(&lexical_normalize(path)))
	}

	async fn is_regular_file(&self, path: &Path) -> io::Result<bool> {
		Ok(self.files.contains(&lexical_normalize(path)))
	}

	async fn exists(&self, path: &Path) -> bool {
		let path = lexical_normalize(path);
		self.dirs.contains(&path) || self.files.contains(&path) || self.specials.contains(&path)
	}
}

/// Push sink that records everything it is handed, in arrival order.
#[derive(Debug, Default)]
pub struct AccumulatingPusher {
	records: Mutex<Vec<PushRecord>>,
}

impl AccumulatingPusher {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn records(&self) -> Vec<PushRecord> {
		self.records.lock().await.clone()
	}

	pub async fn take(&self) -> Vec<PushRecord> {
		std::mem::take(&mut *self.records.lock().await)
	}
}

#[async_trait]
impl DocIdPusher for AccumulatingPusher {
	async fn push(&self, record: PushRecord) {
		self.records.lock().await.push(record);
	}
}

/// Scriptable [`DfsProvider`]: paths map to canned info, enumerations,
/// security descriptors or failure status codes.
#[derive(Debug, Default)]
pub struct MockDfsProvider {
	infos: HashMap<PathBuf, DfsInfo>,
	enumerations: HashMap<PathBuf, Vec<PathBuf>>,
	link_descriptors: HashMap<PathBuf, Vec<u8>>,
	file_descriptors: HashMap<PathBuf, Vec<u8>>,
	failures: HashMap<PathBuf, u32>,
}

impl MockDfsProvider {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_info(mut self, path: impl AsRef<Path>, info: DfsInfo) -> Self {
		self.infos.insert(path.as_ref().to_path_buf(), info);
		self
	}

	pub fn with_enumeration(mut self, path: impl AsRef<Path>, entries: Vec<PathBuf>) -> Self {
		self.enumerations.insert(path.as_ref().to_path_buf(), entries);
		self
	}

	pub fn with_link_security_descriptor(
		mut self,
		path: impl AsRef<Path>,
		descriptor: Vec<u8>,
	) -> Self {
		self.link_descriptors
			.insert(path.as_ref().to_path_buf(), descriptor);
		self
	}

	pub fn with_file_security_descriptor(
		mut self,
		path: impl AsRef<Path>,
		descriptor: Vec<u8>,
	) -> Self {
		self.file_descriptors
			.insert(path.as_ref().to_path_buf(), descriptor);
		self
	}

	/// Makes every query against `path` fail with `status`.
	pub fn with_failure(mut self, path: impl AsRef<Path>, status: u32) -> Self {
		self.failures.insert(path.as_ref().to_path_buf(), status);
		self
	}

	fn check_failure(&self, path: &Path) -> Result<(), DfsError> {
		match self.failures.get(path) {
			Some(&status) => Err(DfsError::Api {
				path: path.to_path_buf(),
				status,
			}),
			None => Ok(()),
		}
	}
}

impl DfsProvider for MockDfsProvider {
	fn get_info(&self, path: &Path) -> Result<Option<DfsInfo>, DfsError> {
		self.check_failure(path)?;
		Ok(self.infos.get(path).cloned())
	}

	fn enumerate(&self, namespace: &Path) -> Result<Vec<PathBuf>, DfsError> {
		self.check_failure(namespace)?;
		self.enumerations
			.get(namespace)
			.cloned()
			.ok_or_else(|| DfsError::Api {
				path: namespace.to_path_buf(),
				// NERR_DfsNoSuchVolume
				status: 2662,
			})
	}

	fn link_security_descriptor(&self, link: &Path) -> Result<Option<Vec<u8>>, DfsError> {
		self.check_failure(link)?;
		Ok(self.link_descriptors.get(link).cloned())
	}

	fn file_security_descriptor(&self, path: &Path) -> Result<Vec<u8>, DfsError> {
		self.check_failure(path)?;
		self.file_descriptors
			.get(path)
			.cloned()
			.ok_or_else(|| DfsError::Api {
				path: path.to_path_buf(),
				// ERROR_ACCESS_DENIED
				status: 5,
			})
	}
}

/// A minimal relative security descriptor holding exactly one simple ACE
/// for `S-1-5-18`, useful wherever a test only cares which descriptor was
/// consulted.
pub fn descriptor_with_single_ace(kind: AceKind, mask: u32) -> Vec<u8> {
	const SD_HEADER_LEN: usize = 20;

	let ace_type: u8 = match kind {
		AceKind::AccessAllowed => 0x00,
		AceKind::AccessDenied => 0x01,
	};

	// SID S-1-5-18: revision 1, one sub-authority, NT authority.
	let sid: [u8; 12] = [1, 1, 0, 0, 0, 0, 0, 5, 18, 0, 0, 0];
	let ace_size = (8 + sid.len()) as u16;
	let acl_size = (8 + ace_size as usize) as u16;

	let mut out = vec![0u8; SD_HEADER_LEN];
	out[0] = 1; // revision
	out[16..20].copy_from_slice(&(SD_HEADER_LEN as u32).to_le_bytes());

	// ACL header
	out.push(2); // AclRevision
	out.push(0);
	out.extend_from_slice(&acl_size.to_le_bytes());
	out.extend_from_slice(&1u16.to_le_bytes()); // AceCount
	out.extend_from_slice(&[0, 0]);

	// The ACE
	out.push(ace_type);
	out.push(0); // AceFlags
	out.extend_from_slice(&ace_size.to_le_bytes());
	out.extend_from_slice(&mask.to_le_bytes());
	out.extend_from_slice(&sid);

	out
}
