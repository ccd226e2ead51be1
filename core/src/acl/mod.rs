//! Discretionary ACL extraction from raw security-descriptor buffers.
//!
//! A full security-descriptor decoder does work and allocations the crawl
//! never needs. [`extract_dacl`] instead overlays the fixed
//! `SECURITY_DESCRIPTOR_RELATIVE` layout on the raw bytes and reads exactly
//! one thing out of it: the discretionary ACL.

use std::fmt;

use thiserror::Error;

mod dacl;

pub use dacl::extract_dacl;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AclError {
	/// The buffer contains an ACE kind this extractor cannot interpret.
	/// Guessing the size of an unknown entry would desynchronize every
	/// offset after it, so this is a hard failure.
	#[error("Unsupported ACE type (type: {0:#04x})")]
	UnsupportedAceType(u8),
	#[error("Security descriptor buffer is truncated (wanted {wanted} bytes at offset {offset}, buffer is {len})")]
	Truncated {
		offset: usize,
		wanted: usize,
		len: usize,
	},
}

/// A security identifier, kept in its structural form.
///
/// Rendering is the standard `S-1-...` notation; translating identifiers
/// into account names is a collaborator's job, never done here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
	revision: u8,
	identifier_authority: u64,
	sub_authorities: Vec<u32>,
}

impl Sid {
	pub fn new(revision: u8, identifier_authority: u64, sub_authorities: Vec<u32>) -> Self {
		Self {
			revision,
			identifier_authority,
			sub_authorities,
		}
	}

	pub fn sub_authorities(&self) -> &[u32] {
		&self.sub_authorities
	}
}

impl fmt::Display for Sid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "S-{}-{}", self.revision, self.identifier_authority)?;
		for sub_authority in &self.sub_authorities {
			write!(f, "-{sub_authority}")?;
		}
		Ok(())
	}
}

/// Whether an entry grants or denies its permission mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AceKind {
	AccessAllowed,
	AccessDenied,
}

/// One access-control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
	pub kind: AceKind,
	/// Inheritance flags, passed through uninterpreted.
	pub flags: u8,
	/// Permission mask, passed through uninterpreted.
	pub mask: u32,
	pub sid: Sid,
}

impl Ace {
	pub fn is_allow(&self) -> bool {
		self.kind == AceKind::AccessAllowed
	}
}

/// An ordered sequence of ACEs. Order is significant to consumers (earlier
/// entries take precedence) and is preserved exactly as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
	entries: Vec<Ace>,
}

impl Acl {
	pub fn entries(&self) -> &[Ace] {
		&self.entries
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Ace> {
		self.entries.iter()
	}
}

impl From<Vec<Ace>> for Acl {
	fn from(entries: Vec<Ace>) -> Self {
		Self { entries }
	}
}

impl IntoIterator for Acl {
	type Item = Ace;
	type IntoIter = std::vec::IntoIter<Ace>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sid_renders_standard_notation() {
		let sid = Sid::new(1, 5, vec![32, 544]);
		assert_eq!(sid.to_string(), "S-1-5-32-544");

		let nt_authority_system = Sid::new(1, 5, vec![18]);
		assert_eq!(nt_authority_system.to_string(), "S-1-5-18");
	}
}
