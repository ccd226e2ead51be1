//! Fixed-offset walk of `SECURITY_DESCRIPTOR_RELATIVE` and its DACL.
//!
//! Layouts (all integers little-endian):
//!
//! ```text
//! SECURITY_DESCRIPTOR_RELATIVE          ACL header            ACE header
//!  0 u8  Revision                        0 u8  AclRevision     0 u8  AceType
//!  1 u8  Sbz1                            1 u8  Sbz1            1 u8  AceFlags
//!  2 u16 Control                         2 u16 AclSize         2 u16 AceSize
//!  4 u32 OffsetOwner                     4 u16 AceCount
//!  8 u32 OffsetGroup                     6 u16 Sbz2
//! 12 u32 OffsetSacl
//! 16 u32 OffsetDacl
//! ```
//!
//! Every discriminant and offset is validated before it is trusted; nothing
//! is copied out of the buffer except the decoded result.

use super::{Ace, AceKind, Acl, AclError, Sid};

/// `OffsetDacl` field within `SECURITY_DESCRIPTOR_RELATIVE`.
const SD_DACL_OFFSET_FIELD: usize = 16;
const ACL_HEADER_LEN: usize = 8;
/// `AceCount` field within the ACL header.
const ACL_ACE_COUNT_FIELD: usize = 4;
const ACE_HEADER_LEN: usize = 4;

const ACCESS_ALLOWED_ACE_TYPE: u8 = 0x00;
const ACCESS_DENIED_ACE_TYPE: u8 = 0x01;
const ACCESS_ALLOWED_OBJECT_ACE_TYPE: u8 = 0x05;
const ACCESS_DENIED_OBJECT_ACE_TYPE: u8 = 0x06;

/// Object ACEs carry a flags word declaring which of their two GUID fields
/// are actually present before the SID.
const ACE_OBJECT_TYPE_PRESENT: u32 = 0x1;
const ACE_INHERITED_OBJECT_TYPE_PRESENT: u32 = 0x2;
const GUID_LEN: usize = 16;

const SID_MAX_SUB_AUTHORITIES: usize = 15;

/// Extracts the discretionary ACL from a raw relative security descriptor.
///
/// Returns `Ok(None)` when the descriptor carries no DACL (offset zero),
/// which consumers treat as "no restrictions recorded". Entry order is
/// preserved exactly as stored.
pub fn extract_dacl(buf: &[u8]) -> Result<Option<Acl>, AclError> {
	let dacl_offset = read_u32(buf, SD_DACL_OFFSET_FIELD)? as usize;
	if dacl_offset == 0 {
		return Ok(None);
	}

	let ace_count = read_u16(buf, dacl_offset + ACL_ACE_COUNT_FIELD)? as usize;
	let mut entries = Vec::with_capacity(ace_count);

	let mut offset = dacl_offset + ACL_HEADER_LEN;
	for _ in 0..ace_count {
		let (ace, ace_size) = read_ace(buf, offset)?;
		entries.push(ace);
		offset += ace_size;
	}

	Ok(Some(Acl::from(entries)))
}

fn read_ace(buf: &[u8], offset: usize) -> Result<(Ace, usize), AclError> {
	let ace_type = read_u8(buf, offset)?;
	let flags = read_u8(buf, offset + 1)?;
	let ace_size = read_u16(buf, offset + 2)? as usize;
	if ace_size < ACE_HEADER_LEN {
		return Err(AclError::Truncated {
			offset,
			wanted: ACE_HEADER_LEN,
			len: buf.len(),
		});
	}

	let kind = match ace_type {
		ACCESS_ALLOWED_ACE_TYPE | ACCESS_ALLOWED_OBJECT_ACE_TYPE => AceKind::AccessAllowed,
		ACCESS_DENIED_ACE_TYPE | ACCESS_DENIED_OBJECT_ACE_TYPE => AceKind::AccessDenied,
		other => return Err(AclError::UnsupportedAceType(other)),
	};

	let mask = read_u32(buf, offset + ACE_HEADER_LEN)?;

	let is_object_ace = matches!(
		ace_type,
		ACCESS_ALLOWED_OBJECT_ACE_TYPE | ACCESS_DENIED_OBJECT_ACE_TYPE
	);
	let sid_offset = if is_object_ace {
		let object_flags = read_u32(buf, offset + 8)?;
		let mut sid_offset = offset + 12;
		if object_flags & ACE_OBJECT_TYPE_PRESENT != 0 {
			sid_offset += GUID_LEN;
		}
		if object_flags & ACE_INHERITED_OBJECT_TYPE_PRESENT != 0 {
			sid_offset += GUID_LEN;
		}
		sid_offset
	} else {
		offset + 8
	};

	let sid = read_sid(buf, sid_offset)?;

	Ok((
		Ace {
			kind,
			flags,
			mask,
			sid,
		},
		ace_size,
	))
}

/// SID layout: revision u8, sub-authority count u8, 48-bit big-endian
/// identifier authority, then `count` little-endian u32 sub-authorities.
fn read_sid(buf: &[u8], offset: usize) -> Result<Sid, AclError> {
	let revision = read_u8(buf, offset)?;
	let count = read_u8(buf, offset + 1)? as usize;
	if count > SID_MAX_SUB_AUTHORITIES {
		return Err(AclError::Truncated {
			offset,
			wanted: 8 + count * 4,
			len: buf.len(),
		});
	}

	let mut identifier_authority = 0u64;
	for i in 0..6 {
		identifier_authority = (identifier_authority << 8) | u64::from(read_u8(buf, offset + 2 + i)?);
	}

	let mut sub_authorities = Vec::with_capacity(count);
	for i in 0..count {
		sub_authorities.push(read_u32(buf, offset + 8 + i * 4)?);
	}

	Ok(Sid::new(revision, identifier_authority, sub_authorities))
}

fn read_u8(buf: &[u8], offset: usize) -> Result<u8, AclError> {
	buf.get(offset).copied().ok_or(AclError::Truncated {
		offset,
		wanted: 1,
		len: buf.len(),
	})
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, AclError> {
	buf.get(offset..offset + 2)
		.map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
		.ok_or(AclError::Truncated {
			offset,
			wanted: 2,
			len: buf.len(),
		})
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, AclError> {
	buf.get(offset..offset + 4)
		.map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
		.ok_or(AclError::Truncated {
			offset,
			wanted: 4,
			len: buf.len(),
		})
}
