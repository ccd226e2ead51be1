//! Production [`DfsProvider`] over the Windows netapi, plus the
//! `GetFileSecurity` path used for the namespace ACL fallback.

use super::{DfsError, DfsInfo, DfsProvider, DfsStorage};

use std::{
	os::windows::ffi::OsStrExt,
	path::{Path, PathBuf},
	ptr,
};

use windows_sys::Win32::{
	Foundation::{GetLastError, ERROR_INSUFFICIENT_BUFFER},
	NetworkManagement::NetManagement::NetApiBufferFree,
	Security::{
		GetFileSecurityW, GetSecurityDescriptorLength, DACL_SECURITY_INFORMATION,
		PROTECTED_DACL_SECURITY_INFORMATION, UNPROTECTED_DACL_SECURITY_INFORMATION,
	},
	Storage::DistributedFileSystem::{
		NetDfsEnum, NetDfsGetInfo, DFS_INFO_1, DFS_INFO_150, DFS_INFO_3, DFS_STORAGE_INFO,
	},
};

const NERR_SUCCESS: u32 = 0;

/// Level-3 query: entry state plus the storage target list.
const DFS_INFO_LEVEL_STATE: u32 = 3;
/// Level-150 query: the explicit security descriptor on a link, if any.
const DFS_INFO_LEVEL_SECURITY: u32 = 150;

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsDfsProvider;

impl DfsProvider for WindowsDfsProvider {
	fn get_info(&self, path: &Path) -> Result<Option<DfsInfo>, DfsError> {
		let wide = to_wide(path);
		let mut buf = ptr::null_mut();

		// A failed query simply means the path is not under DFS control.
		let status = unsafe {
			NetDfsGetInfo(
				wide.as_ptr(),
				ptr::null(),
				ptr::null(),
				DFS_INFO_LEVEL_STATE,
				&mut buf,
			)
		};
		if status != NERR_SUCCESS {
			return Ok(None);
		}

		let info = unsafe {
			let raw = &*buf.cast::<DFS_INFO_3>();
			let storages = (0..raw.NumberOfStorages as usize)
				.map(|i| {
					let storage: &DFS_STORAGE_INFO = &*raw.Storage.add(i);
					DfsStorage {
						server: wide_to_string(storage.ServerName),
						share: wide_to_string(storage.ShareName),
						state: storage.State,
					}
				})
				.collect();
			let info = DfsInfo {
				state: raw.State,
				storages,
			};
			NetApiBufferFree(buf.cast());
			info
		};

		Ok(Some(info))
	}

	fn enumerate(&self, namespace: &Path) -> Result<Vec<PathBuf>, DfsError> {
		let wide = to_wide(namespace);
		let mut buf = ptr::null_mut();
		let mut entries_read = 0u32;

		let status = unsafe {
			NetDfsEnum(
				wide.as_ptr(),
				1,
				u32::MAX,
				&mut buf,
				&mut entries_read,
				ptr::null_mut(),
			)
		};
		if status != NERR_SUCCESS {
			return Err(DfsError::Api {
				path: namespace.to_path_buf(),
				status,
			});
		}

		let entries = unsafe {
			let raw = std::slice::from_raw_parts(buf.cast::<DFS_INFO_1>(), entries_read as usize);
			let entries = raw
				.iter()
				.map(|info| PathBuf::from(wide_to_string(info.EntryPath)))
				.collect();
			NetApiBufferFree(buf.cast());
			entries
		};

		Ok(entries)
	}

	fn link_security_descriptor(&self, link: &Path) -> Result<Option<Vec<u8>>, DfsError> {
		let wide = to_wide(link);
		let mut buf = ptr::null_mut();

		let status = unsafe {
			NetDfsGetInfo(
				wide.as_ptr(),
				ptr::null(),
				ptr::null(),
				DFS_INFO_LEVEL_SECURITY,
				&mut buf,
			)
		};
		if status != NERR_SUCCESS {
			return Err(DfsError::Api {
				path: link.to_path_buf(),
				status,
			});
		}

		let descriptor = unsafe {
			let raw = &*buf.cast::<DFS_INFO_150>();
			let descriptor = if raw.pSecurityDescriptor.is_null() {
				None
			} else {
				let len = GetSecurityDescriptorLength(raw.pSecurityDescriptor) as usize;
				Some(
					std::slice::from_raw_parts(raw.pSecurityDescriptor.cast::<u8>(), len).to_vec(),
				)
			};
			NetApiBufferFree(buf.cast());
			descriptor
		};

		Ok(descriptor)
	}

	fn file_security_descriptor(&self, path: &Path) -> Result<Vec<u8>, DfsError> {
		let wide = to_wide(path);
		let requested = DACL_SECURITY_INFORMATION
			| PROTECTED_DACL_SECURITY_INFORMATION
			| UNPROTECTED_DACL_SECURITY_INFORMATION;

		// First call sizes the buffer and is expected to fail with
		// ERROR_INSUFFICIENT_BUFFER.
		let mut needed = 0u32;
		let sized =
			unsafe { GetFileSecurityW(wide.as_ptr(), requested, ptr::null_mut(), 0, &mut needed) };
		let status = unsafe { GetLastError() };
		if sized != 0 || status != ERROR_INSUFFICIENT_BUFFER {
			return Err(DfsError::Api {
				path: path.to_path_buf(),
				status,
			});
		}

		let mut buf = vec![0u8; needed as usize];
		let ok = unsafe {
			GetFileSecurityW(
				wide.as_ptr(),
				requested,
				buf.as_mut_ptr().cast(),
				needed,
				&mut needed,
			)
		};
		if ok == 0 {
			return Err(DfsError::Api {
				path: path.to_path_buf(),
				status: unsafe { GetLastError() },
			});
		}

		Ok(buf)
	}
}

fn to_wide(path: &Path) -> Vec<u16> {
	path.as_os_str().encode_wide().chain(Some(0)).collect()
}

/// Copies a NUL-terminated UTF-16 string out of an api buffer.
unsafe fn wide_to_string(ptr: *const u16) -> String {
	if ptr.is_null() {
		return String::new();
	}
	let mut len = 0;
	while *ptr.add(len) != 0 {
		len += 1;
	}
	String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}
