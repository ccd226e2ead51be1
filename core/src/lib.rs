//! Crawl-support core for filesystem content sources.
//!
//! This crate resolves filesystem objects for a crawl pipeline: it derives
//! stable document identifiers from paths, classifies and resolves DFS
//! (distributed namespace) topology including the namespace-inherited
//! permission fallback, extracts discretionary ACLs straight from raw
//! security-descriptor buffers, and keeps live per-directory watches that
//! turn filesystem change events into re-crawl push requests.
//!
//! The crawl traversal itself, the push sink and the generic attribute
//! provider are collaborators; they are consumed through the [`pusher`] and
//! [`delegate`] traits.

pub mod acl;
pub mod delegate;
pub mod dfs;
pub mod doc_id;
pub mod monitor;
pub mod pusher;
pub mod testing;

pub use acl::{extract_dacl, Ace, AceKind, Acl, AclError, Sid};
pub use delegate::{FileDelegate, StdFileDelegate};
pub use dfs::{DfsError, DfsInfo, DfsProvider, DfsResolver, DfsStatus, DfsStorage};
pub use doc_id::{new_doc_id, DocId, DocIdError};
pub use monitor::{ChangeMonitor, WatchError};
pub use pusher::{DocIdPusher, PushRecord};
