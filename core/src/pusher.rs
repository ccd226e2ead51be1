//! Interface to the crawl-queue push sink.

use crate::doc_id::DocId;

use async_trait::async_trait;

/// One re-crawl request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
	pub doc_id: DocId,
	/// Hint that the object should be recrawled ahead of the regular
	/// schedule. Always set by the change monitor.
	pub crawl_immediately: bool,
}

/// Fire-and-forget sink for re-crawl requests; nothing in this crate relies
/// on a result coming back.
#[async_trait]
pub trait DocIdPusher: Send + Sync {
	async fn push(&self, record: PushRecord);
}
