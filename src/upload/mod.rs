//! Best-effort reporting to the cloud backend.
//!
//! The orchestrator hands finished window reports to an `UploadQueue`, which
//! never blocks the caller. A single worker thread turns each job into a blob
//! upload followed by a metadata document upsert. Failures are logged and the
//! job is dropped; there is no retry and nothing is persisted locally.

pub mod document;
mod dry_run;
pub mod firebase;
mod job;
pub mod naming;
mod queue;

use anyhow::Result;
use serde_json::Value;

pub use document::metadata_document;
pub use dry_run::DryRunStore;
pub use firebase::{FirebaseConfig, FirebaseStore, TokenSource};
pub use job::{DeviceIdentity, UploadJob};
pub use naming::{random_suffix, UploadTarget, DETECTED_COLLECTION, HEARTBEAT_COLLECTION};
pub use queue::{UploadQueue, UploadSnapshot, DEFAULT_IDLE_POLL};

/// Cloud backend the worker writes to.
pub trait CloudStore: Send {
    /// Store the JPEG bytes at `path`. Only an HTTP 200 counts as success.
    fn put_blob(&mut self, path: &str, jpeg: &[u8]) -> Result<()>;

    /// Create or replace the document `collection/doc_id`.
    fn upsert_document(&mut self, collection: &str, doc_id: &str, body: &Value) -> Result<()>;
}
