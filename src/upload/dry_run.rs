use anyhow::Result;
use serde_json::Value;

use super::CloudStore;

/// Store used when uploads are disabled: every call succeeds and is only logged.
#[derive(Debug, Default)]
pub struct DryRunStore;

impl CloudStore for DryRunStore {
    fn put_blob(&mut self, path: &str, jpeg: &[u8]) -> Result<()> {
        log::info!("dry run: would store {} ({} bytes)", path, jpeg.len());
        Ok(())
    }

    fn upsert_document(&mut self, collection: &str, doc_id: &str, _body: &Value) -> Result<()> {
        log::info!("dry run: would write document {}/{}", collection, doc_id);
        Ok(())
    }
}
