//! HTTPS client for the object store and document database.
//!
//! Blobs go through the storage REST upload endpoint, metadata documents are
//! written with a PATCH on the document path (create-or-replace). Both calls
//! carry a bearer token.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::CloudStore;

pub const DEFAULT_STORAGE_BASE_URL: &str = "https://firebasestorage.googleapis.com";
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the bearer token comes from. A file source is re-read for every
/// request so an external refresher can rotate short-lived tokens in place.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    File(PathBuf),
}

impl TokenSource {
    pub fn bearer(&self) -> Result<String> {
        let token = match self {
            TokenSource::Static(token) => token.trim().to_string(),
            TokenSource::File(path) => std::fs::read_to_string(path)
                .with_context(|| format!("read access token from {}", path.display()))?
                .trim()
                .to_string(),
        };
        if token.is_empty() {
            return Err(anyhow!("access token is empty"));
        }
        Ok(token)
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("TokenSource::Static(<redacted>)"),
            TokenSource::File(path) => write!(f, "TokenSource::File({})", path.display()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FirebaseConfig {
    pub bucket: String,
    pub project_id: String,
    pub token: TokenSource,
    pub storage_base_url: String,
    pub firestore_base_url: String,
    pub timeout: Duration,
}

impl FirebaseConfig {
    pub fn new(bucket: impl Into<String>, project_id: impl Into<String>, token: TokenSource) -> Self {
        Self {
            bucket: bucket.into(),
            project_id: project_id.into(),
            token,
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            firestore_base_url: DEFAULT_FIRESTORE_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Upload URL for an object; the object name is fully percent-encoded so
    /// `/` separators survive as `%2F`.
    pub fn blob_url(&self, path: &str) -> String {
        let name: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
        format!(
            "{}/v0/b/{}/o?name={}",
            self.storage_base_url.trim_end_matches('/'),
            self.bucket,
            name
        )
    }

    pub fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "{}/v1/projects/{}/databases/(default)/documents/{}/{}",
            self.firestore_base_url.trim_end_matches('/'),
            self.project_id,
            collection,
            doc_id
        )
    }
}

pub struct FirebaseStore {
    config: FirebaseConfig,
    agent: ureq::Agent,
}

impl FirebaseStore {
    pub fn new(config: FirebaseConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(anyhow!("storage bucket must not be empty"));
        }
        if config.project_id.trim().is_empty() {
            return Err(anyhow!("document project id must not be empty"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }

    fn authorization(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.config.token.bearer()?))
    }
}

impl CloudStore for FirebaseStore {
    fn put_blob(&mut self, path: &str, jpeg: &[u8]) -> Result<()> {
        let url = self.config.blob_url(path);
        let auth = self.authorization()?;
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &auth)
            .set("Content-Type", "image/jpeg")
            .send_bytes(jpeg);
        match response {
            Ok(resp) if resp.status() == 200 => Ok(()),
            Ok(resp) => Err(anyhow!("blob upload returned HTTP {}", resp.status())),
            Err(err) => Err(describe("blob upload", err)),
        }
    }

    fn upsert_document(&mut self, collection: &str, doc_id: &str, body: &Value) -> Result<()> {
        let url = self.config.document_url(collection, doc_id);
        let auth = self.authorization()?;
        let payload = serde_json::to_string(body).context("serialize document body")?;
        self.agent
            .request("PATCH", &url)
            .set("Authorization", &auth)
            .set("Content-Type", "application/json")
            .send_string(&payload)
            .map_err(|err| describe("document upsert", err))?;
        Ok(())
    }
}

fn describe(what: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            anyhow!("{} rejected with HTTP {}: {}", what, code, body.trim())
        }
        ureq::Error::Transport(transport) => anyhow!("{} failed: {}", what, transport),
    }
}
