use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::document::metadata_document;
use super::job::{DeviceIdentity, UploadJob};
use super::naming::{random_suffix, UploadTarget};
use super::CloudStore;
use crate::display::StatusDisplay;

pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct UploadStats {
    attempted: AtomicU64,
    uploaded: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the worker counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadSnapshot {
    pub scheduled: u64,
    pub attempted: u64,
    pub uploaded: u64,
    pub dropped: u64,
}

/// Unbounded FIFO of upload jobs drained by one worker thread.
///
/// `schedule` never blocks. `wait_for_completion` stops intake and returns
/// once every job scheduled before it has been attempted.
pub struct UploadQueue {
    sender: Option<Sender<UploadJob>>,
    closing: Arc<AtomicBool>,
    stats: Arc<UploadStats>,
    scheduled: AtomicU64,
    join: Option<JoinHandle<()>>,
}

impl UploadQueue {
    pub fn start(
        store: Box<dyn CloudStore>,
        device: DeviceIdentity,
        display: Option<StatusDisplay>,
        idle_poll: Duration,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let closing = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(UploadStats::default());
        let worker = Worker {
            store,
            device,
            display,
            stats: Arc::clone(&stats),
        };
        let worker_closing = Arc::clone(&closing);
        let join = std::thread::Builder::new()
            .name("upload-worker".to_string())
            .spawn(move || worker.run(receiver, &worker_closing, idle_poll))
            .context("spawn upload worker")?;
        Ok(Self {
            sender: Some(sender),
            closing,
            stats,
            scheduled: AtomicU64::new(0),
            join: Some(join),
        })
    }

    /// Enqueue a job. After `wait_for_completion` the job is dropped with a
    /// warning since nothing will ever attempt it.
    pub fn schedule(&self, job: UploadJob) {
        let Some(sender) = self.sender.as_ref() else {
            log::warn!("upload queue already drained; dropping job");
            return;
        };
        match sender.send(job) {
            Ok(()) => {
                self.scheduled.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => log::warn!("upload worker is gone; dropping job"),
        }
    }

    pub fn stats(&self) -> UploadSnapshot {
        UploadSnapshot {
            scheduled: self.scheduled.load(Ordering::SeqCst),
            attempted: self.stats.attempted.load(Ordering::SeqCst),
            uploaded: self.stats.uploaded.load(Ordering::SeqCst),
            dropped: self.stats.dropped.load(Ordering::SeqCst),
        }
    }

    /// Jobs scheduled but not yet attempted.
    pub fn pending(&self) -> u64 {
        let snapshot = self.stats();
        snapshot.scheduled.saturating_sub(snapshot.attempted)
    }

    /// Block until every previously scheduled job has been attempted, then
    /// stop the worker. Calling it again is a no-op.
    pub fn wait_for_completion(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.sender.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("upload worker thread panicked"))?;
            let snapshot = self.stats();
            log::info!(
                "upload queue drained: {} scheduled, {} uploaded, {} dropped",
                snapshot.scheduled,
                snapshot.uploaded,
                snapshot.dropped
            );
        }
        Ok(())
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        if let Err(err) = self.wait_for_completion() {
            log::error!("{}", err);
        }
    }
}

struct Worker {
    store: Box<dyn CloudStore>,
    device: DeviceIdentity,
    display: Option<StatusDisplay>,
    stats: Arc<UploadStats>,
}

impl Worker {
    fn run(mut self, receiver: mpsc::Receiver<UploadJob>, closing: &AtomicBool, idle_poll: Duration) {
        loop {
            match receiver.recv_timeout(idle_poll) {
                Ok(job) => self.handle(job),
                Err(RecvTimeoutError::Timeout) => {
                    if closing.load(Ordering::SeqCst) {
                        while let Ok(job) = receiver.try_recv() {
                            self.handle(job);
                        }
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("upload worker exiting");
    }

    fn handle(&mut self, job: UploadJob) {
        self.stats.attempted.fetch_add(1, Ordering::SeqCst);
        let detections = job.detections.len();
        match self.upload(&job) {
            Ok(target) => {
                self.stats.uploaded.fetch_add(1, Ordering::SeqCst);
                log::info!("uploaded {} ({} detections)", target.blob_path, detections);
                self.notify(if job.detected {
                    format!("Upload OK\n{} mosquitoes", detections)
                } else {
                    "Upload OK\nno detection".to_string()
                });
            }
            Err(err) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                log::warn!("upload failed, dropping job: {:#}", err);
                self.notify("Upload failed\njob dropped".to_string());
            }
        }
    }

    fn upload(&mut self, job: &UploadJob) -> Result<UploadTarget> {
        let target = UploadTarget::for_job(&self.device, job, &random_suffix());
        self.store
            .put_blob(&target.blob_path, &job.image_jpeg)
            .with_context(|| format!("store image {}", target.blob_path))?;
        let body = metadata_document(&self.device, job, &target.file_name);
        self.store
            .upsert_document(target.collection, &target.doc_id, &body)
            .with_context(|| format!("write document {}/{}", target.collection, target.doc_id))?;
        Ok(target)
    }

    fn notify(&self, message: String) {
        if let Some(display) = &self.display {
            display.show_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Fix;
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        blobs: Arc<Mutex<Vec<String>>>,
        docs: Arc<Mutex<Vec<(String, String)>>>,
        fail_blobs: bool,
    }

    impl CloudStore for Recorder {
        fn put_blob(&mut self, path: &str, _jpeg: &[u8]) -> Result<()> {
            if self.fail_blobs {
                return Err(anyhow!("HTTP 403"));
            }
            self.blobs.lock().unwrap().push(path.to_string());
            Ok(())
        }

        fn upsert_document(&mut self, collection: &str, doc_id: &str, _body: &Value) -> Result<()> {
            self.docs
                .lock()
                .unwrap()
                .push((collection.to_string(), doc_id.to_string()));
            Ok(())
        }
    }

    fn device() -> DeviceIdentity {
        DeviceIdentity::new("00000", None).unwrap()
    }

    #[test]
    fn heartbeat_goes_to_heartbeat_collection() {
        let store = Recorder::default();
        let mut queue =
            UploadQueue::start(Box::new(store.clone()), device(), None, DEFAULT_IDLE_POLL).unwrap();
        queue.schedule(UploadJob::heartbeat(vec![0xFF, 0xD8], Utc::now(), Fix::UNKNOWN));
        queue.wait_for_completion().unwrap();

        let docs = store.docs.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "images");
        assert!(docs[0].1.ends_with("_no_detected"));
        assert!(store.blobs.lock().unwrap()[0].starts_with("TRAPMOS_00000_no_detection/"));
    }

    #[test]
    fn failed_blob_skips_document_and_counts_drop() {
        let store = Recorder {
            fail_blobs: true,
            ..Recorder::default()
        };
        let mut queue =
            UploadQueue::start(Box::new(store.clone()), device(), None, DEFAULT_IDLE_POLL).unwrap();
        queue.schedule(UploadJob::heartbeat(vec![], Utc::now(), Fix::UNKNOWN));
        queue.schedule(UploadJob::heartbeat(vec![], Utc::now(), Fix::UNKNOWN));
        queue.wait_for_completion().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.uploaded, 0);
        assert!(store.docs.lock().unwrap().is_empty());
    }

    #[test]
    fn wait_for_completion_is_idempotent() {
        let mut queue =
            UploadQueue::start(Box::new(Recorder::default()), device(), None, DEFAULT_IDLE_POLL)
                .unwrap();
        queue.wait_for_completion().unwrap();
        queue.wait_for_completion().unwrap();
        queue.schedule(UploadJob::heartbeat(vec![], Utc::now(), Fix::UNKNOWN));
        assert_eq!(queue.stats().scheduled, 0);
        assert_eq!(queue.pending(), 0);
    }
}
