//! Storage paths and document ids.
//!
//! Detections and heartbeats land under disjoint prefixes so the backend can
//! tell positive evidence from proof-of-life uploads:
//!
//! - `{name}/{id}_{YYYYMMDD_HHMMSS}_{lat}_{lon}_{suffix}.jpg`
//! - `{name}_no_detection/{id}_{YYYYMMDD_HHMMSS}_{lat}_{lon}_{suffix}_no_detected.jpg`
//!
//! Coordinates carry four decimals. The random suffix keeps two jobs from the
//! same second and place apart.

use super::job::{DeviceIdentity, UploadJob};

pub const DETECTED_COLLECTION: &str = "Uploads";
pub const HEARTBEAT_COLLECTION: &str = "images";

/// Where one job goes: the blob path and its metadata document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadTarget {
    pub blob_path: String,
    pub file_name: String,
    pub collection: &'static str,
    pub doc_id: String,
}

impl UploadTarget {
    pub fn for_job(device: &DeviceIdentity, job: &UploadJob, suffix: &str) -> Self {
        let stem = format!(
            "{}_{}_{:.4}_{:.4}_{}",
            device.id,
            job.timestamp.format("%Y%m%d_%H%M%S"),
            job.location.latitude,
            job.location.longitude,
            suffix
        );
        let (prefix, doc_id, collection) = if job.detected {
            (device.name.clone(), stem, DETECTED_COLLECTION)
        } else {
            (
                format!("{}_no_detection", device.name),
                format!("{}_no_detected", stem),
                HEARTBEAT_COLLECTION,
            )
        };
        let file_name = format!("{}.jpg", doc_id);
        Self {
            blob_path: format!("{}/{}", prefix, file_name),
            file_name,
            collection,
            doc_id,
        }
    }
}

/// Twelve lowercase hex characters.
pub fn random_suffix() -> String {
    hex::encode(rand::random::<[u8; 6]>())
}
