//! Metadata document bodies in the structured-document wire format, where every
//! field is wrapped in a typed value (`stringValue`, `doubleValue`,
//! `timestampValue`, `arrayValue`, `mapValue`).

use chrono::SecondsFormat;
use serde_json::{json, Value};

use super::job::{DeviceIdentity, UploadJob};
use crate::detect::Detection;

/// Body for the document describing one uploaded image. The detections array is
/// only present for positive reports.
pub fn metadata_document(device: &DeviceIdentity, job: &UploadJob, file_name: &str) -> Value {
    let mut fields = json!({
        "device_id": { "stringValue": device.id },
        "file_name": { "stringValue": file_name },
        "timestamp": {
            "timestampValue": job.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        },
        "latitude": { "doubleValue": job.location.latitude },
        "longitude": { "doubleValue": job.location.longitude },
    });
    if job.detected {
        let values: Vec<Value> = job.detections.iter().map(detection_value).collect();
        fields["detections"] = json!({ "arrayValue": { "values": values } });
    }
    json!({ "fields": fields })
}

fn detection_value(detection: &Detection) -> Value {
    let corners: Vec<Value> = detection
        .bbox
        .as_array()
        .iter()
        .map(|v| json!({ "doubleValue": v }))
        .collect();
    json!({
        "mapValue": {
            "fields": {
                "class": { "stringValue": detection.class },
                "confidence": { "doubleValue": detection.confidence },
                "box": { "arrayValue": { "values": corners } },
            }
        }
    })
}
