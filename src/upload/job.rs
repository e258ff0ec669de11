use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::detect::Detection;
use crate::location::Fix;

/// Who the trap reports as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
}

impl DeviceIdentity {
    /// `name` defaults to `TRAPMOS_{id}`.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Result<Self> {
        let id = id.into();
        validate_path_segment("device id", &id)?;
        let name = name.unwrap_or_else(|| format!("TRAPMOS_{}", id));
        validate_path_segment("device name", &name)?;
        Ok(Self { id, name })
    }
}

fn validate_path_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("{} must not be empty", what));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(anyhow!(
            "{} '{}' may only contain ASCII letters, digits, '_' and '-'",
            what,
            value
        ));
    }
    Ok(())
}

/// One report, frozen at the moment it is scheduled.
#[derive(Clone, Debug)]
pub struct UploadJob {
    pub image_jpeg: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub location: Fix,
    pub detections: Vec<Detection>,
    pub detected: bool,
}

impl UploadJob {
    /// Positive evidence. An empty detection list degrades to a heartbeat.
    pub fn detection(
        image_jpeg: Vec<u8>,
        timestamp: DateTime<Utc>,
        location: Fix,
        detections: Vec<Detection>,
    ) -> Self {
        let detected = !detections.is_empty();
        Self {
            image_jpeg,
            timestamp,
            location,
            detections,
            detected,
        }
    }

    /// Proof of life: latest frame and position, no detections.
    pub fn heartbeat(image_jpeg: Vec<u8>, timestamp: DateTime<Utc>, location: Fix) -> Self {
        Self {
            image_jpeg,
            timestamp,
            location,
            detections: Vec::new(),
            detected: false,
        }
    }
}
