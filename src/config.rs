use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{TargetFilter, DEFAULT_TARGET_CLASSES};
use crate::display::{DisplaySettings, DEFAULT_RENDER_INTERVAL, DEFAULT_STOP_LINGER};
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::CameraConfig;
use crate::location::{gps, wifi};
use crate::upload::{firebase, DeviceIdentity, FirebaseConfig, TokenSource, DEFAULT_IDLE_POLL};
use crate::window::DEFAULT_WINDOW;

const DEFAULT_DEVICE_ID: &str = "00000";
const DEFAULT_CAMERA_URL: &str = "/dev/video0";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_INFERENCE_WIDTH: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_GPS_DEVICE: &str = "/dev/ttyTHS1";
const DEFAULT_PREVIEW_PATH: &str = "preview.jpg";

#[derive(Debug, Deserialize, Default)]
struct TrapConfigFile {
    device: Option<DeviceConfigFile>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    location: Option<LocationConfigFile>,
    upload: Option<UploadConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    inference_width: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    window_secs: Option<u64>,
    target_classes: Option<Vec<String>>,
    min_confidence: Option<f32>,
    frame_stride: Option<u32>,
    sample_interval_ms: Option<u64>,
    model_path: Option<PathBuf>,
    labels: Option<Vec<String>>,
    annotate: Option<bool>,
    dev_preview_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    gps_enabled: Option<bool>,
    gps_device: Option<PathBuf>,
    gps_baud: Option<u32>,
    gps_poll_secs: Option<u64>,
    wifi_enabled: Option<bool>,
    wifi_endpoint: Option<String>,
    wifi_poll_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    enabled: Option<bool>,
    bucket: Option<String>,
    project_id: Option<String>,
    access_token: Option<String>,
    access_token_path: Option<PathBuf>,
    storage_base_url: Option<String>,
    firestore_base_url: Option<String>,
    timeout_secs: Option<u64>,
    idle_poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    render_interval_ms: Option<u64>,
    stop_linger_ms: Option<u64>,
    output_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrapConfig {
    pub device: DeviceSettings,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub location: LocationSettings,
    pub upload: UploadSettings,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub id: String,
    /// `None` means `TRAPMOS_{id}`.
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub inference_width: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub window: Duration,
    pub target_classes: Vec<String>,
    pub min_confidence: f32,
    pub frame_stride: u32,
    pub sample_interval: Duration,
    pub model_path: Option<PathBuf>,
    pub labels: Vec<String>,
    pub annotate: bool,
    pub dev_preview_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub gps_enabled: bool,
    pub gps_device: PathBuf,
    pub gps_baud: u32,
    pub gps_poll: Duration,
    pub wifi_enabled: bool,
    pub wifi_endpoint: String,
    pub wifi_poll: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub enabled: bool,
    pub bucket: Option<String>,
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    pub access_token_path: Option<PathBuf>,
    pub storage_base_url: String,
    pub firestore_base_url: String,
    pub timeout: Duration,
    pub idle_poll: Duration,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub render_interval: Duration,
    pub stop_linger: Duration,
    /// Text file mirrored for an external panel driver; logs only when unset.
    pub output_path: Option<PathBuf>,
}

impl TrapConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRAPMOS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrapConfigFile) -> Self {
        let device = file.device.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let location = file.location.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let display = file.display.unwrap_or_default();

        let default_classes = || DEFAULT_TARGET_CLASSES.iter().map(|c| c.to_string()).collect();
        Self {
            device: DeviceSettings {
                id: device.id.unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
                name: device.name,
            },
            camera: CameraSettings {
                url: camera.url.unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                inference_width: camera.inference_width.unwrap_or(DEFAULT_INFERENCE_WIDTH),
                jpeg_quality: camera.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            detection: DetectionSettings {
                window: detection
                    .window_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_WINDOW),
                target_classes: detection.target_classes.unwrap_or_else(default_classes),
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                frame_stride: detection.frame_stride.unwrap_or(1),
                sample_interval: Duration::from_millis(detection.sample_interval_ms.unwrap_or(0)),
                model_path: detection.model_path,
                labels: detection.labels.unwrap_or_else(default_classes),
                annotate: detection.annotate.unwrap_or(true),
                dev_preview_path: detection
                    .dev_preview_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_PATH)),
            },
            location: LocationSettings {
                gps_enabled: location.gps_enabled.unwrap_or(true),
                gps_device: location
                    .gps_device
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_GPS_DEVICE)),
                gps_baud: location.gps_baud.unwrap_or(gps::DEFAULT_BAUD),
                gps_poll: location
                    .gps_poll_secs
                    .map(Duration::from_secs)
                    .unwrap_or(gps::DEFAULT_POLL_INTERVAL),
                wifi_enabled: location.wifi_enabled.unwrap_or(true),
                wifi_endpoint: location
                    .wifi_endpoint
                    .unwrap_or_else(|| wifi::DEFAULT_ENDPOINT.to_string()),
                wifi_poll: location
                    .wifi_poll_secs
                    .map(Duration::from_secs)
                    .unwrap_or(wifi::DEFAULT_POLL_INTERVAL),
            },
            upload: UploadSettings {
                enabled: upload.enabled.unwrap_or(false),
                bucket: upload.bucket,
                project_id: upload.project_id,
                access_token: upload.access_token,
                access_token_path: upload.access_token_path,
                storage_base_url: upload
                    .storage_base_url
                    .unwrap_or_else(|| firebase::DEFAULT_STORAGE_BASE_URL.to_string()),
                firestore_base_url: upload
                    .firestore_base_url
                    .unwrap_or_else(|| firebase::DEFAULT_FIRESTORE_BASE_URL.to_string()),
                timeout: upload
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(firebase::DEFAULT_TIMEOUT),
                idle_poll: upload
                    .idle_poll_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_IDLE_POLL),
            },
            display: DisplayConfig {
                render_interval: display
                    .render_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_RENDER_INTERVAL),
                stop_linger: display
                    .stop_linger_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_STOP_LINGER),
                output_path: display.output_path,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(id) = env_nonempty("TRAPMOS_DEVICE_ID") {
            self.device.id = id;
        }
        if let Some(name) = env_nonempty("TRAPMOS_DEVICE_NAME") {
            self.device.name = Some(name);
        }
        if let Some(url) = env_nonempty("TRAPMOS_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(path) = env_nonempty("TRAPMOS_MODEL_PATH") {
            self.detection.model_path = Some(PathBuf::from(path));
        }
        if let Some(window) = env_nonempty("TRAPMOS_WINDOW_SECS") {
            let seconds: u64 = window.parse().map_err(|_| {
                anyhow!("TRAPMOS_WINDOW_SECS must be an integer number of seconds")
            })?;
            self.detection.window = Duration::from_secs(seconds);
        }
        if let Ok(classes) = std::env::var("TRAPMOS_TARGET_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detection.target_classes = parsed;
            }
        }
        if let Some(device) = env_nonempty("TRAPMOS_GPS_DEVICE") {
            self.location.gps_device = PathBuf::from(device);
        }
        if let Some(endpoint) = env_nonempty("TRAPMOS_WIFI_ENDPOINT") {
            self.location.wifi_endpoint = endpoint;
        }
        if let Some(bucket) = env_nonempty("TRAPMOS_UPLOAD_BUCKET") {
            self.upload.bucket = Some(bucket);
        }
        if let Some(project) = env_nonempty("TRAPMOS_FIRESTORE_PROJECT") {
            self.upload.project_id = Some(project);
        }
        if let Some(token) = env_nonempty("TRAPMOS_ACCESS_TOKEN") {
            self.upload.access_token = Some(token);
        }
        if let Some(path) = env_nonempty("TRAPMOS_ACCESS_TOKEN_PATH") {
            self.upload.access_token_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_nonempty("TRAPMOS_DISPLAY_OUTPUT") {
            self.display.output_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.device_identity()?;
        if self.detection.window.is_zero() {
            return Err(anyhow!("detection window must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(anyhow!("min_confidence must be within [0, 1]"));
        }
        if self.detection.frame_stride == 0 {
            return Err(anyhow!("frame_stride must be at least 1"));
        }
        if self.detection.target_classes.is_empty() {
            return Err(anyhow!("target class list must not be empty"));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.camera.inference_width == 0 {
            return Err(anyhow!("inference_width must be greater than zero"));
        }
        if self.upload.enabled {
            if self.upload.bucket.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow!("uploads enabled but no storage bucket configured"));
            }
            if self.upload.project_id.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow!("uploads enabled but no document project configured"));
            }
            if self.upload.token_source().is_none() {
                return Err(anyhow!(
                    "uploads enabled but neither access_token nor access_token_path is set"
                ));
            }
        }
        Ok(())
    }

    pub fn device_identity(&self) -> Result<DeviceIdentity> {
        DeviceIdentity::new(self.device.id.clone(), self.device.name.clone())
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            url: self.camera.url.clone(),
            target_fps: self.camera.target_fps,
            width: self.camera.width,
            height: self.camera.height,
        }
    }

    pub fn target_filter(&self) -> TargetFilter {
        TargetFilter::new(
            self.detection.target_classes.clone(),
            self.detection.min_confidence,
        )
    }

    pub fn display_settings(&self) -> DisplaySettings {
        DisplaySettings {
            render_interval: self.display.render_interval,
            stop_linger: self.display.stop_linger,
        }
    }

    /// Cloud client settings, or `None` when uploads are disabled.
    pub fn firebase_config(&self) -> Result<Option<FirebaseConfig>> {
        if !self.upload.enabled {
            return Ok(None);
        }
        let token = self
            .upload
            .token_source()
            .ok_or_else(|| anyhow!("uploads enabled without an access token"))?;
        let bucket = self.upload.bucket.clone().unwrap_or_default();
        let project = self.upload.project_id.clone().unwrap_or_default();
        let mut cfg = FirebaseConfig::new(bucket, project, token);
        cfg.storage_base_url = self.upload.storage_base_url.clone();
        cfg.firestore_base_url = self.upload.firestore_base_url.clone();
        cfg.timeout = self.upload.timeout;
        Ok(Some(cfg))
    }
}

impl UploadSettings {
    /// A token file wins over an inline token so it can be rotated in place.
    pub fn token_source(&self) -> Option<TokenSource> {
        if let Some(path) = &self.access_token_path {
            return Some(TokenSource::File(path.clone()));
        }
        self.access_token
            .as_ref()
            .filter(|token| !token.trim().is_empty())
            .map(|token| TokenSource::Static(token.clone()))
    }
}

fn read_config_file(path: &Path) -> Result<TrapConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TrapConfig::from_file(TrapConfigFile::default());
        cfg.validate().unwrap();
        assert_eq!(cfg.detection.window, Duration::from_secs(29 * 60));
        assert_eq!(cfg.device_identity().unwrap().name, "TRAPMOS_00000");
        assert!(!cfg.upload.enabled);
        assert_eq!(cfg.upload.idle_poll, DEFAULT_IDLE_POLL);
        assert!(cfg.firebase_config().unwrap().is_none());
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
    }

    #[test]
    fn upload_requires_credentials() {
        let mut cfg = TrapConfig::from_file(TrapConfigFile::default());
        cfg.upload.enabled = true;
        cfg.upload.bucket = Some("bucket".into());
        cfg.upload.project_id = Some("project".into());
        assert!(cfg.validate().is_err());
        cfg.upload.access_token = Some("tok".into());
        cfg.validate().unwrap();
        assert!(cfg.firebase_config().unwrap().is_some());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = TrapConfig::from_file(TrapConfigFile::default());
        cfg.detection.min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = TrapConfig::from_file(TrapConfigFile::default());
        cfg.detection.frame_stride = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TrapConfig::from_file(TrapConfigFile::default());
        cfg.camera.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TrapConfig::from_file(TrapConfigFile::default());
        cfg.device.id = "../etc".into();
        assert!(cfg.validate().is_err());
    }
}
