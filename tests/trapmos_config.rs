use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use trapmos::config::TrapConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEYS: [&str; 14] = [
    "TRAPMOS_CONFIG",
    "TRAPMOS_DEVICE_ID",
    "TRAPMOS_DEVICE_NAME",
    "TRAPMOS_CAMERA_URL",
    "TRAPMOS_MODEL_PATH",
    "TRAPMOS_WINDOW_SECS",
    "TRAPMOS_TARGET_CLASSES",
    "TRAPMOS_GPS_DEVICE",
    "TRAPMOS_WIFI_ENDPOINT",
    "TRAPMOS_UPLOAD_BUCKET",
    "TRAPMOS_FIRESTORE_PROJECT",
    "TRAPMOS_ACCESS_TOKEN",
    "TRAPMOS_ACCESS_TOKEN_PATH",
    "TRAPMOS_DISPLAY_OUTPUT",
];

fn clear_env() {
    for key in KEYS {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "device": { "id": "00042" },
        "camera": { "url": "stub://bench", "width": 800, "height": 600, "jpeg_quality": 75 },
        "detection": {
            "window_secs": 600,
            "target_classes": ["Aedes aegypti"],
            "min_confidence": 0.6,
            "frame_stride": 2
        },
        "location": { "gps_enabled": false, "wifi_poll_secs": 30 },
        "upload": {
            "enabled": true,
            "bucket": "trap.appspot.com",
            "project_id": "trap-project",
            "access_token": "file-token"
        },
        "display": { "render_interval_ms": 250 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("TRAPMOS_CONFIG", file.path());
    std::env::set_var("TRAPMOS_WINDOW_SECS", "120");
    std::env::set_var("TRAPMOS_TARGET_CLASSES", "Culex quinquefasciatus, Aedes albopictus");
    std::env::set_var("TRAPMOS_DEVICE_NAME", "BENCH_TRAP");

    let cfg = TrapConfig::load().expect("load config");

    let device = cfg.device_identity().unwrap();
    assert_eq!(device.id, "00042");
    assert_eq!(device.name, "BENCH_TRAP");
    assert_eq!(cfg.camera.url, "stub://bench");
    assert_eq!((cfg.camera.width, cfg.camera.height), (800, 600));
    assert_eq!(cfg.camera.jpeg_quality, 75);
    assert_eq!(cfg.detection.window, Duration::from_secs(120));
    assert_eq!(
        cfg.detection.target_classes,
        vec!["Culex quinquefasciatus", "Aedes albopictus"]
    );
    assert_eq!(cfg.detection.min_confidence, 0.6);
    assert_eq!(cfg.detection.frame_stride, 2);
    assert!(!cfg.location.gps_enabled);
    assert_eq!(cfg.location.wifi_poll, Duration::from_secs(30));
    assert_eq!(cfg.display.render_interval, Duration::from_millis(250));

    let firebase = cfg.firebase_config().unwrap().expect("uploads enabled");
    assert_eq!(firebase.bucket, "trap.appspot.com");
    assert_eq!(firebase.token.bearer().unwrap(), "file-token");

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[device]
id = "00007"
name = "TRAPMOS_FIELD"

[camera]
url = "file:///srv/trap/sample.jpg"
inference_width = 320

[detection]
window_secs = 1740
annotate = false
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("TRAPMOS_CONFIG", file.path());

    let cfg = TrapConfig::load().expect("load toml config");
    assert_eq!(cfg.device.id, "00007");
    assert_eq!(cfg.device_identity().unwrap().name, "TRAPMOS_FIELD");
    assert_eq!(cfg.camera.inference_width, 320);
    assert_eq!(cfg.detection.window, Duration::from_secs(29 * 60));
    assert!(!cfg.detection.annotate);

    clear_env();
}

#[test]
fn token_path_overrides_inline_token() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("access_token");
    std::fs::write(&token_path, "rotated-token\n").unwrap();

    std::env::set_var("TRAPMOS_UPLOAD_BUCKET", "bucket");
    std::env::set_var("TRAPMOS_FIRESTORE_PROJECT", "project");
    std::env::set_var("TRAPMOS_ACCESS_TOKEN", "inline-token");
    std::env::set_var("TRAPMOS_ACCESS_TOKEN_PATH", &token_path);

    let mut cfg = TrapConfig::load().expect("load config");
    cfg.upload.enabled = true;
    let firebase = cfg.firebase_config().unwrap().expect("uploads enabled");
    assert_eq!(firebase.token.bearer().unwrap(), "rotated-token");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRAPMOS_WINDOW_SECS", "soon");
    assert!(TrapConfig::load().is_err());
    std::env::set_var("TRAPMOS_WINDOW_SECS", "0");
    assert!(TrapConfig::load().is_err());
    clear_env();

    std::env::set_var("TRAPMOS_DEVICE_ID", "trap/1");
    assert!(TrapConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "upload": { "enabled": true, "bucket": "b" } }"#)
        .expect("write config");
    std::env::set_var("TRAPMOS_CONFIG", file.path());
    let err = TrapConfig::load().unwrap_err();
    assert!(err.to_string().contains("project"));

    clear_env();
}
