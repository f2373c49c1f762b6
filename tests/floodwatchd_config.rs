use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use floodwatch::config::FloodwatchConfig;
use floodwatch::Mode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FLOODWATCH_CONFIG",
        "FLOODWATCH_MODE",
        "FLOODWATCH_CAMERA_URL",
        "FLOODWATCH_CAMERA_FPS",
        "FLOODWATCH_DETECT_URL",
        "FLOODWATCH_API_KEY",
        "FLOODWATCH_STATION_URL",
        "FLOODWATCH_FONT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "mode": "webcam",
        "camera": {
            "url": "http://camera.local:81/stream",
            "target_fps": 15
        },
        "detect": {
            "url": "http://inference.local/flood-watch/2",
            "api_key": "file-key",
            "confidence": 55,
            "overlap": 20
        },
        "station": {
            "url": "http://station.local:8080",
            "snapshot_interval_ms": 250,
            "status_interval_ms": 2000
        },
        "overlay": {
            "font_scale": 22.5
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FLOODWATCH_CONFIG", file.path());
    std::env::set_var("FLOODWATCH_API_KEY", "env-key");
    std::env::set_var("FLOODWATCH_CAMERA_FPS", "5");

    let cfg = FloodwatchConfig::load().expect("load config");

    assert_eq!(cfg.mode, Mode::Webcam);
    assert_eq!(cfg.camera.url, "http://camera.local:81/stream");
    assert_eq!(cfg.camera.target_fps, 5);
    assert_eq!(cfg.detect.url, "http://inference.local/flood-watch/2");
    assert_eq!(cfg.detect.api_key, "env-key");
    assert_eq!(cfg.detect.confidence, 55);
    assert_eq!(cfg.detect.overlap, 20);
    assert_eq!(cfg.station_url, "http://station.local:8080");
    assert_eq!(cfg.poller.snapshot_interval, Duration::from_millis(250));
    assert_eq!(cfg.poller.status_interval, Duration::from_secs(2));
    assert_eq!(cfg.overlay.font_scale, 22.5);

    clear_env();
}

#[test]
fn cctv_mode_needs_no_api_key() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FLOODWATCH_MODE", "cctv");
    let cfg = FloodwatchConfig::load().expect("load config");
    assert_eq!(cfg.mode, Mode::Cctv);
    assert!(cfg.detect.api_key.is_empty());

    clear_env();
}

#[test]
fn webcam_mode_without_api_key_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = FloodwatchConfig::load().expect_err("missing api key");
    assert!(err.to_string().contains("api_key"));

    clear_env();
}

#[test]
fn invalid_mode_value_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FLOODWATCH_MODE", "kiosk");
    assert!(FloodwatchConfig::load().is_err());

    clear_env();
}
