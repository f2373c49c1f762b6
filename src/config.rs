use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::remote::RemoteDetectorConfig;
use crate::ingest::HttpCameraConfig;
use crate::poller::PollerConfig;

const DEFAULT_CAMERA_URL: &str = "http://127.0.0.1:81/stream";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_DETECT_URL: &str = "http://127.0.0.1:9001/flood-watch/1";
const DEFAULT_STATION_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_CONFIDENCE: u8 = 40;
const DEFAULT_OVERLAP: u8 = 30;
const DEFAULT_FONT_SCALE: f32 = 18.0;

/// How the daemon sources its imagery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Local camera, local inference, local overlay.
    Webcam,
    /// Poll a remote monitoring station for pre-rendered frames and status.
    Cctv,
}

impl Mode {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "webcam" => Ok(Mode::Webcam),
            "cctv" => Ok(Mode::Cctv),
            other => Err(anyhow!("unknown mode '{}'; expected webcam or cctv", other)),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FloodwatchConfigFile {
    mode: Option<String>,
    camera: Option<CameraConfigFile>,
    detect: Option<DetectConfigFile>,
    station: Option<StationConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectConfigFile {
    url: Option<String>,
    api_key: Option<String>,
    confidence: Option<u8>,
    overlap: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct StationConfigFile {
    url: Option<String>,
    snapshot_interval_ms: Option<u64>,
    status_interval_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<String>,
    font_scale: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FloodwatchConfig {
    pub mode: Mode,
    pub camera: HttpCameraConfig,
    pub detect: RemoteDetectorConfig,
    pub station_url: String,
    pub poller: PollerConfig,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone, Default)]
pub struct OverlaySettings {
    /// TTF/OTF file for label text; labels are skipped when absent.
    pub font_path: Option<String>,
    pub font_scale: f32,
}

impl FloodwatchConfig {
    /// Defaults, then the JSON file named by `FLOODWATCH_CONFIG` (if set),
    /// then `FLOODWATCH_*` environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FLOODWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FloodwatchConfigFile) -> Result<Self> {
        let mode = match file.mode.as_deref() {
            Some(raw) => Mode::parse(raw)?,
            None => Mode::Webcam,
        };
        let camera = HttpCameraConfig {
            url: file
                .camera
                .as_ref()
                .and_then(|camera| camera.url.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAMERA_FPS),
        };
        let detect = RemoteDetectorConfig {
            url: file
                .detect
                .as_ref()
                .and_then(|detect| detect.url.clone())
                .unwrap_or_else(|| DEFAULT_DETECT_URL.to_string()),
            api_key: file
                .detect
                .as_ref()
                .and_then(|detect| detect.api_key.clone())
                .unwrap_or_default(),
            confidence: file
                .detect
                .as_ref()
                .and_then(|detect| detect.confidence)
                .unwrap_or(DEFAULT_CONFIDENCE),
            overlap: file
                .detect
                .as_ref()
                .and_then(|detect| detect.overlap)
                .unwrap_or(DEFAULT_OVERLAP),
        };
        let station_url = file
            .station
            .as_ref()
            .and_then(|station| station.url.clone())
            .unwrap_or_else(|| DEFAULT_STATION_URL.to_string());
        let defaults = PollerConfig::default();
        let poller = PollerConfig {
            snapshot_interval: file
                .station
                .as_ref()
                .and_then(|station| station.snapshot_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.snapshot_interval),
            status_interval: file
                .station
                .as_ref()
                .and_then(|station| station.status_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.status_interval),
            heartbeat_interval: file
                .station
                .as_ref()
                .and_then(|station| station.heartbeat_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
        };
        let overlay = OverlaySettings {
            font_path: file.overlay.as_ref().and_then(|ov| ov.font_path.clone()),
            font_scale: file
                .overlay
                .and_then(|ov| ov.font_scale)
                .unwrap_or(DEFAULT_FONT_SCALE),
        };
        Ok(Self {
            mode,
            camera,
            detect,
            station_url,
            poller,
            overlay,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var("FLOODWATCH_MODE") {
            if !mode.trim().is_empty() {
                self.mode = Mode::parse(&mode)?;
            }
        }
        if let Ok(url) = std::env::var("FLOODWATCH_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(fps) = std::env::var("FLOODWATCH_CAMERA_FPS") {
            if !fps.trim().is_empty() {
                self.camera.target_fps = fps
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("FLOODWATCH_CAMERA_FPS must be an integer"))?;
            }
        }
        if let Ok(url) = std::env::var("FLOODWATCH_DETECT_URL") {
            if !url.trim().is_empty() {
                self.detect.url = url;
            }
        }
        if let Ok(key) = std::env::var("FLOODWATCH_API_KEY") {
            if !key.trim().is_empty() {
                self.detect.api_key = key;
            }
        }
        if let Ok(url) = std::env::var("FLOODWATCH_STATION_URL") {
            if !url.trim().is_empty() {
                self.station_url = url;
            }
        }
        if let Ok(path) = std::env::var("FLOODWATCH_FONT_PATH") {
            if !path.trim().is_empty() {
                self.overlay.font_path = Some(path);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        validate_http_url("camera.url", &self.camera.url)?;
        validate_http_url("detect.url", &self.detect.url)?;
        validate_http_url("station.url", &self.station_url)?;
        if self.detect.confidence > 100 {
            return Err(anyhow!("detect.confidence must be 0..=100"));
        }
        if self.detect.overlap > 100 {
            return Err(anyhow!("detect.overlap must be 0..=100"));
        }
        if self.mode == Mode::Webcam && self.detect.api_key.trim().is_empty() {
            return Err(anyhow!(
                "detect.api_key is required in webcam mode (or set FLOODWATCH_API_KEY)"
            ));
        }
        if self.poller.snapshot_interval.is_zero()
            || self.poller.status_interval.is_zero()
            || self.poller.heartbeat_interval.is_zero()
        {
            return Err(anyhow!("station poll intervals must be greater than zero"));
        }
        if !(self.overlay.font_scale.is_finite() && self.overlay.font_scale > 0.0) {
            return Err(anyhow!("overlay.font_scale must be a positive number"));
        }
        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).map_err(|e| anyhow!("invalid {}: {}", field, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("{} must use http(s), got '{}'", field, other)),
    }
}

fn read_config_file(path: &Path) -> Result<FloodwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
