//! Flood monitoring client.
//!
//! Watches a waterway through a camera, runs marker detection against a
//! remote inference service, and turns which colored depth markers are
//! still visible into a coarse water level reading.
//!
//! Two operating modes share this crate:
//!
//! - **webcam**: own a local HTTP camera, submit frames for inference,
//!   draw detection overlays and a level indicator locally (`capture`)
//! - **cctv**: poll a remote monitoring station that does the analysis
//!   itself, mirroring its frames and status (`poller`)
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration
//! - `level`: water level classification from visible markers
//! - `detect`: inference client and result geometry
//! - `overlay`: detection overlays and the level indicator bar
//! - `ingest`: camera frame sources
//! - `capture`: webcam-mode capture/inference loop
//! - `station`: monitoring station HTTP API
//! - `poller`: cctv-mode feed poller

pub mod capture;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod level;
pub mod overlay;
pub mod poller;
pub mod station;

pub use capture::{CaptureLoop, CaptureState, TickView};
pub use config::{FloodwatchConfig, Mode};
pub use detect::remote::{RemoteDetector, RemoteDetectorConfig};
pub use detect::stub::StubDetector;
pub use detect::{DetectionApi, DetectionResult, Prediction};
pub use ingest::{FrameSource, HttpCameraConfig, HttpCameraSource, StubSource};
pub use level::{classify, Marker};
pub use overlay::{render, render_with_indicator, OverlayStyle};
pub use poller::{FeedPoller, FrameHandle, FrameSink, HandleLedger, PollerConfig, PollerStatus};
pub use station::{HttpStation, RemoteStatus, Snapshot, StationApi};
