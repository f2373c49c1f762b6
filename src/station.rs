//! Remote monitoring station HTTP surface (CCTV mode).
//!
//! The station renders detection server-side and exposes:
//! - `GET /api/snapshot?ts=..`  latest processed JPEG (503 until the first
//!   frame exists)
//! - `GET /api/status`          point-in-time reconciliation document
//! - `POST /api/viewers/heartbeat[?viewer_id=..]` viewer presence
//! - `POST /api/viewers/disconnect?viewer_id=..`  best-effort goodbye
//! - `POST /api/alarm/trigger` / `POST /api/alarm/stop` siren actuator
//!
//! `StationApi` is the seam the poller is written against; tests substitute
//! in-memory implementations.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Point-in-time snapshot of station state. Superseded wholesale on every
/// status poll; optional fields default to neutral values when the station
/// predates them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteStatus {
    #[serde(default)]
    pub water_level: u8,
    #[serde(default)]
    pub detected_labels: Vec<String>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actuator_online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_count: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub viewer_id: String,
    #[serde(default)]
    pub viewer_count: u32,
}

/// One snapshot fetch outcome. `NotReady` (HTTP 503) means the station has
/// not produced a frame yet; the currently displayed frame must be kept.
#[derive(Debug)]
pub enum Snapshot {
    Frame(Vec<u8>),
    NotReady,
}

/// Station operations the poller depends on.
pub trait StationApi: Send + Sync {
    fn fetch_snapshot(&self, cache_bust: u64) -> Result<Snapshot>;

    fn fetch_status(&self) -> Result<RemoteStatus>;

    fn heartbeat(&self, session: Option<&str>) -> Result<HeartbeatReply>;

    /// Fire-and-forget; implementations swallow transport errors.
    fn disconnect(&self, session: &str);

    fn trigger_alarm(&self) -> Result<()>;

    fn stop_alarm(&self) -> Result<()>;
}

/// `ureq`-backed station client.
pub struct HttpStation {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpStation {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            agent: ureq::Agent::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl StationApi for HttpStation {
    fn fetch_snapshot(&self, cache_bust: u64) -> Result<Snapshot> {
        let response = self
            .agent
            .get(&self.endpoint("/api/snapshot"))
            .query("ts", &cache_bust.to_string())
            .call();
        match response {
            Ok(response) => {
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .read_to_end(&mut bytes)
                    .context("read snapshot body")?;
                if bytes.is_empty() {
                    return Err(anyhow!("empty snapshot body"));
                }
                Ok(Snapshot::Frame(bytes))
            }
            Err(ureq::Error::Status(503, _)) => Ok(Snapshot::NotReady),
            Err(e) => Err(anyhow!("snapshot fetch failed: {}", e)),
        }
    }

    fn fetch_status(&self) -> Result<RemoteStatus> {
        let status: RemoteStatus = self
            .agent
            .get(&self.endpoint("/api/status"))
            .call()
            .context("fetch station status")?
            .into_json()
            .context("parse station status")?;
        Ok(status)
    }

    fn heartbeat(&self, session: Option<&str>) -> Result<HeartbeatReply> {
        let mut request = self.agent.post(&self.endpoint("/api/viewers/heartbeat"));
        if let Some(session) = session {
            request = request.query("viewer_id", session);
        }
        let reply: HeartbeatReply = request
            .call()
            .context("send viewer heartbeat")?
            .into_json()
            .context("parse heartbeat reply")?;
        Ok(reply)
    }

    fn disconnect(&self, session: &str) {
        let result = self
            .agent
            .post(&self.endpoint("/api/viewers/disconnect"))
            .query("viewer_id", session)
            .call();
        if let Err(e) = result {
            log::debug!("viewer disconnect ignored: {}", e);
        }
    }

    fn trigger_alarm(&self) -> Result<()> {
        self.agent
            .post(&self.endpoint("/api/alarm/trigger"))
            .call()
            .context("trigger alarm")?;
        Ok(())
    }

    fn stop_alarm(&self) -> Result<()> {
        self.agent
            .post(&self.endpoint("/api/alarm/stop"))
            .call()
            .context("stop alarm")?;
        Ok(())
    }
}
