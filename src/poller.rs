//! Remote feed poller (CCTV mode).
//!
//! Three independent periodic activities against the monitoring station:
//! - snapshot fetches (~5/s), strictly chained: each runs on its own
//!   thread and the next fetch starts only after the previous one settled,
//!   so at most one snapshot request is ever outstanding
//! - status polls (1/s), replacing the reconciled local state wholesale
//! - viewer-presence heartbeats (5 s), reusing the server-assigned session
//!
//! The fetched snapshot bytes live in a `FrameHandle` that must be
//! explicitly released: exactly one handle is live (bound to the sink) at
//! any time, the previous one is released before the replacement is bound,
//! and shutdown releases the final handle. Skipping a release would grow
//! memory without bound over a long-running session, so the `HandleLedger`
//! keeps release accounting observable.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::station::{Snapshot, StationApi};

/// User-facing message while the station has not produced a frame yet.
pub const WAITING_MESSAGE: &str = "Waiting for camera feed...";
/// User-facing message when the station cannot be reached at all.
pub const OFFLINE_MESSAGE: &str = "Cannot reach monitoring station";

const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Polling cadences; tests shrink these to milliseconds.
#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub snapshot_interval: Duration,
    pub status_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

// ----------------------------------------------------------------------------
// FrameHandle: release-before-replace resource discipline
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LedgerCounters {
    live: AtomicUsize,
    released: AtomicUsize,
    leaked: AtomicUsize,
}

/// Shared accounting for frame handles created by one poller instance.
#[derive(Clone, Default)]
pub struct HandleLedger {
    counters: Arc<LedgerCounters>,
}

impl HandleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::Acquire)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::Acquire)
    }

    /// Handles dropped without an explicit release. Always zero in a
    /// correctly behaving poller.
    pub fn leaked(&self) -> usize {
        self.counters.leaked.load(Ordering::Acquire)
    }
}

/// Owns one fetched frame's bytes. Consumed by `release`; a drop without
/// release is counted as a leak and logged.
pub struct FrameHandle {
    bytes: Vec<u8>,
    counters: Arc<LedgerCounters>,
    released: bool,
}

impl FrameHandle {
    pub fn new(bytes: Vec<u8>, ledger: &HandleLedger) -> Self {
        ledger.counters.live.fetch_add(1, Ordering::AcqRel);
        Self {
            bytes,
            counters: Arc::clone(&ledger.counters),
            released: false,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Release the frame's memory. Consuming `self` makes a double release
    /// unrepresentable.
    pub fn release(mut self) {
        self.released = true;
        self.bytes = Vec::new();
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
        self.counters.released.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("frame handle dropped without release ({} bytes)", self.bytes.len());
            self.counters.live.fetch_sub(1, Ordering::AcqRel);
            self.counters.leaked.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Display surface the live frame is bound to. The daemon writes to a
/// file; tests record.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &FrameHandle) -> Result<()>;
}

/// Sink that discards frames (status-only deployments).
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &FrameHandle) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Reconciled state
// ----------------------------------------------------------------------------

/// Local view of the station, replaced by status polls and annotated by
/// snapshot failures. Optional station fields reconcile to neutral values.
#[derive(Clone, Debug, Default)]
pub struct PollerStatus {
    pub connected: bool,
    /// Transient not-ready: station up, no frame yet.
    pub waiting: bool,
    pub message: Option<String>,
    pub water_level: u8,
    pub detected_labels: Vec<String>,
    pub alarm_active: bool,
    pub actuator_online: bool,
    pub viewer_count: u32,
}

type SharedStatus = Arc<Mutex<PollerStatus>>;

fn lock_status(status: &SharedStatus) -> std::sync::MutexGuard<'_, PollerStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Single-iteration activity bodies (threads call these on cadence)
// ----------------------------------------------------------------------------

/// Snapshot activity: owns the sink and the single live handle.
pub struct SnapshotActivity {
    station: Arc<dyn StationApi>,
    sink: Box<dyn FrameSink>,
    ledger: HandleLedger,
    live: Option<FrameHandle>,
    status: SharedStatus,
}

impl SnapshotActivity {
    pub fn new(
        station: Arc<dyn StationApi>,
        sink: Box<dyn FrameSink>,
        ledger: HandleLedger,
        status: SharedStatus,
    ) -> Self {
        Self {
            station,
            sink,
            ledger,
            live: None,
            status,
        }
    }

    /// One fully settled fetch. Success binds a fresh handle and releases
    /// the previous one; not-ready and failures leave the displayed frame
    /// untouched.
    pub fn poll_once(&mut self) {
        match self.station.fetch_snapshot(cache_bust()) {
            Ok(Snapshot::Frame(bytes)) => {
                let handle = FrameHandle::new(bytes, &self.ledger);
                // Release before replace; the sink never sees two live
                // handles from one poller.
                if let Some(previous) = self.live.take() {
                    previous.release();
                }
                if let Err(e) = self.sink.present(&handle) {
                    log::warn!("sink rejected frame: {}", e);
                }
                self.live = Some(handle);
                let mut status = lock_status(&self.status);
                status.waiting = false;
                status.message = None;
            }
            Ok(Snapshot::NotReady) => {
                let mut status = lock_status(&self.status);
                status.connected = false;
                status.waiting = true;
                status.message = Some(WAITING_MESSAGE.to_string());
            }
            Err(e) => {
                log::debug!("snapshot fetch failed: {}", e);
                let mut status = lock_status(&self.status);
                status.connected = false;
                status.waiting = false;
                status.message = Some(OFFLINE_MESSAGE.to_string());
            }
        }
    }

    /// Release the live handle, exactly once, on teardown.
    pub fn finish(&mut self) {
        if let Some(handle) = self.live.take() {
            handle.release();
        }
    }
}

/// Status activity: replaces reconciled state wholesale.
pub struct StatusActivity {
    station: Arc<dyn StationApi>,
    status: SharedStatus,
}

impl StatusActivity {
    pub fn new(station: Arc<dyn StationApi>, status: SharedStatus) -> Self {
        Self { station, status }
    }

    pub fn poll_once(&mut self) {
        match self.station.fetch_status() {
            Ok(remote) => {
                let mut status = lock_status(&self.status);
                let waiting = status.waiting;
                let message = status.message.clone();
                *status = PollerStatus {
                    connected: remote.connected,
                    waiting,
                    message,
                    water_level: remote.water_level,
                    detected_labels: remote.detected_labels,
                    alarm_active: remote.alarm_active.unwrap_or(false),
                    actuator_online: remote.actuator_online.unwrap_or(false),
                    viewer_count: remote.viewer_count.unwrap_or(0),
                };
            }
            Err(e) => {
                log::debug!("status fetch failed: {}", e);
                let mut status = lock_status(&self.status);
                status.connected = false;
            }
        }
    }
}

/// Presence activity: heartbeat with session reuse, disconnect at most once.
pub struct PresenceActivity {
    station: Arc<dyn StationApi>,
    session: Arc<Mutex<Option<String>>>,
    status: SharedStatus,
}

impl PresenceActivity {
    pub fn new(
        station: Arc<dyn StationApi>,
        session: Arc<Mutex<Option<String>>>,
        status: SharedStatus,
    ) -> Self {
        Self {
            station,
            session,
            status,
        }
    }

    pub fn heartbeat_once(&mut self) {
        let current = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match self.station.heartbeat(current.as_deref()) {
            Ok(reply) => {
                *self
                    .session
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(reply.viewer_id);
                lock_status(&self.status).viewer_count = reply.viewer_count;
            }
            Err(e) => {
                log::debug!("heartbeat failed: {}", e);
            }
        }
    }

    /// Best-effort goodbye. Taking the session id out makes a second call
    /// from another exit path a no-op.
    pub fn disconnect_once(&mut self) {
        let taken = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(session) = taken {
            self.station.disconnect(&session);
        }
    }
}

// ----------------------------------------------------------------------------
// FeedPoller: thread orchestration
// ----------------------------------------------------------------------------

pub struct FeedPoller {
    station: Arc<dyn StationApi>,
    config: PollerConfig,
    status: SharedStatus,
    session: Arc<Mutex<Option<String>>>,
    ledger: HandleLedger,
    stop: Arc<AtomicBool>,
    toggle_in_flight: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    presence: Option<Arc<Mutex<PresenceActivity>>>,
}

impl FeedPoller {
    pub fn new(station: Arc<dyn StationApi>, config: PollerConfig) -> Self {
        Self {
            station,
            config,
            status: Arc::new(Mutex::new(PollerStatus::default())),
            session: Arc::new(Mutex::new(None)),
            ledger: HandleLedger::new(),
            stop: Arc::new(AtomicBool::new(false)),
            toggle_in_flight: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
            presence: None,
        }
    }

    /// Spawn the three activities. The sink moves into the snapshot thread.
    pub fn start(&mut self, sink: Box<dyn FrameSink>) -> Result<()> {
        if !self.threads.is_empty() {
            return Err(anyhow!("poller already started"));
        }
        self.stop.store(false, Ordering::Release);

        let mut snapshot = SnapshotActivity::new(
            Arc::clone(&self.station),
            sink,
            self.ledger.clone(),
            Arc::clone(&self.status),
        );
        let stop = Arc::clone(&self.stop);
        let interval = self.config.snapshot_interval;
        self.threads.push(std::thread::spawn(move || {
            // Fetches are chained: poll_once settles before the next sleep,
            // so overlap is impossible by construction.
            while !stop.load(Ordering::Acquire) {
                let started = Instant::now();
                snapshot.poll_once();
                sleep_remainder(interval, started, &stop);
            }
            snapshot.finish();
        }));

        let mut status_activity =
            StatusActivity::new(Arc::clone(&self.station), Arc::clone(&self.status));
        let stop = Arc::clone(&self.stop);
        let interval = self.config.status_interval;
        self.threads.push(std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                let started = Instant::now();
                status_activity.poll_once();
                sleep_remainder(interval, started, &stop);
            }
        }));

        let presence = Arc::new(Mutex::new(PresenceActivity::new(
            Arc::clone(&self.station),
            Arc::clone(&self.session),
            Arc::clone(&self.status),
        )));
        self.presence = Some(Arc::clone(&presence));
        let stop = Arc::clone(&self.stop);
        let interval = self.config.heartbeat_interval;
        self.threads.push(std::thread::spawn(move || {
            loop {
                presence
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .heartbeat_once();
                if sleep_remainder(interval, Instant::now(), &stop) {
                    break;
                }
            }
            presence
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .disconnect_once();
        }));

        Ok(())
    }

    /// Current reconciled view of the station.
    pub fn status(&self) -> PollerStatus {
        lock_status(&self.status).clone()
    }

    pub fn ledger(&self) -> &HandleLedger {
        &self.ledger
    }

    pub fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Manually drive the siren. Serialized against itself; completion
    /// includes a forced status re-fetch so the displayed alarm state is
    /// the actuator's confirmed one, not an optimistic local guess.
    pub fn set_alarm(&self, on: bool) -> Result<()> {
        if self.toggle_in_flight.swap(true, Ordering::AcqRel) {
            return Err(anyhow!("alarm toggle already in progress"));
        }
        let outcome = if on {
            self.station.trigger_alarm()
        } else {
            self.station.stop_alarm()
        };
        let refreshed = outcome.and_then(|()| {
            let remote = self.station.fetch_status()?;
            let mut status = lock_status(&self.status);
            status.connected = remote.connected;
            status.alarm_active = remote.alarm_active.unwrap_or(false);
            status.actuator_online = remote.actuator_online.unwrap_or(false);
            Ok(())
        });
        self.toggle_in_flight.store(false, Ordering::Release);
        refreshed
    }

    /// Stop all activities, join threads, release the live handle, and
    /// send the at-most-once disconnect. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        // Cover exit paths that bypass the presence thread's own goodbye.
        if let Some(presence) = self.presence.take() {
            presence
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .disconnect_once();
        }
    }
}

impl Drop for FeedPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep out the rest of a cadence interval in small slices so a stop
/// request is honored promptly. Returns true when stopping.
fn sleep_remainder(interval: Duration, started: Instant, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return true;
        }
        let elapsed = started.elapsed();
        if elapsed >= interval {
            return false;
        }
        let remaining = interval - elapsed;
        std::thread::sleep(remaining.min(Duration::from_millis(10)));
    }
}

/// Query-string cache buster, milliseconds since the epoch.
fn cache_bust() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
