//! End-to-end lifecycle checks for the station feed poller: snapshot
//! chaining, frame handle accounting, heartbeat session reuse, and the
//! at-most-once goodbye on shutdown.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use floodwatch::poller::{FeedPoller, FrameHandle, FrameSink, PollerConfig, WAITING_MESSAGE};
use floodwatch::station::{HeartbeatReply, RemoteStatus, Snapshot, StationApi};

#[derive(Default)]
struct StationLog {
    snapshot_calls: AtomicU32,
    concurrent_snapshots: AtomicU32,
    max_concurrent_snapshots: AtomicU32,
    heartbeat_sessions: Mutex<Vec<Option<String>>>,
    disconnects: Mutex<Vec<String>>,
    alarm_calls: Mutex<Vec<&'static str>>,
    not_ready: AtomicBool,
}

struct ScriptedStation {
    log: Arc<StationLog>,
}

impl StationApi for ScriptedStation {
    fn fetch_snapshot(&self, _cache_bust: u64) -> Result<Snapshot> {
        let active = self.log.concurrent_snapshots.fetch_add(1, Ordering::AcqRel) + 1;
        self.log
            .max_concurrent_snapshots
            .fetch_max(active, Ordering::AcqRel);
        // Hold the request open long enough for a second in-flight fetch
        // to be visible if chaining ever broke.
        std::thread::sleep(Duration::from_millis(5));
        self.log.snapshot_calls.fetch_add(1, Ordering::AcqRel);
        self.log.concurrent_snapshots.fetch_sub(1, Ordering::AcqRel);

        if self.log.not_ready.load(Ordering::Acquire) {
            Ok(Snapshot::NotReady)
        } else {
            Ok(Snapshot::Frame(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]))
        }
    }

    fn fetch_status(&self) -> Result<RemoteStatus> {
        Ok(RemoteStatus {
            water_level: 50,
            detected_labels: vec!["orange".to_string()],
            timestamp: 1.0,
            connected: true,
            alarm_active: Some(false),
            actuator_online: Some(true),
            viewer_count: Some(2),
        })
    }

    fn heartbeat(&self, session: Option<&str>) -> Result<HeartbeatReply> {
        self.log
            .heartbeat_sessions
            .lock()
            .unwrap()
            .push(session.map(str::to_string));
        Ok(HeartbeatReply {
            viewer_id: "viewer-42".to_string(),
            viewer_count: 2,
        })
    }

    fn disconnect(&self, session: &str) {
        self.log.disconnects.lock().unwrap().push(session.to_string());
    }

    fn trigger_alarm(&self) -> Result<()> {
        self.log.alarm_calls.lock().unwrap().push("trigger");
        Ok(())
    }

    fn stop_alarm(&self) -> Result<()> {
        self.log.alarm_calls.lock().unwrap().push("stop");
        Ok(())
    }
}

struct CountingSink {
    presented: Arc<AtomicU32>,
}

impl FrameSink for CountingSink {
    fn present(&mut self, frame: &FrameHandle) -> Result<()> {
        assert!(!frame.bytes().is_empty());
        self.presented.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

fn fast_config() -> PollerConfig {
    PollerConfig {
        snapshot_interval: Duration::from_millis(10),
        status_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(20),
    }
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

#[test]
fn snapshot_fetches_never_overlap_and_handles_balance() {
    let log = Arc::new(StationLog::default());
    let station = Arc::new(ScriptedStation {
        log: Arc::clone(&log),
    });
    let presented = Arc::new(AtomicU32::new(0));

    let mut poller = FeedPoller::new(station, fast_config());
    poller
        .start(Box::new(CountingSink {
            presented: Arc::clone(&presented),
        }))
        .expect("start poller");

    assert!(wait_until(Duration::from_secs(2), || {
        log.snapshot_calls.load(Ordering::Acquire) >= 5
    }));
    // Exactly one live handle while streaming.
    assert_eq!(poller.ledger().live(), 1);
    assert_eq!(log.max_concurrent_snapshots.load(Ordering::Acquire), 1);

    poller.shutdown();

    // Teardown released the final handle; nothing leaked.
    assert_eq!(poller.ledger().live(), 0);
    assert_eq!(poller.ledger().leaked(), 0);
    assert_eq!(
        poller.ledger().released(),
        presented.load(Ordering::Acquire) as usize
    );
}

#[test]
fn heartbeat_reuses_server_assigned_session_and_disconnects_once() {
    let log = Arc::new(StationLog::default());
    let station = Arc::new(ScriptedStation {
        log: Arc::clone(&log),
    });

    let mut poller = FeedPoller::new(station, fast_config());
    poller.start(Box::new(NullCountingSink)).expect("start poller");

    assert!(wait_until(Duration::from_secs(2), || {
        log.heartbeat_sessions.lock().unwrap().len() >= 3
    }));
    assert_eq!(poller.session_id().as_deref(), Some("viewer-42"));

    poller.shutdown();
    // Calling again must not produce a second goodbye.
    poller.shutdown();

    let sessions = log.heartbeat_sessions.lock().unwrap();
    assert_eq!(sessions[0], None);
    assert!(sessions[1..]
        .iter()
        .all(|s| s.as_deref() == Some("viewer-42")));
    drop(sessions);

    let disconnects = log.disconnects.lock().unwrap();
    assert_eq!(disconnects.as_slice(), ["viewer-42"]);
}

#[test]
fn not_ready_station_reports_waiting_without_dropping_last_frame() {
    let log = Arc::new(StationLog::default());
    let station = Arc::new(ScriptedStation {
        log: Arc::clone(&log),
    });

    let mut poller = FeedPoller::new(station, fast_config());
    poller.start(Box::new(NullCountingSink)).expect("start poller");

    assert!(wait_until(Duration::from_secs(2), || {
        log.snapshot_calls.load(Ordering::Acquire) >= 2
    }));
    assert_eq!(poller.ledger().live(), 1);

    log.not_ready.store(true, Ordering::Release);
    let seen = log.snapshot_calls.load(Ordering::Acquire);
    assert!(wait_until(Duration::from_secs(2), || {
        log.snapshot_calls.load(Ordering::Acquire) >= seen + 2
    }));

    let status = poller.status();
    assert!(status.waiting);
    assert_eq!(status.message.as_deref(), Some(WAITING_MESSAGE));
    // The previously displayed frame stays bound while waiting.
    assert_eq!(poller.ledger().live(), 1);

    poller.shutdown();
    assert_eq!(poller.ledger().live(), 0);
}

#[test]
fn alarm_toggle_refetches_confirmed_status() {
    let log = Arc::new(StationLog::default());
    let station = Arc::new(ScriptedStation {
        log: Arc::clone(&log),
    });

    let mut poller = FeedPoller::new(station, fast_config());
    poller.start(Box::new(NullCountingSink)).expect("start poller");

    poller.set_alarm(true).expect("trigger alarm");
    poller.set_alarm(false).expect("stop alarm");

    let calls = log.alarm_calls.lock().unwrap().clone();
    assert_eq!(calls, ["trigger", "stop"]);
    // The displayed state comes from the post-toggle status fetch.
    let status = poller.status();
    assert!(!status.alarm_active);
    assert!(status.actuator_online);

    poller.shutdown();
}

struct NullCountingSink;

impl FrameSink for NullCountingSink {
    fn present(&mut self, _frame: &FrameHandle) -> Result<()> {
        Ok(())
    }
}

#[test]
fn errors_from_sink_do_not_kill_the_poll_loop() {
    struct RejectingSink;
    impl FrameSink for RejectingSink {
        fn present(&mut self, _frame: &FrameHandle) -> Result<()> {
            Err(anyhow!("display unavailable"))
        }
    }

    let log = Arc::new(StationLog::default());
    let station = Arc::new(ScriptedStation {
        log: Arc::clone(&log),
    });

    let mut poller = FeedPoller::new(station, fast_config());
    poller.start(Box::new(RejectingSink)).expect("start poller");

    assert!(wait_until(Duration::from_secs(2), || {
        log.snapshot_calls.load(Ordering::Acquire) >= 3
    }));
    poller.shutdown();
    assert_eq!(poller.ledger().live(), 0);
    assert_eq!(poller.ledger().leaked(), 0);
}
