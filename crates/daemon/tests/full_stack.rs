//! End-to-end tests over simulated oscilloscopes: discovery, acquisition,
//! session summaries and the crash-safe booth logs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use scope_daemon::error_log::ErrorLog;
use scope_daemon::persistence::PersistenceManager;
use scope_daemon::supervisor::ScopeSupervisor;
use scope_types::{
    AcquisitionEvent, BoothDefinition, ScopeFamily, SystemConfig, TriggerConfig, TriggerEdge,
};
use scopes::bindings::ScopeBindings;
use scopes::discover::discover_family;
use scopes::mock::MockScopeBindings;
use tokio::sync::broadcast;
use tokio::time::timeout;

const EVENT_WAIT: Duration = Duration::from_secs(10);

fn fast_trigger() -> TriggerConfig {
    TriggerConfig {
        pre_trigger_us: 0,
        post_trigger_us: 1000,
        desired_sample_interval_us: 1,
        trigger_voltage: 1.0,
        trigger_edge: TriggerEdge::Falling,
        refractory_us: 0,
    }
}

fn booth(serial: &str, booth_number: u32) -> BoothDefinition {
    BoothDefinition {
        serial_code: serial.to_string(),
        booth_number,
        trigger: fast_trigger(),
        session_display: "Session".to_string(),
        trace_display: "Trace".to_string(),
    }
}

fn simulated_bindings(serials: &[&str]) -> Arc<dyn ScopeBindings> {
    Arc::new(MockScopeBindings::with_auto_fire(
        serials.iter().map(|s| s.to_string()).collect(),
        Duration::from_millis(10),
    ))
}

async fn next_capture(
    events: &mut broadcast::Receiver<AcquisitionEvent>,
    serial: &str,
) -> AcquisitionEvent {
    loop {
        let event = timeout(EVENT_WAIT, events.recv())
            .await
            .expect("timed out waiting for capture")
            .expect("event channel closed");
        if matches!(&event, AcquisitionEvent::CaptureReady { serial_code, .. } if serial_code == serial)
        {
            return event;
        }
    }
}

fn booth_log_path(base: &Path, group: Option<&str>, booth_number: u32) -> std::path::PathBuf {
    let date = chrono::Local::now().date_naive().format("%Y_%m_%d");
    let mut path = base.to_path_buf();
    if let Some(group) = group {
        path.push(group);
    }
    path.push(booth_number.to_string());
    path.push(format!("Booth{booth_number}_{date}"));
    path
}

#[tokio::test]
async fn passive_collection_appends_to_both_trees() {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("primary");
    let secondary = dir.path().join("secondary");

    let config = SystemConfig {
        booths: vec![booth("A-1", 3)],
        primary_path: Some(primary.clone()),
        secondary_path: Some(secondary.clone()),
        group_id: Some("G1".to_string()),
        passive_collection_enabled: true,
    };

    let bindings = simulated_bindings(&["A-1"]);
    let devices = discover_family(ScopeFamily::Ps2204a, &bindings);
    assert_eq!(devices.len(), 1);

    let persistence = PersistenceManager::new(config.base_paths(), config.group_id.clone());
    let error_log = ErrorLog::new(dir.path().join("errors.txt"));
    let supervisor = ScopeSupervisor::start(devices, &config, persistence, error_log);

    let mut events = supervisor.subscribe();
    for _ in 0..2 {
        let event = next_capture(&mut events, "A-1").await;
        let AcquisitionEvent::CaptureReady {
            booth_number,
            capture,
            ..
        } = event
        else {
            unreachable!()
        };
        assert_eq!(booth_number, Some(3));
        // The simulated stimulation pulse swings past +/-7 V.
        assert!(capture.max_voltage() > 7.0);
        assert!(capture.min_voltage() < -7.0);
    }
    supervisor.shutdown().await;

    for base in [&primary, &secondary] {
        let path = booth_log_path(base, Some("G1"), 3);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert!(lines.len() >= 2, "expected appended captures in {path:?}");
        // Each line: timestamp, sample interval, then the voltages.
        let fields: Vec<_> = lines[0].split(", ").collect();
        assert_eq!(fields[1], "1");
        assert!(fields.len() > 100);
    }
}

#[tokio::test]
async fn session_produces_scope_summary() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("data");

    let config = SystemConfig {
        booths: vec![booth("A-1", 7)],
        primary_path: Some(base.clone()),
        secondary_path: None,
        group_id: None,
        passive_collection_enabled: false,
    };

    let bindings = simulated_bindings(&["A-1"]);
    let devices = discover_family(ScopeFamily::Ps2204a, &bindings);
    let persistence = PersistenceManager::new(config.base_paths(), config.group_id.clone());
    let error_log = ErrorLog::new(dir.path().join("errors.txt"));
    let supervisor = ScopeSupervisor::start(devices, &config, persistence, error_log);

    let mut events = supervisor.subscribe();
    supervisor.start_session("A-1", "Rat42").unwrap();
    next_capture(&mut events, "A-1").await;
    next_capture(&mut events, "A-1").await;

    let outcome = supervisor.stop_session("A-1").unwrap();
    assert!(outcome.capture_count >= 2);
    assert_eq!(outcome.summaries.len(), 1);
    let path = outcome.summaries.into_iter().next().unwrap().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = contents.split("\r\n").collect();
    assert_eq!(lines[0], "ScopeVNS Version: 4");
    assert_eq!(lines[1], "Rat name: Rat42");
    assert_eq!(lines[2], "Booth number: 7");
    assert_eq!(lines[3], "Scope serial code: A-1");
    assert_eq!(
        lines[10],
        format!("Number of stims detected: {}", outcome.capture_count)
    );

    // Stopping twice is an error; the session is gone.
    assert!(supervisor.stop_session("A-1").is_err());
    supervisor.shutdown().await;
}

#[tokio::test]
async fn session_and_passive_collection_share_the_capture_stream() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("data");

    let config = SystemConfig {
        booths: vec![booth("A-1", 4)],
        primary_path: Some(base.clone()),
        secondary_path: None,
        group_id: None,
        passive_collection_enabled: true,
    };

    let bindings = simulated_bindings(&["A-1"]);
    let devices = discover_family(ScopeFamily::Ps2204a, &bindings);
    let persistence = PersistenceManager::new(config.base_paths(), config.group_id.clone());
    let error_log = ErrorLog::new(dir.path().join("errors.txt"));
    let supervisor = ScopeSupervisor::start(devices, &config, persistence, error_log);

    // Session calls stay responsive while the router is appending to disk.
    let mut events = supervisor.subscribe();
    next_capture(&mut events, "A-1").await;
    supervisor.start_session("A-1", "RatY").unwrap();
    next_capture(&mut events, "A-1").await;
    next_capture(&mut events, "A-1").await;
    let outcome = supervisor.stop_session("A-1").unwrap();
    supervisor.shutdown().await;

    // Every session capture also reached the booth log.
    assert!(outcome.capture_count >= 2);
    let contents = std::fs::read_to_string(booth_log_path(&base, None, 4)).unwrap();
    let appended = contents.split("\r\n").filter(|l| !l.is_empty()).count();
    assert!(appended >= outcome.capture_count + 1);
}

#[tokio::test]
async fn fault_on_one_device_leaves_the_other_running() {
    let dir = tempfile::tempdir().unwrap();

    let config = SystemConfig {
        booths: vec![booth("A-1", 1), booth("A-2", 2)],
        primary_path: Some(dir.path().join("data")),
        secondary_path: None,
        group_id: None,
        passive_collection_enabled: true,
    };

    let mock = Arc::new(MockScopeBindings::with_auto_fire(
        vec!["A-1".to_string(), "A-2".to_string()],
        Duration::from_millis(10),
    ));
    let bindings: Arc<dyn ScopeBindings> = mock.clone();
    let devices = discover_family(ScopeFamily::Ps2204a, &bindings);
    assert_eq!(devices.len(), 2);

    let persistence = PersistenceManager::new(config.base_paths(), config.group_id.clone());
    let error_log = ErrorLog::new(dir.path().join("errors.txt"));
    let supervisor = ScopeSupervisor::start(devices, &config, persistence, error_log);
    let mut events = supervisor.subscribe();

    mock.inject_failure("A-1");

    let mut saw_fault = false;
    let mut healthy_captures = 0;
    while !(saw_fault && healthy_captures >= 2) {
        let event = timeout(EVENT_WAIT, events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        match event {
            AcquisitionEvent::DeviceFault { serial_code, .. } => {
                assert_eq!(serial_code, "A-1");
                saw_fault = true;
            }
            AcquisitionEvent::CaptureReady { serial_code, .. } if serial_code == "A-2" => {
                healthy_captures += 1;
            }
            _ => {}
        }
    }
    supervisor.shutdown().await;

    // The fault reached the durable error log.
    let errors = std::fs::read_to_string(dir.path().join("errors.txt")).unwrap();
    assert!(errors.contains("A-1"));
}

#[tokio::test]
async fn unreachable_primary_does_not_block_secondary() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where a directory is needed makes the primary tree fail.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let secondary = dir.path().join("secondary");

    let config = SystemConfig {
        booths: vec![booth("A-1", 5)],
        primary_path: Some(blocker.join("sub")),
        secondary_path: Some(secondary.clone()),
        group_id: None,
        passive_collection_enabled: true,
    };

    let bindings = simulated_bindings(&["A-1"]);
    let devices = discover_family(ScopeFamily::Ps2204a, &bindings);
    let persistence = PersistenceManager::new(config.base_paths(), config.group_id.clone());
    let error_log = ErrorLog::new(dir.path().join("errors.txt"));
    let supervisor = ScopeSupervisor::start(devices, &config, persistence, error_log);

    let mut events = supervisor.subscribe();
    supervisor.start_session("A-1", "RatX").unwrap();
    next_capture(&mut events, "A-1").await;
    let outcome = supervisor.stop_session("A-1").unwrap();

    // Summary: primary errors, secondary lands.
    assert!(outcome.summaries[0].is_err());
    assert!(outcome.summaries[1].is_ok());
    supervisor.shutdown().await;

    // Passive booth log also made it to the secondary tree.
    let contents = std::fs::read_to_string(booth_log_path(&secondary, None, 5)).unwrap();
    assert!(!contents.is_empty());
}
