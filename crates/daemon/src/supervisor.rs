//! Supervisor over every connected oscilloscope.
//!
//! Owns one acquisition task per unit plus a router task that fans loop
//! events out to persistence and to broadcast subscribers. Sessions are
//! per-device: starting one opens that device's gate and begins accumulating
//! captures for the end-of-session summary; passive collection (when enabled)
//! keeps every gated device acquiring and appends each capture to the booth
//! logs as it arrives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scope_types::{AcquisitionEvent, Capture, SessionState, SystemConfig, TriggerConfig};
use scopes::timebase;
use scopes::ScopeDevice;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::acquisition::{AcquisitionLoop, LoopEvent};
use crate::error_log::ErrorLog;
use crate::persistence::{PersistenceError, PersistenceManager, SessionData};

/// How often booth log streams are refreshed so a date change rolls files
/// over even when no stimulation arrives.
const STREAM_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no connected device with serial {0}")]
    UnknownDevice(String),
    #[error("device {0} already has an active session")]
    SessionAlreadyActive(String),
    #[error("device {0} has no active session")]
    NoActiveSession(String),
}

/// What `stop_session` hands back: how many stimulations were recorded and
/// where the summaries landed, one result per storage tree.
pub struct SessionOutcome {
    pub capture_count: usize,
    pub summaries: Vec<Result<PathBuf, PersistenceError>>,
}

struct ActiveSession {
    rat_name: String,
    captures: Vec<Arc<Capture>>,
}

struct DeviceEntry {
    booth_number: Option<u32>,
    sample_interval_us: u32,
    gate: watch::Sender<SessionState>,
    session: Option<ActiveSession>,
}

impl DeviceEntry {
    fn update_gate(&self, passive_enabled: bool) {
        let state = if self.session.is_some() || passive_enabled {
            SessionState::Running
        } else {
            SessionState::NotRunning
        };
        let _ = self.gate.send(state);
    }
}

struct Shared {
    devices: Mutex<HashMap<String, DeviceEntry>>,
    persistence: PersistenceManager,
    error_log: ErrorLog,
    events: broadcast::Sender<AcquisitionEvent>,
    passive_enabled: bool,
}

pub struct ScopeSupervisor {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    loop_handles: Vec<JoinHandle<()>>,
    router_handle: JoinHandle<()>,
    maintenance_handle: JoinHandle<()>,
}

impl ScopeSupervisor {
    /// Takes ownership of the discovered devices and spawns their loops.
    /// Devices whose trigger configuration cannot be resolved are shut down
    /// and logged rather than aborting startup.
    pub fn start(
        devices: Vec<Box<dyn ScopeDevice>>,
        config: &SystemConfig,
        persistence: PersistenceManager,
        error_log: ErrorLog,
    ) -> Self {
        let (event_tx, event_rx) = flume::bounded::<LoopEvent>(256);
        let (broadcast_tx, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            devices: Mutex::new(HashMap::new()),
            persistence,
            error_log,
            events: broadcast_tx,
            passive_enabled: config.passive_collection_enabled,
        });

        let mut loop_handles = Vec::new();
        for mut device in devices {
            let identity = device.identity().clone();
            let booth = config.booth_for_serial(&identity.serial_code);
            let trigger: TriggerConfig = booth
                .map(|b| b.trigger.clone())
                .unwrap_or_default();
            if booth.is_none() {
                warn!(
                    "device {} has no booth definition, using default trigger parameters",
                    identity.serial_code
                );
            }

            let timing = match timebase::resolve(identity.family, &trigger) {
                Ok(timing) => timing,
                Err(e) => {
                    error!(
                        "device {}: unusable trigger configuration: {e}",
                        identity.serial_code
                    );
                    if let Err(log_err) = shared
                        .error_log
                        .append(&format!("device {}", identity.serial_code), &e.to_string())
                    {
                        warn!("error log write failed: {log_err}");
                    }
                    device.shutdown();
                    continue;
                }
            };

            let (gate_tx, gate_rx) = watch::channel(SessionState::NotRunning);
            let entry = DeviceEntry {
                booth_number: booth.map(|b| b.booth_number),
                sample_interval_us: timing.sample_interval_us(),
                gate: gate_tx,
                session: None,
            };
            entry.update_gate(shared.passive_enabled);
            shared
                .devices
                .lock()
                .unwrap()
                .insert(identity.serial_code.clone(), entry);

            let acq = AcquisitionLoop::new(
                device,
                timing,
                trigger,
                gate_rx,
                event_tx.clone(),
                cancel.clone(),
            );
            loop_handles.push(tokio::spawn(acq.run()));
        }
        info!("supervising {} device(s)", loop_handles.len());

        let router_handle = tokio::spawn(route_events(Arc::clone(&shared), event_rx));
        let maintenance_handle =
            tokio::spawn(refresh_booth_streams(Arc::clone(&shared), cancel.clone()));

        Self {
            shared,
            cancel,
            loop_handles,
            router_handle,
            maintenance_handle,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.shared.events.subscribe()
    }

    /// Opens the device's gate and starts accumulating captures under the
    /// given subject name.
    pub fn start_session(&self, serial_code: &str, rat_name: &str) -> Result<(), SupervisorError> {
        let mut devices = self.shared.devices.lock().unwrap();
        let entry = devices
            .get_mut(serial_code)
            .ok_or_else(|| SupervisorError::UnknownDevice(serial_code.to_string()))?;
        if entry.session.is_some() {
            return Err(SupervisorError::SessionAlreadyActive(serial_code.to_string()));
        }
        entry.session = Some(ActiveSession {
            rat_name: rat_name.to_string(),
            captures: Vec::new(),
        });
        entry.update_gate(self.shared.passive_enabled);
        info!("session started on {serial_code} for {rat_name}");
        let _ = self.shared.events.send(AcquisitionEvent::SessionStarted {
            serial_code: serial_code.to_string(),
            rat_name: rat_name.to_string(),
        });
        Ok(())
    }

    /// Closes the gate (unless passive collection holds it open) and writes
    /// the session summary to every storage tree.
    pub fn stop_session(&self, serial_code: &str) -> Result<SessionOutcome, SupervisorError> {
        let session_data = {
            let mut devices = self.shared.devices.lock().unwrap();
            let entry = devices
                .get_mut(serial_code)
                .ok_or_else(|| SupervisorError::UnknownDevice(serial_code.to_string()))?;
            let session = entry
                .session
                .take()
                .ok_or_else(|| SupervisorError::NoActiveSession(serial_code.to_string()))?;
            entry.update_gate(self.shared.passive_enabled);
            SessionData {
                rat_name: session.rat_name,
                booth_number: entry.booth_number.unwrap_or(0),
                serial_code: serial_code.to_string(),
                sample_interval_us: entry.sample_interval_us,
                captures: session.captures,
            }
        };

        let capture_count = session_data.captures.len();
        let summaries = self.shared.persistence.finalize_session(&session_data);
        for result in &summaries {
            match result {
                Ok(path) => info!("session summary written to {path:?}"),
                Err(e) => {
                    error!("session summary failed: {e}");
                    if let Err(log_err) = self
                        .shared
                        .error_log
                        .append(&format!("session on {serial_code}"), &e.to_string())
                    {
                        warn!("error log write failed: {log_err}");
                    }
                }
            }
        }
        let _ = self.shared.events.send(AcquisitionEvent::SessionStopped {
            serial_code: serial_code.to_string(),
            capture_count,
        });
        Ok(SessionOutcome {
            capture_count,
            summaries,
        })
    }

    pub fn device_serials(&self) -> Vec<String> {
        self.shared.devices.lock().unwrap().keys().cloned().collect()
    }

    /// Cancels every loop, drains the router and closes all booth streams.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.loop_handles {
            if let Err(e) = handle.await {
                warn!("acquisition task panicked: {e}");
            }
        }
        // All loop senders are gone; the router drains and exits.
        if let Err(e) = self.router_handle.await {
            warn!("event router panicked: {e}");
        }
        if let Err(e) = self.maintenance_handle.await {
            warn!("stream maintenance task panicked: {e}");
        }
        self.shared.persistence.close_all();
        info!("supervisor stopped");
    }
}

async fn route_events(shared: Arc<Shared>, events: flume::Receiver<LoopEvent>) {
    while let Ok(event) = events.recv_async().await {
        match event {
            LoopEvent::Capture {
                serial_code,
                capture,
            } => {
                let (booth_number, sample_interval_us) = {
                    let mut devices = shared.devices.lock().unwrap();
                    let Some(entry) = devices.get_mut(&serial_code) else {
                        warn!("capture from unknown device {serial_code}");
                        continue;
                    };
                    if let Some(session) = &mut entry.session {
                        session.captures.push(Arc::clone(&capture));
                    }
                    (entry.booth_number, entry.sample_interval_us)
                };

                // Booth log writes hit the disk; the device map stays
                // unlocked so session calls never wait on I/O.
                if shared.passive_enabled {
                    if let Some(booth) = booth_number {
                        shared
                            .persistence
                            .append_capture(booth, sample_interval_us, &capture);
                    }
                }
                let _ = shared.events.send(AcquisitionEvent::CaptureReady {
                    serial_code,
                    booth_number,
                    sample_interval_us,
                    capture,
                });
            }
            LoopEvent::Fault {
                serial_code,
                operation,
                message,
            } => {
                if let Err(e) = shared
                    .error_log
                    .append(&format!("device {serial_code} ({operation})"), &message)
                {
                    warn!("error log write failed: {e}");
                }
                let _ = shared.events.send(AcquisitionEvent::DeviceFault {
                    serial_code,
                    operation,
                    message,
                });
            }
        }
    }
}

/// Keeps passive booth logs rolling over at midnight even when quiet.
async fn refresh_booth_streams(shared: Arc<Shared>, cancel: CancellationToken) {
    if !shared.passive_enabled {
        return;
    }
    let booths: Vec<u32> = {
        let devices = shared.devices.lock().unwrap();
        devices.values().filter_map(|e| e.booth_number).collect()
    };
    let mut ticks = tokio::time::interval(STREAM_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }
        for &booth in &booths {
            shared.persistence.refresh_streams(booth);
        }
    }
}
