//! Per-device acquisition loop.
//!
//! One loop owns one oscilloscope and steps a four-state machine on a fixed
//! cadence: idle until the gate opens, arm a block capture, drain it when the
//! trigger fires, then hold off re-arming for the refractory period. Device
//! faults are fatal for the loop that hit them; the unit sits idle until the
//! daemon restarts, and every other loop keeps running.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use scope_types::{Capture, ResolvedTiming, SessionState, TriggerConfig};
use scopes::{ScopeDevice, ScopeError};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// State machine cadence. Trigger latency and refractory resolution are both
/// bounded by this tick.
pub const POLL_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquisitionState {
    Idle,
    ArmedWaitingForTrigger,
    Triggered,
    RefractoryWait,
}

/// What a loop reports back to the supervisor.
#[derive(Debug)]
pub enum LoopEvent {
    Capture {
        serial_code: String,
        capture: Arc<Capture>,
    },
    /// Terminal for the reporting loop.
    Fault {
        serial_code: String,
        operation: String,
        message: String,
    },
}

pub struct AcquisitionLoop {
    device: Box<dyn ScopeDevice>,
    timing: ResolvedTiming,
    trigger: TriggerConfig,
    gate: watch::Receiver<SessionState>,
    events: flume::Sender<LoopEvent>,
    cancel: CancellationToken,
    state: AcquisitionState,
    refractory_started: Option<Instant>,
}

impl AcquisitionLoop {
    pub fn new(
        device: Box<dyn ScopeDevice>,
        timing: ResolvedTiming,
        trigger: TriggerConfig,
        gate: watch::Receiver<SessionState>,
        events: flume::Sender<LoopEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            device,
            timing,
            trigger,
            gate,
            events,
            cancel,
            state: AcquisitionState::Idle,
            refractory_started: None,
        }
    }

    pub async fn run(mut self) {
        let serial = self.device.identity().serial_code.clone();
        info!("acquisition loop starting for {serial}");

        let mut faulted = false;
        if let Err(e) = self.configure() {
            self.report_fault(&serial, &e).await;
            faulted = true;
        }

        let mut ticks = tokio::time::interval(POLL_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            if faulted {
                continue;
            }
            match self.step() {
                Ok(Some(capture)) => {
                    let event = LoopEvent::Capture {
                        serial_code: serial.clone(),
                        capture: Arc::new(capture),
                    };
                    if self.events.send_async(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.report_fault(&serial, &e).await;
                    faulted = true;
                }
            }
        }

        self.device.shutdown();
        info!("acquisition loop for {serial} stopped");
    }

    fn configure(&mut self) -> Result<(), ScopeError> {
        self.device.configure_channel()?;
        self.device.configure_trigger(&self.timing, &self.trigger)
    }

    /// Advances the state machine by one tick. A returned capture has already
    /// been converted to volts and timestamped.
    fn step(&mut self) -> Result<Option<Capture>, ScopeError> {
        let gate = *self.gate.borrow();
        match self.state {
            AcquisitionState::Idle => {
                if gate == SessionState::Running {
                    self.arm()?;
                }
                Ok(None)
            }
            AcquisitionState::ArmedWaitingForTrigger => {
                if gate == SessionState::NotRunning {
                    // The trigger may have fired on the way out; a stimulation
                    // that happened is never discarded.
                    let pending = if self.device.poll_ready()? {
                        Some(self.read_capture()?)
                    } else {
                        None
                    };
                    self.state = AcquisitionState::Idle;
                    return Ok(pending);
                }
                if self.device.poll_ready()? {
                    self.state = AcquisitionState::Triggered;
                    return self.step_triggered();
                }
                Ok(None)
            }
            AcquisitionState::Triggered => self.step_triggered(),
            AcquisitionState::RefractoryWait => {
                if gate == SessionState::NotRunning {
                    self.state = AcquisitionState::Idle;
                    return Ok(None);
                }
                if self.refractory_elapsed() {
                    self.arm()?;
                }
                Ok(None)
            }
        }
    }

    fn step_triggered(&mut self) -> Result<Option<Capture>, ScopeError> {
        let capture = self.read_capture()?;
        self.refractory_started = Some(Instant::now());
        self.state = AcquisitionState::RefractoryWait;
        Ok(Some(capture))
    }

    fn arm(&mut self) -> Result<(), ScopeError> {
        self.device.run_block(&self.timing)?;
        self.state = AcquisitionState::ArmedWaitingForTrigger;
        debug!(
            "{} armed, {} samples pending",
            self.device.identity().serial_code,
            self.timing.total_samples()
        );
        Ok(())
    }

    /// Refractory holds in whole milliseconds; sub-millisecond remainders of
    /// the configured period are not enforced.
    fn refractory_elapsed(&self) -> bool {
        let elapsed_ms = self
            .refractory_started
            .map(|t| t.elapsed().as_millis() as i64)
            .unwrap_or(i64::MAX);
        elapsed_ms >= self.trigger.refractory_us / 1000
    }

    fn read_capture(&mut self) -> Result<Capture, ScopeError> {
        let raw = self.device.read_samples(&self.timing)?;
        let identity = self.device.identity();
        Ok(Capture {
            timestamp: Local::now(),
            samples: raw.iter().map(|&r| identity.volts_from_raw(r)).collect(),
        })
    }

    async fn report_fault(&mut self, serial: &str, e: &ScopeError) {
        error!("device {serial} faulted in {}: {e}", e.operation());
        let event = LoopEvent::Fault {
            serial_code: serial.to_string(),
            operation: e.operation().to_string(),
            message: e.to_string(),
        };
        let _ = self.events.send_async(event).await;
    }
}
