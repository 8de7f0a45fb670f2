//! Detection scheduling.
//!
//! Manual triggers and polling ticks share one in-flight guard, so at most
//! one detection call is outstanding. Polling runs on its own thread and
//! waits on a channel between ticks; dropping or signalling the channel
//! cancels future ticks without interrupting a call already in progress.

use std::sync::mpsc::{self, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::detect::{DetectionClient, DetectionResult, OverlayRect};
use crate::error::{DetectionError, SnapshotError};
use crate::events::{EngineEvent, EventBus};
use crate::frame::FrameDimensions;
use crate::history::DetectionHistory;
use crate::ingest::FrameSource;
use crate::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No source has been armed.
    Idle,
    Ready,
    InFlight,
    /// Released by `stop()`; armed again when a new source starts.
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    NoSource,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TriggerOutcome {
    Completed(DetectionResult),
    Skipped(SkipReason),
}

struct RunState {
    armed: bool,
    stopped: bool,
    in_flight: bool,
    /// Bumped on every polling start and stop; a tick runs only while its
    /// epoch is current.
    polling_epoch: u64,
    /// Most recent result with the size of the frame it was computed on.
    last_result: Option<(DetectionResult, FrameDimensions)>,
}

struct Shared {
    source: Arc<FrameSource>,
    client: Arc<DetectionClient>,
    history: Arc<Mutex<DetectionHistory>>,
    events: Arc<EventBus>,
    state: Mutex<RunState>,
}

/// Clears the in-flight flag when the call unwinds or returns.
struct InFlightGuard<'a> {
    shared: &'a Shared,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.state).in_flight = false;
    }
}

impl Shared {
    fn begin(&self) -> Option<InFlightGuard<'_>> {
        let mut state = lock(&self.state);
        if state.in_flight {
            return None;
        }
        state.in_flight = true;
        Some(InFlightGuard { shared: self })
    }

    /// Polling tick. `None` once `epoch` has been retired.
    fn tick(&self, epoch: u64) -> Option<Result<TriggerOutcome, DetectionError>> {
        let guard = {
            let mut state = lock(&self.state);
            if state.polling_epoch != epoch {
                return None;
            }
            if state.in_flight {
                return Some(Ok(TriggerOutcome::Skipped(SkipReason::InFlight)));
            }
            state.in_flight = true;
            InFlightGuard { shared: self }
        };
        Some(self.run(guard))
    }

    fn next_polling_epoch(&self) -> u64 {
        let mut state = lock(&self.state);
        state.polling_epoch += 1;
        state.polling_epoch
    }

    fn trigger_once(&self) -> Result<TriggerOutcome, DetectionError> {
        let Some(guard) = self.begin() else {
            log::debug!("detection already in flight; skipping trigger");
            return Ok(TriggerOutcome::Skipped(SkipReason::InFlight));
        };
        self.run(guard)
    }

    fn run(&self, _guard: InFlightGuard<'_>) -> Result<TriggerOutcome, DetectionError> {
        let frame = match self.source.snapshot() {
            Ok(frame) => frame,
            Err(SnapshotError::NoActiveSource) => {
                return Ok(TriggerOutcome::Skipped(SkipReason::NoSource));
            }
            Err(err) => return Err(self.report_failure(err.into())),
        };

        match self.client.detect(&frame) {
            Ok(result) => {
                // Recorded under the guard so history order matches submission order.
                lock(&self.history).record(result.clone());
                lock(&self.state).last_result = Some((result.clone(), frame.dimensions()));
                self.events
                    .publish(EngineEvent::DetectionCompleted(result.clone()));
                Ok(TriggerOutcome::Completed(result))
            }
            Err(err) => Err(self.report_failure(err)),
        }
    }

    fn report_failure(&self, err: DetectionError) -> DetectionError {
        log::warn!("detection failed: {}", err);
        self.events.publish(EngineEvent::DetectionFailed(err.clone()));
        err
    }
}

struct PollingHandle {
    interval: Duration,
    stop: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl PollingHandle {
    /// Signal the worker and detach it; an in-flight call finishes on its own.
    fn cancel(mut self) {
        let _ = self.stop.send(());
        drop(self.join.take());
    }
}

pub struct DetectionScheduler {
    shared: Arc<Shared>,
    polling: Mutex<Option<PollingHandle>>,
}

impl DetectionScheduler {
    pub fn new(
        source: Arc<FrameSource>,
        client: Arc<DetectionClient>,
        history: Arc<Mutex<DetectionHistory>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                client,
                history,
                events,
                state: Mutex::new(RunState {
                    armed: false,
                    stopped: false,
                    in_flight: false,
                    polling_epoch: 0,
                    last_result: None,
                }),
            }),
            polling: Mutex::new(None),
        }
    }

    /// Mark a freshly started source as ready for detection.
    pub fn arm(&self) {
        let mut state = lock(&self.shared.state);
        state.armed = true;
        state.stopped = false;
    }

    pub fn state(&self) -> SchedulerState {
        let state = lock(&self.shared.state);
        if state.in_flight {
            SchedulerState::InFlight
        } else if state.stopped {
            SchedulerState::Stopped
        } else if state.armed && self.shared.source.is_active() {
            SchedulerState::Ready
        } else {
            SchedulerState::Idle
        }
    }

    /// Snapshot the source and run one detection.
    ///
    /// Skips without error when a call is already in flight or no source is
    /// active. Failures are reported to subscribers and returned once.
    pub fn trigger_once(&self) -> Result<TriggerOutcome, DetectionError> {
        self.shared.trigger_once()
    }

    /// Begin periodic detection. Returns false if polling is already active
    /// or the interval is zero.
    pub fn start_polling(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            log::warn!("refusing to poll with a zero interval");
            return false;
        }
        let mut polling = lock(&self.polling);
        if polling.is_some() {
            return false;
        }

        let epoch = self.shared.next_polling_epoch();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("detection-poll".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now() + interval;
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    match shared.tick(epoch) {
                        None => break,
                        Some(Err(err)) => log::debug!("polling continues after error: {}", err),
                        Some(Ok(_)) => {}
                    }

                    // Ticks that elapsed during the call are dropped.
                    let now = Instant::now();
                    next_tick += interval;
                    while next_tick <= now {
                        next_tick += interval;
                    }

                    match stop_rx.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => break,
                        Err(TryRecvError::Empty) => {}
                    }
                }
                log::debug!("polling worker exited");
            });

        match spawned {
            Ok(join) => {
                *polling = Some(PollingHandle {
                    interval,
                    stop: stop_tx,
                    join: Some(join),
                });
                drop(polling);
                log::info!("polling started every {:?}", interval);
                self.shared
                    .events
                    .publish(EngineEvent::PollingStarted { interval });
                true
            }
            Err(err) => {
                self.shared.next_polling_epoch();
                log::error!("failed to spawn polling worker: {}", err);
                false
            }
        }
    }

    /// Cancel future ticks. Returns whether polling was active.
    ///
    /// Once this returns no new polling call starts; one already in flight
    /// still completes.
    pub fn stop_polling(&self) -> bool {
        let mut polling = lock(&self.polling);
        let Some(handle) = polling.take() else {
            return false;
        };
        self.shared.next_polling_epoch();
        drop(polling);
        handle.cancel();
        log::info!("polling stopped");
        self.shared.events.publish(EngineEvent::PollingStopped);
        true
    }

    /// Stop polling and release the source.
    pub fn stop(&self) {
        self.stop_polling();
        self.shared.source.stop();
        let mut state = lock(&self.shared.state);
        state.armed = false;
        state.stopped = true;
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.polling).is_some()
    }

    pub fn polling_interval(&self) -> Option<Duration> {
        lock(&self.polling).as_ref().map(|p| p.interval)
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.shared.state).in_flight
    }

    pub fn last_result(&self) -> Option<DetectionResult> {
        lock(&self.shared.state)
            .last_result
            .as_ref()
            .map(|(result, _)| result.clone())
    }

    /// Overlay of the last result against the frame that produced it.
    pub fn last_overlay(&self) -> Option<OverlayRect> {
        let state = lock(&self.shared.state);
        let (result, dimensions) = state.last_result.as_ref()?;
        result.overlay(*dimensions)
    }

    pub fn clear_last_result(&self) {
        lock(&self.shared.state).last_result = None;
    }
}

impl Drop for DetectionScheduler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.polling).take() {
            self.shared.next_polling_epoch();
            handle.cancel();
        }
    }
}
