//! Audiogram session orchestration
//!
//! Runs one staircase per frequency on a background worker thread. The
//! worker owns the device for the duration of the session and performs
//! all timed waits; the foreground talks to it through the session
//! handle: subject responses go in over a single-slot channel, progress
//! comes back as [`SessionEvent`]s, and cancellation is a cooperative
//! flag observed at trial boundaries only (a stimulus already playing is
//! never interrupted).
//!
//! State machine: `Idle -> Running -> {Complete | Cancelled}`. A device
//! transmit failure aborts the session into `Cancelled` and surfaces the
//! error to the caller; frequencies completed before an abort stay in
//! the result.

use crate::audiogram::staircase::Staircase;
use crate::audiogram::trial::TrialSequencer;
use crate::audiogram::{AudiogramResult, Interval};
use crate::config::FitConfig;
use crate::device::{DeviceError, ToneSink};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Complete,
    Cancelled,
}

/// Progress updates published by the worker for foreground display
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A frequency's staircase is starting (`index` is 1-based)
    FrequencyStarted {
        index: usize,
        total: usize,
        freq_hz: u32,
    },
    /// An interval's stimulus is being presented
    PlayingInterval { interval: Interval },
    /// Both intervals played; waiting for the subject's A/B choice
    AwaitingResponse { freq_hz: u32, level_db: f64 },
    /// A frequency's staircase converged
    ThresholdRecorded { freq_hz: u32, threshold_db: f64 },
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a session is already running")]
    AlreadyRunning,

    #[error("session was never started")]
    NotStarted,

    #[error("device command failed: {0}")]
    Device(#[from] DeviceError),

    #[error("session worker panicked")]
    Worker,
}

/// How a session ended; both variants carry the thresholds of all
/// frequencies completed before the end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Complete(AudiogramResult),
    Cancelled(AudiogramResult),
}

impl SessionOutcome {
    pub fn result(&self) -> &AudiogramResult {
        match self {
            SessionOutcome::Complete(r) | SessionOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SessionOutcome::Complete(_))
    }
}

/// Cancellation capability, clonable into signal handlers
#[derive(Debug, Clone)]
pub struct SessionCanceller {
    flag: Arc<AtomicBool>,
}

impl SessionCanceller {
    /// Request cancellation. Idempotent; takes effect at the next trial
    /// boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

struct RunningSession {
    worker: JoinHandle<Result<SessionOutcome, SessionError>>,
    responses: Sender<Interval>,
    cancel: Arc<AtomicBool>,
    events: Receiver<SessionEvent>,
}

/// One audiogram measurement session
pub struct AudiogramSession {
    config: FitConfig,
    state: Arc<Mutex<SessionState>>,
    running: Option<RunningSession>,
}

impl AudiogramSession {
    pub fn new(config: FitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            running: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Cancelled)
    }

    /// Start the background worker. Rejected unless the session is idle.
    pub fn start<D: ToneSink + 'static>(&mut self, device: D) -> Result<(), SessionError> {
        self.start_with_sequencer(device, TrialSequencer::new())
    }

    /// Start with an explicit sequencer (deterministic in tests)
    pub fn start_with_sequencer<D: ToneSink + 'static>(
        &mut self,
        device: D,
        sequencer: TrialSequencer,
    ) -> Result<(), SessionError> {
        if self.state() != SessionState::Idle {
            return Err(SessionError::AlreadyRunning);
        }

        let (response_tx, response_rx) = bounded::<Interval>(1);
        let (event_tx, event_rx) = unbounded::<SessionEvent>();
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            device,
            config: self.config.clone(),
            sequencer,
            responses: response_rx,
            cancel: Arc::clone(&cancel),
            events: event_tx,
        };

        if let Ok(mut state) = self.state.lock() {
            *state = SessionState::Running;
        }
        let state = Arc::clone(&self.state);
        let handle = thread::spawn(move || {
            let outcome = worker.run();
            let final_state = match &outcome {
                Ok(SessionOutcome::Complete(_)) => SessionState::Complete,
                Ok(SessionOutcome::Cancelled(_)) | Err(_) => SessionState::Cancelled,
            };
            if let Ok(mut s) = state.lock() {
                *s = final_state;
            }
            outcome
        });

        tracing::info!(
            frequencies = self.config.freqs_hz.len(),
            "Audiogram session started"
        );

        self.running = Some(RunningSession {
            worker: handle,
            responses: response_tx,
            cancel,
            events: event_rx,
        });
        Ok(())
    }

    /// Deliver the subject's interval choice. Choices made before both
    /// intervals have played are discarded; the channel holds at most
    /// one pending answer.
    pub fn respond(&self, chosen: Interval) {
        if let Some(running) = &self.running {
            let _ = running.responses.try_send(chosen);
        }
    }

    /// Request cancellation. Idempotent; observed at the next trial
    /// boundary.
    pub fn cancel(&self) {
        if let Some(running) = &self.running {
            running.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Cancellation capability usable from another thread or a signal
    /// handler
    pub fn canceller(&self) -> Option<SessionCanceller> {
        self.running.as_ref().map(|r| SessionCanceller {
            flag: Arc::clone(&r.cancel),
        })
    }

    /// Receiver for worker progress events
    pub fn events(&self) -> Option<Receiver<SessionEvent>> {
        self.running.as_ref().map(|r| r.events.clone())
    }

    /// Whether the worker has finished (result not yet collected)
    pub fn is_finished(&self) -> bool {
        match &self.running {
            Some(running) => running.worker.is_finished(),
            None => false,
        }
    }

    /// Wait for the worker and collect the outcome. A worker still
    /// waiting for responses only returns after `cancel()`.
    pub fn join(&mut self) -> Result<SessionOutcome, SessionError> {
        let running = self.running.take().ok_or(SessionError::NotStarted)?;
        match running.worker.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(SessionError::Worker),
        }
    }
}

enum TrialEnd {
    Answered(bool),
    Interrupted,
}

struct Worker<D: ToneSink> {
    device: D,
    config: FitConfig,
    sequencer: TrialSequencer,
    responses: Receiver<Interval>,
    cancel: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
}

impl<D: ToneSink> Worker<D> {
    fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let outcome = self.measure_all();

        // Best-effort teardown: the session is ending either way.
        if let Err(e) = self.device.set_test_mode(false) {
            tracing::warn!(error = %e, "Ignoring test mode teardown failure");
        }

        match &outcome {
            Ok(SessionOutcome::Complete(result)) => {
                tracing::info!(frequencies = result.len(), "Audiogram session complete");
                self.emit(SessionEvent::Completed);
            }
            Ok(SessionOutcome::Cancelled(result)) => {
                tracing::info!(
                    completed = result.len(),
                    "Audiogram session cancelled"
                );
                self.emit(SessionEvent::Cancelled);
            }
            Err(e) => {
                tracing::error!(error = %e, "Audiogram session aborted");
                self.emit(SessionEvent::Failed {
                    message: e.to_string(),
                });
            }
        }
        outcome
    }

    fn measure_all(&mut self) -> Result<SessionOutcome, SessionError> {
        self.device.set_test_mode(true)?;

        let freqs = self.config.freqs_hz.clone();
        let total = freqs.len();
        let mut result = AudiogramResult::default();

        for (i, &freq_hz) in freqs.iter().enumerate() {
            if self.cancelled() {
                return Ok(SessionOutcome::Cancelled(result));
            }

            self.emit(SessionEvent::FrequencyStarted {
                index: i + 1,
                total,
                freq_hz,
            });
            self.device.set_freq(freq_hz as f64)?;
            self.sleep_ms(self.config.timing.settle_ms);

            let mut staircase = Staircase::new(self.config.staircase);
            while !staircase.done() {
                if self.cancelled() {
                    // partial data for this frequency is discarded
                    return Ok(SessionOutcome::Cancelled(result));
                }
                match self.run_trial(freq_hz, &staircase)? {
                    TrialEnd::Answered(correct) => staircase.update(correct),
                    TrialEnd::Interrupted => {
                        return Ok(SessionOutcome::Cancelled(result));
                    }
                }
                self.sleep_ms(self.config.timing.pause_ms);
            }

            let threshold_db = staircase.threshold();
            result.thresholds.insert(freq_hz, threshold_db);
            self.emit(SessionEvent::ThresholdRecorded {
                freq_hz,
                threshold_db,
            });
        }

        Ok(SessionOutcome::Complete(result))
    }

    /// Present both intervals, then wait for exactly one response.
    fn run_trial(
        &mut self,
        freq_hz: u32,
        staircase: &Staircase,
    ) -> Result<TrialEnd, SessionError> {
        let plan = self.sequencer.next_plan(freq_hz, staircase.current_level());

        for stimulus in plan.schedule(self.config.quiet_db) {
            self.emit(SessionEvent::PlayingInterval {
                interval: stimulus.interval,
            });
            self.device.set_level_db(stimulus.level_db)?;
            self.sleep_ms(self.config.timing.tone_ms);
            self.device.set_level_db(self.config.quiet_db)?;
            self.sleep_ms(self.config.timing.tail_ms);
            if stimulus.interval == Interval::A {
                self.sleep_ms(self.config.timing.gap_ms);
            }
        }

        // Answers pressed before both intervals finished do not count.
        while self.responses.try_recv().is_ok() {}

        self.emit(SessionEvent::AwaitingResponse {
            freq_hz,
            level_db: plan.level_db,
        });

        let poll = Duration::from_millis(self.config.timing.response_poll_ms.max(1));
        loop {
            if self.cancelled() {
                return Ok(TrialEnd::Interrupted);
            }
            match self.responses.recv_timeout(poll) {
                Ok(chosen) => return Ok(TrialEnd::Answered(plan.score(chosen))),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(TrialEnd::Interrupted),
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn emit(&self, event: SessionEvent) {
        // The foreground may have dropped its receiver; that is fine.
        let _ = self.events.send(event);
    }

    fn sleep_ms(&self, ms: u64) {
        if ms > 0 {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = AudiogramSession::new(FitConfig::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_finished());
    }

    #[test]
    fn test_join_before_start_fails() {
        let mut session = AudiogramSession::new(FitConfig::default());
        assert!(matches!(session.join(), Err(SessionError::NotStarted)));
    }

    #[test]
    fn test_respond_and_cancel_are_noops_when_idle() {
        let session = AudiogramSession::new(FitConfig::default());
        session.respond(Interval::A);
        session.cancel();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.canceller().is_none());
        assert!(session.events().is_none());
    }

    #[test]
    fn test_outcome_accessors() {
        let mut result = AudiogramResult::default();
        result.thresholds.insert(1000, -47.0);
        let complete = SessionOutcome::Complete(result.clone());
        assert!(complete.is_complete());
        assert_eq!(complete.result().len(), 1);
        let cancelled = SessionOutcome::Cancelled(result);
        assert!(!cancelled.is_complete());
        assert_eq!(cancelled.result().len(), 1);
    }
}
