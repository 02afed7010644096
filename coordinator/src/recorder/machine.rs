//! Core recorder state machine
//!
//! Handles transitions between Stopped, Starting, Running and Stopping in
//! response to voice commands. Starting is provisional: the engine's
//! asynchronous start resolves it to Running (or back to Stopped on
//! failure). Stopping is immediate and resolves within the same tick.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::backend::RecordingEngine;
use crate::command::CommandKind;
use crate::events::{CoordinatorEvent, EventSender};

/// The four possible states of the recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    /// Not recording, ready for a start command
    #[default]
    Stopped,
    /// Start issued, waiting for the engine to become ready
    Starting,
    /// Recording
    Running,
    /// Stop issued to the engine
    Stopping,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Stopped => write!(f, "Stopped"),
            RecorderState::Starting => write!(f, "Starting"),
            RecorderState::Running => write!(f, "Running"),
            RecorderState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// What a tick asked of the recording engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing was issued
    Idle,
    StartIssued,
    StopIssued,
}

/// Drives one recording engine from voice commands
pub struct RecorderStateMachine {
    engine: Arc<dyn RecordingEngine>,
    /// The in-flight start completion holds only a weak reference
    state: Arc<watch::Sender<RecorderState>>,
    /// When the current recording was requested
    started_at: Option<Instant>,
    runtime: Handle,
    events: EventSender,
}

impl RecorderStateMachine {
    /// Create a new state machine in the Stopped state
    pub fn new(engine: Arc<dyn RecordingEngine>, runtime: Handle, events: EventSender) -> Self {
        let (state, _) = watch::channel(RecorderState::Stopped);
        Self {
            engine,
            state: Arc::new(state),
            started_at: None,
            runtime,
            events,
        }
    }

    /// Get the current state
    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    /// Watch state changes, including async start completions
    pub fn subscribe(&self) -> watch::Receiver<RecorderState> {
        self.state.subscribe()
    }

    /// Apply this tick's command, if any
    pub fn on_tick(&mut self, command: Option<CommandKind>) -> TickAction {
        match command {
            Some(CommandKind::Start) => self.request_start(),
            Some(CommandKind::Stop) => self.request_stop(),
            None => TickAction::Idle,
        }
    }

    fn request_start(&mut self) -> TickAction {
        let issued = self.state.send_if_modified(|state| {
            if *state == RecorderState::Stopped {
                *state = RecorderState::Starting;
                true
            } else {
                false
            }
        });

        if !issued {
            debug!(state = %self.state(), "start command ignored");
            return TickAction::Idle;
        }

        info!(
            from = %RecorderState::Stopped,
            to = %RecorderState::Starting,
            "recorder transition"
        );
        let _ = self.events.send(CoordinatorEvent::RecorderStarting);
        self.started_at = Some(Instant::now());

        let engine = Arc::clone(&self.engine);
        // A dropped machine must not hear about its start
        let state = Arc::downgrade(&self.state);
        let events = self.events.clone();

        self.runtime.spawn(async move {
            let result = engine.start().await;
            let next = if result.is_ok() {
                RecorderState::Running
            } else {
                RecorderState::Stopped
            };
            let resolved = state.upgrade().is_some_and(|state| {
                state.send_if_modified(|state| {
                    if *state == RecorderState::Starting {
                        *state = next;
                        true
                    } else {
                        false
                    }
                })
            });

            if !resolved {
                debug!(to = %next, "stale recorder start completion dropped");
                return;
            }

            match result {
                Ok(()) => {
                    info!(
                        from = %RecorderState::Starting,
                        to = %RecorderState::Running,
                        "recorder transition"
                    );
                    let _ = events.send(CoordinatorEvent::RecorderStarted);
                }
                Err(e) => {
                    error!(error = %e, "recorder failed to start");
                    let _ = events.send(CoordinatorEvent::RecorderStartFailed {
                        reason: e.to_string(),
                    });
                }
            }
        });

        TickAction::StartIssued
    }

    fn request_stop(&mut self) -> TickAction {
        let stopping = self.state.send_if_modified(|state| {
            if *state == RecorderState::Running {
                *state = RecorderState::Stopping;
                true
            } else {
                false
            }
        });

        if !stopping {
            debug!(state = %self.state(), "stop command ignored");
            return TickAction::Idle;
        }

        self.engine.stop();
        self.state.send_replace(RecorderState::Stopped);

        let duration_ms = self
            .started_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %RecorderState::Running,
            to = %RecorderState::Stopped,
            duration_ms = duration_ms,
            "recorder transition"
        );
        let _ = self.events.send(CoordinatorEvent::RecorderStopped);

        TickAction::StopIssued
    }
}
