//! Voice-driven recorder control
//!
//! Provides an explicit state machine with four states:
//! - Stopped: Default state, a "start" command begins recording
//! - Starting: Provisional, until the engine's asynchronous start completes
//! - Running: Recording, a "stop" command ends it
//! - Stopping: Transient, while the engine's immediate stop is issued

mod machine;

pub use machine::{RecorderState, RecorderStateMachine, TickAction};
