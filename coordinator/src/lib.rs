//! voice-capture-coordinator: voice-commanded camera capture
//!
//! Listens for the spoken commands "start" and "stop", drives a recording
//! engine through an explicit state machine, and streams the newest camera
//! frame into a staging texture for preview rendering once per tick.

pub mod backend;
pub mod capture;
pub mod command;
pub mod config;
pub mod driver;
pub mod events;
pub mod lifecycle;
pub mod recognition;
pub mod recorder;
