//! Tick driver
//!
//! Owns the recognition session, the recorder state machine and the frame
//! ingestor, and sequences them from the host's lifecycle hooks.

mod coordinator;

pub use coordinator::{Coordinator, FrameStep, TickReport};
