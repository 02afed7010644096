//! Observability events published by the coordinator
//!
//! Every state change of the recognition session, the recorder, the frame
//! source group and the ingestion step is broadcast as a [`CoordinatorEvent`].
//! Nothing in the coordinator depends on anyone listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::capture::FrameTimestamp;
use crate::command::Confidence;
use crate::recognition::RecognitionState;

pub type EventSender = broadcast::Sender<CoordinatorEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// The rendering space became available and one-time setup ran
    SpaceReady,

    RecognitionStateChanged { state: RecognitionState },

    /// A result passed the confidence filter and replaced the pending command
    CommandAccepted {
        text: String,
        confidence: Confidence,
    },

    /// A result was discarded for low confidence
    CommandRejected {
        text: String,
        confidence: Confidence,
    },

    RecorderStarting,

    RecorderStarted,

    RecorderStartFailed { reason: String },

    RecorderStopped,

    SourceGroupStarted,

    SourceGroupStartFailed { reason: String },

    /// A new camera frame was copied and scheduled for upload
    FrameIngested {
        timestamp: FrameTimestamp,
        width: u32,
        height: u32,
    },

    /// Ingestion hit a frame that violates the capture contract
    IngestFault { reason: String },

    DeviceLost,

    DeviceRestored,
}

impl std::fmt::Display for CoordinatorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorEvent::SpaceReady => write!(f, "SPACE_READY"),
            CoordinatorEvent::RecognitionStateChanged { state } => {
                write!(f, "RECOGNITION_STATE ({})", state)
            }
            CoordinatorEvent::CommandAccepted { text, confidence } => {
                write!(f, "COMMAND_ACCEPTED ('{}', {})", text, confidence)
            }
            CoordinatorEvent::CommandRejected { text, confidence } => {
                write!(f, "COMMAND_REJECTED ('{}', {})", text, confidence)
            }
            CoordinatorEvent::RecorderStarting => write!(f, "RECORDER_STARTING"),
            CoordinatorEvent::RecorderStarted => write!(f, "RECORDER_STARTED"),
            CoordinatorEvent::RecorderStartFailed { reason } => {
                write!(f, "RECORDER_START_FAILED ({})", reason)
            }
            CoordinatorEvent::RecorderStopped => write!(f, "RECORDER_STOPPED"),
            CoordinatorEvent::SourceGroupStarted => write!(f, "SOURCE_GROUP_STARTED"),
            CoordinatorEvent::SourceGroupStartFailed { reason } => {
                write!(f, "SOURCE_GROUP_START_FAILED ({})", reason)
            }
            CoordinatorEvent::FrameIngested {
                timestamp,
                width,
                height,
            } => write!(f, "FRAME_INGESTED ({} @ {}x{})", timestamp, width, height),
            CoordinatorEvent::IngestFault { reason } => write!(f, "INGEST_FAULT ({})", reason),
            CoordinatorEvent::DeviceLost => write!(f, "DEVICE_LOST"),
            CoordinatorEvent::DeviceRestored => write!(f, "DEVICE_RESTORED"),
        }
    }
}
