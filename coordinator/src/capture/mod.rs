//! Camera preview capture
//!
//! Frame types, the staging texture, and the ingestion step that moves the
//! newest camera frame into it once per tick.

mod frame;
mod ingest;
mod staging;

use serde::{Deserialize, Serialize};

pub use frame::{
    Extent, FrameCursor, FrameTimestamp, PixelBuffer, PixelFormat, SensorFrame, SensorKind,
    SourceGroupKind,
};
pub use ingest::{FrameIngestor, IngestError, IngestOutcome};
pub use staging::{StagingTexture, StagingWrite, STAGING_FORMAT};

/// Start progress of the frame source group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceGroupState {
    #[default]
    Stopped,
    Starting,
    Started,
}

impl std::fmt::Display for SourceGroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceGroupState::Stopped => write!(f, "Stopped"),
            SourceGroupState::Starting => write!(f, "Starting"),
            SourceGroupState::Started => write!(f, "Started"),
        }
    }
}
