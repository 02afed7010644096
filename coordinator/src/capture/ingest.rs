//! Per-tick camera frame ingestion
//!
//! Pulls the newest photo/video frame, skips it if it was already consumed,
//! copies it into the staging texture and hands the texture to the renderer
//! for upload. The capture pipeline is configured to deliver BGRA8 frames, so
//! any other format or size is a contract fault rather than a recoverable
//! condition.

use tracing::{debug, info};

use crate::backend::{FrameSourceGroup, TextureSink};

use super::frame::{Extent, FrameCursor, FrameTimestamp, PixelFormat, SensorKind};
use super::staging::{StagingTexture, STAGING_FORMAT};

/// Contract faults that abort the ingestion step of a tick
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("frame pixel format is {actual:?}, capture pipeline must deliver {expected:?}")]
    PixelFormat {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    #[error("frame is {frame} but the staging texture was allocated as {staging}")]
    DimensionMismatch { staging: Extent, frame: Extent },

    #[error("frame holds {actual} bytes, staging texture needs exactly {expected}")]
    ByteLength { expected: usize, actual: usize },
}

/// What a single ingestion step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The source has no frame yet
    NoFrame,
    /// The newest frame was already consumed
    Duplicate(FrameTimestamp),
    /// The frame was copied and scheduled for upload
    Uploaded {
        timestamp: FrameTimestamp,
        extent: Extent,
    },
}

/// Owns the frame cursor and the staging texture
#[derive(Debug, Default)]
pub struct FrameIngestor {
    cursor: FrameCursor,
    staging: Option<StagingTexture>,
}

impl FrameIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staging(&self) -> Option<&StagingTexture> {
        self.staging.as_ref()
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    /// Drop the staging texture and forget the last consumed frame
    pub fn reset(&mut self) {
        self.staging = None;
        self.cursor.reset();
    }

    /// Run one ingestion step against a started source group
    pub fn ingest(
        &mut self,
        source: &dyn FrameSourceGroup,
        sink: &dyn TextureSink,
    ) -> Result<IngestOutcome, IngestError> {
        let Some(frame) = source.latest_frame(SensorKind::PhotoVideo) else {
            return Ok(IngestOutcome::NoFrame);
        };

        // Advanced before validation so a faulty frame is not retried every tick
        if !self.cursor.advance(frame.timestamp) {
            debug!(timestamp = %frame.timestamp, "frame already consumed");
            return Ok(IngestOutcome::Duplicate(frame.timestamp));
        }

        let bitmap = &frame.bitmap;
        let staging = self.staging.get_or_insert_with(|| {
            info!(extent = %bitmap.extent(), "allocating staging texture");
            StagingTexture::new(bitmap.extent())
        });

        if bitmap.format() != STAGING_FORMAT {
            return Err(IngestError::PixelFormat {
                expected: STAGING_FORMAT,
                actual: bitmap.format(),
            });
        }

        if bitmap.extent() != staging.extent() {
            return Err(IngestError::DimensionMismatch {
                staging: staging.extent(),
                frame: bitmap.extent(),
            });
        }

        let pixels = bitmap.lock_read();
        if pixels.len() != staging.byte_len() {
            return Err(IngestError::ByteLength {
                expected: staging.byte_len(),
                actual: pixels.len(),
            });
        }

        staging.map_write().copy_from_slice(pixels);

        sink.stage_for_upload(staging);
        sink.upload_staged_texture();

        debug!(timestamp = %frame.timestamp, "frame staged for upload");

        Ok(IngestOutcome::Uploaded {
            timestamp: frame.timestamp,
            extent: staging.extent(),
        })
    }
}
