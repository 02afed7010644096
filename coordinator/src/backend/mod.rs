//! Seams to the platform services the coordinator drives
//!
//! Everything behind these traits is owned by someone else: the sensor
//! recording engine, the camera frame source, the speech recognizer and
//! synthesizer, and the renderer. The coordinator only sequences calls into
//! them. [`sim`] provides in-process implementations for the host binary and
//! for tests.

pub mod sim;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capture::{SensorFrame, SensorKind, SourceGroupKind, StagingTexture};
use crate::recognition::{CompilationStatus, QualityHandler, ResultHandler, Subscription};

/// Errors reported by platform services
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

/// Sensor recording engine
///
/// Stateless from the coordinator's point of view: whether it is recording
/// is tracked by the recorder state machine, not queried from here.
#[async_trait]
pub trait RecordingEngine: Send + Sync {
    fn enable(&self, kind: SensorKind);

    /// Completes once the capture pipeline is ready and recording
    async fn start(&self) -> Result<(), BackendError>;

    /// Takes effect immediately
    fn stop(&self);
}

/// Pull-based access to the most recent camera frame
#[async_trait]
pub trait FrameSourceGroup: Send + Sync {
    async fn start(&self) -> Result<(), BackendError>;

    fn latest_frame(&self, kind: SensorKind) -> Option<SensorFrame>;
}

/// Opens the device-dependent capture objects
///
/// Called again after every device restore; previously opened objects are
/// dropped by then.
pub trait CaptureDevice: Send + Sync {
    fn open_recorder(&self) -> Result<Arc<dyn RecordingEngine>, BackendError>;

    fn open_source_group(
        &self,
        kind: SourceGroupKind,
        recorder: Arc<dyn RecordingEngine>,
    ) -> Result<Arc<dyn FrameSourceGroup>, BackendError>;
}

/// Allocates speech recognizers
pub trait RecognizerFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn Recognizer>, BackendError>;
}

/// A continuous speech recognizer
///
/// Handlers stay registered for as long as the returned [`Subscription`]
/// is alive.
#[async_trait]
pub trait Recognizer: Send + Sync {
    fn subscribe_results(&self, handler: ResultHandler) -> Subscription;

    fn subscribe_quality(&self, handler: QualityHandler) -> Subscription;

    /// Replace all constraints with a single phrase-list constraint
    fn set_constraints(&self, phrases: &[&str]);

    async fn compile_constraints(&self) -> Result<CompilationStatus, BackendError>;

    /// Fails with [`BackendError::PermissionDenied`] when microphone access is missing
    async fn start_continuous(&self) -> Result<(), BackendError>;

    async fn stop_continuous(&self) -> Result<(), BackendError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), BackendError>;
}

/// Fire-and-forget audio cues
pub trait CuePlayer: Send + Sync {
    fn play_cue(&self, cue: &str);
}

/// Renderer side of the CPU to GPU texture hand-off
pub trait TextureSink: Send + Sync {
    fn stage_for_upload(&self, texture: &StagingTexture);

    fn upload_staged_texture(&self);
}

/// The hologram that displays the camera preview
pub trait PreviewVisuals: Send {
    fn create_device_resources(&mut self);

    fn release_device_resources(&mut self);

    fn update(&mut self, elapsed: Duration);

    fn render(&mut self, texture: Option<&StagingTexture>);
}

/// Bundle of every service the coordinator talks to
pub struct Collaborators {
    pub device: Arc<dyn CaptureDevice>,
    pub recognizers: Arc<dyn RecognizerFactory>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub cues: Arc<dyn CuePlayer>,
    pub texture_sink: Arc<dyn TextureSink>,
    pub visuals: Box<dyn PreviewVisuals>,
}
