//! Continuous speech recognition of the start/stop vocabulary
//!
//! [`RecognitionSessionManager`] owns the recognizer lifecycle:
//! stop the existing session, build a new recognizer, subscribe handlers,
//! compile the phrase list and start listening. Accepted results land in the
//! [`CommandSlot`](crate::command::CommandSlot).

mod session;
mod subscription;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::Confidence;

pub use session::{RecognitionError, RecognitionSessionManager};
pub use subscription::Subscription;

/// Lifecycle of the recognition session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionState {
    #[default]
    Uninitialized,
    Stopping,
    Initializing,
    CompilingConstraints,
    Listening,
    Failed,
}

impl std::fmt::Display for RecognitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionState::Uninitialized => write!(f, "Uninitialized"),
            RecognitionState::Stopping => write!(f, "Stopping"),
            RecognitionState::Initializing => write!(f, "Initializing"),
            RecognitionState::CompilingConstraints => write!(f, "CompilingConstraints"),
            RecognitionState::Listening => write!(f, "Listening"),
            RecognitionState::Failed => write!(f, "Failed"),
        }
    }
}

/// One recognized utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: Confidence,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Audio problems reported while the recognizer is listening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioProblem {
    TooFast,
    TooSlow,
    TooQuiet,
    TooLoud,
    TooNoisy,
    NoSignal,
    Unknown,
}

impl AudioProblem {
    pub fn describe(self) -> &'static str {
        match self {
            AudioProblem::TooFast => "speech too fast",
            AudioProblem::TooSlow => "speech too slow",
            AudioProblem::TooQuiet => "speech too quiet",
            AudioProblem::TooLoud => "speech too loud",
            AudioProblem::TooNoisy => "too much background noise",
            AudioProblem::NoSignal => "no audio signal",
            AudioProblem::Unknown => "unspecified audio problem",
        }
    }
}

/// Outcome reported by constraint compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationStatus {
    Success,
    TopicLanguageNotSupported,
    GrammarLanguageMismatch,
    GrammarCompilationFailure,
    AudioQualityFailure,
    MicrophoneUnavailable,
    Unknown,
}

pub type ResultHandler = Arc<dyn Fn(RecognitionResult) + Send + Sync>;

pub type QualityHandler = Arc<dyn Fn(AudioProblem) + Send + Sync>;
