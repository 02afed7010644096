//! Voice commands and the single-slot mailbox that carries them
//!
//! The recognizer callback writes into a [`CommandSlot`]; the tick driver
//! takes at most one command out of it per tick. Nothing is queued: a newer
//! command overwrites an older one that has not been consumed yet.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// The fixed phrase list compiled into every recognition session
pub const VOCABULARY: [&str; 2] = [CommandKind::Start.as_str(), CommandKind::Stop.as_str()];

/// Reliability tier attached to a recognized utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Rejected,
}

impl Confidence {
    /// Medium is good enough for a two-phrase vocabulary
    pub fn is_actionable(self) -> bool {
        matches!(self, Confidence::High | Confidence::Medium)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
            Confidence::Rejected => write!(f, "rejected"),
        }
    }
}

/// The recorder-facing meaning of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
}

impl CommandKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
        }
    }

    /// Map recognized text onto a command; only the exact vocabulary matches
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "start" => Some(CommandKind::Start),
            "stop" => Some(CommandKind::Stop),
            _ => None,
        }
    }
}

/// A recognized command waiting for the next tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCommand {
    pub text: String,
    pub confidence: Confidence,
}

impl VoiceCommand {
    pub fn new(text: impl Into<String>, confidence: Confidence) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::parse(&self.text)
    }
}

/// Shared single-slot mailbox
///
/// Clones share the same slot, so the recognizer callback and the tick
/// driver each hold one.
#[derive(Debug, Clone, Default)]
pub struct CommandSlot {
    inner: Arc<Mutex<Option<VoiceCommand>>>,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a command, returning the unconsumed one it replaced
    pub fn put(&self, command: VoiceCommand) -> Option<VoiceCommand> {
        self.lock().replace(command)
    }

    /// Read and clear the slot in one step
    pub fn take(&self) -> Option<VoiceCommand> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<VoiceCommand>> {
        // A panicking writer cannot leave an Option half-written
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
