//! Recognition session lifecycle
//!
//! `restart` is a sequential pipeline: stop the running session and release
//! its handlers, allocate a recognizer, subscribe, compile the phrase list,
//! start listening. Each step short-circuits into [`RecognitionError`].
//! Handlers acquired by a failed attempt are released before `restart`
//! returns, so at most one handler pair is ever registered.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, CuePlayer, Recognizer, RecognizerFactory};
use crate::command::{CommandSlot, VoiceCommand, VOCABULARY};
use crate::events::{CoordinatorEvent, EventSender};

use super::subscription::SubscriptionPair;
use super::{AudioProblem, CompilationStatus, RecognitionResult, RecognitionState};

/// Why a recognition session could not be brought up
///
/// None of these are fatal: the session is left in
/// [`RecognitionState::Failed`] and the rest of the coordinator keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("speech recognizer unavailable: {0}")]
    RecognitionUnavailable(#[source] BackendError),

    #[error("constraint compilation failed: {0}")]
    ConstraintCompilationFailed(String),

    #[error("failed to start continuous recognition: {0}")]
    ListenStartFailed(#[source] BackendError),
}

impl RecognitionError {
    /// Listening was refused for lack of microphone permission
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            RecognitionError::ListenStartFailed(BackendError::PermissionDenied(_))
        )
    }
}

/// A listening recognizer together with its handler registrations
struct ActiveSession {
    recognizer: Arc<dyn Recognizer>,
    subscriptions: SubscriptionPair,
}

impl ActiveSession {
    async fn shutdown(self) {
        if let Err(e) = self.recognizer.stop_continuous().await {
            warn!(error = %e, "recognizer did not stop cleanly");
        }
        self.subscriptions.release();
    }
}

/// Result handler: lets confident results into the command slot
struct CommandFilter {
    commands: CommandSlot,
    cues: Arc<dyn CuePlayer>,
    cue: String,
    events: EventSender,
}

impl CommandFilter {
    fn handle(&self, result: RecognitionResult) {
        if !result.confidence.is_actionable() {
            warn!(
                text = %result.text,
                confidence = %result.confidence,
                "recognition confidence too low, result discarded"
            );
            let _ = self.events.send(CoordinatorEvent::CommandRejected {
                text: result.text,
                confidence: result.confidence,
            });
            return;
        }

        info!(
            text = %result.text,
            confidence = %result.confidence,
            "voice command recognized"
        );

        let command = VoiceCommand::new(result.text.clone(), result.confidence);
        if let Some(previous) = self.commands.put(command) {
            debug!(previous = %previous.text, "unconsumed command overwritten");
        }

        let _ = self.events.send(CoordinatorEvent::CommandAccepted {
            text: result.text,
            confidence: result.confidence,
        });

        self.cues.play_cue(&self.cue);
    }
}

fn report_quality(problem: AudioProblem) {
    warn!(?problem, "recognition quality degraded: {}", problem.describe());
}

/// Owns the one continuous recognition session
pub struct RecognitionSessionManager {
    factory: Arc<dyn RecognizerFactory>,
    filter: Arc<CommandFilter>,
    active: Mutex<Option<ActiveSession>>,
    state: watch::Sender<RecognitionState>,
    events: EventSender,
}

impl RecognitionSessionManager {
    pub fn new(
        factory: Arc<dyn RecognizerFactory>,
        commands: CommandSlot,
        cues: Arc<dyn CuePlayer>,
        cue: impl Into<String>,
        events: EventSender,
    ) -> Self {
        let filter = Arc::new(CommandFilter {
            commands,
            cues,
            cue: cue.into(),
            events: events.clone(),
        });
        let (state, _) = watch::channel(RecognitionState::Uninitialized);

        Self {
            factory,
            filter,
            active: Mutex::new(None),
            state,
            events,
        }
    }

    /// Get the current session state
    pub fn state(&self) -> RecognitionState {
        *self.state.borrow()
    }

    /// Watch session state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RecognitionState> {
        self.state.subscribe()
    }

    /// Tear down any running session and bring up a fresh one
    ///
    /// Concurrent calls run one after the other.
    pub async fn restart(&self) -> Result<(), RecognitionError> {
        let mut active = self.active.lock().await;

        if let Some(session) = active.take() {
            self.set_state(RecognitionState::Stopping);
            session.shutdown().await;
        }

        self.set_state(RecognitionState::Initializing);

        match self.build_session().await {
            Ok(session) => {
                *active = Some(session);
                self.set_state(RecognitionState::Listening);
                Ok(())
            }
            Err(e) => {
                if e.is_permission_denied() {
                    warn!(error = %e, "microphone permission missing, voice commands disabled");
                } else {
                    error!(error = %e, "recognition session failed to start");
                }
                self.set_state(RecognitionState::Failed);
                Err(e)
            }
        }
    }

    /// Stop the running session without starting another
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            self.set_state(RecognitionState::Stopping);
            session.shutdown().await;
            self.set_state(RecognitionState::Uninitialized);
        }
    }

    async fn build_session(&self) -> Result<ActiveSession, RecognitionError> {
        let recognizer = self
            .factory
            .create()
            .map_err(RecognitionError::RecognitionUnavailable)?;

        let filter = Arc::clone(&self.filter);
        let subscriptions = SubscriptionPair::new(
            recognizer.subscribe_quality(Arc::new(report_quality)),
            recognizer.subscribe_results(Arc::new(move |result| filter.handle(result))),
        );

        self.set_state(RecognitionState::CompilingConstraints);
        recognizer.set_constraints(&VOCABULARY);

        let status = recognizer
            .compile_constraints()
            .await
            .map_err(|e| RecognitionError::ConstraintCompilationFailed(e.to_string()))?;

        if status != CompilationStatus::Success {
            return Err(RecognitionError::ConstraintCompilationFailed(format!(
                "status {:?}",
                status
            )));
        }

        recognizer
            .start_continuous()
            .await
            .map_err(RecognitionError::ListenStartFailed)?;

        Ok(ActiveSession {
            recognizer,
            subscriptions,
        })
    }

    fn set_state(&self, new_state: RecognitionState) {
        let old_state = self.state.send_replace(new_state);
        if old_state == new_state {
            return;
        }

        info!(from = %old_state, to = %new_state, "recognition transition");
        let _ = self
            .events
            .send(CoordinatorEvent::RecognitionStateChanged { state: new_state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::{RecognizerBehavior, SimCuePlayer, SimRecognizerFactory};
    use crate::command::{CommandKind, Confidence};
    use tokio::sync::broadcast;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        manager: RecognitionSessionManager,
        factory: Arc<SimRecognizerFactory>,
        cues: Arc<SimCuePlayer>,
        commands: CommandSlot,
    }

    fn fixture(behavior: RecognizerBehavior) -> Fixture {
        let factory = Arc::new(SimRecognizerFactory::new(behavior));
        let cues = Arc::new(SimCuePlayer::new());
        let commands = CommandSlot::new();
        let (events, _) = broadcast::channel(16);
        let manager = RecognitionSessionManager::new(
            factory.clone(),
            commands.clone(),
            cues.clone(),
            "earcon.wav",
            events,
        );
        Fixture {
            manager,
            factory,
            cues,
            commands,
        }
    }

    #[tokio::test]
    async fn test_restart_starts_listening() {
        let fx = fixture(RecognizerBehavior::default());
        assert_eq!(fx.manager.state(), RecognitionState::Uninitialized);
        let mut states = fx.manager.subscribe_state();

        assert_ok!(fx.manager.restart().await);
        assert_eq!(fx.manager.state(), RecognitionState::Listening);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), RecognitionState::Listening);

        let recognizer = fx.factory.latest().unwrap();
        assert_eq!(recognizer.constraints(), vec!["start", "stop"]);
        assert_eq!(recognizer.start_calls(), 1);
        assert_eq!(recognizer.live_subscriptions(), 2);
        assert!(recognizer.is_listening());
    }

    #[tokio::test]
    async fn test_restart_replaces_previous_session() {
        let fx = fixture(RecognizerBehavior::default());
        assert_ok!(fx.manager.restart().await);
        let first = fx.factory.latest().unwrap();

        assert_ok!(fx.manager.restart().await);
        let second = fx.factory.latest().unwrap();

        assert_eq!(fx.factory.created(), 2);
        assert_eq!(first.stop_calls(), 1);
        assert_eq!(first.live_subscriptions(), 0);
        assert_eq!(second.live_subscriptions(), 2);

        // Results from the retired recognizer go nowhere
        first.emit_result("start", Confidence::High);
        assert!(fx.commands.is_empty());
        second.emit_result("start", Confidence::High);
        assert!(!fx.commands.is_empty());
    }

    #[tokio::test]
    async fn test_compile_failure_never_listens() {
        let fx = fixture(RecognizerBehavior {
            compile_status: CompilationStatus::GrammarCompilationFailure,
            ..Default::default()
        });

        let err = assert_err!(fx.manager.restart().await);
        assert!(matches!(err, RecognitionError::ConstraintCompilationFailed(_)));
        assert_eq!(fx.manager.state(), RecognitionState::Failed);

        let recognizer = fx.factory.latest().unwrap();
        assert_eq!(recognizer.start_calls(), 0);
        assert_eq!(recognizer.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_compile_error_maps_to_compilation_failure() {
        let fx = fixture(RecognizerBehavior {
            compile_error: Some(BackendError::Failed("engine crashed".into())),
            ..Default::default()
        });

        let err = assert_err!(fx.manager.restart().await);
        assert!(matches!(err, RecognitionError::ConstraintCompilationFailed(_)));
        assert_eq!(fx.manager.state(), RecognitionState::Failed);
    }

    #[tokio::test]
    async fn test_unavailable_recognizer() {
        let fx = fixture(RecognizerBehavior {
            unavailable: true,
            ..Default::default()
        });

        let err = assert_err!(fx.manager.restart().await);
        assert!(matches!(err, RecognitionError::RecognitionUnavailable(_)));
        assert_eq!(fx.manager.state(), RecognitionState::Failed);
        assert_eq!(fx.factory.created(), 0);
    }

    #[tokio::test]
    async fn test_missing_permission_fails_listen_start() {
        let fx = fixture(RecognizerBehavior {
            start_error: Some(BackendError::PermissionDenied("microphone".into())),
            ..Default::default()
        });

        let err = assert_err!(fx.manager.restart().await);
        assert!(err.is_permission_denied());
        assert_eq!(fx.manager.state(), RecognitionState::Failed);
        assert_eq!(fx.factory.latest().unwrap().live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_restart_recovers_after_failure() {
        let fx = fixture(RecognizerBehavior {
            compile_status: CompilationStatus::Unknown,
            ..Default::default()
        });
        assert_err!(fx.manager.restart().await);

        fx.factory.set_behavior(RecognizerBehavior::default());
        assert_ok!(fx.manager.restart().await);
        assert_eq!(fx.manager.state(), RecognitionState::Listening);
    }

    #[tokio::test]
    async fn test_low_confidence_never_reaches_slot() {
        let fx = fixture(RecognizerBehavior::default());
        assert_ok!(fx.manager.restart().await);
        let recognizer = fx.factory.latest().unwrap();

        recognizer.emit_result("start", Confidence::Low);
        recognizer.emit_result("stop", Confidence::Rejected);
        assert!(fx.commands.is_empty());
        assert_eq!(fx.cues.played().len(), 0);

        // A pending command is not overwritten by a rejected one
        recognizer.emit_result("start", Confidence::Medium);
        recognizer.emit_result("stop", Confidence::Low);
        let command = fx.commands.take().unwrap();
        assert_eq!(command.kind(), Some(CommandKind::Start));
        assert_eq!(fx.cues.played(), vec!["earcon.wav".to_string()]);
    }

    #[tokio::test]
    async fn test_last_accepted_result_wins() {
        let fx = fixture(RecognizerBehavior::default());
        assert_ok!(fx.manager.restart().await);
        let recognizer = fx.factory.latest().unwrap();

        recognizer.emit_result("start", Confidence::High);
        recognizer.emit_result("stop", Confidence::High);

        assert_eq!(fx.commands.take().unwrap().kind(), Some(CommandKind::Stop));
        assert_eq!(fx.cues.played().len(), 2);
    }

    #[tokio::test]
    async fn test_quality_degradation_leaves_state() {
        let fx = fixture(RecognizerBehavior::default());
        assert_ok!(fx.manager.restart().await);
        let recognizer = fx.factory.latest().unwrap();

        recognizer.emit_quality(AudioProblem::TooNoisy);
        recognizer.emit_quality(AudioProblem::NoSignal);

        assert_eq!(fx.manager.state(), RecognitionState::Listening);
        assert!(fx.commands.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_session() {
        let fx = fixture(RecognizerBehavior::default());
        assert_ok!(fx.manager.restart().await);
        let recognizer = fx.factory.latest().unwrap();

        fx.manager.shutdown().await;
        assert_eq!(fx.manager.state(), RecognitionState::Uninitialized);
        assert!(!recognizer.is_listening());
        assert_eq!(recognizer.live_subscriptions(), 0);
    }
}
