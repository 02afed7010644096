//! Per-frame coordinator
//!
//! The host render loop calls the lifecycle hooks on this type and nothing
//! else. Within a tick the order is fixed: advance visuals, take the pending
//! voice command and apply it to the recorder, then ingest the newest camera
//! frame. Asynchronous completions (recorder start, source group start,
//! recognition restart, speech synthesis) run on the tokio runtime and only
//! touch state through `watch` channels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{
    BackendError, CaptureDevice, Collaborators, FrameSourceGroup, PreviewVisuals,
    SpeechSynthesizer, TextureSink,
};
use crate::capture::{
    FrameCursor, FrameIngestor, IngestError, IngestOutcome, SensorKind, SourceGroupKind,
    SourceGroupState, StagingTexture,
};
use crate::command::{CommandSlot, VoiceCommand};
use crate::config::Config;
use crate::events::{CoordinatorEvent, EventSender};
use crate::recognition::{RecognitionError, RecognitionSessionManager, RecognitionState};
use crate::recorder::{RecorderState, RecorderStateMachine, TickAction};

/// What the frame ingestion step did this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStep {
    /// No started source group to pull from
    SourceNotStarted,
    Ingested(IngestOutcome),
    /// The frame violated the capture contract and was skipped
    Fault(IngestError),
}

/// Summary of one tick, mostly for tests and diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub recorder: TickAction,
    pub frame: FrameStep,
}

/// Device-dependent capture objects, recreated after every device restore
struct CaptureSession {
    recorder: RecorderStateMachine,
    source_group: Arc<dyn FrameSourceGroup>,
    /// The in-flight source group start holds only a weak reference
    source_state: Arc<watch::Sender<SourceGroupState>>,
}

impl CaptureSession {
    fn source_state(&self) -> SourceGroupState {
        *self.source_state.borrow()
    }
}

pub struct Coordinator {
    config: Config,
    runtime: Handle,
    device: Arc<dyn CaptureDevice>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    texture_sink: Arc<dyn TextureSink>,
    visuals: Box<dyn PreviewVisuals>,
    visuals_ready: bool,
    recognition: Arc<RecognitionSessionManager>,
    commands: CommandSlot,
    capture: Option<CaptureSession>,
    ingestor: FrameIngestor,
    events: EventSender,
}

impl Coordinator {
    /// Create a coordinator; nothing starts until `on_space_ready`
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        runtime: Handle,
        events: EventSender,
    ) -> Self {
        let commands = CommandSlot::new();
        let recognition = Arc::new(RecognitionSessionManager::new(
            collaborators.recognizers,
            commands.clone(),
            collaborators.cues,
            config.recognition_cue_id(),
            events.clone(),
        ));

        Self {
            config,
            runtime,
            device: collaborators.device,
            synthesizer: collaborators.synthesizer,
            texture_sink: collaborators.texture_sink,
            visuals: collaborators.visuals,
            visuals_ready: false,
            recognition,
            commands,
            capture: None,
            ingestor: FrameIngestor::new(),
            events,
        }
    }

    /// Subscribe to coordinator events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Get the recognition session manager
    pub fn recognition(&self) -> Arc<RecognitionSessionManager> {
        Arc::clone(&self.recognition)
    }

    /// Get the current recognition state
    pub fn recognition_state(&self) -> RecognitionState {
        self.recognition.state()
    }

    /// Get the recorder state, None while no capture session is open
    pub fn recorder_state(&self) -> Option<RecorderState> {
        self.capture.as_ref().map(|c| c.recorder.state())
    }

    /// Watch the current recorder, if a capture session is open
    pub fn subscribe_recorder(&self) -> Option<watch::Receiver<RecorderState>> {
        self.capture.as_ref().map(|c| c.recorder.subscribe())
    }

    /// Get the frame source group state, Stopped while no capture session is open
    pub fn source_group_state(&self) -> SourceGroupState {
        self.capture
            .as_ref()
            .map_or(SourceGroupState::Stopped, CaptureSession::source_state)
    }

    /// Watch the current frame source group, if a capture session is open
    pub fn subscribe_source_group(&self) -> Option<watch::Receiver<SourceGroupState>> {
        self.capture.as_ref().map(|c| c.source_state.subscribe())
    }

    /// The texture handed to the renderer, if a frame has been ingested
    pub fn preview_texture(&self) -> Option<&StagingTexture> {
        self.ingestor.staging()
    }

    /// Get the timestamp of the last consumed frame
    pub fn frame_cursor(&self) -> FrameCursor {
        self.ingestor.cursor()
    }

    /// One-time setup once the rendering space exists
    ///
    /// Creates the preview visuals, opens and starts the photo/video source
    /// group, speaks the voice prompt and restarts speech recognition. The
    /// returned handle resolves when recognition is listening or has failed.
    pub fn on_space_ready(&mut self) -> JoinHandle<Result<(), RecognitionError>> {
        info!("rendering space ready");

        self.create_visuals();
        self.start_source_group();
        self.begin_voice_prompt();

        let _ = self.events.send(CoordinatorEvent::SpaceReady);

        let recognition = Arc::clone(&self.recognition);
        self.runtime.spawn(async move { recognition.restart().await })
    }

    /// Advance the coordinator by one frame
    pub fn on_tick(&mut self, elapsed: Duration) -> TickReport {
        let tick_started = Instant::now();

        self.visuals.update(elapsed);

        // Taking clears the slot whether or not the command is usable
        let command = self.commands.take();
        let recorder = self.apply_command(command);
        let frame = self.ingest_frame();

        let took = tick_started.elapsed();
        if took > self.config.slow_tick_threshold {
            warn!(
                elapsed_ms = took.as_millis() as u64,
                threshold_ms = self.config.slow_tick_threshold.as_millis() as u64,
                "slow tick"
            );
        }

        TickReport { recorder, frame }
    }

    /// Hand the current preview texture to the visuals
    pub fn on_render(&mut self) {
        self.visuals.render(self.ingestor.staging());
    }

    /// Release everything that depends on the graphics device
    ///
    /// The recognition session is independent of the device and keeps running.
    pub fn on_device_lost(&mut self) {
        info!("device lost, releasing device resources");

        if self.visuals_ready {
            self.visuals.release_device_resources();
            self.visuals_ready = false;
        }

        if let Some(capture) = self.capture.take() {
            debug!(
                recorder = %capture.recorder.state(),
                source_group = %capture.source_state(),
                "dropping capture session"
            );
        }

        self.ingestor.reset();

        let _ = self.events.send(CoordinatorEvent::DeviceLost);
    }

    /// Recreate device resources and restart the frame source group
    pub fn on_device_restored(&mut self) {
        info!("device restored");

        self.create_visuals();
        self.start_source_group();

        let _ = self.events.send(CoordinatorEvent::DeviceRestored);
    }

    fn create_visuals(&mut self) {
        if self.visuals_ready {
            debug!("preview visuals already created");
            return;
        }
        self.visuals.create_device_resources();
        self.visuals_ready = true;
    }

    fn apply_command(&mut self, command: Option<VoiceCommand>) -> TickAction {
        let kind = command.as_ref().and_then(|command| {
            let kind = command.kind();
            if kind.is_none() {
                debug!(text = %command.text, "not a recorder command");
            }
            kind
        });

        match self.capture.as_mut() {
            Some(capture) => capture.recorder.on_tick(kind),
            None => {
                if let Some(kind) = kind {
                    debug!(command = kind.as_str(), "no capture session, command dropped");
                }
                TickAction::Idle
            }
        }
    }

    fn ingest_frame(&mut self) -> FrameStep {
        let Some(capture) = &self.capture else {
            return FrameStep::SourceNotStarted;
        };
        if capture.source_state() != SourceGroupState::Started {
            return FrameStep::SourceNotStarted;
        }

        match self
            .ingestor
            .ingest(capture.source_group.as_ref(), self.texture_sink.as_ref())
        {
            Ok(outcome) => {
                if let IngestOutcome::Uploaded { timestamp, extent } = outcome {
                    let _ = self.events.send(CoordinatorEvent::FrameIngested {
                        timestamp,
                        width: extent.width,
                        height: extent.height,
                    });
                }
                FrameStep::Ingested(outcome)
            }
            Err(e) => {
                error!(error = %e, "frame violates capture contract, ingestion skipped");
                let _ = self.events.send(CoordinatorEvent::IngestFault {
                    reason: e.to_string(),
                });
                FrameStep::Fault(e)
            }
        }
    }

    /// Open the recorder and source group and start the group, unless a
    /// start is already in flight or has succeeded
    fn start_source_group(&mut self) {
        match self.capture.as_ref().map(CaptureSession::source_state) {
            Some(state @ (SourceGroupState::Starting | SourceGroupState::Started)) => {
                warn!(%state, "frame source group already started, start skipped");
                return;
            }
            Some(SourceGroupState::Stopped) => {
                info!("previous frame source group start failed, reopening");
                self.capture = None;
            }
            None => {}
        }

        let capture = match self.open_capture() {
            Ok(capture) => capture,
            Err(e) => {
                error!(error = %e, "failed to open capture device");
                let _ = self.events.send(CoordinatorEvent::SourceGroupStartFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        capture.source_state.send_replace(SourceGroupState::Starting);

        let source_group = Arc::clone(&capture.source_group);
        // A dropped capture session must not hear about its start
        let state = Arc::downgrade(&capture.source_state);
        let events = self.events.clone();

        self.runtime.spawn(async move {
            let result = source_group.start().await;
            let next = if result.is_ok() {
                SourceGroupState::Started
            } else {
                SourceGroupState::Stopped
            };
            let resolved = state.upgrade().is_some_and(|state| {
                state.send_if_modified(|state| {
                    if *state == SourceGroupState::Starting {
                        *state = next;
                        true
                    } else {
                        false
                    }
                })
            });

            if !resolved {
                debug!(to = %next, "stale frame source group start completion dropped");
                return;
            }

            match result {
                Ok(()) => {
                    info!("frame source group started");
                    let _ = events.send(CoordinatorEvent::SourceGroupStarted);
                }
                Err(e) => {
                    error!(error = %e, "frame source group failed to start");
                    let _ = events.send(CoordinatorEvent::SourceGroupStartFailed {
                        reason: e.to_string(),
                    });
                }
            }
        });

        self.capture = Some(capture);
    }

    fn open_capture(&self) -> Result<CaptureSession, BackendError> {
        let recorder = self.device.open_recorder()?;
        recorder.enable(SensorKind::PhotoVideo);

        let source_group = self
            .device
            .open_source_group(SourceGroupKind::PhotoVideoCamera, Arc::clone(&recorder))?;

        let (source_state, _) = watch::channel(SourceGroupState::Stopped);

        Ok(CaptureSession {
            recorder: RecorderStateMachine::new(recorder, self.runtime.clone(), self.events.clone()),
            source_group,
            source_state: Arc::new(source_state),
        })
    }

    fn begin_voice_prompt(&self) {
        let synthesizer = Arc::clone(&self.synthesizer);
        let prompt = self.config.voice_prompt.clone();

        self.runtime.spawn(async move {
            if let Err(e) = synthesizer.speak(&prompt).await {
                warn!(error = %e, "voice prompt could not be spoken");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::{
        bgra_frame, RecognizerBehavior, SimCaptureDevice, SimCuePlayer, SimRecognizerFactory,
        SimSynthesizer, SimTextureSink, SimVisuals,
    };
    use crate::capture::{Extent, FrameTimestamp, PixelBuffer, PixelFormat, SensorFrame};
    use crate::command::Confidence;
    use crate::recognition::CompilationStatus;
    use tokio_test::{assert_err, assert_ok};

    const TICK: Duration = Duration::from_millis(16);

    struct Harness {
        coordinator: Coordinator,
        device: Arc<SimCaptureDevice>,
        recognizers: Arc<SimRecognizerFactory>,
        synthesizer: Arc<SimSynthesizer>,
        cues: Arc<SimCuePlayer>,
        sink: Arc<SimTextureSink>,
        visuals: SimVisuals,
    }

    fn harness(behavior: RecognizerBehavior) -> Harness {
        let device = Arc::new(SimCaptureDevice::new());
        let recognizers = Arc::new(SimRecognizerFactory::new(behavior));
        let synthesizer = Arc::new(SimSynthesizer::new());
        let cues = Arc::new(SimCuePlayer::new());
        let sink = Arc::new(SimTextureSink::new());
        let visuals = SimVisuals::new();
        let (events, _) = broadcast::channel(64);

        let collaborators = Collaborators {
            device: device.clone(),
            recognizers: recognizers.clone(),
            synthesizer: synthesizer.clone(),
            cues: cues.clone(),
            texture_sink: sink.clone(),
            visuals: Box::new(visuals.clone()),
        };
        let coordinator =
            Coordinator::new(Config::default(), collaborators, Handle::current(), events);

        Harness {
            coordinator,
            device,
            recognizers,
            synthesizer,
            cues,
            sink,
            visuals,
        }
    }

    async fn settle<T: PartialEq>(mut rx: watch::Receiver<T>, target: T) {
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == target))
            .await
            .expect("state did not settle")
            .expect("state channel closed");
    }

    /// Space ready with recognition listening and the source group started
    async fn ready(behavior: RecognizerBehavior) -> Harness {
        let mut h = harness(behavior);
        let restart = h.coordinator.on_space_ready();
        let _ = restart.await.unwrap();
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
        h
    }

    async fn recorder_running(h: &mut Harness) {
        let recognizer = h.recognizers.latest().unwrap();
        recognizer.emit_result("start", Confidence::High);
        h.coordinator.on_tick(TICK);
        settle(
            h.coordinator.subscribe_recorder().unwrap(),
            RecorderState::Running,
        )
        .await;
    }

    #[tokio::test]
    async fn test_space_ready_sets_everything_up() {
        let mut h = harness(RecognizerBehavior::default());
        let restart = h.coordinator.on_space_ready();
        assert_ok!(restart.await.unwrap());

        assert_eq!(h.coordinator.recognition_state(), RecognitionState::Listening);
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;

        let recorder = h.device.latest_recorder().unwrap();
        assert_eq!(recorder.enabled(), vec![SensorKind::PhotoVideo]);
        assert_eq!(h.device.source_group_starts(), 1);
        assert_eq!(h.coordinator.recorder_state(), Some(RecorderState::Stopped));
        assert_eq!(h.visuals.stats().created, 1);

        tokio::task::yield_now().await;
        assert_eq!(
            h.synthesizer.spoken(),
            vec![Config::default().voice_prompt]
        );
    }

    #[tokio::test]
    async fn test_repeated_start_command_starts_once() {
        let mut h = ready(RecognizerBehavior::default()).await;
        let recognizer = h.recognizers.latest().unwrap();

        recognizer.emit_result("start", Confidence::High);
        let first = h.coordinator.on_tick(TICK);
        recognizer.emit_result("start", Confidence::High);
        let second = h.coordinator.on_tick(TICK);

        assert_eq!(first.recorder, TickAction::StartIssued);
        assert_eq!(second.recorder, TickAction::Idle);

        settle(
            h.coordinator.subscribe_recorder().unwrap(),
            RecorderState::Running,
        )
        .await;
        assert_eq!(h.device.recorder_starts(), 1);
        assert_eq!(h.cues.played().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_while_stopped_calls_nothing() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.recognizers.latest().unwrap().emit_result("stop", Confidence::High);

        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.recorder, TickAction::Idle);
        assert_eq!(h.coordinator.recorder_state(), Some(RecorderState::Stopped));
        assert_eq!(h.device.recorder_stops(), 0);
    }

    #[tokio::test]
    async fn test_only_last_command_before_tick_counts() {
        let mut h = ready(RecognizerBehavior::default()).await;
        recorder_running(&mut h).await;
        let recognizer = h.recognizers.latest().unwrap();

        recognizer.emit_result("stop", Confidence::High);
        recognizer.emit_result("start", Confidence::High);
        let report = h.coordinator.on_tick(TICK);

        assert_eq!(report.recorder, TickAction::Idle);
        assert_eq!(h.coordinator.recorder_state(), Some(RecorderState::Running));
        assert_eq!(h.device.recorder_stops(), 0);
    }

    #[tokio::test]
    async fn test_unconsumed_command_is_not_replayed() {
        let mut h = ready(RecognizerBehavior::default()).await;
        let recognizer = h.recognizers.latest().unwrap();

        // "stop" is a no-op while stopped but still cleared
        recognizer.emit_result("stop", Confidence::High);
        h.coordinator.on_tick(TICK);
        recorder_running(&mut h).await;

        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.recorder, TickAction::Idle);
        assert_eq!(h.coordinator.recorder_state(), Some(RecorderState::Running));
    }

    #[tokio::test]
    async fn test_low_confidence_command_ignored() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.recognizers.latest().unwrap().emit_result("start", Confidence::Low);

        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.recorder, TickAction::Idle);
        assert_eq!(h.device.recorder_starts(), 0);
        assert!(h.cues.played().is_empty());
    }

    #[tokio::test]
    async fn test_same_frame_uploaded_once() {
        let mut h = ready(RecognizerBehavior::default()).await;
        let extent = Extent::new(4, 4);

        h.device.feed().publish(bgra_frame(100, extent));
        let first = h.coordinator.on_tick(TICK);
        h.device.feed().publish(bgra_frame(100, extent));
        let second = h.coordinator.on_tick(TICK);

        assert_eq!(
            first.frame,
            FrameStep::Ingested(IngestOutcome::Uploaded {
                timestamp: FrameTimestamp(100),
                extent,
            })
        );
        assert_eq!(
            second.frame,
            FrameStep::Ingested(IngestOutcome::Duplicate(FrameTimestamp(100)))
        );
        assert_eq!(h.sink.stages(), 1);
        assert_eq!(h.sink.uploads(), 1);
    }

    #[tokio::test]
    async fn test_no_ingestion_before_source_started() {
        let mut h = harness(RecognizerBehavior::default());
        h.device.source_gate().close();
        h.device.feed().publish(bgra_frame(1, Extent::new(2, 2)));

        let _restart = h.coordinator.on_space_ready();
        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.frame, FrameStep::SourceNotStarted);
        assert_eq!(h.coordinator.source_group_state(), SourceGroupState::Starting);

        h.device.source_gate().release();
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
        let report = h.coordinator.on_tick(TICK);
        assert!(matches!(
            report.frame,
            FrameStep::Ingested(IngestOutcome::Uploaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_ingestion_independent_of_recorder() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.device.recorder_gate().close();
        h.recognizers.latest().unwrap().emit_result("start", Confidence::High);
        h.device.feed().publish(bgra_frame(5, Extent::new(2, 2)));

        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.recorder, TickAction::StartIssued);
        assert_eq!(h.coordinator.recorder_state(), Some(RecorderState::Starting));
        assert!(matches!(
            report.frame,
            FrameStep::Ingested(IngestOutcome::Uploaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_contract_fault_skips_upload() {
        let mut h = ready(RecognizerBehavior::default()).await;
        let bitmap = PixelBuffer::new(Extent::new(2, 2), PixelFormat::Gray8, vec![0; 4]);
        h.device
            .feed()
            .publish(SensorFrame::new(FrameTimestamp(3), bitmap));
        let mut events = h.coordinator.subscribe_events();

        let report = h.coordinator.on_tick(TICK);
        assert!(matches!(report.frame, FrameStep::Fault(IngestError::PixelFormat { .. })));
        assert_eq!(h.sink.uploads(), 0);
        assert!(matches!(
            events.recv().await.unwrap(),
            CoordinatorEvent::IngestFault { .. }
        ));
    }

    #[tokio::test]
    async fn test_device_lost_then_restored() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.device.feed().publish(bgra_frame(100, Extent::new(4, 4)));
        h.coordinator.on_tick(TICK);
        assert!(h.coordinator.preview_texture().is_some());

        h.coordinator.on_device_lost();
        assert!(h.coordinator.preview_texture().is_none());
        assert_eq!(h.coordinator.frame_cursor().last(), None);
        assert_eq!(h.coordinator.recorder_state(), None);
        assert_eq!(h.coordinator.source_group_state(), SourceGroupState::Stopped);
        assert_eq!(h.visuals.stats().released, 1);

        h.coordinator.on_device_restored();
        assert_eq!(h.device.source_group_starts(), 1);
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
        assert_eq!(h.device.source_group_starts(), 2);
        assert_eq!(h.device.recorders_opened(), 2);
        assert!(h.coordinator.preview_texture().is_none());
        assert!(h.visuals.stats().device_resources);

        // The frame seen before the loss is accepted again
        let report = h.coordinator.on_tick(TICK);
        assert_eq!(
            report.frame,
            FrameStep::Ingested(IngestOutcome::Uploaded {
                timestamp: FrameTimestamp(100),
                extent: Extent::new(4, 4),
            })
        );
        assert!(h.coordinator.preview_texture().is_some());
    }

    #[tokio::test]
    async fn test_device_lost_keeps_recognition() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.coordinator.on_device_lost();
        assert_eq!(h.coordinator.recognition_state(), RecognitionState::Listening);

        // Commands are dropped while no capture session exists
        h.recognizers.latest().unwrap().emit_result("start", Confidence::High);
        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.recorder, TickAction::Idle);
        assert_eq!(report.frame, FrameStep::SourceNotStarted);
        assert_eq!(h.device.recorder_starts(), 0);
    }

    #[tokio::test]
    async fn test_stale_recorder_start_after_device_lost() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.device.recorder_gate().close();
        h.recognizers.latest().unwrap().emit_result("start", Confidence::High);
        h.coordinator.on_tick(TICK);
        let stale = h.device.latest_recorder().unwrap();

        h.coordinator.on_device_lost();
        h.coordinator.on_device_restored();
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
        let mut events = h.coordinator.subscribe_events();
        h.device.recorder_gate().release();

        // Device and test keep the last references once the start completes
        tokio::time::timeout(Duration::from_secs(1), async {
            while Arc::strong_count(&stale) > 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(h.coordinator.recorder_state(), Some(RecorderState::Stopped));
        while let Ok(event) = events.try_recv() {
            assert_ne!(event, CoordinatorEvent::RecorderStarted);
        }
    }

    #[tokio::test]
    async fn test_repeated_space_ready_does_not_restart_source() {
        let mut h = ready(RecognizerBehavior::default()).await;
        let restart = h.coordinator.on_space_ready();
        assert_ok!(restart.await.unwrap());

        assert_eq!(h.device.source_group_starts(), 1);
        assert_eq!(h.device.recorders_opened(), 1);
        assert_eq!(h.visuals.stats().created, 1);
        assert_eq!(h.recognizers.created(), 2);
    }

    #[tokio::test]
    async fn test_recognition_failure_isolated() {
        let mut h = harness(RecognizerBehavior {
            compile_status: CompilationStatus::GrammarCompilationFailure,
            ..Default::default()
        });
        let restart = h.coordinator.on_space_ready();
        assert_err!(restart.await.unwrap());
        assert_eq!(h.coordinator.recognition_state(), RecognitionState::Failed);
        assert_eq!(h.recognizers.latest().unwrap().start_calls(), 0);

        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
        h.device.feed().publish(bgra_frame(1, Extent::new(2, 2)));
        let report = h.coordinator.on_tick(TICK);
        assert!(matches!(
            report.frame,
            FrameStep::Ingested(IngestOutcome::Uploaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_prompt_failure_is_not_fatal() {
        let mut h = harness(RecognizerBehavior::default());
        h.synthesizer.set_failing(true);
        let restart = h.coordinator.on_space_ready();
        assert_ok!(restart.await.unwrap());
        assert_eq!(h.coordinator.recognition_state(), RecognitionState::Listening);
        assert!(h.synthesizer.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_source_start_failure() {
        let mut h = harness(RecognizerBehavior::default());
        h.device.set_unavailable(true);
        let _restart = h.coordinator.on_space_ready();

        assert_eq!(h.coordinator.recorder_state(), None);
        assert_eq!(h.coordinator.source_group_state(), SourceGroupState::Stopped);

        h.device.set_unavailable(false);
        h.coordinator.on_device_restored();
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
    }

    #[tokio::test]
    async fn test_failed_source_start_retried_on_space_ready() {
        let mut h = harness(RecognizerBehavior::default());
        h.device.source_gate().close();
        let _restart = h.coordinator.on_space_ready();
        assert_eq!(h.coordinator.source_group_state(), SourceGroupState::Starting);
        let mut events = h.coordinator.subscribe_events();

        h.device
            .latest_source()
            .unwrap()
            .fail_start_with(BackendError::Failed("sensor busy".into()));
        h.device.source_gate().release();
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Stopped,
        )
        .await;

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, CoordinatorEvent::SourceGroupStartFailed { .. });
        }
        assert!(failed);

        h.device.feed().publish(bgra_frame(1, Extent::new(2, 2)));
        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.frame, FrameStep::SourceNotStarted);

        let _restart = h.coordinator.on_space_ready();
        settle(
            h.coordinator.subscribe_source_group().unwrap(),
            SourceGroupState::Started,
        )
        .await;
        assert_eq!(h.device.source_group_starts(), 2);
        assert_eq!(h.device.recorders_opened(), 2);

        let report = h.coordinator.on_tick(TICK);
        assert!(matches!(
            report.frame,
            FrameStep::Ingested(IngestOutcome::Uploaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_feed_is_noop() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.device.feed().publish(bgra_frame(1, Extent::new(2, 2)));
        h.coordinator.on_tick(TICK);

        h.device.feed().clear();
        let report = h.coordinator.on_tick(TICK);
        assert_eq!(report.frame, FrameStep::Ingested(IngestOutcome::NoFrame));
        assert_eq!(h.sink.uploads(), 1);
    }

    #[tokio::test]
    async fn test_render_and_update_reach_visuals() {
        let mut h = ready(RecognizerBehavior::default()).await;
        h.coordinator.on_render();
        h.device.feed().publish(bgra_frame(1, Extent::new(2, 2)));
        h.coordinator.on_tick(TICK);
        h.coordinator.on_render();

        let stats = h.visuals.stats();
        assert_eq!(stats.updates, 1);
        assert_eq!(stats.elapsed, TICK);
        assert_eq!(stats.renders, 2);
        assert_eq!(stats.renders_with_texture, 1);
    }
}
