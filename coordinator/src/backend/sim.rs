//! In-process stand-ins for the platform services
//!
//! Used by the host binary to exercise the coordinator without a headset,
//! and by tests to observe every call the coordinator makes. Asynchronous
//! starts can be held back with a [`Gate`] so provisional states stay
//! observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::capture::{
    Extent, FrameTimestamp, PixelBuffer, PixelFormat, SensorFrame, SensorKind, SourceGroupKind,
    StagingTexture,
};
use crate::command::Confidence;
use crate::recognition::{
    AudioProblem, CompilationStatus, QualityHandler, RecognitionResult, ResultHandler,
    Subscription,
};

use super::{
    BackendError, CaptureDevice, CuePlayer, FrameSourceGroup, PreviewVisuals, Recognizer,
    RecognizerFactory, RecordingEngine, SpeechSynthesizer, TextureSink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds asynchronous completions until released
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn open() -> Self {
        Self::with_state(true)
    }

    pub fn closed() -> Self {
        Self::with_state(false)
    }

    fn with_state(open: bool) -> Self {
        let (tx, _) = watch::channel(open);
        Self { open: Arc::new(tx) }
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives as long as self
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::open()
    }
}

/// Latest camera frame shared by every source group a device opens
#[derive(Debug, Clone, Default)]
pub struct FrameFeed {
    latest: Arc<Mutex<Option<SensorFrame>>>,
}

impl FrameFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: SensorFrame) {
        *lock(&self.latest) = Some(frame);
    }

    pub fn clear(&self) {
        lock(&self.latest).take();
    }

    fn latest(&self) -> Option<SensorFrame> {
        lock(&self.latest).clone()
    }
}

/// A BGRA8 frame with a pattern derived from its timestamp
pub fn bgra_frame(timestamp: i64, extent: Extent) -> SensorFrame {
    let len = extent.byte_len(PixelFormat::Bgra8);
    let seed = timestamp as u8;
    let bytes = (0..len)
        .map(|i| (i as u8).wrapping_add(seed))
        .collect();
    SensorFrame::new(
        FrameTimestamp(timestamp),
        PixelBuffer::new(extent, PixelFormat::Bgra8, bytes),
    )
}

#[derive(Debug, Default)]
pub struct SimRecordingEngine {
    enabled: Mutex<Vec<SensorKind>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    start_error: Mutex<Option<BackendError>>,
    gate: Gate,
}

impl SimRecordingEngine {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            ..Default::default()
        }
    }

    pub fn fail_start_with(&self, error: BackendError) {
        *lock(&self.start_error) = Some(error);
    }

    pub fn enabled(&self) -> Vec<SensorKind> {
        lock(&self.enabled).clone()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordingEngine for SimRecordingEngine {
    fn enable(&self, kind: SensorKind) {
        lock(&self.enabled).push(kind);
    }

    async fn start(&self) -> Result<(), BackendError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        let error = lock(&self.start_error).take();
        match error {
            Some(e) => Err(e),
            None => {
                info!("sim recorder recording");
                Ok(())
            }
        }
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        info!("sim recorder stopped");
    }
}

#[derive(Debug)]
pub struct SimFrameSource {
    feed: FrameFeed,
    gate: Gate,
    start_calls: AtomicUsize,
    start_error: Mutex<Option<BackendError>>,
}

impl SimFrameSource {
    pub fn new(feed: FrameFeed) -> Self {
        Self::with_gate(feed, Gate::open())
    }

    pub fn with_gate(feed: FrameFeed, gate: Gate) -> Self {
        Self {
            feed,
            gate,
            start_calls: AtomicUsize::new(0),
            start_error: Mutex::new(None),
        }
    }

    pub fn fail_start_with(&self, error: BackendError) {
        *lock(&self.start_error) = Some(error);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSourceGroup for SimFrameSource {
    async fn start(&self) -> Result<(), BackendError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        let error = lock(&self.start_error).take();
        error.map_or(Ok(()), Err)
    }

    fn latest_frame(&self, kind: SensorKind) -> Option<SensorFrame> {
        match kind {
            SensorKind::PhotoVideo => self.feed.latest(),
        }
    }
}

/// Opens fresh sim recorders and source groups over one frame feed
#[derive(Debug, Default)]
pub struct SimCaptureDevice {
    feed: FrameFeed,
    recorder_gate: Gate,
    source_gate: Gate,
    recorders: Mutex<Vec<Arc<SimRecordingEngine>>>,
    sources: Mutex<Vec<Arc<SimFrameSource>>>,
    unavailable: AtomicBool,
}

impl SimCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self) -> &FrameFeed {
        &self.feed
    }

    /// Gate shared by every recorder start
    pub fn recorder_gate(&self) -> &Gate {
        &self.recorder_gate
    }

    /// Gate shared by every source group start
    pub fn source_gate(&self) -> &Gate {
        &self.source_gate
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn latest_recorder(&self) -> Option<Arc<SimRecordingEngine>> {
        lock(&self.recorders).last().cloned()
    }

    pub fn latest_source(&self) -> Option<Arc<SimFrameSource>> {
        lock(&self.sources).last().cloned()
    }

    pub fn recorders_opened(&self) -> usize {
        lock(&self.recorders).len()
    }

    /// Start calls summed over every source group ever opened
    pub fn source_group_starts(&self) -> usize {
        lock(&self.sources).iter().map(|s| s.start_calls()).sum()
    }

    /// Start calls summed over every recorder ever opened
    pub fn recorder_starts(&self) -> usize {
        lock(&self.recorders).iter().map(|r| r.start_calls()).sum()
    }

    pub fn recorder_stops(&self) -> usize {
        lock(&self.recorders).iter().map(|r| r.stop_calls()).sum()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("sim camera disconnected".into()));
        }
        Ok(())
    }
}

impl CaptureDevice for SimCaptureDevice {
    fn open_recorder(&self) -> Result<Arc<dyn RecordingEngine>, BackendError> {
        self.check_available()?;
        let recorder = Arc::new(SimRecordingEngine::new(self.recorder_gate.clone()));
        lock(&self.recorders).push(Arc::clone(&recorder));
        Ok(recorder)
    }

    fn open_source_group(
        &self,
        kind: SourceGroupKind,
        _recorder: Arc<dyn RecordingEngine>,
    ) -> Result<Arc<dyn FrameSourceGroup>, BackendError> {
        self.check_available()?;
        debug!(?kind, "opening sim source group");
        let source = Arc::new(SimFrameSource::with_gate(
            self.feed.clone(),
            self.source_gate.clone(),
        ));
        lock(&self.sources).push(Arc::clone(&source));
        Ok(source)
    }
}

/// How the next recognizers behave
#[derive(Debug, Clone)]
pub struct RecognizerBehavior {
    pub unavailable: bool,
    pub compile_status: CompilationStatus,
    pub compile_error: Option<BackendError>,
    pub start_error: Option<BackendError>,
}

impl Default for RecognizerBehavior {
    fn default() -> Self {
        Self {
            unavailable: false,
            compile_status: CompilationStatus::Success,
            compile_error: None,
            start_error: None,
        }
    }
}

#[derive(Default)]
pub struct SimRecognizerFactory {
    behavior: Mutex<RecognizerBehavior>,
    created: Mutex<Vec<Arc<SimRecognizer>>>,
}

impl SimRecognizerFactory {
    pub fn new(behavior: RecognizerBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: RecognizerBehavior) {
        *lock(&self.behavior) = behavior;
    }

    pub fn latest(&self) -> Option<Arc<SimRecognizer>> {
        lock(&self.created).last().cloned()
    }

    pub fn created(&self) -> usize {
        lock(&self.created).len()
    }
}

impl RecognizerFactory for SimRecognizerFactory {
    fn create(&self) -> Result<Arc<dyn Recognizer>, BackendError> {
        let behavior = lock(&self.behavior).clone();
        if behavior.unavailable {
            return Err(BackendError::Unavailable("no speech recognizer installed".into()));
        }
        let recognizer = Arc::new(SimRecognizer::new(behavior));
        lock(&self.created).push(Arc::clone(&recognizer));
        Ok(recognizer)
    }
}

type HandlerMap<H> = Arc<Mutex<HashMap<u64, H>>>;

/// Recognizer driven by [`emit_result`](SimRecognizer::emit_result)
#[derive(Default)]
pub struct SimRecognizer {
    behavior: RecognizerBehavior,
    results: HandlerMap<ResultHandler>,
    quality: HandlerMap<QualityHandler>,
    next_id: AtomicU64,
    constraints: Mutex<Vec<String>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    listening: AtomicBool,
}

impl SimRecognizer {
    pub fn new(behavior: RecognizerBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    /// Deliver a result to every registered handler
    pub fn emit_result(&self, text: &str, confidence: Confidence) {
        let handlers: Vec<ResultHandler> = lock(&self.results).values().cloned().collect();
        for handler in handlers {
            handler(RecognitionResult::new(text, confidence));
        }
    }

    pub fn emit_quality(&self, problem: AudioProblem) {
        let handlers: Vec<QualityHandler> = lock(&self.quality).values().cloned().collect();
        for handler in handlers {
            handler(problem);
        }
    }

    pub fn live_subscriptions(&self) -> usize {
        lock(&self.results).len() + lock(&self.quality).len()
    }

    pub fn constraints(&self) -> Vec<String> {
        lock(&self.constraints).clone()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn register<H: Send + 'static>(&self, map: &HandlerMap<H>, handler: H) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(map).insert(id, handler);
        let map = Arc::clone(map);
        Subscription::new(move || {
            lock(&map).remove(&id);
        })
    }
}

#[async_trait]
impl Recognizer for SimRecognizer {
    fn subscribe_results(&self, handler: ResultHandler) -> Subscription {
        self.register(&self.results, handler)
    }

    fn subscribe_quality(&self, handler: QualityHandler) -> Subscription {
        self.register(&self.quality, handler)
    }

    fn set_constraints(&self, phrases: &[&str]) {
        let mut constraints = lock(&self.constraints);
        constraints.clear();
        constraints.extend(phrases.iter().map(|p| p.to_string()));
    }

    async fn compile_constraints(&self) -> Result<CompilationStatus, BackendError> {
        match &self.behavior.compile_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.behavior.compile_status),
        }
    }

    async fn start_continuous(&self) -> Result<(), BackendError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.behavior.start_error {
            return Err(e.clone());
        }
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_continuous(&self) -> Result<(), BackendError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimSynthesizer {
    spoken: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl SimSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for SimSynthesizer {
    async fn speak(&self, text: &str) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Failed("no voice installed".into()));
        }
        info!(%text, "sim synthesizer speaking");
        lock(&self.spoken).push(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimCuePlayer {
    played: Mutex<Vec<String>>,
}

impl SimCuePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<String> {
        lock(&self.played).clone()
    }
}

impl CuePlayer for SimCuePlayer {
    fn play_cue(&self, cue: &str) {
        debug!(%cue, "sim cue");
        lock(&self.played).push(cue.to_string());
    }
}

/// Keeps a copy of the last staged texture as the "GPU" side
#[derive(Debug, Default)]
pub struct SimTextureSink {
    staged: Mutex<Vec<u8>>,
    stages: AtomicUsize,
    uploads: AtomicUsize,
}

impl SimTextureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> usize {
        self.stages.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn last_staged(&self) -> Vec<u8> {
        lock(&self.staged).clone()
    }
}

impl TextureSink for SimTextureSink {
    fn stage_for_upload(&self, texture: &StagingTexture) {
        let mut staged = lock(&self.staged);
        staged.clear();
        staged.extend_from_slice(texture.as_bytes());
        self.stages.fetch_add(1, Ordering::SeqCst);
    }

    fn upload_staged_texture(&self) {
        self.uploads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counters for [`SimVisuals`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisualStats {
    pub created: usize,
    pub released: usize,
    pub updates: usize,
    pub renders: usize,
    pub renders_with_texture: usize,
    pub device_resources: bool,
    pub elapsed: Duration,
}

/// Clones share counters, so a test can keep one after boxing another
#[derive(Debug, Clone, Default)]
pub struct SimVisuals {
    stats: Arc<Mutex<VisualStats>>,
}

impl SimVisuals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> VisualStats {
        *lock(&self.stats)
    }
}

impl PreviewVisuals for SimVisuals {
    fn create_device_resources(&mut self) {
        let mut stats = lock(&self.stats);
        stats.created += 1;
        stats.device_resources = true;
    }

    fn release_device_resources(&mut self) {
        let mut stats = lock(&self.stats);
        stats.released += 1;
        stats.device_resources = false;
    }

    fn update(&mut self, elapsed: Duration) {
        let mut stats = lock(&self.stats);
        stats.updates += 1;
        stats.elapsed += elapsed;
    }

    fn render(&mut self, texture: Option<&StagingTexture>) {
        let mut stats = lock(&self.stats);
        stats.renders += 1;
        if texture.is_some() {
            stats.renders_with_texture += 1;
        }
    }
}
