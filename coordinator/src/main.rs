//! voice-capture-coordinator: host process
//!
//! Runs the coordinator against the simulated backend:
//! - A fixed-rate tick loop calling on_tick and on_render
//! - A scripted speaker feeding phrases into the recognizer
//! - A camera publishing BGRA frames at roughly 30 fps
//! - An event logger

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use voice_capture_coordinator::backend::sim::{
    bgra_frame, FrameFeed, RecognizerBehavior, SimCaptureDevice, SimCuePlayer,
    SimRecognizerFactory, SimSynthesizer, SimTextureSink, SimVisuals,
};
use voice_capture_coordinator::backend::Collaborators;
use voice_capture_coordinator::capture::Extent;
use voice_capture_coordinator::command::Confidence;
use voice_capture_coordinator::config::Config;
use voice_capture_coordinator::driver::Coordinator;
use voice_capture_coordinator::events::CoordinatorEvent;
use voice_capture_coordinator::lifecycle::ShutdownSignal;

const CAMERA_EXTENT: Extent = Extent {
    width: 320,
    height: 180,
};
const CAMERA_FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-capture-coordinator starting"
    );

    let config = Config::load()?;
    info!(
        tick_rate_hz = config.tick_rate_hz,
        cue = %config.recognition_cue.display(),
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();
    let (event_tx, _) = broadcast::channel::<CoordinatorEvent>(config.event_capacity);

    let device = Arc::new(SimCaptureDevice::new());
    let recognizers = Arc::new(SimRecognizerFactory::new(RecognizerBehavior::default()));
    let collaborators = Collaborators {
        device: device.clone(),
        recognizers: recognizers.clone(),
        synthesizer: Arc::new(SimSynthesizer::new()),
        cues: Arc::new(SimCuePlayer::new()),
        texture_sink: Arc::new(SimTextureSink::new()),
        visuals: Box::new(SimVisuals::new()),
    };

    let tick_interval = config.tick_interval();
    let mut coordinator = Coordinator::new(
        config,
        collaborators,
        tokio::runtime::Handle::current(),
        event_tx.clone(),
    );

    let event_logger = tokio::spawn(log_events(event_tx.subscribe()));
    let camera = tokio::spawn(run_camera(device.feed().clone()));
    let speaker = tokio::spawn(run_speaker(recognizers));

    // Recognition failures are logged by the session and do not stop the loop
    let _recognition = coordinator.on_space_ready();

    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    info!("coordinator initialized, entering tick loop");

    tokio::select! {
        _ = async {
            loop {
                ticker.tick().await;
                let now = Instant::now();
                coordinator.on_tick(now - last_tick);
                coordinator.on_render();
                last_tick = now;
            }
        } => {}

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    speaker.abort();
    camera.abort();
    coordinator.recognition().shutdown().await;
    coordinator.on_device_lost();

    drop(coordinator);
    drop(event_tx);
    let _ = event_logger.await;

    info!("voice-capture-coordinator stopped");

    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<CoordinatorEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                match event {
                    CoordinatorEvent::FrameIngested { .. } => debug!(event = %json, "event"),
                    _ => info!(event = %json, "event"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_camera(feed: FrameFeed) {
    let mut ticker = interval(CAMERA_FRAME_INTERVAL);
    let mut timestamp = 0i64;
    loop {
        ticker.tick().await;
        timestamp += CAMERA_FRAME_INTERVAL.as_millis() as i64;
        feed.publish(bgra_frame(timestamp, CAMERA_EXTENT));
    }
}

/// Speaks a fixed script into whichever recognizer is current
async fn run_speaker(recognizers: Arc<SimRecognizerFactory>) {
    let script = [
        ("start", Confidence::High),
        ("start", Confidence::Medium),
        ("stop", Confidence::Low),
        ("stop", Confidence::Medium),
    ];

    loop {
        for (phrase, confidence) in script {
            sleep(Duration::from_secs(3)).await;
            match recognizers.latest() {
                Some(recognizer) => {
                    debug!(phrase, %confidence, "speaking");
                    recognizer.emit_result(phrase, confidence);
                }
                None => debug!(phrase, "no recognizer yet"),
            }
        }
    }
}
