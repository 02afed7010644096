//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const ENV_VOICE_PROMPT: &str = "CAPTURE_COORDINATOR_VOICE_PROMPT";
const ENV_RECOGNITION_CUE: &str = "CAPTURE_COORDINATOR_RECOGNITION_CUE";
const ENV_SLOW_TICK_MS: &str = "CAPTURE_COORDINATOR_SLOW_TICK_MS";
const ENV_TICK_RATE_HZ: &str = "CAPTURE_COORDINATOR_TICK_RATE_HZ";
const ENV_EVENT_CAPACITY: &str = "CAPTURE_COORDINATOR_EVENT_CAPACITY";

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Spoken once when the rendering space becomes available
    pub voice_prompt: String,

    /// Audio cue played whenever a command is accepted
    pub recognition_cue: PathBuf,

    /// Ticks slower than this are logged
    pub slow_tick_threshold: Duration,

    /// Rate of the host tick loop
    pub tick_rate_hz: u32,

    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            voice_prompt: "Say 'start' to begin, and 'stop' to end recording.".to_string(),
            recognition_cue: PathBuf::from("audio").join("basic_results_earcon.wav"),
            slow_tick_threshold: Duration::from_millis(30),
            tick_rate_hz: 60,
            event_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(prompt) = lookup(ENV_VOICE_PROMPT) {
            config.voice_prompt = prompt;
        }
        if let Some(cue) = lookup(ENV_RECOGNITION_CUE) {
            config.recognition_cue = PathBuf::from(cue);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_SLOW_TICK_MS)? {
            config.slow_tick_threshold = Duration::from_millis(ms);
        }
        if let Some(hz) = parse_var(&lookup, ENV_TICK_RATE_HZ)? {
            config.tick_rate_hz = hz;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_EVENT_CAPACITY)? {
            config.event_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 {
            bail!("{} must be greater than zero", ENV_TICK_RATE_HZ);
        }
        if self.event_capacity == 0 {
            bail!("{} must be greater than zero", ENV_EVENT_CAPACITY);
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz
    }

    pub fn recognition_cue_id(&self) -> String {
        self.recognition_cue.to_string_lossy().into_owned()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", key, raw))
        })
        .transpose()
}
