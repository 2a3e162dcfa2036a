use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{
    delivery::DEFAULT_BROKER_TIMEOUT,
    pipeline::{NormalizerConfig, ReplayParams},
};

const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_TOPIC: &str = "skeleton-frames";
const DEFAULT_LOG_DIR: &str = "recordings";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub broker_url: String,
    pub topic: String,
    /// Bound on connecting to the broker and on each publish.
    pub broker_timeout: Duration,
    pub log_dir: PathBuf,
    pub replay: ReplayParams,
    pub normalizer: NormalizerConfig,
    /// Frames the capture callback may queue ahead of the session.
    pub capture_queue_depth: usize,
    pub delivery_queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            broker_timeout: DEFAULT_BROKER_TIMEOUT,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            replay: ReplayParams::default(),
            normalizer: NormalizerConfig::default(),
            capture_queue_depth: 8,
            delivery_queue_depth: 256,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for anything
    /// missing or unparsable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            broker_url: lookup("SKELETON_BROKER_URL").unwrap_or(defaults.broker_url),
            topic: lookup("SKELETON_TOPIC").unwrap_or(defaults.topic),
            broker_timeout: parsed(&lookup, "SKELETON_BROKER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.broker_timeout),
            log_dir: lookup("SKELETON_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            replay: ReplayParams {
                start_index: parsed(&lookup, "SKELETON_REPLAY_START")
                    .unwrap_or(defaults.replay.start_index),
                end_padding_frames: parsed(&lookup, "SKELETON_REPLAY_END_PADDING")
                    .unwrap_or(defaults.replay.end_padding_frames),
                frame_interval: parsed(&lookup, "SKELETON_REPLAY_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.replay.frame_interval),
            },
            normalizer: NormalizerConfig {
                rotate: parsed(&lookup, "SKELETON_ROTATE").unwrap_or(defaults.normalizer.rotate),
            },
            capture_queue_depth: parsed(&lookup, "SKELETON_CAPTURE_QUEUE")
                .unwrap_or(defaults.capture_queue_depth),
            delivery_queue_depth: parsed(&lookup, "SKELETON_DELIVERY_QUEUE")
                .unwrap_or(defaults.delivery_queue_depth),
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring invalid {key}={raw:?}, using default");
            None
        }
    }
}
