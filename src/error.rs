use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to access frame log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed frame log: {0}")]
    Malformed(String),
    #[error("failed to encode frame log: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid log name {0:?}")]
    InvalidName(String),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error(
        "replay window is empty: start {start_index}, end padding {end_padding_frames}, log length {len}"
    )]
    EmptyWindow {
        start_index: usize,
        end_padding_frames: usize,
        len: usize,
    },
}

#[derive(Debug, Error)]
#[error("failed to connect to broker at {endpoint}: {reason}")]
pub struct ConnectError {
    pub endpoint: String,
    pub reason: String,
}

impl ConnectError {
    pub fn new(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("delivery producer is not connected")]
    NotConnected,
    #[error("broker rejected message on topic {topic}: {reason}")]
    Broker { topic: String, reason: String },
    #[error("failed to encode frame payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PublishError {
    pub fn broker(topic: impl Into<String>, reason: impl ToString) -> Self {
        Self::Broker {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to persist recording: {0}")]
    Persistence(#[source] LogError),
    #[error("failed to load replay log: {0}")]
    ReplayLoad(#[source] LogError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("recording already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
}
