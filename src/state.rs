use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

/// Session flags that decide where each frame goes.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub subject_id: String,
    pub subject_started_at: Instant,
    pub is_recording: bool,
    pub is_replaying: bool,
    /// Bumped on every replay start so frames from a stopped replay can be told apart.
    pub replay_generation: u64,
    pub delivery_enabled: bool,
    pub delivery_connected: bool,
    pub render_scale: f64,
}

impl SessionState {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_started_at: Instant::now(),
            is_recording: false,
            is_replaying: false,
            replay_generation: 0,
            delivery_enabled: false,
            delivery_connected: false,
            render_scale: 1.0,
        }
    }

    pub fn subject_elapsed(&self) -> Duration {
        self.subject_started_at.elapsed()
    }

    pub fn should_deliver(&self) -> bool {
        self.delivery_enabled && self.delivery_connected
    }
}

/// Cloneable holder for the session state. Readers always get a whole
/// snapshot; only the session controller writes.
#[derive(Clone, Debug)]
pub struct SharedState {
    inner: Arc<RwLock<SessionState>>,
}

impl SharedState {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn subject_id(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .subject_id
            .clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}
