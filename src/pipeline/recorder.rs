use std::sync::{Mutex, MutexGuard};

use crate::types::Frame;

#[derive(Debug, Default)]
struct RecorderInner {
    recording: bool,
    buffer: Vec<Frame>,
}

/// In-memory frame buffer that only accepts frames between `start` and `stop`.
///
/// Persisting what `stop` returns is up to the caller.
#[derive(Debug, Default)]
pub struct Recorder {
    inner: Mutex<RecorderInner>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(&self) {
        self.lock().recording = true;
    }

    /// Buffers `frame` if recording, otherwise drops it. Returns whether the
    /// frame was kept.
    pub fn append(&self, frame: Frame) -> bool {
        let mut inner = self.lock();
        if inner.recording {
            inner.buffer.push(frame);
        }
        inner.recording
    }

    pub fn stop(&self) -> Vec<Frame> {
        let mut inner = self.lock();
        inner.recording = false;
        std::mem::take(&mut inner.buffer)
    }

    /// Puts back frames handed out by `stop` that could not be stored, ahead
    /// of anything buffered since.
    pub fn restore(&self, mut frames: Vec<Frame>) {
        let mut inner = self.lock();
        frames.append(&mut inner.buffer);
        inner.buffer = frames;
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
