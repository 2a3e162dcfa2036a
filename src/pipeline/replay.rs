use std::{
    ops::Range,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{SendTimeoutError, Sender};

use super::{CapturedFrame, SourceEvent, SourceKind, SourceMessage};
use crate::{
    error::{LogError, ReplayError},
    frame_log,
    types::Frame,
};

// Bounds how long a stopped replay can stay blocked on a full session queue.
const SEND_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayParams {
    /// Frames skipped at the head of the log while the sensor settles.
    pub start_index: usize,
    /// Frames skipped at the tail of the log.
    pub end_padding_frames: usize,
    pub frame_interval: Duration,
}

impl Default for ReplayParams {
    fn default() -> Self {
        Self {
            start_index: 30,
            end_padding_frames: 5,
            frame_interval: Duration::from_millis(33),
        }
    }
}

/// A loaded recording ready to be played back.
#[derive(Clone, Debug)]
pub struct ReplayLog {
    frames: Arc<Vec<Frame>>,
}

impl ReplayLog {
    pub fn load(frames: Vec<Frame>) -> Result<Self, LogError> {
        for (idx, frame) in frames.iter().enumerate() {
            frame
                .validate()
                .map_err(|err| LogError::Malformed(format!("frame {idx}: {err}")))?;
        }
        Ok(Self {
            frames: Arc::new(frames),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, LogError> {
        Self::load(frame_log::read_log(path)?)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Indices played on every loop.
    pub fn window(&self, params: ReplayParams) -> Result<Range<usize>, ReplayError> {
        let end = self.frames.len().saturating_sub(params.end_padding_frames);
        if params.start_index >= end {
            return Err(ReplayError::EmptyWindow {
                start_index: params.start_index,
                end_padding_frames: params.end_padding_frames,
                len: self.frames.len(),
            });
        }
        Ok(params.start_index..end)
    }

    /// Lazily plays `[start_index, len - end_padding_frames)` forever, until
    /// `stop` is observed.
    pub fn play(
        &self,
        params: ReplayParams,
        stop: Arc<AtomicBool>,
    ) -> Result<ReplayFrames, ReplayError> {
        let window = self.window(params)?;
        Ok(ReplayFrames {
            frames: self.frames.clone(),
            start: window.start,
            end: window.end,
            cursor: window.start,
            interval: params.frame_interval,
            stop,
            started: false,
            loops_completed: 0,
        })
    }
}

pub struct ReplayFrames {
    frames: Arc<Vec<Frame>>,
    start: usize,
    end: usize,
    cursor: usize,
    interval: Duration,
    stop: Arc<AtomicBool>,
    started: bool,
    loops_completed: u64,
}

impl ReplayFrames {
    pub fn loops_completed(&self) -> u64 {
        self.loops_completed
    }
}

impl Iterator for ReplayFrames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        // The pause between emissions is the only place this loop waits.
        if self.started && !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        if self.stop.load(Ordering::Relaxed) {
            return None;
        }

        let frame = self.frames[self.cursor].clone();
        self.started = true;
        self.cursor += 1;
        if self.cursor >= self.end {
            self.cursor = self.start;
            self.loops_completed += 1;
        }
        Some(frame)
    }
}

#[derive(Debug)]
pub struct ReplayHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReplayHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Plays `log` on its own thread, forwarding frames tagged with `generation`.
pub fn spawn_replay(
    replay_log: &ReplayLog,
    params: ReplayParams,
    generation: u64,
    frame_tx: Sender<SourceMessage>,
) -> Result<ReplayHandle, ReplayError> {
    let stop = Arc::new(AtomicBool::new(false));
    let frames = replay_log.play(params, stop.clone())?;

    let handle = thread::spawn(move || {
        log::info!(
            "replay {generation} started at frame {} every {:?}",
            params.start_index,
            params.frame_interval
        );
        for frame in frames {
            let message = SourceMessage {
                kind: SourceKind::Replay(generation),
                event: SourceEvent::Frame(CapturedFrame {
                    frame,
                    orientation: None,
                }),
            };
            match frame_tx.send_timeout(message, SEND_TIMEOUT) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    log::warn!("replay {generation}: session lagging, dropping frame");
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    log::debug!("replay {generation}: session closed");
                    break;
                }
            }
        }
        log::info!("replay {generation} stopped");
    });

    Ok(ReplayHandle {
        stop,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;
    use crate::types::{Joint, JointName, Vector3};

    fn log_of(len: u64) -> ReplayLog {
        let frames = (0..len)
            .map(|t| {
                Frame::new(
                    "rec",
                    t,
                    vec![Joint::tracked(JointName::HipCenter, Vector3::ZERO)],
                )
                .unwrap()
            })
            .collect();
        ReplayLog::load(frames).unwrap()
    }

    fn params(start_index: usize, end_padding_frames: usize) -> ReplayParams {
        ReplayParams {
            start_index,
            end_padding_frames,
            frame_interval: Duration::ZERO,
        }
    }

    #[test]
    fn plays_window_and_loops() {
        let log = log_of(40);
        let stop = Arc::new(AtomicBool::new(false));
        let mut frames = log.play(params(30, 5), stop).unwrap();

        let stamps: Vec<u64> = frames
            .by_ref()
            .take(15)
            .map(|f| f.captured_at_millis)
            .collect();
        let one_loop = vec![30, 31, 32, 33, 34];
        assert_eq!(stamps[..5], one_loop[..]);
        assert_eq!(stamps[5..10], one_loop[..]);
        assert_eq!(stamps[10..], one_loop[..]);
        assert_eq!(frames.loops_completed(), 3);
    }

    #[test]
    fn stop_takes_effect_before_next_frame() {
        let log = log_of(10);
        let stop = Arc::new(AtomicBool::new(false));
        let mut frames = log.play(params(0, 0), stop.clone()).unwrap();

        assert_eq!(frames.next().map(|f| f.captured_at_millis), Some(0));
        assert_eq!(frames.next().map(|f| f.captured_at_millis), Some(1));
        stop.store(true, Ordering::Relaxed);
        assert!(frames.next().is_none());
    }

    #[test]
    fn empty_window_is_rejected() {
        let log = log_of(10);
        let stop = Arc::new(AtomicBool::new(false));
        assert_eq!(
            log.play(params(8, 2), stop.clone()).err(),
            Some(ReplayError::EmptyWindow {
                start_index: 8,
                end_padding_frames: 2,
                len: 10
            })
        );
        assert!(log.play(params(0, 20), stop).is_err());
    }

    #[test]
    fn malformed_frames_fail_to_load() {
        let bad = Frame {
            subject_id: "s".into(),
            captured_at_millis: 0,
            joints: Vec::new(),
        };
        assert!(matches!(ReplayLog::load(vec![bad]), Err(LogError::Malformed(_))));
    }

    #[test]
    fn loads_from_a_written_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk.json");
        let frames: Vec<Frame> = log_of(6).frames.iter().cloned().collect();
        frame_log::write_log(&path, &frames).unwrap();

        let loaded = ReplayLog::from_path(&path).unwrap();
        assert_eq!(loaded.len(), 6);
        assert_eq!(loaded.window(params(1, 1)), Ok(1..5));
    }

    #[test]
    fn spawned_replay_forwards_tagged_frames_until_stopped() {
        let log = log_of(12);
        let (tx, rx) = bounded(4);
        let handle = spawn_replay(&log, params(2, 2), 7, tx).unwrap();

        let first: Vec<SourceMessage> = rx.iter().take(10).collect();
        handle.stop();

        for (i, message) in first.iter().enumerate() {
            assert_eq!(message.kind, SourceKind::Replay(7));
            let SourceEvent::Frame(captured) = &message.event else {
                panic!("expected a frame");
            };
            assert_eq!(captured.frame.captured_at_millis, 2 + (i as u64 % 8));
        }
    }
}
