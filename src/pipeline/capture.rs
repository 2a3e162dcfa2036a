use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use super::{CapturedFrame, SourceEvent, SourceKind, SourceMessage, TrunkOrientation};
use crate::{
    state::SharedState,
    types::{Frame, JOINT_COUNT, Joint, JointName, TrackingConfidence, Vector3},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkeletonTrackingState {
    Tracked,
    PositionOnly,
    NotTracked,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawJoint {
    pub position: Vector3,
    pub confidence: TrackingConfidence,
}

/// One skeleton candidate as decoded by the acquisition layer.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSkeleton {
    pub tracking_state: SkeletonTrackingState,
    /// Indexed by [`JointName::index`].
    pub joints: [RawJoint; JOINT_COUNT],
    /// W component of the spine bone's absolute rotation, when reported.
    pub spine_rotation_w: Option<f64>,
}

impl RawSkeleton {
    pub fn new(tracking_state: SkeletonTrackingState, joints: [RawJoint; JOINT_COUNT]) -> Self {
        Self {
            tracking_state,
            joints,
            spine_rotation_w: None,
        }
    }

    pub fn joint(&self, name: JointName) -> &RawJoint {
        &self.joints[name.index()]
    }
}

/// Live frame source fed by the acquisition callback.
///
/// `on_tick` runs on the sensor's delivery thread, so it only selects a
/// skeleton, builds a frame and hands it off without blocking.
pub struct LiveCapture {
    state: SharedState,
    frame_tx: Sender<SourceMessage>,
    clock_origin: Instant,
    subject_lost: AtomicBool,
}

impl LiveCapture {
    pub fn new(state: SharedState, frame_tx: Sender<SourceMessage>) -> Self {
        Self {
            state,
            frame_tx,
            clock_origin: Instant::now(),
            subject_lost: AtomicBool::new(false),
        }
    }

    /// A capture with its own bounded queue, for consumers that pull frames
    /// instead of running a session.
    pub fn channel(state: SharedState, queue_depth: usize) -> (Self, LiveFrames) {
        let (frame_tx, frame_rx) = bounded(queue_depth.max(1));
        (Self::new(state, frame_tx), LiveFrames { frame_rx })
    }

    /// Handles one sensor tick. Returns whether a frame was produced.
    pub fn on_tick(&self, candidates: &[RawSkeleton]) -> bool {
        let Some(skeleton) = select_subject(candidates) else {
            // Only a delivered transition counts; otherwise retry next tick.
            if !self.subject_lost.load(Ordering::Relaxed) && self.forward(SourceEvent::SubjectLost) {
                log::debug!("subject lost");
                self.subject_lost.store(true, Ordering::Relaxed);
            }
            return false;
        };

        if self.subject_lost.load(Ordering::Relaxed) && self.forward(SourceEvent::SubjectFound) {
            log::debug!("subject reacquired");
            self.subject_lost.store(false, Ordering::Relaxed);
        }

        let captured_at_millis = self.clock_origin.elapsed().as_millis() as u64;
        let Some(frame) = build_frame(skeleton, self.state.subject_id(), captured_at_millis) else {
            log::warn!("tracked skeleton carried no usable joints");
            return false;
        };

        let orientation = skeleton
            .spine_rotation_w
            .and_then(TrunkOrientation::from_spine_quaternion_w);
        self.forward(SourceEvent::Frame(CapturedFrame { frame, orientation }));
        true
    }

    /// Returns whether the event was queued.
    fn forward(&self, event: SourceEvent) -> bool {
        let message = SourceMessage {
            kind: SourceKind::Live,
            event,
        };
        // Drop if the session is busy, the sensor thread must not wait.
        match self.frame_tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("capture queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Pull side of [`LiveCapture::channel`]: a lazy sequence of captured frames
/// that blocks for the next tick and ends once the capture is dropped.
/// Lost and found events are skipped.
#[derive(Debug)]
pub struct LiveFrames {
    frame_rx: Receiver<SourceMessage>,
}

impl Iterator for LiveFrames {
    type Item = CapturedFrame;

    fn next(&mut self) -> Option<CapturedFrame> {
        loop {
            if let SourceEvent::Frame(captured) = self.frame_rx.recv().ok()?.event {
                return Some(captured);
            }
        }
    }
}

/// First fully tracked candidate wins; no continuity between ticks.
pub fn select_subject(candidates: &[RawSkeleton]) -> Option<&RawSkeleton> {
    candidates
        .iter()
        .find(|skeleton| skeleton.tracking_state == SkeletonTrackingState::Tracked)
}

fn build_frame(skeleton: &RawSkeleton, subject_id: String, captured_at_millis: u64) -> Option<Frame> {
    let joints: Vec<Joint> = JointName::ALL
        .iter()
        .filter_map(|&name| {
            let raw = skeleton.joint(name);
            raw.position
                .is_finite()
                .then(|| Joint::new(name, raw.position, raw.confidence))
        })
        .collect();

    Frame::new(subject_id, captured_at_millis, joints).ok()
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;
    use crate::state::SessionState;

    fn skeleton(state: SkeletonTrackingState, offset: f64) -> RawSkeleton {
        let mut joints = [RawJoint::default(); JOINT_COUNT];
        for (idx, joint) in joints.iter_mut().enumerate() {
            joint.position = Vector3::new(offset, idx as f64 * 0.1, 2.0);
        }
        RawSkeleton::new(state, joints)
    }

    fn next_frame(rx: &crossbeam_channel::Receiver<SourceMessage>) -> CapturedFrame {
        loop {
            match rx.try_recv().expect("expected a queued message").event {
                SourceEvent::Frame(frame) => return frame,
                _ => continue,
            }
        }
    }

    #[test]
    fn selects_the_tracked_candidate() {
        let (tx, rx) = bounded(8);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("subject-a")), tx);

        let candidates = [
            skeleton(SkeletonTrackingState::PositionOnly, 9.0),
            skeleton(SkeletonTrackingState::Tracked, 1.0),
        ];
        assert!(capture.on_tick(&candidates));

        let captured = next_frame(&rx);
        assert_eq!(captured.frame.subject_id, "subject-a");
        assert_eq!(captured.frame.joints.len(), JOINT_COUNT);
        assert_eq!(
            captured.frame.joint(JointName::HipCenter).unwrap().position.x,
            1.0
        );
        assert!(captured.orientation.is_none());
    }

    #[test]
    fn first_tracked_candidate_wins() {
        let candidates = [
            skeleton(SkeletonTrackingState::Tracked, 1.0),
            skeleton(SkeletonTrackingState::Tracked, 2.0),
        ];
        let selected = select_subject(&candidates).unwrap();
        assert_eq!(selected.joint(JointName::Head).position.x, 1.0);
    }

    #[test]
    fn tick_without_tracked_subject_emits_no_frame() {
        let (tx, rx) = bounded(8);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("s")), tx);

        assert!(!capture.on_tick(&[]));
        assert!(!capture.on_tick(&[skeleton(SkeletonTrackingState::PositionOnly, 0.0)]));

        let events: Vec<_> = rx.try_iter().map(|m| m.event).collect();
        assert_eq!(events, vec![SourceEvent::SubjectLost]);

        assert!(capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 0.0)]));
        let event = rx.try_recv().unwrap().event;
        assert_eq!(event, SourceEvent::SubjectFound);
        assert!(matches!(rx.try_recv().unwrap().event, SourceEvent::Frame(_)));
    }

    #[test]
    fn non_finite_joints_are_skipped() {
        let (tx, rx) = bounded(8);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("s")), tx);
        let mut raw = skeleton(SkeletonTrackingState::Tracked, 0.0);
        raw.joints[JointName::Head.index()].position = Vector3::new(f64::INFINITY, 0.0, 0.0);

        assert!(capture.on_tick(&[raw]));
        let captured = next_frame(&rx);
        assert!(captured.frame.joint(JointName::Head).is_none());
        assert_eq!(captured.frame.joints.len(), JOINT_COUNT - 1);
    }

    #[test]
    fn spine_rotation_becomes_orientation() {
        let (tx, rx) = bounded(8);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("s")), tx);
        let mut raw = skeleton(SkeletonTrackingState::Tracked, 0.0);
        raw.spine_rotation_w = Some(0.45);

        capture.on_tick(&[raw]);
        let orientation = next_frame(&rx).orientation.unwrap();
        assert!((orientation.radians() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn timestamps_do_not_decrease() {
        let (tx, rx) = bounded(16);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("s")), tx);
        for _ in 0..5 {
            capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 0.0)]);
        }
        let stamps: Vec<u64> = rx
            .try_iter()
            .filter_map(|m| match m.event {
                SourceEvent::Frame(c) => Some(c.frame.captured_at_millis),
                _ => None,
            })
            .collect();
        assert_eq!(stamps.len(), 5);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn loss_is_reported_once_the_queue_has_room() {
        let (tx, rx) = bounded(1);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("s")), tx);

        assert!(capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 0.0)]));
        assert!(!capture.on_tick(&[]));
        assert!(matches!(rx.try_recv().unwrap().event, SourceEvent::Frame(_)));
        assert!(rx.try_recv().is_err());

        assert!(!capture.on_tick(&[]));
        assert!(!capture.on_tick(&[]));
        let events: Vec<_> = rx.try_iter().map(|m| m.event).collect();
        assert_eq!(events, vec![SourceEvent::SubjectLost]);

        assert!(capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 0.0)]));
        assert_eq!(rx.try_recv().unwrap().event, SourceEvent::SubjectFound);
    }

    #[test]
    fn channel_yields_frames_until_capture_is_dropped() {
        let (capture, frames) = LiveCapture::channel(SharedState::new(SessionState::new("s")), 8);

        assert!(capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 1.0)]));
        assert!(!capture.on_tick(&[]));
        assert!(capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 2.0)]));
        drop(capture);

        let hips: Vec<f64> = frames
            .map(|captured| captured.frame.joint(JointName::HipCenter).unwrap().position.x)
            .collect();
        assert_eq!(hips, vec![1.0, 2.0]);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (tx, rx) = bounded(1);
        let capture = LiveCapture::new(SharedState::new(SessionState::new("s")), tx);
        for _ in 0..3 {
            assert!(capture.on_tick(&[skeleton(SkeletonTrackingState::Tracked, 0.0)]));
        }
        assert_eq!(rx.len(), 1);
    }
}
