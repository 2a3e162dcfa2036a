pub mod capture;
pub mod normalizer;
pub mod recorder;
pub mod replay;
pub mod skeleton;

use crate::types::Frame;

// Re-exports for convenience
pub use capture::{LiveCapture, LiveFrames, RawJoint, RawSkeleton, SkeletonTrackingState};
pub use normalizer::{Normalizer, NormalizerConfig, TrunkOrientation};
pub use recorder::Recorder;
pub use replay::{ReplayHandle, ReplayLog, ReplayParams, spawn_replay};
pub use skeleton::{ChannelRenderer, FrameRenderer, LogRenderer, SkeletonView, Viewport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Live,
    /// Carries the replay generation that produced the frame.
    Replay(u64),
}

/// A frame as produced by a source, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub frame: Frame,
    pub orientation: Option<TrunkOrientation>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    Frame(CapturedFrame),
    SubjectLost,
    SubjectFound,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceMessage {
    pub kind: SourceKind,
    pub event: SourceEvent,
}
