use crossbeam_channel::Sender;

use crate::types::{Frame, JointName, TrackingConfidence, Vector3};

pub const BONES: &[(JointName, JointName)] = &[
    // Torso
    (JointName::Head, JointName::ShoulderCenter),
    (JointName::ShoulderCenter, JointName::ShoulderLeft),
    (JointName::ShoulderCenter, JointName::ShoulderRight),
    (JointName::ShoulderCenter, JointName::Spine),
    (JointName::Spine, JointName::HipCenter),
    (JointName::HipCenter, JointName::HipLeft),
    (JointName::HipCenter, JointName::HipRight),
    // Left arm
    (JointName::ShoulderLeft, JointName::ElbowLeft),
    (JointName::ElbowLeft, JointName::WristLeft),
    (JointName::WristLeft, JointName::HandLeft),
    // Right arm
    (JointName::ShoulderRight, JointName::ElbowRight),
    (JointName::ElbowRight, JointName::WristRight),
    (JointName::WristRight, JointName::HandRight),
    // Left leg
    (JointName::HipLeft, JointName::KneeLeft),
    (JointName::KneeLeft, JointName::AnkleLeft),
    (JointName::AnkleLeft, JointName::FootLeft),
    // Right leg
    (JointName::HipRight, JointName::KneeRight),
    (JointName::KneeRight, JointName::AnkleRight),
    (JointName::AnkleRight, JointName::FootRight),
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 354.0,
            height: 244.0,
        }
    }
}

impl Viewport {
    /// Maps a normalized position to viewport pixels, origin at the centre, Y up.
    pub fn project(&self, position: Vector3, scale: f64) -> (f32, f32) {
        let x = position.x as f32 * self.width;
        let y = -position.y as f32 * self.height;
        let scale = scale as f32;
        (
            x * scale + self.width * 0.5,
            y * scale + self.height * 0.5,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoneStyle {
    Tracked,
    Inferred,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedJoint {
    pub name: JointName,
    pub point: (f32, f32),
    pub confidence: TrackingConfidence,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedBone {
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub style: BoneStyle,
}

/// Drawable view of one normalized frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SkeletonView {
    pub subject_id: String,
    pub captured_at_millis: u64,
    pub joints: Vec<ProjectedJoint>,
    pub bones: Vec<ProjectedBone>,
}

impl SkeletonView {
    pub fn project(frame: &Frame, viewport: &Viewport, scale: f64) -> Self {
        let joints = frame
            .joints
            .iter()
            .filter(|joint| joint.confidence != TrackingConfidence::NotTracked)
            .map(|joint| ProjectedJoint {
                name: joint.name,
                point: viewport.project(joint.position, scale),
                confidence: joint.confidence,
            })
            .collect();

        let bones = BONES
            .iter()
            .filter_map(|&(a, b)| {
                let (ja, jb) = (frame.joint(a)?, frame.joint(b)?);
                let style = bone_style(ja.confidence, jb.confidence)?;
                Some(ProjectedBone {
                    from: viewport.project(ja.position, scale),
                    to: viewport.project(jb.position, scale),
                    style,
                })
            })
            .collect();

        Self {
            subject_id: frame.subject_id.clone(),
            captured_at_millis: frame.captured_at_millis,
            joints,
            bones,
        }
    }
}

/// Bones are hidden when either end is untracked or both ends are guesses.
fn bone_style(a: TrackingConfidence, b: TrackingConfidence) -> Option<BoneStyle> {
    use TrackingConfidence::*;
    match (a, b) {
        (NotTracked, _) | (_, NotTracked) => None,
        (Inferred, Inferred) => None,
        (Tracked, Tracked) => Some(BoneStyle::Tracked),
        _ => Some(BoneStyle::Inferred),
    }
}

/// Receives every normalized frame. Failures stay on the renderer's side.
pub trait FrameRenderer: Send + Sync {
    fn render(&self, frame: &Frame, scale: f64);
}

/// Hands projected views to a UI thread, dropping them when it lags.
pub struct ChannelRenderer {
    viewport: Viewport,
    view_tx: Sender<SkeletonView>,
}

impl ChannelRenderer {
    pub fn new(viewport: Viewport, view_tx: Sender<SkeletonView>) -> Self {
        Self { viewport, view_tx }
    }
}

impl FrameRenderer for ChannelRenderer {
    fn render(&self, frame: &Frame, scale: f64) {
        let view = SkeletonView::project(frame, &self.viewport, scale);
        let _ = self.view_tx.try_send(view);
    }
}

#[derive(Debug, Default)]
pub struct LogRenderer;

impl FrameRenderer for LogRenderer {
    fn render(&self, frame: &Frame, _scale: f64) {
        if let Some(head) = frame.joint(JointName::Head) {
            log::trace!(
                "{} @{}ms: {} joints, {} at ({:.3}, {:.3}, {:.3})",
                frame.subject_id,
                frame.captured_at_millis,
                frame.joints.len(),
                head.name.label(),
                head.position.x,
                head.position.y,
                head.position.z
            );
        } else {
            log::trace!(
                "{} @{}ms: {} joints",
                frame.subject_id,
                frame.captured_at_millis,
                frame.joints.len()
            );
        }
    }
}
