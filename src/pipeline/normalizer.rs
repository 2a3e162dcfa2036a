use std::f64::consts::PI;

use crate::types::{Frame, Joint, JointName, Vector3};

/// Trunk rotation around the vertical axis, in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrunkOrientation {
    radians: f64,
}

impl TrunkOrientation {
    pub fn from_radians(radians: f64) -> Option<Self> {
        radians.is_finite().then_some(Self { radians })
    }

    /// Maps the W component of the spine bone's absolute rotation quaternion
    /// onto an angle, scaled the way the capture client always has.
    pub fn from_spine_quaternion_w(w: f64) -> Option<Self> {
        Self::from_radians(w * PI * 50.0 / 45.0)
    }

    pub fn radians(&self) -> f64 {
        self.radians
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NormalizerConfig {
    pub rotate: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { rotate: true }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn translation_only() -> Self {
        Self::new(NormalizerConfig { rotate: false })
    }

    /// Returns a copy of `frame` expressed relative to its hip center.
    ///
    /// Frames without a `HipCenter` joint come back unchanged. Rotation is
    /// applied only when it is enabled and `orientation` is known.
    pub fn normalize(&self, frame: &Frame, orientation: Option<TrunkOrientation>) -> Frame {
        let Some(origin) = frame.joint(JointName::HipCenter).map(|joint| joint.position) else {
            return frame.clone();
        };

        let rotation = orientation
            .filter(|_| self.config.rotate)
            .map(|o| (o.radians().sin(), o.radians().cos()));

        let joints = frame
            .joints
            .iter()
            .map(|joint| {
                let relative = joint.position - origin;
                let position = match rotation {
                    Some((sin, cos)) => rotate_xz(relative, sin, cos),
                    None => relative,
                };
                Joint {
                    position,
                    ..joint.clone()
                }
            })
            .collect();

        Frame {
            subject_id: frame.subject_id.clone(),
            captured_at_millis: frame.captured_at_millis,
            joints,
        }
    }
}

fn rotate_xz(v: Vector3, sin: f64, cos: f64) -> Vector3 {
    Vector3::new(v.x * cos + v.z * sin, v.y, v.z * cos - v.x * sin)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;
    use crate::types::TrackingConfidence;

    fn approx(a: Vector3, b: Vector3) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < 1e-9
    }

    fn sample_frame() -> Frame {
        Frame::new(
            "subject",
            10,
            vec![
                Joint::tracked(JointName::HipCenter, Vector3::new(0.5, 1.0, 2.0)),
                Joint::tracked(JointName::Head, Vector3::new(0.5, 1.8, 2.1)),
                Joint::new(
                    JointName::HandLeft,
                    Vector3::new(0.1, 1.1, 1.9),
                    TrackingConfidence::Inferred,
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn translates_every_joint_relative_to_hip_center() {
        let out = Normalizer::translation_only().normalize(&sample_frame(), None);

        assert!(approx(out.joint(JointName::HipCenter).unwrap().position, Vector3::ZERO));
        assert!(approx(
            out.joint(JointName::Head).unwrap().position,
            Vector3::new(0.0, 0.8, 0.1)
        ));
        let hand = out.joint(JointName::HandLeft).unwrap();
        assert!(approx(hand.position, Vector3::new(-0.4, 0.1, -0.1)));
        assert_eq!(hand.confidence, TrackingConfidence::Inferred);
        assert_eq!(out.subject_id, "subject");
        assert_eq!(out.captured_at_millis, 10);
    }

    #[test]
    fn normalizing_twice_matches_normalizing_once() {
        let normalizer = Normalizer::translation_only();
        let once = normalizer.normalize(&sample_frame(), None);
        let twice = normalizer.normalize(&once, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn frame_without_hip_center_is_returned_unchanged() {
        let frame = Frame::new(
            "s",
            3,
            vec![Joint::tracked(JointName::Head, Vector3::new(1.0, 2.0, 3.0))],
        )
        .unwrap();
        let orientation = TrunkOrientation::from_radians(1.0);
        assert_eq!(Normalizer::default().normalize(&frame, orientation), frame);
    }

    #[test]
    fn input_frame_is_not_mutated() {
        let frame = sample_frame();
        let before = frame.clone();
        let _ = Normalizer::default().normalize(&frame, TrunkOrientation::from_radians(0.3));
        assert_eq!(frame, before);
    }

    #[test]
    fn rotates_xz_plane_and_keeps_y() {
        let frame = Frame::new(
            "s",
            0,
            vec![
                Joint::tracked(JointName::HipCenter, Vector3::ZERO),
                Joint::tracked(JointName::HandRight, Vector3::new(1.0, 0.7, 0.0)),
            ],
        )
        .unwrap();
        let quarter_turn = TrunkOrientation::from_radians(FRAC_PI_2);

        let out = Normalizer::default().normalize(&frame, quarter_turn);
        // x' = x cos + z sin = 0, z' = z cos - x sin = -1
        assert!(approx(
            out.joint(JointName::HandRight).unwrap().position,
            Vector3::new(0.0, 0.7, -1.0)
        ));
    }

    #[test]
    fn missing_orientation_or_disabled_rotation_only_translates() {
        let frame = sample_frame();
        let translated = Normalizer::translation_only().normalize(&frame, None);

        assert_eq!(Normalizer::default().normalize(&frame, None), translated);
        assert_eq!(
            Normalizer::translation_only().normalize(&frame, TrunkOrientation::from_radians(0.8)),
            translated
        );
    }

    #[test]
    fn spine_quaternion_scale() {
        let orientation = TrunkOrientation::from_spine_quaternion_w(0.9).unwrap();
        assert!((orientation.radians() - PI).abs() < 1e-12);
        assert!(TrunkOrientation::from_spine_quaternion_w(f64::NAN).is_none());
    }
}
