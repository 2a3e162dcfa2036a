use std::{collections::HashSet, ops::Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, other: Vector3) -> Vector3 {
        Vector3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// Joints of the sensor skeleton, in the order the sensor reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointName {
    HipCenter,
    Spine,
    ShoulderCenter,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
}

pub const JOINT_COUNT: usize = 20;

impl JointName {
    pub const ALL: [JointName; JOINT_COUNT] = [
        JointName::HipCenter,
        JointName::Spine,
        JointName::ShoulderCenter,
        JointName::Head,
        JointName::ShoulderLeft,
        JointName::ElbowLeft,
        JointName::WristLeft,
        JointName::HandLeft,
        JointName::ShoulderRight,
        JointName::ElbowRight,
        JointName::WristRight,
        JointName::HandRight,
        JointName::HipLeft,
        JointName::KneeLeft,
        JointName::AnkleLeft,
        JointName::FootLeft,
        JointName::HipRight,
        JointName::KneeRight,
        JointName::AnkleRight,
        JointName::FootRight,
    ];

    /// Position of this joint in the sensor's joint array.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            JointName::HipCenter => "HipCenter",
            JointName::Spine => "Spine",
            JointName::ShoulderCenter => "ShoulderCenter",
            JointName::Head => "Head",
            JointName::ShoulderLeft => "ShoulderLeft",
            JointName::ElbowLeft => "ElbowLeft",
            JointName::WristLeft => "WristLeft",
            JointName::HandLeft => "HandLeft",
            JointName::ShoulderRight => "ShoulderRight",
            JointName::ElbowRight => "ElbowRight",
            JointName::WristRight => "WristRight",
            JointName::HandRight => "HandRight",
            JointName::HipLeft => "HipLeft",
            JointName::KneeLeft => "KneeLeft",
            JointName::AnkleLeft => "AnkleLeft",
            JointName::FootLeft => "FootLeft",
            JointName::HipRight => "HipRight",
            JointName::KneeRight => "KneeRight",
            JointName::AnkleRight => "AnkleRight",
            JointName::FootRight => "FootRight",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingConfidence {
    #[default]
    Tracked,
    Inferred,
    NotTracked,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    #[serde(rename = "jointName")]
    pub name: JointName,
    #[serde(rename = "transform")]
    pub position: Vector3,
    #[serde(rename = "trackingState", default)]
    pub confidence: TrackingConfidence,
}

impl Joint {
    pub fn new(name: JointName, position: Vector3, confidence: TrackingConfidence) -> Self {
        Self {
            name,
            position,
            confidence,
        }
    }

    pub fn tracked(name: JointName, position: Vector3) -> Self {
        Self::new(name, position, TrackingConfidence::Tracked)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame has no joints")]
    Empty,
    #[error("joint {0:?} appears more than once")]
    DuplicateJoint(JointName),
    #[error("joint {0:?} has a non-finite position")]
    NonFinite(JointName),
}

/// One timestamped pose of a single subject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "subjectID")]
    pub subject_id: String,
    #[serde(rename = "time", with = "millis_string")]
    pub captured_at_millis: u64,
    pub joints: Vec<Joint>,
}

impl Frame {
    pub fn new(
        subject_id: impl Into<String>,
        captured_at_millis: u64,
        joints: Vec<Joint>,
    ) -> Result<Self, FrameError> {
        let frame = Self {
            subject_id: subject_id.into(),
            captured_at_millis,
            joints,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Checks the invariants a captured frame must hold.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.joints.is_empty() {
            return Err(FrameError::Empty);
        }
        let mut seen = HashSet::with_capacity(self.joints.len());
        for joint in &self.joints {
            if !seen.insert(joint.name) {
                return Err(FrameError::DuplicateJoint(joint.name));
            }
            if !joint.position.is_finite() {
                return Err(FrameError::NonFinite(joint.name));
            }
        }
        Ok(())
    }

    pub fn joint(&self, name: JointName) -> Option<&Joint> {
        self.joints.iter().find(|joint| joint.name == name)
    }
}

// The log format carries timestamps as decimal strings.
mod millis_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(millis: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&millis.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid millisecond timestamp {raw:?}")))
    }
}
