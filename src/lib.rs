//! Skeletal pose frame pipeline: capture or replay, hip-relative
//! normalization, then rendering, recording and broker delivery.

pub mod config;
pub mod delivery;
pub mod error;
pub mod frame_log;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod types;

pub use config::PipelineConfig;
pub use session::{SessionController, SessionEvent, SessionStats};
pub use types::{Frame, Joint, JointName, TrackingConfidence, Vector3};
