//! `lcdepth-types` – shared vocabulary for the light-curtain depth stack.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`LcError`] – the single error type returned by every fallible
//!   operation, from shape validation to sensor faults.
//! - [`Space`] – whether a depth-probability volume holds log-probabilities
//!   or plain probabilities.
//! - [`Intrinsics`] – pinhole camera calibration, including the
//!   column-to-ray-angle mapping used by the planner and sensors.
//! - [`DepthCandidates`][candidates::DepthCandidates] – the discretised depth
//!   axis shared by every distribution in a run.
//! - [`config`] – the structured `lc.*` configuration surface.

pub mod candidates;
pub mod config;

pub use candidates::DepthCandidates;
pub use config::{
    LcConfig, PlannerKind, PlannerParams, PlannerSpec, Resolution, SensorConfig, SensorKind,
    UFieldConfig,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Representation of the values stored in a depth-probability volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    /// Values are log-probabilities; each pixel column sums to 1 after `exp`.
    Log,
    /// Values are probabilities; each pixel column sums to 1.
    Linear,
}

/// Pinhole camera intrinsics in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Intrinsics {
    /// Horizontal focal length (pixels).
    pub fx: f32,
    /// Vertical focal length (pixels).
    pub fy: f32,
    /// Principal point column (pixels).
    pub cx: f32,
    /// Principal point row (pixels).
    pub cy: f32,
}

impl Intrinsics {
    /// Create intrinsics from focal lengths and principal point.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Horizontal ray angle (radians, positive to the right) of pixel column `u`.
    pub fn column_angle(&self, u: f32) -> f32 {
        ((u - self.cx) / self.fx).atan()
    }

    /// Fractional pixel column hit by a ray at horizontal angle `theta`.
    pub fn column_for_angle(&self, theta: f32) -> f32 {
        self.cx + self.fx * theta.tan()
    }

    /// Ray angles (radians) through the outer edges of the first and last
    /// pixel columns of an image `width` pixels wide.
    pub fn horizontal_extent(&self, width: usize) -> (f32, f32) {
        (self.column_angle(-0.5), self.column_angle(width as f32 - 0.5))
    }

    /// Back-project pixel `(u, v)` at z-depth `z` into camera coordinates.
    pub fn unproject(&self, u: f32, v: f32, z: f32) -> [f32; 3] {
        [(u - self.cx) / self.fx * z, (v - self.cy) / self.fy * z, z]
    }

    /// Check that the focal lengths are usable.
    pub fn validate(&self) -> Result<(), LcError> {
        let finite = [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(LcError::InvalidConfig(format!(
                "intrinsics must be finite with positive focal lengths, got {self:?}"
            )));
        }
        Ok(())
    }
}

/// Error type spanning shape validation, configuration, and sensor faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LcError {
    #[error("Shape Mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("Invalid Configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid Depth Candidates: {0}")]
    InvalidCandidates(String),

    #[error("Sensor Fault on {component}: {details}")]
    SensorFault { component: String, details: String },

    #[error("Missing Input: {0}")]
    MissingInput(String),
}

impl LcError {
    /// Shorthand for a [`LcError::ShapeMismatch`] built from two `Debug` shapes.
    pub fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        found: impl std::fmt::Debug,
    ) -> Self {
        LcError::ShapeMismatch {
            context: context.into(),
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_serializes_lowercase() {
        let json = serde_json::to_string(&Space::Log).unwrap();
        assert_eq!(json, "\"log\"");
        let back: Space = serde_json::from_str("\"linear\"").unwrap();
        assert_eq!(back, Space::Linear);
    }

    #[test]
    fn column_angle_inverts_column_for_angle() {
        let k = Intrinsics::new(200.0, 200.0, 64.0, 48.0);
        assert!(k.column_angle(64.0).abs() < 1e-6);
        for u in [0.0_f32, 10.5, 64.0, 127.0] {
            let theta = k.column_angle(u);
            assert!((k.column_for_angle(theta) - u).abs() < 1e-3);
        }
    }

    #[test]
    fn horizontal_extent_covers_whole_pixels() {
        let k = Intrinsics::new(100.0, 100.0, 49.5, 50.0);
        let (left, right) = k.horizontal_extent(100);
        assert!((left + right).abs() < 1e-6);
        assert!((right - (0.5_f32).atan()).abs() < 1e-5);
        assert!((k.column_for_angle(left) + 0.5).abs() < 1e-3);
    }

    #[test]
    fn intrinsics_validate_rejects_zero_focal() {
        assert!(Intrinsics::new(0.0, 1.0, 0.0, 0.0).validate().is_err());
        assert!(Intrinsics::new(1.0, 1.0, f32::NAN, 0.0).validate().is_err());
        assert!(Intrinsics::new(1.0, 1.0, 0.5, 0.5).validate().is_ok());
    }

    #[test]
    fn lc_error_display() {
        let err = LcError::shape("belief", (1, 64, 8, 8), (1, 32, 8, 8));
        let msg = err.to_string();
        assert!(msg.contains("Shape Mismatch"));
        assert!(msg.contains("belief"));
        assert!(msg.contains("(1, 64, 8, 8)"));

        let err2 = LcError::SensorFault {
            component: "real_sweep".to_string(),
            details: "no sweep data".to_string(),
        };
        assert!(err2.to_string().contains("real_sweep"));
    }

    #[test]
    fn lc_error_roundtrips_through_json() {
        let err = LcError::MissingInput("dmaps".to_string());
        let json = serde_json::to_string(&err).unwrap();
        let back: LcError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
