//! [`SimulatedSensor`] – light-curtain returns synthesised from ground truth.
//!
//! For every image column the curtain depth is read off the path at the
//! column's ray angle.  A pixel whose true depth is `z` returns the noise-free
//! intensity `m · exp(−(z − placement)² / 2σᵢ²)`, which is then converted to a
//! likelihood with the shared [`IntensityModel`].
//!
//! | Pixel | Likelihood |
//! |---|---|
//! | valid truth, column covered by the path | intensity model |
//! | column outside the path's angular extent | uniform |
//! | truth missing, non-positive or NaN | NaN |
//!
//! # Example
//!
//! ```rust
//! use lcdepth_hal::planner::{PathPoint, ScanPath};
//! use lcdepth_hal::sensor::{CurtainSensor, Scene};
//! use lcdepth_hal::sim::SimulatedSensor;
//! use lcdepth_types::{DepthCandidates, Intrinsics, SensorConfig};
//! use ndarray::Array2;
//!
//! let candidates = DepthCandidates::power_spaced(1.0, 10.0, 10, 1.0).unwrap();
//! let mut sensor = SimulatedSensor::new(candidates, &SensorConfig::default());
//!
//! let truth = Array2::from_elem((4, 4), 6.0_f32);
//! let path = ScanPath {
//!     points: vec![PathPoint { angle_rad: 0.0, depth: 6.0, bin: 5 }],
//!     angle_step: 1.0,
//! };
//! let scene = Scene {
//!     depth: Some(truth.view()),
//!     intrinsics: Intrinsics::new(4.0, 4.0, 1.5, 1.5),
//!     sweep: None,
//! };
//! let ret = sensor.sense(&scene, &path).unwrap();
//! assert_eq!(ret.likelihood.dim(), (10, 4, 4));
//! assert_eq!(ret.points.len(), 16);
//! ```

use lcdepth_types::{DepthCandidates, LcError, SensorConfig, SensorKind};
use ndarray::{Array3, s};

use crate::planner::ScanPath;
use crate::sensor::{CurtainSensor, IntensityModel, Scene, SensedReturn};

/// Sensor that renders curtain returns from a ground-truth depth map.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    candidates: DepthCandidates,
    model: IntensityModel,
    return_threshold: f32,
}

impl SimulatedSensor {
    pub fn new(candidates: DepthCandidates, cfg: &SensorConfig) -> Self {
        Self {
            candidates,
            model: IntensityModel::from(cfg),
            return_threshold: cfg.return_threshold,
        }
    }
}

impl CurtainSensor for SimulatedSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Simulated
    }

    fn candidates(&self) -> &DepthCandidates {
        &self.candidates
    }

    fn sense(&mut self, scene: &Scene<'_>, path: &ScanPath) -> Result<SensedReturn, LcError> {
        let depth = scene.depth.ok_or_else(|| {
            LcError::MissingInput("simulated sensor needs a ground-truth depth map".to_string())
        })?;
        let (height, width) = depth.dim();
        let n = self.candidates.len();
        let mut likelihood = Array3::<f32>::zeros((n, height, width));
        let mut points = Vec::new();
        let mut column = vec![0.0_f32; n];

        for x in 0..width {
            let angle = scene.intrinsics.column_angle(x as f32);
            let Some(placement) = path.depth_at(angle) else {
                likelihood.slice_mut(s![.., .., x]).fill(1.0 / n as f32);
                continue;
            };
            for y in 0..height {
                let z = depth[[y, x]];
                if !(z.is_finite() && z > 0.0) {
                    likelihood.slice_mut(s![.., y, x]).fill(f32::NAN);
                    continue;
                }
                let intensity = self.model.expected_intensity(z, placement);
                if intensity > self.return_threshold {
                    points.push(scene.intrinsics.unproject(x as f32, y as f32, z));
                }
                self.model
                    .likelihood_into(&self.candidates, placement, intensity, &mut column);
                for (i, &v) in column.iter().enumerate() {
                    likelihood[[i, y, x]] = v;
                }
            }
        }

        Ok(SensedReturn { likelihood, points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PathPoint;
    use lcdepth_types::Intrinsics;
    use ndarray::Array2;

    fn candidates() -> DepthCandidates {
        DepthCandidates::power_spaced(1.0, 10.0, 19, 1.0).unwrap()
    }

    fn flat_path(depth: f32, half_span: f32) -> ScanPath {
        ScanPath {
            points: vec![
                PathPoint {
                    angle_rad: -half_span,
                    depth,
                    bin: 0,
                },
                PathPoint {
                    angle_rad: half_span,
                    depth,
                    bin: 0,
                },
            ],
            angle_step: 0.0,
        }
    }

    fn argmax(values: impl Iterator<Item = f32>) -> usize {
        values
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn surface_on_the_curtain_is_detected() {
        let mut sensor = SimulatedSensor::new(candidates(), &SensorConfig::default());
        let truth = Array2::from_elem((3, 5), 5.0_f32);
        let scene = Scene {
            depth: Some(truth.view()),
            intrinsics: Intrinsics::new(10.0, 10.0, 2.0, 1.0),
            sweep: None,
        };
        let ret = sensor.sense(&scene, &flat_path(5.0, 1.0)).unwrap();
        assert_eq!(ret.points.len(), 15);
        assert!((ret.points[0][2] - 5.0).abs() < 1e-6);
        // Candidate 8 is 5.0 m.
        assert_eq!(argmax((0..19).map(|i| ret.likelihood[[i, 1, 2]])), 8);
    }

    #[test]
    fn missing_return_produces_no_points() {
        let mut sensor = SimulatedSensor::new(candidates(), &SensorConfig::default());
        let truth = Array2::from_elem((2, 2), 9.0_f32);
        let scene = Scene {
            depth: Some(truth.view()),
            intrinsics: Intrinsics::new(10.0, 10.0, 0.5, 0.5),
            sweep: None,
        };
        let ret = sensor.sense(&scene, &flat_path(3.0, 1.0)).unwrap();
        assert!(ret.points.is_empty());
        // The curtain depth itself is ruled out.
        assert!(ret.likelihood[[4, 0, 0]] < 1e-6);
    }

    #[test]
    fn invalid_truth_is_nan_and_uncovered_columns_are_uniform() {
        let mut sensor = SimulatedSensor::new(candidates(), &SensorConfig::default());
        let mut truth = Array2::from_elem((2, 3), 5.0_f32);
        truth[[0, 1]] = f32::NAN;
        truth[[1, 1]] = 0.0;
        let scene = Scene {
            depth: Some(truth.view()),
            intrinsics: Intrinsics::new(1.0, 1.0, 1.0, 0.5),
            sweep: None,
        };
        // Column 0 sits at -45°, outside a ±10° path.
        let ret = sensor.sense(&scene, &flat_path(5.0, 0.17)).unwrap();
        assert!(ret.likelihood[[3, 0, 1]].is_nan());
        assert!(ret.likelihood[[3, 1, 1]].is_nan());
        assert!((ret.likelihood[[3, 0, 0]] - 1.0 / 19.0).abs() < 1e-6);
        assert!((ret.likelihood[[3, 0, 2]] - 1.0 / 19.0).abs() < 1e-6);
    }

    #[test]
    fn missing_truth_is_an_error() {
        let mut sensor = SimulatedSensor::new(candidates(), &SensorConfig::default());
        let scene = Scene {
            depth: None,
            intrinsics: Intrinsics::new(1.0, 1.0, 0.0, 0.0),
            sweep: None,
        };
        let err = sensor.sense(&scene, &flat_path(5.0, 1.0)).unwrap_err();
        assert!(matches!(err, LcError::MissingInput(_)));
    }
}
