//! [`RealSweepSensor`] – curtain returns looked up in a recorded sweep.
//!
//! A sweep is a stack of captures taken while a fronto-parallel curtain was
//! swept through the scene; every sample records, per pixel, the range the
//! curtain sat at and the intensity it saw.  Sensing a planned path then
//! reduces to: for each pixel, take the sample whose recorded range is closest
//! to the path's curtain depth and read its intensity.
//!
//! This backend has not been validated against recorded hardware data; a
//! warning is logged whenever one is constructed.

use lcdepth_types::{DepthCandidates, LcError, SensorConfig, SensorKind};
use ndarray::{Array3, s};
use tracing::warn;

use crate::planner::ScanPath;
use crate::sensor::{CurtainSensor, IntensityModel, Scene, SensedReturn};

/// Sensor that reads intensities from a recorded `(samples, H, W, 2)` sweep.
#[derive(Debug, Clone)]
pub struct RealSweepSensor {
    candidates: DepthCandidates,
    model: IntensityModel,
    intensity_scale: f32,
    return_threshold: f32,
}

impl RealSweepSensor {
    pub fn new(candidates: DepthCandidates, cfg: &SensorConfig) -> Self {
        warn!("real sweep sensor backend is unverified against hardware recordings");
        Self {
            candidates,
            model: IntensityModel::from(cfg),
            intensity_scale: cfg.intensity_scale,
            return_threshold: cfg.return_threshold,
        }
    }
}

impl CurtainSensor for RealSweepSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Real
    }

    fn candidates(&self) -> &DepthCandidates {
        &self.candidates
    }

    fn sense(&mut self, scene: &Scene<'_>, path: &ScanPath) -> Result<SensedReturn, LcError> {
        let sweep = scene.sweep.ok_or_else(|| {
            LcError::MissingInput("real sensor needs a recorded sweep".to_string())
        })?;
        let (samples, height, width, channels) = sweep.dim();
        if channels != 2 || samples == 0 {
            return Err(LcError::shape(
                "sweep",
                "(samples >= 1, H, W, 2)",
                sweep.dim(),
            ));
        }
        if let Some(depth) = scene.depth
            && depth.dim() != (height, width)
        {
            return Err(LcError::shape("sweep vs depth map", depth.dim(), (height, width)));
        }

        let n = self.candidates.len();
        let mut likelihood = Array3::<f32>::from_elem((n, height, width), f32::NAN);
        let mut points = Vec::new();
        let mut column = vec![0.0_f32; n];
        let mut unmatched = 0_usize;

        for x in 0..width {
            let angle = scene.intrinsics.column_angle(x as f32);
            let Some(placement) = path.depth_at(angle) else {
                unmatched += height;
                continue;
            };
            for y in 0..height {
                let nearest = sweep
                    .slice(s![.., y, x, 0])
                    .iter()
                    .enumerate()
                    .filter(|(_, z)| z.is_finite())
                    .min_by(|a, b| (a.1 - placement).abs().total_cmp(&(b.1 - placement).abs()))
                    .map(|(i, &z)| (i, z));
                let Some((sample, range)) = nearest else {
                    unmatched += 1;
                    continue;
                };

                let intensity = sweep[[sample, y, x, 1]] * self.intensity_scale;
                if intensity > self.return_threshold {
                    points.push(scene.intrinsics.unproject(x as f32, y as f32, range));
                }
                self.model
                    .likelihood_into(&self.candidates, placement, intensity, &mut column);
                for (i, &v) in column.iter().enumerate() {
                    likelihood[[i, y, x]] = v;
                }
            }
        }

        if unmatched == height * width {
            warn!("sweep had no usable samples along the planned path");
        }
        Ok(SensedReturn { likelihood, points })
    }
}
