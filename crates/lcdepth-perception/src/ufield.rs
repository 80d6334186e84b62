//! Uncertainty-field projection.
//!
//! A light curtain is steered in the horizontal plane, so the planner needs
//! the belief collapsed to a top-down view: one depth distribution per ray
//! angle.  [`project`] builds that view from a depth-probability volume by
//! averaging a horizontal band of image rows and re-indexing image columns by
//! ray angle.
//!
//! ```text
//!   image (H × W)                       field (angle × depth)
//!  ┌────────────────┐                  ┌──────────────┐
//!  │                │                  │θ₀ ░░▓▓░░░░░░ │
//!  │▒▒▒▒▒▒▒▒▒▒▒▒▒▒▒▒│  band average    │θ₁ ░░░▓▓░░░░░ │
//!  │▒▒▒▒ band ▒▒▒▒▒▒│ ───────────────► │ ⋮            │
//!  │▒▒▒▒▒▒▒▒▒▒▒▒▒▒▒▒│  column → angle  │θₐ ░░░░░░░▓▓░ │
//!  │                │                  └──────────────┘
//!  └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use lcdepth_perception::{distribution::uniform, ufield::project};
//! use lcdepth_types::{DepthCandidates, Intrinsics, Space, UFieldConfig};
//!
//! let candidates = DepthCandidates::power_spaced(1.0, 10.0, 16, 1.0).unwrap();
//! let intrinsics = Intrinsics::new(20.0, 20.0, 15.5, 11.5);
//! let belief = uniform((1, 16, 24, 32), Space::Log);
//! let cfg = UFieldConfig { angle_bins: 8, ..UFieldConfig::default() };
//!
//! let uf = project(belief.view(), Space::Log, &intrinsics, &candidates, &cfg).unwrap();
//! assert_eq!(uf.field.dim(), (1, 8, 16));
//! assert!((uf.field[[0, 3, 5]] - 1.0 / 16.0).abs() < 1e-5);
//! ```

use crate::distribution::depth_taps;
use lcdepth_types::{DepthCandidates, Intrinsics, LcError, Space, UFieldConfig};
use ndarray::{Array2, Array3, ArrayView4, Axis, s};

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// Axes of an uncertainty field: ray angle per row, candidate depth per
/// column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGeometry {
    /// Centre angle (radians, positive to the right) of every angular bin.
    pub angles: Vec<f32>,
    /// Angular width (radians) of one bin.
    pub angle_step: f32,
    /// Depth (metres) of every field depth bin.
    pub depths: DepthCandidates,
}

impl FieldGeometry {
    /// Geometry for an image `width` pixels wide seen through `intrinsics`.
    ///
    /// The angular axis covers `cfg.angular_span_deg` centred on the optical
    /// axis, or the camera's own horizontal field of view when unset.
    pub fn new(
        intrinsics: &Intrinsics,
        width: usize,
        candidates: &DepthCandidates,
        cfg: &UFieldConfig,
    ) -> Result<Self, LcError> {
        intrinsics.validate()?;
        if cfg.angle_bins == 0 || width == 0 {
            return Err(LcError::InvalidConfig(
                "uncertainty field needs at least one angle bin and one image column".to_string(),
            ));
        }
        let (lo, hi) = match cfg.angular_span_deg {
            Some(span) => {
                let half = span.to_radians() / 2.0;
                (-half, half)
            }
            None => intrinsics.horizontal_extent(width),
        };
        let step = (hi - lo) / cfg.angle_bins as f32;
        let angles = (0..cfg.angle_bins)
            .map(|k| lo + (k as f32 + 0.5) * step)
            .collect();
        let depths = candidates.resampled(cfg.depth_bins.unwrap_or(candidates.len()))?;
        Ok(Self {
            angles,
            angle_step: step,
            depths,
        })
    }

    /// Number of angular bins.
    pub fn angle_bins(&self) -> usize {
        self.angles.len()
    }

    /// Number of depth bins.
    pub fn depth_bins(&self) -> usize {
        self.depths.len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Projection
// ────────────────────────────────────────────────────────────────────────────

/// Output of [`project`].
#[derive(Debug, Clone)]
pub struct UncertaintyField {
    /// `(batch, angle_bins, depth_bins)`; each in-view row sums to one.  Rows
    /// for angles outside the image, or whose band carries no probability
    /// mass (e.g. fully masked ground truth), are NaN.
    pub field: Array3<f32>,
    /// `(batch, height, width)`; 1 on pixels inside the sampled band.
    pub debug: Array3<f32>,
    pub geometry: FieldGeometry,
}

/// Inclusive row range of the band sampled for image column `u`.
fn band_rows(u: usize, height: usize, intrinsics: &Intrinsics, cfg: &UFieldConfig) -> (usize, usize) {
    let last = (height - 1) as f32;
    let slope = cfg.tilt_deg.to_radians().tan();
    let centre = intrinsics.cy + cfg.row_shift + (u as f32 - intrinsics.cx) * slope;
    let half = (cfg.band_span * height as f32 / 2.0).max(0.5);

    let top = (centre - half).ceil().clamp(0.0, last) as usize;
    let bottom = (centre + half).floor().clamp(0.0, last) as usize;
    if top > bottom {
        let row = centre.round().clamp(0.0, last) as usize;
        (row, row)
    } else {
        (top, bottom)
    }
}

/// Project a depth-probability volume into the angle × depth uncertainty field.
///
/// # Errors
///
/// - [`LcError::ShapeMismatch`] when the depth axis differs from
///   `candidates` or the image is empty.
/// - [`LcError::InvalidConfig`] for unusable intrinsics or zero angle bins.
pub fn project(
    dpv: ArrayView4<f32>,
    space: Space,
    intrinsics: &Intrinsics,
    candidates: &DepthCandidates,
    cfg: &UFieldConfig,
) -> Result<UncertaintyField, LcError> {
    let (batch, depth, height, width) = dpv.dim();
    if depth != candidates.len() {
        return Err(LcError::shape("ufield depth axis", candidates.len(), depth));
    }
    if height == 0 || width == 0 {
        return Err(LcError::shape("ufield image", "non-empty image", (height, width)));
    }
    let geometry = FieldGeometry::new(intrinsics, width, candidates, cfg)?;
    let angle_bins = geometry.angle_bins();
    let depth_bins = geometry.depth_bins();

    let bands: Vec<(usize, usize)> = (0..width)
        .map(|u| band_rows(u, height, intrinsics, cfg))
        .collect();
    let taps = depth_taps(depth, depth_bins);

    let mut field = Array3::<f32>::zeros((batch, angle_bins, depth_bins));
    let mut debug = Array3::<f32>::zeros((batch, height, width));

    for b in 0..batch {
        let volume = dpv.index_axis(Axis(0), b);

        // Band-averaged linear distribution per image column.
        let mut columns = Array2::<f32>::zeros((width, depth));
        for (u, &(top, bottom)) in bands.iter().enumerate() {
            let rows = (bottom - top + 1) as f32;
            debug.slice_mut(s![b, top..=bottom, u]).fill(1.0);
            for y in top..=bottom {
                for i in 0..depth {
                    let v = volume[[i, y, u]];
                    let p = match space {
                        Space::Linear => v,
                        Space::Log => v.exp(),
                    };
                    if p.is_finite() {
                        columns[[u, i]] += p / rows;
                    }
                }
            }
        }

        let mut raw = vec![0.0_f32; depth];
        for (k, &theta) in geometry.angles.iter().enumerate() {
            let mut row = field.slice_mut(s![b, k, ..]);
            let u = intrinsics.column_for_angle(theta);
            if !(u >= -0.5 && u <= width as f32 - 0.5) {
                row.fill(f32::NAN);
                continue;
            }
            let pos = u.clamp(0.0, (width - 1) as f32);
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(width - 1);
            let t = pos - lo as f32;
            for (i, r) in raw.iter_mut().enumerate() {
                *r = columns[[lo, i]] * (1.0 - t) + columns[[hi, i]] * t;
            }

            for (j, &(a, c, w)) in taps.iter().enumerate() {
                row[j] = raw[a] * (1.0 - w) + raw[c] * w;
            }
            let total: f32 = row.sum();
            if total > 0.0 {
                row.mapv_inplace(|v| v / total);
            } else {
                // No mass under the band: nothing is known along this ray.
                row.fill(f32::NAN);
            }
        }
    }

    Ok(UncertaintyField {
        field,
        debug,
        geometry,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::uniform;
    use ndarray::Array4;

    fn axis(n: usize) -> DepthCandidates {
        DepthCandidates::power_spaced(1.0, 10.0, n, 1.0).unwrap()
    }

    fn camera() -> Intrinsics {
        Intrinsics::new(20.0, 20.0, 15.5, 9.5)
    }

    fn argmax(values: &[f32]) -> usize {
        values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn uniform_belief_gives_uniform_rows() {
        let belief = uniform((2, 16, 20, 32), Space::Log);
        let cfg = UFieldConfig {
            angle_bins: 10,
            ..UFieldConfig::default()
        };
        let uf = project(belief.view(), Space::Log, &camera(), &axis(16), &cfg).unwrap();
        assert_eq!(uf.field.dim(), (2, 10, 16));
        for b in 0..2 {
            for k in 0..10 {
                let row: Vec<f32> = uf.field.slice(s![b, k, ..]).to_vec();
                assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
                assert!(row.iter().all(|v| (v - 1.0 / 16.0).abs() < 1e-5));
            }
        }
    }

    #[test]
    fn left_and_right_halves_map_to_first_and_last_angles() {
        let mut belief = Array4::<f32>::zeros((1, 16, 20, 32));
        for y in 0..20 {
            for x in 0..32 {
                let bin = if x < 16 { 2 } else { 12 };
                belief[[0, bin, y, x]] = 1.0;
            }
        }
        let cfg = UFieldConfig {
            angle_bins: 8,
            ..UFieldConfig::default()
        };
        let uf = project(belief.view(), Space::Linear, &camera(), &axis(16), &cfg).unwrap();

        let first: Vec<f32> = uf.field.slice(s![0, 0, ..]).to_vec();
        let last: Vec<f32> = uf.field.slice(s![0, 7, ..]).to_vec();
        assert_eq!(argmax(&first), 2);
        assert_eq!(argmax(&last), 12);
        assert!(uf.geometry.angles[0] < 0.0 && uf.geometry.angles[7] > 0.0);
    }

    #[test]
    fn angles_outside_the_image_are_nan() {
        let belief = uniform((1, 8, 20, 32), Space::Linear);
        let cfg = UFieldConfig {
            angle_bins: 9,
            angular_span_deg: Some(170.0),
            ..UFieldConfig::default()
        };
        let uf = project(belief.view(), Space::Linear, &camera(), &axis(8), &cfg).unwrap();
        assert!(uf.field[[0, 0, 0]].is_nan());
        assert!(uf.field[[0, 8, 3]].is_nan());
        // The central bin looks straight ahead.
        assert!((uf.field[[0, 4, 0]] - 0.125).abs() < 1e-5);
    }

    #[test]
    fn default_span_is_the_camera_extent() {
        let cfg = UFieldConfig {
            angle_bins: 4,
            ..UFieldConfig::default()
        };
        let geom = FieldGeometry::new(&camera(), 32, &axis(8), &cfg).unwrap();
        let (left, right) = camera().horizontal_extent(32);
        assert!((geom.angles[0] - geom.angle_step / 2.0 - left).abs() < 1e-5);
        assert!((geom.angles[3] + geom.angle_step / 2.0 - right).abs() < 1e-5);
    }

    #[test]
    fn rays_without_mass_are_nan() {
        let mut belief = uniform((1, 8, 20, 32), Space::Linear);
        // Empty columns on the left half of the image.
        belief.slice_mut(s![0, .., .., 0..16]).fill(0.0);
        let cfg = UFieldConfig {
            angle_bins: 8,
            ..UFieldConfig::default()
        };
        let uf = project(belief.view(), Space::Linear, &camera(), &axis(8), &cfg).unwrap();
        assert!(uf.field.slice(s![0, 0, ..]).iter().all(|v| v.is_nan()));
        let right: Vec<f32> = uf.field.slice(s![0, 7, ..]).to_vec();
        assert!((right.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn debug_map_marks_the_band() {
        let belief = uniform((1, 8, 20, 32), Space::Log);
        let cfg = UFieldConfig {
            band_span: 0.3,
            row_shift: 1.0,
            ..UFieldConfig::default()
        };
        let uf = project(belief.view(), Space::Log, &camera(), &axis(8), &cfg).unwrap();
        // Centre row 10.5, half-height 3 -> rows 8..=13.
        for x in [0, 15, 31] {
            assert_eq!(uf.debug[[0, 7, x]], 0.0);
            assert_eq!(uf.debug[[0, 8, x]], 1.0);
            assert_eq!(uf.debug[[0, 13, x]], 1.0);
            assert_eq!(uf.debug[[0, 14, x]], 0.0);
        }
    }

    #[test]
    fn tilted_band_shifts_across_the_image() {
        let belief = uniform((1, 8, 40, 32), Space::Log);
        let cfg = UFieldConfig {
            band_span: 0.05,
            row_shift: 0.0,
            tilt_deg: 30.0,
            ..UFieldConfig::default()
        };
        let cam = Intrinsics::new(20.0, 20.0, 15.5, 19.5);
        let uf = project(belief.view(), Space::Log, &cam, &axis(8), &cfg).unwrap();
        let row_of = |x: usize| (0..40).find(|&y| uf.debug[[0, y, x]] == 1.0).unwrap();
        assert!(row_of(31) > row_of(0));
    }

    #[test]
    fn depth_bins_resample_the_field() {
        let mut belief = Array4::<f32>::zeros((1, 16, 20, 32));
        belief.slice_mut(s![0, 15, .., ..]).fill(1.0);
        let cfg = UFieldConfig {
            angle_bins: 4,
            depth_bins: Some(31),
            ..UFieldConfig::default()
        };
        let uf = project(belief.view(), Space::Linear, &camera(), &axis(16), &cfg).unwrap();
        assert_eq!(uf.field.dim(), (1, 4, 31));
        assert_eq!(uf.geometry.depths.len(), 31);
        let row: Vec<f32> = uf.field.slice(s![0, 1, ..]).to_vec();
        assert_eq!(argmax(&row), 30);
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn mismatched_candidates_are_rejected() {
        let belief = uniform((1, 8, 20, 32), Space::Log);
        let err = project(
            belief.view(),
            Space::Log,
            &camera(),
            &axis(16),
            &UFieldConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LcError::ShapeMismatch { .. }));
    }
}
