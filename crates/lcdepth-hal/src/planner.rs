//! Curtain path planners.
//!
//! A planner turns an angle × depth uncertainty field into one or more
//! [`ScanPath`]s: one curtain depth per angular bin.  Variants are selected
//! once from a [`PlannerSpec`] by [`build_planner`].
//!
//! | Kind | Strategy | State |
//! |---|---|---|
//! | [`PlannerKind::Default`] | Dynamic-programming path of greatest summed field value, step-limited | none |
//! | [`PlannerKind::M1`] | Quantile placement within each angular bin | none |
//! | [`PlannerKind::Sweep`] | Fronto-parallel planes advanced every call | cursor |
//!
//! With [`Resolution::Low`] the field is pooled along the angle axis by
//! `low_res_factor` before planning and the chosen bins are expanded back.
//! NaN field entries (angles outside the image) count as zero.

use lcdepth_perception::FieldGeometry;
use lcdepth_types::{LcError, PlannerKind, PlannerParams, PlannerSpec, Resolution};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Paths
// ────────────────────────────────────────────────────────────────────────────

/// One curtain control point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    /// Ray angle (radians, positive to the right).
    pub angle_rad: f32,
    /// Curtain depth (metres) along that ray.
    pub depth: f32,
    /// Field depth bin the depth was taken from.
    pub bin: usize,
}

/// A curtain profile: one [`PathPoint`] per angular bin, ordered by angle.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPath {
    pub points: Vec<PathPoint>,
    /// Angular width of one bin; the path covers half a bin beyond its end
    /// points.
    pub angle_step: f32,
}

impl ScanPath {
    /// Path through field bins `bins` (one per angle of `geometry`).
    pub fn from_bins(bins: &[usize], geometry: &FieldGeometry) -> Self {
        let last = geometry.depth_bins() - 1;
        let points = bins
            .iter()
            .zip(&geometry.angles)
            .map(|(&bin, &angle_rad)| {
                let bin = bin.min(last);
                PathPoint {
                    angle_rad,
                    depth: geometry.depths.as_slice()[bin],
                    bin,
                }
            })
            .collect();
        Self {
            points,
            angle_step: geometry.angle_step,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Curtain depth along the ray at `angle`, linearly interpolated between
    /// control points; `None` outside the path's angular extent.
    pub fn depth_at(&self, angle: f32) -> Option<f32> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        let half = self.angle_step.abs() / 2.0;
        if !angle.is_finite() || angle < first.angle_rad - half || angle > last.angle_rad + half {
            return None;
        }
        if angle <= first.angle_rad {
            return Some(first.depth);
        }
        if angle >= last.angle_rad {
            return Some(last.depth);
        }
        let i = self.points.partition_point(|p| p.angle_rad <= angle);
        let (a, b) = (&self.points[i - 1], &self.points[i]);
        let t = (angle - a.angle_rad) / (b.angle_rad - a.angle_rad);
        Some(a.depth + (b.depth - a.depth) * t)
    }
}

/// Output of one planning call.
#[derive(Debug, Clone)]
pub struct Plan {
    pub paths: Vec<ScanPath>,
    /// `(angle, depth, 3)` image: channel 0 the field, channel 1 the planned
    /// paths, channel 2 left for the caller's ground-truth overlay.
    pub visual: Array3<f32>,
}

// ────────────────────────────────────────────────────────────────────────────
// Planner trait
// ────────────────────────────────────────────────────────────────────────────

/// A curtain path planner.
pub trait Planner: Send {
    fn kind(&self) -> PlannerKind;

    fn resolution(&self) -> Resolution;

    /// Plan `params.paths_per_iteration` paths over `field`
    /// (`angle_bins × depth_bins`, matching `geometry`).
    ///
    /// # Errors
    ///
    /// Returns [`LcError::ShapeMismatch`] when `field` and `geometry` disagree.
    fn plan(
        &mut self,
        field: ArrayView2<f32>,
        geometry: &FieldGeometry,
        params: &PlannerParams,
    ) -> Result<Plan, LcError>;
}

/// Construct the planner selected by `spec`.
///
/// # Errors
///
/// Returns [`LcError::InvalidConfig`] for combinations without an
/// implementation (sweep at low resolution).
pub fn build_planner(spec: PlannerSpec) -> Result<Box<dyn Planner>, LcError> {
    spec.validate()?;
    Ok(match spec.kind {
        PlannerKind::Default => Box::new(DefaultPlanner::new(spec.resolution)),
        PlannerKind::M1 => Box::new(M1Planner::new(spec.resolution)),
        PlannerKind::Sweep => Box::new(SweepPlanner::new()),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Shared plumbing
// ────────────────────────────────────────────────────────────────────────────

fn sanitize(field: ArrayView2<f32>) -> Array2<f32> {
    field.mapv(|v| if v.is_finite() { v } else { 0.0 })
}

/// Mean of every `factor` consecutive angle rows.
fn pool_angles(field: ArrayView2<f32>, factor: usize) -> Array2<f32> {
    let (angles, depth) = field.dim();
    let pooled_angles = angles.div_ceil(factor);
    let mut pooled = Array2::<f32>::zeros((pooled_angles, depth));
    for (a, row) in field.axis_iter(Axis(0)).enumerate() {
        let mut target = pooled.row_mut(a / factor);
        target += &row;
    }
    for (p, mut row) in pooled.axis_iter_mut(Axis(0)).enumerate() {
        let members = (angles - p * factor).min(factor) as f32;
        row.mapv_inplace(|v| v / members);
    }
    pooled
}

/// Step-limit a per-angle bin sequence by clamping each bin to its
/// predecessor's reach.
fn clamp_steps(bins: &mut [usize], max_step: usize) {
    for a in 1..bins.len() {
        let prev = bins[a - 1];
        bins[a] = bins[a].clamp(prev.saturating_sub(max_step), prev + max_step);
    }
}

/// Validate shapes, apply the resolution mode, and assemble the [`Plan`].
fn plan_with<F>(
    resolution: Resolution,
    field: ArrayView2<f32>,
    geometry: &FieldGeometry,
    params: &PlannerParams,
    choose: F,
) -> Result<Plan, LcError>
where
    F: FnOnce(ArrayView2<f32>, &PlannerParams) -> Vec<Vec<usize>>,
{
    let expected = (geometry.angle_bins(), geometry.depth_bins());
    if field.dim() != expected {
        return Err(LcError::shape("planner field", expected, field.dim()));
    }
    let clean = sanitize(field);
    let (angles, depth) = clean.dim();

    let bins = match resolution {
        Resolution::High => choose(clean.view(), params),
        Resolution::Low => {
            let factor = params.low_res_factor.max(1);
            let pooled = pool_angles(clean.view(), factor);
            choose(pooled.view(), params)
                .into_iter()
                .map(|coarse| (0..angles).map(|a| coarse[a / factor]).collect())
                .collect()
        }
    };

    let mut visual = Array3::<f32>::zeros((angles, depth, 3));
    visual.index_axis_mut(Axis(2), 0).assign(&clean);
    for path in &bins {
        for (a, &d) in path.iter().enumerate() {
            visual[[a, d.min(depth - 1), 1]] = 1.0;
        }
    }

    let paths = bins
        .iter()
        .map(|b| ScanPath::from_bins(b, geometry))
        .collect();
    Ok(Plan { paths, visual })
}

// ────────────────────────────────────────────────────────────────────────────
// Default planner
// ────────────────────────────────────────────────────────────────────────────

/// Highest-scoring bin sequence with at most `max_step` bins between
/// neighbouring angles.  Ties resolve towards the nearer depth.
fn best_path(field: ArrayView2<f32>, max_step: usize) -> Vec<usize> {
    let (angles, depth) = field.dim();
    if angles == 0 || depth == 0 {
        return Vec::new();
    }
    let mut score: Vec<f32> = field.row(0).to_vec();
    let mut next = vec![0.0_f32; depth];
    let mut back = Array2::<usize>::zeros((angles, depth));

    for a in 1..angles {
        for d in 0..depth {
            let lo = d.saturating_sub(max_step);
            let hi = (d + max_step).min(depth - 1);
            let mut best = lo;
            for c in lo..=hi {
                if score[c] > score[best] {
                    best = c;
                }
            }
            back[[a, d]] = best;
            next[d] = score[best] + field[[a, d]];
        }
        std::mem::swap(&mut score, &mut next);
    }

    let mut d = 0;
    for (c, &s) in score.iter().enumerate() {
        if s > score[d] {
            d = c;
        }
    }
    let mut bins = vec![0; angles];
    bins[angles - 1] = d;
    for a in (1..angles).rev() {
        d = back[[a, d]];
        bins[a - 1] = d;
    }
    bins
}

/// Dynamic-programming planner: each path follows the ridge of greatest
/// field value; later paths avoid the neighbourhood of earlier ones.
#[derive(Debug, Clone)]
pub struct DefaultPlanner {
    resolution: Resolution,
}

impl DefaultPlanner {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

impl Planner for DefaultPlanner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::Default
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn plan(
        &mut self,
        field: ArrayView2<f32>,
        geometry: &FieldGeometry,
        params: &PlannerParams,
    ) -> Result<Plan, LcError> {
        plan_with(self.resolution, field, geometry, params, |field, params| {
            let mut working = field.to_owned();
            let depth = working.ncols();
            let mut paths = Vec::with_capacity(params.paths_per_iteration);
            for _ in 0..params.paths_per_iteration {
                let bins = best_path(working.view(), params.max_step_bins);
                for (a, &b) in bins.iter().enumerate() {
                    let lo = b.saturating_sub(params.suppress_bins);
                    let hi = (b + params.suppress_bins).min(depth - 1);
                    for d in lo..=hi {
                        working[[a, d]] = 0.0;
                    }
                }
                paths.push(bins);
            }
            debug!(paths = paths.len(), "default planner chose paths");
            paths
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// M1 planner
// ────────────────────────────────────────────────────────────────────────────

/// Quantile planner: path `j` of `k` sits at the `(j + 1) / (k + 1)`
/// quantile of every angular bin's distribution.
#[derive(Debug, Clone)]
pub struct M1Planner {
    resolution: Resolution,
}

impl M1Planner {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

fn quantile_bin(row: &[f32], q: f32) -> usize {
    let total: f32 = row.iter().sum();
    if total <= 0.0 {
        return (q * (row.len() - 1) as f32).round() as usize;
    }
    let target = q * total;
    let mut acc = 0.0_f32;
    for (d, &v) in row.iter().enumerate() {
        acc += v;
        if acc >= target {
            return d;
        }
    }
    row.len() - 1
}

impl Planner for M1Planner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::M1
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn plan(
        &mut self,
        field: ArrayView2<f32>,
        geometry: &FieldGeometry,
        params: &PlannerParams,
    ) -> Result<Plan, LcError> {
        plan_with(self.resolution, field, geometry, params, |field, params| {
            let k = params.paths_per_iteration;
            (0..k)
                .map(|j| {
                    let q = (j + 1) as f32 / (k + 1) as f32;
                    let mut bins: Vec<usize> = field
                        .axis_iter(Axis(0))
                        .map(|row| quantile_bin(&row.to_vec(), q))
                        .collect();
                    clamp_steps(&mut bins, params.max_step_bins);
                    bins
                })
                .collect()
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sweep planner
// ────────────────────────────────────────────────────────────────────────────

/// Uncertainty-agnostic sweep: `k` evenly spaced fronto-parallel planes,
/// advanced by `sweep_step_bins` after every call.
#[derive(Debug, Clone, Default)]
pub struct SweepPlanner {
    cursor: usize,
}

impl SweepPlanner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Planner for SweepPlanner {
    fn kind(&self) -> PlannerKind {
        PlannerKind::Sweep
    }

    fn resolution(&self) -> Resolution {
        Resolution::High
    }

    fn plan(
        &mut self,
        field: ArrayView2<f32>,
        geometry: &FieldGeometry,
        params: &PlannerParams,
    ) -> Result<Plan, LcError> {
        let cursor = &mut self.cursor;
        plan_with(Resolution::High, field, geometry, params, |field, params| {
            let (angles, depth) = field.dim();
            let k = params.paths_per_iteration.max(1);
            let stride = (depth / k).max(1);
            let paths = (0..k)
                .map(|j| vec![(*cursor + j * stride) % depth; angles])
                .collect();
            *cursor = (*cursor + params.sweep_step_bins) % depth;
            paths
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lcdepth_types::{DepthCandidates, Intrinsics, UFieldConfig};

    fn geometry(angles: usize, depth: usize) -> FieldGeometry {
        let cfg = UFieldConfig {
            angle_bins: angles,
            ..UFieldConfig::default()
        };
        let axis = DepthCandidates::power_spaced(1.0, depth as f32, depth, 1.0).unwrap();
        FieldGeometry::new(&Intrinsics::new(20.0, 20.0, 15.5, 9.5), 32, &axis, &cfg).unwrap()
    }

    fn ridge(angles: usize, depth: usize, bin_for: impl Fn(usize) -> usize) -> Array2<f32> {
        let mut field = Array2::<f32>::zeros((angles, depth));
        for a in 0..angles {
            field[[a, bin_for(a)]] = 1.0;
        }
        field
    }

    fn bins(path: &ScanPath) -> Vec<usize> {
        path.points.iter().map(|p| p.bin).collect()
    }

    #[test]
    fn depth_at_interpolates_between_points() {
        let geom = geometry(4, 16);
        let path = ScanPath::from_bins(&[0, 2, 4, 6], &geom);
        assert_eq!(path.len(), 4);
        let mid = (path.points[1].angle_rad + path.points[2].angle_rad) / 2.0;
        assert!((path.depth_at(mid).unwrap() - 4.0).abs() < 1e-4);
        assert_eq!(path.depth_at(path.points[0].angle_rad), Some(1.0));
        assert!(path.depth_at(-1.5).is_none());
        assert!(path.depth_at(f32::NAN).is_none());
    }

    #[test]
    fn default_planner_follows_the_ridge() {
        let geom = geometry(8, 16);
        let field = ridge(8, 16, |a| if a < 4 { 3 } else { 6 });
        let mut planner = DefaultPlanner::new(Resolution::High);
        let plan = planner
            .plan(field.view(), &geom, &PlannerParams::default())
            .unwrap();
        assert_eq!(plan.paths.len(), 1);
        assert_eq!(bins(&plan.paths[0]), vec![3, 3, 3, 3, 6, 6, 6, 6]);
        assert_eq!(plan.visual.dim(), (8, 16, 3));
        assert_eq!(plan.visual[[5, 6, 1]], 1.0);
        assert_eq!(plan.visual[[5, 6, 0]], 1.0);
    }

    #[test]
    fn default_planner_respects_the_step_limit() {
        let geom = geometry(8, 16);
        let field = ridge(8, 16, |a| if a < 4 { 0 } else { 15 });
        let params = PlannerParams {
            max_step_bins: 2,
            ..PlannerParams::default()
        };
        let plan = DefaultPlanner::new(Resolution::High)
            .plan(field.view(), &geom, &params)
            .unwrap();
        let b = bins(&plan.paths[0]);
        assert!(b.windows(2).all(|w| w[0].abs_diff(w[1]) <= 2));
    }

    #[test]
    fn second_path_avoids_the_first() {
        let geom = geometry(6, 16);
        let mut field = ridge(6, 16, |_| 3);
        for a in 0..6 {
            field[[a, 12]] = 0.8;
        }
        let params = PlannerParams {
            paths_per_iteration: 2,
            ..PlannerParams::default()
        };
        let plan = DefaultPlanner::new(Resolution::High)
            .plan(field.view(), &geom, &params)
            .unwrap();
        assert_eq!(bins(&plan.paths[0]), vec![3; 6]);
        assert_eq!(bins(&plan.paths[1]), vec![12; 6]);
    }

    #[test]
    fn nan_field_entries_count_as_zero() {
        let geom = geometry(4, 8);
        let mut field = ridge(4, 8, |_| 5);
        field.row_mut(0).fill(f32::NAN);
        let plan = DefaultPlanner::new(Resolution::High)
            .plan(field.view(), &geom, &PlannerParams::default())
            .unwrap();
        assert_eq!(bins(&plan.paths[0])[1..], [5, 5, 5]);
        assert!(plan.visual.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn low_resolution_holds_bins_across_pooled_angles() {
        let geom = geometry(8, 16);
        let field = ridge(8, 16, |a| 2 + a);
        let params = PlannerParams {
            low_res_factor: 2,
            max_step_bins: 16,
            ..PlannerParams::default()
        };
        let mut planner = DefaultPlanner::new(Resolution::Low);
        assert_eq!(planner.resolution(), Resolution::Low);
        let plan = planner.plan(field.view(), &geom, &params).unwrap();
        let b = bins(&plan.paths[0]);
        assert_eq!(b.len(), 8);
        for pair in b.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn m1_places_paths_at_quantiles() {
        let geom = geometry(4, 12);
        let mut field = Array2::<f32>::zeros((4, 12));
        for a in 0..4 {
            field[[a, 2]] = 0.5;
            field[[a, 9]] = 0.5;
        }
        let params = PlannerParams {
            paths_per_iteration: 2,
            max_step_bins: 12,
            ..PlannerParams::default()
        };
        let plan = M1Planner::new(Resolution::High)
            .plan(field.view(), &geom, &params)
            .unwrap();
        assert_eq!(bins(&plan.paths[0]), vec![2; 4]);
        assert_eq!(bins(&plan.paths[1]), vec![9; 4]);
    }

    #[test]
    fn m1_forward_clamps_large_jumps() {
        let geom = geometry(4, 16);
        let field = ridge(4, 16, |a| if a == 0 { 0 } else { 15 });
        let plan = M1Planner::new(Resolution::High)
            .plan(field.view(), &geom, &PlannerParams::default())
            .unwrap();
        assert_eq!(bins(&plan.paths[0]), vec![0, 4, 8, 12]);
    }

    #[test]
    fn sweep_advances_every_call() {
        let geom = geometry(4, 16);
        let field = Array2::<f32>::zeros((4, 16));
        let params = PlannerParams {
            sweep_step_bins: 5,
            ..PlannerParams::default()
        };
        let mut planner = SweepPlanner::new();
        let first = planner.plan(field.view(), &geom, &params).unwrap();
        let second = planner.plan(field.view(), &geom, &params).unwrap();
        assert_eq!(bins(&first.paths[0]), vec![0; 4]);
        let third = planner.plan(field.view(), &geom, &params).unwrap();
        assert_eq!(bins(&second.paths[0]), vec![5; 4]);
        assert_eq!(bins(&third.paths[0]), vec![10; 4]);
    }

    #[test]
    fn build_planner_dispatches_and_rejects_low_sweep() {
        let p = build_planner(PlannerSpec {
            kind: PlannerKind::M1,
            resolution: Resolution::Low,
        })
        .unwrap();
        assert_eq!(p.kind(), PlannerKind::M1);
        assert_eq!(p.resolution(), Resolution::Low);

        let err = build_planner(PlannerSpec {
            kind: PlannerKind::Sweep,
            resolution: Resolution::Low,
        });
        assert!(matches!(err, Err(LcError::InvalidConfig(_))));
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let geom = geometry(4, 16);
        let field = Array2::<f32>::zeros((5, 16));
        let err = DefaultPlanner::new(Resolution::High)
            .plan(field.view(), &geom, &PlannerParams::default())
            .unwrap_err();
        assert!(matches!(err, LcError::ShapeMismatch { .. }));
    }
}
