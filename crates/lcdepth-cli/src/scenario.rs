//! Synthetic stepped-plane scenario for `lcdepth run`.
//!
//! The scene is two fronto-parallel planes: the left half of the image at
//! `near_m`, the right half at `far_m`.  The prior is the same broad Gaussian
//! for every pixel, so the only way to recover the step is through curtain
//! returns.  Each step runs one fusion iteration and carries the belief
//! forward, which lets the report show error per iteration.

use chrono::{DateTime, Utc};
use lcdepth_hal::{LightCurtain, LightCurtainConfig};
use lcdepth_perception::distribution::{clamp_and_renormalize, expected_depth, to_log};
use lcdepth_perception::groundtruth::dpv_from_depth;
use lcdepth_runtime::{FusionLoop, SampleContext};
use lcdepth_types::{DepthCandidates, Intrinsics, LcConfig, LcError, PlannerKind, Space};
use ndarray::{Array2, Array4, ArrayView4, Axis};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// `[scenario]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ScenarioConfig {
    pub height: usize,
    pub width: usize,
    /// Depth candidates of the prior belief.
    pub depth_bins: usize,
    pub d_min: f32,
    pub d_max: f32,
    /// Depth of the left plane (metres).
    pub near_m: f32,
    /// Depth of the right plane (metres).
    pub far_m: f32,
    /// Centre of the broad prior (metres).
    pub prior_center_m: f32,
    /// Std-dev of the broad prior (metres).
    pub prior_sigma_m: f32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            height: 24,
            width: 32,
            depth_bins: 64,
            d_min: 3.0,
            d_max: 18.0,
            near_m: 6.0,
            far_m: 12.0,
            prior_center_m: 9.0,
            prior_sigma_m: 4.0,
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), LcError> {
        if self.height == 0 || self.width < 2 {
            return Err(LcError::InvalidConfig(format!(
                "scenario image must be at least 1x2, got {}x{}",
                self.height, self.width
            )));
        }
        if !(self.prior_sigma_m > 0.0) {
            return Err(LcError::InvalidConfig(format!(
                "scenario.prior_sigma_m must be positive, got {}",
                self.prior_sigma_m
            )));
        }
        for (name, z) in [("near_m", self.near_m), ("far_m", self.far_m)] {
            if !(z >= self.d_min && z <= self.d_max) {
                return Err(LcError::InvalidConfig(format!(
                    "scenario.{name} = {z} lies outside [{}, {}]",
                    self.d_min, self.d_max
                )));
            }
        }
        Ok(())
    }
}

/// A built scene: camera, depth axis, truth, and log prior `(1, D, H, W)`.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub intrinsics: Intrinsics,
    pub candidates: DepthCandidates,
    pub truth: Array2<f32>,
    pub prior: Array4<f32>,
}

impl Scenario {
    pub fn build(cfg: &ScenarioConfig, epsilon: f32) -> Result<Self, LcError> {
        cfg.validate()?;
        let candidates = DepthCandidates::log_spaced(cfg.d_min, cfg.d_max, cfg.depth_bins)?;
        let (h, w) = (cfg.height, cfg.width);
        // Roughly a 53 degree horizontal field of view.
        let intrinsics = Intrinsics::new(
            w as f32,
            w as f32,
            (w as f32 - 1.0) / 2.0,
            (h as f32 - 1.0) / 2.0,
        );
        let truth = Array2::from_shape_fn((h, w), |(_, x)| {
            if x < w / 2 { cfg.near_m } else { cfg.far_m }
        });

        let centre = Array2::from_elem((h, w), cfg.prior_center_m).insert_axis(Axis(0));
        let mut prior = dpv_from_depth(centre.view(), None, &candidates, cfg.prior_sigma_m)?;
        clamp_and_renormalize(&mut prior, epsilon);
        let prior = to_log(prior.view(), epsilon);

        Ok(Self {
            intrinsics,
            candidates,
            truth,
            prior,
        })
    }

    /// Mean absolute error (metres) of the expected depth of a log belief.
    pub fn depth_error(&self, belief: ArrayView4<f32>) -> Result<f32, LcError> {
        let decoded = expected_depth(belief, &self.candidates, Space::Log)?;
        let decoded = decoded.index_axis(Axis(0), 0);
        let total: f32 = decoded
            .iter()
            .zip(self.truth.iter())
            .map(|(d, t)| (d - t).abs())
            .sum();
        Ok(total / self.truth.len() as f32)
    }
}

/// One row of the run report.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    /// Uncertainty-field RMSE before this iteration's update.
    pub field_rmse: f32,
    /// Mean absolute depth error (metres) after the update.
    pub depth_error_m: f32,
}

/// Result of `lcdepth run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub planner: PlannerKind,
    pub prior_error_m: f32,
    pub final_error_m: f32,
    pub iterations: Vec<IterationReport>,
}

/// Fuse `scenario` for `cfg.iterations` steps and report the error trail.
pub fn run(cfg: &LcConfig, scenario: &Scenario) -> Result<RunReport, LcError> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    let step_cfg = LcConfig {
        iterations: 1,
        score: true,
        ..cfg.clone()
    };
    let fusion = FusionLoop::new(&step_cfg, scenario.candidates.clone())?;
    let mut curtain = LightCurtain::new(LightCurtainConfig::from_lc_config(
        &step_cfg,
        &scenario.candidates,
    )?)?;
    let samples = [SampleContext::new(scenario.intrinsics).with_truth(scenario.truth.view(), None)];
    info!(%run_id, planner = %cfg.planner, steps = cfg.iterations, "scenario run started");

    let prior_error_m = scenario.depth_error(scenario.prior.view())?;
    let mut belief = scenario.prior.clone();
    let mut iterations = Vec::with_capacity(cfg.iterations);
    for iteration in 0..cfg.iterations {
        let outcome = fusion.run(belief.view(), &samples, &mut curtain)?;
        belief = outcome.belief;
        let field_rmse = outcome
            .scores
            .first()
            .and_then(|s| s.first())
            .copied()
            .unwrap_or(f32::NAN);
        iterations.push(IterationReport {
            iteration,
            field_rmse,
            depth_error_m: scenario.depth_error(belief.view())?,
        });
    }

    let final_error_m = iterations.last().map_or(prior_error_m, |r| r.depth_error_m);
    info!(%run_id, prior_error_m, final_error_m, "scenario run finished");
    Ok(RunReport {
        run_id,
        started_at,
        planner: cfg.planner,
        prior_error_m,
        final_error_m,
        iterations,
    })
}
