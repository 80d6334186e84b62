//! The structured `lc.*` configuration surface.
//!
//! Mode selectors are closed enums: an unknown planner, resolution, or sensor
//! string fails deserialisation instead of surfacing at the first call.
//!
//! ```rust
//! use lcdepth_types::{LcConfig, PlannerKind, Resolution};
//!
//! let cfg = LcConfig::default();
//! assert_eq!(cfg.iterations, 5);
//! assert_eq!(cfg.planner, PlannerKind::Default);
//! assert_eq!(cfg.resolution, Resolution::High);
//! assert!(cfg.validate().is_ok());
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::LcError;

// ────────────────────────────────────────────────────────────────────────────
// Mode selectors
// ────────────────────────────────────────────────────────────────────────────

/// Which planning strategy proposes the next curtain paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    /// Dynamic-programming paths through the most uncertain regions.
    #[default]
    Default,
    /// Quantile placement across each angular bin's distribution.
    M1,
    /// Uncertainty-agnostic fronto-parallel sweep.
    Sweep,
}

impl std::fmt::Display for PlannerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerKind::Default => write!(f, "default"),
            PlannerKind::M1 => write!(f, "m1"),
            PlannerKind::Sweep => write!(f, "sweep"),
        }
    }
}

impl std::str::FromStr for PlannerKind {
    type Err = LcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(PlannerKind::Default),
            "m1" => Ok(PlannerKind::M1),
            "sweep" => Ok(PlannerKind::Sweep),
            other => Err(LcError::InvalidConfig(format!("unknown planner '{other}'"))),
        }
    }
}

/// Angular resolution the planner works at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Plan on the full-resolution field.
    #[default]
    High,
    /// Plan on a field pooled by `low_res_factor` along the angle axis.  The
    /// chosen bins are expanded back, so paths still use the full-resolution
    /// geometry.
    Low,
}

/// Where curtain returns come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Returns synthesised from ground-truth depth.
    #[default]
    Simulated,
    /// Returns read from recorded intensity/range sweeps.
    Real,
}

/// Planner variant chosen once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub struct PlannerSpec {
    pub kind: PlannerKind,
    pub resolution: Resolution,
}

impl PlannerSpec {
    /// Reject combinations that have no implementation.
    pub fn validate(&self) -> Result<(), LcError> {
        if self.kind == PlannerKind::Sweep && self.resolution == Resolution::Low {
            return Err(LcError::InvalidConfig(
                "the sweep planner has no low-resolution variant".to_string(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parameter blocks
// ────────────────────────────────────────────────────────────────────────────

/// `lc.params` – spreading and planner tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PlannerParams {
    /// Number of spread passes applied after each update.
    pub spread_iter: usize,
    /// Spread kernel width in depth bins.
    pub spread_n: usize,
    /// Curtain paths planned (and sensed) per iteration.
    pub paths_per_iteration: usize,
    /// Largest depth-bin change between adjacent angular bins of one path.
    pub max_step_bins: usize,
    /// Half-width (depth bins) of the region cleared around an already
    /// planned path before the next one is chosen.
    pub suppress_bins: usize,
    /// Angular pooling factor used by low-resolution planners.
    pub low_res_factor: usize,
    /// Depth bins the sweep planner advances per call.
    pub sweep_step_bins: usize,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            spread_iter: 1,
            spread_n: 3,
            paths_per_iteration: 1,
            max_step_bins: 4,
            suppress_bins: 6,
            low_res_factor: 2,
            sweep_step_bins: 8,
        }
    }
}

/// Uncertainty-field projection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct UFieldConfig {
    /// Number of angular bins in the top-down field.
    pub angle_bins: usize,
    /// Total angular span (degrees). `None` uses the camera's horizontal FOV.
    pub angular_span_deg: Option<f32>,
    /// Depth bins in the field. `None` uses the depth-candidate count.
    pub depth_bins: Option<usize>,
    /// Fraction of the image height covered by the sampled row band.
    pub band_span: f32,
    /// Offset (pixels) of the band centre below the principal point.
    pub row_shift: f32,
    /// Tilt of the band across the image (degrees).
    pub tilt_deg: f32,
}

impl Default for UFieldConfig {
    fn default() -> Self {
        Self {
            angle_bins: 64,
            angular_span_deg: None,
            depth_bins: None,
            band_span: 0.3,
            row_shift: 1.0,
            tilt_deg: 0.0,
        }
    }
}

/// Sensor model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    /// Curtain thickness: std-dev (metres) of the intensity fall-off around
    /// the curtain placement.
    pub inten_sigma: f32,
    /// Std-dev of intensity measurement noise.
    pub noise_sigma: f32,
    /// Peak intensity of a surface lying exactly on the curtain.
    pub mean_scaling: f32,
    /// Intensity above which a pixel is reported as a 3-D return.
    pub return_threshold: f32,
    /// Multiplier applied to raw sweep intensities (8-bit sweeps use `1/255`).
    pub intensity_scale: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Simulated,
            inten_sigma: 0.5,
            noise_sigma: 0.1,
            mean_scaling: 1.0,
            return_threshold: 0.5,
            intensity_scale: 1.0 / 255.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LcConfig
// ────────────────────────────────────────────────────────────────────────────

/// The `lc` section: everything the fusion loop and its collaborators read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LcConfig {
    /// Run the fusion loop after the network.
    pub enabled: bool,
    /// Fixed number of plan/sense/fuse iterations per sample.
    pub iterations: usize,
    pub planner: PlannerKind,
    pub resolution: Resolution,
    pub params: PlannerParams,
    /// Probability of keeping the previous curtain belief as network input
    /// during training.
    pub use_lc_prob: f32,
    /// Evaluation mode: disables the stochastic `prev_lc` dropout.
    pub eval: bool,
    /// Record per-iteration uncertainty-field RMSE when ground truth exists.
    pub score: bool,
    /// Depth-candidate count the curtain works at.
    pub expand_depth: usize,
    /// Probability floor.
    pub epsilon: f32,
    /// Std-dev (metres) of the ground-truth DPV built from depth maps.
    pub truth_sigma: f32,
    pub ufield: UFieldConfig,
    pub sensor: SensorConfig,
}

impl Default for LcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iterations: 5,
            planner: PlannerKind::Default,
            resolution: Resolution::High,
            params: PlannerParams::default(),
            use_lc_prob: 1.0,
            eval: true,
            score: false,
            expand_depth: 128,
            epsilon: 1e-8,
            truth_sigma: 0.3,
            ufield: UFieldConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl LcConfig {
    /// The planner variant this configuration selects.
    pub fn planner_spec(&self) -> PlannerSpec {
        PlannerSpec {
            kind: self.planner,
            resolution: self.resolution,
        }
    }

    /// Check every numeric field is in range and the planner variant exists.
    ///
    /// # Errors
    ///
    /// Returns [`LcError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), LcError> {
        self.planner_spec().validate()?;
        let fail = |msg: String| Err(LcError::InvalidConfig(msg));

        if !(0.0..=1.0).contains(&self.use_lc_prob) {
            return fail(format!("use_lc_prob must be in [0, 1], got {}", self.use_lc_prob));
        }
        if self.expand_depth < 2 {
            return fail(format!("expand_depth must be >= 2, got {}", self.expand_depth));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return fail(format!("epsilon must be in (0, 1), got {}", self.epsilon));
        }
        if self.truth_sigma <= 0.0 {
            return fail(format!("truth_sigma must be positive, got {}", self.truth_sigma));
        }
        if self.params.paths_per_iteration == 0 {
            return fail("params.paths_per_iteration must be >= 1".to_string());
        }
        if self.params.low_res_factor == 0 || self.params.sweep_step_bins == 0 {
            return fail("params.low_res_factor and params.sweep_step_bins must be >= 1".to_string());
        }
        if self.ufield.angle_bins == 0 {
            return fail("ufield.angle_bins must be >= 1".to_string());
        }
        if !(self.ufield.band_span > 0.0 && self.ufield.band_span <= 1.0) {
            return fail(format!(
                "ufield.band_span must be in (0, 1], got {}",
                self.ufield.band_span
            ));
        }
        if let Some(span) = self.ufield.angular_span_deg
            && !(span > 0.0 && span < 180.0)
        {
            return fail(format!("ufield.angular_span_deg must be in (0, 180), got {span}"));
        }
        if matches!(self.ufield.depth_bins, Some(n) if n < 2) {
            return fail("ufield.depth_bins must be >= 2".to_string());
        }
        if self.sensor.inten_sigma <= 0.0 || self.sensor.noise_sigma <= 0.0 {
            return fail("sensor sigmas must be positive".to_string());
        }
        Ok(())
    }
}
