//! [`LightCurtain`] – the stateful curtain device handle.
//!
//! Bundles the depth-candidate axis the curtain works at, one planner, and
//! one sensor.  The handle is fully usable as soon as [`LightCurtain::new`]
//! returns; its configuration never changes afterwards.  Every operation
//! takes `&mut self`, so a handle cannot be re-entered, and parallel callers
//! each take their own handle via [`LightCurtain::fork`].
//!
//! # Example
//!
//! ```rust
//! use lcdepth_hal::curtain::{LightCurtain, LightCurtainConfig};
//! use lcdepth_types::{DepthCandidates, LcConfig};
//!
//! let base = DepthCandidates::log_spaced(3.0, 18.0, 64).unwrap();
//! let cfg = LightCurtainConfig::from_lc_config(&LcConfig::default(), &base).unwrap();
//! let curtain = LightCurtain::new(cfg).unwrap();
//! assert_eq!(curtain.candidates().len(), 128);
//!
//! let worker = curtain.fork().unwrap();
//! assert_eq!(worker.config(), curtain.config());
//! ```

use lcdepth_perception::ufield::{self, UncertaintyField};
use lcdepth_perception::FieldGeometry;
use lcdepth_types::{
    DepthCandidates, Intrinsics, LcConfig, LcError, PlannerParams, PlannerSpec, SensorConfig,
    Space, UFieldConfig,
};
use ndarray::{ArrayView2, ArrayView4};
use tracing::debug;

use crate::planner::{Plan, Planner, ScanPath, build_planner};
use crate::sensor::{CurtainSensor, Scene, SensedReturn, build_sensor};

/// Everything a [`LightCurtain`] is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurtainConfig {
    /// Depth candidates the curtain plans and senses over.
    pub candidates: DepthCandidates,
    pub planner: PlannerSpec,
    pub sensor: SensorConfig,
    pub ufield: UFieldConfig,
}

impl LightCurtainConfig {
    /// Curtain settings for `cfg`, working at `cfg.expand_depth` candidates
    /// spanning the same range as `base`.
    pub fn from_lc_config(cfg: &LcConfig, base: &DepthCandidates) -> Result<Self, LcError> {
        cfg.validate()?;
        Ok(Self {
            candidates: base.resampled(cfg.expand_depth)?,
            planner: cfg.planner_spec(),
            sensor: cfg.sensor.clone(),
            ufield: cfg.ufield.clone(),
        })
    }
}

/// A configured curtain device: planner plus sensor over a fixed depth axis.
pub struct LightCurtain {
    config: LightCurtainConfig,
    planner: Box<dyn Planner>,
    sensor: Box<dyn CurtainSensor>,
}

impl std::fmt::Debug for LightCurtain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightCurtain")
            .field("config", &self.config)
            .field("planner", &self.planner.kind())
            .field("sensor", &self.sensor.kind())
            .finish()
    }
}

impl LightCurtain {
    /// Build the planner and sensor described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LcError::InvalidConfig`] for planner combinations without
    /// an implementation.
    pub fn new(config: LightCurtainConfig) -> Result<Self, LcError> {
        let planner = build_planner(config.planner)?;
        let sensor = build_sensor(&config.sensor, &config.candidates);
        debug!(
            planner = %config.planner.kind,
            sensor = ?config.sensor.kind,
            depth = config.candidates.len(),
            "light curtain ready"
        );
        Ok(Self {
            config,
            planner,
            sensor,
        })
    }

    /// An independent handle with the same configuration and fresh planner
    /// state.
    pub fn fork(&self) -> Result<Self, LcError> {
        Self::new(self.config.clone())
    }

    pub fn config(&self) -> &LightCurtainConfig {
        &self.config
    }

    /// The curtain's depth-candidate axis.
    pub fn candidates(&self) -> &DepthCandidates {
        &self.config.candidates
    }

    /// Project a belief expressed over [`candidates`](Self::candidates) into
    /// the uncertainty field this curtain plans on.
    pub fn project(
        &self,
        belief: ArrayView4<f32>,
        space: Space,
        intrinsics: &Intrinsics,
    ) -> Result<UncertaintyField, LcError> {
        ufield::project(
            belief,
            space,
            intrinsics,
            &self.config.candidates,
            &self.config.ufield,
        )
    }

    /// Plan the next curtain paths over `field`.
    pub fn plan(
        &mut self,
        field: ArrayView2<f32>,
        geometry: &FieldGeometry,
        params: &PlannerParams,
    ) -> Result<Plan, LcError> {
        self.planner.plan(field, geometry, params)
    }

    /// Image `scene` along `path`.
    ///
    /// # Errors
    ///
    /// Propagates sensor errors; also returns [`LcError::ShapeMismatch`] if
    /// the sensor answers over a different depth axis.
    pub fn sense(&mut self, scene: &Scene<'_>, path: &ScanPath) -> Result<SensedReturn, LcError> {
        let ret = self.sensor.sense(scene, path)?;
        let depth = ret.likelihood.dim().0;
        if depth != self.config.candidates.len() {
            return Err(LcError::shape(
                "sensed likelihood depth",
                self.config.candidates.len(),
                depth,
            ));
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcdepth_perception::distribution::uniform;
    use lcdepth_types::{PlannerKind, Resolution};
    use ndarray::{Array2, Axis};

    fn base() -> DepthCandidates {
        DepthCandidates::log_spaced(3.0, 18.0, 64).unwrap()
    }

    #[test]
    fn config_resamples_to_expand_depth() {
        let lc = LcConfig {
            expand_depth: 96,
            ..LcConfig::default()
        };
        let cfg = LightCurtainConfig::from_lc_config(&lc, &base()).unwrap();
        assert_eq!(cfg.candidates.len(), 96);
        assert!((cfg.candidates.min() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn invalid_planner_fails_at_construction() {
        let cfg = LightCurtainConfig {
            candidates: base(),
            planner: PlannerSpec {
                kind: PlannerKind::Sweep,
                resolution: Resolution::Low,
            },
            sensor: SensorConfig::default(),
            ufield: UFieldConfig::default(),
        };
        assert!(matches!(LightCurtain::new(cfg), Err(LcError::InvalidConfig(_))));
    }

    #[test]
    fn project_plan_sense_round() {
        let lc = LcConfig::default();
        let cfg = LightCurtainConfig::from_lc_config(&lc, &base()).unwrap();
        let mut curtain = LightCurtain::new(cfg).unwrap();
        let intrinsics = Intrinsics::new(16.0, 16.0, 11.5, 7.5);

        let belief = uniform((1, 128, 16, 24), Space::Log);
        let uf = curtain.project(belief.view(), Space::Log, &intrinsics).unwrap();
        let field = uf.field.index_axis(Axis(0), 0);
        let plan = curtain.plan(field, &uf.geometry, &lc.params).unwrap();
        assert_eq!(plan.paths.len(), 1);

        let truth = Array2::from_elem((16, 24), 9.0_f32);
        let scene = Scene {
            depth: Some(truth.view()),
            intrinsics,
            sweep: None,
        };
        let ret = curtain.sense(&scene, &plan.paths[0]).unwrap();
        assert_eq!(ret.likelihood.dim(), (128, 16, 24));
    }

    #[test]
    fn fork_is_independent() {
        let lc = LcConfig {
            planner: PlannerKind::Sweep,
            ..LcConfig::default()
        };
        let cfg = LightCurtainConfig::from_lc_config(&lc, &base()).unwrap();
        let mut curtain = LightCurtain::new(cfg).unwrap();
        let intrinsics = Intrinsics::new(16.0, 16.0, 11.5, 7.5);
        let belief = uniform((1, 128, 16, 24), Space::Log);
        let uf = curtain.project(belief.view(), Space::Log, &intrinsics).unwrap();
        let field = uf.field.index_axis(Axis(0), 0);

        let first = curtain.plan(field, &uf.geometry, &lc.params).unwrap();
        let second = curtain.plan(field, &uf.geometry, &lc.params).unwrap();
        assert_ne!(first.paths[0].points[0].bin, second.paths[0].points[0].bin);

        let mut worker = curtain.fork().unwrap();
        let forked = worker.plan(field, &uf.geometry, &lc.params).unwrap();
        assert_eq!(forked.paths[0].points[0].bin, first.paths[0].points[0].bin);
    }
}
