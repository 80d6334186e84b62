//! Generic `CurtainSensor` trait and the intensity measurement model.
//!
//! A sensor images the scene along a planned [`ScanPath`] and returns a
//! per-pixel likelihood over the depth candidates.  Implementations:
//!
//! - [`SimulatedSensor`][crate::sim::SimulatedSensor] – returns synthesised
//!   from a ground-truth depth map.
//! - [`RealSweepSensor`][crate::real::RealSweepSensor] – returns read from a
//!   recorded intensity/range sweep.
//!
//! Both convert an observed intensity into a likelihood with
//! [`IntensityModel`]: a surface at depth `d` seen by a curtain placed at `p`
//! is expected to return `m · exp(−(d − p)² / 2σᵢ²)`, and the observation is
//! Gaussian around that expectation with std-dev `σₙ`.

use lcdepth_types::{DepthCandidates, Intrinsics, LcError, SensorConfig, SensorKind};
use ndarray::{Array3, ArrayView2, ArrayView4};

use crate::planner::ScanPath;
use crate::real::RealSweepSensor;
use crate::sim::SimulatedSensor;

// ────────────────────────────────────────────────────────────────────────────
// Inputs & outputs
// ────────────────────────────────────────────────────────────────────────────

/// What a sensor may look at for one batch element.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    /// Ground-truth depth `(height, width)` in metres; required by the
    /// simulated sensor.
    pub depth: Option<ArrayView2<'a, f32>>,
    /// Intrinsics of the belief's pixel grid.
    pub intrinsics: Intrinsics,
    /// Recorded sweep `(samples, height, width, 2)`: channel 0 the range
    /// (metres), channel 1 the raw intensity.  Required by the real sensor.
    pub sweep: Option<ArrayView4<'a, f32>>,
}

/// Result of sensing one path.
#[derive(Debug, Clone)]
pub struct SensedReturn {
    /// Linear likelihood `(D, height, width)`; NaN where nothing could be
    /// inferred (callers treat NaN as zero likelihood).
    pub likelihood: Array3<f32>,
    /// Camera-frame points `[x, y, z]` of pixels with a strong return.
    pub points: Vec<[f32; 3]>,
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor trait
// ────────────────────────────────────────────────────────────────────────────

/// A light-curtain device, real or simulated.
pub trait CurtainSensor: Send {
    fn kind(&self) -> SensorKind;

    /// Depth candidates the returned likelihood is expressed over.
    fn candidates(&self) -> &DepthCandidates;

    /// Image the scene along `path`.
    ///
    /// # Errors
    ///
    /// - [`LcError::MissingInput`] when the scene lacks the data this sensor
    ///   needs (truth depth or sweep).
    /// - [`LcError::ShapeMismatch`] when the scene's arrays disagree.
    fn sense(&mut self, scene: &Scene<'_>, path: &ScanPath) -> Result<SensedReturn, LcError>;
}

/// Construct the sensor selected by `cfg` over `candidates`.
pub fn build_sensor(cfg: &SensorConfig, candidates: &DepthCandidates) -> Box<dyn CurtainSensor> {
    match cfg.kind {
        SensorKind::Simulated => Box::new(SimulatedSensor::new(candidates.clone(), cfg)),
        SensorKind::Real => Box::new(RealSweepSensor::new(candidates.clone(), cfg)),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Intensity model
// ────────────────────────────────────────────────────────────────────────────

/// Gaussian curtain-intensity model shared by every sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityModel {
    /// Curtain thickness (metres).
    pub inten_sigma: f32,
    /// Intensity noise std-dev.
    pub noise_sigma: f32,
    /// Peak intensity of an on-curtain surface.
    pub mean_scaling: f32,
}

impl From<&SensorConfig> for IntensityModel {
    fn from(cfg: &SensorConfig) -> Self {
        Self {
            inten_sigma: cfg.inten_sigma,
            noise_sigma: cfg.noise_sigma,
            mean_scaling: cfg.mean_scaling,
        }
    }
}

impl IntensityModel {
    /// Intensity returned by a surface at `depth` when the curtain sits at
    /// `placement`.
    pub fn expected_intensity(&self, depth: f32, placement: f32) -> f32 {
        let diff = depth - placement;
        self.mean_scaling * (-(diff * diff) / (2.0 * self.inten_sigma * self.inten_sigma)).exp()
    }

    /// Write the normalised likelihood of observing `intensity` into `out`
    /// (one entry per candidate).
    ///
    /// A non-finite intensity yields NaN everywhere.  When every candidate's
    /// likelihood underflows the observation is uninformative and `out` is
    /// uniform.
    pub fn likelihood_into(
        &self,
        candidates: &DepthCandidates,
        placement: f32,
        intensity: f32,
        out: &mut [f32],
    ) {
        if !intensity.is_finite() || !placement.is_finite() {
            out.fill(f32::NAN);
            return;
        }
        let two_var = 2.0 * self.noise_sigma * self.noise_sigma;
        let mut total = 0.0_f32;
        for (o, &d) in out.iter_mut().zip(candidates.as_slice()) {
            let diff = intensity - self.expected_intensity(d, placement);
            *o = (-(diff * diff) / two_var).exp();
            total += *o;
        }
        if total > 0.0 {
            out.iter_mut().for_each(|o| *o /= total);
        } else {
            out.fill(1.0 / out.len() as f32);
        }
    }
}

/// Likelihood over `candidates` of observing `intensity` with the curtain at
/// `placement`.
///
/// ```rust
/// use lcdepth_hal::sensor::intensities_to_distribution;
/// use lcdepth_types::DepthCandidates;
///
/// let candidates = DepthCandidates::power_spaced(1.0, 10.0, 10, 1.0).unwrap();
/// // A full-strength return: the surface is on the curtain at 4 m.
/// let l = intensities_to_distribution(&candidates, 4.0, 1.0, 0.5, 0.1, 1.0);
/// let best = l.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)).unwrap().0;
/// assert_eq!(best, 3);
/// ```
pub fn intensities_to_distribution(
    candidates: &DepthCandidates,
    placement: f32,
    intensity: f32,
    inten_sigma: f32,
    noise_sigma: f32,
    mean_scaling: f32,
) -> Vec<f32> {
    let model = IntensityModel {
        inten_sigma,
        noise_sigma,
        mean_scaling,
    };
    let mut out = vec![0.0; candidates.len()];
    model.likelihood_into(candidates, placement, intensity, &mut out);
    out
}
