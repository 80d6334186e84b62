//! The discretised depth axis shared by every distribution in a run.
//!
//! # Example
//!
//! ```rust
//! use lcdepth_types::DepthCandidates;
//!
//! let axis = DepthCandidates::power_spaced(3.0, 18.0, 64, 1.0).unwrap();
//! assert_eq!(axis.len(), 64);
//! assert!((axis.min() - 3.0).abs() < 1e-6);
//! assert!((axis.max() - 18.0).abs() < 1e-4);
//!
//! // The sensor works on a finer axis spanning the same range.
//! let fine = axis.resampled(128).unwrap();
//! assert_eq!(fine.len(), 128);
//! ```

use serde::{Deserialize, Serialize};

use crate::LcError;

/// An ordered, strictly increasing sequence of candidate depths (metres).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct DepthCandidates(Vec<f32>);

impl DepthCandidates {
    /// Validate and wrap `values`.
    ///
    /// # Errors
    ///
    /// Returns [`LcError::InvalidCandidates`] when fewer than two values are
    /// supplied, any value is non-finite, or the sequence is not strictly
    /// increasing.
    pub fn new(values: Vec<f32>) -> Result<Self, LcError> {
        if values.len() < 2 {
            return Err(LcError::InvalidCandidates(format!(
                "need at least 2 depth candidates, got {}",
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(LcError::InvalidCandidates(format!(
                "depth candidate {bad} is not finite"
            )));
        }
        if let Some(i) = values.windows(2).position(|w| w[1] <= w[0]) {
            return Err(LcError::InvalidCandidates(format!(
                "depth candidates must be strictly increasing (index {} -> {}: {} -> {})",
                i,
                i + 1,
                values[i],
                values[i + 1]
            )));
        }
        Ok(Self(values))
    }

    /// `n` depths `d_min + (d_max - d_min) * x^power` with `x` uniform on `[0, 1]`.
    ///
    /// `power = 1` yields a uniform axis; larger powers concentrate
    /// candidates near `d_min`.
    pub fn power_spaced(d_min: f32, d_max: f32, n: usize, power: f32) -> Result<Self, LcError> {
        if n < 2 {
            return Err(LcError::InvalidCandidates(format!(
                "need at least 2 depth candidates, got {n}"
            )));
        }
        let span = d_max - d_min;
        let values = (0..n)
            .map(|i| {
                let x = i as f32 / (n - 1) as f32;
                d_min + span * x.powf(power)
            })
            .collect();
        Self::new(values)
    }

    /// `n` depths spaced uniformly in log-depth between `d_min` and `d_max`.
    pub fn log_spaced(d_min: f32, d_max: f32, n: usize) -> Result<Self, LcError> {
        if n < 2 || d_min <= 0.0 {
            return Err(LcError::InvalidCandidates(format!(
                "log spacing needs n >= 2 and d_min > 0 (n = {n}, d_min = {d_min})"
            )));
        }
        let (lo, hi) = (d_min.ln(), d_max.ln());
        let values = (0..n)
            .map(|i| {
                let x = i as f32 / (n - 1) as f32;
                (lo + (hi - lo) * x).exp()
            })
            .collect();
        Self::new(values)
    }

    /// The same depth range re-discretised into `n` candidates.
    ///
    /// Positions are interpolated along the existing axis, so the spacing law
    /// (uniform, power, log) is preserved and both endpoints are kept.
    pub fn resampled(&self, n: usize) -> Result<Self, LcError> {
        if n == self.len() {
            return Ok(self.clone());
        }
        if n < 2 {
            return Err(LcError::InvalidCandidates(format!(
                "need at least 2 depth candidates, got {n}"
            )));
        }
        let last = (self.len() - 1) as f32;
        let values = (0..n)
            .map(|i| {
                let pos = i as f32 * last / (n - 1) as f32;
                let lo = (pos.floor() as usize).min(self.len() - 2);
                let t = pos - lo as f32;
                self.0[lo] * (1.0 - t) + self.0[lo + 1] * t
            })
            .collect();
        Self::new(values)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; construction requires at least two candidates.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Smallest candidate depth.
    pub fn min(&self) -> f32 {
        self.0[0]
    }

    /// Largest candidate depth.
    pub fn max(&self) -> f32 {
        self.0[self.0.len() - 1]
    }

    /// Candidate depth at index `i`, if in range.
    pub fn get(&self, i: usize) -> Option<f32> {
        self.0.get(i).copied()
    }

    /// Borrow the raw values.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Index of the candidate closest to `depth`.
    pub fn nearest_index(&self, depth: f32) -> usize {
        match self.0.binary_search_by(|c| c.total_cmp(&depth)) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) if i >= self.0.len() => self.0.len() - 1,
            Err(i) => {
                if (depth - self.0[i - 1]) <= (self.0[i] - depth) {
                    i - 1
                } else {
                    i
                }
            }
        }
    }
}

impl TryFrom<Vec<f32>> for DepthCandidates {
    type Error = LcError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<DepthCandidates> for Vec<f32> {
    fn from(value: DepthCandidates) -> Self {
        value.0
    }
}
