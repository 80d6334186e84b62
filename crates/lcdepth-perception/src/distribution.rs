//! Per-pixel categorical distributions over the depth-candidate axis.
//!
//! A depth-probability volume (DPV) is an [`Array4`] of shape
//! `(batch, depth, height, width)`.  Axis 1 is the distribution axis: every
//! `(b, :, y, x)` lane is one pixel's distribution, stored either as
//! probabilities or as log-probabilities ([`Space`]).
//!
//! All operations here keep the volume in the space it arrived in unless
//! their name says otherwise ([`to_linear`], [`to_log`]).
//!
//! # Example
//!
//! ```rust
//! use lcdepth_perception::distribution::{clamp_and_renormalize, uniform, EPSILON};
//! use lcdepth_types::Space;
//!
//! let mut dpv = uniform((1, 16, 2, 2), Space::Linear);
//! dpv[[0, 3, 0, 0]] = 0.0;
//! clamp_and_renormalize(&mut dpv, EPSILON);
//!
//! let column_sum: f32 = (0..16).map(|d| dpv[[0, d, 0, 0]]).sum();
//! assert!((column_sum - 1.0).abs() < 1e-5);
//! assert!(dpv[[0, 3, 0, 0]] >= EPSILON);
//! ```

use lcdepth_types::{DepthCandidates, LcError, Space};
use ndarray::{Array3, Array4, ArrayView4, Axis, Zip};

/// Default probability floor; keeps `ln` finite after multiplicative updates.
pub const EPSILON: f32 = 1e-8;

// ────────────────────────────────────────────────────────────────────────────
// Construction & conversion
// ────────────────────────────────────────────────────────────────────────────

/// A volume whose every pixel holds the uniform distribution.
pub fn uniform(shape: (usize, usize, usize, usize), space: Space) -> Array4<f32> {
    let p = 1.0 / shape.1.max(1) as f32;
    let value = match space {
        Space::Linear => p,
        Space::Log => p.ln(),
    };
    Array4::from_elem(shape, value)
}

/// Probabilities of `dpv`, exponentiating when it is in log space.
pub fn to_linear(dpv: ArrayView4<f32>, space: Space) -> Array4<f32> {
    match space {
        Space::Linear => dpv.to_owned(),
        Space::Log => dpv.mapv(f32::exp),
    }
}

/// Log-probabilities of a linear volume, flooring at `epsilon` first.
pub fn to_log(dpv: ArrayView4<f32>, epsilon: f32) -> Array4<f32> {
    dpv.mapv(|v| if v.is_nan() { epsilon.ln() } else { v.max(epsilon).ln() })
}

/// Replace every NaN with zero probability mass.
pub fn zero_nans(dpv: &mut Array4<f32>) -> usize {
    let mut replaced = 0;
    dpv.map_inplace(|v| {
        if v.is_nan() {
            *v = 0.0;
            replaced += 1;
        }
    });
    replaced
}

// ────────────────────────────────────────────────────────────────────────────
// Normalisation
// ────────────────────────────────────────────────────────────────────────────

/// Divide every linear pixel column by its sum.
///
/// Columns whose sum is zero or non-finite are left untouched; an all-zero
/// column carries no information and stays that way.
pub fn normalize_columns(dpv: &mut Array4<f32>) {
    for mut lane in dpv.lanes_mut(Axis(1)) {
        let sum: f32 = lane.sum();
        if sum > 0.0 && sum.is_finite() {
            lane.mapv_inplace(|v| v / sum);
        }
    }
}

/// Clip a linear volume to `[epsilon, 1]`, renormalise every column, and
/// keep every value at or above the floor.
///
/// NaNs count as zero mass before clipping.  The final floor is applied as
/// `p = ε + (1 − D·ε)·q`, so columns still sum to exactly one.  An `epsilon`
/// above `1 / D` cannot be honoured and degrades to the uniform
/// distribution.
pub fn clamp_and_renormalize(dpv: &mut Array4<f32>, epsilon: f32) {
    let depth = dpv.len_of(Axis(1));
    if depth == 0 {
        return;
    }
    let floor = epsilon.min(1.0 / depth as f32);
    let keep = (1.0 - depth as f32 * floor).max(0.0);

    for mut lane in dpv.lanes_mut(Axis(1)) {
        lane.mapv_inplace(|v| if v.is_nan() { floor } else { v.clamp(floor, 1.0) });
        let sum: f32 = lane.sum();
        lane.mapv_inplace(|v| floor + keep * (v / sum));
    }
}

/// Per-pixel column sums of `dpv` after converting to probabilities.
pub fn column_sums(dpv: ArrayView4<f32>, space: Space) -> Array3<f32> {
    let linear = to_linear(dpv, space);
    linear.sum_axis(Axis(1))
}

/// `true` when every column is NaN-free and sums to one within `tolerance`.
pub fn is_normalized(dpv: ArrayView4<f32>, space: Space, tolerance: f32) -> bool {
    column_sums(dpv, space)
        .iter()
        .all(|s| s.is_finite() && (s - 1.0).abs() <= tolerance)
}

// ────────────────────────────────────────────────────────────────────────────
// Depth-axis resampling
// ────────────────────────────────────────────────────────────────────────────

/// Interpolation taps `(lo, hi, t)` mapping `target` output bins onto `source`
/// input bins.  First and last bins line up, the same convention as
/// [`DepthCandidates::resampled`], so output bin `j` sits at the depth of
/// candidate `j` on the resampled axis.
pub(crate) fn depth_taps(source: usize, target: usize) -> Vec<(usize, usize, f32)> {
    let last = (source - 1) as f32;
    (0..target)
        .map(|j| {
            let pos = if target > 1 {
                j as f32 * last / (target - 1) as f32
            } else {
                0.0
            };
            let lo = (pos.floor() as usize).min(source.saturating_sub(2));
            let hi = (lo + 1).min(source - 1);
            (lo, hi, pos - lo as f32)
        })
        .collect()
}

/// Resample the depth axis of `dpv` to `target_depth_count` bins.
///
/// Values are linearly interpolated in the space they are stored in, then
/// every column is renormalised so the result is a valid distribution in that
/// same space.  Works in both directions (up- and down-sampling).  Returns a
/// copy unchanged when the count already matches.
///
/// # Errors
///
/// Returns [`LcError::ShapeMismatch`] when either depth count is zero.
pub fn upsample(
    dpv: ArrayView4<f32>,
    target_depth_count: usize,
    space: Space,
) -> Result<Array4<f32>, LcError> {
    let (batch, depth, height, width) = dpv.dim();
    if depth == 0 || target_depth_count == 0 {
        return Err(LcError::shape(
            "upsample depth axis",
            "non-empty depth axes",
            (depth, target_depth_count),
        ));
    }
    if depth == target_depth_count {
        return Ok(dpv.to_owned());
    }

    let taps = depth_taps(depth, target_depth_count);
    let mut out = Array4::<f32>::zeros((batch, target_depth_count, height, width));
    Zip::from(out.lanes_mut(Axis(1)))
        .and(dpv.lanes(Axis(1)))
        .for_each(|mut dst, src| {
            for (j, &(lo, hi, t)) in taps.iter().enumerate() {
                dst[j] = src[lo] * (1.0 - t) + src[hi] * t;
            }
        });

    match space {
        Space::Linear => normalize_columns(&mut out),
        Space::Log => {
            out.mapv_inplace(f32::exp);
            normalize_columns(&mut out);
            out.mapv_inplace(|v| v.max(EPSILON).ln());
        }
    }
    Ok(out)
}

// ────────────────────────────────────────────────────────────────────────────
// Spreading
// ────────────────────────────────────────────────────────────────────────────

/// Normalised Gaussian taps covering `kernel_width` bins (rounded up to odd).
fn spread_kernel(kernel_width: usize) -> Vec<f32> {
    let half = (kernel_width / 2) as isize;
    let sigma = kernel_width as f32 / 6.0;
    let two_var = 2.0 * sigma * sigma;
    let raw: Vec<f32> = (-half..=half)
        .map(|k| (-((k * k) as f32) / two_var).exp())
        .collect();
    let total: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Diffuse every pixel's distribution along the depth axis.
///
/// One pass convolves each column with a truncated Gaussian spanning
/// `kernel_width` depth bins (σ = width / 6), zero-padded at both ends, and
/// renormalises.  The volume stays in `space`.  `kernel_width <= 1` is the
/// identity.
pub fn spread(dpv: &mut Array4<f32>, kernel_width: usize, space: Space) {
    if kernel_width <= 1 {
        return;
    }
    let kernel = spread_kernel(kernel_width);
    let half = kernel.len() / 2;
    let depth = dpv.len_of(Axis(1));
    let mut src = vec![0.0_f32; depth];
    let mut dst = vec![0.0_f32; depth];

    for mut lane in dpv.lanes_mut(Axis(1)) {
        for (s, &v) in src.iter_mut().zip(lane.iter()) {
            *s = match space {
                Space::Linear => v,
                Space::Log => v.exp(),
            };
        }

        let mut total = 0.0_f32;
        for (i, out) in dst.iter_mut().enumerate() {
            let mut acc = 0.0_f32;
            for (k, w) in kernel.iter().enumerate() {
                let j = i + k;
                if j >= half && j - half < depth {
                    acc += w * src[j - half];
                }
            }
            *out = acc;
            total += acc;
        }
        if !(total > 0.0 && total.is_finite()) {
            continue;
        }

        for (v, &d) in lane.iter_mut().zip(dst.iter()) {
            let p = d / total;
            *v = match space {
                Space::Linear => p,
                Space::Log => p.max(f32::MIN_POSITIVE).ln(),
            };
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────────────────

/// Per-pixel expected depth `Σ p(d)·d`, shape `(batch, height, width)`.
///
/// Pixels with no probability mass decode to `0.0`.
///
/// # Errors
///
/// Returns [`LcError::ShapeMismatch`] when the depth axis length differs from
/// the candidate count.
pub fn expected_depth(
    dpv: ArrayView4<f32>,
    candidates: &DepthCandidates,
    space: Space,
) -> Result<Array3<f32>, LcError> {
    let (batch, depth, height, width) = dpv.dim();
    if depth != candidates.len() {
        return Err(LcError::shape("expected_depth", candidates.len(), depth));
    }
    let depths = candidates.as_slice();
    let mut out = Array3::<f32>::zeros((batch, height, width));
    Zip::from(&mut out)
        .and(dpv.lanes(Axis(1)))
        .for_each(|o, lane| {
            let mut mass = 0.0_f32;
            let mut acc = 0.0_f32;
            for (&v, &d) in lane.iter().zip(depths) {
                let p = match space {
                    Space::Linear => v,
                    Space::Log => v.exp(),
                };
                if p.is_finite() {
                    mass += p;
                    acc += p * d;
                }
            }
            *o = if mass > 0.0 { acc / mass } else { 0.0 };
        });
    Ok(out)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
