//! Field-level scoring of a belief against ground truth.

use lcdepth_types::{DepthCandidates, LcError};
use ndarray::{Array1, ArrayView3, Axis, Zip};

/// Root-mean-square difference between two uncertainty fields, per batch
/// element.
///
/// Both fields are `(batch, angle_bins, depth_bins)`.  Entries where either
/// field is NaN (angles outside the image) are skipped; an element with no
/// comparable entries scores NaN.  Purely diagnostic: callers never feed the
/// score back into the belief.
///
/// # Errors
///
/// Returns [`LcError::ShapeMismatch`] when the fields differ in shape or their
/// depth axis does not match `candidates`.
///
/// ```rust
/// use lcdepth_perception::scoring::compute_unc_rmse;
/// use lcdepth_types::DepthCandidates;
/// use ndarray::Array3;
///
/// let candidates = DepthCandidates::power_spaced(1.0, 4.0, 4, 1.0).unwrap();
/// let truth = Array3::from_elem((1, 2, 4), 0.25_f32);
/// let rmse = compute_unc_rmse(truth.view(), truth.view(), &candidates).unwrap();
/// assert_eq!(rmse[0], 0.0);
/// ```
pub fn compute_unc_rmse(
    truth: ArrayView3<f32>,
    predicted: ArrayView3<f32>,
    candidates: &DepthCandidates,
) -> Result<Array1<f32>, LcError> {
    if truth.dim() != predicted.dim() {
        return Err(LcError::shape("rmse fields", truth.dim(), predicted.dim()));
    }
    let depth_bins = truth.len_of(Axis(2));
    if depth_bins != candidates.len() {
        return Err(LcError::shape(
            "rmse depth axis",
            candidates.len(),
            depth_bins,
        ));
    }

    let scores = truth
        .axis_iter(Axis(0))
        .zip(predicted.axis_iter(Axis(0)))
        .map(|(t, p)| {
            let mut sum_sq = 0.0_f64;
            let mut count = 0_usize;
            Zip::from(&t).and(&p).for_each(|&a, &b| {
                if a.is_finite() && b.is_finite() {
                    let diff = f64::from(a - b);
                    sum_sq += diff * diff;
                    count += 1;
                }
            });
            if count == 0 {
                f32::NAN
            } else {
                (sum_sq / count as f64).sqrt() as f32
            }
        })
        .collect();
    Ok(scores)
}
