//! Ground-truth depth-probability volumes from metric depth maps.
//!
//! A valid pixel (mask set, depth finite and positive) becomes a Gaussian
//! over the candidate axis centred on its true depth.  Invalid pixels become
//! all-zero columns, which the uncertainty-field projection treats as "no
//! information" and the scorer ignores.

use lcdepth_types::{DepthCandidates, LcError};
use ndarray::{Array3, Array4, ArrayView3};

/// `true` when a depth sample can be used as ground truth.
pub fn is_valid_depth(depth: f32, mask: Option<f32>) -> bool {
    depth.is_finite() && depth > 0.0 && mask.is_none_or(|m| m > 0.0)
}

/// Build a linear DPV `(batch, D, height, width)` from a depth map.
///
/// # Errors
///
/// Returns [`LcError::ShapeMismatch`] when `mask` and `depth` disagree in
/// shape, and [`LcError::InvalidConfig`] for a non-positive `sigma`.
pub fn dpv_from_depth(
    depth: ArrayView3<f32>,
    mask: Option<ArrayView3<f32>>,
    candidates: &DepthCandidates,
    sigma: f32,
) -> Result<Array4<f32>, LcError> {
    if let Some(m) = &mask
        && m.dim() != depth.dim()
    {
        return Err(LcError::shape("ground-truth mask", depth.dim(), m.dim()));
    }
    if !(sigma > 0.0) {
        return Err(LcError::InvalidConfig(format!(
            "ground-truth sigma must be positive, got {sigma}"
        )));
    }

    let (batch, height, width) = depth.dim();
    let two_var = 2.0 * sigma * sigma;
    let mut dpv = Array4::<f32>::zeros((batch, candidates.len(), height, width));

    for ((b, y, x), &z) in depth.indexed_iter() {
        let m = mask.as_ref().map(|m| m[[b, y, x]]);
        if !is_valid_depth(z, m) {
            continue;
        }
        let mut total = 0.0_f32;
        for (i, &d) in candidates.as_slice().iter().enumerate() {
            let w = (-(d - z).powi(2) / two_var).exp();
            dpv[[b, i, y, x]] = w;
            total += w;
        }
        if total > 0.0 {
            for i in 0..candidates.len() {
                dpv[[b, i, y, x]] /= total;
            }
        } else {
            // Far outside the candidate range: all mass on the nearest bin.
            dpv[[b, candidates.nearest_index(z), y, x]] = 1.0;
        }
    }
    Ok(dpv)
}

/// Nearest-neighbour resize of `(batch, h, w)` maps to `(batch, height, width)`.
///
/// Only whole-number upscaling factors (equal to 1 included) are supported.
///
/// # Errors
///
/// Returns [`LcError::ShapeMismatch`] for any other size relation.
pub fn upsample_nearest(
    map: ArrayView3<f32>,
    height: usize,
    width: usize,
) -> Result<Array3<f32>, LcError> {
    let (batch, h, w) = map.dim();
    if h == 0 || w == 0 || height % h != 0 || width % w != 0 || height / h != width / w {
        return Err(LcError::shape(
            "nearest upsample",
            format!("integer multiple of ({h}, {w})"),
            (height, width),
        ));
    }
    let factor = height / h;
    if factor == 1 {
        return Ok(map.to_owned());
    }
    Ok(Array3::from_shape_fn((batch, height, width), |(b, y, x)| {
        map[[b, y / factor, x / factor]]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn axis() -> DepthCandidates {
        DepthCandidates::power_spaced(1.0, 10.0, 10, 1.0).unwrap()
    }

    #[test]
    fn valid_pixel_peaks_at_its_depth() {
        let depth = Array3::from_elem((1, 2, 2), 4.0_f32);
        let dpv = dpv_from_depth(depth.view(), None, &axis(), 0.3).unwrap();
        let column: Vec<f32> = (0..10).map(|i| dpv[[0, i, 1, 1]]).collect();
        assert!((column.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(column[3] > 0.9);
    }

    #[test]
    fn masked_and_invalid_pixels_are_empty() {
        let mut depth = Array3::from_elem((1, 1, 3), 5.0_f32);
        depth[[0, 0, 1]] = f32::NAN;
        let mut mask = Array3::from_elem((1, 1, 3), 1.0_f32);
        mask[[0, 0, 2]] = 0.0;

        let dpv = dpv_from_depth(depth.view(), Some(mask.view()), &axis(), 0.3).unwrap();
        let sum_at = |x: usize| (0..10).map(|i| dpv[[0, i, 0, x]]).sum::<f32>();
        assert!((sum_at(0) - 1.0).abs() < 1e-5);
        assert_eq!(sum_at(1), 0.0);
        assert_eq!(sum_at(2), 0.0);
    }

    #[test]
    fn far_depth_lands_on_the_last_bin() {
        let depth = Array3::from_elem((1, 1, 1), 500.0_f32);
        let dpv = dpv_from_depth(depth.view(), None, &axis(), 0.3).unwrap();
        assert_eq!(dpv[[0, 9, 0, 0]], 1.0);
    }

    #[test]
    fn mask_shape_must_match() {
        let depth = Array3::from_elem((1, 2, 2), 4.0_f32);
        let mask = Array3::from_elem((1, 2, 3), 1.0_f32);
        assert!(dpv_from_depth(depth.view(), Some(mask.view()), &axis(), 0.3).is_err());
        assert!(dpv_from_depth(depth.view(), None, &axis(), 0.0).is_err());
    }

    #[test]
    fn nearest_upsample_repeats_pixels() {
        let map = Array3::from_shape_vec((1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let up = upsample_nearest(map.view(), 8, 8).unwrap();
        assert_eq!(up.dim(), (1, 8, 8));
        assert_eq!(up[[0, 3, 3]], 1.0);
        assert_eq!(up[[0, 0, 7]], 2.0);
        assert_eq!(up[[0, 7, 0]], 3.0);
        assert_eq!(up[[0, 4, 4]], 4.0);

        assert_eq!(upsample_nearest(map.view(), 2, 2).unwrap(), map);
        assert!(upsample_nearest(map.view(), 3, 3).is_err());
        assert!(upsample_nearest(map.view(), 4, 8).is_err());
    }
}
