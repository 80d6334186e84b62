//! `lcdepth-perception` – belief representation and top-down projection.
//!
//! Everything here is a pure function over `ndarray` volumes; no module keeps
//! state between calls.
//!
//! # Modules
//!
//! - [`distribution`] – per-pixel categorical distributions over depth:
//!   resampling, the epsilon floor, spreading, and decoding.
//! - [`ufield`] – [`project`][ufield::project]: collapses a depth-probability
//!   volume into the angle × depth [`UncertaintyField`][ufield::UncertaintyField]
//!   that curtain planners consume.
//! - [`groundtruth`] – Gaussian depth-probability volumes built from metric
//!   depth maps, plus nearest-neighbour resizing of depth maps and masks.
//! - [`scoring`] – [`compute_unc_rmse`][scoring::compute_unc_rmse]: how far a
//!   predicted uncertainty field is from the ground-truth one.

pub mod distribution;
pub mod groundtruth;
pub mod scoring;
pub mod ufield;

pub use distribution::EPSILON;
pub use ufield::{FieldGeometry, UncertaintyField};
