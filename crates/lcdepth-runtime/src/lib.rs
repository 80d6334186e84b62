//! `lcdepth-runtime` – the iterative curtain fusion loop and its drivers.
//!
//! # Modules
//!
//! - [`fusion_loop`] – [`FusionLoop`][fusion_loop::FusionLoop]: per-sample
//!   project → score → plan → sense → update iterations, and the standalone
//!   [`bayes_update`][fusion_loop::bayes_update] step.
//! - [`model`] – [`LcDepthModel`][model::LcDepthModel]: a depth network
//!   followed by curtain fusion, with cold-start priors and `prev_lc` dropout.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the tracing
//!   subscriber plus optional OTLP export.

pub mod fusion_loop;
pub mod model;
pub mod telemetry;

pub use fusion_loop::{BatchStrategy, FusionLoop, FusionOutcome, SampleContext, bayes_update};
pub use model::{DepthNetwork, LcDepthModel, ModelInput, ModelOutput, NetworkInput, NetworkOutput};
