//! `lcdepth-hal` – the light-curtain device layer.
//!
//! # Modules
//!
//! - [`planner`] – the [`Planner`][planner::Planner] trait and its default,
//!   quantile (m1), and sweep variants, selected by
//!   [`build_planner`][planner::build_planner].
//! - [`sensor`] – the [`CurtainSensor`][sensor::CurtainSensor] trait, the
//!   [`Scene`][sensor::Scene] a sensor images, and the shared intensity model.
//! - [`sim`] – [`SimulatedSensor`][sim::SimulatedSensor]: returns rendered
//!   from ground-truth depth.
//! - [`real`] – [`RealSweepSensor`][real::RealSweepSensor]: returns looked up
//!   in a recorded sweep.
//! - [`curtain`] – [`LightCurtain`][curtain::LightCurtain]: one planner plus
//!   one sensor over a fixed depth axis; the only stateful resource in the
//!   stack.

pub mod curtain;
pub mod planner;
pub mod real;
pub mod sensor;
pub mod sim;

pub use curtain::{LightCurtain, LightCurtainConfig};
pub use planner::{Plan, PathPoint, Planner, ScanPath};
pub use sensor::{CurtainSensor, Scene, SensedReturn};
