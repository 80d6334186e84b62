//! [`FusionLoop`] – sequential Bayesian fusion of curtain returns.
//!
//! Every batch element owns one [`FusionState`] in an arena and is driven
//! through a small state machine:
//!
//! ```text
//!   Init ──► Iterate ──► … ──► Iterate ──► Finalize ──► Done
//!            (× iterations)
//! ```
//!
//! - **Init** – resample the log belief to the curtain's depth axis and bring
//!   ground-truth depth (and mask) to the belief's pixel grid.
//! - **Iterate** – project the belief into an uncertainty field, optionally
//!   score it against the ground-truth field, plan curtain paths, sense each
//!   one, and fold the returns into the belief with [`bayes_update`].
//! - **Finalize** – resample back to the caller's depth axis.
//!
//! Elements never share state, so they can be processed in any order; the
//! outcome is always concatenated in input order.  With
//! [`BatchStrategy::Parallel`] each worker thread forks its own
//! [`LightCurtain`].
//!
//! # Example
//!
//! ```rust
//! use lcdepth_hal::{LightCurtain, LightCurtainConfig};
//! use lcdepth_perception::distribution::uniform;
//! use lcdepth_runtime::fusion_loop::{FusionLoop, SampleContext};
//! use lcdepth_types::{DepthCandidates, Intrinsics, LcConfig, Space};
//! use ndarray::Array2;
//!
//! let candidates = DepthCandidates::log_spaced(3.0, 18.0, 32).unwrap();
//! let cfg = LcConfig { iterations: 2, expand_depth: 64, ..LcConfig::default() };
//! let mut curtain =
//!     LightCurtain::new(LightCurtainConfig::from_lc_config(&cfg, &candidates).unwrap()).unwrap();
//! let fusion = FusionLoop::new(&cfg, candidates).unwrap();
//!
//! let belief = uniform((1, 32, 6, 8), Space::Log);
//! let truth = Array2::from_elem((6, 8), 7.5_f32);
//! let sample = SampleContext::new(Intrinsics::new(8.0, 8.0, 3.5, 2.5))
//!     .with_truth(truth.view(), None);
//!
//! let outcome = fusion.run(belief.view(), &[sample], &mut curtain).unwrap();
//! assert_eq!(outcome.belief.dim(), (1, 32, 6, 8));
//! ```

use lcdepth_hal::{LightCurtain, Scene};
use lcdepth_perception::distribution::{
    clamp_and_renormalize, normalize_columns, spread, upsample,
};
use lcdepth_perception::groundtruth::{dpv_from_depth, upsample_nearest};
use lcdepth_perception::scoring::compute_unc_rmse;
use lcdepth_types::{DepthCandidates, Intrinsics, LcConfig, LcError, PlannerParams, Space};
use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis, Zip};
use tracing::{debug, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Inputs
// ────────────────────────────────────────────────────────────────────────────

/// How batch elements are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchStrategy {
    /// One element after another on the caller's thread, sharing the
    /// caller's curtain.
    #[default]
    Sequential,
    /// Up to `workers` scoped threads, each with a forked curtain.  Forks
    /// start with fresh planner state.
    Parallel { workers: usize },
}

/// Per-element inputs besides the belief itself.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext<'a> {
    /// Intrinsics of the belief's pixel grid.
    pub intrinsics: Intrinsics,
    /// Ground-truth depth; may be an integer factor smaller than the belief.
    pub depth: Option<ArrayView2<'a, f32>>,
    /// Validity mask for `depth` (same shape; `> 0` is valid).
    pub mask: Option<ArrayView2<'a, f32>>,
    /// Recorded sweep for the real sensor.
    pub sweep: Option<ArrayView4<'a, f32>>,
}

impl<'a> SampleContext<'a> {
    pub fn new(intrinsics: Intrinsics) -> Self {
        Self {
            intrinsics,
            depth: None,
            mask: None,
            sweep: None,
        }
    }

    pub fn with_truth(mut self, depth: ArrayView2<'a, f32>, mask: Option<ArrayView2<'a, f32>>) -> Self {
        self.depth = Some(depth);
        self.mask = mask;
        self
    }

    pub fn with_sweep(mut self, sweep: ArrayView4<'a, f32>) -> Self {
        self.sweep = Some(sweep);
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

/// Where a [`FusionState`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionPhase {
    Init,
    Iterate,
    Finalize,
    Done,
}

/// Everything the loop tracks for one batch element.
#[derive(Debug, Clone)]
pub struct FusionState {
    /// Position of the element in the input batch.
    pub index: usize,
    pub phase: FusionPhase,
    /// Completed iterations.
    pub iteration: usize,
    /// Log belief `(1, depth, H, W)`.
    pub belief: Array4<f32>,
    /// Uncertainty-field RMSE per iteration (when scoring).
    pub scores: Vec<f32>,
    /// Visual of the most recent plan (when requested).
    pub visual: Option<Array3<f32>>,
    truth_depth: Option<Array2<f32>>,
    truth_field: Option<Array3<f32>>,
}

impl FusionState {
    fn new(index: usize, belief: Array4<f32>) -> Self {
        Self {
            index,
            phase: FusionPhase::Init,
            iteration: 0,
            belief,
            scores: Vec::new(),
            visual: None,
            truth_depth: None,
            truth_field: None,
        }
    }
}

/// Result of [`FusionLoop::run`].
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    /// Fused log belief `(B, D, H, W)` in input order.
    pub belief: Array4<f32>,
    /// Per-element, per-iteration field RMSE; empty lists when not scoring.
    pub scores: Vec<Vec<f32>>,
    /// Last plan visual per element, when requested.
    pub visuals: Vec<Array3<f32>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Bayesian update
// ────────────────────────────────────────────────────────────────────────────

/// Fold linear likelihoods `(D, H, W)` into a log belief `(1, D, H, W)`.
///
/// The belief is exponentiated and floored at `epsilon`; each likelihood in
/// turn has NaNs zeroed, is clipped to `[epsilon, 1]`, multiplied in, and the
/// product renormalised.  The result is spread `params.spread_iter` times,
/// clamped and renormalised, and returned in log space together with the
/// number of NaN likelihood entries that were zeroed.
///
/// # Errors
///
/// Returns [`LcError::ShapeMismatch`] when a likelihood does not match the
/// belief, or the belief's batch axis is not 1.
pub fn bayes_update<'l>(
    belief: ArrayView4<f32>,
    likelihoods: impl IntoIterator<Item = ArrayView3<'l, f32>>,
    params: &PlannerParams,
    epsilon: f32,
) -> Result<(Array4<f32>, usize), LcError> {
    let (batch, depth, height, width) = belief.dim();
    if batch != 1 {
        return Err(LcError::shape("belief batch", 1, batch));
    }

    let mut curr = belief.mapv(|v| v.exp().clamp(epsilon, 1.0));
    let mut nan_entries = 0;
    for likelihood in likelihoods {
        if likelihood.dim() != (depth, height, width) {
            return Err(LcError::shape(
                "sensed likelihood",
                (depth, height, width),
                likelihood.dim(),
            ));
        }
        let likelihood = likelihood.insert_axis(Axis(0));
        Zip::from(&mut curr).and(&likelihood).for_each(|c, &l| {
            let l = if l.is_nan() {
                nan_entries += 1;
                0.0
            } else {
                l
            };
            *c *= l.clamp(epsilon, 1.0);
        });
        normalize_columns(&mut curr);
    }

    for _ in 0..params.spread_iter {
        spread(&mut curr, params.spread_n, Space::Linear);
    }
    clamp_and_renormalize(&mut curr, epsilon);
    curr.mapv_inplace(f32::ln);
    Ok((curr, nan_entries))
}

// ────────────────────────────────────────────────────────────────────────────
// FusionLoop
// ────────────────────────────────────────────────────────────────────────────

/// Drives every batch element through plan → sense → fuse iterations.
#[derive(Debug, Clone)]
pub struct FusionLoop {
    candidates: DepthCandidates,
    iterations: usize,
    params: PlannerParams,
    epsilon: f32,
    truth_sigma: f32,
    score: bool,
    visualize: bool,
    strategy: BatchStrategy,
}

impl FusionLoop {
    /// A loop over beliefs expressed on `candidates`, configured from `cfg`.
    pub fn new(cfg: &LcConfig, candidates: DepthCandidates) -> Result<Self, LcError> {
        cfg.validate()?;
        Ok(Self {
            candidates,
            iterations: cfg.iterations,
            params: cfg.params.clone(),
            epsilon: cfg.epsilon,
            truth_sigma: cfg.truth_sigma,
            score: cfg.score,
            visualize: false,
            strategy: BatchStrategy::Sequential,
        })
    }

    pub fn with_strategy(mut self, strategy: BatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Keep the last plan visual of every element in the outcome.
    pub fn with_visuals(mut self, visualize: bool) -> Self {
        self.visualize = visualize;
        self
    }

    pub fn candidates(&self) -> &DepthCandidates {
        &self.candidates
    }

    /// Fuse curtain returns into `belief` (log, `(B, D, H, W)`), one
    /// [`SampleContext`] per batch element.
    ///
    /// # Errors
    ///
    /// - [`LcError::ShapeMismatch`] for a depth axis other than
    ///   [`candidates`](Self::candidates), a context count other than `B`, or
    ///   ground truth that is not an integer factor of the belief's grid.
    /// - Any planner or sensor error, e.g. [`LcError::MissingInput`] when the
    ///   simulated sensor has no ground truth.
    pub fn run(
        &self,
        belief: ArrayView4<f32>,
        samples: &[SampleContext<'_>],
        curtain: &mut LightCurtain,
    ) -> Result<FusionOutcome, LcError> {
        let (batch, depth, height, width) = belief.dim();
        if depth != self.candidates.len() {
            return Err(LcError::shape("belief depth axis", self.candidates.len(), depth));
        }
        if samples.len() != batch {
            return Err(LcError::shape("sample contexts", batch, samples.len()));
        }
        self.check_curtain_axis(curtain.candidates())?;
        info!(
            batch,
            depth,
            height,
            width,
            iterations = self.iterations,
            curtain_depth = curtain.candidates().len(),
            strategy = ?self.strategy,
            "light-curtain fusion started"
        );

        let mut states: Vec<FusionState> = belief
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, b)| FusionState::new(i, b.insert_axis(Axis(0)).to_owned()))
            .collect();

        match self.strategy {
            BatchStrategy::Parallel { workers } if workers > 1 && batch > 1 => {
                self.run_parallel(&mut states, samples, curtain, workers)?;
            }
            _ => {
                for (state, ctx) in states.iter_mut().zip(samples) {
                    self.drive(state, ctx, curtain)?;
                }
            }
        }

        let views: Vec<ArrayView4<f32>> = states.iter().map(|s| s.belief.view()).collect();
        let fused = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| LcError::shape("fused batch", (batch, depth, height, width), e))?;
        let scores = states.iter().map(|s| s.scores.clone()).collect();
        let visuals = states.iter_mut().filter_map(|s| s.visual.take()).collect();
        info!(batch, "light-curtain fusion finished");

        Ok(FusionOutcome {
            belief: fused,
            scores,
            visuals,
        })
    }

    /// The curtain must discretise the same depth range, with the same
    /// spacing, as the loop's own candidates.
    fn check_curtain_axis(&self, curtain_axis: &DepthCandidates) -> Result<(), LcError> {
        let expected = self.candidates.resampled(curtain_axis.len())?;
        let tolerance = 1e-4 * self.candidates.max().abs().max(1.0);
        let mismatch = expected
            .as_slice()
            .iter()
            .zip(curtain_axis.as_slice())
            .position(|(a, b)| (a - b).abs() > tolerance);
        if let Some(i) = mismatch {
            return Err(LcError::shape(
                "curtain depth axis",
                format!(
                    "[{}, {}] resampled to {} bins",
                    self.candidates.min(),
                    self.candidates.max(),
                    curtain_axis.len()
                ),
                format!(
                    "[{}, {}] (bin {i} at {})",
                    curtain_axis.min(),
                    curtain_axis.max(),
                    curtain_axis.as_slice()[i]
                ),
            ));
        }
        Ok(())
    }

    fn run_parallel(
        &self,
        states: &mut [FusionState],
        samples: &[SampleContext<'_>],
        curtain: &LightCurtain,
        workers: usize,
    ) -> Result<(), LcError> {
        let chunk = states.len().div_ceil(workers);
        let forks = (0..states.len().div_ceil(chunk))
            .map(|_| curtain.fork())
            .collect::<Result<Vec<_>, _>>()?;

        std::thread::scope(|scope| {
            let handles: Vec<_> = states
                .chunks_mut(chunk)
                .zip(samples.chunks(chunk))
                .zip(forks)
                .map(|((states, samples), mut worker)| {
                    scope.spawn(move || -> Result<(), LcError> {
                        for (state, ctx) in states.iter_mut().zip(samples) {
                            self.drive(state, ctx, &mut worker)?;
                        }
                        Ok(())
                    })
                })
                .collect();

            handles.into_iter().try_for_each(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(LcError::SensorFault {
                        component: "fusion worker".to_string(),
                        details: "worker thread panicked".to_string(),
                    })
                })
            })
        })
    }

    /// Step one element's state machine to completion.
    fn drive(
        &self,
        state: &mut FusionState,
        ctx: &SampleContext<'_>,
        curtain: &mut LightCurtain,
    ) -> Result<(), LcError> {
        loop {
            match state.phase {
                FusionPhase::Init => self.init(state, ctx, curtain)?,
                FusionPhase::Iterate => self.iterate(state, ctx, curtain)?,
                FusionPhase::Finalize => {
                    if state.belief.len_of(Axis(1)) != self.candidates.len() {
                        state.belief =
                            upsample(state.belief.view(), self.candidates.len(), Space::Log)?;
                    }
                    state.phase = FusionPhase::Done;
                }
                FusionPhase::Done => return Ok(()),
            }
        }
    }

    fn init(
        &self,
        state: &mut FusionState,
        ctx: &SampleContext<'_>,
        curtain: &LightCurtain,
    ) -> Result<(), LcError> {
        if self.iterations == 0 {
            state.phase = FusionPhase::Finalize;
            return Ok(());
        }
        let (_, _, height, width) = state.belief.dim();
        state.belief = upsample(state.belief.view(), curtain.candidates().len(), Space::Log)?;

        if let Some(depth) = ctx.depth {
            let mut truth = upsample_nearest(depth.insert_axis(Axis(0)), height, width)?
                .index_axis_move(Axis(0), 0);
            if let Some(mask) = ctx.mask {
                if mask.dim() != depth.dim() {
                    return Err(LcError::shape("truth mask", depth.dim(), mask.dim()));
                }
                let mask = upsample_nearest(mask.insert_axis(Axis(0)), height, width)?;
                Zip::from(&mut truth)
                    .and(&mask.index_axis(Axis(0), 0))
                    .for_each(|z, &m| {
                        if !(m > 0.0) {
                            *z = f32::NAN;
                        }
                    });
            }
            if self.score {
                let dpv = dpv_from_depth(
                    truth.view().insert_axis(Axis(0)),
                    None,
                    curtain.candidates(),
                    self.truth_sigma,
                )?;
                let field = curtain.project(dpv.view(), Space::Linear, &ctx.intrinsics)?;
                state.truth_field = Some(field.field);
            }
            state.truth_depth = Some(truth);
        }

        state.phase = FusionPhase::Iterate;
        Ok(())
    }

    fn iterate(
        &self,
        state: &mut FusionState,
        ctx: &SampleContext<'_>,
        curtain: &mut LightCurtain,
    ) -> Result<(), LcError> {
        let uf = curtain.project(state.belief.view(), Space::Log, &ctx.intrinsics)?;
        if let Some(truth) = &state.truth_field {
            let rmse = compute_unc_rmse(truth.view(), uf.field.view(), &uf.geometry.depths)?;
            state.scores.push(rmse[0]);
        }

        let plan = curtain.plan(uf.field.index_axis(Axis(0), 0), &uf.geometry, &self.params)?;
        let mut likelihoods = Vec::with_capacity(plan.paths.len());
        {
            let depth: Option<ArrayView2<'_, f32>> = state.truth_depth.as_ref().map(|d| d.view());
            let sweep: Option<ArrayView4<'_, f32>> = ctx.sweep.map(|v| v.reborrow());
            let scene = Scene {
                depth,
                intrinsics: ctx.intrinsics,
                sweep,
            };
            for path in &plan.paths {
                likelihoods.push(curtain.sense(&scene, path)?.likelihood);
            }
        }

        let (belief, nan_entries) = bayes_update(
            state.belief.view(),
            likelihoods.iter().map(|l| l.view()),
            &self.params,
            self.epsilon,
        )?;
        let total: usize = likelihoods.iter().map(|l| l.len()).sum();
        if total > 0 && nan_entries == total {
            warn!(
                element = state.index,
                iteration = state.iteration,
                "every sensed likelihood entry was NaN; belief only spread"
            );
        }
        state.belief = belief;

        if self.visualize {
            let mut visual = plan.visual;
            if let Some(truth) = &state.truth_field {
                let overlay = truth
                    .index_axis(Axis(0), 0)
                    .mapv(|v| if v.is_finite() { v } else { 0.0 });
                visual.index_axis_mut(Axis(2), 2).assign(&overlay);
            }
            state.visual = Some(visual);
        }

        debug!(
            element = state.index,
            iteration = state.iteration,
            paths = plan.paths.len(),
            nan_entries,
            score = state.scores.last().copied(),
            "fusion iteration complete"
        );
        state.iteration += 1;
        if state.iteration >= self.iterations {
            state.phase = FusionPhase::Finalize;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
