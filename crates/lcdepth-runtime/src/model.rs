//! [`LcDepthModel`] – the network-plus-curtain forward pass.
//!
//! The depth network itself is an external collaborator behind the
//! [`DepthNetwork`] trait.  This module owns everything around it:
//!
//! 1. cold-start priors when no previous frame exists (uniform log beliefs);
//! 2. training-time dropout of the previous curtain belief, kept with
//!    probability `use_lc_prob` (never dropped in eval mode) and otherwise
//!    replaced by the same uniform prior as a cold start;
//! 3. the network call;
//! 4. light-curtain fusion of the last refined belief when `enabled`.
//!
//! [`LcDepthModel::carry_over`] turns one frame's output into the next frame's
//! priors for temporal fusion.

use lcdepth_hal::{LightCurtain, LightCurtainConfig};
use lcdepth_perception::distribution::uniform;
use lcdepth_types::{DepthCandidates, Intrinsics, LcConfig, LcError, Space};
use ndarray::{Array3, Array4, Array5, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::fusion_loop::{BatchStrategy, FusionLoop, SampleContext};

// ────────────────────────────────────────────────────────────────────────────
// Boundary types
// ────────────────────────────────────────────────────────────────────────────

/// One batch of model inputs.
#[derive(Debug, Clone)]
pub struct ModelInput {
    /// Image sequence `(B, T, 3, H, W)`; only the network reads it.
    pub rgb: Option<Array5<f32>>,
    /// Ground-truth depth `(B, h, w)` at feature resolution.
    pub dmaps: Array3<f32>,
    /// Validity masks, same shape as `dmaps`.
    pub masks: Array3<f32>,
    /// Feature-grid intrinsics per element.
    pub intrinsics: Vec<Intrinsics>,
    /// Intrinsics of the refined (upsampled) grid per element.
    pub intrinsics_up: Vec<Intrinsics>,
    /// Previous frame's refined log belief `(B, D, h, w)`.
    pub prev_output: Option<Array4<f32>>,
    /// Previous frame's curtain-fused log belief.
    pub prev_lc: Option<Array4<f32>>,
    /// Recorded sweeps `(N, H, W, 2)` per element, for the real sensor.
    pub sweeps: Option<Vec<Array4<f32>>>,
}

impl ModelInput {
    pub fn batch(&self) -> usize {
        self.dmaps.len_of(Axis(0))
    }
}

/// What the network sees on one call.
#[derive(Debug, Clone, Copy)]
pub struct NetworkInput<'a> {
    pub rgb: Option<&'a Array5<f32>>,
    pub intrinsics: &'a [Intrinsics],
    pub prev_output: ArrayView4<'a, f32>,
    /// Previous curtain belief, or the uniform cold-start prior when it was
    /// dropped.
    pub prev_lc: ArrayView4<'a, f32>,
}

/// Log beliefs produced by the network.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// Coarse beliefs, one per decoder stage.
    pub output: Vec<Array4<f32>>,
    /// Refined beliefs; the last one is fused with the curtain.
    pub output_refined: Vec<Array4<f32>>,
}

/// A learned depth-probability network.
pub trait DepthNetwork: Send {
    /// Run the network on one batch.
    fn forward(&mut self, input: &NetworkInput<'_>) -> Result<NetworkOutput, LcError>;
}

/// Full forward-pass result.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub output: Vec<Array4<f32>>,
    pub output_refined: Vec<Array4<f32>>,
    /// Curtain-fused refined belief, when fusion is enabled.
    pub output_lc: Option<Array4<f32>>,
    /// Per-element field RMSE per iteration, when scoring.
    pub lc_scores: Option<Vec<Vec<f32>>>,
}

// ────────────────────────────────────────────────────────────────────────────
// LcDepthModel
// ────────────────────────────────────────────────────────────────────────────

/// Network plus light-curtain fusion.
pub struct LcDepthModel<N: DepthNetwork> {
    network: N,
    config: LcConfig,
    candidates: DepthCandidates,
    fusion: FusionLoop,
    curtain: LightCurtain,
    rng: StdRng,
}

impl<N: DepthNetwork> LcDepthModel<N> {
    /// Wire `network` to a curtain configured by `config`.
    ///
    /// `candidates` is the network's depth axis; `seed` drives the
    /// `prev_lc` dropout.
    pub fn new(
        network: N,
        config: LcConfig,
        candidates: DepthCandidates,
        seed: u64,
    ) -> Result<Self, LcError> {
        let curtain = LightCurtain::new(LightCurtainConfig::from_lc_config(&config, &candidates)?)?;
        let fusion = FusionLoop::new(&config, candidates.clone())?;
        info!(
            planner = %config.planner,
            iterations = config.iterations,
            enabled = config.enabled,
            "lc depth model ready"
        );
        Ok(Self {
            network,
            config,
            candidates,
            fusion,
            curtain,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Schedule batch elements across worker threads during fusion.
    pub fn with_strategy(mut self, strategy: BatchStrategy) -> Self {
        self.fusion = self.fusion.with_strategy(strategy);
        self
    }

    pub fn config(&self) -> &LcConfig {
        &self.config
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// One forward pass.
    ///
    /// # Errors
    ///
    /// - [`LcError::ShapeMismatch`] when per-element inputs disagree with
    ///   the batch size.
    /// - [`LcError::MissingInput`] when fusion is enabled but the network
    ///   produced no refined belief.
    /// - Anything the network or the fusion loop returns.
    pub fn forward(&mut self, input: &ModelInput) -> Result<ModelOutput, LcError> {
        let batch = input.batch();
        if input.masks.dim() != input.dmaps.dim() {
            return Err(LcError::shape("masks", input.dmaps.dim(), input.masks.dim()));
        }
        if input.intrinsics.len() != batch || input.intrinsics_up.len() != batch {
            return Err(LcError::shape(
                "intrinsics per element",
                batch,
                (input.intrinsics.len(), input.intrinsics_up.len()),
            ));
        }
        if let Some(sweeps) = &input.sweeps
            && sweeps.len() != batch
        {
            return Err(LcError::shape("sweeps per element", batch, sweeps.len()));
        }

        let (_, height, width) = input.dmaps.dim();
        let cold = || uniform((batch, self.candidates.len(), height, width), Space::Log);
        let prev_output = input.prev_output.clone().unwrap_or_else(cold);
        let keep_lc = self.config.eval || self.rng.gen_bool(f64::from(self.config.use_lc_prob));
        let prev_lc = match &input.prev_lc {
            Some(prev) if keep_lc => prev.clone(),
            Some(_) => {
                debug!("previous curtain belief dropped for this batch");
                cold()
            }
            None => cold(),
        };

        let net_out = self.network.forward(&NetworkInput {
            rgb: input.rgb.as_ref(),
            intrinsics: &input.intrinsics,
            prev_output: prev_output.view(),
            prev_lc: prev_lc.view(),
        })?;

        let (output_lc, lc_scores) = if self.config.enabled {
            let refined = net_out.output_refined.last().ok_or_else(|| {
                LcError::MissingInput("network produced no refined belief".to_string())
            })?;
            let samples: Vec<SampleContext<'_>> = (0..batch)
                .map(|b| {
                    let ctx = SampleContext::new(input.intrinsics_up[b]).with_truth(
                        input.dmaps.index_axis(Axis(0), b),
                        Some(input.masks.index_axis(Axis(0), b)),
                    );
                    match &input.sweeps {
                        Some(sweeps) => ctx.with_sweep(sweeps[b].view()),
                        None => ctx,
                    }
                })
                .collect();
            let outcome = self.fusion.run(refined.view(), &samples, &mut self.curtain)?;
            let scores = self.config.score.then_some(outcome.scores);
            (Some(outcome.belief), scores)
        } else {
            (None, None)
        };

        Ok(ModelOutput {
            output: net_out.output,
            output_refined: net_out.output_refined,
            output_lc,
            lc_scores,
        })
    }

    /// Priors for the next frame: the last refined belief and, when present,
    /// the curtain-fused belief.
    pub fn carry_over(output: &ModelOutput) -> (Option<Array4<f32>>, Option<Array4<f32>>) {
        (
            output.output_refined.last().cloned(),
            output.output_lc.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcdepth_perception::distribution::{is_normalized, to_log};
    use lcdepth_perception::EPSILON;

    /// Echoes `prev_output` as its refined belief and records what it saw.
    #[derive(Default)]
    struct EchoNetwork {
        calls: usize,
        saw_uniform_lc: Vec<bool>,
        saw_uniform_prior: Vec<bool>,
    }

    fn is_flat(belief: ArrayView4<f32>) -> bool {
        let first = belief[[0, 0, 0, 0]];
        belief.iter().all(|&v| (v - first).abs() < 1e-6)
    }

    impl DepthNetwork for EchoNetwork {
        fn forward(&mut self, input: &NetworkInput<'_>) -> Result<NetworkOutput, LcError> {
            self.calls += 1;
            assert_eq!(input.prev_lc.dim(), input.prev_output.dim());
            self.saw_uniform_lc.push(is_flat(input.prev_lc));
            self.saw_uniform_prior.push(is_flat(input.prev_output));
            Ok(NetworkOutput {
                output: vec![input.prev_output.to_owned()],
                output_refined: vec![input.prev_output.to_owned()],
            })
        }
    }

    struct EmptyNetwork;

    impl DepthNetwork for EmptyNetwork {
        fn forward(&mut self, _input: &NetworkInput<'_>) -> Result<NetworkOutput, LcError> {
            Ok(NetworkOutput {
                output: Vec::new(),
                output_refined: Vec::new(),
            })
        }
    }

    fn axis() -> DepthCandidates {
        DepthCandidates::log_spaced(3.0, 18.0, 32).unwrap()
    }

    fn input(batch: usize) -> ModelInput {
        let k = Intrinsics::new(8.0, 8.0, 3.5, 2.5);
        ModelInput {
            rgb: None,
            dmaps: Array3::from_elem((batch, 6, 8), axis().as_slice()[16]),
            masks: Array3::from_elem((batch, 6, 8), 1.0),
            intrinsics: vec![k; batch],
            intrinsics_up: vec![k; batch],
            prev_output: None,
            prev_lc: None,
            sweeps: None,
        }
    }

    fn config() -> LcConfig {
        LcConfig {
            iterations: 2,
            expand_depth: 64,
            ..LcConfig::default()
        }
    }

    #[test]
    fn cold_start_uses_uniform_priors_and_fuses() {
        let mut model = LcDepthModel::new(EchoNetwork::default(), config(), axis(), 7).unwrap();
        let out = model.forward(&input(2)).unwrap();

        assert_eq!(model.network().calls, 1);
        assert_eq!(model.network().saw_uniform_prior, vec![true]);
        assert_eq!(model.network().saw_uniform_lc, vec![true]);
        let fused = out.output_lc.unwrap();
        assert_eq!(fused.dim(), (2, 32, 6, 8));
        assert!(is_normalized(fused.view(), Space::Log, 1e-3));
        assert!(out.lc_scores.is_none());
    }

    #[test]
    fn disabled_fusion_skips_the_curtain() {
        let cfg = LcConfig {
            enabled: false,
            ..config()
        };
        let mut model = LcDepthModel::new(EchoNetwork::default(), cfg, axis(), 7).unwrap();
        let out = model.forward(&input(1)).unwrap();
        assert!(out.output_lc.is_none());
        assert_eq!(out.output_refined.len(), 1);
    }

    fn peaked_lc(batch: usize) -> Array4<f32> {
        let linear = Array4::from_shape_fn((batch, 32, 6, 8), |(_, d, _, _)| {
            if d == 16 { 0.9 } else { 0.1 / 31.0 }
        });
        to_log(linear.view(), EPSILON)
    }

    #[test]
    fn training_dropout_substitutes_a_uniform_prior() {
        let with_prev_lc = ModelInput {
            prev_lc: Some(peaked_lc(1)),
            ..input(1)
        };

        let never = LcConfig {
            eval: false,
            use_lc_prob: 0.0,
            enabled: false,
            ..config()
        };
        let mut model = LcDepthModel::new(EchoNetwork::default(), never, axis(), 1).unwrap();
        for _ in 0..5 {
            model.forward(&with_prev_lc).unwrap();
        }
        assert_eq!(model.network().saw_uniform_lc, vec![true; 5]);

        let always = LcConfig {
            eval: false,
            use_lc_prob: 1.0,
            enabled: false,
            ..config()
        };
        let mut model = LcDepthModel::new(EchoNetwork::default(), always, axis(), 1).unwrap();
        for _ in 0..5 {
            model.forward(&with_prev_lc).unwrap();
        }
        assert_eq!(model.network().saw_uniform_lc, vec![false; 5]);
    }

    #[test]
    fn dropped_prior_matches_the_cold_start_prior() {
        let cfg = LcConfig {
            eval: false,
            use_lc_prob: 0.0,
            enabled: false,
            ..config()
        };
        let expected = uniform((2, 32, 6, 8), Space::Log);

        struct Capture(Option<Array4<f32>>);
        impl DepthNetwork for Capture {
            fn forward(&mut self, input: &NetworkInput<'_>) -> Result<NetworkOutput, LcError> {
                self.0 = Some(input.prev_lc.to_owned());
                Ok(NetworkOutput {
                    output: Vec::new(),
                    output_refined: Vec::new(),
                })
            }
        }

        let mut model = LcDepthModel::new(Capture(None), cfg, axis(), 5).unwrap();
        model
            .forward(&ModelInput {
                prev_lc: Some(peaked_lc(2)),
                ..input(2)
            })
            .unwrap();
        assert_eq!(model.network().0.as_ref(), Some(&expected));
    }

    #[test]
    fn eval_mode_never_drops() {
        let cfg = LcConfig {
            eval: true,
            use_lc_prob: 0.0,
            enabled: false,
            ..config()
        };
        let mut model = LcDepthModel::new(EchoNetwork::default(), cfg, axis(), 3).unwrap();
        let with_prev_lc = ModelInput {
            prev_lc: Some(peaked_lc(1)),
            ..input(1)
        };
        for _ in 0..3 {
            model.forward(&with_prev_lc).unwrap();
        }
        assert_eq!(model.network().saw_uniform_lc, vec![false; 3]);
    }

    #[test]
    fn carry_over_feeds_the_next_frame() {
        let cfg = LcConfig {
            score: true,
            ..config()
        };
        let mut model = LcDepthModel::new(EchoNetwork::default(), cfg, axis(), 7).unwrap();
        let first = model.forward(&input(1)).unwrap();
        assert_eq!(first.lc_scores.as_ref().map(|s| s[0].len()), Some(2));

        let (prev_output, prev_lc) = LcDepthModel::<EchoNetwork>::carry_over(&first);
        assert!(prev_lc.is_some());
        let next = ModelInput {
            prev_output,
            prev_lc,
            ..input(1)
        };
        model.forward(&next).unwrap();
        assert_eq!(model.network().saw_uniform_prior, vec![true, true]);
    }

    #[test]
    fn non_uniform_prior_is_passed_through() {
        let mut model = LcDepthModel::new(EchoNetwork::default(), config(), axis(), 7).unwrap();
        let linear = Array4::from_shape_fn((1, 32, 6, 8), |(_, d, _, _)| if d == 16 { 0.9 } else { 0.1 / 31.0 });
        let next = ModelInput {
            prev_output: Some(to_log(linear.view(), EPSILON)),
            ..input(1)
        };
        model.forward(&next).unwrap();
        assert_eq!(model.network().saw_uniform_prior, vec![false]);
    }

    #[test]
    fn missing_refined_belief_is_reported() {
        let mut model = LcDepthModel::new(EmptyNetwork, config(), axis(), 7).unwrap();
        let err = model.forward(&input(1)).unwrap_err();
        assert!(matches!(err, LcError::MissingInput(_)));
    }

    #[test]
    fn per_element_inputs_must_match_batch() {
        let mut model = LcDepthModel::new(EchoNetwork::default(), config(), axis(), 7).unwrap();
        let mut bad = input(2);
        bad.intrinsics_up.pop();
        assert!(matches!(
            model.forward(&bad),
            Err(LcError::ShapeMismatch { .. })
        ));
    }
}
