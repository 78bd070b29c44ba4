//! Particle approximation of the posterior over model parameters.

use crate::design::{Design, Trial};
use crate::model::Model;
use crate::stats::WeightedAccumulator;
use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// Likelihoods are clamped to `[LIKELIHOOD_FLOOR, 1 - LIKELIHOOD_FLOOR]`.
pub const LIKELIHOOD_FLOOR: f64 = 1e-9;

/// Effective sample sizes this close to 1 are reported as degenerate.
const DEGENERATE_ESS_TOL: f64 = 1e-3;

/// Posterior mean and standard deviation of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub std_dev: f64,
}

/// Weighted particle set and the trials it has been conditioned on.
///
/// Parameter vectors are stored row-major in a single buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleBelief {
    n_params: usize,
    thetas: Vec<f64>,
    weights: Vec<f64>,
    trials: Vec<Trial>,
}

impl ParticleBelief {
    /// Draw `n_particles` independent parameter vectors from the model's priors.
    pub fn initialize<R: Rng + ?Sized>(
        model: &Model,
        n_particles: usize,
        rng: &mut R,
    ) -> Result<Self> {
        ensure!(n_particles > 0, "number of particles must be positive");

        let n_params = model.n_params();
        let mut thetas = Vec::with_capacity(n_particles * n_params);
        for _ in 0..n_particles {
            let theta = model.sample_prior(rng).context("failed to sample prior")?;
            thetas.extend_from_slice(&theta);
        }
        let weights = vec![1.0 / n_particles as f64; n_particles];

        Ok(Self {
            n_params,
            thetas,
            weights,
            trials: Vec::new(),
        })
    }

    pub fn n_particles(&self) -> usize {
        self.weights.len()
    }

    #[cfg(test)]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Trials conditioned on so far, in order.
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn theta(&self, i_particle: usize) -> &[f64] {
        let start = i_particle * self.n_params;
        &self.thetas[start..start + self.n_params]
    }

    /// Iterate over `(theta, weight)` pairs.
    pub fn particles(&self) -> impl Iterator<Item = (&[f64], f64)> {
        self.thetas
            .chunks_exact(self.n_params)
            .zip(self.weights.iter().copied())
    }

    /// Condition on one observed response and append it to the trial log.
    pub fn update(&mut self, model: &Model, design: &Design, chose_b: bool) -> Result<()> {
        let mut n_failed = 0;
        let mut n_floored = 0;

        for (theta, weight) in self
            .thetas
            .chunks_exact(self.n_params)
            .zip(self.weights.iter_mut())
        {
            let likelihood = match model.response_probability(theta, design) {
                Ok(prob) => {
                    if chose_b {
                        prob
                    } else {
                        1.0 - prob
                    }
                }
                Err(error) => {
                    if n_failed == 0 {
                        log::warn!("{error:#}");
                    }
                    n_failed += 1;
                    0.0
                }
            };
            if likelihood < LIKELIHOOD_FLOOR {
                n_floored += 1;
            }
            *weight *= likelihood.clamp(LIKELIHOOD_FLOOR, 1.0 - LIKELIHOOD_FLOOR);
        }

        if n_failed > 0 {
            log::warn!("{n_failed} particles failed to evaluate {design:?}");
        }
        if n_floored == self.n_particles() {
            log::warn!("every particle assigns negligible likelihood to the response");
        }

        normalize(&mut self.weights).context("failed to normalize weights")?;
        self.trials.push(Trial { design: *design, chose_b });

        Ok(())
    }

    /// Effective sample size, `1 / sum(w^2)`.
    pub fn effective_sample_size(&self) -> f64 {
        1.0 / self.weights.iter().map(|w| w * w).sum::<f64>()
    }

    /// Resample when the effective sample size drops below `ess_threshold * N`.
    ///
    /// Uses systematic resampling, then moves every parameter by Gaussian
    /// jitter with standard deviation `jitter_scale` times its posterior
    /// standard deviation. Jittered values outside the prior's support are
    /// discarded. Returns whether resampling took place.
    pub fn resample_if_needed<R: Rng + ?Sized>(
        &mut self,
        model: &Model,
        ess_threshold: f64,
        jitter_scale: f64,
        rng: &mut R,
    ) -> Result<bool> {
        let n_particles = self.n_particles();
        let ess = self.effective_sample_size();
        if ess <= 1.0 + DEGENERATE_ESS_TOL {
            log::warn!("particle weights collapsed onto a single particle");
        }
        if ess >= ess_threshold * n_particles as f64 {
            return Ok(false);
        }
        log::debug!("resampling with effective sample size {ess:.2}");

        let std_devs: Vec<f64> = self.summarize().into_iter().map(|acc| acc.std_dev()).collect();

        let step = 1.0 / n_particles as f64;
        let offset = rng.random_range(0.0..step);
        let mut thetas = Vec::with_capacity(self.thetas.len());
        let mut i_particle = 0;
        let mut cum_weight = self.weights[0];
        for i_draw in 0..n_particles {
            let target = offset + i_draw as f64 * step;
            while target > cum_weight && i_particle < n_particles - 1 {
                i_particle += 1;
                cum_weight += self.weights[i_particle];
            }
            thetas.extend_from_slice(self.theta(i_particle));
        }
        self.thetas = thetas;
        self.weights.fill(step);

        if jitter_scale > 0.0 {
            for (i_par, &std_dev) in std_devs.iter().enumerate() {
                let jitter_std_dev = jitter_scale * std_dev;
                if !(jitter_std_dev > 0.0 && jitter_std_dev.is_finite()) {
                    continue;
                }
                let prior = model.priors()[i_par];
                let jitter = Normal::new(0.0, jitter_std_dev)?;
                for theta in self.thetas.chunks_exact_mut(self.n_params) {
                    let val = theta[i_par] + jitter.sample(rng);
                    if prior.in_support(val) {
                        theta[i_par] = val;
                    }
                }
            }
        }

        Ok(true)
    }

    /// Posterior predictive probability of choosing B.
    pub fn predictive_probability(&self, model: &Model, design: &Design) -> Result<f64> {
        let mut prob = 0.0;
        for (theta, weight) in self.particles() {
            prob += weight * model.response_probability(theta, design)?;
        }
        Ok(prob)
    }

    /// Posterior expectation of an arbitrary function of the parameters.
    pub fn posterior_expectation<F>(&self, fun: F) -> f64
    where
        F: Fn(&[f64]) -> f64,
    {
        self.particles()
            .map(|(theta, weight)| weight * fun(theta))
            .sum()
    }

    /// Posterior mean of every parameter.
    pub fn posterior_mean(&self) -> Vec<f64> {
        (0..self.n_params)
            .map(|i_par| self.posterior_expectation(|theta| theta[i_par]))
            .collect()
    }

    /// Posterior mean and standard deviation of every parameter, by name.
    pub fn posterior_summary(&self, model: &Model) -> Vec<ParamSummary> {
        model
            .parameter_names()
            .iter()
            .zip(self.summarize())
            .map(|(name, acc)| ParamSummary {
                name: name.to_string(),
                mean: acc.mean(),
                std_dev: acc.std_dev(),
            })
            .collect()
    }

    fn summarize(&self) -> Vec<WeightedAccumulator> {
        let mut acc_vec = vec![WeightedAccumulator::new(); self.n_params];
        for (theta, weight) in self.particles() {
            for (acc, &val) in acc_vec.iter_mut().zip(theta) {
                acc.add(val, weight);
            }
        }
        acc_vec
    }
}

fn normalize(weights: &mut [f64]) -> Result<()> {
    let sum: f64 = weights.iter().sum();
    if !(sum > 0.0 && sum.is_finite()) {
        bail!("weights must have a positive finite sum, but sum to {sum}");
    }
    weights.iter_mut().for_each(|weight| *weight /= sum);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Prospect;
    use crate::model::ModelKind;
    use rand_chacha::ChaCha12Rng;

    fn design(reward_a: f64, delay_b: f64) -> Design {
        Design::new(
            Prospect::new(reward_a, 0.0, 1.0),
            Prospect::new(100.0, delay_b, 1.0),
        )
    }

    fn assert_normalized(belief: &ParticleBelief) {
        let sum: f64 = belief.weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "weights sum to {sum}");
        assert!(belief.weights().iter().all(|&weight| weight >= 0.0));
    }

    #[test]
    fn initialization_is_uniform() {
        let model = Model::new(ModelKind::MultiplicativeHyperbolic);
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let belief = ParticleBelief::initialize(&model, 300, &mut rng).unwrap();
        assert_eq!(belief.n_particles(), 300);
        assert_eq!(belief.theta(299).len(), 3);
        assert!((belief.effective_sample_size() - 300.0).abs() < 1e-6);
        assert_normalized(&belief);

        let mean = belief.posterior_mean();
        assert!((mean[0] + 4.5).abs() < 0.3);
        assert!(mean[1].abs() < 0.3);

        assert!(ParticleBelief::initialize(&model, 0, &mut rng).is_err());
    }

    #[test]
    fn weights_stay_normalized() {
        let model = Model::new(ModelKind::DelayedHyperbolic);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut belief = ParticleBelief::initialize(&model, 500, &mut rng).unwrap();
        for i_trial in 0..30 {
            let design = design(10.0 + 3.0 * i_trial as f64, 30.0);
            belief.update(&model, &design, i_trial % 3 != 0).unwrap();
            assert_normalized(&belief);
            belief.resample_if_needed(&model, 0.5, 0.1, &mut rng).unwrap();
            assert_normalized(&belief);
            assert_eq!(belief.n_particles(), 500);
        }
        assert_eq!(belief.trials().len(), 30);
    }

    #[test]
    fn update_moves_posterior_towards_response() {
        let model = Model::new(ModelKind::DelayedHyperbolic);
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let prior = ParticleBelief::initialize(&model, 1000, &mut rng).unwrap();

        // Preferring 50 now over 100 in a month implies steep discounting.
        let mut steep = prior.clone();
        steep.update(&model, &design(50.0, 30.0), false).unwrap();
        let mut shallow = prior.clone();
        shallow.update(&model, &design(50.0, 30.0), true).unwrap();

        let prior_logk = prior.posterior_mean()[0];
        assert!(steep.posterior_mean()[0] > prior_logk);
        assert!(shallow.posterior_mean()[0] < prior_logk);
        assert!(steep.effective_sample_size() < prior.effective_sample_size());
    }

    #[test]
    fn sequential_updates_are_deterministic_and_order_sensitive() {
        let model = Model::new(ModelKind::DelayedHyperbolic);
        let trials = [(design(40.0, 30.0), true), (design(90.0, 7.0), false)];

        let run = |order: &[usize]| {
            let mut rng = ChaCha12Rng::seed_from_u64(4);
            let mut belief = ParticleBelief::initialize(&model, 400, &mut rng).unwrap();
            for &i_trial in order {
                let (design, chose_b) = trials[i_trial];
                belief.update(&model, &design, chose_b).unwrap();
                belief.resample_if_needed(&model, 1.0, 0.1, &mut rng).unwrap();
            }
            belief
        };

        let forward = run(&[0, 1]);
        assert_eq!(forward, run(&[0, 1]));

        let backward = run(&[1, 0]);
        assert_ne!(forward.trials(), backward.trials());
        assert_ne!(forward.posterior_mean(), backward.posterior_mean());
    }

    #[test]
    fn jitter_respects_prior_support() {
        let model = Model::new(ModelKind::MyersonHyperboloid);
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let mut belief = ParticleBelief::initialize(&model, 200, &mut rng).unwrap();
        for i_trial in 0..10 {
            belief
                .update(&model, &design(20.0 + 5.0 * i_trial as f64, 60.0), true)
                .unwrap();
            belief.resample_if_needed(&model, 1.0, 0.5, &mut rng).unwrap();
        }
        for (theta, _) in belief.particles() {
            for (prior, &val) in model.priors().iter().zip(theta) {
                assert!(prior.in_support(val));
            }
        }
    }

    fn risky_belief(low: f64, high: f64) -> (Model, ParticleBelief) {
        let mut cfg = crate::config::ModelConfig::new(ModelKind::RiskyHyperbolic);
        cfg.priors
            .insert("logh".to_string(), crate::prior::Prior::Uniform { low, high });
        let model = Model::from_config(&cfg).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let belief = ParticleBelief::initialize(&model, 400, &mut rng).unwrap();
        (model, belief)
    }

    fn impossible_design() -> Design {
        Design::new(
            Prospect::new(50.0, 0.0, 1.0),
            Prospect::new(100.0, 0.0, 0.0),
        )
    }

    #[test]
    fn failing_particles_receive_the_likelihood_floor() {
        // Rates that underflow to zero give 0 * inf for a zero probability.
        let (model, mut belief) = risky_belief(-2000.0, -1000.0);
        let design = impossible_design();
        assert!(
            (0..belief.n_particles())
                .all(|i| model.response_probability(belief.theta(i), &design).is_err())
        );

        belief.update(&model, &design, true).unwrap();
        assert_normalized(&belief);
        assert_eq!(belief.n_particles(), 400);
        assert_eq!(belief.trials().to_vec(), vec![Trial { design, chose_b: true }]);
        assert!((belief.effective_sample_size() - 400.0).abs() < 1e-6);
    }

    #[test]
    fn weight_moves_onto_particles_that_evaluate() {
        let (model, mut belief) = risky_belief(-2000.0, 10.0);
        let design = impossible_design();
        let evaluates: Vec<bool> = (0..belief.n_particles())
            .map(|i| model.response_probability(belief.theta(i), &design).is_ok())
            .collect();
        assert!(evaluates.iter().any(|&ok| ok));
        assert!(evaluates.iter().any(|&ok| !ok));

        belief.update(&model, &design, false).unwrap();
        assert_normalized(&belief);
        let evaluated_weight: f64 = belief
            .weights()
            .iter()
            .zip(&evaluates)
            .filter(|(_, ok)| **ok)
            .map(|(weight, _)| weight)
            .sum();
        assert!(evaluated_weight > 1.0 - 1e-6, "{evaluated_weight}");
    }

    #[test]
    fn summary_names_parameters() {
        let model = Model::new(ModelKind::ModifiedRachlin);
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let belief = ParticleBelief::initialize(&model, 100, &mut rng).unwrap();
        let summary = belief.posterior_summary(&model);
        let names: Vec<_> = summary.iter().map(|par| par.name.as_str()).collect();
        assert_eq!(names, ["logk", "s", "alpha"]);
        assert!(summary.iter().all(|par| par.std_dev > 0.0));

        let mean_logk = belief.posterior_expectation(|theta| theta[0]);
        assert!((mean_logk - summary[0].mean).abs() < 1e-9);
    }
}
