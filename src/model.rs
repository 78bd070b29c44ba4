//! Discounting models of delayed and risky choice.
//!
//! Every model turns a parameter vector and a [`Design`] into a decision
//! variable, the signed advantage of prospect B over prospect A, and maps it
//! through a lapse-contaminated cumulative normal to the probability of
//! choosing B. The last parameter of every model is `alpha`, the acuity with
//! which value differences are discriminated.

use crate::config::ModelConfig;
use crate::design::{Design, Prospect};
use crate::prior::Prior;
use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rand_distr::Bernoulli;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf;
use std::{collections::BTreeMap, f64::consts::SQRT_2};

/// Functional form of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    // Delayed choice.
    DelayedHyperbolic,
    DelayedExponential,
    HyperbolicMagnitudeEffect,
    ExponentialMagnitudeEffect,
    ModifiedRachlin,
    MyersonHyperboloid,

    // Risky choice.
    RiskyHyperbolic,
    ProportionalDifference,
    ProspectTheory,

    // Delayed and risky choice.
    MultiplicativeHyperbolic,
}

impl ModelKind {
    #[cfg(test)]
    pub const ALL: [ModelKind; 10] = [
        ModelKind::DelayedHyperbolic,
        ModelKind::DelayedExponential,
        ModelKind::HyperbolicMagnitudeEffect,
        ModelKind::ExponentialMagnitudeEffect,
        ModelKind::ModifiedRachlin,
        ModelKind::MyersonHyperboloid,
        ModelKind::RiskyHyperbolic,
        ModelKind::ProportionalDifference,
        ModelKind::ProspectTheory,
        ModelKind::MultiplicativeHyperbolic,
    ];

    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::DelayedHyperbolic | ModelKind::DelayedExponential => &["logk", "alpha"],
            ModelKind::HyperbolicMagnitudeEffect | ModelKind::ExponentialMagnitudeEffect => {
                &["m", "c", "alpha"]
            }
            ModelKind::ModifiedRachlin | ModelKind::MyersonHyperboloid => &["logk", "s", "alpha"],
            ModelKind::RiskyHyperbolic => &["logh", "alpha"],
            ModelKind::ProportionalDifference => &["delta", "alpha"],
            ModelKind::ProspectTheory => &["gamma", "alpha"],
            ModelKind::MultiplicativeHyperbolic => &["logk", "logh", "alpha"],
        }
    }

    fn default_priors(self) -> Vec<Prior> {
        let logk = Prior::Normal {
            mean: -4.5,
            std_dev: 1.0,
        };
        let logh = Prior::Normal {
            mean: 0.0,
            std_dev: 1.0,
        };
        let alpha = Prior::HalfNormal { scale: 2.0 };
        let m = Prior::Normal {
            mean: -0.243,
            std_dev: 0.5,
        };
        let c = Prior::Normal {
            mean: -3.5,
            std_dev: 1.0,
        };
        let s = Prior::LogNormal {
            mu: 0.0,
            sigma: 0.5,
        };
        match self {
            ModelKind::DelayedHyperbolic | ModelKind::DelayedExponential => vec![logk, alpha],
            ModelKind::HyperbolicMagnitudeEffect | ModelKind::ExponentialMagnitudeEffect => {
                vec![m, c, alpha]
            }
            ModelKind::ModifiedRachlin => vec![
                Prior::Normal {
                    mean: -3.0,
                    std_dev: 1.5,
                },
                s,
                alpha,
            ],
            ModelKind::MyersonHyperboloid => vec![logk, s, alpha],
            ModelKind::RiskyHyperbolic => vec![logh, alpha],
            // Decision variables are proportions, so acuity is on a larger scale.
            ModelKind::ProportionalDifference => vec![
                Prior::Normal {
                    mean: 0.0,
                    std_dev: 0.5,
                },
                Prior::HalfNormal { scale: 5.0 },
            ],
            ModelKind::ProspectTheory => vec![
                Prior::Uniform {
                    low: 0.3,
                    high: 1.5,
                },
                alpha,
            ],
            ModelKind::MultiplicativeHyperbolic => vec![logk, logh, alpha],
        }
    }
}

/// A model with its priors and lapse rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    kind: ModelKind,
    priors: Vec<Prior>,
    lapse: f64,
}

impl Model {
    /// Create a model with default priors and a lapse rate of 0.01.
    pub fn new(kind: ModelKind) -> Self {
        let cfg = ModelConfig::new(kind);
        Self {
            kind,
            priors: kind.default_priors(),
            lapse: cfg.lapse,
        }
    }

    /// Create a model from its configuration, applying prior overrides.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let mut model = Self::new(cfg.kind);
        model.lapse = cfg.lapse;
        for (name, &prior) in &cfg.priors {
            let i_par = model.parameter_index(name)?;
            prior
                .validate()
                .with_context(|| format!("invalid prior for {name:?}"))?;
            model.priors[i_par] = prior;
        }
        Ok(model)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        self.kind.parameter_names()
    }

    pub fn n_params(&self) -> usize {
        self.priors.len()
    }

    pub fn priors(&self) -> &[Prior] {
        &self.priors
    }

    pub fn parameter_index(&self, name: &str) -> Result<usize> {
        let names = self.parameter_names();
        match names.iter().position(|&par_name| par_name == name) {
            Some(i_par) => Ok(i_par),
            None => bail!("{:?} has no parameter {name:?}, expected one of {names:?}", self.kind),
        }
    }

    /// Build a parameter vector from values keyed by name.
    pub fn params_from_map(&self, map: &BTreeMap<String, f64>) -> Result<Vec<f64>> {
        let mut theta = vec![f64::NAN; self.n_params()];
        for (name, &val) in map {
            theta[self.parameter_index(name)?] = val;
        }
        for (i_par, &val) in theta.iter().enumerate() {
            let name = self.parameter_names()[i_par];
            ensure!(val.is_finite(), "missing or non-finite value for {name:?}");
        }
        Ok(theta)
    }

    /// Signed advantage of prospect B over prospect A; positive favors B.
    ///
    /// May be non-finite for extreme parameters, which [`Model::response_probability`] reports.
    pub fn decision_variable(&self, theta: &[f64], design: &Design) -> f64 {
        let (a, b) = (&design.prospect_a, &design.prospect_b);
        match self.kind {
            ModelKind::ProportionalDifference => {
                let delta = theta[0];
                proportional_difference(a.reward, b.reward) + proportional_difference(a.prob, b.prob)
                    - delta
            }
            _ => self.subjective_value(theta, b) - self.subjective_value(theta, a),
        }
    }

    /// Probability of choosing prospect B, strictly inside (0, 1).
    pub fn response_probability(&self, theta: &[f64], design: &Design) -> Result<f64> {
        ensure!(
            theta.len() == self.n_params(),
            "parameter vector must have {} values, but has {}",
            self.n_params(),
            theta.len()
        );
        let alpha = theta[self.n_params() - 1];
        let z = alpha * self.decision_variable(theta, design);
        ensure!(z.is_finite(), "non-finite decision variable for {theta:?} and {design:?}");
        Ok(self.lapse + (1.0 - 2.0 * self.lapse) * standard_normal_cdf(z))
    }

    /// Draw a response (`true` if B is chosen).
    pub fn sample_response<R: Rng + ?Sized>(
        &self,
        theta: &[f64],
        design: &Design,
        rng: &mut R,
    ) -> Result<bool> {
        let prob = self.response_probability(theta, design)?;
        Ok(Bernoulli::new(prob)?.sample(rng))
    }

    /// Draw a parameter vector from the priors.
    pub fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        self.priors.iter().map(|prior| prior.sample(rng)).collect()
    }

    /// Draw a plausible ground truth for simulated participants.
    pub fn generate_faux_true_params<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        let theta = self.sample_prior(rng)?;
        log::info!("faux true parameters: {:?}", self.named(&theta));
        Ok(theta)
    }

    /// Pair each value with its parameter name.
    pub fn named(&self, theta: &[f64]) -> Vec<(&'static str, f64)> {
        self.parameter_names()
            .iter()
            .copied()
            .zip(theta.iter().copied())
            .collect()
    }

    fn subjective_value(&self, theta: &[f64], prospect: &Prospect) -> f64 {
        let Prospect {
            reward,
            delay,
            prob,
        } = *prospect;
        if reward == 0.0 {
            return 0.0;
        }
        let discount = match self.kind {
            ModelKind::DelayedHyperbolic => hyperbolic(theta[0].exp(), delay),
            ModelKind::DelayedExponential => exponential(theta[0].exp(), delay),
            ModelKind::HyperbolicMagnitudeEffect => {
                hyperbolic(magnitude_rate(theta[0], theta[1], reward), delay)
            }
            ModelKind::ExponentialMagnitudeEffect => {
                exponential(magnitude_rate(theta[0], theta[1], reward), delay)
            }
            ModelKind::ModifiedRachlin => {
                if delay == 0.0 {
                    1.0
                } else {
                    1.0 / (1.0 + (theta[0].exp() * delay).powf(theta[1]))
                }
            }
            ModelKind::MyersonHyperboloid => {
                if delay == 0.0 {
                    1.0
                } else {
                    (1.0 + theta[0].exp() * delay).powf(-theta[1])
                }
            }
            ModelKind::RiskyHyperbolic => hyperbolic(theta[0].exp(), odds_against(prob)),
            ModelKind::ProspectTheory => probability_weight(prob, theta[0]),
            ModelKind::MultiplicativeHyperbolic => {
                hyperbolic(theta[0].exp(), delay) * hyperbolic(theta[1].exp(), odds_against(prob))
            }
            // Scored on proportional differences, never on values.
            ModelKind::ProportionalDifference => f64::NAN,
        };
        reward * discount
    }
}

fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

fn hyperbolic(rate: f64, x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    1.0 / (1.0 + rate * x)
}

fn exponential(rate: f64, x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    (-rate * x).exp()
}

/// Discount rate that decreases with reward magnitude: `ln k = m ln R + c`.
fn magnitude_rate(m: f64, c: f64, reward: f64) -> f64 {
    (m * reward.ln() + c).exp()
}

fn odds_against(prob: f64) -> f64 {
    if prob <= 0.0 {
        return f64::INFINITY;
    }
    (1.0 - prob) / prob
}

/// Tversky-Kahneman probability weighting.
fn probability_weight(prob: f64, gamma: f64) -> f64 {
    if prob <= 0.0 {
        return 0.0;
    }
    if prob >= 1.0 {
        return 1.0;
    }
    let p_gamma = prob.powf(gamma);
    let q_gamma = (1.0 - prob).powf(gamma);
    p_gamma / (p_gamma + q_gamma).powf(1.0 / gamma)
}

fn proportional_difference(val_a: f64, val_b: f64) -> f64 {
    let max = val_a.max(val_b);
    if max <= 0.0 {
        return 0.0;
    }
    (val_b - val_a) / max
}
