use crate::config::ParticipantConfig;
use crate::design::Design;
use crate::model::Model;
use anyhow::{Context, Result};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

/// Participant answering designs according to a model with known parameters.
///
/// Stands in for a real participant when simulating sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedParticipant {
    model: Model,
    theta_true: Vec<f64>,
    rng: ChaCha12Rng,
}

impl SimulatedParticipant {
    /// Create a participant with the configured true parameters,
    /// or with faux ones drawn from the priors if none are configured.
    pub fn new(model: Model, cfg: &ParticipantConfig, mut rng: ChaCha12Rng) -> Result<Self> {
        let theta_true = if cfg.true_params.is_empty() {
            model
                .generate_faux_true_params(&mut rng)
                .context("failed to generate faux true parameters")?
        } else {
            model
                .params_from_map(&cfg.true_params)
                .context("invalid true parameters")?
        };
        Ok(Self {
            model,
            theta_true,
            rng,
        })
    }

    pub fn theta_true(&self) -> &[f64] {
        &self.theta_true
    }

    /// Respond to a design (`true` if B is chosen).
    pub fn respond(&mut self, design: &Design) -> Result<bool> {
        self.model
            .sample_response(&self.theta_true, design, &mut self.rng)
            .with_context(|| format!("failed to respond to {design:?}"))
    }
}
