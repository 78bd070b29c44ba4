//! Sequential trial controller.
//!
//! Alternates design selection and belief updates, one design in flight at a time:
//!
//! ```text
//! Ready --get_next_design--> AwaitingResponse --response--> Ready | Terminated
//!   \--pool exhausted--> Terminated
//! ```

use crate::belief::ParticleBelief;
use crate::config::{BeliefConfig, DesignConfig};
use crate::design::{Design, generate_all_possible_designs, refine_design_space};
use crate::model::Model;
use crate::optimizer::select_next_design;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Status {
    /// Ready to issue the next design.
    Ready,
    /// A design was issued and its response has not been entered yet.
    AwaitingResponse(Design),
    /// No more designs will be issued.
    Terminated,
}

/// Bayesian adaptive design controller of a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    model: Model,
    belief: ParticleBelief,
    belief_cfg: BeliefConfig,
    design_cfg: DesignConfig,
    pool: Vec<Design>,
    seed: u64,
    rng: ChaCha12Rng,
    status: Status,
    /// A response was entered since the last design was issued.
    response_entered: bool,
}

impl Controller {
    /// Initialize the belief from the priors and generate the design pool.
    pub fn new(
        model: Model,
        belief_cfg: BeliefConfig,
        design_cfg: DesignConfig,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);

        let belief = ParticleBelief::initialize(&model, belief_cfg.n_particles, &mut rng)
            .context("failed to initialize belief")?;

        let pool =
            generate_all_possible_designs(&design_cfg).context("failed to generate designs")?;

        Ok(Self {
            model,
            belief,
            belief_cfg,
            design_cfg,
            pool,
            seed,
            rng,
            status: Status::Ready,
            response_entered: false,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn belief(&self) -> &ParticleBelief {
        &self.belief
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == Status::Terminated
    }

    /// Number of completed trials.
    pub fn n_trials(&self) -> usize {
        self.belief.trials().len()
    }

    /// Issue the next design, or `None` once the session is over.
    ///
    /// If a design is in flight, `last_response` is entered for it first and
    /// is required. Otherwise `last_response` must be `None`, or repeat the
    /// response just entered with [`Controller::enter_trial_design_and_response`].
    pub fn get_next_design(&mut self, last_response: Option<bool>) -> Result<Option<Design>> {
        match (self.status, last_response) {
            (Status::AwaitingResponse(design), None) => {
                bail!("no response was given for the design in flight {design:?}")
            }
            (Status::AwaitingResponse(design), Some(chose_b)) => {
                self.enter_trial_design_and_response(design, chose_b)?;
            }
            (_, Some(chose_b)) => {
                let entered = self.belief.trials().last().map(|trial| trial.chose_b);
                if !self.response_entered || entered != Some(chose_b) {
                    bail!("response {chose_b} given, but no design is in flight");
                }
            }
            (_, None) => {}
        }

        if self.status == Status::Terminated {
            return Ok(None);
        }

        let trial_index = self.n_trials();
        let candidates = refine_design_space(
            &self.pool,
            &self.belief,
            &self.model,
            trial_index,
            &self.design_cfg,
            self.seed,
        );
        let Some(scored) = select_next_design(&candidates, &self.belief, &self.model) else {
            log::info!("design space exhausted after {trial_index} trials");
            self.status = Status::Terminated;
            return Ok(None);
        };
        log::debug!(
            "trial {trial_index}: {:?} (information gain {:.4})",
            scored.design,
            scored.info_gain
        );

        self.status = Status::AwaitingResponse(scored.design);
        self.response_entered = false;
        Ok(Some(scored.design))
    }

    /// Enter the response to the design in flight and update the belief.
    ///
    /// Fails if `design` is not the design in flight.
    pub fn enter_trial_design_and_response(&mut self, design: Design, chose_b: bool) -> Result<()> {
        match self.status {
            Status::AwaitingResponse(issued) if issued == design => {}
            Status::AwaitingResponse(issued) => {
                bail!("response entered for {design:?}, but the design in flight is {issued:?}")
            }
            Status::Ready => bail!("response entered for {design:?}, but no design is in flight"),
            Status::Terminated => bail!("response entered for {design:?} after termination"),
        }

        self.belief
            .update(&self.model, &design, chose_b)
            .context("failed to update belief")?;
        self.belief
            .resample_if_needed(
                &self.model,
                self.belief_cfg.ess_threshold,
                self.belief_cfg.jitter_scale,
                &mut self.rng,
            )
            .context("failed to resample belief")?;
        self.response_entered = true;

        self.status = if self.n_trials() >= self.design_cfg.max_trials {
            log::info!("reached {} trials", self.n_trials());
            Status::Terminated
        } else {
            Status::Ready
        };
        Ok(())
    }
}
