//! Choice designs and the candidate design space.

use crate::belief::ParticleBelief;
use crate::config::DesignConfig;
use crate::model::Model;
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

/// Minimum size of a generated design pool.
pub const MIN_POOL_SIZE: usize = 10;

/// Offset of the random streams used to subsample candidates, one per trial.
const REFINE_STREAM_BASE: u64 = 1 << 32;

/// A single outcome option.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    pub reward: f64,
    /// Delay in days (0 is immediate).
    pub delay: f64,
    pub prob: f64,
}

impl Prospect {
    pub fn new(reward: f64, delay: f64, prob: f64) -> Self {
        Self {
            reward,
            delay,
            prob,
        }
    }
}

/// The pair of prospects offered on a trial.
///
/// A is conventionally the smaller-sooner or certain option, but nothing relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Design {
    pub prospect_a: Prospect,
    pub prospect_b: Prospect,
}

impl Design {
    pub fn new(prospect_a: Prospect, prospect_b: Prospect) -> Self {
        Self {
            prospect_a,
            prospect_b,
        }
    }

    /// Both prospects are identical.
    pub fn is_degenerate(&self) -> bool {
        self.prospect_a == self.prospect_b
    }

    /// Prospect A is at least as large, as soon and as probable as prospect B.
    pub fn a_dominates_b(&self) -> bool {
        let (a, b) = (&self.prospect_a, &self.prospect_b);
        a.reward >= b.reward && a.delay <= b.delay && a.prob >= b.prob
    }
}

/// A completed trial: the design presented and whether prospect B was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub design: Design,
    pub chose_b: bool,
}

/// Expand the configured grids into the full pool of candidate designs.
///
/// Degenerate designs and designs where A dominates B are dropped.
pub fn generate_all_possible_designs(cfg: &DesignConfig) -> Result<Vec<Design>> {
    let mut pool = Vec::new();
    for &reward_b in &cfg.reward_b {
        let rewards_a: Vec<f64> = if cfg.reward_a.is_empty() {
            cfg.reward_ratio.iter().map(|ratio| ratio * reward_b).collect()
        } else {
            cfg.reward_a.clone()
        };
        for &delay_b in &cfg.delay_b {
            for &prob_b in &cfg.prob_b {
                let prospect_b = Prospect::new(reward_b, delay_b, prob_b);
                for &reward_a in &rewards_a {
                    for &delay_a in &cfg.delay_a {
                        for &prob_a in &cfg.prob_a {
                            let prospect_a = Prospect::new(reward_a, delay_a, prob_a);
                            let design = Design::new(prospect_a, prospect_b);
                            if !design.is_degenerate() && !design.a_dominates_b() {
                                pool.push(design);
                            }
                        }
                    }
                }
            }
        }
    }

    let n_designs = pool.len();
    if n_designs < MIN_POOL_SIZE {
        bail!("design pool must have at least {MIN_POOL_SIZE} designs, but has {n_designs}");
    }
    log::info!("generated {n_designs} designs");

    Ok(pool)
}

/// Narrow the pool to the candidates scored on trial `trial_index`.
///
/// Designs already presented are dropped, as are designs whose predictive
/// probability of choosing B lies outside the configured band (unless that
/// would leave nothing). The remainder is subsampled to `max_candidates`
/// with a random stream derived from `seed` and `trial_index`, keeping pool
/// order. Returns an empty vector only when every design has been presented.
pub fn refine_design_space(
    pool: &[Design],
    belief: &ParticleBelief,
    model: &Model,
    trial_index: usize,
    cfg: &DesignConfig,
    seed: u64,
) -> Vec<Design> {
    let remaining: Vec<Design> = pool
        .iter()
        .filter(|design| !design.is_degenerate())
        .filter(|design| !belief.trials().iter().any(|trial| trial.design == **design))
        .copied()
        .collect();

    let useful: Vec<Design> = remaining
        .iter()
        .filter(|design| match belief.predictive_probability(model, design) {
            Ok(prob) => (cfg.min_predictive..=cfg.max_predictive).contains(&prob),
            Err(error) => {
                log::debug!("skipping design: {error:#}");
                false
            }
        })
        .copied()
        .collect();

    let candidates = if useful.is_empty() {
        log::debug!("no design in the predictive band, keeping {}", remaining.len());
        remaining
    } else {
        useful
    };

    if candidates.len() <= cfg.max_candidates {
        return candidates;
    }

    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    rng.set_stream(REFINE_STREAM_BASE + trial_index as u64);
    let mut i_kept = rand::seq::index::sample(&mut rng, candidates.len(), cfg.max_candidates)
        .into_vec();
    i_kept.sort_unstable();
    i_kept.into_iter().map(|i_design| candidates[i_design]).collect()
}
