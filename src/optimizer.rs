//! One-step-ahead design optimization.

use crate::belief::ParticleBelief;
use crate::design::Design;
use crate::model::Model;
use anyhow::Result;

/// Scores closer than this are ties, resolved in favor of the earlier design.
const TIE_TOL: f64 = 1e-12;

/// A design and its expected information gain in nats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDesign {
    pub design: Design,
    pub info_gain: f64,
}

/// Pick the candidate with the largest expected information gain.
///
/// Candidates that some particle fails to evaluate are excluded.
/// Returns `None` if no candidate can be scored.
pub fn select_next_design(
    candidates: &[Design],
    belief: &ParticleBelief,
    model: &Model,
) -> Option<ScoredDesign> {
    let mut best: Option<ScoredDesign> = None;
    for design in candidates {
        let info_gain = match expected_information_gain(design, belief, model) {
            Ok(info_gain) => info_gain,
            Err(error) => {
                log::debug!("excluding design: {error:#}");
                continue;
            }
        };
        if best.is_none_or(|best| info_gain > best.info_gain + TIE_TOL) {
            best = Some(ScoredDesign {
                design: *design,
                info_gain,
            });
        }
    }
    best
}

/// Mutual information between the response to `design` and the parameters.
///
/// Estimated over the particle set as the entropy of the predictive response
/// minus the expected entropy of the response given the parameters.
pub fn expected_information_gain(
    design: &Design,
    belief: &ParticleBelief,
    model: &Model,
) -> Result<f64> {
    let mut predictive = 0.0;
    let mut cond_entropy = 0.0;
    for (theta, weight) in belief.particles() {
        let prob = model.response_probability(theta, design)?;
        predictive += weight * prob;
        cond_entropy += weight * binary_entropy(prob);
    }
    Ok((binary_entropy(predictive) - cond_entropy).max(0.0))
}

fn binary_entropy(prob: f64) -> f64 {
    if prob <= 0.0 || prob >= 1.0 {
        return 0.0;
    }
    -prob * prob.ln() - (1.0 - prob) * (1.0 - prob).ln()
}
