//! Prior distributions over model parameters.

use crate::config::check_num;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::{LogNormal, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Prior distribution of a single model parameter.
///
/// Written in TOML as an inline table tagged by `dist`, for example
/// `{ dist = "normal", mean = -4.5, std_dev = 1.0 }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum Prior {
    Normal { mean: f64, std_dev: f64 },
    /// Absolute value of a zero-mean normal.
    HalfNormal { scale: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Uniform { low: f64, high: f64 },
}

impl Prior {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Prior::Normal { mean, std_dev } => {
                check_num(mean, -1e6..1e6).context("invalid mean")?;
                check_num(std_dev, 1e-12..1e6).context("invalid standard deviation")?;
            }
            Prior::HalfNormal { scale } => {
                check_num(scale, 1e-12..1e6).context("invalid scale")?;
            }
            Prior::LogNormal { mu, sigma } => {
                check_num(mu, -100.0..100.0).context("invalid log-mean")?;
                check_num(sigma, 1e-12..100.0).context("invalid log-standard deviation")?;
            }
            Prior::Uniform { low, high } => {
                check_num(low, -1e6..1e6).context("invalid lower bound")?;
                check_num(high, -1e6..1e6).context("invalid upper bound")?;
                if low >= high {
                    bail!("lower bound {low} must be below upper bound {high}");
                }
            }
        }
        Ok(())
    }

    /// Draw one value from the prior.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        let val = match *self {
            Prior::Normal { mean, std_dev } => Normal::new(mean, std_dev)?.sample(rng),
            Prior::HalfNormal { scale } => Normal::new(0.0, scale)?.sample(rng).abs(),
            Prior::LogNormal { mu, sigma } => LogNormal::new(mu, sigma)?.sample(rng),
            Prior::Uniform { low, high } => Uniform::new(low, high)?.sample(rng),
        };
        Ok(val)
    }

    /// Whether the prior assigns positive density to `val`.
    pub fn in_support(&self, val: f64) -> bool {
        if !val.is_finite() {
            return false;
        }
        match *self {
            Prior::Normal { .. } => true,
            Prior::HalfNormal { .. } => val >= 0.0,
            Prior::LogNormal { .. } => val > 0.0,
            Prior::Uniform { low, high } => (low..high).contains(&val),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn samples_lie_in_support() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let priors = [
            Prior::Normal {
                mean: -4.5,
                std_dev: 1.0,
            },
            Prior::HalfNormal { scale: 2.0 },
            Prior::LogNormal {
                mu: 0.0,
                sigma: 0.5,
            },
            Prior::Uniform {
                low: 0.3,
                high: 1.5,
            },
        ];
        for prior in priors {
            prior.validate().unwrap();
            for _ in 0..1000 {
                let val = prior.sample(&mut rng).unwrap();
                assert!(prior.in_support(val), "{val} outside support of {prior:?}");
            }
        }
    }

    #[test]
    fn support_excludes_boundaries() {
        let half = Prior::HalfNormal { scale: 1.0 };
        assert!(half.in_support(0.0));
        assert!(!half.in_support(-0.1));
        assert!(!half.in_support(f64::NAN));

        let uniform = Prior::Uniform {
            low: 0.0,
            high: 1.0,
        };
        assert!(!uniform.in_support(1.0));
        assert!(!uniform.in_support(-1e-9));

        let log_normal = Prior::LogNormal {
            mu: 0.0,
            sigma: 1.0,
        };
        assert!(!log_normal.in_support(0.0));
    }

    #[test]
    fn invalid_priors_are_rejected() {
        assert!(
            Prior::Normal {
                mean: 0.0,
                std_dev: 0.0
            }
            .validate()
            .is_err()
        );
        assert!(
            Prior::Uniform {
                low: 1.0,
                high: 1.0
            }
            .validate()
            .is_err()
        );
    }
}
