use crate::model::ModelKind;
use crate::prior::Prior;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Session configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seed of every random stream in a session (drawn from the OS if absent).
    #[serde(default)]
    pub seed: Option<u64>,

    pub model: ModelConfig,
    #[serde(default)]
    pub belief: BeliefConfig,
    #[serde(default)]
    pub design: DesignConfig,
    #[serde(default)]
    pub participant: ParticipantConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Discounting model and its priors.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: ModelKind,

    /// Probability of responding at random on any trial.
    #[serde(default = "default_lapse")]
    pub lapse: f64,

    /// Prior overrides keyed by parameter name.
    #[serde(default)]
    pub priors: BTreeMap<String, Prior>,
}

fn default_lapse() -> f64 {
    0.01
}

/// Particle belief parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefConfig {
    /// Number of particles.
    pub n_particles: usize,
    /// Resample when the effective sample size drops below this fraction of particles.
    pub ess_threshold: f64,
    /// Jitter standard deviation after resampling, relative to the posterior standard deviation.
    pub jitter_scale: f64,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        Self {
            n_particles: 1000,
            ess_threshold: 0.5,
            jitter_scale: 0.1,
        }
    }
}

/// Design space grids and per-trial refinement.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Maximum number of trials in a session.
    pub max_trials: usize,

    /// Explicit rewards of prospect A. Takes precedence over `reward_ratio`.
    pub reward_a: Vec<f64>,
    /// Rewards of prospect A as fractions of the reward of prospect B.
    pub reward_ratio: Vec<f64>,
    pub delay_a: Vec<f64>,
    pub prob_a: Vec<f64>,

    pub reward_b: Vec<f64>,
    pub delay_b: Vec<f64>,
    pub prob_b: Vec<f64>,

    /// Maximum number of designs scored on a single trial.
    pub max_candidates: usize,
    /// Lower bound of the predictive probability of choosing B for a useful design.
    pub min_predictive: f64,
    /// Upper bound of the predictive probability of choosing B for a useful design.
    pub max_predictive: f64,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            max_trials: 20,
            reward_a: Vec::new(),
            reward_ratio: (1..20).map(|i| i as f64 * 0.05).collect(),
            delay_a: vec![0.0],
            prob_a: vec![1.0],
            reward_b: vec![100.0],
            delay_b: vec![
                1.0, 2.0, 3.0, 5.0, 7.0, 10.0, 14.0, 21.0, 30.0, 45.0, 60.0, 90.0, 120.0, 180.0,
                270.0, 365.0,
            ],
            prob_b: vec![1.0],
            max_candidates: 64,
            min_predictive: 0.05,
            max_predictive: 0.95,
        }
    }
}

/// Simulated participant.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// True parameter values keyed by name (drawn from the priors if empty).
    pub true_params: BTreeMap<String, f64>,
}

/// Output parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Number of trials run and written per trial file.
    pub trials_per_file: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            trials_per_file: 10,
        }
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    /// Whether both configurations agree on everything but the seed,
    /// which only matters when a session is created.
    pub fn same_session_settings(&self, other: &Config) -> bool {
        let other = Config {
            seed: self.seed,
            ..other.clone()
        };
        *self == other
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model")?;
        self.belief.validate().context("invalid belief")?;
        self.design.validate().context("invalid design")?;
        self.output.validate().context("invalid output")?;
        Ok(())
    }
}

impl ModelConfig {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            lapse: default_lapse(),
            priors: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        // Strictly positive so that response probabilities never reach 0 or 1.
        check_num(self.lapse, 1e-6..0.5).context("invalid lapse rate")?;

        let names = self.kind.parameter_names();
        for (name, prior) in &self.priors {
            if !names.contains(&name.as_str()) {
                bail!("{:?} has no parameter {name:?}, expected one of {names:?}", self.kind);
            }
            prior
                .validate()
                .with_context(|| format!("invalid prior for {name:?}"))?;
        }
        Ok(())
    }
}

impl BeliefConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.n_particles, 1..1_000_000).context("invalid number of particles")?;
        check_num(self.ess_threshold, 0.0..=1.0).context("invalid resampling threshold")?;
        check_num(self.jitter_scale, 0.0..1.0).context("invalid jitter scale")?;
        Ok(())
    }
}

impl DesignConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.max_trials, 1..10_000).context("invalid maximum number of trials")?;

        if self.reward_a.is_empty() {
            check_grid(&self.reward_ratio, 0.0..=1.0).context("invalid reward ratios")?;
        } else {
            check_grid(&self.reward_a, 0.0..f64::INFINITY).context("invalid rewards of A")?;
        }
        check_grid(&self.delay_a, 0.0..f64::INFINITY).context("invalid delays of A")?;
        check_grid(&self.prob_a, 0.0..=1.0).context("invalid probabilities of A")?;

        check_grid(&self.reward_b, 0.0..f64::INFINITY).context("invalid rewards of B")?;
        check_grid(&self.delay_b, 0.0..f64::INFINITY).context("invalid delays of B")?;
        check_grid(&self.prob_b, 0.0..=1.0).context("invalid probabilities of B")?;

        check_num(self.max_candidates, 1..100_000).context("invalid maximum number of candidates")?;
        check_num(self.min_predictive, 0.0..0.5).context("invalid minimum predictive probability")?;
        check_num(self.max_predictive, 0.5..=1.0).context("invalid maximum predictive probability")?;
        Ok(())
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.trials_per_file, 1..10_000).context("invalid number of trials per file")?;
        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_grid<R>(grid: &[f64], range: R) -> Result<()>
where
    R: RangeBounds<f64> + Debug + Clone,
{
    if grid.is_empty() {
        bail!("grid must have at least one value");
    }
    for (i_val, &val) in grid.iter().enumerate() {
        check_num(val, range.clone()).with_context(|| format!("invalid value {i_val}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_toml("[model]\nkind = \"delayed_hyperbolic\"\n").unwrap();
        assert_eq!(cfg.model.kind, ModelKind::DelayedHyperbolic);
        assert_eq!(cfg.model.lapse, 0.01);
        assert_eq!(cfg.belief, BeliefConfig::default());
        assert_eq!(cfg.design, DesignConfig::default());
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn full_config_is_parsed() {
        let contents = r#"
seed = 7

[model]
kind = "multiplicative_hyperbolic"
lapse = 0.02
priors.logk = { dist = "normal", mean = -3.0, std_dev = 0.5 }

[belief]
n_particles = 250

[design]
max_trials = 12
delay_b = [7.0, 30.0, 90.0]
prob_b = [0.5, 0.9]

[participant]
true_params = { logk = -3.0, logh = 0.2, alpha = 1.5 }

[output]
trials_per_file = 4
"#;
        let cfg = Config::from_toml(contents).unwrap();
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(
            cfg.model.priors["logk"],
            Prior::Normal {
                mean: -3.0,
                std_dev: 0.5
            }
        );
        assert_eq!(cfg.belief.n_particles, 250);
        assert_eq!(cfg.belief.ess_threshold, 0.5);
        assert_eq!(cfg.design.prob_b, vec![0.5, 0.9]);
        assert_eq!(cfg.participant.true_params.len(), 3);
        assert_eq!(cfg.output.trials_per_file, 4);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let base = "[model]\nkind = \"delayed_hyperbolic\"\n";
        assert!(Config::from_toml(&format!("{base}[belief]\nn_particles = 0\n")).is_err());
        assert!(Config::from_toml(&format!("{base}[design]\ndelay_b = []\n")).is_err());
        assert!(Config::from_toml(&format!("{base}[design]\nprob_b = [1.5]\n")).is_err());
        assert!(
            Config::from_toml(&format!(
                "{base}priors.k = {{ dist = \"half_normal\", scale = 1.0 }}\n"
            ))
            .is_err()
        );
        assert!(
            Config::from_toml(&format!(
                "{base}priors.alpha = {{ dist = \"half_normal\", scale = -1.0 }}\n"
            ))
            .is_err()
        );
        assert!(Config::from_toml("[model]\nkind = \"hyperbolic_cosine\"\n").is_err());
    }

    #[test]
    fn session_settings_ignore_the_seed() {
        let cfg = Config::from_toml("seed = 3\n[model]\nkind = \"delayed_hyperbolic\"\n").unwrap();
        let reseeded = Config {
            seed: Some(11),
            ..cfg.clone()
        };
        assert!(cfg.same_session_settings(&reseeded));
        assert!(reseeded.same_session_settings(&Config { seed: None, ..cfg.clone() }));

        let mut changed = reseeded.clone();
        changed.design.max_trials += 1;
        assert!(!cfg.same_session_settings(&changed));
        changed = reseeded;
        changed.model.lapse = 0.05;
        assert!(!changed.same_session_settings(&cfg));
    }
}
