use crate::design::Trial;
use crate::engine::{Engine, read_trials};
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use serde::Serialize;
use std::{fs, path::Path};

pub trait Obs {
    fn update(&mut self, trial: &Trial);
    fn report(&self) -> Result<toml::Table>;
}

/// Accumulates one numeric feature of every trial.
pub struct TrialFeature {
    name: &'static str,
    feature: fn(&Trial) -> Option<f64>,
    acc: Accumulator,
}

impl TrialFeature {
    pub fn new(name: &'static str, feature: fn(&Trial) -> Option<f64>) -> Self {
        Self {
            name,
            feature,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for TrialFeature {
    fn update(&mut self, trial: &Trial) {
        if let Some(val) = (self.feature)(trial) {
            self.acc.add(val);
        }
    }

    fn report(&self) -> Result<toml::Table> {
        let mut table = toml::Table::new();
        table.insert(self.name.to_string(), toml::Value::try_from(self.acc.report())?);
        Ok(table)
    }
}

/// Fraction of consecutive trials on which the response switched.
///
/// Adaptive designs hover around indifference, so this approaches one half.
pub struct SwitchRate {
    last_response: Option<bool>,
    acc: Accumulator,
}

impl SwitchRate {
    pub fn new() -> Self {
        Self {
            last_response: None,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for SwitchRate {
    fn update(&mut self, trial: &Trial) {
        if let Some(last_response) = self.last_response {
            self.acc.add(if last_response != trial.chose_b { 1.0 } else { 0.0 });
        }
        self.last_response = Some(trial.chose_b);
    }

    fn report(&self) -> Result<toml::Table> {
        let mut table = toml::Table::new();
        table.insert("switch_rate".to_string(), toml::Value::try_from(self.acc.report())?);
        Ok(table)
    }
}

/// Posterior estimate of one parameter against its true value.
#[derive(Debug, Serialize)]
struct ParamReport {
    name: String,
    true_value: f64,
    mean: f64,
    std_dev: f64,
    abs_error: f64,
}

#[derive(Debug, Serialize)]
struct Results {
    n_trials: usize,
    terminated: bool,
    effective_sample_size: f64,
    observables: toml::Table,
    posterior: Vec<ParamReport>,
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(TrialFeature::new("prob_chose_b", |trial| {
                Some(if trial.chose_b { 1.0 } else { 0.0 })
            })),
            Box::new(TrialFeature::new("reward_ratio", |trial| {
                let design = &trial.design;
                (design.prospect_b.reward > 0.0)
                    .then(|| design.prospect_a.reward / design.prospect_b.reward)
            })),
            Box::new(TrialFeature::new("delay_b", |trial| {
                Some(trial.design.prospect_b.delay)
            })),
            Box::new(TrialFeature::new("prob_b", |trial| {
                Some(trial.design.prospect_b.prob)
            })),
            Box::new(SwitchRate::new()),
        ];
        Self { obs_ptr_vec }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let trials = read_trials(file).context("failed to read trials")?;
        for trial in &trials {
            for obs in &mut self.obs_ptr_vec {
                obs.update(trial);
            }
        }
        Ok(())
    }

    /// Save observables and the posterior of a session, compared to the truth.
    pub fn save_results<P: AsRef<Path>>(&self, file: P, engine: &Engine) -> Result<()> {
        let file = file.as_ref();

        let mut observables = toml::Table::new();
        for obs in &self.obs_ptr_vec {
            observables.extend(obs.report().context("failed to report observable")?);
        }

        let controller = engine.controller();
        let belief = controller.belief();
        let posterior = belief
            .posterior_summary(controller.model())
            .into_iter()
            .zip(engine.participant().theta_true())
            .map(|(summary, &true_value)| ParamReport {
                abs_error: (summary.mean - true_value).abs(),
                name: summary.name,
                true_value,
                mean: summary.mean,
                std_dev: summary.std_dev,
            })
            .collect();

        let results = Results {
            n_trials: controller.n_trials(),
            terminated: controller.is_terminated(),
            effective_sample_size: belief.effective_sample_size(),
            observables,
            posterior,
        };

        let contents = toml::to_string_pretty(&results).context("failed to serialize results")?;
        fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Design, Prospect};

    fn trial(reward_a: f64, chose_b: bool) -> Trial {
        Trial {
            design: Design::new(
                Prospect::new(reward_a, 0.0, 1.0),
                Prospect::new(100.0, 30.0, 1.0),
            ),
            chose_b,
        }
    }

    #[test]
    fn observables_summarize_trials() {
        let trials = [
            trial(20.0, true),
            trial(60.0, false),
            trial(40.0, false),
            trial(50.0, true),
        ];

        let mut chose_b = TrialFeature::new("prob_chose_b", |trial| {
            Some(if trial.chose_b { 1.0 } else { 0.0 })
        });
        let mut switch_rate = SwitchRate::new();
        for trial in &trials {
            chose_b.update(trial);
            switch_rate.update(trial);
        }

        let report = chose_b.report().unwrap();
        assert_eq!(report["prob_chose_b"]["mean"].as_float(), Some(0.5));
        assert_eq!(report["prob_chose_b"]["n_vals"].as_integer(), Some(4));

        let report = switch_rate.report().unwrap();
        let mean = report["switch_rate"]["mean"].as_float().unwrap();
        assert!((mean - 2.0 / 3.0).abs() < 1e-12);
    }
}
