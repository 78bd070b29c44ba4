use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Manages the simulated sessions of a simulation directory.
///
/// Each session is a `run-NNNN` directory holding its checkpoint,
/// its `trials-NNNN.msgpack` files, and its analysis results.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Start a new session and run its first trials.
    ///
    /// `seed` overrides the configured seed of this session only.
    pub fn create_run(&self, seed: Option<u64>) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let mut cfg = self.cfg.clone();
        if seed.is_some() {
            cfg.seed = seed;
        }
        let mut engine = Engine::new(cfg).context("failed to construct engine")?;

        self.continue_run(run_idx, 0, &mut engine)
    }

    /// Load the checkpoint of a session and run its next trials.
    pub fn resume_run(&self, run_idx: usize) -> Result<()> {
        let file_idx = self
            .count_trials_files(run_idx)
            .context("failed to count trials files")?;

        let checkpoint_file = self.checkpoint_file(run_idx);
        let mut engine = Engine::load_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to load {checkpoint_file:?}"))?;
        if !engine.cfg().same_session_settings(&self.cfg) {
            bail!("checkpoint config differs from the current config");
        }
        log::info!("loaded {checkpoint_file:?}");

        if engine.controller().is_terminated() {
            log::info!(
                "run {run_idx} already terminated after {} trials",
                engine.controller().n_trials()
            );
            return Ok(());
        }

        self.continue_run(run_idx, file_idx, &mut engine)
    }

    fn continue_run(&self, run_idx: usize, file_idx: usize, engine: &mut Engine) -> Result<()> {
        let n_trials = engine
            .perform_session(self.trials_file(run_idx, file_idx))
            .context("failed to perform session")?;
        log::info!(
            "ran {n_trials} trials ({} in total)",
            engine.controller().n_trials()
        );

        engine
            .save_checkpoint(self.checkpoint_file(run_idx))
            .context("failed to save checkpoint")?;

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let mut analyzer = Analyzer::new();

            let n_files = self
                .count_trials_files(run_idx)
                .context("failed to count trials files")?;
            for file_idx in 0..n_files {
                analyzer
                    .add_file(self.trials_file(run_idx, file_idx))
                    .context("failed to add file")?;
            }

            let checkpoint_file = self.checkpoint_file(run_idx);
            let engine = Engine::load_checkpoint(&checkpoint_file)
                .with_context(|| format!("failed to load {checkpoint_file:?}"))?;

            let results_file = self.results_file(run_idx);
            analyzer
                .save_results(&results_file, &engine)
                .context("failed to save results")?;
            log::info!("saved {results_file:?}");
        }

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        for run_dir in glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
        {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        Ok(())
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .count();
        Ok(count)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn count_trials_files(&self, run_idx: usize) -> Result<usize> {
        let pattern = self.run_dir(run_idx).join("trials-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob trials files")?
            .filter_map(Result::ok)
            .count();
        Ok(count)
    }

    fn checkpoint_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("checkpoint.msgpack")
    }

    fn trials_file(&self, run_idx: usize, file_idx: usize) -> PathBuf {
        self.run_dir(run_idx)
            .join(format!("trials-{file_idx:04}.msgpack"))
    }

    fn results_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("results.toml")
    }
}
