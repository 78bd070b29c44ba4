use crate::config::Config;
use crate::controller::Controller;
use crate::design::Trial;
use crate::model::Model;
use crate::participant::SimulatedParticipant;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Random stream of the simulated participant, apart from the controller's.
const PARTICIPANT_STREAM: u64 = u64::MAX;

/// Session engine.
///
/// Holds the configuration, the controller and the simulated participant,
/// and provides methods to run, save, and load sessions.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    controller: Controller,
    participant: SimulatedParticipant,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a fresh session.
    pub fn new(cfg: Config) -> Result<Self> {
        let seed = match cfg.seed {
            Some(seed) => seed,
            None => ChaCha12Rng::try_from_os_rng()?.random(),
        };
        let model = Model::from_config(&cfg.model).context("failed to construct model")?;
        log::info!("{:?} session with seed {seed}", model.kind());

        let mut participant_rng = ChaCha12Rng::seed_from_u64(seed);
        participant_rng.set_stream(PARTICIPANT_STREAM);
        let participant =
            SimulatedParticipant::new(model.clone(), &cfg.participant, participant_rng)
                .context("failed to construct participant")?;

        let controller = Controller::new(model, cfg.belief.clone(), cfg.design.clone(), seed)
            .context("failed to construct controller")?;

        Ok(Self {
            cfg,
            controller,
            participant,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn participant(&self) -> &SimulatedParticipant {
        &self.participant
    }

    /// Run the next trials of the session and save them to a binary file.
    ///
    /// Stops after `trials_per_file` trials or when the session terminates.
    /// Returns the number of trials run. No file is written for a session
    /// that has already terminated.
    pub fn perform_session<P: AsRef<Path>>(&mut self, file: P) -> Result<usize> {
        if self.controller.is_terminated() {
            log::info!("session already terminated");
            return Ok(0);
        }

        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let trials_per_file = self.cfg.output.trials_per_file;
        let mut trials = Vec::with_capacity(trials_per_file);

        for i_trial in 0..trials_per_file {
            let Some(design) = self
                .controller
                .get_next_design(None)
                .context("failed to get next design")?
            else {
                break;
            };

            let chose_b = self.participant.respond(&design)?;
            self.controller
                .enter_trial_design_and_response(design, chose_b)
                .context("failed to enter response")?;
            trials.push(Trial { design, chose_b });

            let progress = 100.0 * (i_trial + 1) as f64 / trials_per_file as f64;
            log::info!("completed {progress:06.2}%");
        }

        let controller = &self.controller;
        let posterior_mean = controller.belief().posterior_mean();
        log::info!("posterior mean {:?}", controller.model().named(&posterior_mean));

        encode::write(&mut writer, &trials).context("failed to serialize trials")?;
        writer.flush().context("failed to flush writer stream")?;

        Ok(trials.len())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the session later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}

/// Read the trials saved by [`Engine::perform_session`].
pub fn read_trials<P: AsRef<Path>>(file: P) -> Result<Vec<Trial>> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    decode::from_read(&mut reader).context("failed to deserialize trials")
}
