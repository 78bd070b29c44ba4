mod analysis;
mod belief;
mod config;
mod controller;
mod design;
mod engine;
mod manager;
mod model;
mod optimizer;
mod participant;
mod prior;
mod stats;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Simulate Bayesian adaptive delay and risk discounting experiments.
#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Directory holding config.toml and the simulated sessions.
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session.
    Create {
        /// Seed of the session, in place of the configured one.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Continue an existing session.
    Resume {
        #[arg(long)]
        run_idx: usize,
    },

    /// Summarize every session.
    Analyze,

    /// Remove every session.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to open simulation directory")?;

    match args.command {
        Command::Create { seed } => mgr.create_run(seed)?,
        Command::Resume { run_idx } => mgr.resume_run(run_idx)?,
        Command::Analyze => mgr.analyze_sim()?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
