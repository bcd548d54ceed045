pub mod cli;
pub mod collect;
pub mod config;
pub mod confusables;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod index;
pub mod inventory;
pub mod io_utils;
pub mod manifest;
pub mod matching;
pub mod rules;
pub mod stage;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::{
    cli::{Cli, Commands, RunArgs},
    config::LoadedConfig,
    manifest::ManifestStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("primescope", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => validate::execute(&args),
        Commands::Collect(args) => collect::execute(&args),
        Commands::Run(args) => handle_run(&args),
        Commands::Clean(args) => collect::execute_clean(&args),
    }
}

fn handle_run(args: &RunArgs) -> Result<()> {
    let workspace = &args.workspace;
    let config = LoadedConfig::load(&workspace.root, &workspace.config_path())?;
    let manifest = validate::run(&config)?;
    ManifestStore::new(workspace.state_path(), config.settings().history_limit)
        .persist(&manifest)?;
    let out_dir = config::resolve_under(&workspace.root, &args.out_dir);
    collect::collect(&config, &manifest, &out_dir)?;
    Ok(())
}
