use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{self, DEFAULT_COLLECT_DIR, DEFAULT_CONFIG_PATH, DEFAULT_STATE_DIR};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Validate network inventory exports and link them to primary sources",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check every dataset against the schema configuration and write a manifest
    Validate(ValidateArgs),
    /// Stage validated inputs and link secondary rows to primary rows
    Collect(CollectArgs),
    /// Validate, then collect against the fresh manifest
    Run(RunArgs),
    /// Remove generated CSV files from the collect output directory
    Clean(CleanArgs),
}

/// Location of the workspace, its schema configuration and its state directory.
#[derive(Debug, Clone, Args)]
pub struct WorkspaceArgs {
    /// Workspace root; relative paths resolve against it
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Schema configuration (YAML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Directory holding manifests and the latest pointer
    #[arg(long = "state-dir", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,
}

impl WorkspaceArgs {
    pub fn config_path(&self) -> PathBuf {
        config::resolve_under(&self.root, &self.config)
    }

    pub fn state_path(&self) -> PathBuf {
        config::resolve_under(&self.root, &self.state_dir)
    }
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Manifest to collect from (defaults to the latest one in the state directory)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,
    /// Directory receiving staged and link tables
    #[arg(short, long = "out-dir", default_value = DEFAULT_COLLECT_DIR)]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,
    /// Directory receiving staged and link tables
    #[arg(short, long = "out-dir", default_value = DEFAULT_COLLECT_DIR)]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Workspace root; relative paths resolve against it
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Directory to clean
    #[arg(short, long = "out-dir", default_value = DEFAULT_COLLECT_DIR)]
    pub out_dir: PathBuf,
}
