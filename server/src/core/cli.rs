//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "adcast", about = "Podcast sponsorship analytics backend")]
pub struct Cli {
    /// Load environment variables from this file before reading config
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the backend (default)
    Start,
    /// Upsert the automation job definitions into the scheduled_tasks table
    /// and exit
    Schedule,
}

pub fn parse() -> Cli {
    Cli::parse()
}
