// CLI module for semantic-stream
// Author: kelexine (https://github.com/kelexine)

pub mod commands;
pub mod session;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// semantic-stream - streaming generation client with a semantic response cache
#[derive(Parser, Debug)]
#[command(name = "semantic-stream", version, about, long_about = None)]
pub struct Args {
    /// Config file (default: ~/.semantic-stream/config.toml)
    #[arg(long, global = true, env = "SEMANTIC_STREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Neither consult nor populate the semantic cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one prompt and print the response
    Ask {
        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,

        /// Print reasoning as it streams
        #[arg(long)]
        show_thinking: bool,
    },
    /// Interactive conversation; Ctrl+C cancels the request in flight
    Chat {
        #[arg(long)]
        show_thinking: bool,
    },
    /// Summarize the persisted cache
    Stats,
    /// Delete the persisted cache
    Clear,
}
