//! quaver - the core of a terminal music player.
//!
//! Decoding and playback run on a two-thread producer/consumer pipeline
//! over a chunked ring buffer; track metadata persists in a binary cache;
//! the library organizes tracks into an artist/album tree, a sorted view
//! and a play queue. The CLI drives these subsystems end to end; the
//! interactive front end lives elsewhere.

pub mod cache;
pub mod cli;
pub mod config;
pub mod cue;
pub mod engine;
pub mod error;
pub mod library;
pub mod model;
pub mod player;
pub mod playlist;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;
pub mod worker;

use clap::{CommandFactory, Parser};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("quaver=info".parse()?))
        .init();

    if cli::run_command(&args)? {
        return Ok(());
    }

    cli::Cli::command().print_help()?;
    Ok(())
}
