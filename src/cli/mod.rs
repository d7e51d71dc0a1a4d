//! Command-line interface.
//!
//! The curses front end lives outside this crate; these commands drive the
//! core end to end: scanning into the cache, inspecting files, and playing
//! through the engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::cache::RefreshEvent;
use crate::config;
use crate::engine::Engine;
use crate::player::{Player, PlayerOptions, PlayerStatus};
use crate::scanner;
use crate::worker::CancelToken;

#[derive(Parser, Debug)]
#[command(name = "quaver", about = "terminal music player core", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a directory into the track cache
    Scan {
        /// Directory to scan
        path: PathBuf,
        /// Re-read files even when cached
        #[arg(long)]
        force: bool,
    },
    /// Print metadata for files
    Info {
        /// Audio files
        files: Vec<PathBuf>,
    },
    /// Play files back to back
    Play {
        /// Audio files, played in order
        files: Vec<PathBuf>,
        /// Output plugin ("cpal" or "null")
        #[arg(long)]
        output: Option<String>,
    },
    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Re-stat every entry, re-reading changed files
    Refresh {
        /// Re-read unchanged files too
        #[arg(long)]
        force: bool,
    },
}

/// Execute a CLI command. Returns false when no command was given.
pub fn run_command(cli: &Cli) -> anyhow::Result<bool> {
    let Some(command) = &cli.command else {
        return Ok(false);
    };
    let cfg = config::load();
    let config_dir = config::config_dir().context("no config directory")?;
    std::fs::create_dir_all(&config_dir)?;

    match command {
        Command::Scan { path, force } => {
            let (engine, _) = Engine::from_config(&cfg, &config_dir);
            let cancel = CancelToken::new();
            let mut loaded = 0usize;
            let found = scanner::scan(path, &cancel, |track| {
                if engine.cache.get_or_load(&track, *force).is_some() {
                    loaded += 1;
                }
            });
            engine.cache.close()?;
            println!("{found} tracks found, {loaded} cached");
        }
        Command::Info { files } => {
            let player = headless_player(&cfg)?;
            for file in files {
                let path = file.to_str().context("path is not UTF-8")?;
                match player.file_info(path) {
                    Ok((duration, tags)) => {
                        println!("{path}");
                        println!("  duration: {duration}s");
                        for (key, value) in tags.iter() {
                            println!("  {key}: {value}");
                        }
                    }
                    Err(e) => eprintln!("{path}: {e}"),
                }
            }
        }
        Command::Play { files, output } => {
            play_files(&cfg, &config_dir, files, output.as_deref())?;
        }
        Command::Cache { action } => {
            let (engine, status) = Engine::from_config(&cfg, &config_dir);
            match action {
                CacheAction::Stats => {
                    println!("{} entries ({status:?})", engine.cache.len());
                }
                CacheAction::Refresh { force } => {
                    let events = engine.cache.refresh(*force);
                    let (mut unchanged, mut changed, mut removed) = (0, 0, 0);
                    for event in &events {
                        match event {
                            RefreshEvent::Unchanged(_) => unchanged += 1,
                            RefreshEvent::Changed { .. } => changed += 1,
                            RefreshEvent::Removed(_) => removed += 1,
                        }
                    }
                    engine.cache.close()?;
                    println!("{unchanged} unchanged, {changed} changed, {removed} removed");
                }
            }
        }
    }
    Ok(true)
}

fn headless_player(cfg: &config::Config) -> anyhow::Result<Player> {
    let callbacks = crate::player::PlayerCallbacks {
        get_next: Box::new(|| None),
    };
    Player::new(
        callbacks,
        PlayerOptions {
            output: "null".to_string(),
            buffer_chunks: cfg.audio.buffer_chunks,
            promote_stereo_16bit: cfg.audio.promote_stereo_16bit,
            cont: false,
            decoder_factory: None,
        },
    )
    .context("starting the playback engine")
}

fn play_files(
    cfg: &config::Config,
    config_dir: &std::path::Path,
    files: &[PathBuf],
    output: Option<&str>,
) -> anyhow::Result<()> {
    anyhow::ensure!(!files.is_empty(), "nothing to play");

    let (engine, _) = Engine::from_config(cfg, config_dir);
    let engine = Arc::new(engine);
    {
        let mut queue = engine.queue.lock();
        for file in files {
            let path = file.to_str().context("path is not UTF-8")?;
            let ti = engine
                .cache
                .get_or_load(path, false)
                .with_context(|| format!("cannot read {path}"))?;
            queue.append(ti);
        }
    }

    let player = Player::new(
        Engine::callbacks(&engine),
        PlayerOptions {
            output: output.unwrap_or(&cfg.audio.output).to_string(),
            buffer_chunks: cfg.audio.buffer_chunks,
            promote_stereo_16bit: cfg.audio.promote_stereo_16bit,
            cont: cfg.playback.cont,
            decoder_factory: None,
        },
    )
    .context("starting the playback engine")?;
    player.set_volume(cfg.audio.volume_left, cfg.audio.volume_right);
    player.play();

    let mut last_line = String::new();
    loop {
        std::thread::sleep(Duration::from_millis(200));
        let mut info = player.info();
        if let Some(error) = info.take_error() {
            eprintln!("error: {error}");
        }
        let line = match (&info.current, info.status) {
            (Some(ti), PlayerStatus::Playing | PlayerStatus::Paused) => {
                let title = ti.title().unwrap_or(ti.filename());
                let artist = ti.artist().unwrap_or("?");
                format!("{artist} - {title}  {}s", info.position)
            }
            _ => String::new(),
        };
        if line != last_line && !line.is_empty() {
            println!("{line}");
            last_line = line;
        }
        info.consume_dirty();
        let stopped = info.status == PlayerStatus::Stopped;
        drop(info);
        if stopped && engine.queue.lock().is_empty() {
            break;
        }
    }
    engine.cache.close()?;
    Ok(())
}
