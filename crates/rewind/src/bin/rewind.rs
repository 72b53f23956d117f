//! rewind - live DVR demo driver
//!
//! Subcommands:
//! - `rewind run` - Capture synthetic segments and replay them with a lag
//! - `rewind config` - Print the effective configuration and its sources

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rewind::{
    export_around, format_clock, format_elapsed, MemoryStore, PlaybackHandle, PlaybackStatus,
    Renderer, Session, SimRenderer, SyntheticSource,
};
use rewindconf::RewindConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How often the simulated playhead advances.
const PLAYHEAD_STEP: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "rewind")]
#[command(about = "Live DVR core: capture, store, and lagged playback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic live session
    Run {
        /// Config file (overrides ./rewind.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "30")]
        seconds: u64,

        /// Comma-separated steps, e.g. "wait:10,seek:-6,wait:4,live"
        ///
        /// Steps: wait:<secs>, seek:<secs>, at:<secs into session>, live,
        /// pause, play, rate, nudge:<secs>, export:<radius>
        #[arg(long)]
        script: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Config file (overrides ./rewind.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum ScriptStep {
    Wait(f64),
    Seek(f64),
    At(f64),
    Live,
    Pause,
    Play,
    Rate,
    Nudge(f64),
    Export(u64),
}

impl FromStr for ScriptStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg.trim())),
            None => (s, None),
        };
        let number = |arg: Option<&str>| -> Result<f64> {
            let arg = arg.with_context(|| format!("step '{}' needs a value", name))?;
            let value: f64 = arg
                .parse()
                .with_context(|| format!("invalid number '{}' in step '{}'", arg, s))?;
            if !value.is_finite() {
                bail!("invalid number '{}' in step '{}'", arg, s);
            }
            Ok(value)
        };

        match name {
            "wait" => Ok(ScriptStep::Wait(number(arg)?.max(0.0))),
            "seek" => Ok(ScriptStep::Seek(number(arg)?)),
            "at" => Ok(ScriptStep::At(number(arg)?.max(0.0))),
            "live" => Ok(ScriptStep::Live),
            "pause" => Ok(ScriptStep::Pause),
            "play" => Ok(ScriptStep::Play),
            "rate" => Ok(ScriptStep::Rate),
            "nudge" => Ok(ScriptStep::Nudge(number(arg)?)),
            "export" => Ok(ScriptStep::Export(number(arg)?.max(0.0) as u64)),
            other => bail!("unknown script step '{}'", other),
        }
    }
}

fn parse_script(script: &str) -> Result<Vec<ScriptStep>> {
    script
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(ScriptStep::from_str)
        .collect()
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn status_line(status: &PlaybackStatus) -> String {
    let clock = status
        .position
        .map(format_clock)
        .unwrap_or_else(|| "--:--".to_string());
    format!(
        "{}  {} / {}  cursor {}  {:?}{}",
        clock,
        format_elapsed(status.elapsed_secs),
        format_elapsed(status.duration_secs),
        status.cursor,
        status.phase,
        if status.near_live { "  [live]" } else { "" }
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            seconds,
            script,
        } => run(config, seconds, script).await,
        Commands::Config { config } => show_config(config),
    }
}

fn show_config(path: Option<PathBuf>) -> Result<()> {
    let (config, sources) =
        RewindConfig::load_with_sources_from(path.as_deref()).context("loading configuration")?;

    if sources.files.is_empty() {
        println!("# no config files found, using defaults");
    }
    for file in &sources.files {
        println!("# loaded: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("# env override: {}", var);
    }
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

async fn run(path: Option<PathBuf>, seconds: u64, script: Option<String>) -> Result<()> {
    let config = RewindConfig::load_from(path.as_deref()).context("loading configuration")?;
    init_tracing(&config.telemetry.log_level);

    let steps = match script.as_deref() {
        Some(script) => parse_script(script).context("parsing --script")?,
        None => Vec::new(),
    };

    let tick = Duration::from_millis(config.playback.tick_interval_ms);
    let store = Arc::new(MemoryStore::with_retention(config.capture.max_chunks));
    let renderer = SimRenderer::new(tick.as_secs_f64());

    let session = Session::start(&config, store, Arc::new(renderer.clone()))
        .context("starting live session")?;
    let cancel = session.cancel_token();

    let source = SyntheticSource::new(session.segments.clone(), config.capture.encoding.clone(), tick);
    let source_task = tokio::spawn(source.run(cancel.child_token()));
    tokio::spawn(advance_playhead(renderer.clone(), cancel.child_token()));
    tokio::spawn(print_status(session.playback.clone(), tick, cancel.child_token()));

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    tokio::select! {
        _ = &mut deadline => {}
        result = run_script(&steps, &session.playback, &renderer, &session.store) => {
            result?;
            deadline.await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    cancel.cancel();
    let queued = source_task.await.unwrap_or(0);
    let stats = session.stats.snapshot();
    session.shutdown().await;

    println!("synthetic segments queued: {}", queued);
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("serializing capture stats")?
    );
    Ok(())
}

async fn run_script(
    steps: &[ScriptStep],
    playback: &PlaybackHandle,
    renderer: &SimRenderer,
    store: &MemoryStore,
) -> Result<()> {
    for step in steps {
        match step {
            ScriptStep::Wait(secs) => tokio::time::sleep(Duration::from_secs_f64(*secs)).await,
            ScriptStep::Seek(delta) => {
                let outcome = playback.seek_by_delta(*delta).await?;
                println!("seek {:+}s -> {:?}", delta, outcome);
            }
            ScriptStep::At(secs) => {
                let Some(bounds) = playback.status().bounds else {
                    println!("at {}s -> nothing captured yet", secs);
                    continue;
                };
                let outcome = playback
                    .seek_to_timestamp(bounds.start.offset_by_secs(*secs))
                    .await?;
                println!("at {}s -> {:?}", secs, outcome);
            }
            ScriptStep::Live => {
                let outcome = playback.return_to_live().await?;
                println!("live -> {:?}", outcome);
            }
            ScriptStep::Pause => {
                if renderer.is_playing() {
                    renderer.pause();
                    println!("paused");
                } else {
                    println!("already paused");
                }
            }
            ScriptStep::Play => {
                renderer.play();
                let outcome = playback.resume().await?;
                println!("play -> {:?}", outcome);
            }
            ScriptStep::Rate => println!("rate -> {}x", renderer.toggle_rate()),
            ScriptStep::Nudge(secs) => {
                renderer.nudge(*secs);
                println!("nudge {:+}s -> playhead {:.2}", secs, renderer.playhead());
            }
            ScriptStep::Export(radius) => {
                let cursor = playback.status().cursor;
                match export_around(store, cursor, *radius)? {
                    Some(clip) => println!(
                        "export {}..={}: {} chunks, {} bytes, {}",
                        clip.first_id,
                        clip.last_id,
                        clip.chunk_count,
                        clip.len(),
                        format_elapsed(clip.duration_secs())
                    ),
                    None => println!("export: nothing around {}", cursor),
                }
            }
        }
    }
    Ok(())
}

async fn advance_playhead(renderer: SimRenderer, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PLAYHEAD_STEP);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => renderer.advance(PLAYHEAD_STEP.as_secs_f64()),
        }
    }
}

async fn print_status(playback: PlaybackHandle, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => println!("{}", status_line(&playback.status())),
        }
    }
}
