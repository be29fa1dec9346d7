use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use rayon::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use level_signals::feed::{load_bars, parse_bar_line, FeedSequencer};
use level_signals::sinks::{JsonLinesSink, MemorySink, Tee, TracingSink};
use level_signals::{DetectionMode, EngineConfig, SignalEngine};

#[derive(Parser, Debug)]
#[command(name = "level-signals")]
#[command(about = "Opening range / premarket / prior day breakout and retest signals")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON engine config; command-line flags override it
    #[arg(short, long, global = true, env = "LEVEL_SIGNALS_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(ClapArgs, Debug, Default)]
struct Overrides {
    /// Signal on the breakout bar itself or on the retest pin bar
    #[arg(long, global = true, value_enum)]
    mode: Option<DetectionMode>,

    /// Opening range length in minutes
    #[arg(long, global = true)]
    opening_range_minutes: Option<u32>,

    /// Minimum dominant-wick to opposite-wick ratio for a pin bar
    #[arg(long, global = true)]
    rejection_ratio: Option<f64>,

    /// Instrument name used in alert text
    #[arg(long, global = true)]
    symbol: Option<String>,

    /// Timeframe label used in alert text
    #[arg(long, global = true)]
    timeframe: Option<String>,

    /// Price increment for marker placement
    #[arg(long, global = true)]
    pip_size: Option<f64>,

    #[arg(long, global = true)]
    no_opening_range: bool,

    #[arg(long, global = true)]
    no_premarket: bool,

    #[arg(long, global = true)]
    no_prior_day: bool,

    #[arg(long, global = true)]
    no_alerts: bool,

    #[arg(long, global = true)]
    no_sound: bool,
}

impl Overrides {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(minutes) = self.opening_range_minutes {
            config.opening_range_minutes = minutes;
        }
        if let Some(ratio) = self.rejection_ratio {
            config.rejection_ratio = ratio;
        }
        if let Some(symbol) = &self.symbol {
            config.symbol = symbol.clone();
        }
        if let Some(timeframe) = &self.timeframe {
            config.timeframe = timeframe.clone();
        }
        if let Some(pip_size) = self.pip_size {
            config.pip_size = pip_size;
        }
        config.levels.opening_range &= !self.no_opening_range;
        config.levels.premarket &= !self.no_premarket;
        config.levels.prior_day &= !self.no_prior_day;
        config.alerts_enabled &= !self.no_alerts;
        config.sound_alerts &= !self.no_sound;
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay bar files; each file is an independent instrument
    Replay {
        /// CSV or .csv.zst files with timestamp,open,high,low,close
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write <instrument>.signals.jsonl per file here
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Treat the last N bars of each file as live (fires alerts)
        #[arg(long, default_value = "0")]
        live_tail: usize,
    },

    /// Read CSV bar lines from stdin until EOF or Ctrl-C
    Live {
        /// Also write every dispatch as JSON lines to stdout
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(if args.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO }.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    args.overrides.apply(&mut config);
    config.validate().context("Invalid engine configuration")?;

    info!(
        "Mode: {}, opening range {}m, rejection ratio {}",
        config.mode, config.opening_range_minutes, config.rejection_ratio
    );

    match args.command {
        Commands::Replay { files, output_dir, live_tail } => {
            run_replay(&files, output_dir.as_deref(), live_tail, &config)?;
        }
        Commands::Live { json } => {
            run_live(config, json).await?;
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct ReplaySummary {
    bars: usize,
    days: usize,
    signals: usize,
    buys: usize,
    sells: usize,
    skipped: usize,
}

/// "data/NQ-20250103.csv.zst" -> "NQ-20250103"
fn instrument_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bars".to_string());
    name.trim_end_matches(".zst")
        .trim_end_matches(".csv")
        .to_string()
}

fn run_replay(
    files: &[PathBuf],
    output_dir: Option<&Path>,
    live_tail: usize,
    config: &EngineConfig,
) -> Result<()> {
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
    }

    info!("Replaying {} file(s)", files.len());

    let results: Vec<(&PathBuf, Result<ReplaySummary>)> = files
        .par_iter()
        .map(|path| (path, replay_file(path, output_dir, live_tail, config)))
        .collect();

    let mut failed = 0;
    for (path, result) in &results {
        match result {
            Ok(s) => info!(
                "{}: {} bars, {} days, {} signals ({} buy / {} sell), {} bars skipped",
                instrument_name(path),
                s.bars,
                s.days,
                s.signals,
                s.buys,
                s.sells,
                s.skipped
            ),
            Err(e) => {
                error!("{:?}: {:#}", path, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} files failed", failed, files.len());
    }
    Ok(())
}

fn replay_file(
    path: &Path,
    output_dir: Option<&Path>,
    live_tail: usize,
    config: &EngineConfig,
) -> Result<ReplaySummary> {
    let name = instrument_name(path);
    let bars = load_bars(path)?;
    let live_from = bars.len().saturating_sub(live_tail);

    let mut json = match output_dir {
        Some(dir) => {
            let out = dir.join(format!("{}.signals.jsonl", name));
            let file = File::create(&out).with_context(|| format!("Failed to create {:?}", out))?;
            Some(JsonLinesSink::new(BufWriter::new(file)))
        }
        None => None,
    };

    let mut engine = SignalEngine::new(config.clone());
    let mut sequencer = FeedSequencer::new();
    let mut memory = MemorySink::default();
    let mut skipped = 0;

    for (i, bar) in bars.into_iter().enumerate() {
        let update = match sequencer.push(bar, i >= live_from) {
            Ok(update) => update,
            Err(e) => {
                warn!("{}: {:#}, skipping bar", name, e);
                skipped += 1;
                continue;
            }
        };

        match json.as_mut() {
            Some(json) => {
                let mut tee = Tee {
                    first: &mut memory,
                    second: json,
                };
                engine.on_bar(&update, &mut tee);
            }
            None => {
                engine.on_bar(&update, &mut memory);
            }
        }
    }

    if let Some(json) = json {
        let lines = json.lines();
        json.finish()
            .with_context(|| format!("Failed to write signals for {}", name))?;
        info!("{}: wrote {} JSON lines", name, lines);
    }

    for (text, _) in &memory.alerts {
        warn!("[{}] ALERT {}", name, text);
    }

    let stats = engine.stats();
    Ok(ReplaySummary {
        bars: stats.bars,
        days: stats.days,
        signals: stats.signals,
        buys: memory.outputs.values().filter(|o| o.buy.is_some()).count(),
        sells: memory.outputs.values().filter(|o| o.sell.is_some()).count(),
        skipped,
    })
}

async fn run_live(config: EngineConfig, json: bool) -> Result<()> {
    let mut log_sink = TracingSink::new(config.symbol.clone());
    let mut json_sink = json.then(|| JsonLinesSink::new(std::io::stdout()));
    let mut engine = SignalEngine::new(config);
    let mut sequencer = FeedSequencer::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Reading bars from stdin (Ctrl-C to stop)");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                let bar = match parse_bar_line(&line) {
                    Ok(Some(bar)) => bar,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Skipping line {:?}: {:#}", line, e);
                        continue;
                    }
                };
                let update = match sequencer.push(bar, true) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("{:#}, skipping bar", e);
                        continue;
                    }
                };

                match json_sink.as_mut() {
                    Some(json) => {
                        let mut tee = Tee { first: &mut log_sink, second: json };
                        engine.on_bar(&update, &mut tee);
                    }
                    None => {
                        engine.on_bar(&update, &mut log_sink);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    if let Some(json) = json_sink {
        json.finish()?;
    }

    let stats = engine.stats();
    info!(
        "Processed {} bars over {} days, {} signals",
        stats.bars, stats.days, stats.signals
    );
    Ok(())
}
