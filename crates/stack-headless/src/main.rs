//! Stack Tower headless driver
//!
//! Runs the simulation without rendering: drops blocks on a fixed cadence,
//! optionally rescues the tower, and logs what happens.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use stack_core::{
    ScoreAccumulator, SchedulerEvent, SchedulerState, StabilizeError, StabilizerEvent, StackConfig,
    StackGame, TimedMode,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headless autoplay for the stacking simulation.
#[derive(Debug, Parser)]
#[command(name = "stack-headless", version)]
struct Args {
    /// JSON configuration file. Uses the built-in classic config if not set.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of fixed frames to simulate.
    #[arg(short, long, default_value = "3600", value_name = "N")]
    frames: u64,

    /// Frames to wait after a spawn before dropping.
    #[arg(long, default_value = "30", value_name = "N")]
    drop_delay: u32,

    /// Start a tower rescue whenever the stability monitor raises an alert.
    #[arg(long)]
    rescue_on_alert: bool,

    /// Start a tower rescue at this frame.
    #[arg(long, value_name = "FRAME")]
    rescue_at: Option<u64>,

    /// Override the RNG seed.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            StackConfig::from_json(&json).with_context(|| format!("loading {}", path.display()))?
        }
        None => StackConfig::default_classic(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let summary = match config.time_limit_secs {
        Some(limit) => run(StackGame::time_attack(config, limit), &args)?,
        None => run(StackGame::classic(config), &args)?,
    };

    tracing::info!(
        "Finished after {} frames: score {}, {} landed, {} lost, {} rescues (state hash {:016x})",
        summary.frames,
        summary.score,
        summary.landed,
        summary.lost,
        summary.rescues,
        summary.hash
    );
    Ok(())
}

#[derive(Debug, Default)]
struct Summary {
    frames: u64,
    score: u32,
    landed: u32,
    lost: usize,
    rescues: u32,
    hash: u64,
}

fn run<S: ScoreAccumulator, T: TimedMode>(mut game: StackGame<S, T>, args: &Args) -> anyhow::Result<Summary> {
    let mut summary = Summary::default();
    let mut waiting_frames = 0;
    let mut rescue_pending = false;

    for frame in 1..=args.frames {
        let drop = if game.scheduler().state() == SchedulerState::AwaitingDrop {
            waiting_frames += 1;
            waiting_frames > args.drop_delay
        } else {
            waiting_frames = 0;
            false
        };

        let report = game.tick(drop).context("simulation halted")?;

        match &report.scheduler {
            Some(SchedulerEvent::Spawned { id, variant }) => {
                tracing::info!("frame {}: spawned block {} ({})", frame, id, variant);
            }
            Some(SchedulerEvent::Landed(settlement)) => {
                summary.landed += 1;
                tracing::info!(
                    "frame {}: block {} landed (+{}, score {})",
                    frame,
                    settlement.id,
                    settlement.points,
                    game.score().score()
                );
            }
            Some(SchedulerEvent::Aborted { id }) => {
                tracing::warn!("frame {}: block {} was lost mid-fall", frame, id);
            }
            _ => {}
        }
        summary.lost += report.lost.len();

        if let Some(StabilizerEvent::Completed(session)) = &report.stabilizer {
            tracing::info!("frame {}: rescue finished ({} blocks)", frame, session.captured);
        }
        if report.alert.is_some() && args.rescue_on_alert {
            rescue_pending = true;
        }
        if args.rescue_at == Some(frame) {
            rescue_pending = true;
        }

        if rescue_pending {
            match game.rescue_tower() {
                Ok(count) => {
                    summary.rescues += 1;
                    rescue_pending = false;
                    tracing::info!("frame {}: rescue started with {} blocks", frame, count);
                }
                Err(StabilizeError::DropInFlight) => {}
                Err(err) => {
                    rescue_pending = false;
                    tracing::warn!("frame {}: rescue skipped: {}", frame, err);
                }
            }
        }

        if game.scheduler().state() == SchedulerState::Idle && game.scheduler().is_spawning_stopped() {
            tracing::info!("frame {}: spawning stopped, ending run", frame);
            summary.frames = frame;
            break;
        }
        summary.frames = frame;
    }

    summary.score = game.score().score();
    summary.hash = game.compute_hash();
    Ok(summary)
}
