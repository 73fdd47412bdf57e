mod loopback;

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use glam::DVec3;

use tandem::{
    ExecConfig, Executive, Player, PlayerClass, Side, SimEvent, TaskKind, spawn_task,
};

use loopback::LoopbackAdapter;

const MIRROR_NET: u16 = 2;

#[derive(Parser)]
#[command(name = "tandem-station")]
#[command(about = "Headless simulation station with a loopback network")]
struct Args {
    #[arg(short, long, default_value_t = 50.0)]
    frame_rate: f64,

    #[arg(short, long, default_value_t = 2)]
    threads: usize,

    #[arg(short, long, default_value_t = 8)]
    players: u16,

    #[arg(long, default_value_t = 500, help = "Frames to run before exiting")]
    frames: u64,

    #[arg(long, help = "Fold frame overruns into the next dt")]
    variable_dt: bool,

    #[arg(long, default_value_t = 12.5, help = "Input NIB timeout in seconds")]
    nib_timeout: f64,

    #[arg(long, help = "Simulated time of day, seconds past midnight")]
    time_of_day: Option<f64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ExecConfig {
        frame_rate_hz: args.frame_rate,
        tc_threads: args.threads,
        variable_dt: args.variable_dt,
        nib_timeout_secs: args.nib_timeout,
        time_of_day: args.time_of_day,
        ..Default::default()
    };
    let mut exec = Executive::new(config)?;
    exec.add_adapter(Box::new(LoopbackAdapter::new(MIRROR_NET)));

    seed_flight(&exec, args.players);
    let stats = exec.stats();
    log::info!(
        "station up: {} players, {} workers, {:.0} Hz",
        stats.players,
        stats.workers,
        args.frame_rate
    );

    // Once-a-second progress line, decoupled from the frame loop.
    let frame_counter = Arc::new(AtomicU64::new(0));
    let reporter_frames = frame_counter.clone();
    let reporter = spawn_task(
        "stats",
        TaskKind::Periodic {
            period: Duration::from_secs(1),
        },
        Box::new(move || {
            log::info!("frame {}", reporter_frames.load(Ordering::Relaxed));
        }),
    );
    if let Err(err) = &reporter {
        log::warn!("stats reporter unavailable: {err}");
    }

    let report_every = (args.frame_rate as u64).max(1);
    let mut remaining = args.frames;
    while remaining > 0 {
        let burst = remaining.min(report_every);
        exec.run(burst);
        remaining -= burst;
        frame_counter.store(exec.stats().abs_frame, Ordering::Relaxed);
        log_events(&mut exec);
    }
    if let Ok(reporter) = reporter {
        reporter.join();
    }

    summarize(&exec);
    Ok(())
}

/// A ring of aircraft flying straight and level on spread headings.
fn seed_flight(exec: &Executive, count: u16) {
    for index in 0..count {
        let id = index + 1;
        let player = Player::new(
            id,
            &format!("viper{id}"),
            PlayerClass::Aircraft,
            "F-16C",
            Side::Blue,
        );
        let heading = TAU * index as f64 / count.max(1) as f64;
        player.set_position(DVec3::new(0.0, 0.0, -3000.0 - 100.0 * index as f64));
        player.set_velocity(DVec3::new(
            250.0 * heading.cos(),
            250.0 * heading.sin(),
            0.0,
        ));
        player.set_euler_angles(DVec3::new(0.0, 0.0, heading));
        if !exec.seed_player(player) {
            log::warn!("player {id} rejected as duplicate");
        }
    }
}

fn log_events(exec: &mut Executive) {
    for event in exec.drain_events() {
        match event {
            SimEvent::PlayerAdded {
                network_id,
                player_id,
            } => log::info!("player {network_id}:{player_id} added"),
            SimEvent::PlayerRemoved {
                network_id,
                player_id,
            } => log::info!("player {network_id}:{player_id} removed"),
            SimEvent::StateUpdateEmitted { player_id, .. } => {
                log::debug!("state update for player {player_id}")
            }
            SimEvent::EntityUnmapped { entity_type, .. } => {
                log::warn!("unmapped entity {entity_type:?} dropped")
            }
            SimEvent::NibTimedOut { player_id, .. } => {
                log::info!("entity {player_id} timed out")
            }
            SimEvent::PoolDegraded { requested, actual } => {
                log::warn!("worker pool degraded: {actual}/{requested}")
            }
            SimEvent::FrameOverrun { frame, overrun } => {
                log::debug!("frame {frame} overran by {overrun:?}")
            }
        }
    }
}

fn summarize(exec: &Executive) {
    let stats = exec.stats();
    log::info!(
        "done: {} frames ({} cycles), t={:.2}s, {} players, {} overruns (worst {:?})",
        stats.abs_frame,
        stats.cycle,
        stats.exec_time,
        stats.players,
        stats.timing.overruns,
        stats.timing.worst_overrun
    );

    // Mirror tracking error is the visible quality of the whole pipeline.
    for player in exec.roster().snapshot().iter().filter(|p| p.is_local()) {
        if let Some(mirror) = exec.roster().find(MIRROR_NET, player.id() + loopback::MIRROR_ID_OFFSET) {
            let error = (mirror.position() - player.position()).length();
            log::info!(
                "{}: mirror tracking error {:.2} m",
                player.name(),
                error
            );
        }
    }
}
