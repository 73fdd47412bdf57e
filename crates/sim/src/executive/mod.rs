mod pool;
mod time;

pub use pool::{HandshakeGroup, Job, TaskHandle, TaskKind, Work, WorkerPool, spawn_task};
pub use time::{FrameStats, FrameTimer, SimClock};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapter::{AdapterContext, NetAdapter};
use crate::config::{ConfigError, ExecConfig};
use crate::events::{EventLog, SimEvent};
use crate::player::{ListChanges, NetworkId, Player, PlayerId, PlayerList, PlayerMode};

pub const FRAMES_PER_CYCLE: u16 = 16;

/// The four strictly-ordered slices of every frame. Phase N completes for
/// all players before phase N+1 begins for any player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Dynamics = 0,
    Transmit = 1,
    Receive = 2,
    Process = 3,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Self::Dynamics, Self::Transmit, Self::Receive, Self::Process];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Monotonic 16-bit id source wrapping back to a configurable floor.
#[derive(Debug, Clone, Copy)]
pub struct IdCycle {
    next: u16,
    floor: u16,
}

impl IdCycle {
    pub fn new(floor: u16) -> Self {
        Self { next: floor, floor }
    }

    pub fn next(&mut self) -> u16 {
        let value = self.next;
        self.next = if value == u16::MAX {
            self.floor
        } else {
            value + 1
        };
        value
    }
}

#[derive(Debug)]
struct RosterInner {
    list: PlayerList,
    event_id: IdCycle,
    weapon_event_id: IdCycle,
    released_weapon_id: IdCycle,
}

/// The shared player roster plus the unique-id generators, all issued under
/// one lock. Phase workers only ever read published snapshots; the single
/// background mutator is the only writer.
#[derive(Debug)]
pub struct Roster {
    inner: Mutex<RosterInner>,
}

impl Roster {
    fn new(id_floor: u16) -> Self {
        Self {
            inner: Mutex::new(RosterInner {
                list: PlayerList::new(),
                event_id: IdCycle::new(id_floor),
                weapon_event_id: IdCycle::new(id_floor),
                released_weapon_id: IdCycle::new(id_floor),
            }),
        }
    }

    /// Stages a runtime add; visible after the next list update.
    pub fn stage(&self, player: Arc<Player>) -> bool {
        self.inner.lock().unwrap().list.add_new_player(player)
    }

    fn seed(&self, player: Arc<Player>) -> bool {
        self.inner.lock().unwrap().list.seed(player)
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Player>>> {
        self.inner.lock().unwrap().list.snapshot()
    }

    pub fn find(&self, network_id: NetworkId, id: PlayerId) -> Option<Arc<Player>> {
        self.inner.lock().unwrap().list.find(network_id, id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update_player_list(&self) -> ListChanges {
        self.inner.lock().unwrap().list.update_player_list()
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().list.reset();
    }

    pub fn next_event_id(&self) -> u16 {
        self.inner.lock().unwrap().event_id.next()
    }

    pub fn next_weapon_event_id(&self) -> u16 {
        self.inner.lock().unwrap().weapon_event_id.next()
    }

    pub fn next_released_weapon_id(&self) -> u16 {
        self.inner.lock().unwrap().released_weapon_id.next()
    }
}

/// Recorder hook invoked for every player at every phase visit, from the
/// worker that processed the player.
pub type PhaseProbe = Arc<dyn Fn(&Player, Phase, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ExecStats {
    pub cycle: u32,
    pub frame: u16,
    pub abs_frame: u64,
    pub exec_time: f64,
    pub players: usize,
    pub workers: usize,
    pub degraded: bool,
    pub timing: FrameStats,
}

type SharedAdapters = Arc<Mutex<Vec<Box<dyn NetAdapter>>>>;

/// The simulation executive: owns the player roster, runs the
/// cycle/frame/phase clock, and fans phase work out to the worker pool.
pub struct Executive {
    config: ExecConfig,
    roster: Arc<Roster>,
    events: Arc<EventLog>,
    adapters: SharedAdapters,
    pool: WorkerPool,
    background: HandshakeGroup,
    clock: SimClock,
    timer: FrameTimer,
    exec_time_bits: Arc<AtomicU64>,
    cycle: u32,
    frame: u16,
    abs_frame: u64,
    probe: Option<PhaseProbe>,
}

impl Executive {
    pub fn new(config: ExecConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let roster = Arc::new(Roster::new(config.id_floor));
        let events = Arc::new(EventLog::new());
        let adapters: SharedAdapters = Arc::new(Mutex::new(Vec::new()));
        let exec_time_bits = Arc::new(AtomicU64::new(0.0_f64.to_bits()));

        let pool = WorkerPool::new("tc", config.tc_threads);
        if pool.degraded() {
            events.push(SimEvent::PoolDegraded {
                requested: config.tc_threads,
                actual: pool.workers(),
            });
        }

        let background_dt = config.background_frames as f64 / config.frame_rate_hz;
        let payload: Work = {
            let roster = roster.clone();
            let events = events.clone();
            let adapters = adapters.clone();
            let exec_time_bits = exec_time_bits.clone();
            let timeout = config.nib_timeout_secs;
            Box::new(move || {
                let exec_time = f64::from_bits(exec_time_bits.load(Ordering::Acquire));
                background_pass(&roster, &adapters, &events, exec_time, background_dt, timeout);
            })
        };
        let background = HandshakeGroup::spawn("background", vec![payload]);
        if background.is_empty() {
            log::warn!("background worker unavailable, housekeeping runs inline");
        }

        Ok(Self {
            clock: SimClock::new(config.time_of_day, config.date),
            timer: FrameTimer::new(config.frame_rate_hz, config.variable_dt),
            roster,
            events,
            adapters,
            pool,
            background,
            exec_time_bits,
            cycle: 0,
            frame: 0,
            abs_frame: 0,
            probe: None,
            config,
        })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn add_adapter(&mut self, adapter: Box<dyn NetAdapter>) {
        self.adapters.lock().unwrap().push(adapter);
    }

    pub fn set_phase_probe(&mut self, probe: impl Fn(&Player, Phase, u64) + Send + Sync + 'static) {
        self.probe = Some(Arc::new(probe));
    }

    /// Registers a configured (startup) player and publishes it
    /// immediately; part of the baseline that `reset` restores.
    pub fn seed_player(&self, player: Player) -> bool {
        let staged = self.roster.seed(Arc::new(player));
        if staged {
            let changes = self.roster.update_player_list();
            self.notify_list_changes(changes);
        }
        staged
    }

    /// Stages a runtime player add for the next background pass.
    pub fn add_player(&self, player: Player) -> bool {
        self.roster.stage(Arc::new(player))
    }

    pub fn drain_events(&self) -> Vec<SimEvent> {
        self.events.drain()
    }

    pub fn stats(&self) -> ExecStats {
        ExecStats {
            cycle: self.cycle,
            frame: self.frame,
            abs_frame: self.abs_frame,
            exec_time: self.clock.exec_time(),
            players: self.roster.len(),
            workers: self.pool.workers(),
            degraded: self.pool.degraded(),
            timing: self.timer.stats(),
        }
    }

    /// Paced run: sleeps out each tick boundary and steps `frames` frames.
    pub fn run(&mut self, frames: u64) {
        for _ in 0..frames {
            let dt = self.timer.wait_next();
            if let Some(overrun) = self.timer.take_overrun() {
                self.events.push(SimEvent::FrameOverrun {
                    frame: self.abs_frame,
                    overrun,
                });
            }
            self.step_frame(dt);
        }
    }

    /// One external tick: refreshes time once, runs all four phases over a
    /// single roster snapshot, then advances the frame/cycle counters and
    /// kicks the background pass on its cadence.
    pub fn step_frame(&mut self, dt: f64) {
        self.clock.advance_frame(dt);
        self.exec_time_bits
            .store(self.clock.exec_time().to_bits(), Ordering::Release);

        let players = self.roster.snapshot();
        for phase in Phase::ALL {
            self.run_phase(phase, &players, dt);
        }

        self.abs_frame += 1;
        self.frame += 1;
        if self.frame >= FRAMES_PER_CYCLE {
            self.frame = 0;
            self.cycle = self.cycle.wrapping_add(1);
        }

        if self.abs_frame % self.config.background_frames as u64 == 0 {
            self.kick_background();
        }
    }

    /// Runs one full background pass synchronously on the calling thread.
    pub fn run_background_now(&mut self) {
        // Let an in-flight pass finish first so the two never interleave.
        if !self.background.is_empty() && !self.background.idle(0) {
            self.background.wait(0);
        }
        let exec_time = self.clock.exec_time();
        let dt = self.config.background_frames as f64 / self.config.frame_rate_hz;
        background_pass(
            &self.roster,
            &self.adapters,
            &self.events,
            exec_time,
            dt,
            self.config.nib_timeout_secs,
        );
    }

    pub fn reset(&mut self) {
        self.roster.reset();
        self.cycle = 0;
        self.frame = 0;
    }

    fn kick_background(&mut self) {
        if self.background.is_empty() {
            self.run_background_now();
            return;
        }
        if !self.background.idle(0) && !self.background.try_wait(0) {
            // Still running from the previous cadence point; background work
            // is decoupled from frame timing, so just skip this kick.
            log::debug!("background pass still in flight at frame {}", self.abs_frame);
            return;
        }
        self.background.start(0);
    }

    fn run_phase(&mut self, phase: Phase, players: &Arc<Vec<Arc<Player>>>, dt: f64) {
        let lanes = self.pool.workers().max(1);
        let chunk = players.len().div_ceil(lanes).max(1);

        let mut jobs: Vec<Job> = Vec::with_capacity(lanes);
        let mut start = 0usize;
        while start < players.len() {
            let end = (start + chunk).min(players.len());
            let list = players.clone();
            let probe = self.probe.clone();
            let frame = self.abs_frame;
            jobs.push(Box::new(move || {
                for player in &list[start..end] {
                    phase_step(player, phase, dt);
                    if let Some(probe) = &probe {
                        probe(player, phase, frame);
                    }
                }
            }));
            start = end;
        }
        // Workers rejoin here before the next phase may begin.
        self.pool.run(jobs);

        match phase {
            Phase::Transmit => self.drive_adapters(players, dt, |adapter, ctx| {
                adapter.output_frame(ctx);
            }),
            Phase::Receive => self.drive_adapters(players, dt, |adapter, ctx| {
                adapter.input_frame(ctx);
            }),
            _ => {}
        }
    }

    fn drive_adapters(
        &self,
        players: &Arc<Vec<Arc<Player>>>,
        dt: f64,
        mut visit: impl FnMut(&mut dyn NetAdapter, &AdapterContext<'_>),
    ) {
        let mut adapters = self.adapters.lock().unwrap();
        if adapters.is_empty() {
            return;
        }
        let ctx = AdapterContext {
            exec_time: self.clock.exec_time(),
            dt,
            players,
            roster: self.roster.as_ref(),
            events: self.events.as_ref(),
            nib_timeout_secs: self.config.nib_timeout_secs,
        };
        for adapter in adapters.iter_mut() {
            visit(adapter.as_mut(), &ctx);
        }
    }

    fn notify_list_changes(&self, changes: ListChanges) {
        for (network_id, player_id) in changes.added {
            self.events.push(SimEvent::PlayerAdded {
                network_id,
                player_id,
            });
        }
        for (network_id, player_id) in changes.removed {
            self.events.push(SimEvent::PlayerRemoved {
                network_id,
                player_id,
            });
        }
    }
}

fn phase_step(player: &Player, phase: Phase, dt: f64) {
    if phase != Phase::Dynamics {
        return;
    }
    match player.mode() {
        PlayerMode::Deleted => {}
        _ if player.has_input_nib() => player.drive_from_nib(dt),
        PlayerMode::Active => player.integrate(dt),
        _ => {}
    }
}

/// One background housekeeping pass: apply staged list mutations, give
/// adapters their housekeeping window, then flag timed-out surrogates for
/// removal on the next pass. Never touches an in-flight phase traversal.
fn background_pass(
    roster: &Arc<Roster>,
    adapters: &SharedAdapters,
    events: &Arc<EventLog>,
    exec_time: f64,
    dt: f64,
    timeout_secs: f64,
) {
    let changes = roster.update_player_list();
    for (network_id, player_id) in changes.added {
        events.push(SimEvent::PlayerAdded {
            network_id,
            player_id,
        });
    }
    for (network_id, player_id) in changes.removed {
        events.push(SimEvent::PlayerRemoved {
            network_id,
            player_id,
        });
    }

    let players = roster.snapshot();
    {
        let mut adapters = adapters.lock().unwrap();
        let ctx = AdapterContext {
            exec_time,
            dt,
            players: &players,
            roster: roster.as_ref(),
            events: events.as_ref(),
            nib_timeout_secs: timeout_secs,
        };
        for adapter in adapters.iter_mut() {
            adapter.housekeeping(&ctx);
        }
    }

    for player in players.iter().filter(|p| !p.is_local()) {
        let stale = player
            .with_nib(|nib| nib.is_timed_out(exec_time, timeout_secs).then(|| nib.family().id))
            .flatten();
        if let Some(family_id) = stale {
            if player.set_mode(PlayerMode::DeleteRequest) {
                log::info!(
                    "surrogate {}:{} timed out, flagged for removal",
                    player.network_id(),
                    player.id()
                );
                events.push(SimEvent::NibTimedOut {
                    family_id,
                    player_id: player.id(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::PlayerClass;
    use crate::player::Side;
    use glam::DVec3;

    fn quiet_config() -> ExecConfig {
        ExecConfig {
            tc_threads: 2,
            ..Default::default()
        }
    }

    fn local_player(id: PlayerId) -> Player {
        Player::new(id, &format!("local{id}"), PlayerClass::Aircraft, "F-16C", Side::Blue)
    }

    #[test]
    fn frame_and_cycle_counters_nest() {
        let mut exec = Executive::new(quiet_config()).unwrap();
        for _ in 0..FRAMES_PER_CYCLE as u64 + 1 {
            exec.step_frame(0.02);
        }
        let stats = exec.stats();
        assert_eq!(stats.cycle, 1);
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.abs_frame, FRAMES_PER_CYCLE as u64 + 1);
    }

    #[test]
    fn seeded_players_are_visible_immediately() {
        let exec = Executive::new(quiet_config()).unwrap();
        assert!(exec.seed_player(local_player(1)));
        assert!(!exec.seed_player(local_player(1)));
        assert_eq!(exec.roster().len(), 1);

        let events = exec.drain_events();
        assert!(events.contains(&SimEvent::PlayerAdded {
            network_id: 0,
            player_id: 1
        }));
    }

    #[test]
    fn dynamics_phase_moves_active_players() {
        let mut exec = Executive::new(quiet_config()).unwrap();
        exec.seed_player(local_player(1));
        let player = exec.roster().find(0, 1).unwrap();
        player.set_velocity(DVec3::new(100.0, 0.0, 0.0));

        for _ in 0..50 {
            exec.step_frame(0.02);
        }
        assert!((player.position().x - 100.0).abs() < 1e-6);
    }

    #[test]
    fn staged_add_lands_after_background_pass() {
        let mut exec = Executive::new(quiet_config()).unwrap();
        assert!(exec.add_player(local_player(3)));
        assert_eq!(exec.roster().len(), 0);

        exec.run_background_now();
        assert_eq!(exec.roster().len(), 1);
        assert_eq!(exec.roster().find(0, 3).unwrap().mode(), PlayerMode::Active);
    }

    #[test]
    fn delete_request_prunes_on_background_pass() {
        let mut exec = Executive::new(quiet_config()).unwrap();
        exec.seed_player(local_player(1));
        exec.roster().find(0, 1).unwrap().set_mode(PlayerMode::DeleteRequest);

        exec.run_background_now();
        assert!(exec.roster().is_empty());

        let events = exec.drain_events();
        assert!(events.contains(&SimEvent::PlayerRemoved {
            network_id: 0,
            player_id: 1
        }));
    }

    #[test]
    fn id_generators_wrap_to_floor() {
        let mut cycle = IdCycle::new(100);
        cycle.next = u16::MAX;
        assert_eq!(cycle.next(), u16::MAX);
        assert_eq!(cycle.next(), 100);
        assert_eq!(cycle.next(), 101);
    }

    #[test]
    fn id_generators_share_the_roster_lock() {
        let exec = Executive::new(quiet_config()).unwrap();
        assert_eq!(exec.roster().next_event_id(), 1);
        assert_eq!(exec.roster().next_event_id(), 2);
        assert_eq!(exec.roster().next_weapon_event_id(), 1);
        assert_eq!(exec.roster().next_released_weapon_id(), 1);
    }

    #[test]
    fn reset_restores_seeded_players() {
        let mut exec = Executive::new(quiet_config()).unwrap();
        exec.seed_player(local_player(1));
        exec.seed_player(local_player(2));

        exec.roster().find(0, 2).unwrap().set_mode(PlayerMode::DeleteRequest);
        exec.run_background_now();
        assert_eq!(exec.roster().len(), 1);

        exec.reset();
        assert_eq!(exec.roster().len(), 2);
        assert_eq!(exec.stats().cycle, 0);
    }

    #[test]
    fn zero_frame_rate_is_a_hard_config_error() {
        let config = ExecConfig {
            frame_rate_hz: 0.0,
            ..Default::default()
        };
        assert!(Executive::new(config).is_err());
    }
}
