//! State Replicator: full snapshots host to client, inputs client to host.
//!
//! The host owns the simulation and ships a complete `UPDATE` after every
//! tick that moved something. The client never simulates; it replaces its
//! copy with each received snapshot and applies `GAME_OVER` verbatim.

use crate::config::SyncConfig;
use crate::engine::{EngineEvent, MoveClock, SimulationEngine, TickInput};
use log::info;
use shared::{Direction, GameOverReport, GameSettings, GridSize, Packet, Role, SimulationSnapshot};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicatorAction {
    Send(Packet),
    Snapshot(Box<SimulationSnapshot>),
    Scores { host: u32, client: u32 },
    GameOver(GameOverReport),
}

pub struct Replicator {
    role: Role,
    grid: Option<GridSize>,
    snapshot: Option<SimulationSnapshot>,
    pending_remote: Option<Direction>,
    pending_local: Option<Direction>,
    clock: MoveClock,
    outcome: Option<GameOverReport>,
    game_over_offsets: Vec<Duration>,
    /// Due times of the remaining `GAME_OVER` copies.
    game_over_resends: Vec<Instant>,
}

impl Replicator {
    pub fn new(role: Role) -> Self {
        Self::with_config(role, &SyncConfig::default())
    }

    pub fn with_config(role: Role, config: &SyncConfig) -> Self {
        Self {
            role,
            grid: None,
            snapshot: None,
            pending_remote: None,
            pending_local: None,
            clock: MoveClock::new(),
            outcome: None,
            game_over_offsets: config.game_over_offsets.clone(),
            game_over_resends: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn grid(&self) -> Option<GridSize> {
        self.grid
    }

    pub fn snapshot(&self) -> Option<&SimulationSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn outcome(&self) -> Option<&GameOverReport> {
        self.outcome.as_ref()
    }

    /// A match was started and has not ended yet.
    pub fn is_running(&self) -> bool {
        self.grid.is_some() && self.outcome.is_none()
    }

    fn reset(&mut self, grid: GridSize) {
        self.grid = Some(grid);
        self.snapshot = None;
        self.pending_remote = None;
        self.pending_local = None;
        self.outcome = None;
        self.game_over_resends.clear();
        self.clock.reset();
    }

    /// Host: builds the opening arena. The client first sees it with the
    /// first tick's `UPDATE`.
    pub fn start_host<E: SimulationEngine>(
        &mut self,
        engine: &mut E,
        settings: &GameSettings,
        grid: GridSize,
    ) -> Vec<ReplicatorAction> {
        self.reset(grid);
        let snapshot = engine.initial(settings, grid);
        info!("Match running on {}x{}", grid.width, grid.height);

        let actions = vec![ReplicatorAction::Snapshot(Box::new(snapshot.clone()))];
        self.snapshot = Some(snapshot);
        actions
    }

    /// Client: waits for the host's first `UPDATE`.
    pub fn start_client(&mut self, grid: GridSize) {
        self.reset(grid);
        info!("Match running on {}x{}, waiting for snapshots", grid.width, grid.height);
    }

    pub fn stop(&mut self) {
        self.grid = None;
        self.game_over_resends.clear();
        self.pending_remote = None;
        self.pending_local = None;
    }

    /// Latest remote input wins; earlier unconsumed ones are dropped.
    pub fn queue_remote_input(&mut self, direction: Direction) {
        if self.role == Role::Host && self.is_running() {
            self.pending_remote = Some(direction);
        }
    }

    /// Routes a local steering command. The client gets the `INPUT` packet
    /// to send; the host keeps it for its next tick.
    pub fn local_input(&mut self, direction: Direction) -> Option<Packet> {
        if !self.is_running() {
            return None;
        }
        match self.role {
            Role::Client => Some(Packet::Input { direction }),
            Role::Host => {
                self.pending_local = Some(direction);
                None
            }
        }
    }

    /// Host only: advances the simulation if an avatar is due to move.
    pub fn tick<E: SimulationEngine>(
        &mut self,
        engine: &mut E,
        settings: &GameSettings,
        now: Instant,
    ) -> Vec<ReplicatorAction> {
        let mut actions = Vec::new();
        if self.role != Role::Host {
            return actions;
        }
        self.resend_game_over(now, &mut actions);
        if !self.is_running() {
            return actions;
        }
        let (Some(grid), Some(prev)) = (self.grid, self.snapshot.as_ref()) else {
            return actions;
        };

        let (host_moves, client_moves) = self.clock.due(prev, settings.difficulty, now);
        if !(host_moves || client_moves) {
            return actions;
        }

        let input = TickInput {
            host: self.pending_local.take(),
            client: self.pending_remote.take(),
            host_moves,
            client_moves,
        };
        let outcome = engine.step(prev, settings, &input, grid);

        for event in outcome.events {
            match event {
                EngineEvent::ScoreUpdate { host, client } => {
                    actions.push(ReplicatorAction::Scores { host, client });
                }
                EngineEvent::GameOver(report) => {
                    info!("Game over: {}", report.message);
                    for offset in &self.game_over_offsets {
                        if offset.is_zero() {
                            actions.push(ReplicatorAction::Send(Packet::GameOver {
                                report: report.clone(),
                            }));
                        } else {
                            self.game_over_resends.push(now + *offset);
                        }
                    }
                    actions.push(ReplicatorAction::GameOver(report.clone()));
                    self.outcome = Some(report);
                }
            }
        }

        let snapshot = outcome.snapshot;
        actions.push(ReplicatorAction::Send(Packet::Update {
            snapshot: Box::new(snapshot.clone()),
        }));
        actions.push(ReplicatorAction::Snapshot(Box::new(snapshot.clone())));
        self.snapshot = Some(snapshot);
        actions
    }

    /// Host: the terminal report goes out a few times, since nothing else
    /// would carry it once ticking stops.
    fn resend_game_over(&mut self, now: Instant, actions: &mut Vec<ReplicatorAction>) {
        let Some(report) = self.outcome.as_ref() else {
            return;
        };
        let before = self.game_over_resends.len();
        self.game_over_resends.retain(|due| *due > now);
        for _ in self.game_over_resends.len()..before {
            actions.push(ReplicatorAction::Send(Packet::GameOver {
                report: report.clone(),
            }));
        }
    }

    pub fn handle_packet(&mut self, packet: &Packet) -> Vec<ReplicatorAction> {
        let mut actions = Vec::new();
        if self.grid.is_none() {
            return actions;
        }

        match (self.role, packet) {
            (Role::Client, Packet::Update { snapshot }) => {
                let (host, client) = snapshot.scores();
                self.snapshot = Some(snapshot.as_ref().clone());
                actions.push(ReplicatorAction::Snapshot(snapshot.clone()));
                actions.push(ReplicatorAction::Scores { host, client });
            }
            (Role::Client, Packet::GameOver { report }) => {
                if self.outcome.as_ref() != Some(report) {
                    info!("Game over: {}", report.message);
                    self.outcome = Some(report.clone());
                    actions.push(ReplicatorAction::GameOver(report.clone()));
                }
            }
            (Role::Host, Packet::Input { direction }) => self.queue_remote_input(*direction),
            _ => {}
        }

        actions
    }
}
