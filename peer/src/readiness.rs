//! Readiness Coordinator: lobby readiness, start handshake and countdown.
//!
//! Nothing here blocks or sleeps. Inputs are local calls and inbound packets,
//! each stamped with the current instant; outputs are [`ReadinessAction`]s
//! for the owner to carry out. Timers live in a [`Scheduler`] that the owner
//! drains through [`Coordinator::poll`], so dropping the coordinator cancels
//! every pending heartbeat, retry and countdown tick at once.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::negotiator::DimensionExchange;
use crate::timers::Scheduler;
use log::{debug, info, warn};
use shared::{Dimensions, GridSize, Packet, Role};
use std::time::{Duration, Instant};

/// Whether each side has finished loading and is prepared to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadyStatus {
    pub host: bool,
    pub client: bool,
}

impl ReadyStatus {
    pub fn get(&self, role: Role) -> bool {
        match role {
            Role::Host => self.host,
            Role::Client => self.client,
        }
    }

    pub fn set(&mut self, role: Role, ready: bool) {
        match role {
            Role::Host => self.host = ready,
            Role::Client => self.client = ready,
        }
    }

    pub fn both(&self) -> bool {
        self.host && self.client
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    /// Host sent `PRE_START_CHECK` this many times without an answer.
    AwaitingAck { attempts: u32 },
    /// Host will broadcast `next` on the following tick; 0 means start.
    Countdown { next: u8 },
    InMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessAction {
    Send(Packet),
    ReadyChanged(ReadyStatus),
    /// Value to display, `None` once the countdown is over.
    Countdown(Option<u8>),
    StartMatch(GridSize),
    ReturnToLobby,
    Failed(SyncError),
}

#[derive(Debug)]
enum Timer {
    Resend(Packet),
    Heartbeat,
    HandshakeRetry,
    CountdownTick,
}

pub struct Coordinator {
    role: Role,
    phase: Phase,
    ready: ReadyStatus,
    countdown: Option<u8>,
    dimensions: DimensionExchange,
    timers: Scheduler<Timer>,

    ready_offsets: Vec<Duration>,
    heartbeat_interval: Duration,
    retry_interval: Duration,
    max_attempts: u32,
    countdown_from: u8,
    countdown_step: Duration,
    resend_gap: Duration,
    start_offsets: Vec<Duration>,
    rematch_offsets: Vec<Duration>,
}

impl Coordinator {
    pub fn new(role: Role, local: Dimensions, config: &SyncConfig, now: Instant) -> Self {
        let mut timers = Scheduler::new();
        timers.schedule(now + config.heartbeat_interval, Timer::Heartbeat);

        Self {
            role,
            phase: Phase::Lobby,
            ready: ReadyStatus::default(),
            countdown: None,
            dimensions: DimensionExchange::new(config.tile_size, local),
            timers,
            ready_offsets: config.ready_offsets.clone(),
            heartbeat_interval: config.heartbeat_interval,
            retry_interval: config.handshake_retry_interval,
            max_attempts: config.handshake_max_attempts,
            countdown_from: config.countdown_from,
            countdown_step: config.countdown_step,
            resend_gap: config.countdown_resend_gap,
            start_offsets: config.start_offsets.clone(),
            rematch_offsets: config.rematch_offsets.clone(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ready_status(&self) -> ReadyStatus {
        self.ready
    }

    pub fn countdown(&self) -> Option<u8> {
        self.countdown
    }

    pub fn in_lobby(&self) -> bool {
        self.phase == Phase::Lobby
    }

    pub fn dimensions(&self) -> &DimensionExchange {
        &self.dimensions
    }

    /// Takes effect from the next `READY` sent.
    pub fn set_local_dimensions(&mut self, local: Dimensions) {
        self.dimensions.set_local(local);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn ready_packet(&self) -> Packet {
        Packet::Ready {
            role: self.role,
            dimensions: self.dimensions.local(),
        }
    }

    /// Sends `packet` now and at every later offset.
    fn broadcast(
        &mut self,
        packet: Packet,
        offsets: &[Duration],
        now: Instant,
        actions: &mut Vec<ReadinessAction>,
    ) {
        for offset in offsets {
            if offset.is_zero() {
                actions.push(ReadinessAction::Send(packet.clone()));
            } else {
                self.timers.schedule(now + *offset, Timer::Resend(packet.clone()));
            }
        }
    }

    /// Marks the local side ready and announces it redundantly.
    pub fn signal_ready(&mut self, now: Instant) -> Vec<ReadinessAction> {
        let mut actions = Vec::new();
        if self.phase == Phase::InMatch {
            debug!("Ignoring ready signal during a match");
            return actions;
        }

        if !self.ready.get(self.role) {
            self.ready.set(self.role, true);
            info!("Local side ({}) ready", self.role);
            actions.push(ReadinessAction::ReadyChanged(self.ready));
        }

        let offsets = self.ready_offsets.clone();
        self.broadcast(self.ready_packet(), &offsets, now, &mut actions);
        actions
    }

    pub fn handle_packet(&mut self, packet: &Packet, now: Instant) -> Vec<ReadinessAction> {
        let mut actions = Vec::new();

        match packet {
            Packet::Ready { role, dimensions } => {
                if *role == self.role {
                    debug!("Ignoring READY carrying our own role");
                } else if self.phase != Phase::InMatch {
                    self.dimensions.record_peer(*dimensions);
                    if !self.ready.get(*role) {
                        self.ready.set(*role, true);
                        info!("Peer ({}) ready with {}x{}", role, dimensions.width, dimensions.height);
                        actions.push(ReadinessAction::ReadyChanged(self.ready));
                    }
                }
            }

            Packet::Ping => {
                if self.phase != Phase::InMatch && self.ready.get(self.role) {
                    actions.push(ReadinessAction::Send(self.ready_packet()));
                }
            }

            Packet::PreStartCheck if self.role == Role::Client => {
                debug!("Answering PRE_START_CHECK");
                actions.push(ReadinessAction::Send(Packet::PreStartAck));
            }

            Packet::PreStartAck if self.role == Role::Host => {
                if let Phase::AwaitingAck { attempts } = self.phase {
                    info!("Start handshake acknowledged after {} attempt(s)", attempts);
                    self.timers.cancel_where(|t| matches!(t, Timer::HandshakeRetry));
                    self.phase = Phase::Countdown {
                        next: self.countdown_from,
                    };
                    self.countdown_tick(now, &mut actions);
                }
            }

            Packet::Countdown { value } if self.role == Role::Client => {
                let stale = self.countdown.is_some_and(|shown| *value >= shown);
                if self.phase == Phase::InMatch || stale {
                    debug!("Dropping stale COUNTDOWN {}", value);
                } else {
                    self.countdown = Some(*value);
                    actions.push(ReadinessAction::Countdown(Some(*value)));
                }
            }

            Packet::StartGame { grid } if self.role == Role::Client => {
                if self.phase != Phase::InMatch {
                    info!("Host started the match on a {}x{} grid", grid.width, grid.height);
                    self.begin_match();
                    actions.push(ReadinessAction::Countdown(None));
                    actions.push(ReadinessAction::StartMatch(*grid));
                }
            }

            Packet::Rematch if self.role == Role::Client => {
                // Later copies of the same request find a fresh lobby
                if self.phase == Phase::Lobby && self.countdown.is_none() {
                    debug!("Dropping duplicate REMATCH");
                } else {
                    info!("Host requested a rematch");
                    actions.extend(self.enter_lobby(now));
                }
            }

            _ => {}
        }

        actions
    }

    /// Host only: verify the client is alive, then count down and start.
    pub fn request_start(&mut self, now: Instant) -> Result<Vec<ReadinessAction>, SyncError> {
        if self.role != Role::Host {
            return Err(SyncError::NotHost);
        }
        match self.phase {
            Phase::AwaitingAck { .. } | Phase::Countdown { .. } => {
                return Err(SyncError::StartInProgress)
            }
            Phase::InMatch => return Err(SyncError::NotInLobby),
            Phase::Lobby => {}
        }
        if !self.ready.both() {
            return Err(SyncError::PeersNotReady);
        }

        info!("Starting handshake");
        self.timers
            .cancel_where(|t| matches!(t, Timer::Resend(Packet::Rematch)));
        self.phase = Phase::AwaitingAck { attempts: 1 };
        self.timers
            .schedule(now + self.retry_interval, Timer::HandshakeRetry);
        Ok(vec![ReadinessAction::Send(Packet::PreStartCheck)])
    }

    /// Host only: tell the client and go back to the lobby together.
    pub fn request_rematch(&mut self, now: Instant) -> Result<Vec<ReadinessAction>, SyncError> {
        if self.role != Role::Host {
            return Err(SyncError::NotHost);
        }

        // Scheduled after entering the lobby, which cancels pending sends
        let lobby = self.enter_lobby(now);
        let mut actions = Vec::new();
        let offsets = self.rematch_offsets.clone();
        self.broadcast(Packet::Rematch, &offsets, now, &mut actions);
        actions.extend(lobby);
        Ok(actions)
    }

    /// Starts a fresh lobby phase: both flags cleared, countdown and peer
    /// dimensions forgotten, every timer but the heartbeat cancelled.
    pub fn enter_lobby(&mut self, now: Instant) -> Vec<ReadinessAction> {
        self.phase = Phase::Lobby;
        self.ready = ReadyStatus::default();
        self.countdown = None;
        self.dimensions.clear_peer();

        self.timers.cancel_where(|t| !matches!(t, Timer::Heartbeat));
        if !self.timers.contains(|t| matches!(t, Timer::Heartbeat)) {
            self.timers
                .schedule(now + self.heartbeat_interval, Timer::Heartbeat);
        }

        vec![
            ReadinessAction::ReturnToLobby,
            ReadinessAction::ReadyChanged(self.ready),
        ]
    }

    fn begin_match(&mut self) {
        self.phase = Phase::InMatch;
        self.countdown = None;
        self.timers
            .cancel_where(|t| matches!(t, Timer::Resend(Packet::Ready { .. })));
    }

    fn countdown_tick(&mut self, now: Instant, actions: &mut Vec<ReadinessAction>) {
        let Phase::Countdown { next } = self.phase else {
            return;
        };

        if next > 0 {
            info!("Countdown {}", next);
            let packet = Packet::Countdown { value: next };
            let offsets = [Duration::ZERO, self.resend_gap];
            self.broadcast(packet, &offsets, now, actions);

            self.countdown = Some(next);
            actions.push(ReadinessAction::Countdown(Some(next)));
            self.phase = Phase::Countdown { next: next - 1 };
            self.timers
                .schedule(now + self.countdown_step, Timer::CountdownTick);
            return;
        }

        let grid = self.dimensions.negotiate();
        info!("Countdown finished, starting on a {}x{} grid", grid.width, grid.height);
        self.begin_match();
        actions.push(ReadinessAction::Countdown(None));
        actions.push(ReadinessAction::StartMatch(grid));

        let offsets = self.start_offsets.clone();
        self.broadcast(Packet::StartGame { grid }, &offsets, now, actions);
    }

    fn handshake_retry(&mut self, now: Instant, actions: &mut Vec<ReadinessAction>) {
        let Phase::AwaitingAck { attempts } = self.phase else {
            return;
        };

        if attempts >= self.max_attempts {
            warn!("No PRE_START_ACK after {} attempts, giving up", attempts);
            self.phase = Phase::Lobby;
            actions.push(ReadinessAction::Failed(SyncError::ClientUnresponsive));
            return;
        }

        debug!("Retrying PRE_START_CHECK ({}/{})", attempts + 1, self.max_attempts);
        self.phase = Phase::AwaitingAck {
            attempts: attempts + 1,
        };
        actions.push(ReadinessAction::Send(Packet::PreStartCheck));
        self.timers
            .schedule(now + self.retry_interval, Timer::HandshakeRetry);
    }

    fn heartbeat(&mut self, now: Instant, actions: &mut Vec<ReadinessAction>) {
        self.timers
            .schedule(now + self.heartbeat_interval, Timer::Heartbeat);
        if self.phase == Phase::InMatch {
            return;
        }

        if self.ready.get(self.role) {
            actions.push(ReadinessAction::Send(self.ready_packet()));
        }
        if !self.ready.get(self.role.opposite()) {
            actions.push(ReadinessAction::Send(Packet::Ping));
        }
    }

    /// Fires every timer due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<ReadinessAction> {
        let mut actions = Vec::new();

        loop {
            let due = self.timers.pop_due(now);
            if due.is_empty() {
                break;
            }
            for timer in due {
                match timer {
                    Timer::Resend(packet) => actions.push(ReadinessAction::Send(packet)),
                    Timer::Heartbeat => self.heartbeat(now, &mut actions),
                    Timer::HandshakeRetry => self.handshake_retry(now, &mut actions),
                    Timer::CountdownTick => self.countdown_tick(now, &mut actions),
                }
            }
        }

        actions
    }
}
