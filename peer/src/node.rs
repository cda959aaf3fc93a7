//! The application-facing controller that owns one peer's whole stack.
//!
//! A [`PeerNode`] wires the broker, negotiator, readiness coordinator and
//! replicator together. It can be driven two ways: [`PeerNode::run`] multiplexes
//! broker events, user [`Command`]s, protocol timers and the frame clock on one
//! task, while the individual methods let a caller step it by hand.

use crate::broker::{Broker, BrokerEvent};
use crate::config::SyncConfig;
use crate::engine::SimulationEngine;
use crate::error::SyncError;
use crate::events::{EventBus, Subscription};
use crate::negotiator::Negotiator;
use crate::readiness::{Coordinator, Phase, ReadinessAction, ReadyStatus};
use crate::replicator::{Replicator, ReplicatorAction};
use crate::session::Session;
use crate::transport::Transport;
use log::{debug, info, warn};
use shared::{
    Dimensions, Direction, GameOverReport, GameSettings, GridSize, Packet, Role, RoomCode,
    SimulationSnapshot, VisualAssets,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, MissedTickBehavior};

/// Requests from the user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Host,
    Join(String),
    SignalReady,
    RequestStart,
    Rematch,
    UpdateSettings(GameSettings),
    SetDimensions(Dimensions),
    Input(Direction),
    Cancel,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    RoomCreated(RoomCode),
    Connected { role: Role },
    SettingsChanged(GameSettings),
    ReadyChanged(ReadyStatus),
    Countdown(Option<u8>),
    MatchStarted(GridSize),
    Snapshot(Box<SimulationSnapshot>),
    Scores { host: u32, client: u32 },
    GameOver(GameOverReport),
    ReturnedToLobby,
    Error(SyncError),
    ConnectionLost,
}

/// Current time on the runtime clock, so paused-time tests see it advance.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

pub struct PeerNode<T: Transport, E: SimulationEngine> {
    config: SyncConfig,
    session: Session,
    broker: Broker<T>,
    negotiator: Negotiator,
    coordinator: Option<Coordinator>,
    replicator: Option<Replicator>,
    engine: E,
    local_dimensions: Dimensions,
    events: EventBus<NodeEvent>,
}

impl<T: Transport, E: SimulationEngine> PeerNode<T, E> {
    pub fn new(
        transport: T,
        engine: E,
        config: SyncConfig,
        settings: GameSettings,
        local_dimensions: Dimensions,
    ) -> Self {
        let broker = Broker::new(transport, &config);
        Self::with_broker(broker, engine, config, settings, local_dimensions)
    }

    pub fn with_broker(
        broker: Broker<T>,
        engine: E,
        config: SyncConfig,
        settings: GameSettings,
        local_dimensions: Dimensions,
    ) -> Self {
        let negotiator = Negotiator::new(settings, VisualAssets::default(), &config);
        Self {
            config,
            session: Session::default(),
            broker,
            negotiator,
            coordinator: None,
            replicator: None,
            engine,
            local_dimensions,
            events: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<NodeEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn role(&self) -> Option<Role> {
        self.coordinator.as_ref().map(Coordinator::role)
    }

    pub fn settings(&self) -> &GameSettings {
        self.negotiator.settings()
    }

    pub fn assets(&self) -> &VisualAssets {
        self.negotiator.assets()
    }

    pub fn set_assets(&mut self, assets: VisualAssets) {
        self.negotiator.set_assets(assets);
    }

    /// Shared options must be shown disabled on the client.
    pub fn settings_read_only(&self) -> bool {
        self.negotiator.is_read_only()
    }

    pub fn ready_status(&self) -> ReadyStatus {
        self.coordinator
            .as_ref()
            .map(Coordinator::ready_status)
            .unwrap_or_default()
    }

    pub fn phase(&self) -> Option<Phase> {
        self.coordinator.as_ref().map(Coordinator::phase)
    }

    pub fn snapshot(&self) -> Option<&SimulationSnapshot> {
        self.replicator.as_ref().and_then(Replicator::snapshot)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn emit(&mut self, event: NodeEvent) {
        self.events.emit(event);
    }

    /// Registers a fresh room and waits for an opponent in the background.
    pub async fn host(&mut self) -> Result<RoomCode, SyncError> {
        let code = self.broker.host_session().await?;
        self.session.hosting(code.clone());
        self.emit(NodeEvent::RoomCreated(code.clone()));
        Ok(code)
    }

    /// Connects to the room `input` names. Resolves once the channel is open.
    pub async fn join(&mut self, input: &str) -> Result<RoomCode, SyncError> {
        if self.session.active {
            return Err(SyncError::AlreadyConnected);
        }
        if let Some(code) = RoomCode::parse(input) {
            self.session.joining(code);
        }

        match self.broker.join_session(input).await {
            Ok(code) => {
                self.on_connected(Role::Client, now());
                Ok(code)
            }
            Err(e) => {
                self.session.reset();
                Err(e)
            }
        }
    }

    fn on_connected(&mut self, role: Role, now: Instant) {
        info!("Session connected as {}", role);
        self.session.connected(role);
        self.negotiator.on_connected(role, now);
        self.coordinator = Some(Coordinator::new(
            role,
            self.local_dimensions,
            &self.config,
            now,
        ));
        self.replicator = Some(Replicator::with_config(role, &self.config));
        self.emit(NodeEvent::Connected { role });
    }

    /// Drops every per-session component, which cancels all their timers.
    fn teardown(&mut self) {
        self.session.reset();
        self.negotiator.reset();
        self.coordinator = None;
        self.replicator = None;
    }

    pub fn handle_broker_event(&mut self, event: BrokerEvent) {
        let now = now();
        match event {
            BrokerEvent::Connected { role } => self.on_connected(role, now),
            BrokerEvent::Data(packet) => self.handle_packet(&packet, now),
            BrokerEvent::Error(message) => {
                warn!("Connection error: {}", message);
                self.emit(NodeEvent::Error(SyncError::Transport(message)));
            }
            BrokerEvent::Closed => {
                warn!("Connection lost");
                self.teardown();
                self.emit(NodeEvent::ConnectionLost);
            }
        }
    }

    fn handle_packet(&mut self, packet: &Packet, now: Instant) {
        debug!("Received {}", packet);

        if self.negotiator.handle_packet(packet) {
            let settings = self.negotiator.settings().clone();
            self.emit(NodeEvent::SettingsChanged(settings));
        }

        if let Some(coordinator) = self.coordinator.as_mut() {
            let actions = coordinator.handle_packet(packet, now);
            self.apply_readiness(actions, now);
        }

        if let Some(replicator) = self.replicator.as_mut() {
            let actions = replicator.handle_packet(packet);
            self.apply_replicator(actions);
        }
    }

    fn apply_readiness(&mut self, actions: Vec<ReadinessAction>, now: Instant) {
        for action in actions {
            match action {
                ReadinessAction::Send(packet) => self.broker.send(&packet),
                ReadinessAction::ReadyChanged(status) => {
                    self.emit(NodeEvent::ReadyChanged(status))
                }
                ReadinessAction::Countdown(value) => self.emit(NodeEvent::Countdown(value)),
                ReadinessAction::StartMatch(grid) => self.start_match(grid, now),
                ReadinessAction::ReturnToLobby => {
                    if let Some(replicator) = self.replicator.as_mut() {
                        replicator.stop();
                    }
                    self.emit(NodeEvent::ReturnedToLobby);
                }
                ReadinessAction::Failed(err) => {
                    warn!("{}", err);
                    self.emit(NodeEvent::Error(err));
                }
            }
        }
    }

    fn start_match(&mut self, grid: GridSize, now: Instant) {
        self.emit(NodeEvent::MatchStarted(grid));
        let Some(replicator) = self.replicator.as_mut() else {
            return;
        };

        match replicator.role() {
            Role::Host => {
                let actions =
                    replicator.start_host(&mut self.engine, self.negotiator.settings(), grid);
                self.negotiator.on_match_started(now);
                self.apply_replicator(actions);
            }
            Role::Client => replicator.start_client(grid),
        }
    }

    fn apply_replicator(&mut self, actions: Vec<ReplicatorAction>) {
        for action in actions {
            match action {
                ReplicatorAction::Send(packet) => self.broker.send(&packet),
                ReplicatorAction::Snapshot(snapshot) => self.emit(NodeEvent::Snapshot(snapshot)),
                ReplicatorAction::Scores { host, client } => {
                    self.emit(NodeEvent::Scores { host, client })
                }
                ReplicatorAction::GameOver(report) => self.emit(NodeEvent::GameOver(report)),
            }
        }
    }

    pub fn signal_ready(&mut self) -> Result<(), SyncError> {
        let now = now();
        let coordinator = self.coordinator.as_mut().ok_or(SyncError::NotConnected)?;
        let actions = coordinator.signal_ready(now);
        self.apply_readiness(actions, now);
        Ok(())
    }

    pub fn request_start(&mut self) -> Result<(), SyncError> {
        let now = now();
        let coordinator = self.coordinator.as_mut().ok_or(SyncError::NotConnected)?;
        let actions = coordinator.request_start(now)?;
        self.apply_readiness(actions, now);
        Ok(())
    }

    pub fn rematch(&mut self) -> Result<(), SyncError> {
        let now = now();
        let coordinator = self.coordinator.as_mut().ok_or(SyncError::NotConnected)?;
        let actions = coordinator.request_rematch(now)?;
        self.apply_readiness(actions, now);
        Ok(())
    }

    /// Changes the shared settings. Offline this only edits the local copy;
    /// a connected host broadcasts them, a client is refused.
    pub fn update_settings(&mut self, settings: GameSettings) -> Result<(), SyncError> {
        let in_lobby = self
            .coordinator
            .as_ref()
            .map_or(true, Coordinator::in_lobby);
        if let Some(packet) = self.negotiator.update_settings(settings, in_lobby)? {
            self.broker.send(&packet);
        }
        let settings = self.negotiator.settings().clone();
        self.emit(NodeEvent::SettingsChanged(settings));
        Ok(())
    }

    /// Local viewport size, reported to the peer with the next `READY`.
    pub fn set_dimensions(&mut self, dimensions: Dimensions) {
        self.local_dimensions = dimensions;
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.set_local_dimensions(dimensions);
        }
    }

    /// Steers the local avatar. Ignored outside a running match.
    pub fn input(&mut self, direction: Direction) -> Result<(), SyncError> {
        let replicator = self.replicator.as_mut().ok_or(SyncError::NotConnected)?;
        if let Some(packet) = replicator.local_input(direction) {
            self.broker.send(&packet);
        }
        Ok(())
    }

    /// Leaves the session on purpose. Unlike a dropped channel this does
    /// not report `ConnectionLost`.
    pub fn cancel(&mut self) {
        info!("Leaving session");
        self.broker.close();
        self.teardown();
    }

    /// Fires every protocol timer that is due.
    pub fn poll(&mut self) {
        let now = now();
        if let Some(packet) = self.negotiator.poll(now) {
            self.broker.send(&packet);
        }
        if let Some(coordinator) = self.coordinator.as_mut() {
            let actions = coordinator.poll(now);
            self.apply_readiness(actions, now);
        }
    }

    /// One simulation frame. Only the host's replicator does anything here.
    pub fn frame(&mut self) {
        let now = now();
        let Some(replicator) = self.replicator.as_mut() else {
            return;
        };
        let actions = replicator.tick(&mut self.engine, self.negotiator.settings(), now);
        self.apply_replicator(actions);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let init = self.negotiator.next_deadline();
        let timers = self.coordinator.as_ref().and_then(Coordinator::next_deadline);
        match (init, timers) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Handles everything the broker has queued, then due timers.
    pub fn pump(&mut self) {
        while let Some(event) = self.broker.poll_event() {
            self.handle_broker_event(event);
        }
        self.poll();
    }

    /// Waits for and handles a single broker event.
    pub async fn process_next_event(&mut self) {
        let event = self.broker.next_event().await;
        self.handle_broker_event(event);
    }

    pub async fn execute(&mut self, command: Command) -> Result<(), SyncError> {
        debug!("Executing {:?}", command);
        match command {
            Command::Host => self.host().await.map(|_| ()),
            Command::Join(code) => self.join(&code).await.map(|_| ()),
            Command::SignalReady => self.signal_ready(),
            Command::RequestStart => self.request_start(),
            Command::Rematch => self.rematch(),
            Command::UpdateSettings(settings) => self.update_settings(settings),
            Command::SetDimensions(dimensions) => {
                self.set_dimensions(dimensions);
                Ok(())
            }
            Command::Input(direction) => self.input(direction),
            Command::Cancel | Command::Shutdown => {
                self.cancel();
                Ok(())
            }
        }
    }

    /// Main loop. Returns after `Shutdown` or once every command sender is gone.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut frames = interval(self.config.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                event = self.broker.next_event() => self.handle_broker_event(event),

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        info!("Shutting down peer node");
                        self.cancel();
                        break;
                    }
                    Some(command) => {
                        if let Err(err) = self.execute(command).await {
                            warn!("Command failed: {}", err);
                            self.emit(NodeEvent::Error(err));
                        }
                    }
                },

                _ = wait_until(deadline) => self.poll(),

                _ = frames.tick() => self.frame(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ArenaEngine;
    use crate::session::ConnectionStatus;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{Difficulty, PacketKind};

    type TestNode = PeerNode<MemoryTransport, ArenaEngine>;

    fn node(network: &MemoryNetwork, seed: u64) -> TestNode {
        let config = SyncConfig::default();
        let broker = Broker::with_rng(network.endpoint(), &config, StdRng::seed_from_u64(seed));
        PeerNode::with_broker(
            broker,
            ArenaEngine::with_rng(StdRng::seed_from_u64(seed)),
            config,
            GameSettings::default(),
            Dimensions::new(800, 600),
        )
    }

    async fn connected(network: &MemoryNetwork) -> (TestNode, TestNode) {
        let mut host = node(network, 1);
        let mut client = node(network, 2);
        let code = host.host().await.unwrap();
        let (joined, ()) = tokio::join!(client.join(code.as_str()), host.process_next_event());
        assert_eq!(joined.unwrap(), code);
        (host, client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_and_join() {
        let network = MemoryNetwork::new();
        let mut host = node(&network, 1);
        let mut host_events = host.subscribe();
        let mut client = node(&network, 2);
        let mut client_events = client.subscribe();

        let code = host.host().await.unwrap();
        assert!(matches!(
            host_events.drain().as_slice(),
            [NodeEvent::RoomCreated(_)]
        ));
        assert!(!host.session().is_connected());

        let (joined, ()) = tokio::join!(client.join(code.as_str()), host.process_next_event());
        joined.unwrap();

        assert_eq!(host.role(), Some(Role::Host));
        assert_eq!(client.role(), Some(Role::Client));
        assert!(client.session().is_connected());
        assert_eq!(host_events.drain(), vec![NodeEvent::Connected { role: Role::Host }]);
        assert_eq!(
            client_events.drain(),
            vec![NodeEvent::Connected { role: Role::Client }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_shows_connecting_until_open() {
        let network = MemoryNetwork::new();
        let mut host = node(&network, 1);
        let mut client = node(&network, 2);
        let code = host.host().await.unwrap();

        {
            // The host has not accepted yet, so the channel cannot open
            let mut join = tokio_test::task::spawn(client.join(code.as_str()));
            tokio_test::assert_pending!(join.poll());
        }
        assert_eq!(client.session().status, ConnectionStatus::Connecting);
        assert_eq!(client.session().role, Some(Role::Client));
        assert_eq!(client.session().room_id, Some(code));

        let mut lonely = node(&network, 3);
        assert!(lonely.join("ZZZZ").await.is_err());
        assert_eq!(lonely.session(), &Session::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_need_a_session() {
        let network = MemoryNetwork::new();
        let mut lonely = node(&network, 3);

        assert_eq!(lonely.signal_ready(), Err(SyncError::NotConnected));
        assert_eq!(lonely.request_start(), Err(SyncError::NotConnected));
        assert_eq!(lonely.input(Direction::Up), Err(SyncError::NotConnected));

        let hard = GameSettings {
            difficulty: Difficulty::Hard,
            ..GameSettings::default()
        };
        assert_eq!(lonely.update_settings(hard.clone()), Ok(()));
        assert_eq!(lonely.settings(), &hard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_cannot_drive_the_session() {
        let network = MemoryNetwork::new();
        let (_host, mut client) = connected(&network).await;

        assert!(client.settings_read_only());
        assert_eq!(
            client.update_settings(GameSettings::default()),
            Err(SyncError::SettingsReadOnly)
        );
        assert_eq!(client.request_start(), Err(SyncError::NotHost));
        assert_eq!(client.rematch(), Err(SyncError::NotHost));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_reaches_client() {
        let network = MemoryNetwork::new();
        let (mut host, mut client) = connected(&network).await;
        let mut client_events = client.subscribe();

        let hard = GameSettings {
            difficulty: Difficulty::Hard,
            ..GameSettings::default()
        };
        host.update_settings(hard.clone()).unwrap();

        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        host.pump();
        client.pump();

        assert_eq!(network.sent(PacketKind::Init), 1);
        assert_eq!(client.settings(), &hard);
        assert!(client_events
            .drain()
            .contains(&NodeEvent::SettingsChanged(hard)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_reports_connection_lost() {
        let network = MemoryNetwork::new();
        let (mut host, mut client) = connected(&network).await;
        let mut host_events = host.subscribe();
        let mut client_events = client.subscribe();

        client.cancel();
        host.pump();

        assert!(client_events.drain().is_empty());
        assert_eq!(host_events.drain(), vec![NodeEvent::ConnectionLost]);
        assert!(host.role().is_none());
        assert!(host.next_deadline().is_none());
        assert!(!host.session().active);
    }
}
