//! Connection Broker: one direct channel per session over a [`Transport`].
//!
//! The host claims a room code with the transport provider and accepts the
//! first inbound channel; the joiner resolves a typed code and opens a channel
//! to it. Everything above this layer only sees [`BrokerEvent`]s.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, Subscription};
use crate::transport::{ChannelId, Transport, TransportEvent};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Packet, Role, RoomCode};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected { role: Role },
    Data(Packet),
    Error(String),
    Closed,
}

pub struct Broker<T: Transport> {
    transport: T,
    room_code_attempts: u32,
    provider_timeout: Duration,
    rng: StdRng,

    active: bool,
    role: Option<Role>,
    room: Option<RoomCode>,
    channel: Option<ChannelId>,
    open: bool,

    bus: EventBus<BrokerEvent>,
}

impl<T: Transport> Broker<T> {
    pub fn new(transport: T, config: &SyncConfig) -> Self {
        Self::with_rng(transport, config, StdRng::from_entropy())
    }

    /// Uses `rng` for room codes, so tests can predict them.
    pub fn with_rng(transport: T, config: &SyncConfig, rng: StdRng) -> Self {
        Self {
            transport,
            room_code_attempts: config.room_code_attempts,
            provider_timeout: config.provider_timeout,
            rng,
            active: false,
            role: None,
            room: None,
            channel: None,
            open: false,
            bus: EventBus::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<BrokerEvent> {
        self.bus.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room_code(&self) -> Option<&RoomCode> {
        self.room.as_ref()
    }

    /// Claims a fresh room code and starts listening for one opponent.
    ///
    /// Collisions are retried transparently with a new code; once every
    /// attempt is used up the caller gets `RoomAllocationExhausted`.
    pub async fn host_session(&mut self) -> Result<RoomCode, SyncError> {
        if self.active {
            return Err(SyncError::AlreadyConnected);
        }

        for attempt in 1..=self.room_code_attempts {
            let code = RoomCode::generate(&mut self.rng);
            let name = code.endpoint_name();
            self.transport.register(&name);

            match self.await_registration(&name).await {
                Ok(true) => {
                    info!("Hosting room {} (attempt {})", code, attempt);
                    self.active = true;
                    self.role = Some(Role::Host);
                    self.room = Some(code.clone());
                    return Ok(code);
                }
                Ok(false) => {
                    debug!(
                        "Room code {} taken, attempt {}/{}",
                        code, attempt, self.room_code_attempts
                    );
                }
                Err(e) => {
                    self.transport.destroy();
                    self.publish(BrokerEvent::Error(e.to_string()));
                    return Err(e);
                }
            }
        }

        let err = SyncError::RoomAllocationExhausted;
        warn!("{}", err);
        self.publish(BrokerEvent::Error(err.to_string()));
        Err(err)
    }

    async fn await_registration(&mut self, name: &str) -> Result<bool, SyncError> {
        loop {
            let event = timeout(self.provider_timeout, self.transport.next_event())
                .await
                .map_err(|_| SyncError::Transport("transport provider did not answer".into()))?;

            match event {
                Some(TransportEvent::Registered { name: n }) if n == name => return Ok(true),
                Some(TransportEvent::NameTaken { name: n }) if n == name => return Ok(false),
                Some(TransportEvent::Error { message }) => {
                    return Err(SyncError::Transport(message))
                }
                Some(other) => debug!("Ignoring {:?} while registering", other),
                None => return Err(SyncError::Transport("transport closed".into())),
            }
        }
    }

    /// Normalizes `input` and opens a channel to that room's host.
    pub async fn join_session(&mut self, input: &str) -> Result<RoomCode, SyncError> {
        if self.active {
            return Err(SyncError::AlreadyConnected);
        }

        let Some(code) = RoomCode::parse(input) else {
            let err = SyncError::PeerUnreachable(format!("invalid room code '{}'", input.trim()));
            self.publish(BrokerEvent::Error(err.to_string()));
            return Err(err);
        };

        let name = code.endpoint_name();
        info!("Joining room {}", code);
        self.active = true;
        self.role = Some(Role::Client);
        self.room = Some(code.clone());
        self.transport.connect(&name);

        match self.await_channel(&name).await {
            Ok(()) => Ok(code),
            Err(e) => {
                self.teardown();
                self.publish(BrokerEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn await_channel(&mut self, name: &str) -> Result<(), SyncError> {
        let unreachable = || SyncError::PeerUnreachable(format!("no room at '{}'", name));

        loop {
            let event = timeout(self.provider_timeout, self.transport.next_event())
                .await
                .map_err(|_| unreachable())?;

            match event {
                Some(TransportEvent::ChannelOpen { channel }) => {
                    self.channel = Some(channel);
                    self.open = true;
                    info!("Connected to room host on {:?}", channel);
                    self.publish(BrokerEvent::Connected { role: Role::Client });
                    return Ok(());
                }
                Some(TransportEvent::Unavailable { .. }) => return Err(unreachable()),
                Some(TransportEvent::Error { message }) => {
                    return Err(SyncError::PeerUnreachable(message))
                }
                Some(other) => debug!("Ignoring {:?} while joining", other),
                None => return Err(SyncError::Transport("transport closed".into())),
            }
        }
    }

    /// Waits for the next event that matters to the layers above.
    pub async fn next_event(&mut self) -> BrokerEvent {
        loop {
            match self.transport.next_event().await {
                Some(event) => {
                    if let Some(event) = self.translate(event) {
                        return event;
                    }
                }
                None => {
                    warn!("Transport event stream ended");
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Non-blocking variant of [`Broker::next_event`].
    pub fn poll_event(&mut self) -> Option<BrokerEvent> {
        while let Some(event) = self.transport.try_next_event() {
            if let Some(event) = self.translate(event) {
                return Some(event);
            }
        }
        None
    }

    fn translate(&mut self, event: TransportEvent) -> Option<BrokerEvent> {
        match event {
            TransportEvent::Incoming { channel } => {
                if self.active && self.role == Some(Role::Host) && self.channel.is_none() {
                    info!("Accepting opponent on {:?}", channel);
                    self.channel = Some(channel);
                    self.transport.accept(channel);
                } else {
                    warn!("Rejecting extra connection attempt on {:?}", channel);
                    self.transport.reject(channel);
                }
                None
            }

            TransportEvent::ChannelOpen { channel } => {
                if self.channel != Some(channel) || self.open {
                    return None;
                }
                self.open = true;
                let role = self.role.unwrap_or(Role::Host);
                Some(self.publish(BrokerEvent::Connected { role }))
            }

            TransportEvent::Data { channel, packet } => {
                if self.open && self.channel == Some(channel) {
                    Some(self.publish(BrokerEvent::Data(packet)))
                } else {
                    debug!("Dropping {} from foreign channel {:?}", packet, channel);
                    None
                }
            }

            TransportEvent::ChannelClosed { channel } => {
                if self.channel != Some(channel) {
                    return None;
                }
                warn!("Channel {:?} closed by the remote side", channel);
                self.transport.destroy();
                self.teardown();
                Some(self.publish(BrokerEvent::Closed))
            }

            TransportEvent::Error { message } => Some(self.publish(BrokerEvent::Error(message))),

            other => {
                debug!("Ignoring transport event {:?}", other);
                None
            }
        }
    }

    fn publish(&mut self, event: BrokerEvent) -> BrokerEvent {
        self.bus.emit(event.clone());
        event
    }

    fn teardown(&mut self) {
        self.active = false;
        self.role = None;
        self.room = None;
        self.channel = None;
        self.open = false;
    }

    /// Best-effort send; a no-op when no channel is open.
    pub fn send(&mut self, packet: &Packet) {
        let Some(channel) = self.channel.filter(|_| self.open) else {
            debug!("No open channel, dropping {}", packet);
            return;
        };
        if !self.transport.send(channel, packet) {
            debug!("Transport refused {}", packet);
        }
    }

    /// Tears down the channel and the local endpoint. Emits `Closed` every
    /// time it is called, even if nothing was open.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel {
            self.transport.close_channel(channel);
        }
        if self.active {
            info!("Closing session");
            self.transport.destroy();
        }
        self.teardown();
        self.publish(BrokerEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use shared::PacketKind;
    use std::task::Poll;

    fn broker(network: &MemoryNetwork, seed: u64) -> Broker<MemoryTransport> {
        Broker::with_rng(
            network.endpoint(),
            &SyncConfig::default(),
            StdRng::seed_from_u64(seed),
        )
    }

    fn predicted_codes(seed: u64, count: usize) -> Vec<RoomCode> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| RoomCode::generate(&mut rng)).collect()
    }

    async fn connected_pair(network: &MemoryNetwork) -> (Broker<MemoryTransport>, Broker<MemoryTransport>) {
        let mut host = broker(network, 1);
        let mut client = broker(network, 2);

        let code = host.host_session().await.unwrap();
        let typed = code.as_str().to_lowercase();
        let (joined, event) = tokio::join!(client.join_session(&typed), host.next_event());
        assert_eq!(joined.unwrap(), code);
        assert_eq!(event, BrokerEvent::Connected { role: Role::Host });
        (host, client)
    }

    #[tokio::test]
    async fn test_host_retries_taken_codes() {
        let network = MemoryNetwork::new();
        let codes = predicted_codes(9, 3);
        network.occupy(&codes[0].endpoint_name());
        network.occupy(&codes[1].endpoint_name());

        let mut host = broker(&network, 9);
        let code = host.host_session().await.unwrap();
        assert_eq!(code, codes[2]);
        assert_eq!(host.role(), Some(Role::Host));
        assert!(host.is_active());
    }

    #[tokio::test]
    async fn test_host_gives_up_after_five_collisions() {
        let network = MemoryNetwork::new();
        for code in predicted_codes(3, 5) {
            network.occupy(&code.endpoint_name());
        }

        let mut host = broker(&network, 3);
        let mut events = host.subscribe();
        assert_eq!(
            host.host_session().await,
            Err(SyncError::RoomAllocationExhausted)
        );
        assert!(matches!(events.try_recv(), Some(BrokerEvent::Error(_))));
        assert!(!host.is_active());
    }

    #[tokio::test]
    async fn test_join_is_case_insensitive() {
        let network = MemoryNetwork::new();
        let (host, client) = connected_pair(&network).await;
        assert!(host.is_open());
        assert!(client.is_open());
        assert_eq!(client.role(), Some(Role::Client));
        assert_eq!(client.room_code(), host.room_code());
    }

    #[tokio::test]
    async fn test_join_unknown_room_fails() {
        let network = MemoryNetwork::new();
        let mut client = broker(&network, 4);
        let mut events = client.subscribe();

        let result = client.join_session("ZZZZ").await;
        assert!(matches!(result, Err(SyncError::PeerUnreachable(_))));
        assert!(matches!(events.try_recv(), Some(BrokerEvent::Error(_))));
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_join_rejects_malformed_code() {
        let network = MemoryNetwork::new();
        let mut client = broker(&network, 4);
        let result = client.join_session("O0I1").await;
        assert!(matches!(result, Err(SyncError::PeerUnreachable(_))));
    }

    #[tokio::test]
    async fn test_second_opponent_is_rejected() {
        let network = MemoryNetwork::new();
        let (mut host, _client) = connected_pair(&network).await;

        let mut intruder = broker(&network, 5);
        let code = host.room_code().cloned().unwrap();
        let mut join = tokio_test::task::spawn(intruder.join_session(code.as_str()));
        assert!(join.poll().is_pending());

        assert!(host.poll_event().is_none());
        assert!(join.is_woken());
        match join.poll() {
            Poll::Ready(result) => assert!(matches!(result, Err(SyncError::PeerUnreachable(_)))),
            Poll::Pending => panic!("join should have been refused"),
        }
        assert!(host.is_open());
    }

    #[tokio::test]
    async fn test_data_is_forwarded() {
        let network = MemoryNetwork::new();
        let (mut host, mut client) = connected_pair(&network).await;

        client.send(&Packet::PreStartAck);
        assert_eq!(host.next_event().await, BrokerEvent::Data(Packet::PreStartAck));
        assert_eq!(network.sent(PacketKind::PreStartAck), 1);
    }

    #[tokio::test]
    async fn test_send_without_channel_is_noop() {
        let network = MemoryNetwork::new();
        let mut client = broker(&network, 6);
        client.send(&Packet::Ping);
        assert_eq!(network.sent(PacketKind::Ping), 0);
    }

    #[tokio::test]
    async fn test_close_always_emits_closed() {
        let network = MemoryNetwork::new();
        let mut idle = broker(&network, 7);
        let mut events = idle.subscribe();

        idle.close();
        idle.close();
        assert_eq!(events.drain(), vec![BrokerEvent::Closed, BrokerEvent::Closed]);
    }

    #[tokio::test]
    async fn test_remote_close_tears_down() {
        let network = MemoryNetwork::new();
        let (mut host, mut client) = connected_pair(&network).await;
        let code = host.room_code().cloned().unwrap();

        client.close();
        assert_eq!(host.next_event().await, BrokerEvent::Closed);
        assert!(!host.is_active());
        assert!(!network.is_registered(&code.endpoint_name()));

        host.send(&Packet::Ping);
        assert_eq!(network.sent(PacketKind::Ping), 0);
    }

    #[tokio::test]
    async fn test_host_twice_is_refused() {
        let network = MemoryNetwork::new();
        let mut host = broker(&network, 8);
        host.host_session().await.unwrap();
        assert_eq!(host.host_session().await, Err(SyncError::AlreadyConnected));
    }
}
