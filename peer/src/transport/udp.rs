//! UDP transport provider backed by the rendezvous server.
//!
//! Names are registered with and resolved through the rendezvous server.
//! Once a joiner knows the host's address, the channel runs directly between
//! the two sockets: `Open` / `Accept` / `Reject` set it up, `KeepAlive`
//! keeps it alive and `Data` carries protocol packets.

use super::{ChannelId, Transport, TransportEvent};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{Frame, Packet, MAX_DATAGRAM_SIZE};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
const CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct UdpLink {
    addr: SocketAddr,
    name: String,
    outgoing: bool,
    open: bool,
    created: Instant,
    last_heard: Instant,
}

struct UdpState {
    rendezvous: SocketAddr,
    registered: Option<String>,
    pending_register: Option<String>,
    pending_lookup: Option<(String, Instant)>,
    links: HashMap<ChannelId, UdpLink>,
    next_channel: u32,
    events: mpsc::UnboundedSender<TransportEvent>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl UdpState {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Encodes `frame` and queues it for the sender task.
    fn send_frame(&self, frame: &Frame, addr: SocketAddr) -> bool {
        let data = match frame.encode() {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode frame for {}: {}", addr, e);
                return false;
            }
        };

        match self.outgoing.send(Outgoing { data, addr }) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to queue frame for {}: {}", addr, e);
                false
            }
        }
    }

    fn channel_for(&self, addr: SocketAddr) -> Option<ChannelId> {
        self.links
            .iter()
            .find(|(_, link)| link.addr == addr)
            .map(|(channel, _)| *channel)
    }

    fn add_link(&mut self, addr: SocketAddr, name: String, outgoing: bool) -> ChannelId {
        let channel = ChannelId(self.next_channel);
        self.next_channel += 1;
        let now = Instant::now();
        self.links.insert(
            channel,
            UdpLink {
                addr,
                name,
                outgoing,
                open: false,
                created: now,
                last_heard: now,
            },
        );
        channel
    }
}

/// Encoded datagram waiting for the sender task
#[derive(Debug)]
struct Outgoing {
    data: Vec<u8>,
    addr: SocketAddr,
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<UdpState>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl UdpTransport {
    /// Binds `local` and starts the receive and maintenance tasks.
    pub async fn bind(local: &str, rendezvous: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(local).await?);
        info!(
            "Peer socket bound to {} (rendezvous {})",
            socket.local_addr()?,
            rendezvous
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(UdpState {
            rendezvous,
            registered: None,
            pending_register: None,
            pending_lookup: None,
            links: HashMap::new(),
            next_channel: 0,
            events: tx,
            outgoing: out_tx,
        }));

        let mut transport = UdpTransport {
            socket,
            state,
            events: rx,
            tasks: Vec::new(),
        };
        transport.spawn_sender(out_rx);
        transport.spawn_receiver();
        transport.spawn_maintenance();
        Ok(transport)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Drains the outgoing queue. Not tracked in `tasks`, so frames queued
    /// by `destroy` still go out after the transport is dropped; the task
    /// ends once the last queue handle goes away with the shared state.
    fn spawn_sender(&self, mut out_rx: mpsc::UnboundedReceiver<Outgoing>) {
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(Outgoing { data, addr }) = out_rx.recv().await {
                if let Err(e) = socket.send_to(&data, addr).await {
                    warn!("Failed to send frame to {}: {}", addr, e);
                }
            }
        });
    }

    fn spawn_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let state = Arc::clone(&self.state);

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Frame::decode(&buffer[..len]) {
                        Ok(frame) => handle_frame(&mut state.lock(), frame, addr),
                        Err(e) => warn!("Failed to decode frame from {}: {}", addr, e),
                    },
                    Err(e) => {
                        // ICMP port unreachable surfaces here on some platforms
                        debug!("Error receiving frame: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    fn spawn_maintenance(&mut self) {
        let state = Arc::clone(&self.state);

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

            loop {
                interval.tick().await;
                maintain(&mut state.lock(), Instant::now());
            }
        }));
    }
}

fn handle_frame(state: &mut UdpState, frame: Frame, addr: SocketAddr) {
    if addr == state.rendezvous {
        handle_naming_frame(state, frame);
        return;
    }

    match frame {
        Frame::Open { name } => {
            if state.registered.as_deref() != Some(name.as_str()) {
                debug!("Open for '{}' from {} does not match our name", name, addr);
                state.send_frame(&Frame::Reject, addr);
                return;
            }
            match state.channel_for(addr) {
                Some(channel) => {
                    // Joiner resends Open until it sees our answer
                    if state.links.get(&channel).is_some_and(|link| link.open) {
                        state.send_frame(&Frame::Accept, addr);
                    }
                }
                None => {
                    let channel = state.add_link(addr, name, false);
                    info!("Incoming channel {:?} from {}", channel, addr);
                    state.emit(TransportEvent::Incoming { channel });
                }
            }
        }

        Frame::Accept => {
            let Some(channel) = state.channel_for(addr) else {
                return;
            };
            if let Some(link) = state.links.get_mut(&channel) {
                if link.outgoing && !link.open {
                    link.open = true;
                    link.last_heard = Instant::now();
                    info!("Channel {:?} to {} open", channel, addr);
                    state.emit(TransportEvent::ChannelOpen { channel });
                }
            }
        }

        Frame::Reject => {
            let Some(channel) = state.channel_for(addr) else {
                return;
            };
            let pending = state
                .links
                .get(&channel)
                .is_some_and(|link| link.outgoing && !link.open);
            if pending {
                if let Some(link) = state.links.remove(&channel) {
                    state.emit(TransportEvent::Unavailable { name: link.name });
                }
            }
        }

        Frame::KeepAlive => {
            if let Some(channel) = state.channel_for(addr) {
                if let Some(link) = state.links.get_mut(&channel) {
                    link.last_heard = Instant::now();
                }
            }
        }

        Frame::Data(packet) => {
            let Some(channel) = state.channel_for(addr) else {
                debug!("Data from unknown peer {}", addr);
                return;
            };
            let Some(link) = state.links.get_mut(&channel) else {
                return;
            };
            if !link.open {
                return;
            }
            link.last_heard = Instant::now();
            state.emit(TransportEvent::Data { channel, packet });
        }

        Frame::Close => {
            if let Some(channel) = state.channel_for(addr) {
                state.links.remove(&channel);
                info!("Peer {} closed channel {:?}", addr, channel);
                state.emit(TransportEvent::ChannelClosed { channel });
            }
        }

        other => warn!("Unexpected frame from {}: {:?}", addr, other),
    }
}

fn handle_naming_frame(state: &mut UdpState, frame: Frame) {
    match frame {
        Frame::Registered { name } => {
            if state.pending_register.as_deref() == Some(name.as_str()) {
                state.pending_register = None;
                state.registered = Some(name.clone());
                state.emit(TransportEvent::Registered { name });
            }
        }

        Frame::NameTaken { name } => {
            if state.pending_register.as_deref() == Some(name.as_str()) {
                state.pending_register = None;
                state.emit(TransportEvent::NameTaken { name });
            }
        }

        Frame::Found { name, addr } => {
            let matches = state
                .pending_lookup
                .as_ref()
                .is_some_and(|(pending, _)| *pending == name);
            if !matches {
                return;
            }
            state.pending_lookup = None;
            debug!("Resolved '{}' to {}", name, addr);
            state.add_link(addr, name.clone(), true);
            state.send_frame(&Frame::Open { name }, addr);
        }

        Frame::NotFound { name } => {
            let matches = state
                .pending_lookup
                .as_ref()
                .is_some_and(|(pending, _)| *pending == name);
            if matches {
                state.pending_lookup = None;
                state.emit(TransportEvent::Unavailable { name });
            }
        }

        other => warn!("Unexpected frame from rendezvous: {:?}", other),
    }
}

/// Once-per-second housekeeping: keep names and channels alive, retry
/// pending requests and expire anything that has gone quiet.
fn maintain(state: &mut UdpState, now: Instant) {
    let rendezvous = state.rendezvous;

    if let Some(name) = &state.registered {
        state.send_frame(&Frame::Refresh { name: name.clone() }, rendezvous);
    }
    if let Some(name) = &state.pending_register {
        state.send_frame(&Frame::Register { name: name.clone() }, rendezvous);
    }

    if let Some((name, started)) = state.pending_lookup.clone() {
        if now.duration_since(started) >= CHANNEL_TIMEOUT {
            state.pending_lookup = None;
            state.emit(TransportEvent::Unavailable { name });
        } else {
            state.send_frame(&Frame::Lookup { name }, rendezvous);
        }
    }

    let mut expired = Vec::new();
    for (channel, link) in &state.links {
        if link.open {
            if now.duration_since(link.last_heard) >= CHANNEL_TIMEOUT {
                expired.push(*channel);
            } else {
                state.send_frame(&Frame::KeepAlive, link.addr);
            }
        } else if now.duration_since(link.created) >= CHANNEL_TIMEOUT {
            expired.push(*channel);
        } else if link.outgoing {
            state.send_frame(&Frame::Open { name: link.name.clone() }, link.addr);
        }
    }

    for channel in expired {
        let Some(link) = state.links.remove(&channel) else {
            continue;
        };
        if link.open {
            warn!("Channel {:?} to {} timed out", channel, link.addr);
            state.send_frame(&Frame::Close, link.addr);
            state.emit(TransportEvent::ChannelClosed { channel });
        } else if link.outgoing {
            state.emit(TransportEvent::Unavailable { name: link.name });
        }
    }
}

impl Transport for UdpTransport {
    fn register(&mut self, name: &str) {
        let mut state = self.state.lock();
        state.pending_register = Some(name.to_string());
        let rendezvous = state.rendezvous;
        if !state.send_frame(&Frame::Register { name: name.to_string() }, rendezvous) {
            state.pending_register = None;
            state.emit(TransportEvent::Error {
                message: format!("could not reach rendezvous at {}", rendezvous),
            });
        }
    }

    fn connect(&mut self, name: &str) {
        let mut state = self.state.lock();
        state.pending_lookup = Some((name.to_string(), Instant::now()));
        let rendezvous = state.rendezvous;
        if !state.send_frame(&Frame::Lookup { name: name.to_string() }, rendezvous) {
            state.pending_lookup = None;
            state.emit(TransportEvent::Unavailable {
                name: name.to_string(),
            });
        }
    }

    fn accept(&mut self, channel: ChannelId) {
        let mut state = self.state.lock();
        let Some(link) = state.links.get_mut(&channel) else {
            return;
        };
        link.open = true;
        link.last_heard = Instant::now();
        let addr = link.addr;
        state.send_frame(&Frame::Accept, addr);
        state.emit(TransportEvent::ChannelOpen { channel });
    }

    fn reject(&mut self, channel: ChannelId) {
        let mut state = self.state.lock();
        if let Some(link) = state.links.remove(&channel) {
            state.send_frame(&Frame::Reject, link.addr);
        }
    }

    fn send(&mut self, channel: ChannelId, packet: &Packet) -> bool {
        let addr = {
            let state = self.state.lock();
            match state.links.get(&channel) {
                Some(link) if link.open => link.addr,
                _ => return false,
            }
        };
        self.state.lock().send_frame(&Frame::Data(packet.clone()), addr)
    }

    fn close_channel(&mut self, channel: ChannelId) {
        let mut state = self.state.lock();
        if let Some(link) = state.links.remove(&channel) {
            state.send_frame(&Frame::Close, link.addr);
        }
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        let links: Vec<UdpLink> = state.links.drain().map(|(_, link)| link).collect();
        for link in links {
            state.send_frame(&Frame::Close, link.addr);
        }
        state.pending_register = None;
        state.pending_lookup = None;
        if let Some(name) = state.registered.take() {
            let rendezvous = state.rendezvous;
            state.send_frame(&Frame::Unregister { name }, rendezvous);
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.destroy();
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal naming service: remembers one address per name.
    async fn fake_rendezvous() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut names: HashMap<String, SocketAddr> = HashMap::new();
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                let Ok(frame) = Frame::decode(&buf[..len]) else {
                    continue;
                };
                let reply = match frame {
                    Frame::Register { name } => match names.get(&name) {
                        Some(owner) if *owner != from => Some(Frame::NameTaken { name }),
                        _ => {
                            names.insert(name.clone(), from);
                            Some(Frame::Registered { name })
                        }
                    },
                    Frame::Lookup { name } => Some(match names.get(&name) {
                        Some(owner) => Frame::Found { name, addr: *owner },
                        None => Frame::NotFound { name },
                    }),
                    _ => None,
                };
                if let Some(reply) = reply {
                    let _ = socket.send_to(&reply.encode().unwrap(), from).await;
                }
            }
        });

        addr
    }

    async fn next(transport: &mut UdpTransport) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), transport.next_event())
            .await
            .expect("timed out waiting for transport event")
            .expect("event stream closed")
    }

    #[tokio::test]
    async fn test_register_connect_and_exchange() {
        let rendezvous = fake_rendezvous().await;
        let mut host = UdpTransport::bind("127.0.0.1:0", rendezvous).await.unwrap();
        let mut joiner = UdpTransport::bind("127.0.0.1:0", rendezvous).await.unwrap();

        host.register("snake-duel-v1-ABCD");
        assert_eq!(
            next(&mut host).await,
            TransportEvent::Registered { name: "snake-duel-v1-ABCD".into() }
        );

        joiner.connect("snake-duel-v1-ABCD");
        let TransportEvent::Incoming { channel } = next(&mut host).await else {
            panic!("expected incoming channel");
        };
        host.accept(channel);
        assert_eq!(next(&mut host).await, TransportEvent::ChannelOpen { channel });

        let TransportEvent::ChannelOpen { channel: joiner_channel } = next(&mut joiner).await
        else {
            panic!("expected joiner channel to open");
        };

        assert!(joiner.send(joiner_channel, &Packet::Ping));
        assert_eq!(
            next(&mut host).await,
            TransportEvent::Data { channel, packet: Packet::Ping }
        );

        joiner.close_channel(joiner_channel);
        assert_eq!(next(&mut host).await, TransportEvent::ChannelClosed { channel });
    }

    #[tokio::test]
    async fn test_unknown_name_is_unavailable() {
        let rendezvous = fake_rendezvous().await;
        let mut joiner = UdpTransport::bind("127.0.0.1:0", rendezvous).await.unwrap();

        joiner.connect("snake-duel-v1-ZZZZ");
        assert_eq!(
            next(&mut joiner).await,
            TransportEvent::Unavailable { name: "snake-duel-v1-ZZZZ".into() }
        );
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_fails() {
        let rendezvous = fake_rendezvous().await;
        let mut transport = UdpTransport::bind("127.0.0.1:0", rendezvous).await.unwrap();
        assert!(!transport.send(ChannelId(42), &Packet::Ping));
    }

    #[tokio::test]
    async fn test_first_register_on_fresh_socket_succeeds() {
        let rendezvous = fake_rendezvous().await;
        let mut host = UdpTransport::bind("127.0.0.1:0", rendezvous).await.unwrap();

        // Nothing has touched the socket yet, so this is its first datagram
        host.register("snake-duel-v1-FRSH");
        assert_eq!(
            next(&mut host).await,
            TransportEvent::Registered { name: "snake-duel-v1-FRSH".into() }
        );
    }

    #[test]
    fn test_maintenance_expires_quiet_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let mut state = UdpState {
            rendezvous: "127.0.0.1:9".parse().unwrap(),
            registered: None,
            pending_register: None,
            pending_lookup: Some(("snake-duel-v1-LOST".into(), Instant::now())),
            links: HashMap::new(),
            next_channel: 0,
            events: tx,
            outgoing: out_tx,
        };
        let peer: SocketAddr = "127.0.0.1:10".parse().unwrap();
        let channel = state.add_link(peer, "x".into(), false);
        if let Some(link) = state.links.get_mut(&channel) {
            link.open = true;
        }

        let later = Instant::now() + CHANNEL_TIMEOUT + Duration::from_millis(1);
        maintain(&mut state, later);

        let close = out_rx.try_recv().unwrap();
        assert_eq!(close.addr, peer);
        assert_eq!(Frame::decode(&close.data).unwrap(), Frame::Close);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&TransportEvent::Unavailable {
            name: "snake-duel-v1-LOST".into()
        }));
        assert!(events.contains(&TransportEvent::ChannelClosed { channel }));
        assert!(state.links.is_empty());
    }
}
