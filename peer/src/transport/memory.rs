//! In-process transport provider.
//!
//! All endpoints created from one [`MemoryNetwork`] share a namespace and
//! deliver to each other through in-memory queues. The network can drop
//! chosen packet kinds or sever every channel to simulate a hostile link.

use super::{ChannelId, Transport, TransportEvent};
use log::debug;
use parking_lot::Mutex;
use shared::{Packet, PacketKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

type EndpointId = u32;

#[derive(Debug)]
struct Link {
    name: String,
    host: EndpointId,
    joiner: EndpointId,
    open: bool,
}

impl Link {
    fn other(&self, endpoint: EndpointId) -> EndpointId {
        if endpoint == self.host {
            self.joiner
        } else {
            self.host
        }
    }
}

#[derive(Default)]
struct NetworkState {
    next_endpoint: EndpointId,
    next_channel: u32,
    endpoints: HashMap<EndpointId, mpsc::UnboundedSender<TransportEvent>>,
    names: HashMap<String, EndpointId>,
    links: HashMap<ChannelId, Link>,
    blackhole: HashSet<PacketKind>,
    /// Remaining copies of each kind to lose before delivery resumes.
    drop_next: HashMap<PacketKind, usize>,
    sent: HashMap<PacketKind, usize>,
}

impl NetworkState {
    fn notify(&self, endpoint: EndpointId, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(&endpoint) {
            let _ = tx.send(event);
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.next_endpoint;
        state.next_endpoint += 1;
        state.endpoints.insert(id, tx);

        MemoryTransport {
            id,
            network: self.clone(),
            rx,
        }
    }

    /// Claims `name` for nobody in particular, so hosts see it as taken.
    pub fn occupy(&self, name: &str) {
        self.state.lock().names.insert(name.to_string(), EndpointId::MAX);
    }

    /// Silently drops every packet of `kind` from now on.
    pub fn set_blackhole(&self, kind: PacketKind) {
        self.state.lock().blackhole.insert(kind);
    }

    /// Drops only the next `count` packets of `kind`.
    pub fn drop_next(&self, kind: PacketKind, count: usize) {
        self.state.lock().drop_next.insert(kind, count);
    }

    pub fn clear_blackholes(&self) {
        self.state.lock().blackhole.clear();
    }

    /// Abruptly closes every channel, notifying both ends.
    pub fn sever(&self) {
        let mut state = self.state.lock();
        let links: Vec<(ChannelId, Link)> = state.links.drain().collect();
        for (channel, link) in links {
            state.notify(link.host, TransportEvent::ChannelClosed { channel });
            state.notify(link.joiner, TransportEvent::ChannelClosed { channel });
        }
    }

    /// Number of packets of `kind` handed to an open channel, delivered or not.
    pub fn sent(&self, kind: PacketKind) -> usize {
        self.state.lock().sent.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().names.contains_key(name)
    }
}

pub struct MemoryTransport {
    id: EndpointId,
    network: MemoryNetwork,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport for MemoryTransport {
    fn register(&mut self, name: &str) {
        let mut state = self.network.state.lock();
        let event = match state.names.get(name) {
            Some(owner) if *owner != self.id => TransportEvent::NameTaken {
                name: name.to_string(),
            },
            _ => {
                state.names.insert(name.to_string(), self.id);
                TransportEvent::Registered {
                    name: name.to_string(),
                }
            }
        };
        state.notify(self.id, event);
    }

    fn connect(&mut self, name: &str) {
        let mut state = self.network.state.lock();
        let host = match state.names.get(name) {
            Some(host) if state.endpoints.contains_key(host) => *host,
            _ => {
                state.notify(
                    self.id,
                    TransportEvent::Unavailable {
                        name: name.to_string(),
                    },
                );
                return;
            }
        };

        let channel = ChannelId(state.next_channel);
        state.next_channel += 1;
        state.links.insert(
            channel,
            Link {
                name: name.to_string(),
                host,
                joiner: self.id,
                open: false,
            },
        );
        state.notify(host, TransportEvent::Incoming { channel });
    }

    fn accept(&mut self, channel: ChannelId) {
        let mut state = self.network.state.lock();
        let Some(link) = state.links.get_mut(&channel) else {
            return;
        };
        link.open = true;
        let (host, joiner) = (link.host, link.joiner);
        state.notify(host, TransportEvent::ChannelOpen { channel });
        state.notify(joiner, TransportEvent::ChannelOpen { channel });
    }

    fn reject(&mut self, channel: ChannelId) {
        let mut state = self.network.state.lock();
        if let Some(link) = state.links.remove(&channel) {
            state.notify(link.joiner, TransportEvent::Unavailable { name: link.name });
        }
    }

    fn send(&mut self, channel: ChannelId, packet: &Packet) -> bool {
        let mut state = self.network.state.lock();
        let peer = match state.links.get(&channel) {
            Some(link) if link.open => link.other(self.id),
            _ => return false,
        };

        let kind = packet.kind();
        *state.sent.entry(kind).or_insert(0) += 1;
        if state.blackhole.contains(&kind) {
            debug!("Blackholed {} on channel {:?}", kind, channel);
            return true;
        }
        if let Some(remaining) = state.drop_next.get_mut(&kind).filter(|n| **n > 0) {
            *remaining -= 1;
            debug!("Lost {} on channel {:?}", kind, channel);
            return true;
        }

        state.notify(
            peer,
            TransportEvent::Data {
                channel,
                packet: packet.clone(),
            },
        );
        true
    }

    fn close_channel(&mut self, channel: ChannelId) {
        let mut state = self.network.state.lock();
        if let Some(link) = state.links.remove(&channel) {
            state.notify(link.other(self.id), TransportEvent::ChannelClosed { channel });
        }
    }

    fn destroy(&mut self) {
        let mut state = self.network.state.lock();
        let id = self.id;
        state.names.retain(|_, owner| *owner != id);

        let owned: Vec<ChannelId> = state
            .links
            .iter()
            .filter(|(_, link)| link.host == id || link.joiner == id)
            .map(|(channel, _)| *channel)
            .collect();
        for channel in owned {
            if let Some(link) = state.links.remove(&channel) {
                state.notify(link.other(id), TransportEvent::ChannelClosed { channel });
            }
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.destroy();
        self.network.state.lock().endpoints.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_pair(network: &MemoryNetwork) -> (MemoryTransport, MemoryTransport, ChannelId) {
        let mut host = network.endpoint();
        let mut joiner = network.endpoint();

        host.register("room");
        assert!(matches!(host.try_next_event(), Some(TransportEvent::Registered { .. })));

        joiner.connect("room");
        let channel = match host.try_next_event() {
            Some(TransportEvent::Incoming { channel }) => channel,
            other => panic!("expected incoming, got {:?}", other),
        };
        host.accept(channel);
        assert_eq!(host.try_next_event(), Some(TransportEvent::ChannelOpen { channel }));
        assert_eq!(joiner.try_next_event(), Some(TransportEvent::ChannelOpen { channel }));

        (host, joiner, channel)
    }

    #[test]
    fn test_name_collision() {
        let network = MemoryNetwork::new();
        let mut first = network.endpoint();
        let mut second = network.endpoint();

        first.register("room");
        second.register("room");

        assert!(matches!(first.try_next_event(), Some(TransportEvent::Registered { .. })));
        assert!(matches!(second.try_next_event(), Some(TransportEvent::NameTaken { .. })));
    }

    #[test]
    fn test_connect_to_unknown_name() {
        let network = MemoryNetwork::new();
        let mut joiner = network.endpoint();
        joiner.connect("nobody");
        assert_eq!(
            joiner.try_next_event(),
            Some(TransportEvent::Unavailable { name: "nobody".into() })
        );
    }

    #[test]
    fn test_data_flows_both_ways() {
        let network = MemoryNetwork::new();
        let (mut host, mut joiner, channel) = open_pair(&network);

        assert!(host.send(channel, &Packet::Ping));
        assert!(joiner.send(channel, &Packet::PreStartAck));

        assert_eq!(
            joiner.try_next_event(),
            Some(TransportEvent::Data { channel, packet: Packet::Ping })
        );
        assert_eq!(
            host.try_next_event(),
            Some(TransportEvent::Data { channel, packet: Packet::PreStartAck })
        );
        assert_eq!(network.sent(PacketKind::Ping), 1);
    }

    #[test]
    fn test_blackhole_drops_but_counts() {
        let network = MemoryNetwork::new();
        let (mut host, mut joiner, channel) = open_pair(&network);
        network.set_blackhole(PacketKind::PreStartCheck);

        assert!(host.send(channel, &Packet::PreStartCheck));
        assert!(joiner.try_next_event().is_none());
        assert_eq!(network.sent(PacketKind::PreStartCheck), 1);

        network.clear_blackholes();
        host.send(channel, &Packet::PreStartCheck);
        assert!(joiner.try_next_event().is_some());
    }

    #[test]
    fn test_drop_next_loses_only_first_copies() {
        let network = MemoryNetwork::new();
        let (mut host, mut joiner, channel) = open_pair(&network);
        network.drop_next(PacketKind::Rematch, 1);

        assert!(host.send(channel, &Packet::Rematch));
        assert!(joiner.try_next_event().is_none());
        assert!(host.send(channel, &Packet::Rematch));
        assert_eq!(
            joiner.try_next_event(),
            Some(TransportEvent::Data { channel, packet: Packet::Rematch })
        );
        assert_eq!(network.sent(PacketKind::Rematch), 2);
    }

    #[test]
    fn test_sever_notifies_both_ends() {
        let network = MemoryNetwork::new();
        let (mut host, mut joiner, channel) = open_pair(&network);
        network.sever();

        assert_eq!(host.try_next_event(), Some(TransportEvent::ChannelClosed { channel }));
        assert_eq!(joiner.try_next_event(), Some(TransportEvent::ChannelClosed { channel }));
        assert!(!host.send(channel, &Packet::Ping));
    }

    #[test]
    fn test_destroy_releases_name() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        host.register("room");
        assert!(network.is_registered("room"));

        host.destroy();
        assert!(!network.is_registered("room"));
    }

    #[test]
    fn test_reject_reports_unavailable() {
        let network = MemoryNetwork::new();
        let mut host = network.endpoint();
        let mut joiner = network.endpoint();
        host.register("room");
        let _ = host.try_next_event();

        joiner.connect("room");
        let Some(TransportEvent::Incoming { channel }) = host.try_next_event() else {
            panic!("expected incoming");
        };
        host.reject(channel);
        assert_eq!(
            joiner.try_next_event(),
            Some(TransportEvent::Unavailable { name: "room".into() })
        );
    }
}
