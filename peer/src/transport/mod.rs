//! Peer-transport provider interface.
//!
//! A provider can (a) register an addressable endpoint under a chosen name
//! and surface inbound channels to it, (b) open a channel to a named remote
//! endpoint, (c) report channel open/data/close/error events and (d) send
//! packets best-effort on an open channel. Outcomes of `register` and
//! `connect` arrive later as [`TransportEvent`]s.

pub mod memory;
pub mod udp;

use shared::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Registered { name: String },
    NameTaken { name: String },
    /// A remote peer wants a channel; answer with `accept` or `reject`.
    Incoming { channel: ChannelId },
    ChannelOpen { channel: ChannelId },
    Data { channel: ChannelId, packet: Packet },
    ChannelClosed { channel: ChannelId },
    /// The named endpoint does not exist or refused the channel.
    Unavailable { name: String },
    Error { message: String },
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    fn register(&mut self, name: &str);
    fn connect(&mut self, name: &str);
    fn accept(&mut self, channel: ChannelId);
    fn reject(&mut self, channel: ChannelId);
    /// Returns false when the packet could not be handed to the channel.
    fn send(&mut self, channel: ChannelId, packet: &Packet) -> bool;
    /// Closes a channel without reporting `ChannelClosed` locally.
    fn close_channel(&mut self, channel: ChannelId);
    /// Releases the registered name and every channel.
    fn destroy(&mut self);
    async fn next_event(&mut self) -> Option<TransportEvent>;
    fn try_next_event(&mut self) -> Option<TransportEvent>;
}
