//! # Peer Library
//!
//! Everything one player's process needs to take part in a two-player match:
//! finding the opponent, agreeing on settings and arena size, coordinating
//! the start, and keeping both screens on the same simulation.
//!
//! ## Architecture Overview
//!
//! Two peers talk over a single direct channel. One of them hosts: it claims
//! a short room code, accepts exactly one opponent, and owns the simulation.
//! The other joins with the code and renders whatever the host sends.
//!
//! ### Host Authority
//! Only the host runs the [`engine::SimulationEngine`]. After every tick that
//! moved something it ships a complete snapshot; the client replaces its copy
//! wholesale and never predicts. The client's only upstream gameplay traffic
//! is steering input.
//!
//! ### Redundancy Instead of Acknowledgement
//! Lobby traffic is small and idempotent, so it is sent several times at
//! fixed offsets (`READY` four times, each countdown value twice, `START_GAME`
//! three times) and refreshed by a heartbeat. The only round trip is the
//! pre-start check that proves the client is still there.
//!
//! ### Explicit Time
//! None of the protocol layers sleep. They take the current instant, return
//! actions, and park future work in a [`timers::Scheduler`]. The
//! [`node::PeerNode`] event loop is the only place that waits.
//!
//! ## Module Organization
//!
//! - `transport`: the provider seam, with an in-memory and a UDP implementation
//! - `broker`: room codes, the single channel and its lifecycle
//! - `negotiator`: shared settings, visual assets and grid negotiation
//! - `readiness`: ready flags, the start handshake and the countdown
//! - `replicator`: host snapshots and client inputs during a match
//! - `engine`: the simulation seam and the reference arena rules
//! - `node`: the controller that wires the layers to user commands
//! - `events`, `timers`, `session`, `config`, `error`: shared plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::engine::ArenaEngine;
//! use peer::node::{Command, PeerNode};
//! use peer::transport::udp::UdpTransport;
//! use peer::SyncConfig;
//! use shared::{Dimensions, GameSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = UdpTransport::bind("0.0.0.0:0", "127.0.0.1:9000".parse()?).await?;
//!     let mut node = PeerNode::new(
//!         transport,
//!         ArenaEngine::new(),
//!         SyncConfig::default(),
//!         GameSettings::default(),
//!         Dimensions::new(800, 600),
//!     );
//!     let mut events = node.subscribe();
//!
//!     let (commands, rx) = tokio::sync::mpsc::unbounded_channel();
//!     commands.send(Command::Host)?;
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!     node.run(rx).await;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod negotiator;
pub mod node;
pub mod readiness;
pub mod replicator;
pub mod session;
pub mod timers;
pub mod transport;

pub use config::SyncConfig;
pub use error::SyncError;
pub use node::{Command, NodeEvent, PeerNode};
