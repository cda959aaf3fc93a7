//! Game protocol exchanged between the two peers over the open channel.

use crate::{
    Dimensions, Direction, GameOverReport, GameSettings, GridSize, Role, SimulationSnapshot,
    VisualAssets,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    /// Host to client, first-contact configuration.
    Init {
        settings: GameSettings,
        assets: VisualAssets,
    },
    /// Host to client, live lobby setting change.
    SettingsUpdate { settings: GameSettings },
    Ready { role: Role, dimensions: Dimensions },
    Ping,
    PreStartCheck,
    PreStartAck,
    Countdown { value: u8 },
    StartGame { grid: GridSize },
    Update { snapshot: Box<SimulationSnapshot> },
    Input { direction: Direction },
    GameOver { report: GameOverReport },
    Rematch,
}

/// Payload-free discriminant of [`Packet`], used for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Init,
    SettingsUpdate,
    Ready,
    Ping,
    PreStartCheck,
    PreStartAck,
    Countdown,
    StartGame,
    Update,
    Input,
    GameOver,
    Rematch,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Init { .. } => PacketKind::Init,
            Packet::SettingsUpdate { .. } => PacketKind::SettingsUpdate,
            Packet::Ready { .. } => PacketKind::Ready,
            Packet::Ping => PacketKind::Ping,
            Packet::PreStartCheck => PacketKind::PreStartCheck,
            Packet::PreStartAck => PacketKind::PreStartAck,
            Packet::Countdown { .. } => PacketKind::Countdown,
            Packet::StartGame { .. } => PacketKind::StartGame,
            Packet::Update { .. } => PacketKind::Update,
            Packet::Input { .. } => PacketKind::Input,
            Packet::GameOver { .. } => PacketKind::GameOver,
            Packet::Rematch => PacketKind::Rematch,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Countdown { value } => write!(f, "COUNTDOWN({})", value),
            other => write!(f, "{}", other.kind()),
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Init => "INIT",
            PacketKind::SettingsUpdate => "SETTINGS_UPDATE",
            PacketKind::Ready => "READY",
            PacketKind::Ping => "PING",
            PacketKind::PreStartCheck => "PRE_START_CHECK",
            PacketKind::PreStartAck => "PRE_START_ACK",
            PacketKind::Countdown => "COUNTDOWN",
            PacketKind::StartGame => "START_GAME",
            PacketKind::Update => "UPDATE",
            PacketKind::Input => "INPUT",
            PacketKind::GameOver => "GAME_OVER",
            PacketKind::Rematch => "REMATCH",
        };
        f.write_str(name)
    }
}
