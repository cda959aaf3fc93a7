use serde::{Deserialize, Serialize};

pub mod frame;
pub mod grid;
pub mod packet;
pub mod room_code;
pub mod settings;
pub mod snapshot;

pub use frame::{CodecError, Frame, MAX_DATAGRAM_SIZE};
pub use grid::{negotiate_grid_size, Dimensions, GridSize};
pub use packet::{Packet, PacketKind};
pub use room_code::{RoomCode, ROOM_CODE_ALPHABET, ROOM_CODE_LEN};
pub use settings::{Difficulty, GameSettings, Language, VisualAssets};
pub use snapshot::{
    Avatar, GameOverReport, Hazard, Item, ItemKind, Point, SimulationSnapshot, Weather, Winner,
};

/// Edge length of one grid tile in display units.
pub const TILE_SIZE: u32 = 20;
/// Largest arena a peer will ever offer, in display units.
pub const LOGICAL_WIDTH: u32 = 800;
pub const LOGICAL_HEIGHT: u32 = 800;
/// Namespace prepended to room codes when registering with the transport provider.
pub const APP_PREFIX: &str = "snake-duel-v1-";
/// Ticks of immunity granted by the coffee power-up.
pub const MAX_IMMUNITY: u32 = 200;

/// Which side of a session a process plays.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Host => Role::Client,
            Role::Client => Role::Host,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Client => write!(f, "client"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit step on the tile grid, y grows downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}
