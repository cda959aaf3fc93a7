//! Authoritative per-tick world state, produced by the host and mirrored by the client.

use crate::{Direction, GridSize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Avatar {
    /// Head first.
    pub body: Vec<Point>,
    pub dx: i32,
    pub dy: i32,
    pub next_dx: i32,
    pub next_dy: i32,
    pub score: u32,
    pub name: String,
    pub dead: bool,
    pub immunity_timer: u32,
}

impl Avatar {
    pub fn new(name: &str, head: Point, heading: Direction, length: usize) -> Self {
        let (dx, dy) = heading.delta();
        let body = (0..length as i32)
            .map(|i| Point::new(head.x - dx * i, head.y - dy * i))
            .collect();

        Self {
            body,
            dx,
            dy,
            next_dx: dx,
            next_dy: dy,
            score: 0,
            name: name.to_string(),
            dead: false,
            immunity_timer: 0,
        }
    }

    pub fn head(&self) -> Option<Point> {
        self.body.first().copied()
    }

    /// Queues a heading change for the next step. Reversals onto the own
    /// neck are ignored, as are changes for dead avatars.
    pub fn steer(&mut self, direction: Direction) {
        if self.dead {
            return;
        }
        let (dx, dy) = direction.delta();
        let turning_vertical = dy != 0 && self.dy == 0;
        let turning_horizontal = dx != 0 && self.dx == 0;
        if turning_vertical || turning_horizontal {
            self.next_dx = dx;
            self.next_dy = dy;
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Capybara,
    Avocado,
    Shrine,
    Coffee,
    Bomb,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub active: bool,
    pub x: i32,
    pub y: i32,
    /// Remaining lifetime in ticks.
    pub timer: u32,
    pub label: Option<String>,
}

impl Item {
    pub fn inactive(kind: ItemKind) -> Self {
        Self {
            kind,
            active: false,
            x: 0,
            y: 0,
            timer: 0,
            label: None,
        }
    }
}

/// The roaming fireball.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Hazard {
    pub active: bool,
    pub x: i32,
    pub y: i32,
    pub move_timer: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weather {
    #[default]
    Sunny,
    Sunset,
    Night,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SimulationSnapshot {
    pub host: Avatar,
    pub client: Avatar,
    pub items: Vec<Item>,
    pub hazard: Hazard,
    pub weather: Weather,
    pub rain_intensity: f32,
    pub running: bool,
    pub grid: GridSize,
}

impl SimulationSnapshot {
    pub fn scores(&self) -> (u32, u32) {
        (self.host.score, self.client.score)
    }

    pub fn item(&self, kind: ItemKind) -> Option<&Item> {
        self.items.iter().find(|item| item.kind == kind)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Host,
    Client,
    Tie,
}

/// Terminal outcome of a match, applied verbatim by both peers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameOverReport {
    pub host_score: u32,
    pub client_score: u32,
    pub message: String,
    pub cause: String,
    pub winner: Option<Winner>,
    pub food_eaten: u32,
}
