//! Simulation Engine contract and a compact arena implementation.
//!
//! Only the host runs an engine. The replicator hands it the previous
//! snapshot plus the inputs for one tick and ships whatever comes back.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    Avatar, Difficulty, Direction, GameOverReport, GameSettings, GridSize, Hazard, Item, ItemKind,
    Language, Point, SimulationSnapshot, Weather, Winner, MAX_IMMUNITY, TILE_SIZE,
};
use std::time::{Duration, Instant};

/// Inputs for one simulation step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickInput {
    pub host: Option<Direction>,
    /// Most recent buffered remote input, consumed by this step.
    pub client: Option<Direction>,
    pub host_moves: bool,
    pub client_moves: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ScoreUpdate { host: u32, client: u32 },
    GameOver(GameOverReport),
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub snapshot: SimulationSnapshot,
    pub events: Vec<EngineEvent>,
}

pub trait SimulationEngine {
    /// Fresh arena for a match on `grid`.
    fn initial(&mut self, settings: &GameSettings, grid: GridSize) -> SimulationSnapshot;

    fn step(
        &mut self,
        prev: &SimulationSnapshot,
        settings: &GameSettings,
        input: &TickInput,
        grid: GridSize,
    ) -> StepOutcome;
}

/// Milliseconds between two moves of an avatar with `score` points.
pub fn move_interval_ms(difficulty: Difficulty, score: u32, immune: bool) -> f32 {
    let reduction = (score / 50) as f32 * 4.0;
    let interval = (difficulty.base_interval_ms() - reduction).max(40.0);
    if immune {
        interval * 0.6
    } else {
        interval
    }
}

/// Decides which avatars advance on a frame. Each avatar keeps its own pace.
#[derive(Debug, Default)]
pub struct MoveClock {
    last_host: Option<Instant>,
    last_client: Option<Instant>,
}

impl MoveClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_host = None;
        self.last_client = None;
    }

    /// Returns `(host_moves, client_moves)` for `now`, recording the moves.
    pub fn due(
        &mut self,
        snapshot: &SimulationSnapshot,
        difficulty: Difficulty,
        now: Instant,
    ) -> (bool, bool) {
        let host = Self::advance(&mut self.last_host, &snapshot.host, difficulty, now);
        let client = Self::advance(&mut self.last_client, &snapshot.client, difficulty, now);
        (host, client)
    }

    fn advance(
        last: &mut Option<Instant>,
        avatar: &Avatar,
        difficulty: Difficulty,
        now: Instant,
    ) -> bool {
        let interval = move_interval_ms(difficulty, avatar.score, avatar.immunity_timer > 0);
        let due = match *last {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) >= Duration::from_secs_f32(interval / 1000.0),
        };
        if due {
            *last = Some(now);
        }
        due
    }
}

const FOODS: &[&str] = &[
    "Mamona",
    "Tungos",
    "Hayaca",
    "Carne a la Perra",
    "Topocho",
    "Cachama",
    "Pan de Arroz",
    "Majule",
];

/// Spawn chance per advancing tick and lifetime in ticks for bonus items.
const ITEM_RULES: &[(ItemKind, f64, u32)] = &[
    (ItemKind::Avocado, 0.01, 60),
    (ItemKind::Shrine, 0.002, 200),
    (ItemKind::Coffee, 0.005, 150),
];

enum Pickup {
    Nothing,
    Food,
    Bonus,
}

/// Reference arena: wrap-around movement, food and bonus items, a chasing
/// hazard, collisions and winner selection.
pub struct ArenaEngine {
    rng: StdRng,
    tile_size: u32,
    food_eaten: u32,
}

impl ArenaEngine {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            tile_size: TILE_SIZE,
            food_eaten: 0,
        }
    }

    /// Tile edge used to turn the negotiated grid into cells. Must match
    /// the tile size the grid was negotiated with.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn tiles_of(&self, grid: GridSize) -> (i32, i32) {
        let (x, y) = grid.tiles(self.tile_size);
        ((x as i32).max(1), (y as i32).max(1))
    }

    pub fn food_eaten(&self) -> u32 {
        self.food_eaten
    }

    fn safe_position(&mut self, tiles: (i32, i32)) -> Point {
        let range_x = (tiles.0 - 2).max(1);
        let range_y = (tiles.1 - 4).max(1);
        Point::new(
            self.rng.gen_range(0..range_x) + 1,
            self.rng.gen_range(0..range_y) + 3,
        )
    }

    fn free_position(&mut self, snapshot: &SimulationSnapshot, tiles: (i32, i32)) -> Option<Point> {
        (0..20)
            .map(|_| self.safe_position(tiles))
            .find(|p| !occupied(snapshot, *p))
    }

    fn respawn_food(&mut self, snapshot: &mut SimulationSnapshot, tiles: (i32, i32)) {
        let label = FOODS[self.rng.gen_range(0..FOODS.len())].to_string();
        let position = self
            .free_position(snapshot, tiles)
            .unwrap_or_else(|| self.safe_position(tiles));

        if let Some(food) = snapshot
            .items
            .iter_mut()
            .find(|item| item.kind == ItemKind::Capybara)
        {
            food.active = true;
            food.x = position.x;
            food.y = position.y;
            food.timer = 0;
            food.label = Some(label);
        }
    }

    fn update_weather(&mut self, snapshot: &mut SimulationSnapshot) {
        let total = snapshot.host.score + snapshot.client.score;
        snapshot.weather = match total {
            0..=149 => Weather::Sunny,
            150..=299 => Weather::Sunset,
            _ => Weather::Night,
        };

        if snapshot.weather == Weather::Night {
            snapshot.rain_intensity = 0.0;
        } else if snapshot.rain_intensity == 0.0 {
            if self.rng.gen_bool(0.0005) {
                snapshot.rain_intensity = 0.1;
            }
        } else {
            snapshot.rain_intensity = (snapshot.rain_intensity + 0.005).min(1.5);
            if snapshot.rain_intensity > 0.5 && self.rng.gen_bool(0.002) {
                snapshot.rain_intensity = 0.0;
            }
        }
    }

    fn update_entities(
        &mut self,
        snapshot: &mut SimulationSnapshot,
        settings: &GameSettings,
        tiles: (i32, i32),
    ) {
        if !settings.bombs_enabled {
            snapshot.hazard.active = false;
        } else if !snapshot.hazard.active {
            if self.rng.gen_bool(0.02) {
                let p = self.safe_position(tiles);
                snapshot.hazard = Hazard {
                    active: true,
                    x: p.x,
                    y: p.y,
                    move_timer: 0,
                };
            }
        } else {
            snapshot.hazard.move_timer += 1;
            if snapshot.hazard.move_timer > 2 {
                snapshot.hazard.move_timer = 0;
                if let Some(target) = snapshot.host.head() {
                    let hazard = &mut snapshot.hazard;
                    hazard.x += (target.x - hazard.x).signum();
                    hazard.y += (target.y - hazard.y).signum();
                }
                let at = Point::new(snapshot.hazard.x, snapshot.hazard.y);
                for avatar in [&mut snapshot.host, &mut snapshot.client] {
                    if avatar.head() == Some(at) && avatar.immunity_timer == 0 {
                        avatar.dead = true;
                    }
                }
            }
        }

        for (kind, chance, lifetime) in ITEM_RULES {
            let Some(index) = snapshot.items.iter().position(|item| item.kind == *kind) else {
                continue;
            };
            if snapshot.items[index].active {
                let item = &mut snapshot.items[index];
                item.timer = item.timer.saturating_sub(1);
                if item.timer == 0 {
                    item.active = false;
                }
            } else if self.rng.gen_bool(*chance) {
                if let Some(p) = self.free_position(snapshot, tiles) {
                    let item = &mut snapshot.items[index];
                    item.active = true;
                    item.x = p.x;
                    item.y = p.y;
                    item.timer = *lifetime;
                }
            }
        }
    }
}

impl Default for ArenaEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn occupied(snapshot: &SimulationSnapshot, p: Point) -> bool {
    snapshot.host.body.contains(&p) || snapshot.client.body.contains(&p)
}

/// Moves one avatar a tile and resolves whatever it lands on.
fn advance(avatar: &mut Avatar, items: &mut [Item], hazard: &Hazard, tiles: (i32, i32)) -> Pickup {
    let Some(head) = avatar.head() else {
        return Pickup::Nothing;
    };
    if avatar.dead {
        return Pickup::Nothing;
    }

    avatar.immunity_timer = avatar.immunity_timer.saturating_sub(1);
    avatar.dx = avatar.next_dx;
    avatar.dy = avatar.next_dy;
    let next = Point::new(
        (head.x + avatar.dx).rem_euclid(tiles.0),
        (head.y + avatar.dy).rem_euclid(tiles.1),
    );
    avatar.body.insert(0, next);

    let landed = items
        .iter_mut()
        .find(|item| item.active && item.x == next.x && item.y == next.y);

    let pickup = match landed {
        Some(item) if item.kind == ItemKind::Capybara => {
            avatar.score += 10;
            // Food grows the body: keep the tail
            return Pickup::Food;
        }
        Some(item) => {
            match item.kind {
                ItemKind::Avocado => avatar.score += 50,
                ItemKind::Shrine => avatar.score += 200,
                ItemKind::Coffee => {
                    avatar.score += 30;
                    avatar.immunity_timer = MAX_IMMUNITY;
                }
                ItemKind::Bomb => {
                    if avatar.immunity_timer == 0 {
                        avatar.dead = true;
                    }
                }
                ItemKind::Capybara => {}
            }
            item.active = false;
            Pickup::Bonus
        }
        None => {
            if hazard.active && hazard.x == next.x && hazard.y == next.y && avatar.immunity_timer == 0 {
                avatar.dead = true;
            }
            Pickup::Nothing
        }
    };

    avatar.body.pop();
    pickup
}

fn check_self(avatar: &mut Avatar) {
    if avatar.dead || avatar.immunity_timer > 0 {
        return;
    }
    if let Some(head) = avatar.head() {
        if avatar.body[1..].contains(&head) {
            avatar.dead = true;
        }
    }
}

fn check_other(avatar: &mut Avatar, other: &mut Avatar) {
    if avatar.dead || avatar.immunity_timer > 0 || other.dead {
        return;
    }
    let (Some(head), Some(other_head)) = (avatar.head(), other.head()) else {
        return;
    };

    if head == other_head {
        avatar.dead = true;
        other.dead = true;
    } else if other.body.contains(&head) {
        avatar.dead = true;
    }
}

fn game_over_report(snapshot: &SimulationSnapshot, language: Language, food_eaten: u32) -> GameOverReport {
    let winner = match (snapshot.host.dead, snapshot.client.dead) {
        (true, true) => Winner::Tie,
        (true, false) => Winner::Client,
        _ => Winner::Host,
    };
    let message = match (language, winner) {
        (Language::Es, Winner::Tie) => "¡Choque doble! ¡Empate!".to_string(),
        (Language::En, Winner::Tie) => "Double crash! It's a tie!".to_string(),
        (Language::Es, Winner::Host) => format!("¡Ganó {}!", snapshot.host.name),
        (Language::En, Winner::Host) => format!("{} wins!", snapshot.host.name),
        (Language::Es, Winner::Client) => format!("¡Ganó {}!", snapshot.client.name),
        (Language::En, Winner::Client) => format!("{} wins!", snapshot.client.name),
    };

    GameOverReport {
        host_score: snapshot.host.score,
        client_score: snapshot.client.score,
        message,
        cause: "crashed into wall/self".to_string(),
        winner: Some(winner),
        food_eaten,
    }
}

impl SimulationEngine for ArenaEngine {
    fn initial(&mut self, _settings: &GameSettings, grid: GridSize) -> SimulationSnapshot {
        let tiles = self.tiles_of(grid);
        let mid = tiles.1 / 2;
        self.food_eaten = 0;

        let mut items = vec![Item::inactive(ItemKind::Capybara)];
        items.extend(
            [ItemKind::Avocado, ItemKind::Shrine, ItemKind::Coffee, ItemKind::Bomb]
                .into_iter()
                .map(Item::inactive),
        );

        let mut snapshot = SimulationSnapshot {
            host: Avatar::new("Tricolor", Point::new((tiles.0 - 5).max(0), mid), Direction::Left, 3),
            client: Avatar::new("Orquídea", Point::new(4_i32.min(tiles.0 - 1), mid), Direction::Right, 3),
            items,
            hazard: Hazard::default(),
            weather: Weather::Sunny,
            rain_intensity: 0.0,
            running: true,
            grid,
        };
        self.respawn_food(&mut snapshot, tiles);
        snapshot
    }

    fn step(
        &mut self,
        prev: &SimulationSnapshot,
        settings: &GameSettings,
        input: &TickInput,
        grid: GridSize,
    ) -> StepOutcome {
        let mut snapshot = prev.clone();
        let mut events = Vec::new();
        if !snapshot.running {
            return StepOutcome { snapshot, events };
        }

        let tiles = self.tiles_of(grid);
        if let Some(direction) = input.host {
            snapshot.host.steer(direction);
        }
        if let Some(direction) = input.client {
            snapshot.client.steer(direction);
        }

        self.update_weather(&mut snapshot);

        let scores = snapshot.scores();
        let mut ate = false;
        if input.host_moves {
            let SimulationSnapshot { host, items, hazard, .. } = &mut snapshot;
            ate |= matches!(advance(host, items, hazard, tiles), Pickup::Food);
        }
        if input.client_moves {
            let SimulationSnapshot { client, items, hazard, .. } = &mut snapshot;
            ate |= matches!(advance(client, items, hazard, tiles), Pickup::Food);
        }
        if ate {
            self.food_eaten += 1;
            self.respawn_food(&mut snapshot, tiles);
        }
        if snapshot.scores() != scores {
            let (host, client) = snapshot.scores();
            events.push(EngineEvent::ScoreUpdate { host, client });
        }

        if !(input.host_moves || input.client_moves) {
            return StepOutcome { snapshot, events };
        }

        self.update_entities(&mut snapshot, settings, tiles);

        check_self(&mut snapshot.host);
        check_self(&mut snapshot.client);
        check_other(&mut snapshot.host, &mut snapshot.client);
        check_other(&mut snapshot.client, &mut snapshot.host);

        if snapshot.host.dead || snapshot.client.dead {
            snapshot.running = false;
            let report = game_over_report(&snapshot, settings.language, self.food_eaten);
            debug!("Game over: {}", report.message);
            events.push(EngineEvent::GameOver(report));
        }

        StepOutcome { snapshot, events }
    }
}
