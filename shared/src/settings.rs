use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Milliseconds between two steps of a fresh avatar.
    pub fn base_interval_ms(self) -> f32 {
        match self {
            Difficulty::Easy => 150.0,
            Difficulty::Medium => 90.0,
            Difficulty::Hard => 60.0,
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Es,
    En,
}

/// Options shared by both peers. The host's copy is authoritative once connected.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GameSettings {
    pub difficulty: Difficulty,
    pub bombs_enabled: bool,
    pub language: Language,
    pub use_joystick: bool,
    pub controls_swapped: bool,
    pub music_enabled: bool,
    pub narrator_audio_enabled: bool,
    pub retro_mode: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Medium,
            bombs_enabled: true,
            language: Language::Es,
            use_joystick: false,
            controls_swapped: false,
            music_enabled: true,
            narrator_audio_enabled: true,
            retro_mode: false,
        }
    }
}

/// References to generated artwork the host shares with the client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct VisualAssets {
    pub background: Option<String>,
    pub shrine: Option<String>,
}
