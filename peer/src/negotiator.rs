//! Session Negotiator: first-contact configuration and arena sizing.

use crate::config::SyncConfig;
use crate::error::SyncError;
use log::{debug, info};
use shared::{
    negotiate_grid_size, Dimensions, GameSettings, GridSize, Packet, Role, VisualAssets,
};
use std::time::{Duration, Instant};

/// Owns the shared settings and assets and decides who may change them.
///
/// The host pushes `INIT` shortly after the channel opens and again after
/// each match start; the client replaces its copy wholesale on receipt.
#[derive(Debug)]
pub struct Negotiator {
    role: Option<Role>,
    settings: GameSettings,
    assets: VisualAssets,
    init_due: Option<Instant>,
    init_delay: Duration,
    match_init_delay: Duration,
}

impl Negotiator {
    pub fn new(settings: GameSettings, assets: VisualAssets, config: &SyncConfig) -> Self {
        Self {
            role: None,
            settings,
            assets,
            init_due: None,
            init_delay: config.init_delay,
            match_init_delay: config.match_init_delay,
        }
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn assets(&self) -> &VisualAssets {
        &self.assets
    }

    /// Replaces locally generated artwork. Only meaningful before the
    /// host's `INIT` goes out.
    pub fn set_assets(&mut self, assets: VisualAssets) {
        self.assets = assets;
    }

    /// True when the shared options must be shown disabled.
    pub fn is_read_only(&self) -> bool {
        self.role == Some(Role::Client)
    }

    pub fn on_connected(&mut self, role: Role, now: Instant) {
        self.role = Some(role);
        if role == Role::Host {
            self.init_due = Some(now + self.init_delay);
        }
    }

    pub fn on_match_started(&mut self, now: Instant) {
        if self.role == Some(Role::Host) {
            self.init_due = Some(now + self.match_init_delay);
        }
    }

    /// The `INIT` packet once its delay has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Packet> {
        match self.init_due {
            Some(due) if due <= now => {
                self.init_due = None;
                debug!("Sending INIT");
                Some(Packet::Init {
                    settings: self.settings.clone(),
                    assets: self.assets.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.init_due
    }

    /// Applies host-pushed configuration. Returns true when the local copy changed.
    pub fn handle_packet(&mut self, packet: &Packet) -> bool {
        if self.role != Some(Role::Client) {
            return false;
        }

        match packet {
            Packet::Init { settings, assets } => {
                info!("Received INIT from host");
                let changed = self.settings != *settings || self.assets != *assets;
                self.settings = settings.clone();
                self.assets = assets.clone();
                changed
            }
            Packet::SettingsUpdate { settings } => {
                let changed = self.settings != *settings;
                self.settings = settings.clone();
                changed
            }
            _ => false,
        }
    }

    /// Changes the shared settings. A connected host in the lobby gets the
    /// `SETTINGS_UPDATE` packet to broadcast.
    pub fn update_settings(
        &mut self,
        settings: GameSettings,
        in_lobby: bool,
    ) -> Result<Option<Packet>, SyncError> {
        match self.role {
            None => {
                self.settings = settings;
                Ok(None)
            }
            Some(Role::Client) => Err(SyncError::SettingsReadOnly),
            Some(Role::Host) if !in_lobby => Err(SyncError::NotInLobby),
            Some(Role::Host) => {
                self.settings = settings.clone();
                Ok(Some(Packet::SettingsUpdate { settings }))
            }
        }
    }

    pub fn reset(&mut self) {
        self.role = None;
        self.init_due = None;
    }
}

/// Local and peer dimension reports for the current lobby phase.
#[derive(Debug, Clone)]
pub struct DimensionExchange {
    tile_size: u32,
    local: Dimensions,
    peer: Option<Dimensions>,
}

impl DimensionExchange {
    pub fn new(tile_size: u32, local: Dimensions) -> Self {
        Self {
            tile_size,
            local,
            peer: None,
        }
    }

    pub fn local(&self) -> Dimensions {
        self.local
    }

    pub fn set_local(&mut self, local: Dimensions) {
        self.local = local;
    }

    pub fn peer(&self) -> Option<Dimensions> {
        self.peer
    }

    pub fn record_peer(&mut self, dimensions: Dimensions) {
        self.peer = Some(dimensions);
    }

    pub fn clear_peer(&mut self) {
        self.peer = None;
    }

    /// Grid for the next match. Without a peer report the local size is used.
    pub fn negotiate(&self) -> GridSize {
        let peer = self.peer.unwrap_or_else(|| {
            debug!("No peer dimensions recorded, using local size");
            self.local
        });
        negotiate_grid_size(self.local, peer, self.tile_size)
    }
}
