//! The one multiplayer engagement a process takes part in.

use shared::{Role, RoomCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub active: bool,
    pub role: Option<Role>,
    pub room_id: Option<RoomCode>,
    pub status: ConnectionStatus,
}

impl Session {
    /// Room registered, waiting for an opponent.
    pub fn hosting(&mut self, room: RoomCode) {
        self.active = true;
        self.role = Some(Role::Host);
        self.room_id = Some(room);
        self.status = ConnectionStatus::Connecting;
    }

    pub fn joining(&mut self, room: RoomCode) {
        self.active = true;
        self.role = Some(Role::Client);
        self.room_id = Some(room);
        self.status = ConnectionStatus::Connecting;
    }

    pub fn connected(&mut self, role: Role) {
        self.active = true;
        self.role = Some(role);
        self.status = ConnectionStatus::Connected;
    }

    pub fn reset(&mut self) {
        *self = Session::default();
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_lifecycle() {
        let mut session = Session::default();
        assert!(!session.active);

        let code = RoomCode::parse("7K3M").unwrap();
        session.hosting(code.clone());
        assert_eq!(session.status, ConnectionStatus::Connecting);
        assert_eq!(session.room_id, Some(code));

        session.connected(Role::Host);
        assert!(session.is_connected());

        session.reset();
        assert_eq!(session, Session::default());
        assert_eq!(session.role, None);
    }

    #[test]
    fn test_joining_sets_client_role() {
        let mut session = Session::default();
        session.joining(RoomCode::parse("abcd").unwrap());
        assert_eq!(session.role, Some(Role::Client));
        assert!(session.active);
        assert!(!session.is_connected());
    }
}
