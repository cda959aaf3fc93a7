//! Synchronization error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("could not allocate a unique room code, try hosting again")]
    RoomAllocationExhausted,

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("opponent did not answer the start handshake")]
    ClientUnresponsive,

    #[error("only the host can do that")]
    NotHost,

    #[error("both players must be ready")]
    PeersNotReady,

    #[error("a match start is already in progress")]
    StartInProgress,

    #[error("not in the lobby")]
    NotInLobby,

    #[error("shared settings are controlled by the host")]
    SettingsReadOnly,

    #[error("no active session")]
    NotConnected,

    #[error("session already active")]
    AlreadyConnected,

    #[error("transport error: {0}")]
    Transport(String),
}

impl SyncError {
    /// Errors that end the attempt but leave the user free to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RoomAllocationExhausted | SyncError::PeerUnreachable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::RoomAllocationExhausted.is_retryable());
        assert!(SyncError::PeerUnreachable("7K3M".into()).is_retryable());
        assert!(!SyncError::ClientUnresponsive.is_retryable());
        assert!(!SyncError::Transport("boom".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SyncError::PeerUnreachable("no such room".into()).to_string(),
            "peer unreachable: no such room"
        );
    }
}
