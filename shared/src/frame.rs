//! Datagram envelope used by the UDP transport and the rendezvous server.
//!
//! Naming traffic (`Register` .. `NotFound`) flows between a peer and the
//! rendezvous server. Channel traffic (`Open` .. `Close`) flows directly
//! between the two peers once the host's address is known.

use crate::Packet;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Frame {
    Register { name: String },
    Registered { name: String },
    NameTaken { name: String },
    Refresh { name: String },
    Unregister { name: String },
    Lookup { name: String },
    Found { name: String, addr: SocketAddr },
    NotFound { name: String },

    Open { name: String },
    Accept,
    Reject,
    KeepAlive,
    Data(Packet),
    Close,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(CodecError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
