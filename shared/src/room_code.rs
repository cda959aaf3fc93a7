//! Short human-typed room identifiers.

use crate::APP_PREFIX;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uppercase letters and digits without the look-alikes 0/O and 1/I.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LEN: usize = 4;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        RoomCode(code)
    }

    /// Normalizes user input (trim, uppercase) and validates it.
    pub fn parse(input: &str) -> Option<Self> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == ROOM_CODE_LEN
            && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));

        valid.then_some(RoomCode(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name under which the host registers with the transport provider.
    pub fn endpoint_name(&self) -> String {
        format!("{}{}", APP_PREFIX, self.0)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
