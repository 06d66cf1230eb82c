//! Network scheme byte.
//!
//! Every network (main, test, stage, private) is identified by a single
//! byte. The handshake carries it as the last byte of the application name so
//! that nodes of different networks refuse each other.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WaveletError;

/// Identifies which network a node belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct Scheme(u8);

impl Scheme {
    pub const MAINNET: Self = Self(b'W');
    pub const TESTNET: Self = Self(b'T');
    pub const STAGENET: Self = Self(b'S');

    pub fn new(byte: u8) -> Self {
        Self(byte)
    }

    pub fn as_byte(&self) -> u8 {
        self.0
    }

    /// Default P2P port for this scheme.
    pub fn default_port(&self) -> u16 {
        match *self {
            Self::MAINNET => 6868,
            Self::TESTNET => 6863,
            Self::STAGENET => 6862,
            _ => 6860,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}

impl TryFrom<char> for Scheme {
    type Error = WaveletError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        if c.is_ascii_graphic() {
            Ok(Self(c as u8))
        } else {
            Err(WaveletError::InvalidScheme(c))
        }
    }
}

impl From<Scheme> for char {
    fn from(s: Scheme) -> char {
        s.0 as char
    }
}
