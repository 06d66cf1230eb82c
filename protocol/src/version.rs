//! Protocol version management.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0, 0);

/// Three-part protocol version exchanged in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Peers interoperate when they share a major version.
    pub fn is_compatible(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, ProtocolError> {
            parts
                .next()
                .ok_or_else(|| ProtocolError::Malformed(format!("version {s:?}")))?
                .parse()
                .map_err(|_| ProtocolError::Malformed(format!("version {s:?}")))
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ProtocolError::Malformed(format!("version {s:?}")));
        }
        Ok(version)
    }
}

impl TryFrom<String> for Version {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}
