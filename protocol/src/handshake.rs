//! Node handshake.
//!
//! Exchanged exactly once in each direction before any framed message:
//!
//! ```text
//! app name        u8 length || bytes   (application name + scheme byte)
//! version         u32 BE major || minor || patch
//! node name       u8 length || bytes
//! nonce           u64 BE
//! declared addr   u32 BE length || bytes   (0, 8 or 20 bytes)
//! timestamp       u64 BE milliseconds
//! ```
//!
//! The scheme byte at the end of the application name keeps nodes of
//! different networks from talking to each other.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wavelet_types::{Scheme, Timestamp};

use crate::{ProtocolError, Version};

const IPV4_ADDRESS_LEN: usize = 4 + 4;
const IPV6_ADDRESS_LEN: usize = 16 + 4;

/// Handshake as sent on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Application name without the trailing scheme byte.
    pub application: String,
    pub scheme: Scheme,
    pub version: Version,
    pub node_name: String,
    pub nonce: u64,
    /// Address the sender accepts connections on, if any.
    pub declared_address: DeclaredAddress,
    pub timestamp: Timestamp,
}

/// Optional self-declared listen address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeclaredAddress(pub Option<SocketAddr>);

impl DeclaredAddress {
    pub fn to_bytes(&self) -> Vec<u8> {
        let Some(addr) = self.0 else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(IPV6_ADDRESS_LEN);
        match addr.ip() {
            IpAddr::V4(ip) => out.extend_from_slice(&ip.octets()),
            IpAddr::V6(ip) => out.extend_from_slice(&ip.octets()),
        }
        out.extend_from_slice(&u32::from(addr.port()).to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (ip, port) = match bytes.len() {
            0 => return Ok(Self(None)),
            IPV4_ADDRESS_LEN => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&bytes[..4]);
                (IpAddr::V4(Ipv4Addr::from(octets)), &bytes[4..])
            }
            IPV6_ADDRESS_LEN => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[..16]);
                (IpAddr::V6(Ipv6Addr::from(octets)), &bytes[16..])
            }
            n => {
                return Err(ProtocolError::Malformed(format!(
                    "declared address of {n} bytes"
                )))
            }
        };
        let mut port_buf = [0u8; 4];
        port_buf.copy_from_slice(port);
        let port = u16::try_from(u32::from_be_bytes(port_buf))
            .map_err(|_| ProtocolError::Malformed("declared port out of range".into()))?;
        Ok(Self(Some(SocketAddr::new(ip, port))))
    }
}

impl Handshake {
    /// Application name as written on the wire, scheme byte included.
    fn wire_app_name(&self) -> Vec<u8> {
        let mut name = self.application.as_bytes().to_vec();
        name.push(self.scheme.as_byte());
        name
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let app = self.wire_app_name();
        let app_len = u8::try_from(app.len())
            .map_err(|_| ProtocolError::Malformed("application name too long".into()))?;
        let node_len = u8::try_from(self.node_name.len())
            .map_err(|_| ProtocolError::Malformed("node name too long".into()))?;
        let declared = self.declared_address.to_bytes();

        let mut out = Vec::with_capacity(64 + app.len() + self.node_name.len());
        out.push(app_len);
        out.extend_from_slice(&app);
        out.extend_from_slice(&self.version.major.to_be_bytes());
        out.extend_from_slice(&self.version.minor.to_be_bytes());
        out.extend_from_slice(&self.version.patch.to_be_bytes());
        out.push(node_len);
        out.extend_from_slice(self.node_name.as_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&(declared.len() as u32).to_be_bytes());
        out.extend_from_slice(&declared);
        out.extend_from_slice(&self.timestamp.as_millis().to_be_bytes());
        Ok(out)
    }

    /// Write the handshake and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one handshake from the stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let app_len = reader.read_u8().await? as usize;
        if app_len == 0 {
            return Err(ProtocolError::Malformed("empty application name".into()));
        }
        let mut app = vec![0u8; app_len];
        reader.read_exact(&mut app).await?;
        let scheme = Scheme::new(app[app_len - 1]);
        app.truncate(app_len - 1);
        let application = String::from_utf8(app)
            .map_err(|_| ProtocolError::Malformed("application name is not UTF-8".into()))?;

        let version = Version::new(
            reader.read_u32().await?,
            reader.read_u32().await?,
            reader.read_u32().await?,
        );

        let node_len = reader.read_u8().await? as usize;
        let mut node = vec![0u8; node_len];
        reader.read_exact(&mut node).await?;
        let node_name = String::from_utf8(node)
            .map_err(|_| ProtocolError::Malformed("node name is not UTF-8".into()))?;

        let nonce = reader.read_u64().await?;

        let declared_len = reader.read_u32().await? as usize;
        if declared_len > IPV6_ADDRESS_LEN {
            return Err(ProtocolError::Malformed(format!(
                "declared address of {declared_len} bytes"
            )));
        }
        let mut declared = vec![0u8; declared_len];
        reader.read_exact(&mut declared).await?;
        let declared_address = DeclaredAddress::from_bytes(&declared)?;

        let timestamp = Timestamp::new(reader.read_u64().await?);

        Ok(Self {
            application,
            scheme,
            version,
            node_name,
            nonce,
            declared_address,
            timestamp,
        })
    }

    /// Reject a handshake from another network or application.
    pub fn ensure_network(&self, application: &str, scheme: Scheme) -> Result<(), ProtocolError> {
        if self.scheme != scheme {
            return Err(ProtocolError::SchemeMismatch {
                expected: scheme,
                actual: self.scheme,
            });
        }
        if self.application != application {
            return Err(ProtocolError::ApplicationMismatch {
                expected: application.to_string(),
                actual: self.application.clone(),
            });
        }
        Ok(())
    }

    /// Reject a peer whose version we cannot talk to.
    pub fn ensure_compatible(&self, ours: &Version) -> Result<(), ProtocolError> {
        if ours.is_compatible(&self.version) {
            Ok(())
        } else {
            Err(ProtocolError::IncompatibleVersion {
                ours: ours.to_string(),
                theirs: self.version.to_string(),
            })
        }
    }
}
