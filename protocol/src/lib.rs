//! Wire protocol: the one-time handshake, post-handshake frame codec and
//! protocol versioning.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod version;

pub use codec::{decode_frame, encode_frame, read_frame, write_frame, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use handshake::{DeclaredAddress, Handshake};
pub use version::{Version, PROTOCOL_VERSION};
