//! Classification of socket failures.

use std::io;

use wavelet_protocol::ProtocolError;

/// Whether `err` means the remote end went away rather than misbehaved.
///
/// Such peers are temporarily unreachable: their address is kept and may be
/// dialed again later.
pub fn is_connection_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Whether a protocol-level failure is a closed connection or an expired
/// deadline, as opposed to a violation by the peer.
pub fn is_transient(err: &ProtocolError) -> bool {
    err.io_error()
        .is_some_and(|e| is_connection_closed(e) || e.kind() == io::ErrorKind::TimedOut)
}
