//! Frame codec: 4-byte big-endian length prefix followed by a
//! bincode-encoded [`Frame`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wavelet_messages::Frame;

use crate::ProtocolError;

/// Maximum frame payload size in bytes.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Encode a frame for transmission (length prefix included).
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a frame payload (without its length prefix).
pub fn decode_frame(payload: &[u8]) -> Result<Frame, ProtocolError> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_frame(&payload)
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavelet_messages::WireMessage;
    use wavelet_types::Signature;

    #[tokio::test]
    async fn frames_stream_back_to_back() {
        let mut buf = Vec::new();
        let first = Frame::new(1, WireMessage::GetPeers);
        let second = Frame::new(
            2,
            WireMessage::Signatures {
                signatures: vec![Signature([9u8; 64])],
            },
        );
        write_frame(&mut buf, &first).await.unwrap();
        write_frame(&mut buf, &second).await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), first);
        assert_eq!(read_frame(&mut reader).await.unwrap(), second);
    }

    #[tokio::test]
    async fn oversized_length_rejected_before_allocation() {
        let mut bytes = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        let err = read_frame(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn garbage_payload_is_malformed() {
        let mut bytes = 3u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        let err = read_frame(&mut bytes.as_slice()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn prefix_matches_payload_length() {
        let bytes = encode_frame(&Frame::unsolicited(WireMessage::Score(7))).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
    }
}
