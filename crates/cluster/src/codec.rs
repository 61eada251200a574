//! Length-prefixed bincode frames
//!
//! Every frame is a little-endian `u32` payload length followed by the
//! bincode payload. Used on the process-pool pipes in both directions.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ClusterError;

/// Header size in bytes
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted on either side
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Serialize a value into a complete frame
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, ClusterError> {
    encode_with_limit(value, MAX_FRAME_LEN)
}

/// Like [`encode`], with a payload limit below [`MAX_FRAME_LEN`]
pub fn encode_with_limit<T: Serialize>(value: &T, limit: usize) -> Result<Bytes, ClusterError> {
    let limit = limit.min(MAX_FRAME_LEN);
    let payload = bincode::serialize(value).map_err(|e| ClusterError::codec(e.to_string()))?;
    if payload.len() > limit {
        return Err(ClusterError::codec(format!(
            "frame of {} bytes exceeds the {limit} byte limit",
            payload.len()
        )));
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

/// Deserialize a frame payload (header already stripped)
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ClusterError> {
    bincode::deserialize(payload).map_err(|e| ClusterError::codec(e.to_string()))
}

/// Encode a value and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ClusterError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame payload
///
/// Returns `Ok(None)` on end of stream at a frame boundary. A stream that ends
/// inside a frame, or announces an oversized frame, is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, ClusterError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ClusterError::codec("stream ended inside a frame header"));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ClusterError::codec(format!(
            "announced frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| ClusterError::codec(format!("truncated frame: {e}")))?;
    Ok(Some(Bytes::from(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Batch, Record, Value};

    fn batch() -> Batch {
        Batch::new(vec![
            Record::new(vec![Value::from("ana"), Value::from("ana@example.com"), Value::Int(31)]),
            Record::new(vec![Value::from("bob"), Value::Null, Value::Int(45)]),
        ])
    }

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, &batch()).await.unwrap();
        write_frame(&mut buf, &Batch::sentinel()).await.unwrap();

        let mut reader = buf.as_slice();
        let first = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decode::<Batch>(&first).unwrap(), batch());

        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(decode::<Batch>(&second).unwrap().is_sentinel());

        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[test]
    fn test_header_is_little_endian_length() {
        let frame = encode(&7u64).unwrap();
        assert_eq!(&frame[..FRAME_HEADER_LEN], &8u32.to_le_bytes());
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 8);
    }

    #[test]
    fn test_encode_respects_payload_limit() {
        let err = encode_with_limit(&batch(), 16).unwrap_err();
        assert!(err.to_string().contains("16 byte limit"));
        assert!(encode_with_limit(&Batch::sentinel(), 16).is_ok());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        let frame = encode(&batch()).unwrap();
        let mut reader = &frame[..frame.len() - 3];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ClusterError::Codec { .. })
        ));

        let mut header_only = &frame[..2];
        assert!(read_frame(&mut header_only).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_announcement_is_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        let mut reader = &header[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_garbage_payload_fails_to_decode() {
        let result = decode::<Batch>(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(result, Err(ClusterError::Codec { .. })));
    }
}
