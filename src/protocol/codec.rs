//! Frame codec
//!
//! Encodes and decodes single packets on an established byte stream. A frame
//! is `[4-byte total length][1-byte kind][payload]`, all integers big-endian,
//! with the length counting the 5 header bytes as well.
//!
//! Decoding distinguishes three outcomes the worker loops care about:
//! a packet, a timeout (`Ok(None)` from [`read_packet_timeout`], so the
//! caller can re-check its termination flag), and a terminal [`FrameError`].

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Packet, PacketKind};

/// Size of the length field in bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the kind field in bytes
pub const KIND_FIELD_SIZE: usize = 1;

/// Total header size
pub const HEADER_SIZE: usize = LENGTH_FIELD_SIZE + KIND_FIELD_SIZE;

/// Maximum frame size (2 MB), comfortably above the largest legal snapshot
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Frame codec errors
///
/// Every variant is terminal for the session that observes it; a timeout is
/// deliberately not represented here (it is the absence of a frame, not a
/// failure).
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Peer disconnected")]
    Disconnected,

    #[error("Malformed length field: {0}")]
    MalformedLength(u32),

    #[error("Malformed kind byte: {0:#04x}")]
    MalformedKind(u8),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),
}

/// Encode a packet into its wire frame
pub fn encode_packet(packet: &Packet) -> Result<Bytes, FrameError> {
    let total = HEADER_SIZE + packet.payload.len();
    if total > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(total as u32);
    buf.put_u8(packet.kind.as_byte());
    buf.put_slice(&packet.payload);

    Ok(buf.freeze())
}

/// Encode a packet and write the whole frame to the stream
pub async fn write_packet<W>(stream: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_packet(packet)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one complete frame from the stream
///
/// Reads the length field, the kind byte, and then exactly the announced
/// payload. An empty read at any of the three stages means the peer closed
/// the stream and yields [`FrameError::Disconnected`]; partially collected
/// bytes are discarded.
pub async fn read_packet<R>(stream: &mut R) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; LENGTH_FIELD_SIZE];
    read_exact_or_disconnect(stream, &mut length_buf).await?;
    let total = u32::from_be_bytes(length_buf);

    if (total as usize) < HEADER_SIZE {
        return Err(FrameError::MalformedLength(total));
    }
    if (total as usize) > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: total as usize,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut kind_buf = [0u8; KIND_FIELD_SIZE];
    read_exact_or_disconnect(stream, &mut kind_buf).await?;
    let kind = PacketKind::from_byte(kind_buf[0]).ok_or(FrameError::MalformedKind(kind_buf[0]))?;

    let mut payload = vec![0u8; total as usize - HEADER_SIZE];
    read_exact_or_disconnect(stream, &mut payload).await?;

    Ok(Packet::new(kind, payload))
}

/// Read one frame, bounded by a timeout
///
/// Returns `Ok(None)` when the timeout elapses before a frame arrives, so
/// the caller's loop can re-check its termination flag instead of blocking
/// forever.
pub async fn read_packet_timeout<R>(
    stream: &mut R,
    wait: Duration,
) -> Result<Option<Packet>, FrameError>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(wait, read_packet(stream)).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

async fn read_exact_or_disconnect<R>(stream: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Disconnected),
        Err(e) => Err(FrameError::Connection(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Boid;

    fn all_kinds() -> Vec<Packet> {
        vec![
            Packet::exit(),
            Packet::establish_connection(50_001, 50_002),
            Packet::boids_state(&[Boid::new(1, 1.0, 2.0, 3.0, 4.0)]).unwrap(),
            Packet::add_boid(&Boid::new(42, 10.0, 20.0, 0.0, 0.0)),
            Packet::remove_boid(42),
            Packet::error("something went wrong"),
        ]
    }

    #[test]
    fn test_framing_invariant() {
        for packet in all_kinds() {
            let frame = encode_packet(&packet).unwrap();
            let announced = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);

            assert_eq!(announced as usize, frame.len());
            assert_eq!(frame[4], packet.kind.as_byte());
            assert_eq!(&frame[HEADER_SIZE..], &packet.payload[..]);
        }
    }

    #[tokio::test]
    async fn test_roundtrip_every_kind() {
        for packet in all_kinds() {
            let (mut tx, mut rx) = tokio::io::duplex(MAX_FRAME_SIZE);

            write_packet(&mut tx, &packet).await.unwrap();
            let decoded = read_packet(&mut rx).await.unwrap();

            assert_eq!(decoded, packet);
        }
    }

    #[tokio::test]
    async fn test_back_to_back_frames() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);

        let first = Packet::add_boid(&Boid::new(1, 0.0, 0.0, 0.0, 0.0));
        let second = Packet::remove_boid(1);
        write_packet(&mut tx, &first).await.unwrap();
        write_packet(&mut tx, &second).await.unwrap();

        assert_eq!(read_packet(&mut rx).await.unwrap(), first);
        assert_eq!(read_packet(&mut rx).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_disconnected_on_empty_stream() {
        let mut stream: &[u8] = &[];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnected_mid_length() {
        // Two of four length bytes, then EOF
        let mut stream: &[u8] = &[0x00, 0x00];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnected_before_kind() {
        let mut stream: &[u8] = &[0x00, 0x00, 0x00, 0x06];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnected_mid_payload() {
        // Announces 4 payload bytes but delivers one
        let mut stream: &[u8] = &[0x00, 0x00, 0x00, 0x09, 0x21, 0xAA];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_malformed_length() {
        // Total length smaller than the header itself
        let mut stream: &[u8] = &[0x00, 0x00, 0x00, 0x03, 0xFF];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::MalformedLength(3))
        ));
    }

    #[tokio::test]
    async fn test_malformed_kind() {
        let mut stream: &[u8] = &[0x00, 0x00, 0x00, 0x05, 0x7B];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::MalformedKind(0x7B))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_decode() {
        let huge = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        let mut stream: &[u8] = &[huge[0], huge[1], huge[2], huge[3], 0xFF];
        assert!(matches!(
            read_packet(&mut stream).await,
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_on_encode() {
        let packet = Packet::new(PacketKind::Error, vec![0u8; MAX_FRAME_SIZE]);
        assert!(matches!(
            encode_packet(&packet),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_no_event() {
        // Keep both ends alive so the read sees silence, not EOF
        let (_tx, mut rx) = tokio::io::duplex(64);

        let result = read_packet_timeout(&mut rx, Duration::from_millis(50)).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_timeout_still_delivers_ready_frame() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        let packet = Packet::exit();
        write_packet(&mut tx, &packet).await.unwrap();

        let decoded = read_packet_timeout(&mut rx, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(decoded, Some(packet));
    }
}
