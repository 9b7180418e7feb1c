//! Packet definitions
//!
//! Defines the closed set of packet kinds exchanged between server and
//! client, plus the constructors and parsers for each kind-specific payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::snapshot::{self, Boid, SnapshotError, BOID_RECORD_SIZE};

/// Payload parse errors
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("{kind:?} payload must be {expected} bytes, got {actual}")]
    WrongSize {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// All packet kinds on the wire
///
/// The kind space is closed; an unknown byte is a framing error, not an
/// extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Rendezvous reply carrying the two negotiated data ports
    EstablishConnection = 0x01,
    /// Full snapshot of the authoritative entity set
    BoidsState = 0x10,
    /// Client request to add one boid
    AddBoid = 0x20,
    /// Client request to remove one boid by id
    RemoveBoid = 0x21,
    /// Diagnostic text from the peer
    Error = 0xF0,
    /// Graceful goodbye; terminates the session on both ends
    Exit = 0xFF,
}

impl PacketKind {
    /// Wire byte for this kind
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte; None for anything outside the closed set
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketKind::EstablishConnection),
            0x10 => Some(PacketKind::BoidsState),
            0x20 => Some(PacketKind::AddBoid),
            0x21 => Some(PacketKind::RemoveBoid),
            0xF0 => Some(PacketKind::Error),
            0xFF => Some(PacketKind::Exit),
            _ => None,
        }
    }
}

/// One kind-tagged message unit, immutable once constructed
///
/// The payload is opaque to the frame codec; its layout is fixed per kind
/// and handled by the constructors and parsers below.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Graceful goodbye (empty payload)
    pub fn exit() -> Self {
        Self::new(PacketKind::Exit, Bytes::new())
    }

    /// Rendezvous port announcement: outbound port first, then inbound
    pub fn establish_connection(outbound_port: u16, inbound_port: u16) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u16(outbound_port);
        buf.put_u16(inbound_port);
        Self::new(PacketKind::EstablishConnection, buf.freeze())
    }

    /// Full-state snapshot of the entity set
    pub fn boids_state(boids: &[Boid]) -> Result<Self, SnapshotError> {
        Ok(Self::new(PacketKind::BoidsState, snapshot::encode_boids(boids)?))
    }

    /// Request to add one boid (the client-generated id is authoritative)
    pub fn add_boid(boid: &Boid) -> Self {
        let mut buf = BytesMut::with_capacity(BOID_RECORD_SIZE);
        boid.encode_record(&mut buf);
        Self::new(PacketKind::AddBoid, buf.freeze())
    }

    /// Request to remove one boid by id
    pub fn remove_boid(id: u32) -> Self {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u32(id);
        Self::new(PacketKind::RemoveBoid, buf.freeze())
    }

    /// Diagnostic text for the peer
    pub fn error(message: &str) -> Self {
        Self::new(PacketKind::Error, Bytes::copy_from_slice(message.as_bytes()))
    }

    /// Parse an `EstablishConnection` payload into (outbound, inbound) ports
    pub fn parse_establish_connection(&self) -> Result<(u16, u16), PayloadError> {
        let mut cursor = self.expect_payload(PacketKind::EstablishConnection, 4)?;
        let outbound = cursor.get_u16();
        let inbound = cursor.get_u16();
        Ok((outbound, inbound))
    }

    /// Parse a `BoidsState` payload into the entity list
    pub fn parse_boids_state(&self) -> Result<Vec<Boid>, SnapshotError> {
        snapshot::decode_boids(&self.payload)
    }

    /// Parse an `AddBoid` payload into one boid record
    pub fn parse_add_boid(&self) -> Result<Boid, PayloadError> {
        let mut cursor = self.expect_payload(PacketKind::AddBoid, BOID_RECORD_SIZE)?;
        Ok(Boid::decode_record(&mut cursor))
    }

    /// Parse a `RemoveBoid` payload into the target id
    pub fn parse_remove_boid(&self) -> Result<u32, PayloadError> {
        let mut cursor = self.expect_payload(PacketKind::RemoveBoid, 4)?;
        Ok(cursor.get_u32())
    }

    /// Parse an `Error` payload into its diagnostic text
    pub fn parse_error(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    fn expect_payload(&self, kind: PacketKind, expected: usize) -> Result<&[u8], PayloadError> {
        if self.payload.len() != expected {
            return Err(PayloadError::WrongSize {
                kind,
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes_roundtrip() {
        let kinds = [
            PacketKind::EstablishConnection,
            PacketKind::BoidsState,
            PacketKind::AddBoid,
            PacketKind::RemoveBoid,
            PacketKind::Error,
            PacketKind::Exit,
        ];

        for kind in kinds {
            assert_eq!(PacketKind::from_byte(kind.as_byte()), Some(kind));
        }

        assert_eq!(PacketKind::from_byte(0x00), None);
        assert_eq!(PacketKind::from_byte(0x7B), None);
    }

    #[test]
    fn test_exit_is_0xff() {
        // Fixed by the wire protocol; everything recognizes this byte
        assert_eq!(PacketKind::Exit.as_byte(), 0xFF);
        assert!(Packet::exit().payload.is_empty());
    }

    #[test]
    fn test_establish_connection_payload() {
        let packet = Packet::establish_connection(0x1234, 0x5678);
        assert_eq!(&packet.payload[..], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(packet.parse_establish_connection().unwrap(), (0x1234, 0x5678));
    }

    #[test]
    fn test_establish_connection_wrong_size() {
        let packet = Packet::new(PacketKind::EstablishConnection, vec![0x12, 0x34]);
        assert!(matches!(
            packet.parse_establish_connection(),
            Err(PayloadError::WrongSize { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn test_add_boid_roundtrip() {
        let boid = Boid::new(42, 10.0, 20.0, 0.0, 0.0);
        let packet = Packet::add_boid(&boid);
        assert_eq!(packet.payload.len(), BOID_RECORD_SIZE);
        assert_eq!(packet.parse_add_boid().unwrap(), boid);
    }

    #[test]
    fn test_add_boid_wrong_size() {
        let packet = Packet::new(PacketKind::AddBoid, vec![0u8; BOID_RECORD_SIZE - 1]);
        assert!(packet.parse_add_boid().is_err());
    }

    #[test]
    fn test_remove_boid_roundtrip() {
        let packet = Packet::remove_boid(0xDEAD_BEEF);
        assert_eq!(&packet.payload[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(packet.parse_remove_boid().unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_error_text() {
        let packet = Packet::error("flock at capacity");
        assert_eq!(packet.parse_error(), "flock at capacity");
    }

    #[test]
    fn test_boids_state_roundtrip() {
        let boids = vec![
            Boid::new(1, 1.0, 2.0, 3.0, 4.0),
            Boid::new(2, 5.0, 6.0, 7.0, 8.0),
        ];
        let packet = Packet::boids_state(&boids).unwrap();
        assert_eq!(packet.kind, PacketKind::BoidsState);
        assert_eq!(packet.parse_boids_state().unwrap(), boids);
    }
}
