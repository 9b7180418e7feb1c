//! Boid snapshot payload codec
//!
//! Serializes the full entity set into the `BoidsState` payload: a 2-byte
//! big-endian count followed by one fixed 20-byte record per boid. The codec
//! is pure and stateless; the server encodes, the client decodes, and the
//! same record format is reused by the `AddBoid` payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the count prefix in bytes
pub const COUNT_FIELD_SIZE: usize = 2;

/// Size of one encoded boid record: x, y, vx, vy (f32) + id (u32)
pub const BOID_RECORD_SIZE: usize = 20;

/// Most boids one snapshot can carry (limited by the u16 count field)
pub const MAX_BOIDS_PER_SNAPSHOT: usize = u16::MAX as usize;

/// Snapshot codec errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Too many boids for one snapshot: {count} (max: {max})")]
    TooManyBoids { count: usize, max: usize },

    #[error("Snapshot payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// One tracked entity as it travels on the wire
///
/// The id is assigned randomly at creation and is the only stable identity;
/// position and velocity are fully replaced by every snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boid {
    /// Stable entity identifier
    pub id: u32,
    /// Position
    pub x: f32,
    pub y: f32,
    /// Velocity
    pub vx: f32,
    pub vy: f32,
}

impl Boid {
    pub fn new(id: u32, x: f32, y: f32, vx: f32, vy: f32) -> Self {
        Self { id, x, y, vx, vy }
    }

    /// Append this boid's 20-byte record to a buffer
    pub fn encode_record(&self, buf: &mut BytesMut) {
        buf.put_f32(self.x);
        buf.put_f32(self.y);
        buf.put_f32(self.vx);
        buf.put_f32(self.vy);
        buf.put_u32(self.id);
    }

    /// Read one 20-byte record from the front of a buffer
    ///
    /// The caller must have checked that at least [`BOID_RECORD_SIZE`] bytes
    /// are available.
    pub fn decode_record(buf: &mut impl Buf) -> Self {
        let x = buf.get_f32();
        let y = buf.get_f32();
        let vx = buf.get_f32();
        let vy = buf.get_f32();
        let id = buf.get_u32();
        Self { id, x, y, vx, vy }
    }
}

/// Encode an entity list into a `BoidsState` payload
pub fn encode_boids(boids: &[Boid]) -> Result<Bytes, SnapshotError> {
    if boids.len() > MAX_BOIDS_PER_SNAPSHOT {
        return Err(SnapshotError::TooManyBoids {
            count: boids.len(),
            max: MAX_BOIDS_PER_SNAPSHOT,
        });
    }

    let mut buf = BytesMut::with_capacity(COUNT_FIELD_SIZE + boids.len() * BOID_RECORD_SIZE);
    buf.put_u16(boids.len() as u16);
    for boid in boids {
        boid.encode_record(&mut buf);
    }

    Ok(buf.freeze())
}

/// Decode a `BoidsState` payload back into an entity list
///
/// The count prefix is authoritative: exactly that many records are read and
/// any trailing bytes are ignored.
pub fn decode_boids(payload: &[u8]) -> Result<Vec<Boid>, SnapshotError> {
    if payload.len() < COUNT_FIELD_SIZE {
        return Err(SnapshotError::Truncated {
            needed: COUNT_FIELD_SIZE,
            available: payload.len(),
        });
    }

    let mut cursor = payload;
    let count = cursor.get_u16() as usize;

    let needed = COUNT_FIELD_SIZE + count * BOID_RECORD_SIZE;
    if payload.len() < needed {
        return Err(SnapshotError::Truncated {
            needed,
            available: payload.len(),
        });
    }

    let mut boids = Vec::with_capacity(count);
    for _ in 0..count {
        boids.push(Boid::decode_record(&mut cursor));
    }

    Ok(boids)
}
