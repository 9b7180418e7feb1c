//! Protocol module - Defines the wire protocol for FlockNet communication
//!
//! The protocol uses a simple binary format (all integers big-endian):
//! - 4 bytes total frame length, header included
//! - 1 byte packet kind
//! - Variable length payload
//!
//! Payload layouts per kind live in the packet module; the boid snapshot
//! payload lives in the snapshot module.

mod codec;
mod packet;
mod snapshot;

pub use codec::*;
pub use packet::*;
pub use snapshot::*;

/// Default rendezvous port for FlockNet communication
pub const DEFAULT_PORT: u16 = 5000;
