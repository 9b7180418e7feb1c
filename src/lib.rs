//! FlockNet - Networked Boid Flocking
//!
//! An authoritative server simulates a flock of boids and streams full-state
//! snapshots to every connected client over a small custom TCP protocol.
//! Clients can add and remove boids; the server owns the truth.

pub mod config;
pub mod flock;
pub mod network;
pub mod protocol;
