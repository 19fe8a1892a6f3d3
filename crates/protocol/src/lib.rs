//! Shared protocol crate for Bulletverse.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - Packet definitions with their encoders and decoders
//! - A client-side world view that rebuilds state from snapshots
//!
//! Every frame starts with the protocol version byte followed by an opcode, so
//! a client and server built from different protocol revisions reject each
//! other on the first message.

mod binary;
mod error;
pub mod packets;
pub mod view;

pub use binary::{BinaryReader, BinaryWriter};
pub use error::ProtocolError;

/// Wire protocol revision. Bump on any incompatible change.
pub const PROTOCOL_VERSION: u8 = 1;

/// RGB color used for tanks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}
