//! Server -> Client packets.

use bytes::Bytes;
use glam::Vec2;

use super::{DisconnectReason, RejectReason, ServerOpcode, StateSnapshot, read_header, write_header};
use crate::{BinaryReader, BinaryWriter, ProtocolError};

/// Parsed server packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// Handshake accepted (0x01).
    Accept {
        client_id: u32,
        /// Presented in a later `Hello` to resume this session after a drop.
        resume_token: u64,
        tick_rate: u16,
        arena: Vec2,
        server_name: String,
    },
    /// Handshake rejected (0x02).
    Reject { reason: RejectReason },
    /// World state (0x10).
    Snapshot(StateSnapshot),
    /// Ping reply (0x20).
    Pong { nonce: u32 },
    /// Connection is being closed (0x7F).
    Disconnect { reason: DisconnectReason },
}

impl ServerPacket {
    /// Parse a server packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = BinaryReader::new(Bytes::copy_from_slice(data));
        let opcode = read_header(&mut reader)?;

        let packet = match opcode {
            0x01 => ServerPacket::Accept {
                client_id: reader.get_u32()?,
                resume_token: reader.get_u64()?,
                tick_rate: reader.get_u16()?,
                arena: reader.get_vec2()?,
                server_name: reader.get_string()?,
            },
            0x02 => ServerPacket::Reject {
                reason: RejectReason::from_u8(reader.get_u8()?)?,
            },
            0x10 => ServerPacket::Snapshot(StateSnapshot::read(&mut reader)?),
            0x20 => ServerPacket::Pong {
                nonce: reader.get_u32()?,
            },
            0x7F => ServerPacket::Disconnect {
                reason: DisconnectReason::from_u8(reader.get_u8()?)?,
            },
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };

        reader.finish()?;
        Ok(packet)
    }

    /// Encode the packet into a frame.
    pub fn encode(&self) -> Bytes {
        match self {
            ServerPacket::Accept {
                client_id,
                resume_token,
                tick_rate,
                arena,
                server_name,
            } => {
                let mut w = BinaryWriter::with_capacity(32 + server_name.len());
                write_header(&mut w, ServerOpcode::Accept as u8);
                w.put_u32(*client_id);
                w.put_u64(*resume_token);
                w.put_u16(*tick_rate);
                w.put_vec2(*arena);
                w.put_string(server_name);
                w.finish()
            }
            ServerPacket::Reject { reason } => {
                let mut w = BinaryWriter::with_capacity(3);
                write_header(&mut w, ServerOpcode::Reject as u8);
                w.put_u8(*reason as u8);
                w.finish()
            }
            ServerPacket::Snapshot(snapshot) => {
                let mut w = BinaryWriter::with_capacity(16 + snapshot.entities.len() * 48);
                write_header(&mut w, ServerOpcode::Snapshot as u8);
                snapshot.write(&mut w);
                w.finish()
            }
            ServerPacket::Pong { nonce } => {
                let mut w = BinaryWriter::with_capacity(6);
                write_header(&mut w, ServerOpcode::Pong as u8);
                w.put_u32(*nonce);
                w.finish()
            }
            ServerPacket::Disconnect { reason } => {
                let mut w = BinaryWriter::with_capacity(3);
                write_header(&mut w, ServerOpcode::Disconnect as u8);
                w.put_u8(*reason as u8);
                w.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROTOCOL_VERSION;

    #[test]
    fn test_accept_roundtrip() {
        let packet = ServerPacket::Accept {
            client_id: 4,
            resume_token: 42,
            tick_rate: 30,
            arena: Vec2::new(1280.0, 720.0),
            server_name: "Bulletverse".into(),
        };
        assert_eq!(ServerPacket::parse(&packet.encode()), Ok(packet));
    }

    #[test]
    fn test_unknown_reject_reason() {
        let data = [PROTOCOL_VERSION, ServerOpcode::Reject as u8, 200];
        assert!(matches!(
            ServerPacket::parse(&data),
            Err(ProtocolError::InvalidTag { .. })
        ));
    }
}
