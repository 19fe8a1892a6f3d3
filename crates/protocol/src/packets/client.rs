//! Client -> Server packets.

use bytes::Bytes;
use glam::Vec2;

use super::{ClientOpcode, UpgradeKind, read_header, write_header};
use crate::{BinaryReader, BinaryWriter, Color, ProtocolError};

/// Per-tick control input from a client.
///
/// Sent at the client's own rate; the server only keeps the newest one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    pub client_id: u32,
    /// Server tick the client believes this input applies to.
    pub tick: u32,
    /// Desired movement direction; magnitude above 1 is clamped server-side.
    pub move_vector: Vec2,
    /// Aim direction in radians.
    pub aim_angle: f32,
    pub fire: bool,
}

/// Parsed client packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Join request (0x01). `resume_token` reattaches to a dropped session.
    Hello {
        name: String,
        color: Color,
        resume_token: Option<u64>,
    },
    /// Input (0x10).
    Input(InputCommand),
    /// Spend an upgrade point (0x11).
    Upgrade { kind: UpgradeKind },
    /// Ping (0x20).
    Ping { nonce: u32 },
    /// Leave (0x7F).
    Goodbye,
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = BinaryReader::new(Bytes::copy_from_slice(data));
        let opcode = read_header(&mut reader)?;

        let packet = match opcode {
            0x01 => {
                let name = reader.get_string()?;
                let color = Color::new(reader.get_u8()?, reader.get_u8()?, reader.get_u8()?);
                let resume_token = if reader.get_bool()? {
                    Some(reader.get_u64()?)
                } else {
                    None
                };
                ClientPacket::Hello {
                    name,
                    color,
                    resume_token,
                }
            }
            0x10 => ClientPacket::Input(InputCommand {
                client_id: reader.get_u32()?,
                tick: reader.get_u32()?,
                move_vector: reader.get_vec2()?,
                aim_angle: reader.get_f32()?,
                fire: reader.get_bool()?,
            }),
            0x11 => ClientPacket::Upgrade {
                kind: UpgradeKind::from_u8(reader.get_u8()?)?,
            },
            0x20 => ClientPacket::Ping {
                nonce: reader.get_u32()?,
            },
            0x7F => ClientPacket::Goodbye,
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };

        reader.finish()?;
        Ok(packet)
    }

    /// Encode the packet into a frame.
    pub fn encode(&self) -> Bytes {
        let mut w = BinaryWriter::with_capacity(32);
        match self {
            ClientPacket::Hello {
                name,
                color,
                resume_token,
            } => {
                write_header(&mut w, ClientOpcode::Hello as u8);
                w.put_string(name);
                w.put_u8(color.r);
                w.put_u8(color.g);
                w.put_u8(color.b);
                w.put_bool(resume_token.is_some());
                if let Some(token) = resume_token {
                    w.put_u64(*token);
                }
            }
            ClientPacket::Input(cmd) => {
                write_header(&mut w, ClientOpcode::Input as u8);
                w.put_u32(cmd.client_id);
                w.put_u32(cmd.tick);
                w.put_vec2(cmd.move_vector);
                w.put_f32(cmd.aim_angle);
                w.put_bool(cmd.fire);
            }
            ClientPacket::Upgrade { kind } => {
                write_header(&mut w, ClientOpcode::Upgrade as u8);
                w.put_u8(*kind as u8);
            }
            ClientPacket::Ping { nonce } => {
                write_header(&mut w, ClientOpcode::Ping as u8);
                w.put_u32(*nonce);
            }
            ClientPacket::Goodbye => write_header(&mut w, ClientOpcode::Goodbye as u8),
        }
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PROTOCOL_VERSION;

    #[test]
    fn test_input_roundtrip() {
        let packet = ClientPacket::Input(InputCommand {
            client_id: 7,
            tick: 1234,
            move_vector: Vec2::new(0.5, -1.0),
            aim_angle: 1.25,
            fire: true,
        });
        assert_eq!(ClientPacket::parse(&packet.encode()), Ok(packet));
    }

    #[test]
    fn test_hello_with_resume_token() {
        let packet = ClientPacket::Hello {
            name: "ace".into(),
            color: Color::new(1, 2, 3),
            resume_token: Some(0xABCD_EF01_2345_6789),
        };
        assert_eq!(ClientPacket::parse(&packet.encode()), Ok(packet));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let data = ClientPacket::Input(InputCommand {
            client_id: 1,
            tick: 1,
            move_vector: Vec2::ZERO,
            aim_angle: 0.0,
            fire: false,
        })
        .encode();
        let cut = &data[..data.len() - 3];
        assert_eq!(ClientPacket::parse(cut), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(
            ClientPacket::parse(&[PROTOCOL_VERSION, 0x55]),
            Err(ProtocolError::InvalidOpcode(0x55))
        );
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut data = ClientPacket::Goodbye.encode().to_vec();
        data.push(0);
        assert_eq!(ClientPacket::parse(&data), Err(ProtocolError::TrailingBytes(1)));
    }
}
