// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! BOOTLINK wire format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! READ/WRITE : [opcode:2]
//! DATA       : [opcode:2][block:2][length:2][payload 0..512]
//! ACK        : [opcode:2][block:2]
//! ERROR      : [opcode:2][0:2][message bytes]
//! ```
//!
//! A DATA payload shorter than [`BLOCK_SIZE`] (possibly empty) is the final
//! frame of a transfer.

use std::time::Duration;

/// Payload bytes per DATA frame
pub const BLOCK_SIZE: usize = 512;

/// How long to wait for the acknowledgment of each DATA frame
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport reads per block before the transfer is abandoned
pub const MAX_RETRIES: u32 = 3;

/// How long to drain trailing bytes after an unrecognized request
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Length of a READ/WRITE request on the wire
pub const REQUEST_LEN: usize = 2;

/// Length of an ACK frame on the wire
pub const ACK_LEN: usize = 4;

// ============================================================================
// Opcodes
// ============================================================================

/// Protocol message opcodes, sent as 2-byte big-endian integers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// Peer requests the hosted file
    Read = 1,
    /// Peer wants to send a file (never serviced)
    Write = 2,
    /// One block of the hosted file
    Data = 3,
    /// Peer confirms receipt of one block
    Ack = 4,
    /// Abort notification carrying a message
    Error = 5,
}

impl Opcode {
    /// Decode the leading 2-byte opcode field of a frame.
    pub fn decode(bytes: &[u8]) -> Result<Opcode, MalformedFrame> {
        if bytes.len() < 2 {
            return Err(MalformedFrame::Truncated);
        }
        match u16::from_be_bytes([bytes[0], bytes[1]]) {
            1 => Ok(Opcode::Read),
            2 => Ok(Opcode::Write),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            other => Err(MalformedFrame::UnknownOpcode(other)),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedFrame {
    Truncated,
    UnknownOpcode(u16),
}

impl std::fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedFrame::Truncated => write!(f, "frame too short"),
            MalformedFrame::UnknownOpcode(op) => write!(f, "unknown opcode {}", op),
        }
    }
}

impl std::error::Error for MalformedFrame {}

// ============================================================================
// Frame Encoding
// ============================================================================

/// Build a DATA frame for one block.
///
/// The length field duplicates what the transport framing already implies
/// but stays on the wire for compatibility with the peer bootloader.
pub fn encode_data(block: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.extend_from_slice(&(Opcode::Data as u16).to_be_bytes());
    frame.extend_from_slice(&block.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Build an ACK frame for one block.
pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ACK_LEN);
    frame.extend_from_slice(&(Opcode::Ack as u16).to_be_bytes());
    frame.extend_from_slice(&block.to_be_bytes());
    frame
}

/// Decode an ACK frame into its opcode and block number.
pub fn decode_ack(bytes: &[u8]) -> Result<(Opcode, u16), MalformedFrame> {
    let opcode = Opcode::decode(bytes)?;
    if bytes.len() < ACK_LEN {
        return Err(MalformedFrame::Truncated);
    }
    let block = u16::from_be_bytes([bytes[2], bytes[3]]);
    Ok((opcode, block))
}

/// Build an ERROR frame. The block field is always zero.
pub fn encode_error(message: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + message.len());
    frame.extend_from_slice(&(Opcode::Error as u16).to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(message.as_bytes());
    frame
}

// ============================================================================
// Frame Value Type
// ============================================================================

/// A fully decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Read,
    Write,
    Data { block: u16, payload: Vec<u8> },
    Ack { block: u16 },
    Error { message: String },
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Read => (Opcode::Read as u16).to_be_bytes().to_vec(),
            Frame::Write => (Opcode::Write as u16).to_be_bytes().to_vec(),
            Frame::Data { block, payload } => encode_data(*block, payload),
            Frame::Ack { block } => encode_ack(*block),
            Frame::Error { message } => encode_error(message),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, MalformedFrame> {
        match Opcode::decode(bytes)? {
            Opcode::Read => Ok(Frame::Read),
            Opcode::Write => Ok(Frame::Write),
            Opcode::Data => {
                if bytes.len() < 6 {
                    return Err(MalformedFrame::Truncated);
                }
                let block = u16::from_be_bytes([bytes[2], bytes[3]]);
                let length = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
                if bytes.len() < 6 + length {
                    return Err(MalformedFrame::Truncated);
                }
                Ok(Frame::Data {
                    block,
                    payload: bytes[6..6 + length].to_vec(),
                })
            }
            Opcode::Ack => {
                let (_, block) = decode_ack(bytes)?;
                Ok(Frame::Ack { block })
            }
            Opcode::Error => {
                if bytes.len() < 4 {
                    return Err(MalformedFrame::Truncated);
                }
                Ok(Frame::Error {
                    message: String::from_utf8_lossy(&bytes[4..]).into_owned(),
                })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_opcode_valid() {
        assert_eq!(Opcode::decode(&[0, 1]), Ok(Opcode::Read));
        assert_eq!(Opcode::decode(&[0, 2]), Ok(Opcode::Write));
        assert_eq!(Opcode::decode(&[0, 3]), Ok(Opcode::Data));
        assert_eq!(Opcode::decode(&[0, 4]), Ok(Opcode::Ack));
        assert_eq!(Opcode::decode(&[0, 5]), Ok(Opcode::Error));
    }

    #[test]
    fn test_decode_opcode_invalid() {
        assert_eq!(Opcode::decode(&[0, 0]), Err(MalformedFrame::UnknownOpcode(0)));
        assert_eq!(Opcode::decode(&[0, 6]), Err(MalformedFrame::UnknownOpcode(6)));
        assert_eq!(
            Opcode::decode(&[0xFF, 0xFF]),
            Err(MalformedFrame::UnknownOpcode(0xFFFF))
        );
        assert_eq!(Opcode::decode(&[1]), Err(MalformedFrame::Truncated));
        assert_eq!(Opcode::decode(&[]), Err(MalformedFrame::Truncated));
    }

    #[test]
    fn test_decode_opcode_big_endian() {
        // [1, 0] is 256, not READ
        assert_eq!(
            Opcode::decode(&[1, 0]),
            Err(MalformedFrame::UnknownOpcode(256))
        );
    }

    #[test]
    fn test_encode_data_layout() {
        let frame = encode_data(0x0102, b"abc");
        assert_eq!(frame, vec![0, 3, 0x01, 0x02, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_data_empty_payload() {
        let frame = encode_data(7, &[]);
        assert_eq!(frame, vec![0, 3, 0, 7, 0, 0]);
    }

    #[test]
    fn test_encode_data_full_block() {
        let payload = [0xAA; BLOCK_SIZE];
        let frame = encode_data(1, &payload);
        assert_eq!(frame.len(), 6 + BLOCK_SIZE);
        assert_eq!(&frame[4..6], &[0x02, 0x00]); // 512 big-endian
    }

    #[test]
    fn test_encode_ack_layout() {
        assert_eq!(encode_ack(0), vec![0, 4, 0, 0]);
        assert_eq!(encode_ack(0xABCD), vec![0, 4, 0xAB, 0xCD]);
    }

    #[test]
    fn test_decode_ack() {
        assert_eq!(decode_ack(&[0, 4, 0x01, 0x00]), Ok((Opcode::Ack, 256)));
        // Any valid opcode decodes; the caller checks it is actually an ACK
        assert_eq!(decode_ack(&[0, 3, 0, 9]), Ok((Opcode::Data, 9)));
        assert_eq!(decode_ack(&[0, 4, 1]), Err(MalformedFrame::Truncated));
        assert_eq!(decode_ack(&[0, 9, 0, 0]), Err(MalformedFrame::UnknownOpcode(9)));
    }

    #[test]
    fn test_encode_error_layout() {
        let frame = encode_error("oops");
        assert_eq!(frame, vec![0, 5, 0, 0, b'o', b'o', b'p', b's']);
    }

    #[test]
    fn test_frame_round_trip() {
        let frames = vec![
            Frame::Read,
            Frame::Write,
            Frame::Data {
                block: 0,
                payload: vec![],
            },
            Frame::Data {
                block: 65535,
                payload: vec![1, 2, 3, 4, 5],
            },
            Frame::Ack { block: 2 },
            Frame::Error {
                message: "no ack for block 2".to_string(),
            },
        ];

        for frame in frames {
            let decoded = Frame::decode(&frame.encode()).expect("Should decode");
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_frame_decode_truncated_data() {
        // Length field claims 4 bytes but only 2 follow
        let bytes = [0, 3, 0, 0, 0, 4, 1, 2];
        assert_eq!(Frame::decode(&bytes), Err(MalformedFrame::Truncated));
    }
}
