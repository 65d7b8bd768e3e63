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

use std::time::Duration;
use crate::protocol::{decode_ack, Opcode, ACK_LEN};
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum AckError {
    /// No matching acknowledgment within the retry budget
    NoAck { expected_block: u16 },
    Io(std::io::Error),
}

impl std::fmt::Display for AckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckError::NoAck { expected_block } => {
                write!(f, "no ack for block {}", expected_block)
            }
            AckError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for AckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AckError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AckError {
    fn from(err: std::io::Error) -> Self {
        AckError::Io(err)
    }
}

// ============================================================================
// Acknowledgment Tracker
// ============================================================================

/// Wait for the peer to acknowledge `expected_block`.
///
/// Each attempt reads one whole ACK frame from the transport. A timeout, a
/// malformed reply, or a reply for the wrong block consumes one attempt and
/// triggers another read of the transport. The DATA frame is never resent
/// here; the peer is expected to keep acknowledging until heard.
pub fn await_ack(
    serial: &mut dyn SerialPort,
    expected_block: u16,
    max_retries: u32,
    ack_timeout: Duration,
    debug: bool,
) -> Result<(), AckError> {
    for attempt in 1..=max_retries {
        let mut reply = [0u8; ACK_LEN];
        match serial.read_exact_timeout(&mut reply, Some(ack_timeout)) {
            Ok(()) => match decode_ack(&reply) {
                Ok((Opcode::Ack, block)) if block == expected_block => {
                    if debug { println!("Ack for block {}", block); }
                    return Ok(());
                }
                Ok((opcode, block)) => {
                    println!(
                        "Expecting ack for block {}. Instead got {:?} with block {}",
                        expected_block, opcode, block
                    );
                }
                Err(e) => {
                    println!(
                        "Expecting ack for block {}. Instead got malformed reply: {}",
                        expected_block, e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                if debug {
                    println!(
                        "No reply for block {} (attempt {}/{})",
                        expected_block, attempt, max_retries
                    );
                }
            }
            Err(e) => return Err(AckError::Io(e)),
        }
    }

    // If we got here, then we failed to ack the block.
    Err(AckError::NoAck { expected_block })
}

// ============================================================================
// Tests
// ============================================================================
