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

use std::io::Read;
use std::time::Duration;
use crate::ack::{await_ack, AckError};
use crate::protocol::{encode_data, BLOCK_SIZE};
use crate::serial::SerialPort;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum TransferError {
    /// The peer stopped acknowledging at this block
    NoAck { block: u16 },
    Io(std::io::Error),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::NoAck { block } => write!(f, "no ack for block {}", block),
            TransferError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err)
    }
}

// ============================================================================
// Block Transfer Driver
// ============================================================================

/// Streams one source to the peer as ordered DATA frames, waiting for the
/// matching ACK after each one.
///
/// The source is consumed by the transfer and closed when it ends, on every
/// exit path.
pub struct BlockSender<R> {
    source: R,
    max_retries: u32,
    ack_timeout: Duration,
    debug: bool,
}

impl<R: Read> BlockSender<R> {
    pub fn new(source: R, max_retries: u32, ack_timeout: Duration, debug: bool) -> Self {
        BlockSender {
            source,
            max_retries,
            ack_timeout,
            debug,
        }
    }

    /// Run the transfer to completion. Returns the number of DATA frames
    /// sent, counting the short (possibly empty) terminal block.
    pub fn run(mut self, serial: &mut dyn SerialPort) -> Result<u16, TransferError> {
        let mut block_counter: u16 = 0;
        let mut buffer = [0u8; BLOCK_SIZE];

        // A short final block ends the transfer; a file that is an exact
        // multiple of the block size still gets an empty terminal block.
        let mut last_len = BLOCK_SIZE;
        while last_len == BLOCK_SIZE {
            let len = read_block(&mut self.source, &mut buffer)?;
            last_len = len;

            serial.write_all(&encode_data(block_counter, &buffer[..len]))?;
            if self.debug { println!("Sent block {} ({} bytes)", block_counter, len); }

            match await_ack(
                serial,
                block_counter,
                self.max_retries,
                self.ack_timeout,
                self.debug,
            ) {
                Ok(()) => {
                    block_counter = block_counter.wrapping_add(1);
                }
                Err(AckError::NoAck { expected_block }) => {
                    return Err(TransferError::NoAck {
                        block: expected_block,
                    });
                }
                Err(AckError::Io(e)) => return Err(TransferError::Io(e)),
            }
        }

        Ok(block_counter)
    }
}

/// Fill `buf` from the source, stopping early only at end of file.
fn read_block(source: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use crate::protocol::{encode_ack, ACK_TIMEOUT, MAX_RETRIES};
    use crate::serial::MockSerialPort;

    fn ack_responses(blocks: &[u16]) -> Vec<Option<u8>> {
        blocks
            .iter()
            .flat_map(|&b| encode_ack(b).into_iter().map(Some))
            .collect()
    }

    fn run_transfer(
        path: &std::path::Path,
        responses: Vec<Option<u8>>,
        expected_writes: Vec<u8>,
    ) -> Result<u16, TransferError> {
        let mut mock = MockSerialPort::new(responses, expected_writes);
        let file = File::open(path).expect("Should open fixture");
        let sender = BlockSender::new(file, MAX_RETRIES, ACK_TIMEOUT, true);
        sender.run(&mut mock)
    }

    #[test]
    fn test_exact_block_file() {
        let test_file = std::env::temp_dir().join("transfer_exact.bin");
        let content = vec![0x42u8; BLOCK_SIZE];
        std::fs::write(&test_file, &content).unwrap();

        // Block 0 carries the whole file, block 1 is the empty terminator
        let mut expected_writes = encode_data(0, &content);
        expected_writes.extend_from_slice(&encode_data(1, &[]));

        let blocks = run_transfer(&test_file, ack_responses(&[0, 1]), expected_writes)
            .expect("Transfer should complete");
        assert_eq!(blocks, 2);

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_partial_final_block() {
        let test_file = std::env::temp_dir().join("transfer_partial.bin");
        let content: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        std::fs::write(&test_file, &content).unwrap();

        let mut expected_writes = encode_data(0, &content[..512]);
        expected_writes.extend_from_slice(&encode_data(1, &content[512..]));

        let blocks = run_transfer(&test_file, ack_responses(&[0, 1]), expected_writes)
            .expect("Transfer should complete");
        assert_eq!(blocks, 2);

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_empty_file() {
        let test_file = std::env::temp_dir().join("transfer_empty.bin");
        std::fs::write(&test_file, b"").unwrap();

        let blocks = run_transfer(&test_file, ack_responses(&[0]), encode_data(0, &[]))
            .expect("Transfer should complete");
        assert_eq!(blocks, 1);

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_block_numbers_are_sequential() {
        let test_file = std::env::temp_dir().join("transfer_seq.bin");
        let content: Vec<u8> = (0..1100).map(|i| (i % 251) as u8).collect();
        std::fs::write(&test_file, &content).unwrap();

        let mut expected_writes = encode_data(0, &content[..512]);
        expected_writes.extend_from_slice(&encode_data(1, &content[512..1024]));
        expected_writes.extend_from_slice(&encode_data(2, &content[1024..]));

        let blocks = run_transfer(&test_file, ack_responses(&[0, 1, 2]), expected_writes)
            .expect("Transfer should complete");
        assert_eq!(blocks, 3);

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_no_ack_aborts_transfer() {
        let test_file = std::env::temp_dir().join("transfer_abort.bin");
        let content = vec![0x11u8; 600];
        std::fs::write(&test_file, &content).unwrap();

        // Block 0 acked, block 1 starved for the whole retry budget.
        // No DATA frame after block 1 may be sent.
        let mut responses = ack_responses(&[0]);
        for _ in 0..MAX_RETRIES {
            responses.push(None);
        }

        let mut expected_writes = encode_data(0, &content[..512]);
        expected_writes.extend_from_slice(&encode_data(1, &content[512..]));

        match run_transfer(&test_file, responses, expected_writes) {
            Err(TransferError::NoAck { block: 1 }) => {}
            other => panic!("Expected NoAck for block 1, got {:?}", other),
        }

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_wrong_block_acks_exhaust_budget() {
        let test_file = std::env::temp_dir().join("transfer_wrong_ack.bin");
        std::fs::write(&test_file, b"x").unwrap();

        // The peer keeps acking a block we never sent
        let responses = ack_responses(&[9, 9, 9]);

        match run_transfer(&test_file, responses, encode_data(0, b"x")) {
            Err(TransferError::NoAck { block: 0 }) => {}
            other => panic!("Expected NoAck for block 0, got {:?}", other),
        }

        std::fs::remove_file(&test_file).ok();
    }
}
