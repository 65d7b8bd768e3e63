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

use std::marker::PhantomData;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use crate::protocol::{encode_error, Opcode, DRAIN_TIMEOUT, REQUEST_LEN};
use crate::serial::SerialPort;
use crate::transfer::{BlockSender, TransferError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(err)
    }
}

// ============================================================================
// States
// ============================================================================

pub struct WaitRequest;
pub struct SendFile;
pub struct ReportError;
/// Accepting a file from the peer. Enumerated for completeness; nothing
/// transitions here, and stepping it only reports the condition.
pub struct ReceiveFile;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ServerFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    file: PathBuf,
    error_message: String,
    max_retries: u32,
    ack_timeout: Duration,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ServerState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ServerFsm<S> {
    fn transition<T>(self) -> Box<ServerFsm<T>> {
        Box::new(ServerFsm {
            state: PhantomData,
            serial: self.serial,
            file: self.file,
            error_message: self.error_message,
            max_retries: self.max_retries,
            ack_timeout: self.ack_timeout,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ServerError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ServerError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    // Requests are fixed-length; whatever follows a bad one up to the next
    // newline is line noise and gets dropped before replying.
    fn drain_noise(&mut self) -> Result<(), ServerError> {
        let trailing = match self.serial.read_until(b'\n', DRAIN_TIMEOUT) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.io_error(e)),
        };
        if self.debug && !trailing.is_empty() {
            println!("Discarded {} trailing bytes", trailing.len());
        }
        Ok(())
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ServerState for ServerFsm<WaitRequest> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        // No timeout here: idle until the peer asks for something
        let mut request = [0u8; REQUEST_LEN];
        match fsm.serial.read_exact_timeout(&mut request, None) {
            Ok(()) => {}
            Err(e) => return Err(fsm.io_error(e)),
        }

        match Opcode::decode(&request) {
            Ok(Opcode::Read) => {
                println!("Received read request for {}", fsm.file.display());
                let next = fsm.transition::<SendFile>();
                Ok(next as Box<dyn ServerState>)
            }
            Ok(Opcode::Write) => {
                if fsm.debug { println!("Refusing write request"); }
                fsm.error_message = "unimplemented opcode".to_string();
                let next = fsm.transition::<ReportError>();
                Ok(next as Box<dyn ServerState>)
            }
            Ok(opcode) => {
                if fsm.debug { println!("Unexpected opcode {:?} while waiting", opcode); }
                fsm.drain_noise()?;
                fsm.error_message = "invalid opcode in waiting state".to_string();
                let next = fsm.transition::<ReportError>();
                Ok(next as Box<dyn ServerState>)
            }
            Err(e) => {
                if fsm.debug { println!("Malformed request: {}", e); }
                fsm.drain_noise()?;
                fsm.error_message = "invalid opcode in waiting state".to_string();
                let next = fsm.transition::<ReportError>();
                Ok(next as Box<dyn ServerState>)
            }
        }
    }
}

impl ServerState for ServerFsm<SendFile> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        // Fresh handle per transfer, closed when the transfer ends
        let file = match File::open(&fsm.file) {
            Ok(file) => file,
            Err(e) => {
                if fsm.debug { println!("Failed to open {}: {}", fsm.file.display(), e); }
                fsm.error_message = format!("cannot open {}", fsm.file.display());
                let next = fsm.transition::<ReportError>();
                return Ok(next as Box<dyn ServerState>);
            }
        };

        let sender = BlockSender::new(file, fsm.max_retries, fsm.ack_timeout, fsm.debug);
        match sender.run(&mut *fsm.serial) {
            Ok(blocks) => {
                println!("Transfer complete ({} blocks)", blocks);
                let next = fsm.transition::<WaitRequest>();
                Ok(next as Box<dyn ServerState>)
            }
            Err(TransferError::NoAck { block }) => {
                fsm.error_message = format!("no ack for block {}", block);
                let next = fsm.transition::<ReportError>();
                Ok(next as Box<dyn ServerState>)
            }
            Err(TransferError::Io(e)) => Err(fsm.io_error(e)),
        }
    }
}

impl ServerState for ServerFsm<ReportError> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        let message = std::mem::take(&mut fsm.error_message);
        println!("Reporting error to peer: {}", message);

        match fsm.serial.write_all(&encode_error(&message)) {
            Ok(()) => {
                let next = fsm.transition::<WaitRequest>();
                Ok(next as Box<dyn ServerState>)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl ServerState for ServerFsm<ReceiveFile> {
    fn step(self: Box<Self>) -> Result<Box<dyn ServerState>, ServerError> {
        let mut fsm = *self;

        println!("Hit unimplemented state ReceiveFile");
        fsm.error_message = "unimplemented state".to_string();
        let next = fsm.transition::<ReportError>();
        Ok(next as Box<dyn ServerState>)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ServerFsm<WaitRequest> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        file: PathBuf,
        max_retries: u32,
        ack_timeout: Duration,
        debug: bool,
    ) -> Box<dyn ServerState> {
        Box::new(ServerFsm {
            state: PhantomData::<WaitRequest>,
            serial,
            file,
            error_message: String::new(),
            max_retries,
            ack_timeout,
            debug,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
