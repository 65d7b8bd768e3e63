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
use serialport::SerialPort as SerialPortTrait;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the bootlink protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Fill `buf` completely. `None` blocks until the bytes arrive;
    /// `Some(t)` fails with `ErrorKind::TimedOut` if they don't arrive in
    /// time.
    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> std::io::Result<()>;

    /// Read until `delimiter` is seen or the timeout passes, returning
    /// whatever arrived. Used to discard line noise after a bad request.
    fn read_until(&mut self, delimiter: u8, timeout: Duration) -> std::io::Result<Vec<u8>>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

// The serialport crate has no "wait forever" timeout, so indefinite reads
// are realized by retrying timed-out reads on a long slice.
const FOREVER_SLICE: Duration = Duration::from_secs(60);

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> std::io::Result<()> {
        self.port
            .set_timeout(timeout.unwrap_or(FOREVER_SLICE))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "serial port closed",
                    ));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut && timeout.is_none() => {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn read_until(&mut self, delimiter: u8, timeout: Duration) -> std::io::Result<Vec<u8>> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let mut collected = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    collected.push(byte[0]);
                    if byte[0] == delimiter {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }

        Ok(collected)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        _timeout: Option<Duration>,
    ) -> std::io::Result<()> {
        for slot in buf.iter_mut() {
            // Out of responses = timeout
            if self.read_pos >= self.read_buffer.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Mock timeout"
                ));
            }

            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    *slot = byte;
                    self.read_pos += 1;
                }
                // None = one whole read times out, even mid-frame
                None => {
                    self.read_pos += 1;
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "Mock timeout"
                    ));
                }
            }
        }

        Ok(())
    }

    fn read_until(&mut self, delimiter: u8, _timeout: Duration) -> std::io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        while self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    collected.push(byte);
                    self.read_pos += 1;
                    if byte == delimiter {
                        break;
                    }
                }
                // None = the timeout passed before a delimiter showed up
                None => {
                    self.read_pos += 1;
                    break;
                }
            }
        }

        Ok(collected)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
