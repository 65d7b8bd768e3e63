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

// Bootlink firmware image server
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use bootlink::{protocol, server};
use bootlink::serial::RealSerialPort;

#[derive(Parser)]
#[command(name = "bootlink")]
#[command(about = "TFTP-style serial server for pushing a firmware image to a bootloader", long_about = None)]
struct Cli {
    /// File to serve (e.g. an STM32 flash binary)
    file: PathBuf,

    /// Serial device the peer is connected to
    #[arg(short, long, default_value = "/dev/tty.usbmodem2103")]
    device: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Transport reads per block before its transfer is abandoned
    #[arg(long, default_value_t = protocol::MAX_RETRIES, value_name = "N")]
    retries: u32,

    /// Seconds to wait for the acknowledgment of each block
    #[arg(long, default_value_t = protocol::ACK_TIMEOUT.as_secs(), value_name = "SECS")]
    ack_timeout: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    println!("Opening serial port: {}", cli.device);
    println!("Settings: {} baud", cli.baud);

    let serial_port = match RealSerialPort::open(&cli.device, cli.baud) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    println!("\nServing file: {}", cli.file.display());
    if let Err(e) = serve(serial_port, cli) {
        eprintln!("Server failed: {}", e);
        std::process::exit(1);
    }
}

fn serve(serial_port: RealSerialPort, cli: Cli) -> Result<(), server::ServerError> {
    use bootlink::server::{ServerFsm, WaitRequest};

    if !cli.file.exists() {
        return Err(server::ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", cli.file.display()),
        )));
    }

    let mut state = ServerFsm::<WaitRequest>::new(
        Box::new(serial_port),
        cli.file,
        cli.retries,
        Duration::from_secs(cli.ack_timeout),
        cli.debug,
    );

    // The server idles between requests and only stops when the process is
    // torn down or the transport fails.
    loop {
        state = state.step()?;
    }
}
