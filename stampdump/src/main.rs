// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! The stampdump CLI.
//!
//! `receive` prints the software or hardware receive timestamp of each UDP
//! datagram arriving on a port (319, PTP event messages, by default); `send`
//! fires a single datagram at it. Hardware timestamps generally need root,
//! and a NIC that supports them (`ethtool -T <interface>`).
use clap::Parser;
use misc::Show;
use output::{EventPrinter, Format, TimestampEvent};
use stamp_socket::{
    bind::{bind_named, udp_socket},
    interfaces::{InterfaceName, InterfaceRegistry},
    mode::{apply_mode, query_hardware_timestamping},
    recv, send, TimestampMode,
};
use tracing::metadata::LevelFilter;
use tracing_subscriber::prelude::*;

mod output;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
enum Command {
    /// Listen for UDP datagrams and print their receive timestamps.
    Receive {
        /// UDP port to listen on
        #[clap(short, long, default_value_t = 319)]
        port: u16,
        /// Timestamp type: 'hw' for hardware, 'sw' for software
        #[clap(short = 't', long = "type", default_value = "sw")]
        mode: TimestampMode,
        /// Network interface to use (default: all interfaces)
        #[clap(short = 'i', long = "ifc")]
        interface: Option<InterfaceName>,
        /// Enable verbose output
        #[clap(short, long)]
        verbose: bool,
        #[clap(long, value_enum, default_value_t = Format::Text)]
        format: Format,
        /// Bytes of payload to show in verbose output
        #[clap(long, default_value_t = 64)]
        max_payload: usize,
    },
    /// Send one UDP datagram.
    Send {
        /// Destination IP address or hostname
        #[clap(short, long, default_value = "127.0.0.1")]
        dest: String,
        /// Destination UDP port
        #[clap(short, long, default_value_t = 319)]
        port: u16,
        /// Message to send
        #[clap(short, long, default_value = "test packet")]
        msg: String,
        /// Enable verbose output
        #[clap(short, long)]
        verbose: bool,
    },
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Receive { verbose, .. } | Command::Send { verbose, .. } => *verbose,
        }
    }
}

struct ReceiveOpts {
    port: u16,
    mode: TimestampMode,
    interface: Option<InterfaceName>,
    verbose: bool,
    format: Format,
    max_payload: usize,
}

fn do_receive(opts: ReceiveOpts) -> Result<(), Error> {
    let ReceiveOpts {
        port,
        mode,
        interface,
        verbose,
        format,
        max_payload,
    } = opts;

    let sock = udp_socket().map_err(|e| format!("failed to create socket: {e}"))?;
    let registry = InterfaceRegistry::discover();

    let report = apply_mode(&sock, mode, interface.as_ref(), &registry)?;
    if mode == TimestampMode::HardwareOnly {
        if report.enabled.is_empty() {
            tracing::warn!("hardware timestamping is not enabled on any interface");
        }
        for name in &report.enabled {
            match query_hardware_timestamping(&sock, name) {
                Ok(config) => tracing::debug!(?config, "{name} hardware timestamping"),
                Err(e) => tracing::debug!("{e}"),
            }
        }
    }

    let bound = bind_named(&sock, port, &registry, interface.as_ref())?;
    tracing::info!("listening on {bound} ({mode} timestamps)");

    let mut printer = EventPrinter::new(format, verbose, std::io::stdout().lock());
    for datagram in recv::run(sock) {
        printer.print(&TimestampEvent::new(&datagram, max_payload))?;
    }
    Ok(())
}

fn do_send(dest: String, port: u16, msg: String) -> Result<(), Error> {
    let target = send::send_datagram(&dest, port, msg.as_bytes())?;
    tracing::debug!(
        "sent message {} to {dest} ({target})",
        Show::new(msg.as_bytes())
    );
    Ok(())
}

fn main() -> Result<(), Error> {
    let args = Command::parse();

    let default_level = if args.verbose() {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::Layer::new().without_time())
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    match args {
        Command::Receive {
            port,
            mode,
            interface,
            verbose,
            format,
            max_payload,
        } => do_receive(ReceiveOpts {
            port,
            mode,
            interface,
            verbose,
            format,
            max_payload,
        })?,
        Command::Send {
            dest, port, msg, ..
        } => do_send(dest, port, msg)?,
    }
    Ok(())
}
