// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Printing received datagrams.

use std::{
    fmt::Write as _,
    io::{self, Write},
    net::SocketAddrV4,
};

use misc::Show;
use serde::Serialize;
use stamp_socket::{recv::Datagram, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// `SW timestamp: ...` / `HW timestamp: ...` lines
    Text,
    /// One JSON object per datagram
    Json,
}

#[derive(Debug, Serialize)]
pub struct TimestampEvent {
    pub len: usize,
    pub peer: Option<SocketAddrV4>,
    pub truncated: bool,
    pub software: Option<Timestamp>,
    pub hardware: Option<Timestamp>,
    /// Escaped, possibly cut off.
    pub payload: String,
}

impl TimestampEvent {
    pub fn new(datagram: &Datagram, max_payload: usize) -> TimestampEvent {
        TimestampEvent {
            len: datagram.payload.len(),
            peer: datagram.peer,
            truncated: datagram.truncated,
            software: datagram.record.software,
            hardware: datagram.record.hardware,
            payload: Show::capped(&datagram.payload, max_payload).to_string(),
        }
    }
}

struct Maybe(Option<Timestamp>);

impl std::fmt::Display for Maybe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(ts) => write!(f, "{ts}"),
            None => write!(f, "none"),
        }
    }
}

fn render_text(event: &TimestampEvent, verbose: bool) -> String {
    let mut out = String::new();
    if verbose {
        let _ = write!(out, "Received {} bytes", event.len);
        if let Some(peer) = event.peer {
            let _ = write!(out, " from {peer}");
        }
        if event.truncated {
            let _ = write!(out, " (truncated)");
        }
        let _ = writeln!(out, ": {}", event.payload);
    }
    let _ = writeln!(out, "SW timestamp: {}", Maybe(event.software));
    let _ = writeln!(out, "HW timestamp: {}", Maybe(event.hardware));
    out
}

pub struct EventPrinter<W: Write> {
    format: Format,
    verbose: bool,
    out: W,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(format: Format, verbose: bool, out: W) -> Self {
        Self {
            format,
            verbose,
            out,
        }
    }

    pub fn print(&mut self, event: &TimestampEvent) -> io::Result<()> {
        match self.format {
            Format::Text => {
                let text = render_text(event, self.verbose);
                self.out.write_all(text.as_bytes())?;
            }
            Format::Json => {
                serde_json::to_writer(&mut self.out, event)?;
                self.out.write_all(b"\n")?;
            }
        }
        self.out.flush()
    }
}
