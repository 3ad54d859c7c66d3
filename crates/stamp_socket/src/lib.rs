// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Receive timestamps for UDP datagrams, straight from the kernel.
//!
//! The flow is: pick a [`TimestampMode`], configure the socket (and for
//! hardware timestamps, the NIC) with [`mode::apply_mode`], bind with
//! [`bind::bind_named`], then iterate [`recv::run`] to get each datagram along
//! with its decoded [`TimestampRecord`].

use std::fmt;

use serde::Serialize;

pub mod bind;
pub mod decode;
pub mod interfaces;
pub mod mode;
pub mod recv;
pub mod send;
mod sys;

pub use mode::TimestampMode;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A point in time as reported by the kernel: seconds and nanoseconds since
/// the epoch of whichever clock produced it (the system clock for software
/// timestamps, the NIC's PHC for raw hardware timestamps).
///
/// `nanos` is always below one second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Option<Timestamp> {
        (nanos < NANOS_PER_SEC).then_some(Timestamp { secs, nanos })
    }

    /// Converts a kernel time value into a timestamp. The kernel fills slots
    /// it did not produce with zeros, so all-zero is "not supplied" rather
    /// than the epoch. Out of range nanoseconds are likewise rejected.
    pub fn from_kernel(secs: i64, nanos: i64) -> Option<Timestamp> {
        if secs == 0 && nanos == 0 {
            return None;
        }
        let nanos = u32::try_from(nanos).ok()?;
        Timestamp::new(secs, nanos)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// Timestamps the kernel attached to one received datagram.
///
/// Either side may be missing: software timestamps only show up when
/// software timestamping was requested, hardware ones only when the socket
/// asked for them *and* the NIC was told to stamp incoming packets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimestampRecord {
    pub software: Option<Timestamp>,
    pub hardware: Option<Timestamp>,
}

impl TimestampRecord {
    pub fn is_empty(&self) -> bool {
        self.software.is_none() && self.hardware.is_none()
    }
}
