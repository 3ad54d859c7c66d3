// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! The receive loop.
//!
//! [`run`] turns a configured, bound socket into an iterator of datagrams
//! with their timestamps. Each call to `next` blocks in `recvmsg` until a
//! datagram arrives. There is no in-band stop: the iterator ends only when
//! the socket goes away underneath it, which is what [`ReceiverHandle::close`]
//! arranges from another thread or a signal handler.

use std::{
    io,
    net::{Shutdown, SocketAddrV4},
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use nix::errno::Errno;
use socket2::Socket;

use crate::{decode, sys, TimestampRecord};

pub const PAYLOAD_CAPACITY: usize = 2048;
pub const CONTROL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub peer: Option<SocketAddrV4>,
    pub record: TimestampRecord,
    /// The datagram was longer than [`PAYLOAD_CAPACITY`] and got cut off.
    pub truncated: bool,
}

pub struct Receiver {
    socket: Arc<Socket>,
    closed: Arc<AtomicBool>,
    payload: Vec<u8>,
    control: Vec<u8>,
}

/// Stops a [`Receiver`] from elsewhere.
#[derive(Clone)]
pub struct ReceiverHandle {
    socket: Arc<Socket>,
    closed: Arc<AtomicBool>,
}

impl ReceiverHandle {
    /// Shuts down the read side of the socket, waking a blocked receive. The
    /// receiver yields nothing further afterwards.
    pub fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        match self.socket.shutdown(Shutdown::Read) {
            // Linux reports this for unconnected UDP but shuts down anyway
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Takes ownership of the socket for the lifetime of the loop.
pub fn run(socket: Socket) -> Receiver {
    Receiver {
        socket: Arc::new(socket),
        closed: Arc::new(AtomicBool::new(false)),
        payload: vec![0u8; PAYLOAD_CAPACITY],
        control: vec![0u8; CONTROL_CAPACITY],
    }
}

impl Receiver {
    pub fn handle(&self) -> ReceiverHandle {
        ReceiverHandle {
            socket: self.socket.clone(),
            closed: self.closed.clone(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn recv_one(&mut self) -> nix::Result<Datagram> {
        let meta = sys::recv_with_control(
            self.socket.as_raw_fd(),
            &mut self.payload,
            &mut self.control,
        )?;

        if meta.flags & libc::MSG_CTRUNC != 0 {
            tracing::debug!("control data truncated, timestamps may be missing");
        }

        let control = &self.control[..meta.control_len];
        let record = decode::decode(sys::Cmsgs::new(control));

        Ok(Datagram {
            payload: self.payload[..meta.len.min(self.payload.len())].to_vec(),
            peer: meta.peer,
            record,
            truncated: meta.flags & libc::MSG_TRUNC != 0,
        })
    }
}

impl Iterator for Receiver {
    type Item = Datagram;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.is_closed() {
                return None;
            }

            let result = self.recv_one();
            // a shut down socket returns empty reads, which are not datagrams
            if self.is_closed() {
                return None;
            }

            match result {
                Ok(datagram) => return Some(datagram),
                Err(Errno::EINTR) => continue,
                Err(e @ (Errno::EBADF | Errno::ENOTSOCK)) => {
                    tracing::debug!("socket gone, stopping receive loop: {e}");
                    return None;
                }
                Err(e) => {
                    tracing::warn!("failed to receive message: {e}");
                    continue;
                }
            }
        }
    }
}
