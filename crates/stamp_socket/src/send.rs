// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Sending one test datagram, to have something to timestamp.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs},
};

use crate::bind::udp_socket;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to resolve {dest}: {source}")]
    Resolve { dest: String, source: io::Error },
    #[error("{0} has no IPv4 address")]
    NoIpv4(String),
    #[error("{0}: {1}")]
    Io(&'static str, io::Error),
}

trait AddContext<T> {
    fn context(self, s: &'static str) -> Result<T, SendError>;
}

impl<T> AddContext<T> for Result<T, io::Error> {
    fn context(self, s: &'static str) -> Result<T, SendError> {
        self.map_err(|e| SendError::Io(s, e))
    }
}

/// Resolves a host name or literal address to the first IPv4 result.
pub fn resolve_destination(dest: &str, port: u16) -> Result<SocketAddrV4, SendError> {
    if let Ok(ip) = dest.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }

    let addrs = (dest, port)
        .to_socket_addrs()
        .map_err(|source| SendError::Resolve {
            dest: dest.to_owned(),
            source,
        })?;

    addrs
        .filter_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| SendError::NoIpv4(dest.to_owned()))
}

/// Sends `payload` as a single UDP datagram. Returns where it went.
pub fn send_datagram(dest: &str, port: u16, payload: &[u8]) -> Result<SocketAddrV4, SendError> {
    let target = resolve_destination(dest, port)?;
    let socket = udp_socket().context("socket")?;
    socket
        .send_to(payload, &SocketAddr::V4(target).into())
        .context("sendto")?;
    tracing::debug!("sent {} bytes to {target}", payload.len());
    Ok(target)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_literal() {
        assert_eq!(
            SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 7), 319),
            resolve_destination("192.0.2.7", 319).unwrap()
        );
    }

    #[test]
    fn test_resolve_localhost() {
        let addr = resolve_destination("localhost", 320).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(320, addr.port());
    }

    #[test]
    fn test_resolve_garbage() {
        assert!(resolve_destination("not a host name..", 319).is_err());
    }
}
