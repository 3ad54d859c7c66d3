// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Creating and binding the receive socket.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::interfaces::{InterfaceDescriptor, InterfaceName, InterfaceRegistry};

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("binding {addr}: permission denied (ports below 1024 need privileges)")]
    PermissionDenied {
        addr: SocketAddrV4,
        source: io::Error,
    },
    #[error("binding {addr}: address already in use")]
    AddrInUse {
        addr: SocketAddrV4,
        source: io::Error,
    },
    #[error("binding to interface {interface}: {source}")]
    Device {
        interface: InterfaceName,
        source: io::Error,
    },
    #[error("binding {addr}: {source}")]
    Io {
        addr: SocketAddrV4,
        source: io::Error,
    },
}

impl BindError {
    fn classify(addr: SocketAddrV4, source: io::Error) -> BindError {
        match source.kind() {
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied { addr, source },
            io::ErrorKind::AddrInUse => BindError::AddrInUse { addr, source },
            _ => BindError::Io { addr, source },
        }
    }
}

pub fn udp_socket() -> io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
}

/// The local address to bind for `port`: the interface's IPv4 address if it
/// has one, otherwise the wildcard.
pub fn bind_address(port: u16, interface: Option<&InterfaceDescriptor>) -> SocketAddrV4 {
    let ip = interface
        .and_then(|i| i.ipv4_address)
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    SocketAddrV4::new(ip, port)
}

/// Binds the socket to `port`. With an interface, the socket is first pinned
/// to it with `SO_BINDTODEVICE` so traffic arriving elsewhere is not
/// delivered, then bound to its address.
///
/// Returns the address actually bound, which differs from the request when
/// `port` is 0.
pub fn bind(
    socket: &Socket,
    port: u16,
    interface: Option<&InterfaceDescriptor>,
) -> Result<SocketAddrV4, BindError> {
    if let Some(interface) = interface {
        socket
            .bind_device(Some(interface.name.as_bytes()))
            .map_err(|source| BindError::Device {
                interface: interface.name.clone(),
                source,
            })?;

        if interface.ipv4_address.is_none() {
            tracing::warn!(
                "interface {} has no IPv4 address, binding to {}",
                interface.name,
                Ipv4Addr::UNSPECIFIED
            );
        }
    }

    let addr = bind_address(port, interface);
    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(|e| BindError::classify(addr, e))?;

    let bound = socket
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket_ipv4())
        .unwrap_or(addr);
    Ok(bound)
}

/// [`bind`], looking the interface up by name. An interface that does not
/// exist is not fatal: we warn and listen on the wildcard address instead.
pub fn bind_named(
    socket: &Socket,
    port: u16,
    registry: &InterfaceRegistry,
    name: Option<&InterfaceName>,
) -> Result<SocketAddrV4, BindError> {
    let interface = match name {
        None => None,
        Some(name) => {
            let found = registry.resolve(name.as_str());
            if found.is_none() {
                tracing::warn!(
                    "interface {name} not found, binding to {}",
                    Ipv4Addr::UNSPECIFIED
                );
            }
            found
        }
    };

    bind(socket, port, interface)
}
