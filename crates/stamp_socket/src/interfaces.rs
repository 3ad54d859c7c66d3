// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Network interface discovery.

use std::{fmt, net::Ipv4Addr, str::FromStr};

use nix::ifaddrs::getifaddrs;

/// Longest interface name the kernel accepts, not counting the nul.
pub const MAX_NAME_LEN: usize = libc::IFNAMSIZ - 1;

/// A name that fits in `ifreq.ifr_name`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceName(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidName {
    #[error("interface name is empty")]
    Empty,
    #[error("interface name {0:?} is longer than 15 bytes")]
    TooLong(String),
    #[error("interface name {0:?} contains a nul byte")]
    Nul(String),
}

impl FromStr for InterfaceName {
    type Err = InvalidName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(InvalidName::Empty)
        } else if s.len() > MAX_NAME_LEN {
            Err(InvalidName::TooLong(s.to_owned()))
        } else if s.contains('\0') {
            Err(InvalidName::Nul(s.to_owned()))
        } else {
            Ok(InterfaceName(s.to_owned()))
        }
    }
}

impl InterfaceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: InterfaceName,
    /// `None` if the interface has no IPv4 address (or only 0.0.0.0), so
    /// callers can fall back to the wildcard address.
    pub ipv4_address: Option<Ipv4Addr>,
}

/// Snapshot of the interfaces on the machine, taken once at startup.
#[derive(Clone, Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: Vec<InterfaceDescriptor>,
}

impl InterfaceRegistry {
    pub fn discover() -> InterfaceRegistry {
        InterfaceRegistry {
            interfaces: list_interfaces(),
        }
    }

    pub fn from_descriptors(interfaces: Vec<InterfaceDescriptor>) -> InterfaceRegistry {
        InterfaceRegistry { interfaces }
    }

    pub fn interfaces(&self) -> &[InterfaceDescriptor] {
        &self.interfaces
    }

    pub fn names(&self) -> impl Iterator<Item = &InterfaceName> {
        self.interfaces.iter().map(|i| &i.name)
    }

    /// Exact, case-sensitive lookup.
    pub fn resolve(&self, name: &str) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|i| i.name.as_str() == name)
    }
}

/// Lists the interfaces of the machine in kernel order, one entry per name.
///
/// Never fails: if the kernel will not tell us, this logs and returns nothing,
/// since receiving on the wildcard address still works.
pub fn list_interfaces() -> Vec<InterfaceDescriptor> {
    match getifaddrs() {
        Ok(addrs) => collect_interfaces(addrs.map(|ifa| {
            let ipv4 = ifa
                .address
                .as_ref()
                .and_then(|a| a.as_sockaddr_in())
                .map(|sin| Ipv4Addr::from(sin.ip()));
            (ifa.interface_name, ipv4)
        })),
        Err(e) => {
            tracing::warn!("failed to list network interfaces: {e}");
            Vec::new()
        }
    }
}

pub fn resolve(name: &str) -> Option<InterfaceDescriptor> {
    list_interfaces()
        .into_iter()
        .find(|i| i.name.as_str() == name)
}

/// getifaddrs hands back one entry per (interface, address), so an interface
/// shows up once per address family and again per extra address.
fn collect_interfaces(
    entries: impl IntoIterator<Item = (String, Option<Ipv4Addr>)>,
) -> Vec<InterfaceDescriptor> {
    let mut out: Vec<InterfaceDescriptor> = Vec::new();

    for (name, ipv4) in entries {
        let ipv4 = ipv4.filter(|ip| !ip.is_unspecified());

        if let Some(existing) = out.iter_mut().find(|i| i.name.as_str() == name) {
            existing.ipv4_address = existing.ipv4_address.or(ipv4);
            continue;
        }

        match name.parse::<InterfaceName>() {
            Ok(name) => out.push(InterfaceDescriptor {
                name,
                ipv4_address: ipv4,
            }),
            Err(e) => tracing::debug!("skipping interface: {e}"),
        }
    }

    out
}
