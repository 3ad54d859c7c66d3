// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Turning timestamping on, for the socket and for the NIC.
//!
//! Hardware receive timestamps need two things: the socket has to ask for
//! them (`SO_TIMESTAMPING` with the hardware flags), and the driver has to be
//! told to stamp incoming packets at all (`SIOCSHWTSTAMP`), which is off by
//! default. Forgetting the second gives a socket that works fine and never
//! reports a hardware timestamp. [`apply_mode`] does both.
//!
//! See <https://www.kernel.org/doc/Documentation/networking/timestamping.txt>.

use std::{fmt, os::fd::AsRawFd, str::FromStr};

use nix::errno::Errno;

use crate::{
    interfaces::{InterfaceName, InterfaceRegistry},
    sys::{self, HWTSTAMP_FILTER_ALL, HWTSTAMP_TX_OFF},
};

pub use crate::sys::HwtstampConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}: {1}")]
    SetOption(&'static str, Errno),
    #[error("{op} on interface {interface}: {errno}")]
    DeviceCommand {
        op: &'static str,
        interface: InterfaceName,
        errno: Errno,
    },
}

impl ConfigError {
    fn device(op: &'static str, interface: &InterfaceName, errno: Errno) -> ConfigError {
        ConfigError::DeviceCommand {
            op,
            interface: interface.clone(),
            errno,
        }
    }
}

trait AddContext<T> {
    fn context(self, s: &'static str) -> Result<T, ConfigError>;
}

impl<T> AddContext<T> for Result<T, Errno> {
    fn context(self, s: &'static str) -> Result<T, ConfigError> {
        self.map_err(|e| ConfigError::SetOption(s, e))
    }
}

/// Which timestamps to ask the kernel for. Fixed for the life of the socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimestampMode {
    /// Stamped by the network stack on receive.
    #[default]
    SoftwareOnly,
    /// Stamped by the NIC, reported in its own clock (the PHC).
    HardwareOnly,
}

impl TimestampMode {
    /// `SOF_TIMESTAMPING_*` flags for this mode.
    pub fn flags(self) -> u32 {
        match self {
            TimestampMode::SoftwareOnly => {
                libc::SOF_TIMESTAMPING_RX_SOFTWARE | libc::SOF_TIMESTAMPING_SOFTWARE
            }
            TimestampMode::HardwareOnly => {
                libc::SOF_TIMESTAMPING_RX_HARDWARE | libc::SOF_TIMESTAMPING_RAW_HARDWARE
            }
        }
    }
}

impl FromStr for TimestampMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sw" | "software" => Ok(TimestampMode::SoftwareOnly),
            "hw" | "hardware" => Ok(TimestampMode::HardwareOnly),
            other => Err(format!("unknown timestamp type {other:?}, use 'hw' or 'sw'")),
        }
    }
}

impl fmt::Display for TimestampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimestampMode::SoftwareOnly => "sw",
            TimestampMode::HardwareOnly => "hw",
        })
    }
}

/// Which socket option ended up enabling timestamping. This decides the
/// control message layout the decoder will see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampOption {
    /// `SO_TIMESTAMPING_NEW`
    Extended,
    /// `SO_TIMESTAMPING_OLD`, for kernels older than 5.1
    Legacy,
}

/// Requests receive timestamps of the given kind on the socket.
///
/// Errors here are fatal to the caller: without them there is nothing to
/// report.
pub fn configure_socket(
    socket: &impl AsRawFd,
    mode: TimestampMode,
) -> Result<TimestampOption, ConfigError> {
    let fd = socket.as_raw_fd();
    let flags = mode.flags();

    match sys::setsockopt_u32(fd, libc::SOL_SOCKET, sys::SO_TIMESTAMPING_NEW, flags) {
        Ok(()) => Ok(TimestampOption::Extended),
        Err(Errno::ENOPROTOOPT) => {
            tracing::debug!("SO_TIMESTAMPING_NEW unsupported, using SO_TIMESTAMPING_OLD");
            sys::setsockopt_u32(fd, libc::SOL_SOCKET, sys::SO_TIMESTAMPING_OLD, flags)
                .context("setsockopt SO_TIMESTAMPING")?;
            Ok(TimestampOption::Legacy)
        }
        Err(e) => Err(ConfigError::SetOption("setsockopt SO_TIMESTAMPING_NEW", e)),
    }
}

/// The device configuration we ask for: no transmit stamping, stamp every
/// received packet.
pub fn rx_all_config() -> HwtstampConfig {
    HwtstampConfig {
        flags: 0,
        tx_type: HWTSTAMP_TX_OFF,
        rx_filter: HWTSTAMP_FILTER_ALL,
    }
}

/// Tells the interface's driver to timestamp all incoming packets. Setting
/// the same configuration again is a no-op as far as the device is
/// concerned.
///
/// Usually needs CAP_NET_ADMIN, and fails with `EOPNOTSUPP`/`EINVAL` on
/// devices without a hardware clock (`lo`, most virtual interfaces).
pub fn enable_hardware_timestamping(
    socket: &impl AsRawFd,
    interface: &InterfaceName,
) -> Result<HwtstampConfig, ConfigError> {
    let mut config = rx_all_config();
    sys::set_hwtstamp(socket.as_raw_fd(), interface.as_bytes(), &mut config)
        .map_err(|errno| ConfigError::device("SIOCSHWTSTAMP", interface, errno))?;
    Ok(config)
}

/// Reads back what the driver currently has configured.
pub fn query_hardware_timestamping(
    socket: &impl AsRawFd,
    interface: &InterfaceName,
) -> Result<HwtstampConfig, ConfigError> {
    sys::get_hwtstamp(socket.as_raw_fd(), interface.as_bytes())
        .map_err(|errno| ConfigError::device("SIOCGHWTSTAMP", interface, errno))
}

#[derive(Debug, Default)]
pub struct HardwareEnableReport {
    pub enabled: Vec<InterfaceName>,
    pub failed: Vec<(InterfaceName, ConfigError)>,
}

/// Enables hardware timestamping on each interface in turn. A failure on one
/// is logged and does not stop the rest.
pub fn enable_hardware_timestamping_on<'a>(
    socket: &impl AsRawFd,
    interfaces: impl IntoIterator<Item = &'a InterfaceName>,
) -> HardwareEnableReport {
    let mut report = HardwareEnableReport::default();

    for interface in interfaces {
        match enable_hardware_timestamping(socket, interface) {
            Ok(applied) => {
                tracing::info!("enabled hardware timestamps on interface {interface}");
                tracing::debug!(?applied, "driver configuration");
                report.enabled.push(interface.clone());
            }
            Err(e) => {
                tracing::warn!("failed to enable hardware timestamps: {e}");
                report.failed.push((interface.clone(), e));
            }
        }
    }

    report
}

/// Configures the socket for `mode` and, for hardware timestamps, the NIC:
/// `target` if given, otherwise every interface in `registry`.
///
/// Must run before the first receive.
pub fn apply_mode(
    socket: &impl AsRawFd,
    mode: TimestampMode,
    target: Option<&InterfaceName>,
    registry: &InterfaceRegistry,
) -> Result<HardwareEnableReport, ConfigError> {
    let option = configure_socket(socket, mode)?;
    tracing::debug!(?mode, ?option, "timestamping configured");

    Ok(match mode {
        TimestampMode::SoftwareOnly => HardwareEnableReport::default(),
        TimestampMode::HardwareOnly => match target {
            Some(interface) => enable_hardware_timestamping_on(socket, [interface]),
            None => enable_hardware_timestamping_on(socket, registry.names()),
        },
    })
}
