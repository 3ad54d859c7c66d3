// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Kernel structures and calls that nix does not wrap in the shape we need.

use std::{
    mem,
    net::{Ipv4Addr, SocketAddrV4},
    os::fd::RawFd,
    ptr,
};

use nix::{errno::Errno, ioctl_readwrite_bad};

use crate::decode::AncillaryBlock;

/// Original `SO_TIMESTAMPING`; its control message carries three
/// `struct timespec` in the native userspace layout.
pub const SO_TIMESTAMPING_OLD: libc::c_int = libc::SO_TIMESTAMPING;

/// `SO_TIMESTAMPING_NEW` (Linux 5.1+): same flags, but the control message is
/// `struct scm_timestamping64`, always 64-bit seconds and nanoseconds.
#[cfg(not(target_arch = "sparc64"))]
pub const SO_TIMESTAMPING_NEW: libc::c_int = 65;
#[cfg(target_arch = "sparc64")]
pub const SO_TIMESTAMPING_NEW: libc::c_int = 0x43;

pub const SIOCSHWTSTAMP: libc::c_ulong = 0x89b0;
pub const SIOCGHWTSTAMP: libc::c_ulong = 0x89b1;

pub const HWTSTAMP_TX_OFF: libc::c_int = 0;
pub const HWTSTAMP_FILTER_ALL: libc::c_int = 1;

/// `struct hwtstamp_config` from `linux/net_tstamp.h`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwtstampConfig {
    pub flags: libc::c_int,
    pub tx_type: libc::c_int,
    pub rx_filter: libc::c_int,
}

ioctl_readwrite_bad!(siocshwtstamp, SIOCSHWTSTAMP, libc::ifreq);
ioctl_readwrite_bad!(siocghwtstamp, SIOCGHWTSTAMP, libc::ifreq);

fn ifreq_with_data(dev_name: &[u8], config: &mut HwtstampConfig) -> libc::ifreq {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    // leave room for the terminating nul
    let len = dev_name.len().min(ifr.ifr_name.len() - 1);
    for (to, from) in ifr.ifr_name[..len].iter_mut().zip(dev_name) {
        *to = *from as libc::c_char;
    }
    ifr.ifr_ifru.ifru_data = config as *mut HwtstampConfig as *mut libc::c_char;
    ifr
}

/// `SIOCSHWTSTAMP`. The driver writes back what it actually applied, which
/// may be broader than requested.
pub fn set_hwtstamp(fd: RawFd, dev_name: &[u8], config: &mut HwtstampConfig) -> nix::Result<()> {
    let mut ifr = ifreq_with_data(dev_name, config);
    unsafe { siocshwtstamp(fd, &mut ifr) }.map(drop)
}

/// `SIOCGHWTSTAMP`
pub fn get_hwtstamp(fd: RawFd, dev_name: &[u8]) -> nix::Result<HwtstampConfig> {
    let mut config = HwtstampConfig::default();
    let mut ifr = ifreq_with_data(dev_name, &mut config);
    unsafe { siocghwtstamp(fd, &mut ifr) }?;
    Ok(config)
}

pub fn setsockopt_u32(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: u32,
) -> nix::Result<()> {
    // Safety: value lives on our stack for the duration of the call and the
    // length passed matches its size.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const u32 as *const libc::c_void,
            mem::size_of::<u32>() as libc::socklen_t,
        )
    };
    Errno::result(ret).map(drop)
}

#[derive(Debug)]
pub struct RecvMeta {
    pub len: usize,
    pub control_len: usize,
    pub flags: libc::c_int,
    pub peer: Option<SocketAddrV4>,
}

/// Blocking `recvmsg` of one datagram plus its control messages.
pub fn recv_with_control(fd: RawFd, buf: &mut [u8], control: &mut [u8]) -> nix::Result<RecvMeta> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
    hdr.msg_name = &mut addr as *mut libc::sockaddr_in as *mut libc::c_void;
    hdr.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;
    hdr.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    hdr.msg_controllen = control.len() as _;

    let n = Errno::result(unsafe { libc::recvmsg(fd, &mut hdr, 0) })?;

    let peer = (hdr.msg_namelen as usize >= mem::size_of::<libc::sockaddr_in>()
        && addr.sin_family == libc::AF_INET as libc::sa_family_t)
        .then(|| {
            SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
                u16::from_be(addr.sin_port),
            )
        });

    Ok(RecvMeta {
        len: n as usize,
        control_len: (hdr.msg_controllen as usize).min(control.len()),
        flags: hdr.msg_flags,
        peer,
    })
}

const fn cmsg_len(length: usize) -> usize {
    unsafe { libc::CMSG_LEN(length as _) as usize }
}

const fn cmsg_space(length: usize) -> usize {
    unsafe { libc::CMSG_SPACE(length as _) as usize }
}

const CMSG_HDR_SIZE: usize = cmsg_len(0);

/// Walks a control buffer filled in by `recvmsg`.
///
/// Stops at the first header that does not fit in what is left of the
/// buffer, which is what a truncated (`MSG_CTRUNC`) buffer looks like.
pub struct Cmsgs<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cmsgs<'a> {
    pub fn new(buf: &'a [u8]) -> Cmsgs<'a> {
        Cmsgs { buf, offset: 0 }
    }
}

impl<'a> Iterator for Cmsgs<'a> {
    type Item = AncillaryBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buf.get(self.offset..)?;
        if rest.len() < CMSG_HDR_SIZE {
            return None;
        }

        // the buffer is only byte aligned from our point of view
        let hdr: libc::cmsghdr = unsafe { ptr::read_unaligned(rest.as_ptr() as *const _) };
        let msg_len = hdr.cmsg_len as usize;
        if msg_len < CMSG_HDR_SIZE || msg_len > rest.len() {
            self.offset = self.buf.len();
            return None;
        }
        self.offset += cmsg_space(msg_len - CMSG_HDR_SIZE);

        Some(AncillaryBlock {
            level: hdr.cmsg_level,
            kind: hdr.cmsg_type,
            data: &rest[CMSG_HDR_SIZE..msg_len],
        })
    }
}

#[cfg(test)]
pub(crate) fn push_cmsg(buf: &mut Vec<u8>, level: libc::c_int, kind: libc::c_int, data: &[u8]) {
    let start = buf.len();
    buf.resize(start + cmsg_space(data.len()), 0);

    let mut hdr: libc::cmsghdr = unsafe { mem::zeroed() };
    hdr.cmsg_len = cmsg_len(data.len()) as _;
    hdr.cmsg_level = level;
    hdr.cmsg_type = kind;
    unsafe { ptr::write_unaligned(buf[start..].as_mut_ptr() as *mut libc::cmsghdr, hdr) };
    buf[start + CMSG_HDR_SIZE..start + CMSG_HDR_SIZE + data.len()].copy_from_slice(data);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_walk_cmsgs() {
        let mut buf = Vec::new();
        push_cmsg(&mut buf, libc::SOL_SOCKET, SO_TIMESTAMPING_NEW, &[1; 48]);
        push_cmsg(&mut buf, libc::IPPROTO_IP, libc::IP_TTL, &[64, 0, 0, 0]);

        let blocks: Vec<_> = Cmsgs::new(&buf).collect();
        assert_eq!(2, blocks.len());
        assert_eq!(
            (libc::SOL_SOCKET, SO_TIMESTAMPING_NEW, 48),
            (blocks[0].level, blocks[0].kind, blocks[0].data.len())
        );
        assert_eq!(
            (libc::IPPROTO_IP, libc::IP_TTL, &[64u8, 0, 0, 0][..]),
            (blocks[1].level, blocks[1].kind, blocks[1].data)
        );
    }

    #[test]
    fn test_truncated_control_buffer() {
        let mut buf = Vec::new();
        push_cmsg(&mut buf, libc::IPPROTO_IP, libc::IP_TTL, &[64, 0, 0, 0]);
        push_cmsg(&mut buf, libc::SOL_SOCKET, SO_TIMESTAMPING_NEW, &[1; 48]);
        let cut = buf.len() - 8;

        let blocks: Vec<_> = Cmsgs::new(&buf[..cut]).collect();
        assert_eq!(1, blocks.len());
        assert_eq!(libc::IP_TTL, blocks[0].kind);

        assert_eq!(0, Cmsgs::new(&buf[..CMSG_HDR_SIZE - 1]).count());
        assert_eq!(0, Cmsgs::new(&[]).count());
    }

    #[test]
    fn test_ifreq_name_is_terminated() {
        let mut config = HwtstampConfig::default();
        let ifr = ifreq_with_data(b"a-very-long-interface-name", &mut config);
        assert_eq!(0, ifr.ifr_name[libc::IFNAMSIZ - 1]);
        assert_eq!(b'a' as libc::c_char, ifr.ifr_name[0]);
    }
}
