// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

//! Decoding the timestamp control messages that ride along with a datagram.
//!
//! With `SO_TIMESTAMPING` enabled, the kernel attaches a control message
//! holding three time values: `[0]` is the software timestamp, `[1]` is the
//! long-deprecated "hardware transformed to system time" slot, and `[2]` is
//! the raw hardware timestamp. Depending on which socket option turned
//! timestamping on, that message comes in one of two shapes:
//!
//! * [`TimestampCmsg::Legacy`]: `SO_TIMESTAMPING_OLD`, three native
//!   `struct timespec`, so the field width follows the userspace `time_t`.
//! * [`TimestampCmsg::Extended`]: `SO_TIMESTAMPING_NEW`, three
//!   `struct __kernel_timespec`, always 64-bit fields.
//!
//! Both are turned into a [`TimestampRecord`] here and nowhere else.

use std::{mem, ptr};

use misc::Hex;
use nix::sys::time::TimeSpec;

use crate::{
    sys::{SO_TIMESTAMPING_NEW, SO_TIMESTAMPING_OLD},
    Timestamp, TimestampRecord,
};

/// One control message: its `(level, type)` tag and payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AncillaryBlock<'a> {
    pub level: libc::c_int,
    pub kind: libc::c_int,
    pub data: &'a [u8],
}

/// A time value as the kernel wrote it, before any validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawTime {
    pub secs: i64,
    pub nanos: i64,
}

impl RawTime {
    pub fn timestamp(&self) -> Option<Timestamp> {
        Timestamp::from_kernel(self.secs, self.nanos)
    }
}

impl From<libc::timespec> for RawTime {
    fn from(ts: libc::timespec) -> RawTime {
        let ts = TimeSpec::from(ts);
        RawTime {
            secs: ts.tv_sec() as i64,
            nanos: ts.tv_nsec() as i64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimestampSlots {
    pub software: RawTime,
    /// Slot 1. Nothing has filled this in since Linux 3.17.
    pub deprecated: RawTime,
    pub hardware: RawTime,
}

impl TimestampSlots {
    pub fn record(&self) -> TimestampRecord {
        TimestampRecord {
            software: self.software.timestamp(),
            hardware: self.hardware.timestamp(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampCmsg {
    Legacy(TimestampSlots),
    Extended(TimestampSlots),
}

const EXTENDED_SLOT_SIZE: usize = 2 * mem::size_of::<i64>();
const LEGACY_SLOT_SIZE: usize = mem::size_of::<libc::timespec>();

fn read_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    i64::from_ne_bytes(raw)
}

impl TimestampCmsg {
    /// Recognizes a timestamping control message. Anything else, including a
    /// timestamping message too short to hold all three slots, is `None`.
    pub fn parse(block: &AncillaryBlock<'_>) -> Option<TimestampCmsg> {
        if block.level != libc::SOL_SOCKET {
            return None;
        }

        match block.kind {
            SO_TIMESTAMPING_NEW => {
                let data = block.data.get(..3 * EXTENDED_SLOT_SIZE)?;
                let slot = |i: usize| {
                    let s = &data[i * EXTENDED_SLOT_SIZE..];
                    RawTime {
                        secs: read_i64(s),
                        nanos: read_i64(&s[8..]),
                    }
                };
                Some(TimestampCmsg::Extended(TimestampSlots {
                    software: slot(0),
                    deprecated: slot(1),
                    hardware: slot(2),
                }))
            }
            SO_TIMESTAMPING_OLD => {
                let data = block.data.get(..3 * LEGACY_SLOT_SIZE)?;
                let slot = |i: usize| {
                    // Safety: the range check above keeps all three reads in
                    // bounds; control data has no alignment guarantee for us.
                    let ts: libc::timespec = unsafe {
                        ptr::read_unaligned(
                            data[i * LEGACY_SLOT_SIZE..].as_ptr() as *const libc::timespec
                        )
                    };
                    RawTime::from(ts)
                };
                Some(TimestampCmsg::Legacy(TimestampSlots {
                    software: slot(0),
                    deprecated: slot(1),
                    hardware: slot(2),
                }))
            }
            _ => None,
        }
    }

    pub fn slots(&self) -> &TimestampSlots {
        match self {
            TimestampCmsg::Legacy(slots) | TimestampCmsg::Extended(slots) => slots,
        }
    }
}

/// Folds the control messages of one datagram into a [`TimestampRecord`].
///
/// Never fails: unrecognized or short blocks contribute nothing. If more than
/// one timestamping block shows up, the first one to supply a component wins.
pub fn decode<'a>(blocks: impl IntoIterator<Item = AncillaryBlock<'a>>) -> TimestampRecord {
    let mut record = TimestampRecord::default();

    for block in blocks {
        match TimestampCmsg::parse(&block) {
            Some(cmsg) => {
                let found = cmsg.slots().record();
                record.software = record.software.or(found.software);
                record.hardware = record.hardware.or(found.hardware);
            }
            None => {
                tracing::debug!(
                    level = block.level,
                    kind = block.kind,
                    data = %Hex(block.data),
                    "unhandled control message"
                );
            }
        }
    }

    record
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn extended(slots: [(i64, i64); 3]) -> Vec<u8> {
        let mut out = Vec::new();
        for (secs, nanos) in slots {
            out.extend_from_slice(&secs.to_ne_bytes());
            out.extend_from_slice(&nanos.to_ne_bytes());
        }
        out
    }

    fn legacy(slots: [(i64, i64); 3]) -> Vec<u8> {
        let mut out = Vec::new();
        for (secs, nanos) in slots {
            let mut ts: libc::timespec = unsafe { mem::zeroed() };
            ts.tv_sec = secs as libc::time_t;
            ts.tv_nsec = nanos as _;
            let bytes = unsafe {
                std::slice::from_raw_parts(&ts as *const _ as *const u8, LEGACY_SLOT_SIZE)
            };
            out.extend_from_slice(bytes);
        }
        out
    }

    fn block(kind: libc::c_int, data: &[u8]) -> AncillaryBlock<'_> {
        AncillaryBlock {
            level: libc::SOL_SOCKET,
            kind,
            data,
        }
    }

    #[test]
    fn test_extended_software_only() {
        let data = extended([(100, 500), (0, 0), (0, 0)]);
        let record = decode([block(SO_TIMESTAMPING_NEW, &data)]);
        assert_eq!(
            TimestampRecord {
                software: Timestamp::new(100, 500),
                hardware: None,
            },
            record
        );
    }

    #[test]
    fn test_extended_hardware_only() {
        let data = extended([(0, 0), (0, 0), (200, 750)]);
        let record = decode([block(SO_TIMESTAMPING_NEW, &data)]);
        assert_eq!(
            TimestampRecord {
                software: None,
                hardware: Timestamp::new(200, 750),
            },
            record
        );
    }

    #[test]
    fn test_legacy_layout() {
        let data = legacy([(10, 1), (99, 99), (20, 2)]);
        let parsed = TimestampCmsg::parse(&block(SO_TIMESTAMPING_OLD, &data));
        assert!(matches!(parsed, Some(TimestampCmsg::Legacy(_))));
        assert_eq!(
            TimestampRecord {
                software: Timestamp::new(10, 1),
                hardware: Timestamp::new(20, 2),
            },
            decode([block(SO_TIMESTAMPING_OLD, &data)])
        );
    }

    #[test]
    fn test_other_blocks_are_skipped() {
        let ttl = [64u8, 0, 0, 0];
        let data = extended([(1, 2), (0, 0), (3, 4)]);
        let record = decode([
            AncillaryBlock {
                level: libc::IPPROTO_IP,
                kind: libc::IP_TTL,
                data: &ttl,
            },
            block(SO_TIMESTAMPING_NEW, &data),
        ]);
        assert_eq!(Timestamp::new(1, 2), record.software);
        assert_eq!(Timestamp::new(3, 4), record.hardware);
    }

    #[test]
    fn test_first_supplier_wins() {
        let first = extended([(1, 1), (0, 0), (0, 0)]);
        let second = extended([(5, 5), (0, 0), (6, 6)]);
        let record = decode([
            block(SO_TIMESTAMPING_NEW, &first),
            block(SO_TIMESTAMPING_NEW, &second),
        ]);
        assert_eq!(Timestamp::new(1, 1), record.software);
        assert_eq!(Timestamp::new(6, 6), record.hardware);
    }

    #[test]
    fn test_empty() {
        assert!(decode(std::iter::empty()).is_empty());
    }

    fn nonzero_time() -> impl Strategy<Value = (i64, i64)> {
        (1..i32::MAX as i64, 0..1_000_000_000i64)
    }

    proptest! {
        #[test]
        fn zero_slot_is_absent(sw in nonzero_time(), hw in nonzero_time(), zero_sw in any::<bool>(), zero_hw in any::<bool>()) {
            let sw = if zero_sw { (0, 0) } else { sw };
            let hw = if zero_hw { (0, 0) } else { hw };
            for (kind, data) in [
                (SO_TIMESTAMPING_NEW, extended([sw, (0, 0), hw])),
                (SO_TIMESTAMPING_OLD, legacy([sw, (0, 0), hw])),
            ] {
                let record = decode([block(kind, &data)]);
                prop_assert_eq!(zero_sw, record.software.is_none());
                prop_assert_eq!(zero_hw, record.hardware.is_none());
            }
        }

        #[test]
        fn slots_map_to_components(sw in nonzero_time(), mid in nonzero_time(), hw in nonzero_time()) {
            for (kind, data) in [
                (SO_TIMESTAMPING_NEW, extended([sw, mid, hw])),
                (SO_TIMESTAMPING_OLD, legacy([sw, mid, hw])),
            ] {
                let record = decode([block(kind, &data)]);
                prop_assert_eq!(Timestamp::new(sw.0, sw.1 as u32), record.software);
                prop_assert_eq!(Timestamp::new(hw.0, hw.1 as u32), record.hardware);
            }
        }

        #[test]
        fn unknown_tags_give_nothing(level in any::<libc::c_int>(), kind in any::<libc::c_int>(), data in proptest::collection::vec(any::<u8>(), 0..128)) {
            prop_assume!(level != libc::SOL_SOCKET || (kind != SO_TIMESTAMPING_NEW && kind != SO_TIMESTAMPING_OLD));
            let record = decode([AncillaryBlock { level, kind, data: &data }]);
            prop_assert!(record.is_empty());
        }

        #[test]
        fn short_blocks_give_nothing(len in 0..3 * EXTENDED_SLOT_SIZE) {
            let data = extended([(1, 1), (1, 1), (1, 1)]);
            prop_assert!(decode([block(SO_TIMESTAMPING_NEW, &data[..len])]).is_empty());
        }
    }
}
