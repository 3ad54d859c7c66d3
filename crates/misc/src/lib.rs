// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt;

/// Displays a binary value as an escaped ascii string, optionally cut off
/// after `limit` bytes with a trailing `...`.
#[derive(Clone, Copy)]
pub struct Show<'a> {
    bytes: &'a [u8],
    limit: Option<usize>,
}

impl<'a> Show<'a> {
    pub fn new(bytes: &'a [u8]) -> Show<'a> {
        Show { bytes, limit: None }
    }

    pub fn capped(bytes: &'a [u8], limit: usize) -> Show<'a> {
        Show {
            bytes,
            limit: Some(limit),
        }
    }
}

impl<'a> fmt::Display for Show<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = match self.limit {
            Some(limit) if limit < self.bytes.len() => &self.bytes[..limit],
            _ => self.bytes,
        };

        write!(f, "\"")?;
        for &ch in shown {
            for part in std::ascii::escape_default(ch) {
                fmt::Write::write_char(f, part as char)?;
            }
        }
        write!(f, "\"")?;
        if shown.len() < self.bytes.len() {
            write!(f, "...")?;
        }
        Ok(())
    }
}

impl<'a> fmt::Debug for Show<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Lowercase hex with no separators, for opaque control message payloads.
pub struct Hex<'a>(pub &'a [u8]);
impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_show() {
        assert_eq!(r#""test packet""#, Show::new(b"test packet").to_string());
        assert_eq!(r#""a\x00\n""#, Show::new(b"a\0\n").to_string());
        assert_eq!(r#""test"..."#, Show::capped(b"test packet", 4).to_string());
        assert_eq!(r#""test""#, Show::capped(b"test", 4).to_string());
        assert_eq!(r#""""#, Show::capped(b"", 0).to_string());
    }

    #[test]
    fn test_hex() {
        assert_eq!("00ff10", Hex(&[0, 255, 16]).to_string());
        assert_eq!("", Hex(&[]).to_string());
    }
}
