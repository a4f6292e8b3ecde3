//! RenderWare library version stamps.
//!
//! # Packed layout (little-endian u32)
//!
//! | Bits  | Field |
//! |-------|-------|
//! | 0–15  | build number (`0xFFFF` = unspecified) |
//! | 16–21 | revision minor |
//! | 22–25 | revision major |
//! | 26–29 | library minor |
//! | 30–31 | library major − 3 |
//!
//! Stamps written by libraries older than 3.1 have no build field and store
//! the plain version shifted right by 8 (`0x310` is 3.1.0.0).  Such stamps
//! are recognised by their zero upper half.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const BUILD_UNSPECIFIED: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryVersion {
    pub lib_major: u8,
    pub lib_minor: u8,
    pub rev_major: u8,
    pub rev_minor: u8,
    pub build:     u16,
}

impl LibraryVersion {
    pub const fn new(lib_major: u8, lib_minor: u8, rev_major: u8, rev_minor: u8) -> Self {
        Self { lib_major, lib_minor, rev_major, rev_minor, build: BUILD_UNSPECIFIED }
    }

    pub const fn with_build(mut self, build: u16) -> Self {
        self.build = build;
        self
    }

    /// Version as the five-nibble integer RenderWare uses internally (3.6.0.3 → 0x36003).
    pub fn as_u32(&self) -> u32 {
        ((self.lib_major as u32 & 0xF) << 16)
            | ((self.lib_minor as u32 & 0xF) << 12)
            | ((self.rev_major as u32 & 0xF) << 8)
            | (self.rev_minor as u32 & 0xFF)
    }

    fn from_u32(ver: u32, build: u16) -> Self {
        Self {
            lib_major: ((ver >> 16) & 0xF) as u8,
            lib_minor: ((ver >> 12) & 0xF) as u8,
            rev_major: ((ver >> 8) & 0xF) as u8,
            rev_minor: (ver & 0xFF) as u8,
            build,
        }
    }

    pub fn pack(&self) -> u32 {
        let ver = self.as_u32();
        if ver < 0x31000 {
            return ver >> 8;
        }
        (((ver - 0x30000) & 0x3FF00) << 14) | ((ver & 0x3F) << 16) | self.build as u32
    }

    pub fn unpack(stamp: u32) -> Self {
        if stamp & 0xFFFF_0000 == 0 {
            return Self::from_u32(stamp << 8, BUILD_UNSPECIFIED);
        }
        let ver = (((stamp >> 14) & 0x3FF00) + 0x30000) | ((stamp >> 16) & 0x3F);
        Self::from_u32(ver, (stamp & 0xFFFF) as u16)
    }

    pub fn is_build_specified(&self) -> bool {
        self.build != BUILD_UNSPECIFIED
    }

    /// Ordering by library version only; build numbers are not comparable.
    pub fn is_at_least(&self, lib_major: u8, lib_minor: u8, rev_major: u8, rev_minor: u8) -> bool {
        self.as_u32() >= LibraryVersion::new(lib_major, lib_minor, rev_major, rev_minor).as_u32()
    }
}

impl Default for LibraryVersion {
    /// San Andreas-era 3.6.0.3, the most common version in the wild.
    fn default() -> Self {
        LibraryVersion::new(3, 6, 0, 3)
    }
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.lib_major, self.lib_minor, self.rev_major, self.rev_minor)?;
        if self.is_build_specified() {
            write!(f, " (build {:#06x})", self.build)?;
        }
        Ok(())
    }
}

impl FromStr for LibraryVersion {
    type Err = String;

    /// Accepts `"3.6.0.3"` and optionally a build suffix `"3.6.0.3:0x00FF"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ver, build) = match s.split_once(':') {
            Some((v, b)) => {
                let b = b.trim();
                let parsed = match b.strip_prefix("0x") {
                    Some(hex) => u16::from_str_radix(hex, 16),
                    None      => b.parse::<u16>(),
                };
                (v, parsed.map_err(|e| format!("invalid build number '{b}': {e}"))?)
            }
            None => (s, BUILD_UNSPECIFIED),
        };
        let parts: Vec<&str> = ver.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(format!("expected four version components, got '{s}'"));
        }
        let mut fields = [0u8; 4];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|e| format!("invalid version component '{part}': {e}"))?;
        }
        if fields[0] < 3 || fields[0] > 6 || fields[1] > 15 || fields[2] > 15 || fields[3] > 63 {
            return Err(format!("version '{s}' out of the packable range"));
        }
        Ok(LibraryVersion::new(fields[0], fields[1], fields[2], fields[3]).with_build(build))
    }
}

impl Serialize for LibraryVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = if self.is_build_specified() {
            format!("{}.{}.{}.{}:{:#06x}", self.lib_major, self.lib_minor, self.rev_major, self.rev_minor, self.build)
        } else {
            format!("{}.{}.{}.{}", self.lib_major, self.lib_minor, self.rev_major, self.rev_minor)
        };
        serializer.serialize_str(&s)
    }
}

impl<'de> Deserialize<'de> for LibraryVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
