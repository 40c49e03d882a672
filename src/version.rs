//! Decoding of packed Vulkan version integers.
//!
//! Driver and API versions are both reported as a single `u32` laid out as
//! `major` in bits 22..31, `minor` in bits 12..21 and `patch` in bits 0..11.

use std::fmt;

const MAJOR_SHIFT: u32 = 22;
const MINOR_SHIFT: u32 = 12;
const MAJOR_MASK: u32 = 0x3ff;
const MINOR_MASK: u32 = 0x3ff;
const PATCH_MASK: u32 = 0xfff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub const fn decode(raw: u32) -> Self {
        Self {
            major: (raw >> MAJOR_SHIFT) & MAJOR_MASK,
            minor: (raw >> MINOR_SHIFT) & MINOR_MASK,
            patch: raw & PATCH_MASK,
        }
    }

    /// Packs the triple back into a `u32`. Fields wider than their bit
    /// width are truncated.
    pub const fn encode(self) -> u32 {
        ((self.major & MAJOR_MASK) << MAJOR_SHIFT)
            | ((self.minor & MINOR_MASK) << MINOR_SHIFT)
            | (self.patch & PATCH_MASK)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub fn version_to_string(raw: u32) -> String {
    Version::decode(raw).to_string()
}
