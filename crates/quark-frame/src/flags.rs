//! Frame flag bits.
//!
//! Bits 0-2 are assigned. The remaining bits are reserved and preserved
//! verbatim on decode.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Payload is gzip-compressed.
pub const COMPRESSED: u8 = 0x01;

/// Payload is AES-CTR encrypted (`iv || ciphertext`).
pub const ENCRYPTED: u8 = 0x02;

/// Payload is a bootstrap (API definition) document.
pub const BOOTSTRAP: u8 = 0x04;

/// Bitmask of transforms applied to a frame payload.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    /// No transforms applied.
    pub const NONE: Flags = Flags(0);
    /// See [`COMPRESSED`].
    pub const COMPRESSED: Flags = Flags(COMPRESSED);
    /// See [`ENCRYPTED`].
    pub const ENCRYPTED: Flags = Flags(ENCRYPTED);
    /// See [`BOOTSTRAP`].
    pub const BOOTSTRAP: Flags = Flags(BOOTSTRAP);

    /// Build flags from a raw header byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw header byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_compressed(self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub fn is_encrypted(self) -> bool {
        self.contains(Self::ENCRYPTED)
    }

    pub fn is_bootstrap(self) -> bool {
        self.contains(Self::BOOTSTRAP)
    }

    /// Returns a copy with `other` set or cleared.
    pub const fn with(self, other: Flags, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | other.0)
        } else {
            Self(self.0 & !other.0)
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::with_capacity(3);
        if self.is_compressed() {
            names.push("COMPRESSED");
        }
        if self.is_encrypted() {
            names.push("ENCRYPTED");
        }
        if self.is_bootstrap() {
            names.push("BOOTSTRAP");
        }
        write!(f, "Flags({:#04x}", self.0)?;
        if !names.is_empty() {
            write!(f, " {}", names.join("|"))?;
        }
        write!(f, ")")
    }
}
