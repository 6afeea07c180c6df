use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Set of credential technologies found on a card.
///
/// `UNKNOWN` (no bits) is both the empty set and the progress marker sent
/// once a scan has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CardTechnology(u32);

impl CardTechnology {
    pub const UNKNOWN: Self = Self(0);
    pub const PIV: Self = Self(1);
    pub const DESFIRE: Self = Self(1 << 1);
    /// Legacy flag, no detector sets it
    pub const ICLASS: Self = Self(1 << 2);
    pub const PKOC: Self = Self(1 << 3);
    pub const ISO14443: Self = Self(1 << 4);
    pub const LEAF: Self = Self(1 << 5);

    const NAMED: [(Self, &'static str); 6] = [
        (Self::PIV, "PIV"),
        (Self::DESFIRE, "DESFire"),
        (Self::ICLASS, "iClass"),
        (Self::PKOC, "PKOC"),
        (Self::ISO14443, "ISO14443"),
        (Self::LEAF, "LEAF"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping any bit without a named flag
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x3F)
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Individual flags set in `self`, lowest bit first
    pub fn iter(self) -> impl Iterator<Item = CardTechnology> {
        Self::NAMED
            .into_iter()
            .map(|(flag, _)| flag)
            .filter(move |flag| self.contains(*flag))
    }

    /// Name of a single flag; `None` for combinations
    pub fn name(self) -> Option<&'static str> {
        if self.is_unknown() {
            return Some("Unknown");
        }
        Self::NAMED
            .iter()
            .find(|(flag, _)| *flag == self)
            .map(|(_, name)| *name)
    }
}

impl BitOr for CardTechnology {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CardTechnology {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CardTechnology {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for CardTechnology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return f.write_str("Unknown");
        }
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

impl Serialize for CardTechnology {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
