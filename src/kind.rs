//! Megapage kinds: which allocator regime owns a megapage.

use crate::error::Error;

/// Width of one packed kind entry in a snapshot's bitfield vector.
pub const KIND_BITS: u32 = 2;

/// Number of defined kinds (all values of a `KIND_BITS`-wide field).
pub const NUM_KINDS: usize = 1 << KIND_BITS;

/// The kind owning a megapage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum FastMegapageKind {
    /// Not owned by any fast allocator regime.
    #[default]
    Unallocated = 0,
    /// Small objects in exclusive segregated pages. This is the hot kind.
    SmallExclusiveSegregated = 1,
    /// Medium objects in segregated pages.
    MediumSegregated = 2,
    /// Large objects carved from slabs.
    LargeSlab = 3,
}

impl FastMegapageKind {
    /// The kind special-cased by the fast-fast bits.
    pub const HOT: Self = Self::SmallExclusiveSegregated;

    pub const ALL: [Self; NUM_KINDS] = [
        Self::Unallocated,
        Self::SmallExclusiveSegregated,
        Self::MediumSegregated,
        Self::LargeSlab,
    ];

    /// Decode a packed field. Every `KIND_BITS`-wide value is a valid kind.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & ((1 << KIND_BITS) - 1) {
            0 => Self::Unallocated,
            1 => Self::SmallExclusiveSegregated,
            2 => Self::MediumSegregated,
            _ => Self::LargeSlab,
        }
    }

    #[inline]
    pub const fn to_bits(self) -> u32 {
        self as u32
    }

    #[inline]
    pub const fn is_hot(self) -> bool {
        matches!(self, Self::SmallExclusiveSegregated)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Unallocated => "unallocated",
            Self::SmallExclusiveSegregated => "small_exclusive_segregated",
            Self::MediumSegregated => "medium_segregated",
            Self::LargeSlab => "large_slab",
        }
    }
}

impl TryFrom<u8> for FastMegapageKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        if (value as usize) < NUM_KINDS {
            Ok(Self::from_bits(value as u32))
        } else {
            Err(Error::InvalidKind(value))
        }
    }
}

impl From<FastMegapageKind> for u8 {
    fn from(kind: FastMegapageKind) -> u8 {
        kind as u8
    }
}

impl core::fmt::Display for FastMegapageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
