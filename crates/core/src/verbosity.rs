//! Verbosity mask
//!
//! Level-0 messages (`info`, `warn`, `error`) are always emitted. Each bit of
//! the mask enables `debug` output for one category; categories map onto
//! `tracing` targets so the subscriber can filter them.

use bitflags::bitflags;

/// `tracing` targets for the verbosity categories
pub mod targets {
    pub const EVENTS: &str = "dtree::events";
    pub const CACHE: &str = "dtree::cache";
    pub const ROOTS: &str = "dtree::roots";
    pub const RENAMES: &str = "dtree::renames";
    pub const CHECK: &str = "dtree::check";
    pub const RESCAN: &str = "dtree::rescan";
}

bitflags! {
    /// Categories of debug output
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Verbosity: u32 {
        /// Every event read from the kernel
        const EVENTS = 0x01;
        /// Cache adds, removals and renames
        const CACHE = 0x02;
        /// Root validation and retirement
        const ROOTS = 0x04;
        /// Rename cookie pairing
        const RENAMES = 0x08;
        /// Per-entry consistency check results
        const CHECK = 0x10;
        /// Subtree walks and rebuilds
        const RESCAN = 0x20;
    }
}

impl Verbosity {
    /// Build from a raw mask, ignoring unknown bits
    pub fn from_mask(mask: u32) -> Self {
        Self::from_bits_truncate(mask)
    }

    /// Targets whose debug output is enabled, with their on/off state
    pub fn targets(self) -> [(&'static str, bool); 6] {
        [
            (targets::EVENTS, self.contains(Self::EVENTS)),
            (targets::CACHE, self.contains(Self::CACHE)),
            (targets::ROOTS, self.contains(Self::ROOTS)),
            (targets::RENAMES, self.contains(Self::RENAMES)),
            (targets::CHECK, self.contains(Self::CHECK)),
            (targets::RESCAN, self.contains(Self::RESCAN)),
        ]
    }
}

/// Parse a mask given as decimal or `0x`-prefixed hex
pub fn parse_mask(text: &str) -> Result<u32, std::num::ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    }
}
