//! Noise actuator command in its two encodings.

use compact_str::{format_compact, CompactString};
use serde::{Deserialize, Serialize};

/// A noise-injection setting: the raw register value plus its
/// human-readable hex label.
///
/// Labels read from a sweep dataset are kept verbatim (the collector writes
/// `0X1C000`); settings derived at runtime are labelled `0x1C000`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseSetting {
    pub hex: CompactString,
    pub dec: u32,
}

impl NoiseSetting {
    pub fn from_dec(dec: u32) -> Self {
        Self {
            hex: format_compact!("{dec:#X}"),
            dec,
        }
    }

    pub fn with_label(hex: impl Into<CompactString>, dec: u32) -> Self {
        Self {
            hex: hex.into(),
            dec,
        }
    }

    /// The next setting up, or `None` once the register is exhausted.
    pub fn next(&self) -> Option<Self> {
        self.dec.checked_add(1).map(Self::from_dec)
    }
}

/// Format a register value the way the sweep collector labels its rows.
pub fn sweep_label(dec: u32) -> CompactString {
    format_compact!("0X{dec:05X}")
}
