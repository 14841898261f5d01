//! C-ABI exports over the process-wide table.
//!
//! Gated behind `features = ["ffi"]`. Kinds cross the boundary as their
//! raw `u8` values.

use crate::global;
use crate::kind::FastMegapageKind;

#[unsafe(export_name = "rsmegapage_lookup")]
pub extern "C" fn rsmegapage_lookup(index: usize) -> u8 {
    global::table().lookup(index).into()
}

#[unsafe(export_name = "rsmegapage_lookup_address")]
pub extern "C" fn rsmegapage_lookup_address(addr: usize) -> u8 {
    global::table().lookup_address(addr).into()
}

/// Returns `false` (and records nothing) if `kind` is not a valid kind value.
#[unsafe(export_name = "rsmegapage_set")]
pub extern "C" fn rsmegapage_set(index: usize, kind: u8) -> bool {
    match FastMegapageKind::try_from(kind) {
        Ok(kind) => {
            global::table().set_by_index(index, kind);
            true
        }
        Err(err) => {
            tracing::warn!(index, error = %err, "rejected megapage kind from C caller");
            false
        }
    }
}
