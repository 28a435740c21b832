#![warn(missing_docs)]
#![warn(unsafe_code)]
//! cbmimage reads Commodore 8-bit floppy and hard-drive disk images:
//! tracks, sectors, directories, files, and the Block Availability Map,
//! plus a validator that derives its own allocation table from file
//! chains and cross-checks it against the on-disk BAM.
//!
//! The primary entry point is [cbm::image::Image](crate::cbm::image::Image).
//! Validation lives in [cbm::validator](crate::cbm::validator).
use log::error;

pub mod cbm;
pub mod config;
pub mod error;

/// Initialize the module.
/// This should be called before any parsing is performed.
/// Panics on failure or if there are any incompatibilities.
pub fn init() {
    // If we're on a system with a usize < 32 bits then fail.  This
    // crate is geared towards parsing file formats for 8-bit systems,
    // but the code currently does not run on 8-bit systems.  For
    // example, we read the entire image into a single buffer and
    // address it with usize indexes.
    if usize::BITS < 32 {
        error!(
            "Architecture usize {} is too small for this library",
            usize::BITS
        );
        panic!(
            "Architecture usize {} is too small for this library",
            usize::BITS
        );
    }
}
