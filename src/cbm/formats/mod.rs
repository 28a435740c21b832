//! Per-format knowledge: geometry selection, BAM selector tables,
//! directory/info block locations, and the chdir rules for
//! subdirectories and partitions. Each format's specifics live in its
//! own submodule behind the shared [FormatAdapter] trait.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use crate::cbm::directory::DirectoryEntry;
use crate::cbm::geometry::{Format, Geometry};
use crate::cbm::image::{Image, Settings};
use crate::cbm::validator::{DerivedFat, ValidationIssue};
use crate::config::Config;
use crate::error::{Error, ErrorKind, InvalidErrorKind};

mod cbmdos;
mod cmd;
mod d80;
mod d81;

/// Per-format behavior needed to open an image and to descend into a
/// subdirectory or partition it contains.
pub trait FormatAdapter {
    /// The format this adapter implements.
    fn format(&self) -> Format;

    /// Build the root Settings frame for a freshly opened image of
    /// `total_blocks` blocks.
    fn root_settings(&self, total_blocks: u32, config: &Config) -> Result<Settings, Error>;

    /// Build the Settings frame for descending into `entry`, found
    /// while `parent` was the active frame.
    fn chdir(&self, image: &Image, parent: &Settings, entry: &DirectoryEntry) -> Result<Settings, Error>;

    /// True if this format's REL files address their side sectors
    /// through a super side sector (CMD native/DNP) rather than
    /// directly (1541/1571/1581/8050/8250).
    fn has_super_sidesector(&self) -> bool {
        false
    }

    /// Apply any format-specific adjustments to the derived FAT after
    /// the generic directory/chain walk (e.g. marking a format's fixed
    /// header/BAM blocks that the walk above didn't visit through any
    /// entry). The default implementation does nothing.
    fn bam_post_fixup(
        &self,
        _fat: &mut DerivedFat,
        _image: &Image,
        _settings: &Settings,
        _issues: &mut Vec<ValidationIssue>,
    ) {
    }
}

/// Look up the geometry for `format`, given the image's actual block
/// count (only meaningful for the block-addressed CMD native/DNP
/// formats; ignored for physically-zoned formats).
pub fn geometry_for(format: Format, total_blocks: u32) -> Geometry {
    use crate::cbm::geometry::*;
    match format {
        Format::D40 => d40_geometry(),
        Format::D64 => d64_geometry(),
        Format::D64_40 => d64_40_geometry(),
        Format::D64_42 => d64_42_geometry(),
        Format::D71 => d71_geometry(),
        Format::D80 => d80_geometry(),
        Format::D82 => d82_geometry(),
        Format::D81 => d81_geometry(),
        Format::D1M => cmd_native_geometry(Format::D1M, total_blocks),
        Format::D2M => cmd_native_geometry(Format::D2M, total_blocks),
        Format::D4M => cmd_native_geometry(Format::D4M, total_blocks),
        Format::Dnp => dnp_geometry(total_blocks),
    }
}

/// Return the boxed adapter implementing `format`'s behavior.
pub fn adapter_for(format: Format) -> Box<dyn FormatAdapter> {
    match format {
        Format::D40 | Format::D64 | Format::D64_40 | Format::D64_42 | Format::D71 => {
            Box::new(cbmdos::CbmDosAdapter::new(format))
        }
        Format::D80 | Format::D82 => Box::new(d80::D80Adapter::new(format)),
        Format::D81 => Box::new(d81::D81Adapter),
        Format::D1M | Format::D2M | Format::D4M | Format::Dnp => Box::new(cmd::CmdAdapter::new(format)),
    }
}

const NOMINAL_BLOCKS: [(Format, u32); 3] = [(Format::D1M, 4096), (Format::D2M, 8192), (Format::D4M, 16384)];

/// Total blocks in a fixed-size CMD native format's nominal size, used
/// both for format-guessing and for default geometry when the image
/// doesn't carry enough information to be certain.
fn nominal_cmd_blocks(format: Format) -> Option<u32> {
    NOMINAL_BLOCKS.iter().find(|(f, _)| *f == format).map(|(_, b)| *b)
}

fn base_len(format: Format, total_blocks: u32) -> usize {
    let geometry = geometry_for(format, total_blocks);
    geometry.max_lba as usize * geometry.bytes_per_block
}

fn supports_error_map(format: Format) -> bool {
    matches!(format, Format::D64 | Format::D40 | Format::D71 | Format::D80 | Format::D82 | Format::D81)
}

/// Guess a format from raw byte length alone, trying every format
/// that supports unambiguous auto-detection (everything except the
/// 40/42-track D64 variants and DNP, whose sizes are configurable and
/// would collide with other formats).
pub fn guess_format(size: usize) -> Option<Format> {
    const CANDIDATES: &[Format] =
        &[Format::D64, Format::D40, Format::D71, Format::D80, Format::D82, Format::D81, Format::D1M, Format::D2M, Format::D4M];

    for &format in CANDIDATES {
        let total_blocks = nominal_cmd_blocks(format).unwrap_or(0);
        let base = base_len(format, total_blocks);
        if size == base {
            return Some(format);
        }
        if supports_error_map(format) {
            let geometry = geometry_for(format, total_blocks);
            if size == base + geometry.max_lba as usize {
                return Some(format);
            }
        }
    }
    None
}

/// Split a raw image buffer into its data region and, if present, its
/// trailing per-block error map.
pub fn split_error_map(format: Format, data: &[u8], config: &Config) -> Result<(usize, Option<Vec<u8>>), Error> {
    let total_blocks = match format {
        Format::D1M | Format::D2M | Format::D4M => nominal_cmd_blocks(format).unwrap_or(0),
        Format::Dnp => (data.len() / 256) as u32,
        _ => 0,
    };
    let geometry = geometry_for(format, total_blocks);
    let base = geometry.max_lba as usize * geometry.bytes_per_block;
    let with_error_map = base + geometry.max_lba as usize;

    if data.len() == base {
        Ok((base, None))
    } else if supports_error_map(format) && data.len() == with_error_map {
        Ok((base, Some(data[base..].to_vec())))
    } else if config.strict_format_detection() {
        Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(format!(
            "image size {} does not match {} expected size {} (or {} with an error map)",
            data.len(),
            format,
            base,
            with_error_map
        )))))
    } else {
        Ok((base.min(data.len()), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_standard_sizes_unambiguously() {
        assert_eq!(guess_format(174848), Some(Format::D64));
        assert_eq!(guess_format(175531), Some(Format::D64));
        assert_eq!(guess_format(819200), Some(Format::D81));
        assert_eq!(guess_format(533248), Some(Format::D80));
        assert_eq!(guess_format(1066496), Some(Format::D82));
    }

    #[test]
    fn guess_rejects_unknown_size() {
        assert_eq!(guess_format(12345), None);
    }
}
