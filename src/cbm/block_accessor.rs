//! Reads the two-byte link header (next track, next sector/used-count)
//! that begins most CBM DOS blocks, and follows it one step.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use crate::cbm::block_address::BlockAddress;
use crate::cbm::image::{Image, Settings};
use crate::error::Error;

/// What a block's link header says about its position in a chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Link {
    /// Points at the next block in the chain.
    Next(BlockAddress),
    /// This is the chain's last block; the value is the number of
    /// bytes of payload used in it (1..=254, byte 1 of the header).
    Last(u8),
}

/// Read the two-byte link header of the block at `addr` and resolve
/// it against `settings`'s geometry.
pub fn read_link(image: &Image, settings: &Settings, addr: &BlockAddress) -> Result<Link, Error> {
    let bytes = image.block_bytes_in(settings, addr)?;
    let next_track = bytes[0];
    let next_sector = bytes[1];
    if next_track == 0 {
        Ok(Link::Last(next_sector))
    } else {
        let next = BlockAddress::from_ts(&settings.geometry, next_track as u16, next_sector as u16)?;
        Ok(Link::Next(next))
    }
}

/// The payload of a block, i.e. everything after its two-byte link
/// header.
pub fn payload<'a>(image: &'a Image, settings: &Settings, addr: &BlockAddress) -> Result<&'a [u8], Error> {
    let bytes = image.block_bytes_in(settings, addr)?;
    Ok(&bytes[2..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use forbidden_bands::Configuration;
    use crate::cbm::geometry::d64_geometry;
    use crate::cbm::image::AddressingMode;

    fn test_settings() -> Settings {
        Settings {
            format: crate::cbm::geometry::Format::D64,
            name: "test".to_string(),
            geometry: d64_geometry(),
            addressing: AddressingMode::Global,
            base_byte_offset: 0,
            dir_tracks: vec![18],
            first_directory_block: BlockAddress::from_ts(&d64_geometry(), 18, 1).unwrap(),
            info_block: None,
            diskname_offset: 0,
            bam_selectors: vec![],
            bam_counter_selectors: vec![],
            derived_fat: None,
            geos_border: None,
            petscii_config: forbidden_bands::Config::load().unwrap(),
        }
    }

    #[test]
    fn last_block_reports_used_count() {
        let settings = test_settings();
        let mut data = vec![0u8; settings.geometry.max_lba as usize * 256];
        let start = BlockAddress::from_ts(&settings.geometry, 1, 0).unwrap();
        let range = settings.byte_range(&start).unwrap();
        data[range.start] = 0;
        data[range.start + 1] = 120;
        let image = Image::from_parts(data, settings.clone());
        assert_eq!(read_link(&image, &settings, &start).unwrap(), Link::Last(120));
    }

    #[test]
    fn link_points_at_next_block() {
        let settings = test_settings();
        let mut data = vec![0u8; settings.geometry.max_lba as usize * 256];
        let start = BlockAddress::from_ts(&settings.geometry, 1, 0).unwrap();
        let range = settings.byte_range(&start).unwrap();
        data[range.start] = 1;
        data[range.start + 1] = 1;
        let image = Image::from_parts(data, settings.clone());
        let next = BlockAddress::from_ts(&settings.geometry, 1, 1).unwrap();
        assert_eq!(read_link(&image, &settings, &start).unwrap(), Link::Next(next));
    }
}
