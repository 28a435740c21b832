//! The Commodore 8050/8250 family (D80/D82): BAM spread across
//! multiple header-track blocks, one per 50 tracks, each holding a
//! 1-byte free count plus a 4-byte bitmap per track.
use crate::cbm::bam::BamSelector;
use crate::cbm::block_address::BlockAddress;
use crate::cbm::directory::{DirectoryEntry, DirectoryEntryKind};
use crate::cbm::formats::{geometry_for, FormatAdapter};
use crate::cbm::geometry::Format;
use crate::cbm::image::{AddressingMode, Image, Settings};
use crate::config::Config;
use crate::error::{Error, ErrorKind, InvalidErrorKind};

const DISKNAME_OFFSET: usize = 0x06;
const TRACKS_PER_SELECTOR: u16 = 50;
const ENTRY_STRIDE: usize = 5;

pub struct D80Adapter {
    format: Format,
}

impl D80Adapter {
    pub fn new(format: Format) -> D80Adapter {
        D80Adapter { format }
    }

    fn selector_count(&self, max_track: u16) -> u16 {
        max_track.div_ceil(TRACKS_PER_SELECTOR)
    }
}

impl FormatAdapter for D80Adapter {
    fn format(&self) -> Format {
        self.format
    }

    fn root_settings(&self, total_blocks: u32, config: &Config) -> Result<Settings, Error> {
        let geometry = geometry_for(self.format, total_blocks);
        let selector_count = self.selector_count(geometry.max_track);

        let mut bam_selectors = Vec::new();
        let mut bam_counter_selectors = Vec::new();
        for i in 0..selector_count {
            let start_track = 1 + i * TRACKS_PER_SELECTOR;
            let track_count = TRACKS_PER_SELECTOR.min(geometry.max_track - start_track + 1);
            bam_selectors.push(BamSelector {
                start_track,
                track_count,
                block_track: 38,
                block_sector: i * 3,
                start_offset: 1,
                stride: ENTRY_STRIDE,
                bitmap_bytes: 4,
                reverse_bit_order: false,
            });
            bam_counter_selectors.push(BamSelector {
                start_track,
                track_count,
                block_track: 38,
                block_sector: i * 3,
                start_offset: 0,
                stride: ENTRY_STRIDE,
                bitmap_bytes: 0,
                reverse_bit_order: false,
            });
        }

        let first_directory_block = BlockAddress::from_ts(&geometry, 39, 1)?;
        let info_block = BlockAddress::from_ts(&geometry, 39, 0)?;

        Ok(Settings {
            format: self.format,
            name: self.format.to_string(),
            geometry,
            addressing: AddressingMode::Global,
            base_byte_offset: 0,
            dir_tracks: vec![38, 39],
            first_directory_block,
            info_block: Some(info_block),
            diskname_offset: DISKNAME_OFFSET,
            bam_selectors,
            bam_counter_selectors,
            derived_fat: None,
            geos_border: None,
            petscii_config: crate::config::clone_forbidden_bands_config(&config.forbidden_bands_config),
        })
    }

    fn chdir(&self, _image: &Image, _parent: &Settings, entry: &DirectoryEntry) -> Result<Settings, Error> {
        match &entry.kind {
            DirectoryEntryKind::Partition { .. } => Err(Error::new(ErrorKind::Unimplemented(format!(
                "{} does not support partitions",
                self.format
            )))),
            _ => Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(format!(
                "{} has no subdirectory concept to chdir into ({})",
                self.format, entry.name
            ))))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn test_config() -> Config {
        Config::load(config::Config::builder().build().unwrap()).unwrap()
    }

    #[test]
    fn d80_needs_two_bam_selectors() {
        let adapter = D80Adapter::new(Format::D80);
        let settings = adapter.root_settings(2083, &test_config()).unwrap();
        assert_eq!(settings.bam_selectors.len(), 2);
        assert_eq!(settings.info_block.unwrap().track(), 39);
    }

    #[test]
    fn d82_needs_four_bam_selectors() {
        let adapter = D80Adapter::new(Format::D82);
        let settings = adapter.root_settings(4166, &test_config()).unwrap();
        assert_eq!(settings.bam_selectors.len(), 4);
    }
}
