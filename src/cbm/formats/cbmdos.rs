//! The 2040/3040/4040/1541/1571 family (D40, D64, its 40/42-track
//! variants, and D71): single info/BAM block at the start of the
//! directory track, 4-byte-per-track BAM entries.
use crate::cbm::bam::BamSelector;
use crate::cbm::block_address::BlockAddress;
use crate::cbm::directory::{DirectoryEntry, DirectoryEntryKind};
use crate::cbm::formats::{geometry_for, FormatAdapter};
use crate::cbm::geometry::Format;
use crate::cbm::image::{AddressingMode, Image, Settings};
use crate::config::Config;
use crate::error::{Error, ErrorKind, InvalidErrorKind};

const DISKNAME_OFFSET: usize = 0x90;

pub struct CbmDosAdapter {
    format: Format,
}

impl CbmDosAdapter {
    pub fn new(format: Format) -> CbmDosAdapter {
        CbmDosAdapter { format }
    }
}

impl FormatAdapter for CbmDosAdapter {
    fn format(&self) -> Format {
        self.format
    }

    fn root_settings(&self, total_blocks: u32, config: &Config) -> Result<Settings, Error> {
        let geometry = geometry_for(self.format, total_blocks);

        let mut bam_selectors = vec![BamSelector {
            start_track: 1,
            track_count: 35,
            block_track: 18,
            block_sector: 0,
            start_offset: 4,
            stride: 4,
            bitmap_bytes: 3,
            reverse_bit_order: false,
        }];

        if self.format == Format::D71 {
            bam_selectors.push(BamSelector {
                start_track: 36,
                track_count: 35,
                block_track: 53,
                block_sector: 0,
                start_offset: 0,
                stride: 3,
                bitmap_bytes: 3,
                reverse_bit_order: false,
            });
        }

        let first_directory_block = BlockAddress::from_ts(&geometry, 18, 1)?;
        let info_block = BlockAddress::from_ts(&geometry, 18, 0)?;

        Ok(Settings {
            format: self.format,
            name: self.format.to_string(),
            geometry,
            addressing: AddressingMode::Global,
            base_byte_offset: 0,
            dir_tracks: vec![18],
            first_directory_block,
            info_block: Some(info_block),
            diskname_offset: DISKNAME_OFFSET,
            bam_selectors,
            bam_counter_selectors: vec![],
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
    fn d64_root_settings_point_at_track18() {
        let adapter = CbmDosAdapter::new(Format::D64);
        let settings = adapter.root_settings(683, &test_config()).unwrap();
        assert_eq!(settings.info_block.unwrap().track(), 18);
        assert_eq!(settings.first_directory_block.track(), 18);
        assert_eq!(settings.bam_selectors.len(), 1);
    }

    #[test]
    fn d71_has_two_bam_selectors() {
        let adapter = CbmDosAdapter::new(Format::D71);
        let settings = adapter.root_settings(1366, &test_config()).unwrap();
        assert_eq!(settings.bam_selectors.len(), 2);
    }
}
