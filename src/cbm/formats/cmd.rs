//! CMD native partition formats (D1M/D2M/D4M) and CMD hard-drive
//! native partitions (DNP): block-addressed rather than physically
//! zoned, with a reverse-bit-order BAM spread one block per 8 tracks.
use crate::cbm::bam::BamSelector;
use crate::cbm::block_address::BlockAddress;
use crate::cbm::directory::{DirectoryEntry, DirectoryEntryKind};
use crate::cbm::formats::{geometry_for, FormatAdapter};
use crate::cbm::geometry::Format;
use crate::cbm::image::{AddressingMode, Image, Settings};
use crate::cbm::validator::{DerivedFat, ValidationIssue};
use crate::config::Config;
use crate::error::{Error, ErrorKind};

const DISKNAME_OFFSET: usize = 0x04;
const TRACKS_PER_SELECTOR: u16 = 8;
const BITMAP_BYTES_PER_TRACK: usize = 32;

pub struct CmdAdapter {
    format: Format,
}

impl CmdAdapter {
    pub fn new(format: Format) -> CmdAdapter {
        CmdAdapter { format }
    }
}

impl FormatAdapter for CmdAdapter {
    fn format(&self) -> Format {
        self.format
    }

    fn root_settings(&self, total_blocks: u32, config: &Config) -> Result<Settings, Error> {
        let geometry = geometry_for(self.format, total_blocks);
        let selector_count = geometry.max_track.div_ceil(TRACKS_PER_SELECTOR);

        let bam_selectors: Vec<BamSelector> = (0..selector_count)
            .map(|i| BamSelector {
                start_track: 1 + i * TRACKS_PER_SELECTOR,
                track_count: TRACKS_PER_SELECTOR,
                block_track: 1,
                block_sector: 2 + i,
                start_offset: 0,
                stride: BITMAP_BYTES_PER_TRACK,
                bitmap_bytes: BITMAP_BYTES_PER_TRACK,
                reverse_bit_order: true,
            })
            .collect();

        let first_directory_block = BlockAddress::from_ts(&geometry, 1, 2 + selector_count)?;
        let info_block = BlockAddress::from_ts(&geometry, 1, 0)?;

        Ok(Settings {
            format: self.format,
            name: self.format.to_string(),
            geometry,
            addressing: AddressingMode::Global,
            base_byte_offset: 0,
            dir_tracks: vec![1],
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
            DirectoryEntryKind::CmdNative => Err(Error::new(ErrorKind::Unimplemented(format!(
                "descending into CMD native subdirectory {} is not yet implemented",
                entry.name
            )))),
            _ => Err(Error::new(ErrorKind::Unimplemented(format!(
                "{} has no subdirectory concept for entry {}",
                self.format, entry.name
            )))),
        }
    }

    fn has_super_sidesector(&self) -> bool {
        true
    }

    fn bam_post_fixup(
        &self,
        fat: &mut DerivedFat,
        _image: &Image,
        settings: &Settings,
        _issues: &mut Vec<ValidationIssue>,
    ) {
        // DNP carries a C128 boot block at (1,1), between the info
        // block at (1,0) and the first BAM selector block at (1,2);
        // no directory entry's chain ever passes through it.
        if self.format == Format::Dnp {
            if let Ok(boot_block) = BlockAddress::from_ts(&settings.geometry, 1, 1) {
                fat.force_used(boot_block.lba());
            }
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
    fn d1m_has_two_bam_selectors_for_16_tracks() {
        let adapter = CmdAdapter::new(Format::D1M);
        let settings = adapter.root_settings(4096, &test_config()).unwrap();
        assert_eq!(settings.bam_selectors.len(), 2);
        assert!(settings.bam_selectors[0].reverse_bit_order);
    }

    #[test]
    fn dnp_scales_selectors_with_block_count() {
        let adapter = CmdAdapter::new(Format::Dnp);
        let settings = adapter.root_settings(65536, &test_config()).unwrap();
        assert_eq!(settings.geometry.max_track, 256);
        assert_eq!(settings.bam_selectors.len(), 32);
    }

    #[test]
    fn dnp_fixup_marks_c128_boot_block_used() {
        let adapter = CmdAdapter::new(Format::Dnp);
        let settings = adapter.root_settings(65536, &test_config()).unwrap();
        let data = vec![0u8; settings.geometry.max_lba as usize * settings.geometry.bytes_per_block];
        let image = Image::from_parts(data, settings.clone());

        let mut fat = DerivedFat::new(settings.geometry.max_lba);
        let mut issues = Vec::new();
        adapter.bam_post_fixup(&mut fat, &image, &settings, &mut issues);

        let boot_block = BlockAddress::from_ts(&settings.geometry, 1, 1).unwrap();
        assert!(fat.is_used(boot_block.lba()));
        assert!(issues.is_empty());
    }

    #[test]
    fn d1m_fixup_does_not_mark_boot_block() {
        let adapter = CmdAdapter::new(Format::D1M);
        let settings = adapter.root_settings(4096, &test_config()).unwrap();
        let data = vec![0u8; settings.geometry.max_lba as usize * settings.geometry.bytes_per_block];
        let image = Image::from_parts(data, settings.clone());

        let mut fat = DerivedFat::new(settings.geometry.max_lba);
        let mut issues = Vec::new();
        adapter.bam_post_fixup(&mut fat, &image, &settings, &mut issues);

        let candidate = BlockAddress::from_ts(&settings.geometry, 1, 1).unwrap();
        assert!(!fat.is_used(candidate.lba()));
    }
}
