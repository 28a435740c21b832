//! The Commodore 1581 (D81): two BAM blocks of 40 tracks each,
//! 40-sector bitmaps, and a directory that (unlike the 1541 family)
//! can itself be treated as a CBM-native subdirectory target.
use crate::cbm::bam::BamSelector;
use crate::cbm::block_address::BlockAddress;
use crate::cbm::directory::{DirectoryEntry, DirectoryEntryKind};
use crate::cbm::formats::{geometry_for, FormatAdapter};
use crate::cbm::geometry::Format;
use crate::cbm::image::{AddressingMode, Image, Settings};
use crate::config::Config;
use crate::error::{Error, ErrorKind, InvalidErrorKind};

const DISKNAME_OFFSET: usize = 0x04;

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(message)))
}

pub struct D81Adapter;

impl FormatAdapter for D81Adapter {
    fn format(&self) -> Format {
        Format::D81
    }

    fn root_settings(&self, total_blocks: u32, config: &Config) -> Result<Settings, Error> {
        let geometry = geometry_for(Format::D81, total_blocks);

        let bam_selectors = vec![
            BamSelector {
                start_track: 1,
                track_count: 40,
                block_track: 40,
                block_sector: 1,
                start_offset: 0x11,
                stride: 6,
                bitmap_bytes: 5,
                reverse_bit_order: false,
            },
            BamSelector {
                start_track: 41,
                track_count: 40,
                block_track: 40,
                block_sector: 2,
                start_offset: 0x11,
                stride: 6,
                bitmap_bytes: 5,
                reverse_bit_order: false,
            },
        ];
        let bam_counter_selectors = vec![
            BamSelector { start_offset: 0x10, stride: 6, bitmap_bytes: 0, ..bam_selectors[0] },
            BamSelector { start_offset: 0x10, stride: 6, bitmap_bytes: 0, ..bam_selectors[1] },
        ];

        let first_directory_block = BlockAddress::from_ts(&geometry, 40, 3)?;
        let info_block = BlockAddress::from_ts(&geometry, 40, 0)?;

        Ok(Settings {
            format: Format::D81,
            name: Format::D81.to_string(),
            geometry,
            addressing: AddressingMode::Global,
            base_byte_offset: 0,
            dir_tracks: vec![40],
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

    fn chdir(&self, _image: &Image, parent: &Settings, entry: &DirectoryEntry) -> Result<Settings, Error> {
        match &entry.kind {
            DirectoryEntryKind::Partition { start_block, block_count } => {
                let (start_track, start_sector) = parent
                    .geometry
                    .lba_to_ts(start_block.lba())
                    .ok_or_else(|| invalid(format!("partition {} starts at an invalid block", entry.name)))?;
                if start_sector != 0 {
                    return Err(invalid(format!(
                        "partition {} starts at sector {} of track {}, not sector 0",
                        entry.name, start_sector, start_track
                    )));
                }

                let end_lba = start_block.lba() + *block_count as u32 - 1;
                let (end_track, end_sector) = parent
                    .geometry
                    .lba_to_ts(end_lba)
                    .ok_or_else(|| invalid(format!("partition {} ends past the end of the image", entry.name)))?;
                let end_track_max_sector = parent
                    .geometry
                    .sectors_in_track(end_track)
                    .ok_or_else(|| invalid(format!("partition {} ends on a nonexistent track", entry.name)))?
                    - 1;
                if end_sector != end_track_max_sector {
                    return Err(invalid(format!(
                        "partition {} ends at sector {} of track {}, not its last sector {}",
                        entry.name, end_sector, end_track, end_track_max_sector
                    )));
                }

                if (start_track..=end_track).any(|t| parent.dir_tracks.contains(&t)) {
                    return Err(invalid(format!(
                        "partition {} (tracks {}..={}) crosses the directory track",
                        entry.name, start_track, end_track
                    )));
                }

                let mut child = parent.clone();
                child.name = format!("{} partition {}", parent.name, entry.name);
                child.addressing = AddressingMode::Relative;
                child.base_byte_offset =
                    parent.base_byte_offset + (start_block.lba() as usize - 1) * parent.geometry.bytes_per_block;
                let geometry = crate::cbm::geometry::Geometry::new_fixed(
                    Format::D81,
                    (*block_count as u32 / 40).max(1) as u16,
                    40,
                    256,
                );
                child.first_directory_block = BlockAddress::from_ts(&geometry, 40, 3)?;
                child.info_block = Some(BlockAddress::from_ts(&geometry, 40, 0)?);
                child.geometry = geometry;
                child.geos_border = None;
                Ok(child)
            }
            _ => Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(format!(
                "D81 can only chdir into a partition entry, not {}",
                entry.name
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
    fn d81_root_settings_has_two_bam_blocks() {
        let adapter = D81Adapter;
        let settings = adapter.root_settings(3200, &test_config()).unwrap();
        assert_eq!(settings.bam_selectors.len(), 2);
        assert_eq!(settings.first_directory_block.track(), 40);
    }

    fn partition_entry(settings: &Settings, lba: u32, block_count: u16) -> DirectoryEntry {
        let start_block = BlockAddress::from_lba(&settings.geometry, lba).unwrap();
        DirectoryEntry {
            name: "PART".to_string(),
            suffix: String::new(),
            type_code: 5,
            kind: DirectoryEntryKind::Partition { start_block, block_count },
            start_block,
            block_count,
            locked: false,
            closed: true,
            datetime: None,
        }
    }

    #[test]
    fn chdir_accepts_track_aligned_partition() {
        let adapter = D81Adapter;
        let settings = adapter.root_settings(3200, &test_config()).unwrap();
        let image = Image::from_parts(vec![0u8; 3200 * 256], settings.clone());
        // Tracks 1..=5: lba 1..=200, 5 tracks of 40 sectors each.
        let entry = partition_entry(&settings, 1, 200);
        assert!(adapter.chdir(&image, &settings, &entry).is_ok());
    }

    #[test]
    fn chdir_rejects_partition_not_starting_at_sector_zero() {
        let adapter = D81Adapter;
        let settings = adapter.root_settings(3200, &test_config()).unwrap();
        let image = Image::from_parts(vec![0u8; 3200 * 256], settings.clone());
        let entry = partition_entry(&settings, 2, 199);
        assert!(adapter.chdir(&image, &settings, &entry).is_err());
    }

    #[test]
    fn chdir_rejects_partition_not_ending_at_last_sector() {
        let adapter = D81Adapter;
        let settings = adapter.root_settings(3200, &test_config()).unwrap();
        let image = Image::from_parts(vec![0u8; 3200 * 256], settings.clone());
        let entry = partition_entry(&settings, 1, 199);
        assert!(adapter.chdir(&image, &settings, &entry).is_err());
    }

    #[test]
    fn chdir_rejects_partition_crossing_directory_track() {
        let adapter = D81Adapter;
        let settings = adapter.root_settings(3200, &test_config()).unwrap();
        let image = Image::from_parts(vec![0u8; 3200 * 256], settings.clone());
        // Tracks 39..=41: starts before the directory track (40) and
        // runs through it.
        let start_lba = (39 - 1) as u32 * 40 + 1;
        let entry = partition_entry(&settings, start_lba, 3 * 40);
        assert!(adapter.chdir(&image, &settings, &entry).is_err());
    }
}
