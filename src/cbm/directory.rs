//! Directory entry parsing and the Chain Walker that enumerates a
//! directory block chain 8 entries at a time.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use forbidden_bands::petscii::PetsciiString;

use crate::cbm::block_accessor::{self, Link};
use crate::cbm::block_address::BlockAddress;
use crate::cbm::image::{Image, Settings};
use crate::error::{Error, ErrorKind, InvalidErrorKind};

const ENTRY_SIZE: usize = 32;
const ENTRIES_PER_BLOCK: usize = 8;
const NAME_PAD: u8 = 0xA0;

/// A creation date/time stamp, as stored by CMD native formats. Years
/// below 83 are read as 2000+year; 83 and above as 1900+year, per the
/// convention CMD used to keep dates sortable across the century
/// boundary its drives shipped into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp {
    /// Full four-digit year.
    pub year: u16,
    /// Month, 1-12.
    pub month: u8,
    /// Day of month, 1-31.
    pub day: u8,
    /// Hour, 0-23.
    pub hour: u8,
    /// Minute, 0-59.
    pub minute: u8,
}

impl Timestamp {
    fn from_bytes(raw_year: u8, month: u8, day: u8, hour: u8, minute: u8) -> Option<Timestamp> {
        if month == 0 || day == 0 {
            return None;
        }
        let year = if raw_year < 83 { 2000 + raw_year as u16 } else { 1900 + raw_year as u16 };
        Some(Timestamp { year, month, day, hour, minute })
    }
}

/// REL-file-specific fields: where its side sector chain starts and
/// its fixed record length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RelInfo {
    /// First block of the file's data chain (duplicates
    /// [DirectoryEntry::start_block], kept here for symmetry with the
    /// side sector address).
    pub first_data_block: BlockAddress,
    /// First side sector block (or super side sector block, on
    /// formats that support super side sectors).
    pub side_sector_block: BlockAddress,
    /// Fixed record length, 1-254 bytes.
    pub record_length: u8,
}

/// What kind of payload a directory entry's start block chain holds,
/// beyond the plain SEQ/PRG/USR byte-stream case.
#[derive(Clone, Debug)]
pub enum DirectoryEntryKind {
    /// A plain SEQ/PRG/USR/DEL file: its chain is a byte stream.
    Regular,
    /// A REL file with fixed-length records addressed via side
    /// sectors.
    Rel(RelInfo),
    /// A GEOS file: either a sequential byte stream or, when `vlir` is
    /// true, a VLIR record map whose chain is not itself file data.
    Geos {
        /// GEOS info block, if this entry carries a GEOS overlay.
        info_block: Option<BlockAddress>,
        /// True if the file's start block is a VLIR record map rather
        /// than the first block of file data.
        vlir: bool,
        /// GEOS file type byte.
        filetype: u8,
    },
    /// A row in a CMD/1581-style partition table: `start_block` and
    /// `block_count` are already converted to this image's LBA units.
    Partition {
        /// First LBA of the partition.
        start_block: BlockAddress,
        /// Number of blocks in the partition.
        block_count: u16,
    },
    /// A CMD native sub-partition entry. Parsing its contents is not
    /// yet implemented.
    CmdNative,
}

/// A single parsed directory entry.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    /// The decoded filename, PETSCII shifted-space padding stripped.
    pub name: String,
    /// Any bytes stored in the name field after its first shifted-space
    /// delimiter, decoded the same way as `name`. CBM drives sometimes
    /// append text here, e.g. a LOAD/RUN prefix like `,8,1`. Empty if
    /// the field held no such trailer.
    pub suffix: String,
    /// Raw low nibble of the type byte (0=DEL,1=SEQ,2=PRG,3=USR,4=REL,
    /// 5=partition, 6=CMD native).
    pub type_code: u8,
    /// What this entry's chain holds.
    pub kind: DirectoryEntryKind,
    /// First block of the entry's chain (or, for partitions, the
    /// partition's first LBA).
    pub start_block: BlockAddress,
    /// Declared block count (little-endian bytes 0x1E-0x1F of the raw
    /// entry).
    pub block_count: u16,
    /// True if the "locked" (write-protect) flag is set.
    pub locked: bool,
    /// True if the "closed" flag is set. An entry with this flag clear
    /// represents a file left open by an interrupted save.
    pub closed: bool,
    /// Creation date/time, on formats that record one.
    pub datetime: Option<Timestamp>,
}

impl DirectoryEntry {
    /// True if this slot's type byte is 0 (DEL with no name), meaning
    /// the slot is empty and should be skipped during enumeration.
    pub fn is_deleted(&self) -> bool {
        self.type_code == 0 && self.name.is_empty()
    }

    fn parse(
        raw: &[u8; ENTRY_SIZE],
        geometry: &crate::cbm::geometry::Geometry,
        geos_active: bool,
        dates_active: bool,
        petscii_config: &forbidden_bands::Config,
    ) -> Result<Option<DirectoryEntry>, Error> {
        let type_byte = raw[0x02];
        let type_code = type_byte & 0x0F;
        let closed = type_byte & 0x80 != 0;
        let locked = type_byte & 0x40 != 0;

        let name_raw = &raw[0x05..0x15];
        let name_ps: PetsciiString<'_, 16> = PetsciiString::from_byte_slice_strip_shifted_space_with_config(
            name_raw,
            &petscii_config.petscii,
        );
        let name = name_ps.to_string();

        // Anything after the first shifted-space delimiter in the name
        // field is retained rather than discarded; CBM drives sometimes
        // store trailing text there (e.g. ",8,1").
        let suffix = match name_raw.iter().position(|&b| b == NAME_PAD) {
            Some(delim) if delim + 1 < name_raw.len() => {
                let mut suffix_buf = [NAME_PAD; 16];
                let rest = &name_raw[delim + 1..];
                suffix_buf[..rest.len()].copy_from_slice(rest);
                let suffix_ps: PetsciiString<'_, 16> = PetsciiString::from_byte_slice_strip_shifted_space_with_config(
                    &suffix_buf,
                    &petscii_config.petscii,
                );
                suffix_ps.to_string()
            }
            _ => String::new(),
        };

        if type_byte == 0 && name.is_empty() {
            return Ok(None);
        }

        let block_count_field = u16::from_le_bytes([raw[0x1E], raw[0x1F]]);

        let datetime = if dates_active {
            Timestamp::from_bytes(raw[0x19], raw[0x1A], raw[0x1B], raw[0x1C], raw[0x1D])
        } else {
            None
        };

        // Bytes 0x03/0x04 mean "first block track/sector" for every
        // type except a partition row, where the whole entry is an
        // LBA/count pair rather than a track/sector file pointer.
        let (start_block, block_count, kind) = if type_code == 5 {
            let (lba, count) = cmd_partition_units(raw);
            let start = BlockAddress::from_lba(geometry, lba)?;
            (start, count, DirectoryEntryKind::Partition { start_block: start, block_count: count })
        } else {
            let start_t = raw[0x03] as u16;
            let start_s = raw[0x04] as u16;
            let start_block = if start_t == 0 {
                BlockAddress::unused()
            } else {
                BlockAddress::from_ts(geometry, start_t, start_s)?
            };
            let kind = directory_kind(type_code, raw, geometry, geos_active, start_block)?;
            (start_block, block_count_field, kind)
        };

        Ok(Some(DirectoryEntry { name, suffix, type_code, kind, start_block, block_count, locked, closed, datetime }))
    }
}

fn directory_kind(
    type_code: u8,
    raw: &[u8; ENTRY_SIZE],
    geometry: &crate::cbm::geometry::Geometry,
    geos_active: bool,
    start_block: BlockAddress,
) -> Result<DirectoryEntryKind, Error> {
    Ok(if type_code == 6 {
        DirectoryEntryKind::CmdNative
    } else if type_code == 4 {
        let ss_t = raw[0x15] as u16;
        let ss_s = raw[0x16] as u16;
        let side_sector_block = if ss_t == 0 {
            BlockAddress::unused()
        } else {
            BlockAddress::from_ts(geometry, ss_t, ss_s)?
        };
        DirectoryEntryKind::Rel(RelInfo {
            first_data_block: start_block,
            side_sector_block,
            record_length: raw[0x17],
        })
    } else if geos_active && (raw[0x15] != 0 || raw[0x16] != 0) {
        let info_t = raw[0x15] as u16;
        let info_s = raw[0x16] as u16;
        let info_block = BlockAddress::from_ts(geometry, info_t, info_s).ok();
        DirectoryEntryKind::Geos { info_block, vlir: raw[0x17] == 1, filetype: raw[0x18] }
    } else {
        DirectoryEntryKind::Regular
    })
}

/// Convert a partition directory entry's raw LBA/count fields into
/// (lba, block_count). CMD stores these doubled-and-offset relative to
/// its own 512-byte addressing; the `lba*2+1`/`count*2` factor below
/// matches the CMD FD/HD Series documentation but has not been
/// cross-checked against a real partitioned image; see DESIGN.md.
fn cmd_partition_units(raw: &[u8; ENTRY_SIZE]) -> (u32, u16) {
    let raw_lba = u32::from_le_bytes([raw[0x03], raw[0x04], raw[0x15], raw[0x16]]);
    let raw_count = u16::from_le_bytes([raw[0x1E], raw[0x1F]]);
    (raw_lba.saturating_mul(2).saturating_add(1), raw_count.saturating_mul(2))
}

/// Walks a directory's block chain, yielding each of its 8
/// entries-per-block in turn and following the chain to the next
/// block when a block is exhausted.
pub struct DirectoryEnumerator<'a> {
    image: &'a Image,
    settings: &'a Settings,
    current_block: Option<BlockAddress>,
    seen: crate::cbm::loop_detector::LoopDetector,
    entry_index: usize,
    geos_active: bool,
    dates_active: bool,
}

impl<'a> DirectoryEnumerator<'a> {
    /// Start enumerating the active frame's directory from its first
    /// directory block.
    pub fn new(image: &'a Image, settings: &'a Settings) -> Result<DirectoryEnumerator<'a>, Error> {
        let start = settings.first_directory_block;
        let mut seen = crate::cbm::loop_detector::LoopDetector::new(settings.geometry.max_lba);
        if !start.is_unused() {
            seen.mark(start.lba());
        }
        Ok(DirectoryEnumerator {
            image,
            settings,
            current_block: if start.is_unused() { None } else { Some(start) },
            seen,
            entry_index: 0,
            geos_active: settings.geos_border.is_some(),
            dates_active: matches!(
                settings.format,
                crate::cbm::geometry::Format::D1M
                    | crate::cbm::geometry::Format::D2M
                    | crate::cbm::geometry::Format::D4M
                    | crate::cbm::geometry::Format::Dnp
            ),
        })
    }

    fn advance_block(&mut self) -> Result<(), Error> {
        let block = match self.current_block {
            Some(b) => b,
            None => return Ok(()),
        };
        match block_accessor::read_link(self.image, self.settings, &block)? {
            Link::Last(_) => {
                self.current_block = None;
            }
            Link::Next(next) => {
                if self.seen.mark(next.lba()) == Some(true) {
                    return Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::Loop(format!(
                        "directory chain loops back to block {}",
                        next
                    )))));
                }
                self.current_block = Some(next);
            }
        }
        self.entry_index = 0;
        Ok(())
    }
}

impl<'a> Iterator for DirectoryEnumerator<'a> {
    type Item = Result<DirectoryEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let block = self.current_block?;
            let bytes = match self.image.block_bytes_in(self.settings, &block) {
                Ok(b) => b,
                Err(e) => return Some(Err(e)),
            };

            if self.entry_index >= ENTRIES_PER_BLOCK {
                if let Err(e) = self.advance_block() {
                    return Some(Err(e));
                }
                continue;
            }

            let offset = self.entry_index * ENTRY_SIZE;
            let mut raw = [0u8; ENTRY_SIZE];
            raw.copy_from_slice(&bytes[offset..offset + ENTRY_SIZE]);
            self.entry_index += 1;

            match DirectoryEntry::parse(
                &raw,
                &self.settings.geometry,
                self.geos_active,
                self.dates_active,
                &self.settings.petscii_config,
            ) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
