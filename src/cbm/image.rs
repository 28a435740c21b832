//! The Image and Settings stack: the top-level owner of a disk
//! image's bytes and the currently-active logical volume (root image,
//! subdirectory, or partition).
#![warn(missing_docs)]
#![warn(unsafe_code)]
use log::{debug, info};

use crate::cbm::bam::BamSelector;
use crate::cbm::block_address::BlockAddress;
use crate::cbm::directory::DirectoryEntry;
use crate::cbm::formats::{self, adapter_for};
use crate::cbm::geometry::{Format, Geometry};
use crate::cbm::validator::DerivedFat;
use crate::config::Config;
use crate::error::{Error, ErrorKind, InvalidErrorKind};

/// How addresses within an active Settings frame map onto the raw
/// image buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressingMode {
    /// LBA 1 of this frame is a fixed byte offset into the raw
    /// buffer (CMD FD-style partitions).
    Global,
    /// LBA 1 of this frame is the start of a contiguous,
    /// track-aligned sub-range of the enclosing frame (1581-style
    /// subdirectories/partitions).
    Relative,
}

/// One frame of the Settings stack: the currently active logical
/// volume.  The root Image always has exactly one frame; chdir
/// pushes additional frames for subdirectories and partitions.
pub struct Settings {
    /// The format this frame is interpreted as.
    pub format: Format,
    /// A human-readable name for this frame's format.
    pub name: String,
    /// The geometry (track/sector zoning, block size) of this frame.
    pub geometry: Geometry,
    /// How this frame's addresses map onto the raw buffer.
    pub addressing: AddressingMode,
    /// Byte offset into the raw buffer corresponding to this frame's
    /// LBA 1.
    pub base_byte_offset: usize,
    /// Track(s) that hold directory blocks, used to skip
    /// directory-track blocks when totaling BAM free counts and to
    /// reject partitions that would cross the directory track.
    pub dir_tracks: Vec<u16>,
    /// Address of the first directory block.
    pub first_directory_block: BlockAddress,
    /// Address of the info/header block (BAM header on 1541-family
    /// disks, or the GEOS/disk-header block), if this format has one.
    pub info_block: Option<BlockAddress>,
    /// Byte offset of the disk name within the info block.
    pub diskname_offset: usize,
    /// BAM bitmap selectors for this frame.
    pub bam_selectors: Vec<BamSelector>,
    /// BAM free-block counter selectors, if this format stores
    /// counters separately from the bitmap.
    pub bam_counter_selectors: Vec<BamSelector>,
    /// Cached derived FAT from the last validation pass.
    pub derived_fat: Option<DerivedFat>,
    /// Address of the GEOS border block, if this disk identifies
    /// itself as GEOS-formatted.
    pub geos_border: Option<BlockAddress>,
    /// PETSCII decoding configuration, carried down from the Image's
    /// open-time [Config] so directory enumeration can decode names
    /// without threading a Config reference through every call.
    pub petscii_config: forbidden_bands::Config,
}

impl Clone for Settings {
    fn clone(&self) -> Self {
        Settings {
            format: self.format,
            name: self.name.clone(),
            geometry: self.geometry.clone(),
            addressing: self.addressing,
            base_byte_offset: self.base_byte_offset,
            dir_tracks: self.dir_tracks.clone(),
            first_directory_block: self.first_directory_block,
            info_block: self.info_block,
            diskname_offset: self.diskname_offset,
            bam_selectors: self.bam_selectors.clone(),
            bam_counter_selectors: self.bam_counter_selectors.clone(),
            derived_fat: self.derived_fat.clone(),
            geos_border: self.geos_border,
            petscii_config: crate::config::clone_forbidden_bands_config(&self.petscii_config),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("format", &self.format)
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .field("addressing", &self.addressing)
            .field("base_byte_offset", &self.base_byte_offset)
            .field("dir_tracks", &self.dir_tracks)
            .field("first_directory_block", &self.first_directory_block)
            .field("info_block", &self.info_block)
            .field("diskname_offset", &self.diskname_offset)
            .field("bam_selectors", &self.bam_selectors)
            .field("bam_counter_selectors", &self.bam_counter_selectors)
            .field("derived_fat", &self.derived_fat)
            .field("geos_border", &self.geos_border)
            // forbidden_bands::Config does not implement Debug; print
            // its public fields directly instead.
            .field("petscii_config.version", &self.petscii_config.version)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Resolve a local block address (in this frame's own LBA space)
    /// to a byte range in the raw image buffer.
    pub fn byte_range(&self, addr: &BlockAddress) -> Result<std::ops::Range<usize>, Error> {
        if addr.is_unused() {
            return Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::BadAddress(
                "cannot resolve the unused sentinel address".to_string(),
            ))));
        }
        let start = self.base_byte_offset + (addr.lba() as usize - 1) * self.geometry.bytes_per_block;
        let end = start + self.geometry.bytes_per_block;
        Ok(start..end)
    }
}

/// The owner of a disk image's raw bytes and the stack of active
/// logical volumes (root plus any pushed subdirectories/partitions).
pub struct Image {
    buffer: Vec<u8>,
    filename: Option<String>,
    error_map: Option<Vec<u8>>,
    settings_stack: Vec<Settings>,
}

impl Image {
    /// Open a disk image from raw bytes.  If `hint` is given it is
    /// used as the format instead of guessing from `data.len()`.
    pub fn open(
        data: Vec<u8>,
        filename: Option<String>,
        hint: Option<Format>,
        config: &Config,
    ) -> Result<Image, Error> {
        crate::init();

        let format = match hint {
            Some(f) => f,
            None => formats::guess_format(data.len()).ok_or_else(|| {
                Error::new(ErrorKind::NotFound(format!(
                    "no known disk format matches size {} bytes",
                    data.len()
                )))
            })?,
        };

        info!("Opening image as {}", format);

        let (data_len, error_map) = formats::split_error_map(format, &data, config)?;
        let data_region = data[..data_len].to_vec();

        let adapter = adapter_for(format);
        let total_blocks = (data_len / 256) as u32;
        let root = adapter.root_settings(total_blocks, config)?;

        let mut image = Image {
            buffer: data_region,
            filename,
            error_map,
            settings_stack: vec![root],
        };

        image.detect_geos_border()?;

        Ok(image)
    }

    /// Consume and drop the image, releasing every pushed
    /// subdirectory/partition frame along with the buffer.
    pub fn close(self) {
        debug!("Closing image with {} active settings frame(s)", self.settings_stack.len());
    }

    /// The raw image filename, if one was supplied at open time.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The raw per-block error map, one byte per block, if the image
    /// carried one.
    pub fn error_map(&self) -> Option<&[u8]> {
        self.error_map.as_deref()
    }

    /// The currently active Settings frame (top of stack).
    pub fn active(&self) -> &Settings {
        self.settings_stack.last().expect("settings stack is never empty")
    }

    /// Mutable access to the currently active Settings frame.
    pub fn active_mut(&mut self) -> &mut Settings {
        self.settings_stack.last_mut().expect("settings stack is never empty")
    }

    /// How many frames deep the Settings stack currently is; 1 means
    /// at the root.
    pub fn depth(&self) -> usize {
        self.settings_stack.len()
    }

    /// Validate the currently active frame, caching the derived FAT it
    /// builds onto that frame before returning the full report.
    pub fn validate(&mut self) -> Result<crate::cbm::validator::ValidationReport, Error> {
        let report = crate::cbm::validator::validate(self)?;
        self.active_mut().derived_fat = Some(report.derived_fat.clone());
        Ok(report)
    }

    /// Read the bytes of a block addressed in the currently active
    /// frame's LBA space.
    pub fn block_bytes(&self, addr: &BlockAddress) -> Result<&[u8], Error> {
        let range = self.active().byte_range(addr)?;
        self.buffer.get(range.clone()).ok_or_else(|| {
            Error::new(ErrorKind::Invalid(InvalidErrorKind::BadAddress(format!(
                "block range {:?} falls outside the raw image buffer (len {})",
                range,
                self.buffer.len()
            ))))
        })
    }

    /// Read the bytes of a block addressed within an arbitrary frame
    /// (used by the validator, which may need to inspect the
    /// enclosing frame while a child is active).
    pub fn block_bytes_in(&self, settings: &Settings, addr: &BlockAddress) -> Result<&[u8], Error> {
        let range = settings.byte_range(addr)?;
        self.buffer.get(range.clone()).ok_or_else(|| {
            Error::new(ErrorKind::Invalid(InvalidErrorKind::BadAddress(format!(
                "block range {:?} falls outside the raw image buffer (len {})",
                range,
                self.buffer.len()
            ))))
        })
    }

    /// Total length of the raw image data region (excluding any error
    /// map).
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if the image data region is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn detect_geos_border(&mut self) -> Result<(), Error> {
        let info_block = match self.active().info_block {
            Some(b) => b,
            None => return Ok(()),
        };
        let bytes = self.block_bytes(&info_block)?;
        const GEOS_SIGNATURE: &[u8] = b"GEOS format V1.";
        if bytes.len() >= 0xAD + GEOS_SIGNATURE.len() && &bytes[0xAD..0xAD + GEOS_SIGNATURE.len()] == GEOS_SIGNATURE {
            let border_track = bytes[0xAB] as u16;
            let border_sector = bytes[0xAC] as u16;
            let border = BlockAddress::from_ts(&self.active().geometry, border_track, border_sector)?;
            info!("Detected GEOS format, border block at {}", border);
            self.active_mut().geos_border = Some(border);
        }
        Ok(())
    }

    /// Change into a subdirectory or partition named by `entry`,
    /// pushing a new Settings frame.
    pub fn chdir(&mut self, entry: &DirectoryEntry) -> Result<(), Error> {
        let parent = self.active().clone();
        let adapter = adapter_for(parent.format);
        let child = adapter.chdir(self, &parent, entry)?;
        info!("chdir into {} at {}", child.format, entry.name);
        self.settings_stack.push(child);
        self.detect_geos_border()?;
        Ok(())
    }

    /// Pop the active Settings frame, returning to the enclosing
    /// volume.  Fails if called at the root.
    pub fn chdir_close(&mut self) -> Result<(), Error> {
        if self.settings_stack.len() <= 1 {
            return Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::Invalid(
                "cannot chdir_close the root settings frame".to_string(),
            ))));
        }
        self.settings_stack.pop();
        Ok(())
    }
}

#[cfg(test)]
impl Image {
    /// Build an Image directly from a buffer and a single Settings
    /// frame, bypassing format detection. Used by unit tests in
    /// sibling modules that need a minimal, controlled Image.
    pub(crate) fn from_parts(buffer: Vec<u8>, root: Settings) -> Image {
        Image { buffer, filename: None, error_map: None, settings_stack: vec![root] }
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
    fn open_rejects_unknown_size() {
        let data = vec![0u8; 12345];
        let err = Image::open(data, None, None, &test_config());
        assert!(err.is_err());
    }

    #[test]
    fn open_guesses_d64_from_size() {
        let data = vec![0u8; 174848];
        let image = Image::open(data, None, None, &test_config()).unwrap();
        assert_eq!(image.active().format, Format::D64);
        assert_eq!(image.active().geometry.max_lba, 683);
    }

    #[test]
    fn open_with_error_map_strips_trailing_bytes() {
        let data = vec![0u8; 175531];
        let image = Image::open(data, None, None, &test_config()).unwrap();
        assert_eq!(image.len(), 174848);
        assert_eq!(image.error_map().unwrap().len(), 683);
    }

    #[test]
    fn chdir_close_at_root_fails() {
        let data = vec![0u8; 174848];
        let mut image = Image::open(data, None, None, &test_config()).unwrap();
        assert!(image.chdir_close().is_err());
    }
}
