//! Walks a linked chain of blocks one step at a time, detecting loops
//! as it goes.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use crate::cbm::block_accessor::{self, Link};
use crate::cbm::block_address::BlockAddress;
use crate::cbm::image::{Image, Settings};
use crate::cbm::loop_detector::LoopDetector;
use crate::error::Error;

/// An in-progress walk over a block chain: the current block, whether
/// the walk has reached its last block or a loop, and the per-chain
/// loop detector that caught it.
pub struct Chain<'a> {
    image: &'a Image,
    settings: &'a Settings,
    current: BlockAddress,
    seen: LoopDetector,
    done: bool,
    is_loop: bool,
    last_used: u8,
}

impl<'a> Chain<'a> {
    /// Start walking a chain at `start`, within `settings`'s LBA
    /// space.
    pub fn start(image: &'a Image, settings: &'a Settings, start: BlockAddress) -> Result<Chain<'a>, Error> {
        let mut seen = LoopDetector::new(settings.geometry.max_lba);
        seen.mark(start.lba());
        let mut chain = Chain {
            image,
            settings,
            current: start,
            seen,
            done: false,
            is_loop: false,
            last_used: 0,
        };
        chain.check_current()?;
        Ok(chain)
    }

    fn check_current(&mut self) -> Result<(), Error> {
        match block_accessor::read_link(self.image, self.settings, &self.current)? {
            Link::Last(used) => {
                self.done = true;
                self.last_used = used;
            }
            Link::Next(_) => {}
        }
        Ok(())
    }

    /// The block this walk is currently positioned at.
    pub fn current(&self) -> BlockAddress {
        self.current
    }

    /// The payload bytes of the current block (everything after its
    /// link header).
    pub fn data(&self) -> Result<&'a [u8], Error> {
        block_accessor::payload(self.image, self.settings, &self.current)
    }

    /// True once the walk has reached the chain's last block, whether
    /// normally or because a loop was detected.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// True if the walk stopped because it detected a loop rather than
    /// reaching a genuine last block.
    pub fn is_loop(&self) -> bool {
        self.is_loop
    }

    /// Number of payload bytes used in the chain's last block (0 if
    /// still in progress, 1..=254 once done and not a loop).
    pub fn last_used(&self) -> u8 {
        self.last_used
    }

    /// The address the current block's link header points to, without
    /// advancing. Errors if already done.
    pub fn peek_next(&self) -> Result<BlockAddress, Error> {
        match block_accessor::read_link(self.image, self.settings, &self.current)? {
            Link::Next(addr) => Ok(addr),
            Link::Last(_) => Err(Error::new(crate::error::ErrorKind::Invalid(
                crate::error::InvalidErrorKind::Invalid("chain is already at its last block".to_string()),
            ))),
        }
    }

    /// Advance to the next block in the chain. No-op (returns Ok) if
    /// already done. Sets `is_loop` and stops if the next block was
    /// already visited by this walk.
    pub fn advance(&mut self) -> Result<(), Error> {
        if self.done {
            return Ok(());
        }
        let next = self.peek_next()?;
        match self.seen.mark(next.lba()) {
            Some(true) => {
                self.is_loop = true;
                self.done = true;
            }
            Some(false) => {
                self.current = next;
                self.check_current()?;
            }
            None => {
                return Err(Error::new(crate::error::ErrorKind::Invalid(
                    crate::error::InvalidErrorKind::BadAddress(format!(
                        "chain link points at out-of-range lba {}",
                        next.lba()
                    )),
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forbidden_bands::Configuration;
    use crate::cbm::geometry::{d64_geometry, Format};
    use crate::cbm::image::AddressingMode;

    fn test_settings() -> Settings {
        Settings {
            format: Format::D64,
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

    fn write_link(data: &mut [u8], settings: &Settings, at: BlockAddress, next_t: u8, next_s: u8) {
        let range = settings.byte_range(&at).unwrap();
        data[range.start] = next_t;
        data[range.start + 1] = next_s;
    }

    #[test]
    fn walks_two_block_chain_to_completion() {
        let settings = test_settings();
        let mut data = vec![0u8; settings.geometry.max_lba as usize * 256];
        let a = BlockAddress::from_ts(&settings.geometry, 1, 0).unwrap();
        let b = BlockAddress::from_ts(&settings.geometry, 1, 1).unwrap();
        write_link(&mut data, &settings, a, 1, 1);
        write_link(&mut data, &settings, b, 0, 100);
        let image = Image::from_parts(data, settings.clone());

        let mut chain = Chain::start(&image, &settings, a).unwrap();
        assert!(!chain.is_done());
        assert_eq!(chain.current(), a);
        chain.advance().unwrap();
        assert_eq!(chain.current(), b);
        assert!(chain.is_done());
        assert!(!chain.is_loop());
        assert_eq!(chain.last_used(), 100);
    }

    #[test]
    fn detects_self_loop() {
        let settings = test_settings();
        let mut data = vec![0u8; settings.geometry.max_lba as usize * 256];
        let a = BlockAddress::from_ts(&settings.geometry, 1, 0).unwrap();
        write_link(&mut data, &settings, a, 1, 0);
        let image = Image::from_parts(data, settings.clone());

        let mut chain = Chain::start(&image, &settings, a).unwrap();
        chain.advance().unwrap();
        assert!(chain.is_done());
        assert!(chain.is_loop());
    }
}
