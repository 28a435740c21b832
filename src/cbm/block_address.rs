//! The dual (track, sector) / linear-block-address representation of
//! a block position, and the operations that keep both forms in
//! lockstep.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use std::fmt::{Display, Formatter};

use crate::cbm::geometry::Geometry;
use crate::error::{Error, ErrorKind, InvalidErrorKind};

/// A block position, carrying both the (track, sector) and linear
/// block address (LBA) representation at once.  An address is either
/// valid (both forms describe the same block) or the unused sentinel
/// (`lba == 0`).
///
/// Track numbers are 1-based; sector numbers are 0-based; LBA is
/// 1-based, with 0 reserved to mean "no address" (the unused
/// sentinel).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockAddress {
    track: u16,
    sector: u16,
    lba: u32,
}

impl Display for BlockAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.lba == 0 {
            write!(f, "(unused)")
        } else {
            write!(f, "({}, {}) [lba {}]", self.track, self.sector, self.lba)
        }
    }
}

impl BlockAddress {
    /// The unused sentinel address.
    pub fn unused() -> BlockAddress {
        BlockAddress { track: 0, sector: 0, lba: 0 }
    }

    /// True if this is the unused sentinel (lba == 0).
    pub fn is_unused(&self) -> bool {
        self.lba == 0
    }

    /// Build a BlockAddress from (track, sector), failing if that
    /// pair is out of range for `geometry`.
    pub fn from_ts(geometry: &Geometry, track: u16, sector: u16) -> Result<BlockAddress, Error> {
        match geometry.ts_to_lba(track, sector) {
            Some(lba) => Ok(BlockAddress { track, sector, lba }),
            None => Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::BadAddress(
                format!("({}, {}) does not exist in {} geometry", track, sector, geometry.format),
            )))),
        }
    }

    /// Build a BlockAddress from a 1-based LBA, failing if `lba` is 0
    /// or exceeds the geometry's max_lba.
    pub fn from_lba(geometry: &Geometry, lba: u32) -> Result<BlockAddress, Error> {
        match geometry.lba_to_ts(lba) {
            Some((track, sector)) => Ok(BlockAddress { track, sector, lba }),
            None => Err(Error::new(ErrorKind::Invalid(InvalidErrorKind::BadAddress(
                format!("lba {} does not exist in {} geometry", lba, geometry.format),
            )))),
        }
    }

    /// The 1-based track of this address (0 if unused).
    pub fn track(&self) -> u16 {
        self.track
    }

    /// The 0-based sector of this address (0 if unused).
    pub fn sector(&self) -> u16 {
        self.sector
    }

    /// The 1-based LBA of this address (0 if unused).
    pub fn lba(&self) -> u32 {
        self.lba
    }

    /// Advance to the next block, image-wide: the next sector on the
    /// current track, or sector 0 of the next track when the current
    /// track is exhausted.  Fails at the last block of the image.
    pub fn advance(&self, geometry: &Geometry) -> Result<BlockAddress, Error> {
        if self.lba >= geometry.max_lba {
            return Err(Error::new(ErrorKind::Invalid(
                InvalidErrorKind::AddressOverflow("advance past last block of image".to_string()),
            )));
        }
        BlockAddress::from_lba(geometry, self.lba + 1)
    }

    /// Advance to the next sector on the same track.  Fails at the
    /// last sector of the track.
    pub fn advance_in_track(&self, geometry: &Geometry) -> Result<BlockAddress, Error> {
        let sectors = geometry.sectors_in_track(self.track).ok_or_else(|| {
            Error::new(ErrorKind::Invalid(InvalidErrorKind::BadAddress(format!(
                "track {} does not exist",
                self.track
            ))))
        })?;
        if self.sector + 1 >= sectors {
            return Err(Error::new(ErrorKind::Invalid(
                InvalidErrorKind::AddressOverflow("advance past last sector of track".to_string()),
            )));
        }
        BlockAddress::from_ts(geometry, self.track, self.sector + 1)
    }

    /// `result + adder - 1`, computed over LBA: used to translate a
    /// partition-relative address into its absolute LBA by adding the
    /// partition's first-block LBA. If either operand is the unused
    /// sentinel, returns the other operand unchanged (identity).
    pub fn add(&self, geometry: &Geometry, adder: &BlockAddress) -> Result<BlockAddress, Error> {
        if self.is_unused() {
            return Ok(*adder);
        }
        if adder.is_unused() {
            return Ok(*self);
        }
        let lba = self.lba + adder.lba - 1;
        BlockAddress::from_lba(geometry, lba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbm::geometry::d64_geometry;

    #[test]
    fn roundtrip_ts_then_lba_is_identity() {
        let g = d64_geometry();
        for t in 1..=g.max_track {
            for s in 0..g.sectors_in_track(t).unwrap() {
                let a = BlockAddress::from_ts(&g, t, s).unwrap();
                let b = BlockAddress::from_lba(&g, a.lba()).unwrap();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn advance_is_monotone_and_terminates_at_max_lba() {
        let g = d64_geometry();
        let mut addr = BlockAddress::from_ts(&g, 1, 0).unwrap();
        let mut count = 1u32;
        loop {
            assert_eq!(addr.lba(), count);
            match addr.advance(&g) {
                Ok(next) => {
                    addr = next;
                    count += 1;
                }
                Err(_) => break,
            }
        }
        assert_eq!(count, g.max_lba);
    }

    #[test]
    fn advance_in_track_fails_at_track_end() {
        let g = d64_geometry();
        let last = BlockAddress::from_ts(&g, 1, 20).unwrap();
        assert!(last.advance_in_track(&g).is_err());
        let first = BlockAddress::from_ts(&g, 1, 0).unwrap();
        assert!(first.advance_in_track(&g).is_ok());
    }

    #[test]
    fn unused_is_identity_for_add() {
        let g = d64_geometry();
        let a = BlockAddress::from_ts(&g, 5, 0).unwrap();
        let u = BlockAddress::unused();
        assert_eq!(a.add(&g, &u).unwrap(), a);
        assert_eq!(u.add(&g, &a).unwrap(), a);
    }

    #[test]
    fn add_combines_lba_minus_one() {
        let g = d64_geometry();
        let base = BlockAddress::from_lba(&g, 10).unwrap();
        let offset = BlockAddress::from_lba(&g, 5).unwrap();
        let combined = base.add(&g, &offset).unwrap();
        assert_eq!(combined.lba(), 14);
    }

    #[test]
    fn last_block_lba_equals_max_lba() {
        let g = d64_geometry();
        let last = BlockAddress::from_lba(&g, g.max_lba).unwrap();
        assert_eq!(last.lba(), g.max_lba);
    }
}
