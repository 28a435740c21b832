//! Per-format disk geometry: track counts, sectors-per-track zoning,
//! and block size.  Pure data, no parsing.
//!
//! Most of the zone tables come from the Commodore 1541/1571/8050/8250
//! and CMD FD/HD disk drive technical references; see the individual
//! format adapters in [crate::cbm::formats] for where each geometry is
//! wired up to BAM selectors and directory layout.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use std::fmt::{Display, Formatter};

/// The disk image formats this crate recognizes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    /// Commodore 2040/3040/4040, 35 tracks, 20 sectors on track 18.
    D40,
    /// Commodore 1541, 35 tracks, 19 sectors on track 18.
    D64,
    /// A 40-track D64 variant (Speeddos/Dolphin/Prologic), only
    /// selected via an explicit hint.
    D64_40,
    /// A 42-track D64 variant, only selected via an explicit hint.
    D64_42,
    /// Commodore 1571, 70 tracks (two mirrored 1541-style halves).
    D71,
    /// Commodore 8050, 77 tracks.
    D80,
    /// Commodore 8250/SFD-1001, 154 tracks (two D80-style halves).
    D82,
    /// Commodore 1581, 80 tracks, 40 sectors per track.
    D81,
    /// CMD FD native 1MB partition format.
    D1M,
    /// CMD FD native 2MB partition format.
    D2M,
    /// CMD FD native 4MB partition format.
    D4M,
    /// CMD hard-drive native partition format (DNP), configurable
    /// size up to 255 tracks of 256 sectors.
    Dnp,
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Format::D40 => "D40",
            Format::D64 => "D64",
            Format::D64_40 => "D64 (40 track)",
            Format::D64_42 => "D64 (42 track)",
            Format::D71 => "D71",
            Format::D80 => "D80",
            Format::D82 => "D82",
            Format::D81 => "D81",
            Format::D1M => "D1M",
            Format::D2M => "D2M",
            Format::D4M => "D4M",
            Format::Dnp => "DNP",
        };
        write!(f, "{}", s)
    }
}

/// A contiguous run of tracks sharing the same sector count, used to
/// express the zoned geometry of the 1541/1571/8050/8250 family.
#[derive(Clone, Copy, Debug)]
pub struct TrackZone {
    /// First track in this zone (1-based, inclusive).
    pub first_track: u16,
    /// Last track in this zone (1-based, inclusive).
    pub last_track: u16,
    /// Sectors per track within this zone.
    pub sectors: u16,
}

/// The geometry of an active disk image or partition: track count,
/// sector zoning, and block size, plus a precomputed LBA-at-start-of
/// track table for O(1) track/sector <-> LBA conversion.
#[derive(Clone, Debug)]
pub struct Geometry {
    /// The format this geometry describes.
    pub format: Format,
    /// Highest valid track number (1-based).
    pub max_track: u16,
    /// Bytes per block; always 256 in the supported format set.
    pub bytes_per_block: usize,
    /// Zoned sector-per-track table, ascending by track.
    zones: Vec<TrackZone>,
    /// track_lba_start[t] is the LBA of (t, 0); index 0 is unused.
    track_lba_start: Vec<u32>,
    /// Total number of blocks (== max valid LBA).
    pub max_lba: u32,
}

impl Geometry {
    /// Build a Geometry from a zone table, precomputing the
    /// track-to-LBA start table.
    pub fn new(format: Format, max_track: u16, bytes_per_block: usize, zones: Vec<TrackZone>) -> Geometry {
        let mut track_lba_start = vec![0u32; (max_track + 1) as usize];
        let mut lba = 1u32;
        for track in 1..=max_track {
            track_lba_start[track as usize] = lba;
            lba += Geometry::zone_sectors(&zones, track) as u32;
        }
        let max_lba = lba - 1;

        Geometry {
            format,
            max_track,
            bytes_per_block,
            zones,
            track_lba_start,
            max_lba,
        }
    }

    /// Build a Geometry for a format with a constant number of
    /// sectors per track (D81, D1M/D2M/D4M, DNP).
    pub fn new_fixed(format: Format, max_track: u16, max_sector: u16, bytes_per_block: usize) -> Geometry {
        Geometry::new(
            format,
            max_track,
            bytes_per_block,
            vec![TrackZone {
                first_track: 1,
                last_track: max_track,
                sectors: max_sector,
            }],
        )
    }

    fn zone_sectors(zones: &[TrackZone], track: u16) -> u16 {
        zones
            .iter()
            .find(|z| track >= z.first_track && track <= z.last_track)
            .map(|z| z.sectors)
            .unwrap_or(0)
    }

    /// Number of sectors on a given track, or None if the track is
    /// out of range for this geometry.
    pub fn sectors_in_track(&self, track: u16) -> Option<u16> {
        if track == 0 || track > self.max_track {
            return None;
        }
        let s = Geometry::zone_sectors(&self.zones, track);
        if s == 0 {
            None
        } else {
            Some(s)
        }
    }

    /// Convert (track, sector) to a 1-based LBA.  Returns None if the
    /// address is out of range for this geometry.
    pub fn ts_to_lba(&self, track: u16, sector: u16) -> Option<u32> {
        let sectors = self.sectors_in_track(track)?;
        if sector >= sectors {
            return None;
        }
        Some(self.track_lba_start[track as usize] + sector as u32)
    }

    /// Convert a 1-based LBA to (track, sector).  Returns None if lba
    /// is 0 or exceeds max_lba.
    pub fn lba_to_ts(&self, lba: u32) -> Option<(u16, u16)> {
        if lba == 0 || lba > self.max_lba {
            return None;
        }
        // track_lba_start is ascending; find the last track whose
        // start is <= lba.
        let mut track = 1u16;
        for t in 1..=self.max_track {
            if self.track_lba_start[t as usize] <= lba {
                track = t;
            } else {
                break;
            }
        }
        let sector = (lba - self.track_lba_start[track as usize]) as u16;
        Some((track, sector))
    }
}

/// Specifications for a Commodore 1541 single-drive floppy disk, from
/// the Commodore 1541 Disk Drive User's Guide, September 1982.
pub fn d64_geometry() -> Geometry {
    Geometry::new(
        Format::D64,
        35,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 17, sectors: 21 },
            TrackZone { first_track: 18, last_track: 24, sectors: 19 },
            TrackZone { first_track: 25, last_track: 30, sectors: 18 },
            TrackZone { first_track: 31, last_track: 35, sectors: 17 },
        ],
    )
}

/// Geometry for a 40-track D64 variant (Speeddos/Dolphin/Prologic);
/// tracks 36..40 continue the outermost 17-sector zone.
pub fn d64_40_geometry() -> Geometry {
    Geometry::new(
        Format::D64_40,
        40,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 17, sectors: 21 },
            TrackZone { first_track: 18, last_track: 24, sectors: 19 },
            TrackZone { first_track: 25, last_track: 30, sectors: 18 },
            TrackZone { first_track: 31, last_track: 40, sectors: 17 },
        ],
    )
}

/// Geometry for a 42-track D64 variant.
pub fn d64_42_geometry() -> Geometry {
    Geometry::new(
        Format::D64_42,
        42,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 17, sectors: 21 },
            TrackZone { first_track: 18, last_track: 24, sectors: 19 },
            TrackZone { first_track: 25, last_track: 30, sectors: 18 },
            TrackZone { first_track: 31, last_track: 42, sectors: 17 },
        ],
    )
}

/// Geometry for the Commodore 2040/3040/4040 (D40): track 18 has 20
/// sectors instead of D64's 19.
pub fn d40_geometry() -> Geometry {
    Geometry::new(
        Format::D40,
        35,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 17, sectors: 21 },
            TrackZone { first_track: 18, last_track: 24, sectors: 20 },
            TrackZone { first_track: 25, last_track: 30, sectors: 18 },
            TrackZone { first_track: 31, last_track: 35, sectors: 17 },
        ],
    )
}

/// Geometry for the Commodore 1571 (D71): tracks 1..35 exactly mirror
/// the D64 zone table, tracks 36..70 repeat it for the second side.
pub fn d71_geometry() -> Geometry {
    Geometry::new(
        Format::D71,
        70,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 17, sectors: 21 },
            TrackZone { first_track: 18, last_track: 24, sectors: 19 },
            TrackZone { first_track: 25, last_track: 30, sectors: 18 },
            TrackZone { first_track: 31, last_track: 35, sectors: 17 },
            TrackZone { first_track: 36, last_track: 52, sectors: 21 },
            TrackZone { first_track: 53, last_track: 59, sectors: 19 },
            TrackZone { first_track: 60, last_track: 65, sectors: 18 },
            TrackZone { first_track: 66, last_track: 70, sectors: 17 },
        ],
    )
}

/// Geometry for the Commodore 8050 (D80): 77 tracks, four zones.
pub fn d80_geometry() -> Geometry {
    Geometry::new(
        Format::D80,
        77,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 39, sectors: 29 },
            TrackZone { first_track: 40, last_track: 53, sectors: 27 },
            TrackZone { first_track: 54, last_track: 64, sectors: 25 },
            TrackZone { first_track: 65, last_track: 77, sectors: 23 },
        ],
    )
}

/// Geometry for the Commodore 8250/SFD-1001 (D82): 154 tracks, the
/// D80 zone table repeated for the second side.
pub fn d82_geometry() -> Geometry {
    Geometry::new(
        Format::D82,
        154,
        256,
        vec![
            TrackZone { first_track: 1, last_track: 39, sectors: 29 },
            TrackZone { first_track: 40, last_track: 53, sectors: 27 },
            TrackZone { first_track: 54, last_track: 64, sectors: 25 },
            TrackZone { first_track: 65, last_track: 77, sectors: 23 },
            TrackZone { first_track: 78, last_track: 116, sectors: 29 },
            TrackZone { first_track: 117, last_track: 130, sectors: 27 },
            TrackZone { first_track: 131, last_track: 141, sectors: 25 },
            TrackZone { first_track: 142, last_track: 154, sectors: 23 },
        ],
    )
}

/// Geometry for the Commodore 1581 (D81): 80 tracks, 40 sectors each.
pub fn d81_geometry() -> Geometry {
    Geometry::new_fixed(Format::D81, 80, 40, 256)
}

/// Geometry for a CMD native partition (D1M/D2M/D4M): these formats
/// are block-addressed rather than physically zoned, so this crate
/// treats them as a single zone of 256 synthetic sectors per track,
/// choosing `max_track` from the total block count. Reference sources
/// disagree on the exact D2M/D4M block totals, so the documented
/// nominal sizes are treated as authoritative rather than either
/// conflicting figure; see DESIGN.md.
pub fn cmd_native_geometry(format: Format, total_blocks: u32) -> Geometry {
    let max_sector = 256u16;
    let max_track = total_blocks.div_ceil(max_sector as u32) as u16;
    Geometry::new_fixed(format, max_track, max_sector, 256)
}

/// Geometry for a CMD hard-drive native partition (DNP).  DNP
/// partitions are created at a user-chosen size, so geometry is
/// derived from the image's actual block count at open time rather
/// than a fixed table.
pub fn dnp_geometry(total_blocks: u32) -> Geometry {
    cmd_native_geometry(Format::Dnp, total_blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn d64_geometry_reports_correct_track18_and_lba_bounds() {
        let g = d64_geometry();
        assert_eq!(g.max_track, 35);
        assert_eq!(g.sectors_in_track(18), Some(19));
        assert_eq!(g.max_lba, 683);
        assert_eq!(g.ts_to_lba(17, 20), Some(357));
    }

    #[test]
    fn d40_geometry_reports_wider_track18() {
        let g = d40_geometry();
        assert_eq!(g.max_track, 35);
        assert_eq!(g.sectors_in_track(18), Some(20));
        assert_eq!(g.max_lba, 690);
    }

    #[test]
    fn d71_mirrors_d64_zones_for_second_side() {
        let g = d71_geometry();
        assert_eq!(g.max_track, 70);
        for t in 1..=35u16 {
            assert_eq!(g.sectors_in_track(t), g.sectors_in_track(t + 35));
        }
    }

    #[test]
    fn per_track_sum_equals_max_lba() {
        for g in [
            d64_geometry(),
            d40_geometry(),
            d71_geometry(),
            d80_geometry(),
            d82_geometry(),
            d81_geometry(),
        ] {
            let sum: u32 = (1..=g.max_track)
                .map(|t| g.sectors_in_track(t).unwrap() as u32)
                .sum();
            assert_eq!(sum, g.max_lba, "format {:?}", g.format);
        }
    }

    #[test]
    fn ts_and_lba_roundtrip() {
        let g = d64_geometry();
        for lba in 1..=g.max_lba {
            let (t, s) = g.lba_to_ts(lba).unwrap();
            assert_eq!(g.ts_to_lba(t, s), Some(lba));
        }
    }

    #[test]
    fn lba_1_is_track_1_sector_0() {
        let g = d64_geometry();
        assert_eq!(g.lba_to_ts(1), Some((1, 0)));
        assert_eq!(g.ts_to_lba(1, 0), Some(1));
    }

    #[test]
    fn out_of_range_addresses_fail() {
        let g = d64_geometry();
        assert_eq!(g.lba_to_ts(0), None);
        assert_eq!(g.lba_to_ts(g.max_lba + 1), None);
        assert_eq!(g.ts_to_lba(1, 21), None);
        assert_eq!(g.ts_to_lba(36, 0), None);
    }

    #[test]
    fn d81_has_819200_bytes() {
        let g = d81_geometry();
        assert_eq!(g.max_lba as usize * g.bytes_per_block, 819200);
    }

    #[test]
    fn d80_has_533248_bytes() {
        let g = d80_geometry();
        assert_eq!(g.max_lba as usize * g.bytes_per_block, 533248);
    }

    #[test]
    fn d82_has_1066496_bytes() {
        let g = d82_geometry();
        assert_eq!(g.max_lba as usize * g.bytes_per_block, 1066496);
    }
}
