//! The Validator: builds a derived allocation table (FAT) by walking
//! every reachable block from the directory, info block, BAM, GEOS
//! border, and every file's chain, then cross-checks it against the
//! on-disk BAM.
#![warn(missing_docs)]
#![warn(unsafe_code)]
use log::{debug, warn};

use crate::cbm::bam::{self, check_track_consistency, select_for_track, FreeState, TrackBam};
use crate::cbm::block_address::BlockAddress;
use crate::cbm::chain::Chain;
use crate::cbm::directory::{self, DirectoryEntryKind, RelInfo};
use crate::cbm::formats::adapter_for;
use crate::cbm::image::{Image, Settings};
use crate::error::Error;

/// A single LBA's place in the derived allocation table: either
/// unclaimed, the last block of some chain, or pointing at the next
/// block in its chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FatEntry {
    /// Not yet claimed by any chain.
    Unused,
    /// The final block of a chain.
    LastBlock,
    /// Points at the next LBA in its chain.
    Next(u32),
}

/// An LBA-indexed table of derived allocation, built fresh by the
/// validator.  Index 0 is unused (matches the unused sentinel LBA).
#[derive(Clone, Debug)]
pub struct DerivedFat {
    entries: Vec<FatEntry>,
}

impl DerivedFat {
    /// Create a new, empty derived FAT sized for `max_lba`.
    pub fn new(max_lba: u32) -> DerivedFat {
        DerivedFat {
            entries: vec![FatEntry::Unused; (max_lba + 1) as usize],
        }
    }

    /// The entry for a given LBA.
    pub fn get(&self, lba: u32) -> FatEntry {
        self.entries.get(lba as usize).copied().unwrap_or(FatEntry::Unused)
    }

    /// True if `lba` has already been claimed by some chain.
    pub fn is_used(&self, lba: u32) -> bool {
        !matches!(self.get(lba), FatEntry::Unused)
    }

    fn set(&mut self, lba: u32, entry: FatEntry) {
        if let Some(slot) = self.entries.get_mut(lba as usize) {
            *slot = entry;
        }
    }

    /// Force `lba` to be considered used, without going through a
    /// chain walk. Used by per-format BAM fixups to mark fixed blocks
    /// (boot blocks, reserved headers) that no directory entry's chain
    /// ever visits. A no-op if `lba` is already claimed.
    pub fn force_used(&mut self, lba: u32) {
        if let Some(slot) = self.entries.get_mut(lba as usize) {
            if matches!(slot, FatEntry::Unused) {
                *slot = FatEntry::LastBlock;
            }
        }
    }
}

/// A single structural or BAM inconsistency found during validation.
/// Validation never aborts on these; they accumulate into the
/// returned report.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    /// A human-readable description of the problem.
    pub message: String,
}

impl ValidationIssue {
    fn new(message: impl Into<String>) -> ValidationIssue {
        ValidationIssue { message: message.into() }
    }
}

/// The result of a validation pass: the derived FAT it built, and the
/// list of issues it found.  An empty `issues` means the image is
/// internally consistent.
pub struct ValidationReport {
    /// The derived allocation table built while walking the image.
    pub derived_fat: DerivedFat,
    /// Every structural or BAM inconsistency found.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True if no inconsistencies were found.
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

struct Walker<'a> {
    image: &'a Image,
    fat: DerivedFat,
    issues: Vec<ValidationIssue>,
    global_seen: crate::cbm::loop_detector::LoopDetector,
}

impl<'a> Walker<'a> {
    fn mark(&mut self, lba: u32, entry: FatEntry, context: &str) {
        match self.global_seen.mark(lba) {
            Some(true) => {
                self.issues.push(ValidationIssue::new(format!(
                    "block {} already marked, shared between chains ({})",
                    lba, context
                )));
            }
            Some(false) => {
                self.fat.set(lba, entry);
            }
            None => {
                self.issues.push(ValidationIssue::new(format!(
                    "block {} is out of range ({})",
                    lba, context
                )));
            }
        }
    }

    /// Mark every block in a simple chain starting at `start`, linking
    /// each visited block to its successor in the derived FAT. Relies
    /// on [Chain]'s own loop detector for in-chain revisits; this
    /// walker's `mark` catches sharing across chains.
    fn walk_chain(&mut self, settings: &Settings, start: BlockAddress, context: &str) -> Result<u32, Error> {
        let mut chain = Chain::start(self.image, settings, start)?;
        let mut count = 0u32;

        loop {
            count += 1;
            let current_lba = chain.current().lba();

            if chain.is_done() {
                if chain.is_loop() {
                    self.issues.push(ValidationIssue::new(format!(
                        "found loop in chain ({}) at block {}",
                        context, current_lba
                    )));
                }
                self.mark(current_lba, FatEntry::LastBlock, context);
                break;
            }

            let next = chain.peek_next()?;
            self.mark(current_lba, FatEntry::Next(next.lba()), context);
            chain.advance()?;
        }

        Ok(count)
    }

    fn walk_partition_entry(&mut self, start: u32, block_count: u32, context: &str) {
        for i in 0..block_count {
            let lba = start + i;
            let entry = if i + 1 == block_count {
                FatEntry::LastBlock
            } else {
                FatEntry::Next(lba + 1)
            };
            self.mark(lba, entry, context);
        }
    }

    fn walk_vlir(&mut self, settings: &Settings, start: BlockAddress) -> Result<(), Error> {
        self.mark(start.lba(), FatEntry::LastBlock, "GEOS VLIR record map");
        let bytes = self.image.block_bytes_in(settings, &start)?;
        let pairs = &bytes[2..256];
        let mut terminated = false;
        for pair in pairs.chunks(2) {
            let (t, s) = (pair[0], pair[1]);
            if t == 0 && s == 0 {
                terminated = true;
                continue;
            }
            if terminated {
                self.issues.push(ValidationIssue::new(
                    "GEOS VLIR record map has non-zero data after terminator".to_string(),
                ));
                continue;
            }
            if t == 0 && s == 0xFF {
                // record absent, skip
                continue;
            }
            if let Ok(addr) = BlockAddress::from_ts(&settings.geometry, t as u16, s as u16) {
                self.walk_chain(settings, addr, "GEOS VLIR record")?;
            } else {
                self.issues.push(ValidationIssue::new(format!(
                    "GEOS VLIR record map points at invalid block ({}, {})",
                    t, s
                )));
            }
        }
        Ok(())
    }

    fn walk_rel(&mut self, settings: &Settings, rel: &RelInfo) -> Result<u32, Error> {
        let mut block_count = self.walk_chain(settings, rel.first_data_block, "REL data chain")?;

        let adapter = adapter_for(settings.format);
        let side_sector_root = rel.side_sector_block;
        if side_sector_root.is_unused() {
            return Ok(block_count);
        }

        let first_side_sector = if adapter.has_super_sidesector() {
            let bytes = self.image.block_bytes_in(settings, &side_sector_root)?;
            let link_t = bytes[0x00];
            let link_s = bytes[0x01];
            let group0_t = bytes[0x03];
            let group0_s = bytes[0x04];
            if bytes[0x02] != 0xFE || link_t != group0_t || link_s != group0_s {
                self.issues.push(ValidationIssue::new(
                    "super side sector integrity check failed".to_string(),
                ));
            }

            // Group slots run from offset 0x05 to the end of the
            // block, each a (track, sector) pointer to a group's first
            // side sector; once a (0, 0) slot appears, every byte
            // after it must also be zero.
            let group_table = &bytes[0x05..];
            let last_populated =
                group_table.chunks(2).rposition(|pair| pair.len() == 2 && (pair[0] != 0 || pair[1] != 0));
            let trailing_start = match last_populated {
                Some(idx) => 0x05 + (idx + 1) * 2,
                None => 0x05,
            };
            if bytes[trailing_start..].iter().any(|&b| b != 0) {
                self.issues.push(ValidationIssue::new(
                    "super side sector has non-zero bytes after its last populated group slot".to_string(),
                ));
            }

            self.mark(side_sector_root.lba(), FatEntry::LastBlock, "REL super side sector");
            block_count += 1;
            BlockAddress::from_ts(&settings.geometry, group0_t as u16, group0_s as u16).ok()
        } else {
            Some(side_sector_root)
        };

        if let Some(first) = first_side_sector {
            let mut data_chain = Chain::start(self.image, settings, rel.first_data_block)?;
            block_count += self.walk_side_sector_group(settings, first, rel.record_length, &mut data_chain)?;
        }

        Ok(block_count)
    }

    fn walk_side_sector_group(
        &mut self,
        settings: &Settings,
        group_start: BlockAddress,
        record_length: u8,
        data_chain: &mut Chain<'_>,
    ) -> Result<u32, Error> {
        let mut count = 0u32;
        let mut next_group = Some(group_start);
        let mut member_index = 0usize;
        while let Some(group) = next_group {
            let bytes = self.image.block_bytes_in(settings, &group)?.to_vec();
            self.mark(group.lba(), FatEntry::LastBlock, "REL side sector");
            count += 1;

            if bytes[0x03] != record_length {
                self.issues.push(ValidationIssue::new(format!(
                    "side sector record length {} does not match directory record length {}",
                    bytes[0x03], record_length
                )));
            }

            // Every side sector in a group of six repeats all six
            // members' addresses at 0x04..0x0F; its own address must
            // appear at its own slot.
            let member_offset = 0x04 + 2 * member_index;
            let member_t = bytes[member_offset];
            let member_s = bytes[member_offset + 1];
            if member_t as u16 != group.track() || member_s as u16 != group.sector() {
                self.issues.push(ValidationIssue::new(format!(
                    "side sector {} does not find its own address at group-member slot {} (found ({}, {}))",
                    group, member_index, member_t, member_s
                )));
            }

            for pair in bytes[0x10..0x100].chunks(2) {
                let (t, s) = (pair[0], pair[1]);
                if t == 0 && s == 0 {
                    if !data_chain.is_done() {
                        self.issues.push(ValidationIssue::new(
                            "side sector terminated before file chain did".to_string(),
                        ));
                    }
                    break;
                }
                let expected = data_chain.current();
                if expected.track() != t as u16 || expected.sector() != s as u16 {
                    self.issues.push(ValidationIssue::new(format!(
                        "side sector entry ({}, {}) does not match file chain position {}",
                        t, s, expected
                    )));
                }
                if !data_chain.is_done() {
                    let _ = data_chain.advance();
                }
            }

            let next_t = bytes[0x00];
            let next_s = bytes[0x01];
            next_group = if next_t == 0 {
                None
            } else {
                BlockAddress::from_ts(&settings.geometry, next_t as u16, next_s as u16).ok()
            };
            member_index = (member_index + 1) % 6;
        }
        Ok(count)
    }
}

/// Build a derived FAT from the directory and file chains of the
/// currently active Settings frame, then cross-check it against the
/// on-disk BAM.  Never aborts on inconsistencies; they accumulate in
/// the returned report.
pub fn validate(image: &Image) -> Result<ValidationReport, Error> {
    let settings = image.active();
    let mut walker = Walker {
        image,
        fat: DerivedFat::new(settings.geometry.max_lba),
        issues: Vec::new(),
        global_seen: crate::cbm::loop_detector::LoopDetector::new(settings.geometry.max_lba),
    };

    if let Some(info) = settings.info_block {
        if settings.bam_selectors.iter().all(|s| {
            BlockAddress::from_ts(&settings.geometry, s.block_track, s.block_sector)
                .map(|b| b.lba() != info.lba())
                .unwrap_or(true)
        }) {
            walker.walk_chain(settings, info, "info block")?;
        } else {
            walker.mark(info.lba(), FatEntry::LastBlock, "info block (shared with BAM)");
        }
    }

    let mut bam_blocks = std::collections::BTreeSet::new();
    for selector in settings.bam_selectors.iter().chain(settings.bam_counter_selectors.iter()) {
        bam_blocks.insert((selector.block_track, selector.block_sector));
    }
    for (t, s) in bam_blocks {
        if let Ok(addr) = BlockAddress::from_ts(&settings.geometry, t, s) {
            if settings.info_block.map(|i| i.lba()) != Some(addr.lba()) {
                walker.mark(addr.lba(), FatEntry::LastBlock, "BAM block");
            }
        }
    }

    if let Some(border) = settings.geos_border {
        walker.walk_chain(settings, border, "GEOS border")?;
    }

    let mut block_count_mismatches = Vec::new();
    let enumerator = directory::DirectoryEnumerator::new(image, settings)?;
    for entry in enumerator {
        let entry = entry?;
        if entry.is_deleted() {
            continue;
        }

        let actual_blocks: Option<u32> = match &entry.kind {
            DirectoryEntryKind::Partition { start_block, block_count } => {
                walker.walk_partition_entry(start_block.lba(), *block_count as u32, "partition entry");
                Some(*block_count as u32)
            }
            DirectoryEntryKind::CmdNative => {
                walker.issues.push(ValidationIssue::new(format!(
                    "{}: CMD-native file content validation is not yet implemented",
                    entry.name
                )));
                None
            }
            DirectoryEntryKind::Rel(rel) => Some(if entry.start_block.is_unused() {
                0
            } else {
                walker.walk_rel(settings, rel)?
            }),
            DirectoryEntryKind::Geos { info_block, vlir, .. } => {
                let mut n = 0u32;
                if *vlir {
                    walker.walk_vlir(settings, entry.start_block)?;
                    n += 1;
                } else {
                    n += walker.walk_chain(settings, entry.start_block, "GEOS file chain")?;
                }
                if let Some(info) = info_block {
                    walker.mark(info.lba(), FatEntry::LastBlock, "GEOS info block");
                    n += 1;
                }
                Some(n)
            }
            DirectoryEntryKind::Regular => Some(if entry.start_block.is_unused() {
                0
            } else {
                walker.walk_chain(settings, entry.start_block, "file chain")?
            }),
        };

        if !matches!(entry.kind, DirectoryEntryKind::Partition { .. } | DirectoryEntryKind::CmdNative)
            && actual_blocks != Some(entry.block_count as u32)
        {
            let actual_blocks = actual_blocks.expect("non-partition, non-CmdNative entries always produce a count");
            block_count_mismatches.push(format!(
                "{}: declared {} blocks, chain has {}",
                entry.name, entry.block_count, actual_blocks
            ));
        }
    }
    for m in block_count_mismatches {
        walker.issues.push(ValidationIssue::new(m));
    }

    let adapter = adapter_for(settings.format);
    adapter.bam_post_fixup(&mut walker.fat, image, settings, &mut walker.issues);

    cross_check_bam(image, settings, &walker.fat, &mut walker.issues);

    debug_fat(&walker.fat);
    for issue in &walker.issues {
        log_issue(issue);
    }

    Ok(ValidationReport { derived_fat: walker.fat, issues: walker.issues })
}

fn cross_check_bam(image: &Image, settings: &Settings, fat: &DerivedFat, issues: &mut Vec<ValidationIssue>) {
    for track in 1..=settings.geometry.max_track {
        let sectors = match settings.geometry.sectors_in_track(track) {
            Some(s) => s,
            None => continue,
        };

        let track_bam = match decode_track_bam(image, settings, track) {
            Some(t) => t,
            None => continue,
        };

        for issue in check_track_consistency(track, sectors, &track_bam) {
            issues.push(ValidationIssue::new(issue));
        }

        for sector in 0..sectors {
            let addr = match BlockAddress::from_ts(&settings.geometry, track, sector) {
                Ok(a) => a,
                Err(_) => continue,
            };
            let derived_used = fat.is_used(addr.lba());
            let bam_used = !bam::bit_is_free(&track_bam.bitmap, sector);

            if derived_used && !bam_used {
                issues.push(ValidationIssue::new(format!(
                    "block {} is used by a chain but free in the BAM",
                    addr
                )));
            } else if !derived_used && bam_used && !settings.dir_tracks.contains(&track) {
                issues.push(ValidationIssue::new(format!(
                    "block {} is marked used in the BAM but not reachable from any chain",
                    addr
                )));
            }
        }
    }
}

fn decode_track_bam(image: &Image, settings: &Settings, track: u16) -> Option<TrackBam> {
    let selector = select_for_track(&settings.bam_selectors, track)?;
    let block = BlockAddress::from_ts(&settings.geometry, selector.block_track, selector.block_sector).ok()?;
    let bytes = image.block_bytes_in(settings, &block).ok()?;
    let offset = selector.offset_for_track(track);
    let raw = bytes.get(offset..offset + selector.bitmap_bytes)?;
    let bitmap = bam::decode_bitmap(selector, raw);
    let popcount = (0..settings.geometry.sectors_in_track(track).unwrap_or(0))
        .filter(|&s| bam::bit_is_free(&bitmap, s))
        .count() as u32;

    let stored_counter = select_for_track(&settings.bam_counter_selectors, track).and_then(|counter_sel| {
        let counter_block =
            BlockAddress::from_ts(&settings.geometry, counter_sel.block_track, counter_sel.block_sector).ok()?;
        let counter_bytes = image.block_bytes_in(settings, &counter_block).ok()?;
        counter_bytes.get(counter_sel.offset_for_track(track)).copied()
    });

    Some(TrackBam { bitmap, stored_counter, popcount })
}

/// Total free blocks across the active frame, summing each track's
/// BAM counter (or bitmap popcount if no counter selector exists for
/// that track) and skipping directory tracks.
pub fn free_block_total(image: &Image, settings: &Settings) -> u32 {
    let mut total = 0u32;
    for track in 1..=settings.geometry.max_track {
        if settings.dir_tracks.contains(&track) {
            continue;
        }
        if let Some(track_bam) = decode_track_bam(image, settings, track) {
            total += track_bam.stored_counter.map(|c| c as u32).unwrap_or(track_bam.popcount);
        }
    }
    total
}

/// The free/used/really-free state of a single block, as reported by
/// the BAM engine's free-state enumeration.
pub fn block_state(image: &Image, settings: &Settings, addr: &BlockAddress) -> FreeState {
    if addr.is_unused() {
        return FreeState::DoesNotExist;
    }
    let track_bam = match decode_track_bam(image, settings, addr.track()) {
        Some(t) => t,
        None => return FreeState::Unknown,
    };
    if !bam::bit_is_free(&track_bam.bitmap, addr.sector()) {
        return FreeState::Used;
    }
    match image.block_bytes_in(settings, addr) {
        Ok(bytes) if bam::is_freshly_formatted_pattern(bytes) => FreeState::ReallyFree,
        Ok(_) => FreeState::Free,
        Err(_) => FreeState::Unknown,
    }
}

fn log_issue(issue: &ValidationIssue) {
    warn!("validation issue: {}", issue.message);
}

fn debug_fat(fat: &DerivedFat) {
    debug!("derived FAT has {} entries", fat.entries.len());
}
