//! Retention-flag filtering during store construction.
//!
//! Each candidate overlap reaches the store as a symmetric pair: the forward
//! record from a's perspective and the swapped record from b's. The filter
//! decides, independently per direction and per downstream purpose (trim,
//! dedup, assembly), whether the record keeps that purpose's flag. Nothing
//! is deleted here; a record skipped for assembly can still carry its OBT or
//! DUP flag.

use crate::reads::ReadStore;
use crate::record::{encode_evalue, Overlap};
use log::info;
use serde::Serialize;

/// Overlaps at or below this error look like duplicate evidence.
const DUP_MAX_ERATE: f64 = 0.02;

/// Largest end-hang, in bases, for a pair to count as a duplicate.
const DUP_MAX_HANG: i32 = 30;

/// Shortest overlap span useful for trimming.
const OBT_MIN_SPAN: u32 = 40;

/// Where each candidate record ended up, for diagnostic reporting.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FilterStats {
    pub save_utg: u64,
    pub save_obt: u64,
    pub save_dup: u64,

    /// Error rate above the assembly ceiling.
    pub skip_erate: u64,

    /// Trimming not requested for the a read's library.
    pub skip_obt: u64,
    /// Overlap too similar; duplicate evidence, not trim evidence.
    pub skip_obt_bad: u64,
    /// Overlap too short to inform trimming.
    pub skip_obt_short: u64,

    /// Dedup not requested for the a read's library.
    pub skip_dup: u64,
    /// Overlap isn't remotely similar.
    pub skip_dup_diff: u64,
    /// Reads come from different libraries.
    pub skip_dup_lib: u64,
}

/// Decides retention flags for store-construction input.
///
/// The per-read skip tables are computed once from the read store's library
/// policies; the only other state is the counter tally, owned here and
/// handed to the caller through [`OverlapFilter::stats`].
pub struct OverlapFilter {
    max_evalue: u16,
    skip_obt: Vec<bool>,
    skip_dup: Vec<bool>,
    library_of: Vec<u32>,
    stats: FilterStats,
}

impl OverlapFilter {
    pub fn new<R: ReadStore + ?Sized>(reads: &R, max_erate: f64) -> Self {
        let num = reads.num_reads() as usize + 1;

        let mut skip_obt = vec![false; num];
        let mut skip_dup = vec![false; num];
        let mut library_of = vec![0u32; num];

        let mut num_skip_obt = 0u32;
        let mut num_skip_dup = 0u32;

        for id in 1..num as u32 {
            let lib = reads.library_id(id);
            let policy = reads.library(lib);
            library_of[id as usize] = lib;

            if policy.skips_trimming() {
                skip_obt[id as usize] = true;
                num_skip_obt += 1;
            }
            if !policy.remove_duplicate_reads {
                skip_dup[id as usize] = true;
                num_skip_dup += 1;
            }
        }

        info!(
            "marked {} reads to skip trimming, {} reads to skip dedupe",
            num_skip_obt, num_skip_dup
        );

        Self {
            max_evalue: encode_evalue(max_erate),
            skip_obt,
            skip_dup,
            library_of,
            stats: FilterStats::default(),
        }
    }

    /// Decide flags for a symmetric candidate pair. The forward record is
    /// judged with a as the owning read, the reverse record with b.
    pub fn filter_overlap(&mut self, fwd: &mut Overlap, rev: &mut Overlap) {
        self.decide(fwd);
        self.decide(rev);
    }

    fn decide(&mut self, ov: &mut Overlap) {
        // Assembly keeps everything at or below the error ceiling.
        if ov.evalue() <= self.max_evalue {
            ov.set_for_utg(true);
            self.stats.save_utg += 1;
        } else {
            ov.set_for_utg(false);
            self.stats.skip_erate += 1;
        }

        let duplicate_like = ov.erate() <= DUP_MAX_ERATE
            && ov.a_hang().abs() <= DUP_MAX_HANG
            && ov.b_hang().abs() <= DUP_MAX_HANG;

        if self.skip_obt[ov.a_id as usize] {
            ov.set_for_obt(false);
            self.stats.skip_obt += 1;
        } else if ov.span() < OBT_MIN_SPAN {
            ov.set_for_obt(false);
            self.stats.skip_obt_short += 1;
        } else if duplicate_like {
            ov.set_for_obt(false);
            self.stats.skip_obt_bad += 1;
        } else {
            ov.set_for_obt(true);
            self.stats.save_obt += 1;
        }

        if self.skip_dup[ov.a_id as usize] {
            ov.set_for_dup(false);
            self.stats.skip_dup += 1;
        } else if self.library_of[ov.a_id as usize] != self.library_of[ov.b_id as usize] {
            ov.set_for_dup(false);
            self.stats.skip_dup_lib += 1;
        } else if !duplicate_like {
            ov.set_for_dup(false);
            self.stats.skip_dup_diff += 1;
        } else {
            ov.set_for_dup(true);
            self.stats.save_dup += 1;
        }
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn reset_counters(&mut self) {
        self.stats = FilterStats::default();
    }

    /// Log the tally of saved and skipped records.
    pub fn report_fate(&self) {
        let s = &self.stats;
        info!(
            "saved {} for assembly, {} for trimming, {} for dedupe",
            s.save_utg, s.save_obt, s.save_dup
        );
        info!("skipped by erate: {}", s.skip_erate);
        info!(
            "skipped for trimming: {} not requested, {} too similar, {} too short",
            s.skip_obt, s.skip_obt_bad, s.skip_obt_short
        );
        info!(
            "skipped for dedupe: {} not requested, {} dissimilar, {} cross-library",
            s.skip_dup, s.skip_dup_diff, s.skip_dup_lib
        );
    }
}
