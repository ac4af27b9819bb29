//! Memory-budgeted overlap cache.
//!
//! The cache loads one working range of reads from one or two stores (the
//! unique store and, optionally, the repeat/duplicate store) into a single
//! pre-sized arena, scoring and truncating each read's overlap list so the
//! whole working set fits a byte budget. Loading is a distinct, parallel
//! phase; queries afterwards are read-only borrows into the arena and need
//! no synchronization.
//!
//! Per-read truncation is fair: one global per-read cap, found by binary
//! search, applies to every read; no read is squeezed harder than another.

use crate::record::{
    decode_evalue, encode_evalue, Overlap, MAX_ERATE, MAX_EVALUE, MAX_READLEN_BITS,
};
use crate::store::{OvStore, StoreError};
use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use xxhash_rust::xxh64::xxh64;

const CACHE_MAGIC: u64 = u64::from_le_bytes(*b"ovxCache");
const CACHE_VERSION: u64 = 1;

const HANG_BITS: u32 = MAX_READLEN_BITS + 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(
        "memory budget of {budget} bytes cannot hold one overlap for each of \
         {reads} reads ({required} bytes needed)"
    )]
    Capacity {
        budget: u64,
        reads: u64,
        required: u64,
    },

    #[error("cache snapshot {0} was saved with different load parameters")]
    SnapshotMismatch(PathBuf),

    #[error("cache snapshot {0} is corrupt: {1}")]
    SnapshotCorrupt(PathBuf, String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Load-time configuration.
#[derive(Debug, Clone)]
pub struct CacheParams {
    /// Error ceiling; overlaps above it are not loaded.
    pub max_erate: f64,
    /// Shortest overlap span loaded.
    pub min_overlap: u32,
    /// Arena budget in bytes, index arrays included.
    pub mem_limit: u64,
    /// Hard cap on overlaps kept per read; 0 means no cap beyond the budget.
    pub max_per_read: u32,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            max_erate: 0.12,
            min_overlap: 40,
            mem_limit: 4 << 30,
            max_per_read: 0,
        }
    }
}

/// One cached overlap: 16 bytes, everything the graph builder needs.
///
/// Packed as evalue:12 | a_hang:22 | b_hang:22 | flipped:1 in one word,
/// hangs in two's complement, plus the b read id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CachedOverlap {
    bits: u64,
    b_id: u32,
    _pad: u32,
}

impl CachedOverlap {
    fn from_overlap(ov: &Overlap) -> Self {
        let hang_mask = (1u64 << HANG_BITS) - 1;
        let bits = (ov.evalue() as u64)
            | (((ov.a_hang() as i64 as u64) & hang_mask) << MAX_EVALUE_SHIFT)
            | (((ov.b_hang() as i64 as u64) & hang_mask) << (MAX_EVALUE_SHIFT + HANG_BITS))
            | ((ov.flipped() as u64) << (MAX_EVALUE_SHIFT + 2 * HANG_BITS));
        Self {
            bits,
            b_id: ov.b_id,
            _pad: 0,
        }
    }

    pub fn b_id(&self) -> u32 {
        self.b_id
    }

    pub fn evalue(&self) -> u16 {
        (self.bits & (MAX_EVALUE as u64)) as u16
    }

    pub fn erate(&self) -> f64 {
        decode_evalue(self.evalue())
    }

    fn hang(&self, shift: u32) -> i32 {
        let raw = ((self.bits >> shift) & ((1u64 << HANG_BITS) - 1)) as u32;
        ((raw << (32 - HANG_BITS)) as i32) >> (32 - HANG_BITS)
    }

    pub fn a_hang(&self) -> i32 {
        self.hang(MAX_EVALUE_SHIFT)
    }

    pub fn b_hang(&self) -> i32 {
        self.hang(MAX_EVALUE_SHIFT + HANG_BITS)
    }

    pub fn flipped(&self) -> bool {
        (self.bits >> (MAX_EVALUE_SHIFT + 2 * HANG_BITS)) & 1 != 0
    }

    /// The overlap hangs off a's 5' end (dovetail geometry assumed).
    pub fn a_end_is_5prime(&self) -> bool {
        self.a_hang() < 0 && self.b_hang() < 0
    }

    pub fn a_end_is_3prime(&self) -> bool {
        self.a_hang() > 0 && self.b_hang() > 0
    }
}

const MAX_EVALUE_SHIFT: u32 = 12;

/// Find the fair per-read cap.
///
/// Given per-read candidate counts and a capacity in records, returns the
/// largest cap `m` (bounded by `hard_cap` when nonzero) such that
/// `sum(min(count, m)) <= capacity`, together with that sum. None when even
/// one overlap per candidate-bearing read overflows the capacity.
pub fn compute_overlap_limit(counts: &[u32], capacity: u64, hard_cap: u32) -> Option<(u32, u64)> {
    let capped = |m: u32| -> u64 {
        counts
            .iter()
            .map(|&c| (c as u64).min(m as u64))
            .sum::<u64>()
    };

    let max_count = counts.iter().copied().max().unwrap_or(0);
    let mut hi = if hard_cap > 0 {
        max_count.min(hard_cap)
    } else {
        max_count
    };

    if hi == 0 {
        return Some((0, 0));
    }
    if capped(hi) <= capacity {
        return Some((hi, capped(hi)));
    }
    if capped(1) > capacity {
        return None;
    }

    // capped() is non-decreasing in m; binary search the largest m that fits.
    let mut lo = 1u32;
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if capped(mid) <= capacity {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Some((lo, capped(lo)))
}

fn score(ov: &Overlap) -> u64 {
    // Identity first, span second.
    (((MAX_EVALUE - ov.evalue()) as u64) << MAX_READLEN_BITS) | ov.span() as u64
}

/// The in-memory, read-indexed overlap working set.
///
/// Built once per run, queried many times. Slices handed out by
/// [`OverlapCache::get_overlaps`] borrow the arena and live as long as the
/// cache does.
#[derive(Debug)]
pub struct OverlapCache {
    lo: u32,
    hi: u32,
    max_evalue: u16,
    min_overlap: u32,
    max_per: u32,

    arena: Vec<CachedOverlap>,
    /// Arena offset per read id, with a trailing sentinel.
    offsets: Vec<u64>,
    /// Overlaps held per read id.
    lens: Vec<u32>,

    mem_used: u64,
}

impl OverlapCache {
    /// Build the cache from one or two stores.
    ///
    /// Every worker thread opens its own store handles; the pre-sized arena
    /// is written in disjoint per-read regions, so only the error channel
    /// needs a lock.
    pub fn new<P: AsRef<Path>>(
        uniq: P,
        rept: Option<P>,
        params: &CacheParams,
    ) -> CacheResult<Self> {
        let uniq = uniq.as_ref();
        let rept = rept.as_ref().map(|p| p.as_ref());

        // Learn the id range and raw candidate counts up front.
        let mut lo = u32::MAX;
        let mut hi = 0u32;
        let mut counts: Vec<u32> = Vec::new();

        for path in std::iter::once(uniq).chain(rept) {
            let mut store = OvStore::open(path)?;
            store.reset_range();
            let (first, per_frag) = store.num_overlaps_per_frag();
            if per_frag.is_empty() {
                continue;
            }
            let last = first + per_frag.len() as u32 - 1;
            lo = lo.min(first);
            hi = hi.max(last);
            if counts.len() < hi as usize + 1 {
                counts.resize(hi as usize + 1, 0);
            }
            for (i, c) in per_frag.into_iter().enumerate() {
                let slot = first as usize + i;
                counts[slot] = counts[slot].saturating_add(c);
            }
        }

        if lo == u32::MAX {
            // No overlaps anywhere; an empty but queryable cache.
            lo = 0;
            hi = 0;
            counts = vec![0];
        }

        let record_size = std::mem::size_of::<CachedOverlap>() as u64;
        let index_bytes = (hi as u64 + 2) * 8 + (hi as u64 + 1) * 4;
        let reads_with = counts.iter().filter(|&&c| c > 0).count() as u64;

        let capacity = params
            .mem_limit
            .checked_sub(index_bytes)
            .map(|b| b / record_size)
            .unwrap_or(0);

        let (max_per, total) = compute_overlap_limit(&counts, capacity, params.max_per_read)
            .ok_or(CacheError::Capacity {
                budget: params.mem_limit,
                reads: reads_with,
                required: index_bytes + reads_with * record_size,
            })?;

        info!(
            "loading overlaps for reads {}..={}: {} candidates on {} reads, \
             room for {} records, at most {} per read",
            lo,
            hi,
            counts.iter().map(|&c| c as u64).sum::<u64>(),
            reads_with,
            capacity,
            max_per
        );

        // Arena offsets from the per-read upper bounds.
        let mut offsets = Vec::with_capacity(hi as usize + 2);
        let mut acc = 0u64;
        for &c in &counts {
            offsets.push(acc);
            acc += (c as u64).min(max_per as u64);
        }
        offsets.push(acc);
        debug_assert_eq!(acc, total);

        let mut arena = vec![CachedOverlap::zeroed(); total as usize];
        let mut lens = vec![0u32; hi as usize + 1];

        let max_evalue = encode_evalue(params.max_erate);
        let failure: Mutex<Option<CacheError>> = Mutex::new(None);

        let nworkers = rayon::current_num_threads().max(1);
        let ranges = partition_reads(lo, hi, &offsets, nworkers);

        rayon::scope(|s| {
            let mut arena_rest: &mut [CachedOverlap] = &mut arena;
            let mut lens_rest: &mut [u32] = &mut lens[lo as usize..];
            let mut arena_pos = 0u64;
            let mut lens_pos = lo;

            for &(id_lo, id_hi) in &ranges {
                let arena_end = offsets[id_hi as usize + 1];
                let (part, rest) = arena_rest.split_at_mut((arena_end - arena_pos) as usize);
                arena_rest = rest;
                let arena_base = arena_pos;
                arena_pos = arena_end;

                let (lpart, lrest) = lens_rest.split_at_mut((id_hi - lens_pos + 1) as usize);
                lens_rest = lrest;
                let lens_base = lens_pos;
                lens_pos = id_hi + 1;

                let offsets = &offsets;
                let failure = &failure;
                s.spawn(move |_| {
                    let r = load_partition(
                        uniq,
                        rept,
                        id_lo,
                        id_hi,
                        offsets,
                        arena_base,
                        part,
                        lpart,
                        lens_base,
                        max_evalue,
                        params.min_overlap,
                        max_per,
                    );
                    if let Err(e) = r {
                        let mut slot = match failure.lock() {
                            Ok(s) => s,
                            Err(p) => p.into_inner(),
                        };
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                });
            }
        });

        if let Some(e) = failure.into_inner().unwrap_or(None) {
            return Err(e);
        }

        let mut cache = Self {
            lo,
            hi,
            max_evalue,
            min_overlap: params.min_overlap,
            max_per,
            arena,
            offsets,
            lens,
            mem_used: 0,
        };
        cache.compact();

        info!(
            "cached {} overlaps in {} bytes",
            cache.num_cached(),
            cache.mem_used
        );
        Ok(cache)
    }

    /// Close the gaps load-time filtering left between per-read regions.
    fn compact(&mut self) {
        let mut write = 0u64;
        for id in 0..=self.hi as usize {
            let start = self.offsets[id] as usize;
            let len = self.lens[id] as usize;
            self.arena.copy_within(start..start + len, write as usize);
            self.offsets[id] = write;
            write += len as u64;
        }
        self.offsets[self.hi as usize + 1] = write;
        self.arena.truncate(write as usize);
        self.arena.shrink_to_fit();
        self.mem_used = write * std::mem::size_of::<CachedOverlap>() as u64
            + self.offsets.len() as u64 * 8
            + self.lens.len() as u64 * 4;
    }

    pub fn range(&self) -> (u32, u32) {
        (self.lo, self.hi)
    }

    pub fn max_per_read(&self) -> u32 {
        self.max_per
    }

    pub fn mem_used(&self) -> u64 {
        self.mem_used
    }

    pub fn num_cached(&self) -> u64 {
        self.lens.iter().map(|&l| l as u64).sum()
    }

    /// The read's retained overlaps at or below `max_erate`, best first.
    ///
    /// The ceiling may be stricter than the load-time ceiling but never
    /// looser; since each slice is sorted by error, a stricter ceiling is
    /// answered with a prefix.
    pub fn get_overlaps(&self, id: u32, max_erate: f64) -> &[CachedOverlap] {
        if id < self.lo || id > self.hi {
            return &[];
        }
        let start = self.offsets[id as usize] as usize;
        let len = self.lens[id as usize] as usize;
        let slice = &self.arena[start..start + len];

        let ceiling = encode_evalue(max_erate).min(self.max_evalue);
        let cut = slice.partition_point(|o| o.evalue() <= ceiling);
        &slice[..cut]
    }

    /// Error rate of the overlap between `a` and `b`, if it was retained.
    pub fn find_erate(&self, a_id: u32, b_id: u32) -> Option<f64> {
        self.get_overlaps(a_id, MAX_ERATE)
            .iter()
            .find(|o| o.b_id() == b_id)
            .map(|o| o.erate())
    }

    /// Drop cached overlaps whose error exceeds the caller's per-end
    /// threshold for their read, compacting in place. The threshold arrays
    /// are indexed by read id; missing entries keep everything.
    pub fn remove_weak_overlaps(&mut self, min_evalue_5p: &[u16], min_evalue_3p: &[u16]) {
        let mut write = 0u64;
        let mut dropped = 0u64;

        for id in 0..=self.hi as usize {
            let start = self.offsets[id] as usize;
            let len = self.lens[id] as usize;
            self.offsets[id] = write;

            let t5 = min_evalue_5p.get(id).copied().unwrap_or(MAX_EVALUE);
            let t3 = min_evalue_3p.get(id).copied().unwrap_or(MAX_EVALUE);

            let mut kept = 0u32;
            for i in start..start + len {
                let ov = self.arena[i];
                let keep = if ov.a_end_is_5prime() {
                    ov.evalue() <= t5
                } else if ov.a_end_is_3prime() {
                    ov.evalue() <= t3
                } else {
                    true
                };
                if keep {
                    self.arena[write as usize + kept as usize] = ov;
                    kept += 1;
                } else {
                    dropped += 1;
                }
            }
            self.lens[id] = kept;
            write += kept as u64;
        }

        self.offsets[self.hi as usize + 1] = write;
        self.arena.truncate(write as usize);
        self.mem_used = write * std::mem::size_of::<CachedOverlap>() as u64
            + self.offsets.len() as u64 * 8
            + self.lens.len() as u64 * 4;

        info!("removed {} weak overlaps, {} remain", dropped, write);
    }

    // -- snapshots ---------------------------------------------------------

    /// Persist the loaded cache to `<prefix>.ovc` so later runs with the
    /// same parameters can skip the load pass.
    pub fn save<P: AsRef<Path>>(&self, prefix: P) -> CacheResult<PathBuf> {
        let path = snapshot_path(prefix.as_ref());
        let mut payload = Vec::new();
        for &o in &self.offsets {
            payload.write_u64::<LittleEndian>(o)?;
        }
        for &l in &self.lens {
            payload.write_u32::<LittleEndian>(l)?;
        }
        payload.extend_from_slice(bytemuck::cast_slice(&self.arena));

        let checksum = xxh64(&payload, 0);
        let compressed = zstd::encode_all(&payload[..], 3)
            .map_err(|e| CacheError::SnapshotCorrupt(path.clone(), e.to_string()))?;

        let mut w = BufWriter::new(File::create(&path)?);
        w.write_u64::<LittleEndian>(CACHE_MAGIC)?;
        w.write_u64::<LittleEndian>(CACHE_VERSION)?;
        w.write_u64::<LittleEndian>(self.max_evalue as u64)?;
        w.write_u64::<LittleEndian>(self.min_overlap as u64)?;
        w.write_u64::<LittleEndian>(self.max_per as u64)?;
        w.write_u64::<LittleEndian>(self.lo as u64)?;
        w.write_u64::<LittleEndian>(self.hi as u64)?;
        w.write_u64::<LittleEndian>(self.arena.len() as u64)?;
        w.write_u64::<LittleEndian>(checksum)?;
        w.write_u64::<LittleEndian>(compressed.len() as u64)?;
        w.write_all(&compressed)?;
        w.flush()?;

        info!("saved overlap cache to {}", path.display());
        Ok(path)
    }

    /// Restore a snapshot saved by [`OverlapCache::save`]. Refuses a
    /// snapshot whose load parameters differ from `params`.
    pub fn load<P: AsRef<Path>>(prefix: P, params: &CacheParams) -> CacheResult<Self> {
        let path = snapshot_path(prefix.as_ref());
        let mut r = BufReader::new(File::open(&path)?);

        let corrupt = |why: &str| CacheError::SnapshotCorrupt(path.clone(), why.to_string());

        if r.read_u64::<LittleEndian>()? != CACHE_MAGIC {
            return Err(corrupt("bad magic"));
        }
        if r.read_u64::<LittleEndian>()? != CACHE_VERSION {
            return Err(corrupt("unsupported version"));
        }

        let max_evalue = r.read_u64::<LittleEndian>()? as u16;
        let min_overlap = r.read_u64::<LittleEndian>()? as u32;
        let max_per = r.read_u64::<LittleEndian>()? as u32;
        let lo = r.read_u64::<LittleEndian>()? as u32;
        let hi = r.read_u64::<LittleEndian>()? as u32;
        let arena_len = r.read_u64::<LittleEndian>()? as usize;
        let checksum = r.read_u64::<LittleEndian>()?;
        let compressed_len = r.read_u64::<LittleEndian>()? as usize;

        if max_evalue != encode_evalue(params.max_erate) || min_overlap != params.min_overlap {
            return Err(CacheError::SnapshotMismatch(path));
        }

        let mut compressed = vec![0u8; compressed_len];
        r.read_exact(&mut compressed)?;
        let payload = zstd::decode_all(&compressed[..])
            .map_err(|e| CacheError::SnapshotCorrupt(path.clone(), e.to_string()))?;

        if xxh64(&payload, 0) != checksum {
            return Err(corrupt("checksum mismatch"));
        }

        let n_offsets = hi as usize + 2;
        let n_lens = hi as usize + 1;
        let record_size = std::mem::size_of::<CachedOverlap>();
        let expected = n_offsets * 8 + n_lens * 4 + arena_len * record_size;
        if payload.len() != expected {
            return Err(corrupt("payload size mismatch"));
        }

        let mut cur = &payload[..];
        let mut offsets = Vec::with_capacity(n_offsets);
        for _ in 0..n_offsets {
            offsets.push(cur.read_u64::<LittleEndian>()?);
        }
        let mut lens = Vec::with_capacity(n_lens);
        for _ in 0..n_lens {
            lens.push(cur.read_u32::<LittleEndian>()?);
        }
        let arena: Vec<CachedOverlap> = bytemuck::pod_collect_to_vec(cur);

        let mut cache = Self {
            lo,
            hi,
            max_evalue,
            min_overlap,
            max_per,
            arena,
            offsets,
            lens,
            mem_used: 0,
        };
        cache.mem_used = cache.arena.len() as u64 * record_size as u64
            + cache.offsets.len() as u64 * 8
            + cache.lens.len() as u64 * 4;

        info!("restored overlap cache from {}", path.display());
        Ok(cache)
    }
}

fn snapshot_path(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".ovc");
    PathBuf::from(name)
}

/// Split `lo..=hi` into contiguous id ranges of roughly equal arena share.
fn partition_reads(lo: u32, hi: u32, offsets: &[u64], nworkers: usize) -> Vec<(u32, u32)> {
    let total = offsets[hi as usize + 1] - offsets[lo as usize];
    let target = total / nworkers as u64 + 1;

    let mut ranges = Vec::new();
    let mut range_lo = lo;
    let mut acc = 0u64;

    for id in lo..=hi {
        acc += offsets[id as usize + 1] - offsets[id as usize];
        if acc >= target && id < hi {
            ranges.push((range_lo, id));
            range_lo = id + 1;
            acc = 0;
        }
    }
    ranges.push((range_lo, hi));
    ranges
}

#[allow(clippy::too_many_arguments)]
fn load_partition(
    uniq: &Path,
    rept: Option<&Path>,
    id_lo: u32,
    id_hi: u32,
    offsets: &[u64],
    arena_base: u64,
    arena: &mut [CachedOverlap],
    lens: &mut [u32],
    lens_base: u32,
    max_evalue: u16,
    min_overlap: u32,
    max_per: u32,
) -> CacheResult<()> {
    let mut uniq = OvStore::open(uniq)?;
    let mut rept = match rept {
        Some(p) => Some(OvStore::open(p)?),
        None => None,
    };

    let mut scratch: Vec<Overlap> = Vec::new();

    for id in id_lo..=id_hi {
        scratch.clear();
        uniq.read_overlaps_for(id, &mut scratch)?;
        if let Some(rept) = rept.as_mut() {
            rept.read_overlaps_for(id, &mut scratch)?;
        }

        scratch.retain(|ov| ov.evalue() <= max_evalue && ov.span() >= min_overlap);

        if max_per == 0 {
            scratch.clear();
        } else if scratch.len() > max_per as usize {
            // Only the surviving subset matters; a partial sort picks it.
            let nth = max_per as usize - 1;
            scratch.select_nth_unstable_by(nth, |x, y| {
                score(y).cmp(&score(x)).then(x.b_id.cmp(&y.b_id))
            });
            scratch.truncate(max_per as usize);
        }

        // Final slice order: best identity first, longer span and then
        // smaller b id breaking ties. get_overlaps relies on this.
        scratch.sort_unstable_by(|x, y| {
            x.evalue()
                .cmp(&y.evalue())
                .then(y.span().cmp(&x.span()))
                .then(x.b_id.cmp(&y.b_id))
        });

        let start = (offsets[id as usize] - arena_base) as usize;
        for (i, ov) in scratch.iter().enumerate() {
            arena[start + i] = CachedOverlap::from_overlap(ov);
        }
        lens[(id - lens_base) as usize] = scratch.len() as u32;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OvStoreWriter;
    use tempfile::TempDir;

    fn overlap(a: u32, b: u32, erate: f64, span: u32) -> Overlap {
        let mut ov = Overlap::new(a, b);
        ov.set_a_hang(10).unwrap();
        ov.set_b_hang(10).unwrap();
        ov.set_span(span).unwrap();
        ov.set_erate(erate);
        ov.set_for_utg(true);
        ov
    }

    fn build_store(dir: &Path, ovls: &[Overlap]) {
        let mut sorted = ovls.to_vec();
        sorted.sort();
        let mut w = OvStoreWriter::create(dir, 1 << 20).unwrap();
        w.write_overlaps(&sorted).unwrap();
        w.finish().unwrap();
    }

    fn params(mem: u64) -> CacheParams {
        CacheParams {
            max_erate: 0.10,
            min_overlap: 40,
            mem_limit: mem,
            max_per_read: 0,
        }
    }

    #[test]
    fn test_compute_overlap_limit_fairness() {
        // Capacity below the total forces a shared cap.
        let counts = vec![10, 3, 7, 0, 25];
        let (max_per, total) = compute_overlap_limit(&counts, 20, 0).unwrap();

        let capped = |m: u32| -> u64 {
            counts.iter().map(|&c| (c as u64).min(m as u64)).sum()
        };
        assert!(capped(max_per) <= 20);
        assert!(capped(max_per + 1) > 20); // largest such value
        assert_eq!(total, capped(max_per));
        assert_eq!(max_per, 6);
    }

    #[test]
    fn test_compute_overlap_limit_fits_without_cap() {
        let counts = vec![4, 2, 8];
        let (max_per, total) = compute_overlap_limit(&counts, 100, 0).unwrap();
        assert_eq!(max_per, 8);
        assert_eq!(total, 14);
    }

    #[test]
    fn test_compute_overlap_limit_hard_cap() {
        let counts = vec![50, 50];
        let (max_per, total) = compute_overlap_limit(&counts, 1000, 10).unwrap();
        assert_eq!(max_per, 10);
        assert_eq!(total, 20);
    }

    #[test]
    fn test_compute_overlap_limit_overflow_is_none() {
        let counts = vec![5, 5, 5];
        assert!(compute_overlap_limit(&counts, 2, 0).is_none());
    }

    #[test]
    fn test_cache_load_and_query() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        build_store(
            &dir,
            &[
                overlap(1, 2, 0.01, 500),
                overlap(1, 3, 0.05, 700),
                overlap(1, 4, 0.03, 600),
                overlap(2, 1, 0.01, 500),
                overlap(3, 1, 0.05, 700),
            ],
        );

        let cache = OverlapCache::new(&dir, None, &params(1 << 20)).unwrap();
        assert_eq!(cache.range(), (1, 3));

        let got = cache.get_overlaps(1, 0.10);
        assert_eq!(got.len(), 3);
        // Best identity first.
        assert_eq!(got[0].b_id(), 2);
        assert_eq!(got[1].b_id(), 4);
        assert_eq!(got[2].b_id(), 3);
        assert_eq!(got[0].a_hang(), 10);
        assert_eq!(got[0].b_hang(), 10);

        // Deterministic across queries.
        let again = cache.get_overlaps(1, 0.10);
        assert_eq!(got, again);

        // Stricter ceiling returns a prefix subset.
        let strict = cache.get_overlaps(1, 0.03);
        assert_eq!(strict.len(), 2);
        assert_eq!(strict, &got[..2]);

        // Unknown reads are empty, not errors.
        assert!(cache.get_overlaps(9, 0.10).is_empty());
    }

    #[test]
    fn test_cache_budget_forces_fair_truncation() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        let mut ovls = Vec::new();
        for b in 0..8 {
            ovls.push(overlap(1, 10 + b, 0.01 + 0.005 * b as f64, 500));
        }
        ovls.push(overlap(2, 10, 0.02, 500));
        build_store(&dir, &ovls);

        // Budget sized so only a few records fit on top of the index.
        let index_bytes = (2u64 + 2) * 8 + 3 * 4;
        let p = params(index_bytes + 5 * 16);
        let cache = OverlapCache::new(&dir, None, &p).unwrap();

        assert_eq!(cache.max_per_read(), 4);
        let got = cache.get_overlaps(1, 0.10);
        assert_eq!(got.len(), 4);
        // The four lowest-error overlaps survive.
        assert_eq!(
            got.iter().map(|o| o.b_id()).collect::<Vec<_>>(),
            vec![10, 11, 12, 13]
        );
        assert_eq!(cache.get_overlaps(2, 0.10).len(), 1);
    }

    #[test]
    fn test_cache_capacity_error_is_proactive() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        build_store(
            &dir,
            &[overlap(1, 2, 0.01, 500), overlap(2, 1, 0.01, 500)],
        );

        let err = OverlapCache::new(&dir, None, &params(16)).unwrap_err();
        assert!(matches!(err, CacheError::Capacity { .. }));
    }

    #[test]
    fn test_cache_merges_two_stores() {
        let tmp = TempDir::new().unwrap();
        let uniq = tmp.path().join("uniq");
        let rept = tmp.path().join("rept");
        build_store(&uniq, &[overlap(1, 2, 0.02, 500)]);
        build_store(&rept, &[overlap(1, 3, 0.01, 500), overlap(4, 1, 0.02, 500)]);

        let cache = OverlapCache::new(&uniq, Some(&rept), &params(1 << 20)).unwrap();
        assert_eq!(cache.range(), (1, 4));

        let got = cache.get_overlaps(1, 0.10);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].b_id(), 3); // lower erate, from the repeat store
        assert_eq!(got[1].b_id(), 2);
        assert_eq!(cache.get_overlaps(4, 0.10).len(), 1);
    }

    #[test]
    fn test_load_filters_by_erate_and_length() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        build_store(
            &dir,
            &[
                overlap(1, 2, 0.01, 500),
                overlap(1, 3, 0.20, 500), // over the erate ceiling
                overlap(1, 4, 0.01, 20),  // too short
            ],
        );

        let cache = OverlapCache::new(&dir, None, &params(1 << 20)).unwrap();
        let got = cache.get_overlaps(1, 0.30);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].b_id(), 2);
    }

    #[test]
    fn test_find_erate() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        build_store(
            &dir,
            &[overlap(1, 2, 0.013, 500), overlap(1, 3, 0.05, 500)],
        );

        let cache = OverlapCache::new(&dir, None, &params(1 << 20)).unwrap();
        assert!((cache.find_erate(1, 2).unwrap() - 0.013).abs() < 1e-9);
        assert!(cache.find_erate(1, 9).is_none());
        assert!(cache.find_erate(7, 2).is_none());
    }

    #[test]
    fn test_remove_weak_overlaps() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");

        // Read 1: one overlap off its 5' end, one off its 3' end.
        let mut five = Overlap::new(1, 2);
        five.set_a_hang(-50).unwrap();
        five.set_b_hang(-50).unwrap();
        five.set_span(500).unwrap();
        five.set_erate(0.05);
        five.set_for_utg(true);

        let mut three = Overlap::new(1, 3);
        three.set_a_hang(50).unwrap();
        three.set_b_hang(50).unwrap();
        three.set_span(500).unwrap();
        three.set_erate(0.05);
        three.set_for_utg(true);

        build_store(&dir, &[five, three]);

        let mut cache = OverlapCache::new(&dir, None, &params(1 << 20)).unwrap();
        assert_eq!(cache.get_overlaps(1, 0.10).len(), 2);

        // Tighten only the 5' end below the overlaps' evalue.
        let mut min5 = vec![MAX_EVALUE; 2];
        let min3 = vec![MAX_EVALUE; 2];
        min5[1] = encode_evalue(0.02);
        cache.remove_weak_overlaps(&min5, &min3);

        let got = cache.get_overlaps(1, 0.10);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].b_id(), 3);
        assert!(got[0].a_end_is_3prime());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");
        build_store(
            &dir,
            &[
                overlap(1, 2, 0.01, 500),
                overlap(1, 3, 0.05, 700),
                overlap(2, 1, 0.01, 500),
            ],
        );

        let p = params(1 << 20);
        let cache = OverlapCache::new(&dir, None, &p).unwrap();
        let prefix = tmp.path().join("run1");
        cache.save(&prefix).unwrap();

        let restored = OverlapCache::load(&prefix, &p).unwrap();
        assert_eq!(restored.range(), cache.range());
        assert_eq!(restored.num_cached(), cache.num_cached());
        assert_eq!(
            restored.get_overlaps(1, 0.10),
            cache.get_overlaps(1, 0.10)
        );

        // Different parameters refuse the snapshot.
        let mut other = p.clone();
        other.max_erate = 0.05;
        assert!(matches!(
            OverlapCache::load(&prefix, &other),
            Err(CacheError::SnapshotMismatch(_))
        ));
    }

    #[test]
    fn test_hang_sign_roundtrip() {
        let mut ov = Overlap::new(1, 2);
        ov.set_a_hang(-123).unwrap();
        ov.set_b_hang(456).unwrap();
        ov.set_erate(0.07);
        ov.set_flipped(true);

        let c = CachedOverlap::from_overlap(&ov);
        assert_eq!(c.a_hang(), -123);
        assert_eq!(c.b_hang(), 456);
        assert_eq!(c.evalue(), ov.evalue());
        assert!(c.flipped());
        assert_eq!(c.b_id(), 2);
    }
}
