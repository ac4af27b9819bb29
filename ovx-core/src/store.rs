//! Sorted, file-partitioned overlap store.
//!
//! A store is a directory holding:
//! - `info`    — fixed header: magic, version, id range, overlap total,
//!               highest data file, read-length bit width.
//! - `####.ovb`— full-layout record data, sorted by `(a_id, b_id, bits)`.
//! - `index`   — one `(a_id, file, offset, count, start_id)` entry per read
//!               id in `[smallest, largest]`, no gaps.
//! - `evalues` — optional flat u16 overlay replacing stored error values,
//!               memory mapped at open.
//!
//! Stores are built once, in bulk, from pre-sorted input (either a single
//! pass through [`OvStoreWriter`] or per-bucket segments merged by
//! [`merge_info_files`]) and are read-only afterwards.

use crate::file::{FileError, Layout, OvFileReader, OvFileWriter, WriteMode};
use crate::filter::{FilterStats, OverlapFilter};
use crate::reads::ReadStore;
use crate::record::{Overlap, RecordError, MAX_EVALUE, MAX_READLEN_BITS};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const STORE_MAGIC: u64 = u64::from_le_bytes(*b"ovxStore");
const STORE_VERSION: u64 = 1;

/// Target overlaps per data file when the caller does not say otherwise.
pub const DEFAULT_OVERLAPS_PER_FILE: u64 = 1 << 27;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("not an overlap store: bad magic in {0}")]
    BadMagic(PathBuf),

    #[error("unsupported store version {0}")]
    UnsupportedVersion(u64),

    #[error("store built for {stored}-bit read lengths, this build uses {expected}")]
    ReadLenBitsMismatch { stored: u64, expected: u64 },

    #[error("store index is malformed: {0}")]
    IndexShape(String),

    #[error(
        "index entry for read {a_id} resolves to read {found} (file {file}, record offset {offset})"
    )]
    IndexCorruption {
        a_id: u32,
        found: u32,
        file: u32,
        offset: u32,
    },

    #[error("read {a_id}: index records {indexed} overlaps, data files hold {written}")]
    CountMismatch {
        a_id: u32,
        indexed: u32,
        written: u32,
    },

    #[error("segment {0} overlaps the read id range of the previous segment")]
    SegmentOrder(u32),

    #[error("store {0} already exists")]
    Exists(PathBuf),

    #[error("reads {bgn}..={end} are outside the store range {lo}..={hi}")]
    OutOfRange { bgn: u32, end: u32, lo: u32, hi: u32 },

    #[error("evalue count {given} does not match the {expected} overlaps of reads {bgn}..={end}")]
    EvalueCountMismatch {
        given: u64,
        expected: u64,
        bgn: u32,
        end: u32,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store header, persisted to `<store>/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {
    pub smallest_id: u32,
    pub largest_id: u32,
    pub num_overlaps: u64,
    pub highest_file_index: u32,
    pub max_readlen_bits: u32,
}

impl StoreInfo {
    fn write_to(&self, path: &Path) -> StoreResult<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_u64::<LittleEndian>(STORE_MAGIC)?;
        w.write_u64::<LittleEndian>(STORE_VERSION)?;
        w.write_u64::<LittleEndian>(self.smallest_id as u64)?;
        w.write_u64::<LittleEndian>(self.largest_id as u64)?;
        w.write_u64::<LittleEndian>(self.num_overlaps)?;
        w.write_u64::<LittleEndian>(self.highest_file_index as u64)?;
        w.write_u64::<LittleEndian>(self.max_readlen_bits as u64)?;
        w.flush()?;
        Ok(())
    }

    fn read_from(path: &Path) -> StoreResult<Self> {
        let mut r = BufReader::new(File::open(path)?);
        let magic = r.read_u64::<LittleEndian>()?;
        if magic != STORE_MAGIC {
            return Err(StoreError::BadMagic(path.to_path_buf()));
        }
        let version = r.read_u64::<LittleEndian>()?;
        if version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }
        let smallest_id = r.read_u64::<LittleEndian>()? as u32;
        let largest_id = r.read_u64::<LittleEndian>()? as u32;
        let num_overlaps = r.read_u64::<LittleEndian>()?;
        let highest_file_index = r.read_u64::<LittleEndian>()? as u32;
        let max_readlen_bits = r.read_u64::<LittleEndian>()? as u32;
        Ok(Self {
            smallest_id,
            largest_id,
            num_overlaps,
            highest_file_index,
            max_readlen_bits,
        })
    }
}

/// One index entry: where a read's overlap block lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetRecord {
    pub a_id: u32,
    /// 1-based data file number.
    pub file_no: u32,
    /// Record offset within that file.
    pub offset: u32,
    pub num_olaps: u32,
    /// Global sequence number of the block's first overlap.
    pub overlap_id: u64,
}

fn data_file_name(store: &Path, file_no: u32) -> PathBuf {
    store.join(format!("{file_no:04}.ovb"))
}

fn write_index_file(path: &Path, entries: &[OffsetRecord]) -> StoreResult<()> {
    let mut w = BufWriter::new(File::create(path)?);
    for e in entries {
        w.write_u32::<LittleEndian>(e.a_id)?;
        w.write_u32::<LittleEndian>(e.file_no)?;
        w.write_u32::<LittleEndian>(e.offset)?;
        w.write_u32::<LittleEndian>(e.num_olaps)?;
        w.write_u64::<LittleEndian>(e.overlap_id)?;
    }
    w.flush()?;
    Ok(())
}

fn read_index_file(path: &Path) -> StoreResult<Vec<OffsetRecord>> {
    const ENTRY_SIZE: u64 = 4 * 4 + 8;
    let len = std::fs::metadata(path)?.len();
    if len % ENTRY_SIZE != 0 {
        return Err(StoreError::IndexShape(format!(
            "{} is not a whole number of index entries",
            path.display()
        )));
    }
    let mut r = BufReader::new(File::open(path)?);
    let mut entries = Vec::with_capacity((len / ENTRY_SIZE) as usize);
    for _ in 0..len / ENTRY_SIZE {
        entries.push(OffsetRecord {
            a_id: r.read_u32::<LittleEndian>()?,
            file_no: r.read_u32::<LittleEndian>()?,
            offset: r.read_u32::<LittleEndian>()?,
            num_olaps: r.read_u32::<LittleEndian>()?,
            overlap_id: r.read_u64::<LittleEndian>()?,
        });
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read-only handle on a built store.
///
/// A handle owns its streaming state (`set_range` plus sequential reads) and
/// its own file descriptors; concurrent readers each open their own handle.
pub struct OvStore {
    path: PathBuf,
    info: StoreInfo,
    index: Vec<OffsetRecord>,
    evalues: Option<Mmap>,

    range_bgn: u32,
    range_end: u32,

    cur_slot: usize,
    consumed: u32,
    positioned: bool,

    file_no: u32,
    file: Option<OvFileReader>,
}

impl OvStore {
    /// Open a store, validating its header against this build's record
    /// configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let info = StoreInfo::read_from(&path.join("info"))?;

        if info.max_readlen_bits != MAX_READLEN_BITS {
            return Err(StoreError::ReadLenBitsMismatch {
                stored: info.max_readlen_bits as u64,
                expected: MAX_READLEN_BITS as u64,
            });
        }

        let index = read_index_file(&path.join("index"))?;

        let expected = if info.num_overlaps == 0 && index.is_empty() {
            0
        } else {
            (info.largest_id - info.smallest_id) as usize + 1
        };
        if index.len() != expected {
            return Err(StoreError::IndexShape(format!(
                "expected {} entries for reads {}..={}, found {}",
                expected,
                info.smallest_id,
                info.largest_id,
                index.len()
            )));
        }
        for (i, e) in index.iter().enumerate() {
            if e.a_id != info.smallest_id + i as u32 {
                return Err(StoreError::IndexShape(format!(
                    "entry {} names read {}, expected {}",
                    i,
                    e.a_id,
                    info.smallest_id + i as u32
                )));
            }
        }

        let evalues_path = path.join("evalues");
        let evalues = if evalues_path.exists() {
            let file = File::open(&evalues_path)?;
            // Mapped read-only; the store is immutable once built.
            Some(unsafe { Mmap::map(&file)? })
        } else {
            None
        };

        let (range_bgn, range_end) = (info.smallest_id, info.largest_id);
        Ok(Self {
            path,
            info,
            index,
            evalues,
            range_bgn,
            range_end,
            cur_slot: 0,
            consumed: 0,
            positioned: false,
            file_no: 0,
            file: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &StoreInfo {
        &self.info
    }

    fn slot(&self, a_id: u32) -> usize {
        (a_id - self.info.smallest_id) as usize
    }

    /// Restrict streaming reads to `lo..=hi`, clamped to the store range.
    pub fn set_range(&mut self, lo: u32, hi: u32) {
        self.range_bgn = lo.max(self.info.smallest_id);
        self.range_end = hi.min(self.info.largest_id);
        self.cur_slot = if self.index.is_empty() {
            0
        } else {
            self.slot(self.range_bgn)
        };
        self.consumed = 0;
        self.positioned = false;
    }

    pub fn reset_range(&mut self) {
        let (lo, hi) = (self.info.smallest_id, self.info.largest_id);
        self.set_range(lo, hi);
    }

    fn ensure_file(&mut self, file_no: u32) -> StoreResult<&mut OvFileReader> {
        if self.file_no != file_no || self.file.is_none() {
            let reader = OvFileReader::open(data_file_name(&self.path, file_no), Layout::Full)?;
            self.file = Some(reader);
            self.file_no = file_no;
        }
        match self.file.as_mut() {
            Some(f) => Ok(f),
            None => unreachable!("file opened above"),
        }
    }

    fn apply_evalue(&self, ov: &mut Overlap, overlap_id: u64) -> StoreResult<()> {
        if let Some(map) = &self.evalues {
            let i = overlap_id as usize * 2;
            if i + 2 > map.len() {
                return Err(StoreError::IndexShape(format!(
                    "evalue overlay holds {} entries, overlap {} requested",
                    map.len() / 2,
                    overlap_id
                )));
            }
            let v = u16::from_le_bytes([map[i], map[i + 1]]);
            ov.set_evalue(v.min(MAX_EVALUE))?;
        }
        Ok(())
    }

    /// Next overlap in the configured range, or None when the range is
    /// exhausted.
    pub fn read_overlap(&mut self) -> StoreResult<Option<Overlap>> {
        if self.index.is_empty() {
            return Ok(None);
        }
        let end_slot = self.slot(self.range_end);

        loop {
            if self.cur_slot > end_slot {
                return Ok(None);
            }
            let entry = self.index[self.cur_slot];

            if self.consumed >= entry.num_olaps {
                // Contiguous blocks in the same file need no re-seek.
                let next = self.cur_slot + 1;
                self.positioned = self.positioned
                    && next <= end_slot
                    && self.index[next].file_no == entry.file_no
                    && self.index[next].offset == entry.offset + entry.num_olaps;
                self.cur_slot = next;
                self.consumed = 0;
                continue;
            }

            if !self.positioned {
                let offset = entry.offset + self.consumed;
                let file = self.ensure_file(entry.file_no)?;
                file.seek_overlap(offset as u64)?;
                self.positioned = true;
            }

            let mut ov = Overlap::default();
            let file = self.ensure_file(entry.file_no)?;
            if !file.read_overlap(&mut ov)? {
                return Err(StoreError::IndexCorruption {
                    a_id: entry.a_id,
                    found: 0,
                    file: entry.file_no,
                    offset: entry.offset + self.consumed,
                });
            }
            self.apply_evalue(&mut ov, entry.overlap_id + self.consumed as u64)?;
            self.consumed += 1;
            return Ok(Some(ov));
        }
    }

    /// All overlaps for exactly `a_id`, appended to `out`. Returns the count.
    /// Perturbs and re-seeks the streaming position.
    pub fn read_overlaps_for(&mut self, a_id: u32, out: &mut Vec<Overlap>) -> StoreResult<u32> {
        if self.index.is_empty() || a_id < self.info.smallest_id || a_id > self.info.largest_id {
            return Ok(0);
        }
        let entry = self.index[self.slot(a_id)];
        if entry.num_olaps == 0 {
            return Ok(0);
        }

        self.positioned = false;
        let file = self.ensure_file(entry.file_no)?;
        file.seek_overlap(entry.offset as u64)?;

        out.reserve(entry.num_olaps as usize);
        for i in 0..entry.num_olaps {
            let mut ov = Overlap::default();
            let file = self.ensure_file(entry.file_no)?;
            if !file.read_overlap(&mut ov)? {
                return Err(StoreError::IndexCorruption {
                    a_id: entry.a_id,
                    found: 0,
                    file: entry.file_no,
                    offset: entry.offset + i,
                });
            }
            self.apply_evalue(&mut ov, entry.overlap_id + i as u64)?;
            out.push(ov);
        }
        Ok(entry.num_olaps)
    }

    /// Total overlaps in the configured range.
    pub fn num_overlaps_in_range(&self) -> u64 {
        if self.index.is_empty() {
            return 0;
        }
        self.index[self.slot(self.range_bgn)..=self.slot(self.range_end)]
            .iter()
            .map(|e| e.num_olaps as u64)
            .sum()
    }

    /// Per-read overlap counts for the configured range. Returns the first
    /// read id of the range and one count per id.
    pub fn num_overlaps_per_frag(&self) -> (u32, Vec<u32>) {
        if self.index.is_empty() {
            return (self.range_bgn, Vec::new());
        }
        let counts = self.index[self.slot(self.range_bgn)..=self.slot(self.range_end)]
            .iter()
            .map(|e| e.num_olaps)
            .collect();
        (self.range_bgn, counts)
    }

    /// Install new error values for every overlap of reads `bgn..=end`,
    /// creating the `evalues` overlay on first use. The stored records are
    /// untouched; readers see the overlay.
    pub fn add_evalues(&mut self, bgn: u32, end: u32, evalues: &[u16]) -> StoreResult<()> {
        if bgn < self.info.smallest_id || end > self.info.largest_id || bgn > end {
            return Err(StoreError::OutOfRange {
                bgn,
                end,
                lo: self.info.smallest_id,
                hi: self.info.largest_id,
            });
        }
        if let Some(&bad) = evalues.iter().find(|&&v| v > MAX_EVALUE) {
            return Err(StoreError::Record(RecordError::FieldOverflow {
                field: "evalue",
                value: bad as u64,
                bits: 12,
            }));
        }

        let expected: u64 = self.index[self.slot(bgn)..=self.slot(end)]
            .iter()
            .map(|e| e.num_olaps as u64)
            .sum();
        if expected != evalues.len() as u64 {
            return Err(StoreError::EvalueCountMismatch {
                given: evalues.len() as u64,
                expected,
                bgn,
                end,
            });
        }

        let path = self.path.join("evalues");
        if !path.exists() {
            info!("creating evalue overlay for {}", self.path.display());
            let initial = self.collect_evalues()?;
            let mut w = BufWriter::new(File::create(&path)?);
            for v in initial {
                w.write_u16::<LittleEndian>(v)?;
            }
            w.flush()?;
        }

        let first_id = self.index[self.slot(bgn)].overlap_id;
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.seek(SeekFrom::Start(first_id * 2))?;
        let mut w = BufWriter::new(&mut file);
        for &v in evalues {
            w.write_u16::<LittleEndian>(v)?;
        }
        w.flush()?;
        drop(w);
        file.sync_data()?;

        self.evalues = Some(unsafe { Mmap::map(&file)? });
        Ok(())
    }

    /// Stored evalues of every overlap, in global order.
    fn collect_evalues(&self) -> StoreResult<Vec<u16>> {
        let mut out = Vec::with_capacity(self.info.num_overlaps as usize);
        let mut ov = Overlap::default();
        for file_no in 1..=self.info.highest_file_index {
            let mut reader = OvFileReader::open(data_file_name(&self.path, file_no), Layout::Full)?;
            while reader.read_overlap(&mut ov)? {
                out.push(ov.evalue());
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Builds the dense index as sorted records stream past.
#[derive(Default)]
struct IndexBuilder {
    entries: Vec<OffsetRecord>,
    cur: OffsetRecord,
    have_cur: bool,
    next_id: u64,
}

impl IndexBuilder {
    /// Account one record for `a_id`, landing at `(file_no, offset)`.
    /// `a_id` must be >= the current block's id.
    fn note(&mut self, a_id: u32, file_no: u32, offset: u32) {
        if self.have_cur && self.cur.a_id == a_id {
            self.cur.num_olaps += 1;
            self.next_id += 1;
            return;
        }

        if self.have_cur {
            let gap_bgn = self.cur.a_id + 1;
            self.entries.push(self.cur);
            // Dense index: explicit zero-count entries for absent reads.
            for id in gap_bgn..a_id {
                self.entries.push(OffsetRecord {
                    a_id: id,
                    file_no,
                    offset,
                    num_olaps: 0,
                    overlap_id: self.next_id,
                });
            }
        }

        self.cur = OffsetRecord {
            a_id,
            file_no,
            offset,
            num_olaps: 1,
            overlap_id: self.next_id,
        };
        self.have_cur = true;
        self.next_id += 1;
    }

    fn finish(mut self) -> Vec<OffsetRecord> {
        if self.have_cur {
            self.entries.push(self.cur);
        }
        self.entries
    }
}

/// Streaming store writer. Input must arrive grouped by `a_id`, ascending;
/// records for one read may arrive in any order but identical repeats are
/// dropped.
pub struct OvStoreWriter {
    path: PathBuf,
    max_per_file: u64,
    builder: IndexBuilder,
    file: Option<OvFileWriter>,
    file_index: u32,
    overlaps_this_file: u64,
    written: u64,
    tally: Vec<u32>,
    last: Option<Overlap>,
    dropped_misordered: u64,
    dropped_duplicate: u64,
}

impl OvStoreWriter {
    /// Create a new store directory. Fails if a store already exists there.
    pub fn create<P: AsRef<Path>>(path: P, max_per_file: u64) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.join("info").exists() {
            return Err(StoreError::Exists(path));
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            max_per_file: max_per_file.max(1),
            builder: IndexBuilder::default(),
            file: None,
            file_index: 0,
            overlaps_this_file: 0,
            written: 0,
            tally: Vec::new(),
            last: None,
            dropped_misordered: 0,
            dropped_duplicate: 0,
        })
    }

    pub fn dropped_misordered(&self) -> u64 {
        self.dropped_misordered
    }

    pub fn dropped_duplicate(&self) -> u64 {
        self.dropped_duplicate
    }

    /// Close the current data file, folding its counts side channel into
    /// the global tally.
    fn close_file(&mut self) -> StoreResult<()> {
        if let Some(file) = self.file.take() {
            if let Some(counts) = file.counts() {
                if self.tally.len() < counts.len() {
                    self.tally.resize(counts.len(), 0);
                }
                for (slot, &c) in counts.iter().enumerate() {
                    self.tally[slot] += c;
                }
            }
            file.finish()?;
        }
        Ok(())
    }

    fn roll_file(&mut self) -> StoreResult<()> {
        self.close_file()?;
        self.file_index += 1;
        self.overlaps_this_file = 0;
        let name = data_file_name(&self.path, self.file_index);
        debug!("store {}: starting {}", self.path.display(), name.display());
        self.file = Some(OvFileWriter::create(name, WriteMode::FullNoCounts)?);
        Ok(())
    }

    pub fn write_overlap(&mut self, ov: &Overlap) -> StoreResult<()> {
        if let Some(last) = &self.last {
            if ov.a_id < last.a_id {
                warn!(
                    "dropping misordered overlap {}-{} (store is at read {})",
                    ov.a_id, ov.b_id, last.a_id
                );
                self.dropped_misordered += 1;
                return Ok(());
            }
            if ov == last {
                debug!("dropping duplicate overlap {}-{}", ov.a_id, ov.b_id);
                self.dropped_duplicate += 1;
                return Ok(());
            }
        }

        let new_block = self.last.map_or(true, |l| l.a_id != ov.a_id);
        // Files roll only at read boundaries so a read's block never spans
        // two files.
        if new_block && (self.file.is_none() || self.overlaps_this_file >= self.max_per_file) {
            self.roll_file()?;
        }

        self.builder
            .note(ov.a_id, self.file_index, self.overlaps_this_file as u32);

        match self.file.as_mut() {
            Some(f) => f.write_overlap(ov)?,
            None => unreachable!("roll_file opens the first data file"),
        }

        self.overlaps_this_file += 1;
        self.written += 1;
        self.last = Some(*ov);
        Ok(())
    }

    pub fn write_overlaps(&mut self, overlaps: &[Overlap]) -> StoreResult<()> {
        for ov in overlaps {
            self.write_overlap(ov)?;
        }
        Ok(())
    }

    /// Finalize: write the index and info files, cross-checking the index
    /// against the per-read counts tracked by the data file writers.
    pub fn finish(mut self) -> StoreResult<StoreInfo> {
        self.close_file()?;

        let entries = self.builder.finish();
        for e in &entries {
            let written = self.tally.get(e.a_id as usize).copied().unwrap_or(0);
            if written != e.num_olaps {
                return Err(StoreError::CountMismatch {
                    a_id: e.a_id,
                    indexed: e.num_olaps,
                    written,
                });
            }
        }

        let info = StoreInfo {
            smallest_id: entries.first().map_or(0, |e| e.a_id),
            largest_id: entries.last().map_or(0, |e| e.a_id),
            num_overlaps: self.written,
            highest_file_index: self.file_index,
            max_readlen_bits: MAX_READLEN_BITS,
        };

        write_index_file(&self.path.join("index"), &entries)?;
        info.write_to(&self.path.join("info"))?;

        info!(
            "store {}: {} overlaps for reads {}..={} in {} files",
            self.path.display(),
            info.num_overlaps,
            info.smallest_id,
            info.largest_id,
            info.highest_file_index
        );
        Ok(info)
    }
}

// ---------------------------------------------------------------------------
// Segmented construction
// ---------------------------------------------------------------------------

/// Write one pre-sorted bucket of overlaps as store segment `file_id`:
/// `####.ovb` plus per-segment `####.index` and `####.info`, to be merged by
/// [`merge_info_files`]. Buckets must cover disjoint, ascending read ranges.
pub fn write_sorted_segment<P: AsRef<Path>>(
    path: P,
    overlaps: &[Overlap],
    file_id: u32,
) -> StoreResult<()> {
    let path = path.as_ref();
    std::fs::create_dir_all(path)?;

    let mut writer = OvFileWriter::create(data_file_name(path, file_id), WriteMode::FullNoCounts)?;
    let mut builder = IndexBuilder::default();
    let mut last: Option<&Overlap> = None;
    let mut offset = 0u32;

    for ov in overlaps {
        if let Some(last) = last {
            if ov.a_id < last.a_id {
                warn!(
                    "segment {}: dropping misordered overlap {}-{}",
                    file_id, ov.a_id, ov.b_id
                );
                continue;
            }
        }
        builder.note(ov.a_id, file_id, offset);
        writer.write_overlap(ov)?;
        offset += 1;
        last = Some(ov);
    }
    writer.finish()?;

    let entries = builder.finish();
    let info = StoreInfo {
        smallest_id: entries.first().map_or(0, |e| e.a_id),
        largest_id: entries.last().map_or(0, |e| e.a_id),
        num_overlaps: offset as u64,
        highest_file_index: file_id,
        max_readlen_bits: MAX_READLEN_BITS,
    };

    write_index_file(&path.join(format!("{file_id:04}.index")), &entries)?;
    info.write_to(&path.join(format!("{file_id:04}.info")))?;
    Ok(())
}

/// Merge per-segment index and info files into the final store `index` and
/// `info`, renumbering overlap sequence ids across segments and filling the
/// read-id gaps between segments.
pub fn merge_info_files<P: AsRef<Path>>(path: P, num_pieces: u32) -> StoreResult<StoreInfo> {
    let path = path.as_ref();
    let mut merged: Vec<OffsetRecord> = Vec::new();
    let mut total = 0u64;
    let mut smallest = 0u32;
    let mut largest = 0u32;

    for piece in 1..=num_pieces {
        let piece_info = StoreInfo::read_from(&path.join(format!("{piece:04}.info")))?;
        let entries = read_index_file(&path.join(format!("{piece:04}.index")))?;

        if piece_info.num_overlaps == 0 {
            continue;
        }
        if merged.is_empty() {
            smallest = piece_info.smallest_id;
        } else {
            if piece_info.smallest_id <= largest {
                return Err(StoreError::SegmentOrder(piece));
            }
            // Reads falling between two segments get zero-count entries.
            for id in largest + 1..piece_info.smallest_id {
                merged.push(OffsetRecord {
                    a_id: id,
                    file_no: piece,
                    offset: 0,
                    num_olaps: 0,
                    overlap_id: total,
                });
            }
        }

        for mut e in entries {
            e.overlap_id += total;
            merged.push(e);
        }
        total += piece_info.num_overlaps;
        largest = piece_info.largest_id;
    }

    let info = StoreInfo {
        smallest_id: smallest,
        largest_id: largest,
        num_overlaps: total,
        highest_file_index: num_pieces,
        max_readlen_bits: MAX_READLEN_BITS,
    };

    write_index_file(&path.join("index"), &merged)?;
    info.write_to(&path.join("info"))?;

    for piece in 1..=num_pieces {
        let _ = std::fs::remove_file(path.join(format!("{piece:04}.index")));
        let _ = std::fs::remove_file(path.join(format!("{piece:04}.info")));
    }

    info!(
        "merged {} segments: {} overlaps for reads {}..={}",
        num_pieces, total, smallest, largest
    );
    Ok(info)
}

// ---------------------------------------------------------------------------
// Bulk construction
// ---------------------------------------------------------------------------

/// Outcome of a bulk [`build_store`] run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildStats {
    /// Candidate pairs read from the dump files.
    pub candidates: u64,
    /// Records written (both directions of every surviving pair).
    pub written: u64,
    /// Records dropped because no purpose retained them.
    pub unretained: u64,
    pub dropped_misordered: u64,
    pub dropped_duplicate: u64,
    pub filter: FilterStats,
}

/// Build a store from overlapper dump files (full layout, optionally
/// gzipped). Each input record is one pair; both the forward and the
/// swapped record are flagged by the filter and persisted when any purpose
/// retains them.
pub fn build_store<P: AsRef<Path>, R: ReadStore + ?Sized>(
    store_path: P,
    dump_files: &[PathBuf],
    reads: &R,
    max_erate: f64,
    max_per_file: u64,
) -> StoreResult<(StoreInfo, BuildStats)> {
    let mut filter = OverlapFilter::new(reads, max_erate);
    let mut stats = BuildStats::default();
    let mut all: Vec<Overlap> = Vec::new();

    for dump in dump_files {
        info!("reading overlaps from {}", dump.display());
        let mut reader = OvFileReader::open(dump, Layout::Full)?;
        let mut ov = Overlap::default();
        while reader.read_overlap(&mut ov)? {
            stats.candidates += 1;
            let mut fwd = ov;
            let mut rev = ov.swap_ids();
            filter.filter_overlap(&mut fwd, &mut rev);
            for rec in [fwd, rev] {
                if rec.for_utg() || rec.for_obt() || rec.for_dup() {
                    all.push(rec);
                } else {
                    stats.unretained += 1;
                }
            }
        }
    }

    info!("sorting {} overlap records", all.len());
    all.par_sort_unstable();

    let mut writer = OvStoreWriter::create(store_path, max_per_file)?;
    writer.write_overlaps(&all)?;
    stats.dropped_misordered = writer.dropped_misordered();
    stats.dropped_duplicate = writer.dropped_duplicate();
    let info = writer.finish()?;

    stats.written = info.num_overlaps;
    stats.filter = filter.stats().clone();
    filter.report_fate();

    Ok((info, stats))
}

// ---------------------------------------------------------------------------
// Verification and repair
// ---------------------------------------------------------------------------

/// Check that every index entry resolves to a record with the entry's
/// read id and that the header totals agree with the index. With `fix`, a
/// broken index is regenerated by rescanning the data files. Returns true
/// when the index was already valid.
pub fn test_index<P: AsRef<Path>>(path: P, fix: bool) -> StoreResult<bool> {
    let path = path.as_ref();
    let info = StoreInfo::read_from(&path.join("info"))?;
    let index = read_index_file(&path.join("index"))?;

    let mut valid = true;

    let expected_len = if info.num_overlaps == 0 && index.is_empty() {
        0
    } else {
        (info.largest_id - info.smallest_id) as usize + 1
    };
    if index.len() != expected_len {
        warn!(
            "index holds {} entries, expected {}",
            index.len(),
            expected_len
        );
        valid = false;
    }

    let mut running = 0u64;
    let mut reader: Option<(u32, OvFileReader)> = None;

    for (i, e) in index.iter().enumerate() {
        if e.a_id != info.smallest_id + i as u32 {
            warn!("entry {} names read {}, expected {}", i, e.a_id, info.smallest_id + i as u32);
            valid = false;
            break;
        }
        if e.overlap_id != running {
            warn!(
                "read {}: block starts at overlap {}, expected {}",
                e.a_id, e.overlap_id, running
            );
            valid = false;
        }
        running += e.num_olaps as u64;

        if e.num_olaps == 0 {
            continue;
        }

        let needs_open = reader.as_ref().map_or(true, |(no, _)| *no != e.file_no);
        if needs_open {
            reader = Some((
                e.file_no,
                OvFileReader::open(data_file_name(path, e.file_no), Layout::Full)?,
            ));
        }
        if let Some((_, r)) = reader.as_mut() {
            r.seek_overlap(e.offset as u64)?;
            let mut ov = Overlap::default();
            if !r.read_overlap(&mut ov)? || ov.a_id != e.a_id {
                warn!(
                    "read {}: index points at read {} (file {}, offset {})",
                    e.a_id, ov.a_id, e.file_no, e.offset
                );
                valid = false;
            }
        }
    }

    if running != info.num_overlaps {
        warn!(
            "index counts {} overlaps, header claims {}",
            running, info.num_overlaps
        );
        valid = false;
    }

    if !valid && fix {
        info!("rebuilding index for {}", path.display());
        rebuild_index(path, &info)?;
    }

    Ok(valid)
}

/// Regenerate `index` and `info` by scanning the data files in order.
fn rebuild_index(path: &Path, old: &StoreInfo) -> StoreResult<()> {
    let mut builder = IndexBuilder::default();
    let mut total = 0u64;

    for file_no in 1..=old.highest_file_index {
        let mut reader = OvFileReader::open(data_file_name(path, file_no), Layout::Full)?;
        let mut ov = Overlap::default();
        let mut offset = 0u32;
        while reader.read_overlap(&mut ov)? {
            builder.note(ov.a_id, file_no, offset);
            offset += 1;
            total += 1;
        }
    }

    let entries = builder.finish();
    let info = StoreInfo {
        smallest_id: entries.first().map_or(0, |e| e.a_id),
        largest_id: entries.last().map_or(0, |e| e.a_id),
        num_overlaps: total,
        highest_file_index: old.highest_file_index,
        max_readlen_bits: MAX_READLEN_BITS,
    };

    write_index_file(&path.join("index"), &entries)?;
    info.write_to(&path.join("info"))?;
    Ok(())
}
