//! Buffered binary overlap streams.
//!
//! An overlap file is a flat sequence of fixed-width records in one of two
//! layouts: "normal" stores only the b read id (the a id is implied by store
//! structure) and "full" stores both ids (overlapper output, store
//! construction input, dumps). Files whose name ends in `.gz` are gzip
//! transported; compressed files cannot seek.

use crate::record::{Overlap, WORDS_PER_OVERLAP};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default IO buffer, amortizing syscalls across records.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated overlap record in {path} (got {got} of {want} bytes)")]
    Truncated { path: PathBuf, got: usize, want: usize },

    #[error("cannot seek compressed overlap file {0}")]
    SeekUnsupported(PathBuf),

    #[error("counts sidecar missing for {0}")]
    NoCounts(PathBuf),
}

/// Record layout of an overlap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// b_id only; 28 bytes per record.
    Normal,
    /// a_id + b_id; 32 bytes per record.
    Full,
}

impl Layout {
    pub fn record_size(self) -> usize {
        let ids = match self {
            Layout::Normal => 1,
            Layout::Full => 2,
        };
        4 * ids + 8 * WORDS_PER_OVERLAP
    }
}

/// Write mode of an overlap file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Normal layout, no counts side channel.
    Normal,
    /// Full layout; per-a_id counts persisted to a `.counts` sidecar on
    /// finish (overlapper output, consumed by the bucket sorter).
    Full,
    /// Full layout; counts tracked in memory but never persisted. Used
    /// internally by the final counted pass of store construction.
    FullNoCounts,
}

impl WriteMode {
    pub fn layout(self) -> Layout {
        match self {
            WriteMode::Normal => Layout::Normal,
            WriteMode::Full | WriteMode::FullNoCounts => Layout::Full,
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

enum ReadTransport {
    Plain(BufReader<File>),
    Gzip(Box<GzDecoder<BufReader<File>>>),
}

impl Read for ReadTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadTransport::Plain(r) => r.read(buf),
            ReadTransport::Gzip(r) => r.read(buf),
        }
    }
}

/// Buffered reader over a sequence of overlap records.
pub struct OvFileReader {
    path: PathBuf,
    layout: Layout,
    transport: ReadTransport,
}

impl OvFileReader {
    pub fn open<P: AsRef<Path>>(path: P, layout: Layout) -> Result<Self, FileError> {
        Self::with_buffer_size(path, layout, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size<P: AsRef<Path>>(
        path: P,
        layout: Layout,
        buffer_size: usize,
    ) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        let file = BufReader::with_capacity(buffer_size, File::open(&path)?);
        let transport = if is_gzip(&path) {
            ReadTransport::Gzip(Box::new(GzDecoder::new(file)))
        } else {
            ReadTransport::Plain(file)
        };
        Ok(Self {
            path,
            layout,
            transport,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn record_size(&self) -> usize {
        self.layout.record_size()
    }

    fn fill_record(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        let mut got = 0;
        while got < buf.len() {
            match self.transport.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(got)
    }

    /// Read the next record into `overlap`. Returns false at a clean end of
    /// stream; a record cut short mid-stream is a fatal error.
    pub fn read_overlap(&mut self, overlap: &mut Overlap) -> Result<bool, FileError> {
        let want = self.record_size();
        let mut bytes = [0u8; 4 * 2 + 8 * WORDS_PER_OVERLAP];
        let got = self.fill_record(&mut bytes[..want])?;

        if got == 0 {
            return Ok(false);
        }
        if got < want {
            return Err(FileError::Truncated {
                path: self.path.clone(),
                got,
                want,
            });
        }

        let mut cur = &bytes[..want];
        if self.layout == Layout::Full {
            overlap.a_id = cur.read_u32::<LittleEndian>()?;
        }
        overlap.b_id = cur.read_u32::<LittleEndian>()?;
        let mut words = [0u64; WORDS_PER_OVERLAP];
        for w in words.iter_mut() {
            *w = cur.read_u64::<LittleEndian>()?;
        }
        overlap.set_words(words);
        Ok(true)
    }

    /// Read up to `overlaps.len()` records; returns the number read.
    pub fn read_overlaps(&mut self, overlaps: &mut [Overlap]) -> Result<usize, FileError> {
        let mut n = 0;
        while n < overlaps.len() {
            if !self.read_overlap(&mut overlaps[n])? {
                break;
            }
            n += 1;
        }
        Ok(n)
    }

    /// Position the stream at the given record index. Uncompressed files
    /// only.
    pub fn seek_overlap(&mut self, record: u64) -> Result<(), FileError> {
        match &mut self.transport {
            ReadTransport::Plain(r) => {
                r.seek(SeekFrom::Start(record * self.layout.record_size() as u64))?;
                Ok(())
            }
            ReadTransport::Gzip(_) => Err(FileError::SeekUnsupported(self.path.clone())),
        }
    }
}

enum WriteTransport {
    Plain(BufWriter<File>),
    Gzip(Box<GzEncoder<BufWriter<File>>>),
}

impl Write for WriteTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            WriteTransport::Plain(w) => w.write(buf),
            WriteTransport::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            WriteTransport::Plain(w) => w.flush(),
            WriteTransport::Gzip(w) => w.flush(),
        }
    }
}

/// Buffered writer for a sequence of overlap records.
pub struct OvFileWriter {
    path: PathBuf,
    mode: WriteMode,
    transport: WriteTransport,
    counts: Option<Vec<u32>>,
    written: u64,
}

impl OvFileWriter {
    pub fn create<P: AsRef<Path>>(path: P, mode: WriteMode) -> Result<Self, FileError> {
        Self::with_buffer_size(path, mode, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size<P: AsRef<Path>>(
        path: P,
        mode: WriteMode,
        buffer_size: usize,
    ) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::with_capacity(buffer_size, File::create(&path)?);
        let transport = if is_gzip(&path) {
            WriteTransport::Gzip(Box::new(GzEncoder::new(file, Compression::default())))
        } else {
            WriteTransport::Plain(file)
        };
        let counts = match mode {
            WriteMode::Normal => None,
            WriteMode::Full | WriteMode::FullNoCounts => Some(Vec::new()),
        };
        Ok(Self {
            path,
            mode,
            transport,
            counts,
            written: 0,
        })
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Overlaps written so far per a_id, when the mode tracks them.
    pub fn counts(&self) -> Option<&[u32]> {
        self.counts.as_deref()
    }

    pub fn write_overlap(&mut self, overlap: &Overlap) -> Result<(), FileError> {
        if self.mode.layout() == Layout::Full {
            self.transport.write_u32::<LittleEndian>(overlap.a_id)?;
        }
        self.transport.write_u32::<LittleEndian>(overlap.b_id)?;
        for w in overlap.words() {
            self.transport.write_u64::<LittleEndian>(w)?;
        }

        if let Some(counts) = &mut self.counts {
            let slot = overlap.a_id as usize;
            if counts.len() <= slot {
                counts.resize(slot + 1, 0);
            }
            counts[slot] += 1;
        }
        self.written += 1;
        Ok(())
    }

    pub fn write_overlaps(&mut self, overlaps: &[Overlap]) -> Result<(), FileError> {
        for ov in overlaps {
            self.write_overlap(ov)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), FileError> {
        self.transport.flush()?;
        Ok(())
    }

    /// Flush and close, persisting the `.counts` sidecar in [`WriteMode::Full`].
    pub fn finish(self) -> Result<u64, FileError> {
        match self.transport {
            WriteTransport::Plain(mut w) => w.flush()?,
            WriteTransport::Gzip(w) => {
                w.finish()?.flush()?;
            }
        }

        if self.mode == WriteMode::Full {
            if let Some(counts) = &self.counts {
                let mut w = BufWriter::new(File::create(counts_path(&self.path))?);
                w.write_u32::<LittleEndian>(counts.len() as u32)?;
                for &c in counts {
                    w.write_u32::<LittleEndian>(c)?;
                }
                w.flush()?;
            }
        }

        Ok(self.written)
    }
}

fn counts_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".counts");
    PathBuf::from(name)
}

/// Load the per-a_id counts sidecar written next to a full-layout file.
pub fn read_counts<P: AsRef<Path>>(path: P) -> Result<Vec<u32>, FileError> {
    let path = counts_path(path.as_ref());
    let file = File::open(&path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            FileError::NoCounts(path.clone())
        } else {
            e.into()
        }
    })?;
    let mut r = BufReader::new(file);
    let n = r.read_u32::<LittleEndian>()? as usize;
    let mut counts = vec![0u32; n];
    for c in counts.iter_mut() {
        *c = r.read_u32::<LittleEndian>()?;
    }
    Ok(counts)
}
