//! Read metadata collaborator.
//!
//! The overlap engine never stores sequence; it only needs, per read, the
//! length, the owning library, and that library's downstream policy. The
//! production read store lives elsewhere and plugs in through [`ReadStore`];
//! [`ReadIndex`] is a small table-backed implementation used by the CLI and
//! the test suite.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid reads table line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Final-trim behavior requested for a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimMode {
    #[default]
    None,
    LargestCovered,
    BestEdge,
}

impl TrimMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "none" | "0" => Some(TrimMode::None),
            "largest-covered" | "1" => Some(TrimMode::LargestCovered),
            "best-edge" | "2" => Some(TrimMode::BestEdge),
            _ => None,
        }
    }
}

/// Per-library retention policy consulted while flagging overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryPolicy {
    pub remove_duplicate_reads: bool,
    pub final_trim: TrimMode,
    pub remove_spur_reads: bool,
    pub remove_chimeric_reads: bool,
    pub check_for_subreads: bool,
}

impl Default for LibraryPolicy {
    fn default() -> Self {
        Self {
            remove_duplicate_reads: true,
            final_trim: TrimMode::LargestCovered,
            remove_spur_reads: true,
            remove_chimeric_reads: true,
            check_for_subreads: false,
        }
    }
}

impl LibraryPolicy {
    /// True when no downstream stage will ever look at this library's
    /// overlaps for trimming purposes.
    pub fn skips_trimming(&self) -> bool {
        !self.remove_duplicate_reads
            && self.final_trim == TrimMode::None
            && !self.remove_spur_reads
            && !self.remove_chimeric_reads
            && !self.check_for_subreads
    }
}

/// Read-metadata lookups needed by the overlap engine.
///
/// Read ids are dense and 1-based; id 0 is reserved and never queried.
pub trait ReadStore {
    fn num_reads(&self) -> u32;
    fn read_length(&self, id: u32) -> u32;
    fn library_id(&self, id: u32) -> u32;
    fn library(&self, lib: u32) -> &LibraryPolicy;
}

/// Table-backed [`ReadStore`].
///
/// Loaded from a tab-separated file with one read per line:
/// `read_id <TAB> length <TAB> library_id`, and optional library policy
/// lines `L <TAB> library_id <TAB> dup <TAB> trim <TAB> spur <TAB> chimera
/// <TAB> subreads` (booleans as 0/1, trim as none/largest-covered/best-edge).
/// Libraries without a policy line get [`LibraryPolicy::default`].
#[derive(Debug, Default)]
pub struct ReadIndex {
    lengths: Vec<u32>,
    libraries: Vec<u32>,
    policies: Vec<LibraryPolicy>,
}

impl ReadIndex {
    pub fn new() -> Self {
        Self {
            lengths: vec![0],
            libraries: vec![0],
            policies: vec![LibraryPolicy::default()],
        }
    }

    /// Append a read; ids are assigned densely starting at 1.
    pub fn add_read(&mut self, length: u32, library: u32) -> u32 {
        if self.lengths.is_empty() {
            self.lengths.push(0);
            self.libraries.push(0);
        }
        let id = self.lengths.len() as u32;
        self.lengths.push(length);
        self.libraries.push(library);
        while self.policies.len() <= library as usize {
            self.policies.push(LibraryPolicy::default());
        }
        id
    }

    pub fn set_library_policy(&mut self, library: u32, policy: LibraryPolicy) {
        while self.policies.len() <= library as usize {
            self.policies.push(LibraryPolicy::default());
        }
        self.policies[library as usize] = policy;
    }

    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self, ReadsError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut index = ReadIndex::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();

            if fields[0] == "L" {
                index.parse_library_line(&fields, lineno + 1)?;
                continue;
            }

            if fields.len() < 3 {
                return Err(ReadsError::Parse {
                    line: lineno + 1,
                    reason: format!("expected 3 fields, got {}", fields.len()),
                });
            }

            let id: u32 = fields[0].parse().map_err(|_| ReadsError::Parse {
                line: lineno + 1,
                reason: format!("invalid read id: {}", fields[0]),
            })?;
            let length: u32 = fields[1].parse().map_err(|_| ReadsError::Parse {
                line: lineno + 1,
                reason: format!("invalid length: {}", fields[1]),
            })?;
            let library: u32 = fields[2].parse().map_err(|_| ReadsError::Parse {
                line: lineno + 1,
                reason: format!("invalid library id: {}", fields[2]),
            })?;

            let assigned = index.add_read(length, library);
            if assigned != id {
                return Err(ReadsError::Parse {
                    line: lineno + 1,
                    reason: format!("read ids must be dense; expected {assigned}, got {id}"),
                });
            }
        }

        Ok(index)
    }

    fn parse_library_line(&mut self, fields: &[&str], lineno: usize) -> Result<(), ReadsError> {
        if fields.len() < 7 {
            return Err(ReadsError::Parse {
                line: lineno,
                reason: format!("library line expects 7 fields, got {}", fields.len()),
            });
        }
        let lib: u32 = fields[1].parse().map_err(|_| ReadsError::Parse {
            line: lineno,
            reason: format!("invalid library id: {}", fields[1]),
        })?;
        let flag = |s: &str| -> Option<bool> {
            match s {
                "0" => Some(false),
                "1" => Some(true),
                _ => None,
            }
        };
        let policy = LibraryPolicy {
            remove_duplicate_reads: flag(fields[2]).ok_or_else(|| ReadsError::Parse {
                line: lineno,
                reason: format!("invalid flag: {}", fields[2]),
            })?,
            final_trim: TrimMode::parse(fields[3]).ok_or_else(|| ReadsError::Parse {
                line: lineno,
                reason: format!("invalid trim mode: {}", fields[3]),
            })?,
            remove_spur_reads: flag(fields[4]).ok_or_else(|| ReadsError::Parse {
                line: lineno,
                reason: format!("invalid flag: {}", fields[4]),
            })?,
            remove_chimeric_reads: flag(fields[5]).ok_or_else(|| ReadsError::Parse {
                line: lineno,
                reason: format!("invalid flag: {}", fields[5]),
            })?,
            check_for_subreads: flag(fields[6]).ok_or_else(|| ReadsError::Parse {
                line: lineno,
                reason: format!("invalid flag: {}", fields[6]),
            })?,
        };
        self.set_library_policy(lib, policy);
        Ok(())
    }
}

impl ReadStore for ReadIndex {
    fn num_reads(&self) -> u32 {
        (self.lengths.len() - 1) as u32
    }

    fn read_length(&self, id: u32) -> u32 {
        self.lengths[id as usize]
    }

    fn library_id(&self, id: u32) -> u32 {
        self.libraries[id as usize]
    }

    fn library(&self, lib: u32) -> &LibraryPolicy {
        &self.policies[lib as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_add_read_assigns_dense_ids() {
        let mut index = ReadIndex::new();
        assert_eq!(index.add_read(1000, 1), 1);
        assert_eq!(index.add_read(2000, 1), 2);
        assert_eq!(index.num_reads(), 2);
        assert_eq!(index.read_length(2), 2000);
        assert_eq!(index.library_id(1), 1);
    }

    #[test]
    fn test_from_tsv_with_policies() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "# reads").unwrap();
        writeln!(f, "L\t1\t0\tnone\t0\t0\t0").unwrap();
        writeln!(f, "1\t1500\t1").unwrap();
        writeln!(f, "2\t900\t2").unwrap();
        let index = ReadIndex::from_tsv(f.path()).unwrap();

        assert_eq!(index.num_reads(), 2);
        assert_eq!(index.read_length(1), 1500);
        assert!(index.library(1).skips_trimming());
        assert!(!index.library(2).skips_trimming());
        assert!(index.library(2).remove_duplicate_reads);
    }

    #[test]
    fn test_from_tsv_rejects_sparse_ids() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "1\t1500\t1").unwrap();
        writeln!(f, "5\t900\t1").unwrap();
        assert!(ReadIndex::from_tsv(f.path()).is_err());
    }
}
