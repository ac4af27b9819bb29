//! Dump command implementation - print store contents as text

use crate::FormatType;
use anyhow::{anyhow, Context, Result};
use ovx_core::reads::ReadIndex;
use ovx_core::record::DisplayFormat;
use ovx_core::store::OvStore;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

fn parse_range(spec: &str) -> Result<(u32, u32)> {
    let (lo, hi) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("Range must look like LO:HI, got {spec}"))?;
    let lo: u32 = lo.parse().with_context(|| format!("Bad range start {lo}"))?;
    let hi: u32 = hi.parse().with_context(|| format!("Bad range end {hi}"))?;
    if lo > hi {
        return Err(anyhow!("Range start {lo} is past range end {hi}"));
    }
    Ok((lo, hi))
}

pub fn execute(
    store: PathBuf,
    reads: PathBuf,
    format: FormatType,
    range: Option<String>,
) -> Result<()> {
    let reads = ReadIndex::from_tsv(&reads)
        .with_context(|| format!("Failed to load reads table {}", reads.display()))?;
    let mut store = OvStore::open(&store)
        .with_context(|| format!("Failed to open store {}", store.display()))?;

    if let Some(spec) = range {
        let (lo, hi) = parse_range(&spec)?;
        store.set_range(lo, hi);
    }

    let format = match format {
        FormatType::Hangs => DisplayFormat::Hangs,
        FormatType::Coords => DisplayFormat::Coords,
        FormatType::Raw => DisplayFormat::Raw,
        FormatType::Paf => DisplayFormat::Paf,
    };

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    while let Some(ov) = store.read_overlap()? {
        writeln!(out, "{}", ov.format(format, &reads))?;
    }
    out.flush()?;
    Ok(())
}
