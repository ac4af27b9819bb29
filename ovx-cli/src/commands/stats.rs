//! Stats command implementation - store header and per-read summary

use anyhow::{Context, Result};
use ovx_core::store::OvStore;
use std::path::PathBuf;

pub fn execute(store: PathBuf) -> Result<()> {
    let mut store = OvStore::open(&store)
        .with_context(|| format!("Failed to open store {}", store.display()))?;

    let info = *store.info();
    let (first, counts) = store.num_overlaps_per_frag();

    let reads_with = counts.iter().filter(|&&c| c > 0).count();
    let max = counts.iter().copied().max().unwrap_or(0);
    let mean = if reads_with > 0 {
        info.num_overlaps as f64 / reads_with as f64
    } else {
        0.0
    };

    println!("store            {}", store.path().display());
    println!("reads            {}..={}", info.smallest_id, info.largest_id);
    println!("overlaps         {}", info.num_overlaps);
    println!("data files       {}", info.highest_file_index);
    println!("read length bits {}", info.max_readlen_bits);
    println!("reads w/overlaps {}", reads_with);
    println!("max per read     {} (read {})", max, {
        let at = counts.iter().position(|&c| c == max).unwrap_or(0);
        first + at as u32
    });
    println!("mean per read    {:.1}", mean);
    Ok(())
}
