//! Build command implementation - bulk-sort overlapper output into a store

use anyhow::{anyhow, Context, Result};
use ovx_core::reads::ReadIndex;
use ovx_core::store::build_store;
use std::fs::File;
use std::path::PathBuf;

pub fn execute(
    dump: Vec<PathBuf>,
    reads: PathBuf,
    out: PathBuf,
    max_erate: f64,
    max_per_file: u64,
    stats_json: Option<PathBuf>,
) -> Result<()> {
    log::info!("Building overlap store {}", out.display());

    for d in &dump {
        if !d.exists() {
            return Err(anyhow!("Dump file does not exist: {}", d.display()));
        }
    }
    if !(0.0..=1.0).contains(&max_erate) {
        return Err(anyhow!("--max-erate must be a fraction, got {max_erate}"));
    }

    let reads = ReadIndex::from_tsv(&reads)
        .with_context(|| format!("Failed to load reads table {}", reads.display()))?;

    let (info, stats) = build_store(&out, &dump, &reads, max_erate, max_per_file)
        .context("Failed to build overlap store")?;

    if let Some(path) = stats_json {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &stats).context("Failed to write build stats")?;
        log::info!("Wrote build stats to {}", path.display());
    }

    println!(
        "{}: {} overlaps for reads {}..={} in {} data files ({} candidate pairs)",
        out.display(),
        info.num_overlaps,
        info.smallest_id,
        info.largest_id,
        info.highest_file_index,
        stats.candidates
    );
    Ok(())
}
