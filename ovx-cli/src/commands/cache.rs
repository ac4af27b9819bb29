//! Cache command implementation - prebuild an overlap cache snapshot

use anyhow::{Context, Result};
use ovx_core::cache::{CacheParams, OverlapCache};
use std::path::PathBuf;

pub fn execute(
    store: PathBuf,
    repeats: Option<PathBuf>,
    out: PathBuf,
    max_erate: f64,
    min_overlap: u32,
    memory_gb: f64,
    max_per_read: u32,
) -> Result<()> {
    let params = CacheParams {
        max_erate,
        min_overlap,
        mem_limit: (memory_gb * (1u64 << 30) as f64) as u64,
        max_per_read,
    };

    log::info!(
        "Loading cache from {} within {} bytes",
        store.display(),
        params.mem_limit
    );

    let cache = OverlapCache::new(&store, repeats.as_ref(), &params)
        .context("Failed to load overlap cache")?;

    let path = cache
        .save(&out)
        .with_context(|| format!("Failed to save snapshot {}", out.display()))?;

    let (lo, hi) = cache.range();
    println!(
        "{}: {} overlaps cached for reads {}..={} in {} bytes (at most {} per read)",
        path.display(),
        cache.num_cached(),
        lo,
        hi,
        cache.mem_used(),
        cache.max_per_read()
    );
    Ok(())
}
