//! Verify command implementation - index consistency check and repair

use anyhow::{anyhow, Result};
use ovx_core::store::test_index;
use std::path::PathBuf;

pub fn execute(store: PathBuf, fix: bool) -> Result<()> {
    log::info!("Verifying index of {}", store.display());

    let valid = test_index(&store, fix)?;

    if valid {
        println!("{}: index is consistent", store.display());
        return Ok(());
    }

    if fix {
        // The rebuild already ran; confirm it took.
        if test_index(&store, false)? {
            println!("{}: index was broken and has been rebuilt", store.display());
            return Ok(());
        }
        return Err(anyhow!(
            "{}: index rebuild failed; the data files are damaged",
            store.display()
        ));
    }

    Err(anyhow!(
        "{}: index is corrupt (run with --fix to rebuild)",
        store.display()
    ))
}
