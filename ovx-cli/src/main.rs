use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "ovx")]
#[command(about = "OvX - Overlap Store & Cache Engine")]
#[command(version)]
#[command(long_about = "
OvX stores billions of pairwise read overlaps in a compact, sorted,
indexed on-disk format and loads bounded per-read working sets into
memory for assembly graph construction.

Examples:
  ovx build --dump olaps.ovb.gz --reads reads.tsv --out asm.ovx
  ovx dump --store asm.ovx --reads reads.tsv --format paf
  ovx verify --store asm.ovx --fix
  ovx cache --store asm.ovx --memory-gb 4 --out asm
  ovx stats --store asm.ovx
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Number of threads to use
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a sorted overlap store from overlapper dump files
    Build {
        /// Full-layout dump files (optionally gzipped)
        #[arg(long, required = true, num_args = 1..)]
        dump: Vec<PathBuf>,

        /// Reads table (id, length, library; library policy lines optional)
        #[arg(long, required = true)]
        reads: PathBuf,

        /// Output store directory
        #[arg(short, long, required = true)]
        out: PathBuf,

        /// Error ceiling for assembly retention
        #[arg(long, default_value_t = 0.06)]
        max_erate: f64,

        /// Target overlaps per data file
        #[arg(long, default_value_t = ovx_core::store::DEFAULT_OVERLAPS_PER_FILE)]
        max_per_file: u64,

        /// Write the filter/build tally as JSON
        #[arg(long)]
        stats_json: Option<PathBuf>,
    },

    /// Print overlaps from a store
    Dump {
        /// Store directory
        #[arg(long, required = true)]
        store: PathBuf,

        /// Reads table, for coordinate and PAF output
        #[arg(long, required = true)]
        reads: PathBuf,

        /// Output format
        #[arg(long, default_value = "hangs")]
        format: FormatType,

        /// Restrict to a read id range, e.g. 100:2000
        #[arg(long)]
        range: Option<String>,
    },

    /// Check that the store index resolves correctly; optionally repair it
    Verify {
        /// Store directory
        #[arg(long, required = true)]
        store: PathBuf,

        /// Rebuild the index from the data files if it is broken
        #[arg(long)]
        fix: bool,
    },

    /// Summarize a store's header and per-read counts
    Stats {
        /// Store directory
        #[arg(long, required = true)]
        store: PathBuf,
    },

    /// Load a store into an overlap cache and save the snapshot
    Cache {
        /// Unique-overlap store directory
        #[arg(long, required = true)]
        store: PathBuf,

        /// Repeat/duplicate-overlap store directory
        #[arg(long)]
        repeats: Option<PathBuf>,

        /// Snapshot prefix; writes <prefix>.ovc
        #[arg(short, long, required = true)]
        out: PathBuf,

        /// Error ceiling for loaded overlaps
        #[arg(long, default_value_t = 0.12)]
        max_erate: f64,

        /// Shortest overlap span loaded
        #[arg(long, default_value_t = 40)]
        min_overlap: u32,

        /// Memory budget in GiB
        #[arg(long, default_value_t = 4.0)]
        memory_gb: f64,

        /// Hard cap on overlaps per read (0 = budget only)
        #[arg(long, default_value_t = 0)]
        max_per_read: u32,
    },
}

/// Dump output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatType {
    /// a-hang / b-hang form
    Hangs,
    /// Begin/end coordinates on each read
    Coords,
    /// All four raw hangs plus flags
    Raw,
    /// PAF lines
    Paf,
}

fn setup_logging(verbose: u8, quiet: bool) -> Result<()> {
    if quiet {
        std::env::set_var("RUST_LOG", "error");
    } else {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet)?;

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to set thread count")?;
    }

    match cli.command {
        Commands::Build {
            dump,
            reads,
            out,
            max_erate,
            max_per_file,
            stats_json,
        } => commands::build::execute(dump, reads, out, max_erate, max_per_file, stats_json),
        Commands::Dump {
            store,
            reads,
            format,
            range,
        } => commands::dump::execute(store, reads, format, range),
        Commands::Verify { store, fix } => commands::verify::execute(store, fix),
        Commands::Stats { store } => commands::stats::execute(store),
        Commands::Cache {
            store,
            repeats,
            out,
            max_erate,
            min_overlap,
            memory_gb,
            max_per_read,
        } => commands::cache::execute(
            store,
            repeats,
            out,
            max_erate,
            min_overlap,
            memory_gb,
            max_per_read,
        ),
    }
}
