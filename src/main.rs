use anyhow::{Context, Result};
use archive_delta::archive::{ArchiveSink, ArchiveSource, DirectoryArchive, PackArchive};
use archive_delta::copy::{DEFAULT_BUFFER_SIZE, DEFAULT_SLOTS};
use archive_delta::delta_format::{read_model, DeltaDocument};
use archive_delta::{copy_archive, ArchiveDiff, ArchivePatch, CopyConfig, MessageDigest, StreamCopier};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "archive-delta", about = "Archive delta creator and applier")]
struct Cli {
    #[command(flatten)]
    copy: CopyArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CopyArgs {
    /// Size of each copy buffer in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
    /// Number of buffers in the copy ring
    #[arg(long, global = true, default_value_t = DEFAULT_SLOTS)]
    slots: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a delta archive by comparing a base and an update archive
    Diff {
        /// Path to the base archive (directory or pack file)
        #[arg(long)]
        base: PathBuf,
        /// Path to the update archive (directory or pack file)
        #[arg(long)]
        update: PathBuf,
        /// Output path for the delta archive
        #[arg(long, short)]
        output: PathBuf,
        /// Message digest algorithm
        #[arg(long, default_value = "SHA-1")]
        digest: String,
        /// Digest length in bytes, for extendable-output algorithms
        #[arg(long)]
        digest_length: Option<usize>,
    },
    /// Rebuild the update archive from a base archive and a delta archive
    Patch {
        /// Path to the base archive
        #[arg(long)]
        base: PathBuf,
        /// Path to the delta archive
        #[arg(long)]
        delta: PathBuf,
        /// Output path for the rebuilt archive
        #[arg(long, short)]
        output: PathBuf,
        /// Write the manifest entry first, as JAR files require
        #[arg(long)]
        jar: bool,
    },
    /// Print the model stored in a delta archive
    Model {
        /// Path to the delta archive
        #[arg(long)]
        delta: PathBuf,
    },
    /// Copy an archive, e.g. a directory into a pack file and back
    Copy {
        #[arg(long)]
        from: PathBuf,
        #[arg(long)]
        to: PathBuf,
        /// Write the manifest entry first, as JAR files require
        #[arg(long)]
        jar: bool,
    },
}

type BoxedSource = Box<dyn ArchiveSource + Send>;
type BoxedSink = Box<dyn ArchiveSink + Send>;

/// Existing directories are directory archives, anything else a pack file.
fn open_source(path: &Path) -> Result<BoxedSource> {
    if path.is_dir() {
        return Ok(Box::new(DirectoryArchive::new(path)));
    }
    let pack = PackArchive::open(path)
        .with_context(|| format!("Failed to open archive: {}", path.display()))?;
    Ok(Box::new(pack))
}

/// Outputs are directories when they exist as one or end with a separator.
fn open_sink(path: &Path, jar: bool) -> Result<BoxedSink> {
    let text = path.to_string_lossy();
    let directory = path.is_dir() || text.ends_with('/') || text.ends_with(std::path::MAIN_SEPARATOR);
    if directory {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        return Ok(Box::new(DirectoryArchive::new(path)));
    }
    Ok(Box::new(PackArchive::create(path, jar)))
}

fn copier(args: &CopyArgs) -> Result<StreamCopier> {
    let config = CopyConfig {
        slots: args.slots,
        buffer_size: args.buffer_size,
        ..CopyConfig::default()
    };
    StreamCopier::new(config).context("Invalid copy configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Diff {
            base,
            update,
            output,
            digest,
            digest_length,
        } => {
            println!("Creating delta...");
            println!("  Base: {}", base.display());
            println!("  Update: {}", update.display());
            println!("  Output: {}", output.display());

            let digest = MessageDigest::for_name(&digest, digest_length)?;
            let copier = copier(&cli.copy)?;

            let start = Instant::now();
            let model = tokio::task::spawn_blocking(move || -> Result<_> {
                let base_archive = open_source(&base)?;
                let update_archive = open_source(&update)?;
                let mut sink = open_sink(&output, false)?;
                ArchiveDiff::new(&*base_archive, &*update_archive)
                    .digest(digest)
                    .copier(copier)
                    .to(&mut *sink)
                    .with_context(|| format!("Failed to create delta archive: {}", output.display()))
            })
            .await??;
            let elapsed = start.elapsed();

            let summary = model.summary();
            println!("\nDelta created successfully!");
            println!("  Digest: {}", model.digest_algorithm_name());
            println!("  Entries changed: {}", summary.changed);
            println!("  Entries unchanged: {}", summary.unchanged);
            println!("  Entries added: {}", summary.added);
            println!("  Entries removed: {}", summary.removed);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Patch {
            base,
            delta,
            output,
            jar,
        } => {
            println!("Applying delta...");
            println!("  Base: {}", base.display());
            println!("  Delta: {}", delta.display());
            println!("  Output: {}", output.display());

            let copier = copier(&cli.copy)?;

            let start = Instant::now();
            let summary = tokio::task::spawn_blocking(move || -> Result<_> {
                let base_archive = open_source(&base)?;
                let delta_archive = open_source(&delta)?;
                let mut sink = open_sink(&output, jar)?;
                ArchivePatch::new(&*base_archive, &*delta_archive)
                    .copier(copier)
                    .to(&mut *sink)
                    .with_context(|| format!("Failed to apply delta archive: {}", delta.display()))
            })
            .await??;
            let elapsed = start.elapsed();

            println!("\nDelta applied successfully!");
            println!("  Entries copied from base: {}", summary.unchanged);
            println!("  Entries changed: {}", summary.changed);
            println!("  Entries added: {}", summary.added);
            println!("  Entries removed: {}", summary.removed);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Model { delta } => {
            let delta_archive = open_source(&delta)?;
            let model = read_model(&*delta_archive)
                .with_context(|| format!("Failed to read delta model: {}", delta.display()))?;
            let document = serde_json::to_string_pretty(&DeltaDocument::from(&model))
                .context("Failed to render delta model")?;
            println!("{document}");
        }
        Commands::Copy { from, to, jar } => {
            println!("Copying archive...");
            println!("  From: {}", from.display());
            println!("  To: {}", to.display());

            let copier = copier(&cli.copy)?;

            let start = Instant::now();
            let copied = tokio::task::spawn_blocking(move || -> Result<_> {
                let source = open_source(&from)?;
                let mut sink = open_sink(&to, jar)?;
                copy_archive(&copier, &*source, &mut *sink)
                    .with_context(|| format!("Failed to copy archive to {}", to.display()))
            })
            .await??;
            let elapsed = start.elapsed();

            println!("\nArchive copied successfully!");
            println!("  Entries copied: {copied}");
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
    }

    Ok(())
}
