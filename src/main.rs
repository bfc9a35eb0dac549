//
// Copyright (c) 2025 Nathan Fiedler
//

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use blockmap::rabin::{DEFAULT_AVG, DEFAULT_MAX, DEFAULT_MIN, DEFAULT_WINDOW};
use blockmap::{
    ChunkerConfiguration, CompressionFormat, Destination, InputFileInfo, Target, build_block_map,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Generates the block map of a file for differential updates, using content
/// defined chunking that is robust to insertions, deletions, and changes.
#[derive(Parser)]
#[command(name = "blockmap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file
    #[arg(short, long)]
    input: PathBuf,

    /// Output file for the block map, `-` for standard output. When omitted
    /// the block map is appended to the input file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compression, one of: gzip, deflate
    #[arg(short, long, default_value = "gzip")]
    compression: CompressionFormat,

    /// Rolling hash window in bytes
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,

    /// Minimum chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_MIN)]
    min: usize,

    /// Average chunk size in bytes, a power of two
    #[arg(long, default_value_t = DEFAULT_AVG)]
    avg: usize,

    /// Maximum chunk size in bytes
    #[arg(long, default_value_t = DEFAULT_MAX)]
    max: usize,

    /// Enable debug output on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn destination(&self) -> Destination {
        match &self.output {
            None => Destination::Append,
            Some(path) if path.as_os_str() == "-" => Destination::Separate(Target::Stdout),
            Some(path) => Destination::Separate(Target::Path(path.clone())),
        }
    }
}

/// Print the result record as one line of JSON. When the block map itself was
/// written to stdout the record goes to stderr, keeping stdout parseable.
fn report<'a>(
    info: &InputFileInfo,
    destination: &Destination,
    stdout: &'a mut dyn Write,
    stderr: &'a mut dyn Write,
) -> anyhow::Result<()> {
    let writer = match destination {
        Destination::Separate(Target::Stdout) => stderr,
        _ => stdout,
    };
    serde_json::to_writer(&mut *writer, info)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ChunkerConfiguration {
        window: cli.window,
        avg: cli.avg,
        min: cli.min,
        max: cli.max,
    };
    let destination = cli.destination();
    let info = build_block_map(&cli.input, config, cli.compression, &destination)
        .with_context(|| format!("cannot build block map of {}", cli.input.display()))?;
    report(
        &info,
        &destination,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )
}
