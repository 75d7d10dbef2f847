use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use pbgzf::{BgzfWriterBuilder, DEFAULT_COMPRESSION_LEVEL};
use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Compress a file into BGZF using all available cores.
#[derive(Parser)]
#[command(name = "pbgzf", version, about)]
struct Cli {
    /// Input file to compress
    input: PathBuf,

    /// Output path (defaults to INPUT.gz)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Deflate level, 0 (stored) through 9
    #[arg(short = 'l', long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
    level: u32,

    /// Compressor threads (defaults to the hardware thread count)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Skip the trailing 28-byte EOF terminator
    #[arg(long)]
    no_terminator: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let output = cli.output.clone().unwrap_or_else(|| {
        let mut out = cli.input.clone().into_os_string();
        out.push(".gz");
        PathBuf::from(out)
    });

    let file = File::open(&cli.input)
        .with_context(|| format!("failed to open {}", cli.input.display()))?;
    let data = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to map {}", cli.input.display()))?;

    let mut builder = BgzfWriterBuilder::new()
        .compression_level(cli.level)
        .write_terminator(!cli.no_terminator);
    if let Some(threads) = cli.threads {
        builder = builder.parallelism(threads);
    }

    let started = Instant::now();
    let mut writer = builder
        .create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    writer.write_bytes(&data)?;
    writer.close()?;

    let elapsed = started.elapsed();
    let out_len = std::fs::metadata(&output)?.len();
    info!(
        input = %cli.input.display(),
        output = %output.display(),
        uncompressed = data.len(),
        compressed = out_len,
        ratio = %format!("{:.2}", data.len() as f64 / out_len.max(1) as f64),
        secs = %format!("{:.2}", elapsed.as_secs_f64()),
        "done"
    );
    Ok(())
}
