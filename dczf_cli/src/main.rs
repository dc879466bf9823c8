use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use dczf_core::{read_header, verify, Compressor, Decompressor, FORMAT_VERSION};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dczf",
    about = "DCZF — chunked canonical-Huffman file compression",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file into a DCZF container
    Compress {
        /// Source file to compress
        input: PathBuf,
        /// Destination container file
        output: PathBuf,
        /// Chunk size in MiB; each chunk is encoded independently
        #[arg(default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..=4095))]
        chunk_size_mb: u32,
    },
    /// Restore the original file from a DCZF container
    Decompress {
        /// Source container file
        input: PathBuf,
        /// Destination file
        output: PathBuf,
    },
    /// Check the structural integrity of a container without decoding it
    Verify {
        /// Container file to check
        file: PathBuf,
    },
    /// Print header metadata and optional per-chunk detail
    Inspect {
        /// Container file to inspect
        file: PathBuf,
        /// Print the per-chunk table
        #[arg(long)]
        chunks: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{v:.2} {}", UNITS[unit])
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}%")
            .expect("progress bar template is valid")
            .progress_chars("█▓▒░ "),
    );
    pb
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_compress(input: PathBuf, output: PathBuf, chunk_size_mb: u32) -> anyhow::Result<()> {
    let raw_size = std::fs::metadata(&input)
        .with_context(|| format!("reading metadata for {:?}", input))?
        .len();

    let pb = progress_bar();
    let mut on_progress = |fraction: f64| pb.set_position((fraction * 100.0).round() as u64);

    let t0 = Instant::now();
    Compressor::new(chunk_size_mb * 1024 * 1024)
        .compress(&input, &output, Some(&mut on_progress))
        .with_context(|| format!("compressing {:?}", input))?;
    pb.finish_and_clear();
    let elapsed = t0.elapsed();

    let compressed_size = std::fs::metadata(&output)?.len();
    eprintln!("  chunk size  : {} MiB", chunk_size_mb);
    eprintln!("  raw size    : {}", human_bytes(raw_size));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    if compressed_size > 0 {
        eprintln!(
            "  ratio       : {:.2}x",
            raw_size as f64 / compressed_size as f64
        );
    }
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw_size as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let pb = progress_bar();
    let mut on_progress = |fraction: f64| pb.set_position((fraction * 100.0).round() as u64);

    let t0 = Instant::now();
    Decompressor::new()
        .decompress(&input, &output, Some(&mut on_progress))
        .with_context(|| format!("decompressing {:?}", input))?;
    pb.finish_and_clear();
    let elapsed = t0.elapsed();

    let raw_size = std::fs::metadata(&output)?.len();
    eprintln!("  raw size    : {}", human_bytes(raw_size));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw_size as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_verify(file: PathBuf) -> anyhow::Result<()> {
    verify(&file).with_context(|| format!("verifying {:?}", file))?;
    println!("OK: {:?} is structurally intact", file);
    Ok(())
}

fn run_inspect(file: PathBuf, show_chunks: bool) -> anyhow::Result<()> {
    let header = read_header(&file).with_context(|| format!("reading header of {:?}", file))?;
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== DCZF container: {:?} ===", file);
    println!();
    println!("  format version : {}", FORMAT_VERSION);
    println!("  original name  : {}", header.original_filename);
    println!("  original size  : {}", human_bytes(header.original_file_size));
    println!("  mtime (ms)     : {}", header.original_timestamp_ms);
    println!("  chunk size     : {}", human_bytes(header.chunk_size_bytes as u64));
    println!("  chunks         : {}", header.num_chunks());
    println!("  payload        : {}", human_bytes(header.payload_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    if header.payload_size() > 0 {
        println!(
            "  ratio          : {:.2}x",
            header.original_file_size as f64 / header.payload_size() as f64
        );
    }

    if show_chunks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>12}  {:>7}",
            "chunk", "payload offset", "compressed", "original", "ratio"
        );
        println!("  {}", "-".repeat(62));
        for c in &header.chunks {
            println!(
                "  {:>8}  {:>14}  {:>12}  {:>12}  {:>6.1}%",
                c.chunk_index,
                c.compressed_offset,
                human_bytes(c.compressed_size as u64),
                human_bytes(c.original_size as u64),
                c.compressed_size as f64 / c.original_size as f64 * 100.0
            );
        }
    }

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            input,
            output,
            chunk_size_mb,
        } => run_compress(input, output, chunk_size_mb),
        Commands::Decompress { input, output } => run_decompress(input, output),
        Commands::Verify { file } => run_verify(file),
        Commands::Inspect { file, chunks } => run_inspect(file, chunks),
    }
}
