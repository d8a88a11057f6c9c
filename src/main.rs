use clap::{Parser, Subcommand};
use recfilter::filter::{MosaicOptions, Region, StaticRegions};
use recfilter::{
    copy_file, copy_file_parallel, Compression, CopyOptions, CopyReport, HookRegistry, MosaicImages,
    RecordFileReader, RecordFileWriter, SilenceAudio,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recfilter", about = "Selective filter-copy for multi-stream recordings")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container metadata
    Info {
        input: PathBuf,
    },
    /// List streams and their record formats
    List {
        input: PathBuf,
    },
    /// Copy a recording, silencing audio and/or masking image regions
    Copy {
        input:  PathBuf,
        output: PathBuf,
        /// Zero every audio sample
        #[arg(long)]
        silence_audio: bool,
        /// Mask image regions given with --region or in the options file
        #[arg(long)]
        mosaic: bool,
        /// Region to mask, as x,y,width,height (repeatable)
        #[arg(long = "region", value_name = "X,Y,W,H")]
        regions: Vec<Region>,
        /// JSON file with `copy`, `mosaic` and `regions` sections
        #[arg(long)]
        options: Option<PathBuf>,
        /// Re-compression for filtered records: none, lz4, zstd
        #[arg(short, long)]
        compression: Option<String>,
        /// Zstd level when --compression zstd
        #[arg(short, long)]
        level: Option<i32>,
        /// Filter streams concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Verify every record's checksum and hash
    Check {
        input: PathBuf,
    },
    /// Rebuild the record list by scanning headers, ignoring the index
    Scan {
        input: PathBuf,
    },
}

/// Layout of the `--options` JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptionsFile {
    copy:    CopyOptions,
    mosaic:  MosaicOptions,
    regions: Vec<Region>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let reader = open(&input)?;
            let h = &reader.header;
            let created = chrono::DateTime::from_timestamp(h.created_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| h.created_at.to_string());

            println!("── Recording ────────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Format version {}", h.version);
            println!("  UUID           {}", h.file_uuid);
            println!("  Created        {created}");
            println!("  Index offset   {} B", h.index_offset);
            println!("  Index size     {} B", h.index_size);
            println!("  Streams        {}", reader.index.streams.len());
            println!("  Records        {}", h.record_count);
            println!("  Root hash      {}", hex::encode(reader.index.root_hash));
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input } => {
            let reader = open(&input)?;
            println!("{:<10} {:<16} {:>8}  Formats", "Stream", "Name", "Records");
            for stream in &reader.index.streams {
                let formats: Vec<String> = stream.formats.iter()
                    .map(|f| format!("{}/v{} ({} blocks)", f.kind, f.format_version, f.format.blocks.len()))
                    .collect();
                println!("{:<10} {:<16} {:>8}  {}",
                    stream.id.to_string(), stream.name,
                    reader.index.records_in_stream(stream.id), formats.join(", "));
            }
            println!();
            println!("{:>10} {:<10} {:<14} {:>14}  Hash", "Offset", "Stream", "Kind", "Timestamp");
            for e in &reader.index.entries {
                println!("{:>10} {:<10} {:<14} {:>14.6}  {}",
                    e.offset, e.stream_id.to_string(), e.kind.name(), e.timestamp,
                    hex::encode(&e.content_hash[..6]));
            }
        }

        // ── Copy ─────────────────────────────────────────────────────────────
        Commands::Copy { input, output, silence_audio, mosaic, regions, options, compression, level, parallel } => {
            let mut file_opts = match &options {
                Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
                None       => OptionsFile::default(),
            };
            if let Some(name) = &compression {
                file_opts.copy.compression = Some(parse_compression(name, level)?);
            }
            file_opts.regions.extend(regions);

            let mut reader = open_or_recover(&input)?;
            let mut writer = RecordFileWriter::new(BufWriter::new(File::create(&output)?))?;

            let make_hooks = || {
                let mut hooks = HookRegistry::new();
                if silence_audio {
                    hooks = hooks.with_audio_hook(SilenceAudio);
                }
                if mosaic {
                    let detector = StaticRegions::new(file_opts.regions.clone());
                    hooks = hooks.with_image_hook(MosaicImages::with_options(detector, file_opts.mosaic));
                }
                hooks
            };

            let report = if parallel {
                copy_file_parallel(&mut reader, &mut writer, &file_opts.copy, make_hooks)?
            } else {
                copy_file(&mut reader, &mut writer, &file_opts.copy, &mut make_hooks())?
            };
            print_report(&report);
            println!("Created: {}", output.display());
        }

        // ── Check ────────────────────────────────────────────────────────────
        Commands::Check { input } => {
            let mut reader = open(&input)?;
            let bad = reader.verify()?;
            let mut recomputed = reader.index.clone();
            recomputed.compute_root_hash();
            let root_ok = recomputed.root_hash == reader.index.root_hash;

            println!("  Records        {}", reader.index.entries.len());
            println!("  Corrupt        {}", bad.len());
            for offset in &bad {
                println!("    at offset {offset}");
            }
            println!("  Root hash      {}", if root_ok { "ok" } else { "MISMATCH" });
            if !bad.is_empty() || !root_ok {
                return Err(format!("{} failed verification", input.display()).into());
            }
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input } => {
            let reader = RecordFileReader::recover(BufReader::new(File::open(&input)?))?;
            println!("Scan recovered {} record(s) in {} stream(s):",
                reader.index.entries.len(), reader.index.streams.len());
            for stream in &reader.index.streams {
                println!("  stream={}  records={}", stream.id, reader.index.records_in_stream(stream.id));
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "recfilter=info",
        1 => "recfilter=debug",
        _ => "recfilter=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn open(path: &Path) -> std::io::Result<RecordFileReader<BufReader<File>>> {
    RecordFileReader::open(BufReader::new(File::open(path)?))
}

/// Fall back to a header scan when the index is missing or unreadable.
fn open_or_recover(path: &Path) -> std::io::Result<RecordFileReader<BufReader<File>>> {
    match open(path) {
        Ok(reader) => Ok(reader),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "index unusable, scanning records; all records will be copied verbatim");
            RecordFileReader::recover(BufReader::new(File::open(path)?))
        }
    }
}

fn parse_compression(name: &str, level: Option<i32>) -> Result<Compression, String> {
    Compression::from_name(name, level).ok_or_else(|| format!("unknown compression '{name}'"))
}

fn print_report(report: &CopyReport) {
    let s = &report.stats;
    println!("  Records        {}", s.records);
    println!("  Verbatim       {}", s.verbatim);
    println!("  Filtered       {}", s.filtered);
    println!("  Blocks changed {}", s.blocks_transformed);
    println!("  Blocks kept    {}", s.blocks_kept);
    println!("  Warnings       {}", report.warnings.len());
    for w in &report.warnings {
        println!("    {w}");
    }
}
