//! Keel CLI - Command Line Interface
//!
//! Command-line tool for exercising Keel arenas and buffer chains. Streams
//! files through the chain writer, runs a synthetic per-request workload and
//! prints configuration.
//!
//! Key Features:
//! - File streaming with file-backed or memory-copy buffers
//! - Arena and pool statistics for a synthetic workload
//! - Default and production configuration output
//!
//! @version 0.1.0
//! @author Keel Development Team

use clap::{Parser, Subcommand, ValueEnum};
use keel_common::config::KeelConfig;
use keel_common::utils::{format_size, parse_size};
use keel_common::{BufTag, KeelError, Result};
use keel_memory::{
    Arena, ArenaArray, ArenaPool, Buf, BufFile, ChainSet, ChainWriter, IoSink, WriteStatus,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const CAT_TAG: BufTag = BufTag(0x636174);

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Keel Development Team")]
#[command(version = "0.1.0")]
#[command(about = "Keel arena and buffer chain tool", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream files to stdout through an arena and chain writer
    Cat {
        /// How file data enters the chain
        #[arg(short, long, value_enum, default_value_t = CatMode::File)]
        mode: CatMode,
        /// Bytes per write call, e.g. "64KB" (overrides configuration)
        #[arg(short, long)]
        send_limit: Option<String>,
        files: Vec<PathBuf>,
    },
    /// Run a synthetic request workload and print arena statistics
    Stats {
        #[arg(short, long, default_value_t = 1000)]
        requests: usize,
        /// Arena size, e.g. "16KB" (overrides configuration)
        #[arg(short, long)]
        arena_size: Option<String>,
    },
    /// Print the configuration as TOML
    Config {
        /// Print production defaults instead of the loaded configuration
        #[arg(long)]
        production: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CatMode {
    /// Buffers reference file ranges directly
    File,
    /// File data is read into recycled arena buffers
    Copy,
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("keel: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => KeelConfig::from_file(path)?,
        None => KeelConfig::default(),
    };

    match cli.command {
        Commands::Cat {
            mode,
            send_limit,
            files,
        } => {
            if let Some(limit) = send_limit {
                config.output.send_limit = size_arg("send-limit", &limit)?;
            }
            cat(&config, mode, &files)
        }
        Commands::Stats {
            requests,
            arena_size,
        } => {
            if let Some(size) = arena_size {
                config.arena.size = size_arg("arena-size", &size)? as usize;
            }
            config.validate()?;
            stats(&config, requests)
        }
        Commands::Config { production } => {
            let config = if production {
                KeelConfig::production()
            } else {
                config
            };
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn size_arg(name: &str, value: &str) -> Result<u64> {
    parse_size(value)
        .ok_or_else(|| KeelError::Configuration(format!("invalid {}: {:?}", name, value)))
}

// =============================================================================
// Cat
// =============================================================================

fn cat(config: &KeelConfig, mode: CatMode, files: &[PathBuf]) -> Result<()> {
    let pool = ArenaPool::from_config(config);
    let stdout = std::io::stdout();
    let mut sink = IoSink::new(stdout.lock());

    for path in files {
        let mut arena = pool.checkout()?;
        let sent = match mode {
            CatMode::File => cat_file(&mut arena, config, path, &mut sink)?,
            CatMode::Copy => cat_copy(&mut arena, config, path, &mut sink)?,
        };
        tracing::debug!(path = %path.display(), sent, "file streamed");
    }

    sink.flush()?;
    tracing::debug!(stats = ?pool.stats(), "cat finished");
    Ok(())
}

fn open_file(arena: &mut Arena, path: &Path) -> Result<(Arc<BufFile>, u64)> {
    let file = Arc::new(BufFile::open(path)?);
    let len = file.len()?;
    arena.add_file_cleanup(Arc::clone(&file), false)?;
    Ok((file, len))
}

/// Send the whole file as one file-backed buffer.
fn cat_file<W: Write>(
    arena: &mut Arena,
    config: &KeelConfig,
    path: &Path,
    sink: &mut IoSink<W>,
) -> Result<u64> {
    let (file, len) = open_file(arena, path)?;

    let mut body = Buf::file_range(file, 0..len);
    body.flags.last_buf = true;
    let buf = arena.insert_buf(body)?;
    let input = Some(arena.alloc_chain_link(buf)?);

    let mut writer = ChainWriter::from_config(&config.output);
    let mut status = writer.write(arena, input, sink)?;
    while status == WriteStatus::Again {
        status = writer.write(arena, None, sink)?;
    }
    Ok(writer.total_sent())
}

/// Read the file into a bounded set of recycled arena buffers.
fn cat_copy<W: Write>(
    arena: &mut Arena,
    config: &KeelConfig,
    path: &Path,
    sink: &mut IoSink<W>,
) -> Result<u64> {
    let (file, len) = open_file(arena, path)?;

    let mut set = ChainSet::with_bufs(CAT_TAG, config.output.bufs);
    let mut writer = ChainWriter::from_config(&config.output);
    let mut offset = 0u64;

    while offset < len || !set.is_idle() {
        while offset < len {
            let Some(link) = set.acquire_buf(arena)? else {
                break;
            };
            let buf = arena.link(link).buf;

            let n = file.read_at(offset, arena.buf_spare_mut(buf))?;
            if n == 0 {
                return Err(KeelError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            arena.buf_mut(buf).produce(n);
            offset += n as u64;
            set.queue_link(arena, link);
        }

        let out = set.dispatch(arena);
        writer.write(arena, out, sink)?;
        set.reclaim(arena);
    }

    Ok(writer.total_sent())
}

// =============================================================================
// Stats
// =============================================================================

/// Simulate `requests` units of work, each in its own pooled arena.
fn stats(config: &KeelConfig, requests: usize) -> Result<()> {
    let pool = ArenaPool::from_config(config);
    let mut last = None;

    for request in 0..requests {
        let mut arena = pool.checkout()?;
        simulate_request(&mut arena, request)?;
        last = Some(arena.stats());
    }

    let pool_stats = pool.stats();
    println!("requests:          {}", requests);
    println!("arena size:        {}", format_size(config.arena.size as u64));
    println!("arenas created:    {}", pool_stats.created);
    println!("arenas reused:     {}", pool_stats.reused);

    if let Some(stats) = last {
        println!("blocks:            {}", stats.blocks);
        println!("current block:     {}", stats.current_block);
        println!("block memory:      {}", format_size(stats.block_bytes as u64));
        println!("used:              {}", format_size(stats.used_bytes as u64));
        println!("large allocations: {}", stats.large_allocations);
        println!("large memory:      {}", format_size(stats.large_bytes as u64));
        println!("buffers:           {}", stats.bufs);
        println!("chain links:       {}", stats.links);
        println!("free links:        {}", stats.free_links);
    }
    Ok(())
}

fn simulate_request(arena: &mut Arena, request: usize) -> Result<()> {
    // Request line, headers and a few scratch values.
    for i in 0..32 {
        arena.alloc(24 + (request + i) % 200)?;
    }
    if request % 10 == 0 {
        arena.alloc(32 * 1024)?;
    }

    let mut headers = ArenaArray::<(u32, u32)>::init(arena, 4)?;
    for i in 0..(8 + request % 24) as u32 {
        headers.push(arena, (i, i * 16))?;
    }

    let tag = BufTag(request as u64);
    let mut set = ChainSet::new(tag);
    let batch = arena.create_buffer_batch(4, 1024)?;
    for id in arena.chain_iter(batch).collect::<Vec<_>>() {
        let buf = arena.link(id).buf;
        arena.buf_mut(buf).set_tag(tag);
        arena.buf_write(buf, &[b'k'; 512]);
    }
    set.queue_chain(arena, batch)?;
    set.dispatch(arena);

    let total = set.busy_bytes(arena);
    arena.advance_sent(set.busy(), total);
    set.reclaim(arena);
    Ok(())
}
