use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hello_uprobe::{
    probes::{ProbeRequest, resolve_attach_point},
    settings::{Overrides, Settings},
};
use log::info;

#[derive(Debug, Parser)]
struct Opt {
    /// Pid of the process to attach to (0 attaches to every process)
    #[clap(long)]
    pid: Option<u32>,

    /// Symbol to attach to
    #[clap(long)]
    symbol: Option<String>,

    /// Byte offset added to the symbol address (decimal or 0x-prefixed hex)
    #[clap(long, value_parser = parse_offset)]
    offset: Option<u64>,

    /// Binary whose symbol table is used for resolution
    #[clap(long)]
    binary: Option<PathBuf>,

    /// Precompiled eBPF object
    #[clap(long)]
    bytecode: Option<PathBuf>,

    /// Attach the return probe instead of the entry probe
    #[clap(long)]
    retprobe: bool,

    /// Resolve and print the attach point without loading anything
    #[clap(long)]
    dry_run: bool,

    /// Verbose output
    #[clap(short, long)]
    verbose: bool,
}

fn parse_offset(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opt.verbose { "debug" } else { "info" }),
    )
    .init();

    let settings = Settings::new(Overrides {
        bytecode_path: opt.bytecode,
        target_binary: opt.binary,
        symbol: opt.symbol,
        offset: opt.offset,
        pid: opt.pid,
        retprobe: opt.retprobe.then_some(true),
    })
    .context("Failed to load settings")?;

    let request = ProbeRequest::from_settings(&settings);

    if opt.dry_run {
        let point = resolve_attach_point(&request)?;
        info!("Would attach {} to {}", request.kind.program_name(), point);
        return Ok(());
    }

    hello_uprobe::run(request).await?;

    Ok(())
}
