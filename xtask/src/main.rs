use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

/// Where the controller looks for the eBPF object by default.
const BPF_OBJECT: &str = "target/bpf/hello-uprobe.bpf.o";
const EBPF_CRATE: &str = "hello-uprobe-ebpf";
const EBPF_BIN: &str = "hello-uprobe";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build hello-uprobe and its eBPF object")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build only the eBPF object
    BuildEbpf,

    /// Build the eBPF object, the controller and the helloworld target
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },

    /// Build everything, then run the controller under sudo
    Run {
        /// Build in release mode
        #[arg(long)]
        release: bool,

        /// Arguments passed to the controller (after `--`)
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::BuildEbpf => {
            build_ebpf()?;
        }
        Commands::Build { release } => {
            build(release)?;
        }
        Commands::Run { release, args } => {
            build(release)?;
            run(release, &args)?;
        }
    }

    Ok(())
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn bpf_target() -> &'static str {
    match env::consts::ARCH {
        "x86_64" | "x86" | "aarch64" | "arm" | "riscv64" => "bpfel-unknown-none",
        "mips" | "mips64" | "powerpc" | "powerpc64" | "s390x" => "bpfeb-unknown-none",
        arch => {
            eprintln!(
                "Warning: Unknown architecture '{}', defaulting to bpfel-unknown-none",
                arch
            );
            "bpfel-unknown-none"
        }
    }
}

/// The eBPF object is always built with the release profile; unoptimized
/// bytecode rarely gets past the verifier.
fn build_ebpf() -> Result<()> {
    let root = project_root();
    let target = bpf_target();

    if which::which("bpf-linker").is_err() {
        bail!(
            "Building the eBPF object requires 'bpf-linker'.\n\
             Install with: cargo install bpf-linker"
        );
    }

    println!("Building eBPF for target: {} (host arch: {})", target, env::consts::ARCH);

    // A separate target directory avoids lock contention with the host build.
    let ebpf_target_dir = root.join("target").join("ebpf");

    let mut cmd = Command::new("cargo");
    cmd.current_dir(root.join(EBPF_CRATE))
        .env("RUSTUP_TOOLCHAIN", "nightly")
        .env("CARGO_TARGET_DIR", &ebpf_target_dir)
        .args([
            "build",
            "--release",
            &format!("--target={}", target),
            "-Z",
            "build-std=core",
        ]);

    let status = cmd.status().context("Failed to run cargo build for eBPF")?;
    if !status.success() {
        bail!("Failed to build eBPF program");
    }

    let object = ebpf_target_dir.join(target).join("release").join(EBPF_BIN);
    let dest = root.join(BPF_OBJECT);
    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).context("Failed to create output directory")?;
    }
    fs::copy(&object, &dest)
        .with_context(|| format!("Failed to copy {} to {}", object.display(), dest.display()))?;

    println!("eBPF object written to {}", dest.display());
    Ok(())
}

fn build(release: bool) -> Result<()> {
    build_ebpf()?;

    let root = project_root();
    let mut cmd = Command::new("cargo");
    cmd.current_dir(&root)
        .args(["build", "-p", "hello-uprobe", "-p", "helloworld"]);
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to run cargo build")?;
    if !status.success() {
        bail!("Build failed");
    }

    println!("Build complete");
    Ok(())
}

fn run(release: bool, args: &[String]) -> Result<()> {
    let root = project_root();
    let profile = if release { "release" } else { "debug" };
    let controller = root.join("target").join(profile).join("hello-uprobe");
    let target = root.join("target").join(profile).join("helloworld");

    let mut cmd = Command::new("sudo");
    cmd.current_dir(&root).arg("-E").arg(&controller);
    if !args.iter().any(|a| a == "--binary" || a.starts_with("--binary=")) {
        cmd.arg("--binary").arg(&target);
    }
    let status = cmd.args(args).status().context("Failed to run sudo")?;

    if !status.success() {
        bail!("hello-uprobe exited with {}", status);
    }
    Ok(())
}
