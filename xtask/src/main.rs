use anyhow::{bail, Context, Result};
use clap::Parser;
use std::process::Command;

const EBPF_TARGET: &str = "bpfel-unknown-none";

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Cross-compile the kernel-side probes
    BuildEbpf {
        #[arg(long, default_value = EBPF_TARGET)]
        target: String,
    },
    /// Build the probes and the CLI, then run the CLI as root
    Run {
        /// Build the CLI with the release profile
        #[arg(long)]
        release: bool,
        /// Command used to gain privileges
        #[arg(long, default_value = "sudo -E")]
        runner: String,
        /// Arguments passed to schedscope
        #[arg(last = true)]
        run_args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target } => build_ebpf(&target)?,
        Cmd::Run { release, runner, run_args } => {
            build_ebpf(EBPF_TARGET)?;
            build_cli(release)?;
            run(release, &runner, &run_args)?;
        }
    }

    Ok(())
}

fn build_ebpf(target: &str) -> Result<()> {
    // Debug builds pull in formatting code the BPF linker rejects, so the
    // probes are always built with the release profile.
    let status = Command::new("cargo")
        .args(["+nightly", "build", "--package", "schedscope-ebpf", "--target", target])
        .args(["-Z", "build-std=core", "--release"])
        .status()
        .context("Failed to build eBPF program")?;

    if !status.success() {
        bail!("Failed to build eBPF program");
    }

    println!("✓ eBPF program built successfully");
    println!("  Object: target/{target}/release/schedscope");

    Ok(())
}

fn build_cli(release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["build", "--package", "schedscope"]);
    if release {
        cmd.arg("--release");
    }
    let status = cmd.status().context("Failed to build schedscope")?;
    if !status.success() {
        bail!("Failed to build schedscope");
    }
    Ok(())
}

fn run(release: bool, runner: &str, run_args: &[String]) -> Result<()> {
    let profile = if release { "release" } else { "debug" };
    let binary = format!("target/{profile}/schedscope");
    let object = format!("target/{EBPF_TARGET}/release/schedscope");

    let mut parts = runner.split_whitespace();
    let Some(program) = parts.next() else {
        bail!("--runner must not be empty");
    };
    let status = Command::new(program)
        .args(parts)
        .arg(&binary)
        .args(["--bpf-object", &object])
        .args(run_args)
        .status()
        .with_context(|| format!("Failed to run {binary}"))?;

    if !status.success() {
        bail!("schedscope exited with {status}");
    }
    Ok(())
}
