//! Pre-flight checks for schedscope
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::probe::ProbeTarget;

/// Minimum kernel version required for eBPF features used by schedscope
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

const KALLSYMS: &str = "/proc/kallsyms";

/// Run all pre-flight checks before eBPF loading
pub fn run_preflight_checks(target: ProbeTarget, bpf_object: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_bpf_object(bpf_object)?;
    if target.is_return_probe() {
        let kallsyms = std::fs::read_to_string(KALLSYMS)
            .with_context(|| format!("Failed to read {KALLSYMS}"))?;
        check_kernel_symbol(&kallsyms, target.symbol())?;
    }
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: schedscope requires root privileges to load eBPF programs.\n\n\
         Run with: sudo schedscope ..."
    );
}

/// Parse `major.minor` out of a `/proc/version` line
fn parse_kernel_version(version_str: &str) -> Option<(u32, u32)> {
    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // Can't parse, assume it's fine
    let Some((major, minor)) = parse_kernel_version(&version_str) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             schedscope requires Linux {}.{} or newer for eBPF ring buffer support.",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// Check that the compiled kernel programs exist
fn check_bpf_object(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!(
            "eBPF object not found: {}\n\n\
             Build it with: cargo xtask build-ebpf\n\
             or point --bpf-object at a prebuilt object.",
            path.display()
        );
    }
    Ok(())
}

/// Check that `symbol` is a probeable kernel function
///
/// Scheduler helpers are often inlined or compiled with a suffix
/// (`should_we_balance.isra.0`); only an exact text symbol can take a
/// return probe.
fn check_kernel_symbol(kallsyms: &str, symbol: &str) -> Result<()> {
    let found = kallsyms.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let _address = fields.next();
        let kind = fields.next();
        let name = fields.next();
        matches!(kind, Some("t" | "T")) && name == Some(symbol)
    });

    if !found {
        bail!(
            "Kernel symbol not found: {symbol}\n\n\
             The function may be inlined in this kernel build.\n\
             Check with: grep {symbol} {KALLSYMS}"
        );
    }
    Ok(())
}
