//! # schedscope - Main Entry Point
//!
//! Pre-flight checks, probe load, one measurement session, classification,
//! export, summary.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use schedscope::cli::{exit_code_for, Args, EXIT_SUCCESS};
use schedscope::preflight::run_preflight_checks;
use schedscope::probe::kernel::KernelProbe;
use schedscope::session::Session;
use schedscope::summary::{display_summary, print_chart};
use schedscope::topology::{classify, HostQuery};

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

/// Resolves when the user hits Ctrl+C; never, if the handler can't be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let command = args.workload()?;
    let bpf_object = args.bpf_object();

    run_preflight_checks(args.probe, &bpf_object)?;

    if !quiet {
        println!("schedscope v{}", env!("CARGO_PKG_VERSION"));
        println!("probe: {}", args.probe.symbol());
        println!("workload: {}", command.line());
    }

    let mut probe = KernelProbe::load(&bpf_object, args.probe)?;
    let mut session = Session::new(command, args.session_config());

    let run_summary = session.run(&mut probe, interrupted()).await?;
    info!("{}: {} drain ticks", run_summary.exit_reason, run_summary.stats.ticks);

    let topology = classify(&HostQuery::default(), &args.topology_config());
    let export_config = args.export_config();
    let report = session
        .export(topology, &export_config)
        .context("Failed to export session results")?;

    if !quiet && export_config.charts {
        print_chart(&report, &mut std::io::stdout().lock());
    }

    display_summary(&run_summary, &report);

    Ok(())
}
