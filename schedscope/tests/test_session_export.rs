use std::future::pending;

use schedscope::aggregate::Dimension;
use schedscope::domain::CpuId;
use schedscope::export::{ExportConfig, ExportFormat};
use schedscope::probe::scripted::ScriptedProbe;
use schedscope::probe::ProbeTarget;
use schedscope::session::{ExitReason, Session, SessionConfig, SessionState, WorkloadCommand};
use schedscope::topology::{CpuEntry, CpuTopology, TopologyConfig};
use schedscope_common::{MigrationRecord, CPU_UNKNOWN};
use tempfile::TempDir;

fn record(on_cpu: u32, old_cpu: u32, pid: u32, timestamp_ns: u64) -> MigrationRecord {
    MigrationRecord { on_cpu, new_cpu: on_cpu, old_cpu, pid, timestamp_ns }
}

/// online {0, 1}, cores {0, 9}
fn hybrid_topology() -> CpuTopology {
    let entries = [
        CpuEntry { cpu: CpuId(0), core: 0, online: true },
        CpuEntry { cpu: CpuId(1), core: 9, online: true },
    ];
    CpuTopology::from_entries(&entries, &TopologyConfig::default()).unwrap()
}

fn config(dimensions: Vec<Dimension>) -> SessionConfig {
    SessionConfig { dimensions, ..SessionConfig::default() }
}

#[tokio::test]
async fn test_scenario_end_to_end() {
    let mut probe = ScriptedProbe::new(ProbeTarget::Migrate)
        .with_batch(&[record(0, 1, 100, 1_000), record(1, 0, 101, 2_000)])
        .with_batch(&[record(0, CPU_UNKNOWN, 102, 3_000), record(3, 0, 0, 4_000)])
        .with_lost_events(0);
    let mut session = Session::new(WorkloadCommand::shell("true").unwrap(), config(vec![Dimension::OnCpu]));

    let run = session.run(&mut probe, pending()).await.unwrap();
    assert_eq!(run.exit_reason, ExitReason::WorkloadExited);
    assert_eq!(probe.detach_calls(), 1);

    let dir = TempDir::new().unwrap();
    let export = ExportConfig { prefix: dir.path().join("task_balancing"), ..ExportConfig::default() };
    let report = session.export(Ok(hybrid_topology()), &export).unwrap();
    assert_eq!(session.state(), SessionState::Exported);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let on_cpu = report.bundle.aggregates.dimension(Dimension::OnCpu).unwrap();
    assert_eq!(on_cpu.count(CpuId(0)), 2);
    assert_eq!(on_cpu.count(CpuId(1)), 1);
    assert_eq!(on_cpu.total(), 3);

    let csv = std::fs::read_to_string(dir.path().join("task_balancing.csv")).unwrap();
    let rows: Vec<&str> = csv.lines().skip(1).collect();
    assert_eq!(rows, vec!["0,0,1,100,1000", "1,1,0,101,2000", "0,0,,102,3000"]);

    let aggregate = std::fs::read_to_string(dir.path().join("task_balancing_aggregate.csv")).unwrap();
    assert_eq!(aggregate, "dimension,cpu,pid,count\non-cpu,0,,2\non-cpu,1,,1\n");

    let chart = std::fs::read_to_string(dir.path().join("task_balancing_on-cpu.txt")).unwrap();
    assert!(chart.contains("blue = performance core"));
    assert!(chart.contains("orange = efficiency core"));

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("task_balancing.json")).unwrap()).unwrap();
    assert_eq!(json["events"][2]["oldCpu"], serde_json::Value::Null);
    assert_eq!(json["events_lost"], 0);
}

#[tokio::test]
async fn test_conservation_across_dimensions() {
    let batch: Vec<MigrationRecord> = (0..40u32)
        .map(|i| {
            let old = if i % 7 == 0 { CPU_UNKNOWN } else { i % 2 };
            MigrationRecord { on_cpu: i % 2, new_cpu: (i + 1) % 2, old_cpu: old, pid: i % 5, timestamp_ns: u64::from(i) }
        })
        .collect();
    let mut probe = ScriptedProbe::new(ProbeTarget::Migrate).with_batch(&batch);
    let dimensions = vec![Dimension::OnCpu, Dimension::NewCpu, Dimension::OldCpu, Dimension::CpuPid];
    let mut session = Session::new(WorkloadCommand::shell("true").unwrap(), config(dimensions.clone()));
    session.run(&mut probe, pending()).await.unwrap();

    let dir = TempDir::new().unwrap();
    let export = ExportConfig { prefix: dir.path().join("c"), formats: vec![ExportFormat::Csv], charts: false };
    let report = session.export(Ok(hybrid_topology()), &export).unwrap();

    let aggregates = &report.bundle.aggregates;
    // pid = i % 5, so every fifth record is PID 0
    assert_eq!(aggregates.ingested, 32);
    assert_eq!(aggregates.discarded_idle, 8);
    assert_eq!(report.bundle.events.len(), 32);
    for dimension in dimensions {
        assert_eq!(aggregates.dimension(dimension).unwrap().total(), 32, "{dimension:?}");
    }
    assert!(aggregates.dimension(Dimension::OldCpu).unwrap().unattributed > 0);
}

#[tokio::test]
async fn test_counter_probe_summary() {
    let mut probe = ScriptedProbe::new(ProbeTarget::NeedActiveBalance).with_counter_hits(5);
    let mut session = Session::new(WorkloadCommand::shell("true").unwrap(), SessionConfig::default());
    let run = session.run(&mut probe, pending()).await.unwrap();

    let dir = TempDir::new().unwrap();
    let export = ExportConfig { prefix: dir.path().join("n"), ..ExportConfig::default() };
    let report = session.export(Ok(hybrid_topology()), &export).unwrap();

    // One counter read per drain tick, including the final drain
    let expected = 5 * run.stats.ticks;
    assert_eq!(
        report.bundle.aggregates.counters.get("need_active_balance:returned-true-count"),
        Some(&expected)
    );
    let text = schedscope::summary::format_summary(&run, &report);
    assert!(text.contains(&format!("'need_active_balance' returned 1 a total of {expected} times")));
}
