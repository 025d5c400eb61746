//! # Aggregation Engine
//!
//! Accumulates decoded events into per-dimension count tables plus the raw
//! migration log. Only the drain loop ever touches the engine, so there is no
//! locking; [`AggregationEngine::snapshot`] can be taken at any time.
//!
//! ## Conservation
//!
//! For every grouping dimension, `sum(buckets) + unattributed` equals the
//! number of migrations ingested with `pid != 0`. `unattributed` is only
//! non-zero for `old-cpu`, where the kernel may not know the source CPU.

use clap::ValueEnum;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{CpuId, Pid};
use crate::record::{CounterEvent, Event, MigrationEvent};

/// A way of grouping migrations into buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Dimension {
    /// CPU the probe fired on
    OnCpu,
    /// Destination CPU
    NewCpu,
    /// Source CPU
    OldCpu,
    /// (CPU the probe fired on, PID) pairs
    CpuPid,
}

impl Dimension {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OnCpu => "on-cpu",
            Self::NewCpu => "new-cpu",
            Self::OldCpu => "old-cpu",
            Self::CpuPid => "cpu-pid",
        }
    }

    /// True if buckets are keyed by CPU alone (and so can be charted)
    #[must_use]
    pub const fn is_per_cpu(self) -> bool {
        !matches!(self, Self::CpuPid)
    }

    /// Bucket for an event, or `None` if the event lacks the field
    #[must_use]
    pub fn key(self, event: &MigrationEvent) -> Option<GroupKey> {
        match self {
            Self::OnCpu => Some(GroupKey::Cpu(event.on_cpu)),
            Self::NewCpu => Some(GroupKey::Cpu(event.new_cpu)),
            Self::OldCpu => event.old_cpu.map(GroupKey::Cpu),
            Self::CpuPid => Some(GroupKey::CpuPid(event.on_cpu, event.pid)),
        }
    }
}

/// Bucket identity inside a [`DimensionTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Cpu(CpuId),
    CpuPid(CpuId, Pid),
}

impl GroupKey {
    #[must_use]
    pub fn cpu(self) -> CpuId {
        match self {
            Self::Cpu(cpu) | Self::CpuPid(cpu, _) => cpu,
        }
    }

    #[must_use]
    pub fn pid(self) -> Option<Pid> {
        match self {
            Self::Cpu(_) => None,
            Self::CpuPid(_, pid) => Some(pid),
        }
    }
}

/// Counts for one grouping dimension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionTable {
    pub buckets: BTreeMap<GroupKey, u64>,
    /// Events that had no value for this dimension
    pub unattributed: u64,
}

impl DimensionTable {
    /// Sum over all buckets plus unattributed events
    #[must_use]
    pub fn total(&self) -> u64 {
        self.buckets.values().sum::<u64>() + self.unattributed
    }

    /// Count of one CPU bucket (0 if absent)
    #[must_use]
    pub fn count(&self, cpu: CpuId) -> u64 {
        self.buckets.get(&GroupKey::Cpu(cpu)).copied().unwrap_or(0)
    }

    fn add(&mut self, key: Option<GroupKey>) {
        match key {
            Some(key) => *self.buckets.entry(key).or_insert(0) += 1,
            None => self.unattributed += 1,
        }
    }
}

/// One flattened aggregate row, in table order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateRow {
    pub dimension: &'static str,
    /// `None` for the unattributed row
    pub cpu: Option<u32>,
    pub pid: Option<u32>,
    pub count: u64,
}

/// Immutable view of the accumulated state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateTable {
    pub dimensions: BTreeMap<Dimension, DimensionTable>,
    pub counters: BTreeMap<String, u64>,
    /// Migrations with a real PID
    pub ingested: u64,
    /// Migrations dropped for carrying PID 0
    pub discarded_idle: u64,
}

impl AggregateTable {
    /// Rebuild a table from a raw migration log
    #[must_use]
    pub fn from_events(dimensions: &[Dimension], events: &[MigrationEvent]) -> Self {
        let mut engine = AggregationEngine::new(dimensions);
        for event in events {
            engine.accumulate(Event::Migration(*event));
        }
        engine.snapshot()
    }

    #[must_use]
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionTable> {
        self.dimensions.get(&dimension)
    }

    /// Flatten into rows ordered by dimension, then bucket key
    #[must_use]
    pub fn rows(&self) -> Vec<AggregateRow> {
        let mut rows = Vec::new();
        for (dimension, table) in &self.dimensions {
            for (key, count) in &table.buckets {
                rows.push(AggregateRow {
                    dimension: dimension.label(),
                    cpu: Some(key.cpu().0),
                    pid: key.pid().map(|pid| pid.0),
                    count: *count,
                });
            }
            if table.unattributed > 0 {
                rows.push(AggregateRow {
                    dimension: dimension.label(),
                    cpu: None,
                    pid: None,
                    count: table.unattributed,
                });
            }
        }
        rows
    }
}

/// Accumulates events for one session
#[derive(Debug)]
pub struct AggregationEngine {
    tables: BTreeMap<Dimension, DimensionTable>,
    counters: BTreeMap<String, u64>,
    events: Vec<MigrationEvent>,
    ingested: u64,
    discarded_idle: u64,
}

impl AggregationEngine {
    /// Create an engine grouping by `dimensions`; `on-cpu` is always included
    #[must_use]
    pub fn new(dimensions: &[Dimension]) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(Dimension::OnCpu, DimensionTable::default());
        for dimension in dimensions {
            tables.entry(*dimension).or_default();
        }

        Self {
            tables,
            counters: BTreeMap::new(),
            events: Vec::new(),
            ingested: 0,
            discarded_idle: 0,
        }
    }

    /// Fold one event into the accumulated state
    pub fn accumulate(&mut self, event: Event) {
        match event {
            Event::Counter(counter) => self.accumulate_counter(&counter),
            Event::Migration(migration) => self.accumulate_migration(migration),
        }
    }

    fn accumulate_counter(&mut self, counter: &CounterEvent) {
        *self.counters.entry(counter.name()).or_insert(0) += counter.hits;
    }

    fn accumulate_migration(&mut self, event: MigrationEvent) {
        if event.pid.is_idle() {
            self.discarded_idle += 1;
            return;
        }

        for (dimension, table) in &mut self.tables {
            table.add(dimension.key(&event));
        }
        self.ingested += 1;
        self.events.push(event);
    }

    /// Number of migrations ingested so far
    #[must_use]
    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    /// Raw migration log (PID 0 excluded)
    #[must_use]
    pub fn events(&self) -> &[MigrationEvent] {
        &self.events
    }

    #[must_use]
    pub fn snapshot(&self) -> AggregateTable {
        AggregateTable {
            dimensions: self.tables.clone(),
            counters: self.counters.clone(),
            ingested: self.ingested,
            discarded_idle: self.discarded_idle,
        }
    }

    /// Consume the engine, yielding the raw log and the final table
    #[must_use]
    pub fn finish(self) -> (Vec<MigrationEvent>, AggregateTable) {
        let table = self.snapshot();
        debug!(
            "Aggregation finished: {} migrations, {} idle discarded, {} counters",
            table.ingested,
            table.discarded_idle,
            table.counters.len()
        );
        (self.events, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use crate::record::CounterKind;

    fn migration(on: u32, new: u32, old: Option<u32>, pid: u32) -> Event {
        Event::Migration(MigrationEvent {
            on_cpu: CpuId(on),
            new_cpu: CpuId(new),
            old_cpu: old.map(CpuId),
            pid: Pid(pid),
            timestamp: Timestamp(u64::from(pid)),
        })
    }

    const ALL: [Dimension; 4] =
        [Dimension::OnCpu, Dimension::NewCpu, Dimension::OldCpu, Dimension::CpuPid];

    #[test]
    fn test_scenario_aggregate() {
        let mut engine = AggregationEngine::new(&[Dimension::OnCpu]);
        engine.accumulate(migration(0, 1, Some(1), 100));
        engine.accumulate(migration(1, 0, Some(0), 101));
        engine.accumulate(migration(0, 2, Some(2), 102));
        engine.accumulate(migration(3, 0, Some(0), 0));

        let table = engine.snapshot();
        let on_cpu = table.dimension(Dimension::OnCpu).unwrap();
        assert_eq!(on_cpu.buckets.len(), 2);
        assert_eq!(on_cpu.count(CpuId(0)), 2);
        assert_eq!(on_cpu.count(CpuId(1)), 1);
        assert_eq!(on_cpu.count(CpuId(3)), 0);
        assert_eq!(table.ingested, 3);
        assert_eq!(table.discarded_idle, 1);
        assert_eq!(engine.events().len(), 3);
    }

    #[test]
    fn test_conservation_per_dimension() {
        let mut engine = AggregationEngine::new(&ALL);
        // Deterministic pseudo-random stream, some idle and some unknown sources
        let mut seed = 0x2545_f491_u32;
        let mut expected = 0;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let pid = seed % 7;
            let old = if seed % 5 == 0 { None } else { Some(seed % 16) };
            if pid != 0 {
                expected += 1;
            }
            engine.accumulate(migration(seed % 16, (seed >> 4) % 16, old, pid));
        }

        let table = engine.snapshot();
        assert_eq!(table.ingested, expected);
        for dimension in ALL {
            let t = table.dimension(dimension).unwrap();
            assert_eq!(t.total(), expected, "dimension {}", dimension.label());
        }
        assert_eq!(table.dimension(Dimension::OnCpu).unwrap().unattributed, 0);
    }

    #[test]
    fn test_per_cpu_conservation() {
        let stream = [(0, 5), (1, 6), (0, 7), (2, 0), (1, 8), (0, 0)];
        let mut engine = AggregationEngine::new(&[]);
        for (cpu, pid) in stream {
            engine.accumulate(migration(cpu, cpu, Some(cpu), pid));
        }

        let table = engine.snapshot();
        let on_cpu = table.dimension(Dimension::OnCpu).unwrap();
        for cpu in 0..3 {
            let expected = stream.iter().filter(|(c, p)| *c == cpu && *p != 0).count() as u64;
            assert_eq!(on_cpu.count(CpuId(cpu)), expected);
        }
    }

    #[test]
    fn test_idle_pid_never_bucketed() {
        let mut engine = AggregationEngine::new(&ALL);
        engine.accumulate(migration(4, 4, Some(4), 0));

        let table = engine.snapshot();
        assert!(engine.events().is_empty());
        for t in table.dimensions.values() {
            assert!(t.buckets.is_empty());
            assert_eq!(t.unattributed, 0);
        }
    }

    #[test]
    fn test_unknown_old_cpu_is_unattributed() {
        let mut engine = AggregationEngine::new(&[Dimension::OldCpu]);
        engine.accumulate(migration(0, 1, None, 10));

        let table = engine.snapshot();
        let old = table.dimension(Dimension::OldCpu).unwrap();
        assert_eq!(old.count(CpuId(0)), 0);
        assert_eq!(old.unattributed, 1);
        let row = table.rows().into_iter().find(|r| r.dimension == "old-cpu").unwrap();
        assert_eq!(row.cpu, None);
    }

    #[test]
    fn test_counter_accumulates() {
        let mut engine = AggregationEngine::new(&[]);
        for hits in [3, 0, 4] {
            engine.accumulate(Event::Counter(CounterEvent {
                symbol: "should_we_balance",
                kind: CounterKind::ReturnedTrue,
                hits,
            }));
        }

        let table = engine.snapshot();
        assert_eq!(table.counters["should_we_balance:returned-true-count"], 7);
        assert_eq!(table.ingested, 0);
    }

    #[test]
    fn test_table_recomputable_from_log() {
        let mut engine = AggregationEngine::new(&ALL);
        for (on, pid) in [(0, 1), (1, 2), (1, 0), (2, 3)] {
            engine.accumulate(migration(on, on + 1, Some(on), pid));
        }

        let snapshot = engine.snapshot();
        let (events, table) = engine.finish();
        assert_eq!(table, snapshot);

        let rebuilt = AggregateTable::from_events(&ALL, &events);
        assert_eq!(rebuilt.dimensions, table.dimensions);
        assert_eq!(rebuilt.ingested, table.ingested);
    }

    #[test]
    fn test_rows_are_ordered() {
        let mut engine = AggregationEngine::new(&[Dimension::CpuPid]);
        engine.accumulate(migration(2, 0, Some(0), 9));
        engine.accumulate(migration(0, 0, Some(0), 5));
        engine.accumulate(migration(0, 0, Some(0), 4));

        let rows = engine.snapshot().rows();
        let keys: Vec<_> = rows.iter().map(|r| (r.dimension, r.cpu, r.pid)).collect();
        assert_eq!(
            keys,
            [
                ("on-cpu", Some(0), None),
                ("on-cpu", Some(2), None),
                ("cpu-pid", Some(0), Some(4)),
                ("cpu-pid", Some(0), Some(5)),
                ("cpu-pid", Some(2), Some(9)),
            ]
        );
    }
}
