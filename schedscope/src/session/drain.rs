//! Drain tick: probe buffer → decoded events → aggregation engine
//!
//! A tick never blocks. Waiting between ticks belongs to the session, which
//! waits on the workload with the tick interval as timeout.

use log::{debug, warn};

use crate::aggregate::{AggregationEngine, Dimension};
use crate::probe::{ProbeGuard, ProbeSource};
use crate::record::{CounterEvent, Event, MigrationEvent};

/// Per-session drain statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub ticks: u64,
    /// Raw records handed over by the probe
    pub records: u64,
    pub decode_failures: u64,
    pub drain_errors: u64,
    /// Failed counter map reads
    pub counter_errors: u64,
    /// Most recent drain or counter error, for the summary
    pub last_error: Option<String>,
}

/// Owns the aggregation engine while the workload runs
#[derive(Debug)]
pub struct DrainLoop {
    engine: AggregationEngine,
    counter_seen: u64,
    stats: DrainStats,
}

impl DrainLoop {
    #[must_use]
    pub fn new(dimensions: &[Dimension]) -> Self {
        Self { engine: AggregationEngine::new(dimensions), counter_seen: 0, stats: DrainStats::default() }
    }

    /// Run one tick against an attached probe
    ///
    /// Drain and counter failures are recorded in the stats and the tick
    /// carries on; the probe stays attached either way.
    pub fn tick<P: ProbeSource>(&mut self, probe: &mut ProbeGuard<'_, P>) {
        self.stats.ticks += 1;

        let engine = &mut self.engine;
        let mut records = 0u64;
        let mut decode_failures = 0u64;
        let result = probe.drain(&mut |bytes| {
            records += 1;
            match MigrationEvent::decode(bytes) {
                Ok(event) => engine.accumulate(Event::Migration(event)),
                Err(e) => {
                    decode_failures += 1;
                    debug!("Dropping undecodable record: {e}");
                }
            }
        });
        self.stats.records += records;
        self.stats.decode_failures += decode_failures;

        if let Err(e) = result {
            self.stats.drain_errors += 1;
            warn!("Drain failed on tick {}: {e}", self.stats.ticks);
            self.stats.last_error = Some(e.to_string());
        }

        self.poll_counter(probe);
    }

    fn poll_counter<P: ProbeSource>(&mut self, probe: &mut ProbeGuard<'_, P>) {
        let target = probe.target();
        let Some(kind) = target.counter() else {
            return;
        };

        match probe.read_counter(kind) {
            Ok(total) if total > self.counter_seen => {
                let hits = total - self.counter_seen;
                self.counter_seen = total;
                self.engine.accumulate(Event::Counter(CounterEvent { symbol: target.symbol(), kind, hits }));
            }
            Ok(_) => {}
            Err(e) => {
                self.stats.counter_errors += 1;
                warn!("Failed to read {} counter: {e}", target.symbol());
                self.stats.last_error = Some(e.to_string());
            }
        }
    }

    #[must_use]
    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    #[must_use]
    pub fn stats(&self) -> &DrainStats {
        &self.stats
    }

    /// Hand the engine and stats over once draining is complete
    #[must_use]
    pub fn into_parts(self) -> (AggregationEngine, DrainStats) {
        (self.engine, self.stats)
    }
}
