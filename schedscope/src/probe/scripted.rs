//! Scripted probe source
//!
//! Replays pre-built record batches, one batch per drain, and counts every
//! attach/detach call. Failures can be injected at attach or at a given
//! drain call to exercise the session's release guarantees.

use std::collections::VecDeque;

use schedscope_common::MigrationRecord;

use super::{ProbeSource, ProbeTarget};
use crate::domain::ProbeError;
use crate::record::{CounterKind, MigrationField, MIGRATION_RECORD_SIZE, MIGRATION_SCHEMA};

/// In-memory [`ProbeSource`]
#[derive(Debug)]
pub struct ScriptedProbe {
    target: ProbeTarget,
    batches: VecDeque<Vec<Vec<u8>>>,
    attach_error: Option<String>,
    failing_drain: Option<usize>,
    counter_error: Option<String>,
    counter_hits_per_drain: u64,
    counter: u64,
    lost: Option<u64>,
    attached: bool,
    attach_calls: usize,
    detach_calls: usize,
    drain_calls: usize,
}

impl ScriptedProbe {
    #[must_use]
    pub fn new(target: ProbeTarget) -> Self {
        Self {
            target,
            batches: VecDeque::new(),
            attach_error: None,
            failing_drain: None,
            counter_error: None,
            counter_hits_per_drain: 0,
            counter: 0,
            lost: None,
            attached: false,
            attach_calls: 0,
            detach_calls: 0,
            drain_calls: 0,
        }
    }

    /// Queue records to be returned by one drain call
    #[must_use]
    pub fn with_batch(mut self, records: &[MigrationRecord]) -> Self {
        self.batches.push_back(records.iter().map(encode_record).collect());
        self
    }

    /// Queue raw byte records (e.g. truncated ones) for one drain call
    #[must_use]
    pub fn with_raw_batch(mut self, records: Vec<Vec<u8>>) -> Self {
        self.batches.push_back(records);
        self
    }

    #[must_use]
    pub fn failing_attach(mut self, reason: &str) -> Self {
        self.attach_error = Some(reason.to_string());
        self
    }

    /// Make the `n`th drain call (0-based) fail
    #[must_use]
    pub fn failing_drain_at(mut self, n: usize) -> Self {
        self.failing_drain = Some(n);
        self
    }

    /// Make every counter read fail
    #[must_use]
    pub fn failing_counter(mut self, reason: &str) -> Self {
        self.counter_error = Some(reason.to_string());
        self
    }

    /// Advance the probe-held counter by `hits` on every drain
    #[must_use]
    pub fn with_counter_hits(mut self, hits: u64) -> Self {
        self.counter_hits_per_drain = hits;
        self
    }

    #[must_use]
    pub fn with_lost_events(mut self, lost: u64) -> Self {
        self.lost = Some(lost);
        self
    }

    #[must_use]
    pub fn attach_calls(&self) -> usize {
        self.attach_calls
    }

    #[must_use]
    pub fn detach_calls(&self) -> usize {
        self.detach_calls
    }

    #[must_use]
    pub fn drain_calls(&self) -> usize {
        self.drain_calls
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl ProbeSource for ScriptedProbe {
    fn target(&self) -> ProbeTarget {
        self.target
    }

    fn attach(&mut self) -> Result<(), ProbeError> {
        self.attach_calls += 1;
        if let Some(ref error) = self.attach_error {
            return Err(ProbeError::AttachFailed {
                probe: self.target.program().to_string(),
                target: self.target.symbol().to_string(),
                error: error.clone(),
            });
        }
        self.attached = true;
        Ok(())
    }

    fn detach(&mut self) {
        self.detach_calls += 1;
        self.attached = false;
    }

    fn drain(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<usize, ProbeError> {
        let call = self.drain_calls;
        self.drain_calls += 1;
        if !self.attached {
            return Err(ProbeError::NotAttached);
        }
        if self.failing_drain == Some(call) {
            return Err(ProbeError::DrainFailed(format!("injected failure on drain {call}")));
        }

        self.counter += self.counter_hits_per_drain;

        let batch = self.batches.pop_front().unwrap_or_default();
        for record in &batch {
            sink(record);
        }
        Ok(batch.len())
    }

    fn read_counter(&mut self, kind: CounterKind) -> Result<u64, ProbeError> {
        if let Some(ref reason) = self.counter_error {
            Err(ProbeError::CounterUnavailable(reason.clone()))
        } else if self.target.counter() == Some(kind) {
            Ok(self.counter)
        } else {
            Err(ProbeError::CounterUnavailable(kind.label().to_string()))
        }
    }

    fn lost_events(&mut self) -> Option<u64> {
        self.lost
    }
}

/// Lay a record out on the wire by walking the migration schema
#[must_use]
pub fn encode_record(record: &MigrationRecord) -> Vec<u8> {
    let mut bytes = vec![0u8; MIGRATION_RECORD_SIZE];
    for desc in &MIGRATION_SCHEMA {
        let start = desc.offset;
        match desc.field {
            MigrationField::OnCpu => put_u32(&mut bytes, start, record.on_cpu),
            MigrationField::NewCpu => put_u32(&mut bytes, start, record.new_cpu),
            MigrationField::OldCpu => put_u32(&mut bytes, start, record.old_cpu),
            MigrationField::Pid => put_u32(&mut bytes, start, record.pid),
            MigrationField::Timestamp => {
                bytes[start..start + 8].copy_from_slice(&record.timestamp_ns.to_ne_bytes());
            }
        }
    }
    bytes
}

fn put_u32(bytes: &mut [u8], start: usize, value: u32) {
    bytes[start..start + 4].copy_from_slice(&value.to_ne_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CpuId, Pid};
    use crate::record::MigrationEvent;

    #[test]
    fn test_encode_matches_decode() {
        let record = MigrationRecord { on_cpu: 1, new_cpu: 2, old_cpu: 3, pid: 44, timestamp_ns: 5 };
        let event = MigrationEvent::decode(&encode_record(&record)).unwrap();
        assert_eq!(event.on_cpu, CpuId(1));
        assert_eq!(event.pid, Pid(44));
    }

    #[test]
    fn test_batches_drain_in_order() {
        let record = MigrationRecord { on_cpu: 0, new_cpu: 0, old_cpu: 0, pid: 1, timestamp_ns: 0 };
        let mut probe = ScriptedProbe::new(ProbeTarget::Migrate)
            .with_batch(&[record, record])
            .with_batch(&[record]);
        probe.attach().unwrap();

        let mut seen = 0;
        assert_eq!(probe.drain(&mut |_| seen += 1).unwrap(), 2);
        assert_eq!(probe.drain(&mut |_| seen += 1).unwrap(), 1);
        assert_eq!(probe.drain(&mut |_| seen += 1).unwrap(), 0);
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_counter_advances_per_drain() {
        let mut probe = ScriptedProbe::new(ProbeTarget::ShouldWeBalance).with_counter_hits(4);
        probe.attach().unwrap();
        probe.drain(&mut |_| {}).unwrap();
        probe.drain(&mut |_| {}).unwrap();
        assert_eq!(probe.read_counter(CounterKind::ReturnedTrue).unwrap(), 8);
    }

    #[test]
    fn test_injected_drain_failure() {
        let mut probe = ScriptedProbe::new(ProbeTarget::Migrate).failing_drain_at(1);
        probe.attach().unwrap();
        assert!(probe.drain(&mut |_| {}).is_ok());
        assert!(matches!(probe.drain(&mut |_| {}), Err(ProbeError::DrainFailed(_))));
        assert!(probe.drain(&mut |_| {}).is_ok());
    }
}
