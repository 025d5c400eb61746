//! # Event Records and Their Schema
//!
//! Raw ring-buffer bytes become [`MigrationEvent`]s through an explicitly
//! declared, ordered field schema ([`MIGRATION_SCHEMA`]). The exporter walks
//! the same schema, so the byte layout, the decode step and the column order
//! of every artifact are one structural contract.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

use schedscope_common::{MigrationRecord, COUNTER_KEY_RETURNED_TRUE};

use crate::domain::{CpuId, DecodeError, Pid, Timestamp};

/// Size of one kernel-side [`MigrationRecord`] on the wire
pub const MIGRATION_RECORD_SIZE: usize = std::mem::size_of::<MigrationRecord>();

/// Identity of a migration record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationField {
    OnCpu,
    NewCpu,
    OldCpu,
    Pid,
    Timestamp,
}

/// How a field is laid out on the wire and what it means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `u32` CPU id, always valid
    Cpu,
    /// `u32` CPU id that may carry the unknown sentinel
    OptionalCpu,
    /// `u32` process id
    Pid,
    /// `u64` nanosecond timestamp
    Ticks,
}

impl FieldKind {
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Cpu | Self::OptionalCpu | Self::Pid => 4,
            Self::Ticks => 8,
        }
    }
}

/// One column of the migration schema
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub field: MigrationField,
    /// Column name used by every export format
    pub name: &'static str,
    pub kind: FieldKind,
    /// Byte offset inside [`MigrationRecord`]
    pub offset: usize,
}

/// Migration record schema, in export order
pub const MIGRATION_SCHEMA: [FieldDescriptor; 5] = [
    FieldDescriptor { field: MigrationField::OnCpu, name: "onCpu", kind: FieldKind::Cpu, offset: 0 },
    FieldDescriptor { field: MigrationField::NewCpu, name: "newCpu", kind: FieldKind::Cpu, offset: 4 },
    FieldDescriptor {
        field: MigrationField::OldCpu,
        name: "oldCpu",
        kind: FieldKind::OptionalCpu,
        offset: 8,
    },
    FieldDescriptor { field: MigrationField::Pid, name: "pid", kind: FieldKind::Pid, offset: 12 },
    FieldDescriptor {
        field: MigrationField::Timestamp,
        name: "timestampTicks",
        kind: FieldKind::Ticks,
        offset: 16,
    },
];

/// A decoded field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Cpu(CpuId),
    OptionalCpu(Option<CpuId>),
    Pid(Pid),
    Ticks(Timestamp),
}

impl fmt::Display for FieldValue {
    /// Bare value as written into tabular output (unknown CPU is empty)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu(cpu) | Self::OptionalCpu(Some(cpu)) => write!(f, "{}", cpu.0),
            Self::OptionalCpu(None) => Ok(()),
            Self::Pid(pid) => write!(f, "{}", pid.0),
            Self::Ticks(ts) => write!(f, "{}", ts.0),
        }
    }
}

/// One task migration observed by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationEvent {
    pub on_cpu: CpuId,
    pub new_cpu: CpuId,
    /// `None` when the kernel could not read the source CPU
    pub old_cpu: Option<CpuId>,
    pub pid: Pid,
    pub timestamp: Timestamp,
}

impl MigrationEvent {
    /// Decode one ring-buffer record by walking [`MIGRATION_SCHEMA`]
    ///
    /// # Errors
    /// Returns [`DecodeError::Truncated`] if `bytes` is shorter than a record
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < MIGRATION_RECORD_SIZE {
            return Err(DecodeError::Truncated {
                expected: MIGRATION_RECORD_SIZE,
                actual: bytes.len(),
            });
        }

        let mut event = Self {
            on_cpu: CpuId(0),
            new_cpu: CpuId(0),
            old_cpu: None,
            pid: Pid(0),
            timestamp: Timestamp(0),
        };

        for desc in &MIGRATION_SCHEMA {
            let raw = read_raw(bytes, desc);
            // Four-byte kinds were read from four bytes, so the cast is lossless
            #[allow(clippy::cast_possible_truncation)]
            let narrow = raw as u32;
            match desc.field {
                MigrationField::OnCpu => event.on_cpu = CpuId(narrow),
                MigrationField::NewCpu => event.new_cpu = CpuId(narrow),
                MigrationField::OldCpu => event.old_cpu = CpuId::from_raw(narrow),
                MigrationField::Pid => event.pid = Pid(narrow),
                MigrationField::Timestamp => event.timestamp = Timestamp(raw),
            }
        }

        Ok(event)
    }

    /// Value of one schema field
    #[must_use]
    pub fn value(&self, field: MigrationField) -> FieldValue {
        match field {
            MigrationField::OnCpu => FieldValue::Cpu(self.on_cpu),
            MigrationField::NewCpu => FieldValue::Cpu(self.new_cpu),
            MigrationField::OldCpu => FieldValue::OptionalCpu(self.old_cpu),
            MigrationField::Pid => FieldValue::Pid(self.pid),
            MigrationField::Timestamp => FieldValue::Ticks(self.timestamp),
        }
    }
}

fn read_raw(bytes: &[u8], desc: &FieldDescriptor) -> u64 {
    let start = desc.offset;
    match desc.kind.width() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[start..start + 4]);
            u64::from(u32::from_ne_bytes(buf))
        }
        _ => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[start..start + 8]);
            u64::from_ne_bytes(buf)
        }
    }
}

impl Serialize for MigrationEvent {
    /// Serializes as a map whose key order follows [`MIGRATION_SCHEMA`]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(MIGRATION_SCHEMA.len()))?;
        for desc in &MIGRATION_SCHEMA {
            match self.value(desc.field) {
                FieldValue::Cpu(cpu) => map.serialize_entry(desc.name, &cpu)?,
                FieldValue::OptionalCpu(cpu) => map.serialize_entry(desc.name, &cpu)?,
                FieldValue::Pid(pid) => map.serialize_entry(desc.name, &pid)?,
                FieldValue::Ticks(ts) => map.serialize_entry(desc.name, &ts)?,
            }
        }
        map.end()
    }
}

/// What a probe-held counter counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CounterKind {
    /// The probed function returned 1
    ReturnedTrue,
}

impl CounterKind {
    /// Fixed key of this counter inside the probe's counter map
    #[must_use]
    pub const fn key(self) -> u64 {
        match self {
            Self::ReturnedTrue => COUNTER_KEY_RETURNED_TRUE,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ReturnedTrue => "returned-true-count",
        }
    }
}

/// New hits on a probe-held counter since the previous read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEvent {
    /// Kernel function the counter is attached to
    pub symbol: &'static str,
    pub kind: CounterKind,
    pub hits: u64,
}

impl CounterEvent {
    /// Name the aggregation engine files this counter under
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:{}", self.symbol, self.kind.label())
    }
}

/// One observed occurrence, as forwarded to the aggregation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Counter(CounterEvent),
    Migration(MigrationEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use schedscope_common::CPU_UNKNOWN;
    use std::mem::offset_of;

    fn encode(record: &MigrationRecord) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MIGRATION_RECORD_SIZE);
        bytes.extend_from_slice(&record.on_cpu.to_ne_bytes());
        bytes.extend_from_slice(&record.new_cpu.to_ne_bytes());
        bytes.extend_from_slice(&record.old_cpu.to_ne_bytes());
        bytes.extend_from_slice(&record.pid.to_ne_bytes());
        bytes.extend_from_slice(&record.timestamp_ns.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_schema_matches_record_layout() {
        let offsets = [
            offset_of!(MigrationRecord, on_cpu),
            offset_of!(MigrationRecord, new_cpu),
            offset_of!(MigrationRecord, old_cpu),
            offset_of!(MigrationRecord, pid),
            offset_of!(MigrationRecord, timestamp_ns),
        ];
        for (desc, offset) in MIGRATION_SCHEMA.iter().zip(offsets) {
            assert_eq!(desc.offset, offset, "offset of {}", desc.name);
        }

        let last = MIGRATION_SCHEMA[MIGRATION_SCHEMA.len() - 1];
        assert_eq!(last.offset + last.kind.width(), MIGRATION_RECORD_SIZE);
    }

    #[test]
    fn test_tracepoint_args_layout() {
        use schedscope_common::SchedMigrateTaskArgs;
        // sched_migrate_task format: pid@24 prio@28 orig_cpu@32 dest_cpu@36
        assert_eq!(offset_of!(SchedMigrateTaskArgs, pid), 24);
        assert_eq!(offset_of!(SchedMigrateTaskArgs, orig_cpu), 32);
        assert_eq!(offset_of!(SchedMigrateTaskArgs, dest_cpu), 36);
    }

    #[test]
    fn test_schema_column_order() {
        let names: Vec<_> = MIGRATION_SCHEMA.iter().map(|d| d.name).collect();
        assert_eq!(names, ["onCpu", "newCpu", "oldCpu", "pid", "timestampTicks"]);
    }

    #[test]
    fn test_decode_record() {
        let bytes = encode(&MigrationRecord {
            on_cpu: 2,
            new_cpu: 5,
            old_cpu: 1,
            pid: 4242,
            timestamp_ns: 123_456_789,
        });

        let event = MigrationEvent::decode(&bytes).unwrap();
        assert_eq!(event.on_cpu, CpuId(2));
        assert_eq!(event.new_cpu, CpuId(5));
        assert_eq!(event.old_cpu, Some(CpuId(1)));
        assert_eq!(event.pid, Pid(4242));
        assert_eq!(event.timestamp, Timestamp(123_456_789));
    }

    #[test]
    fn test_decode_unknown_old_cpu() {
        let bytes = encode(&MigrationRecord {
            on_cpu: 0,
            new_cpu: 3,
            old_cpu: CPU_UNKNOWN,
            pid: 7,
            timestamp_ns: 1,
        });

        let event = MigrationEvent::decode(&bytes).unwrap();
        assert_eq!(event.old_cpu, None);
        assert_eq!(event.value(MigrationField::OldCpu).to_string(), "");
    }

    #[test]
    fn test_decode_truncated() {
        let err = MigrationEvent::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { expected: MIGRATION_RECORD_SIZE, actual: 10 });
    }

    #[test]
    fn test_json_key_order_follows_schema() {
        let event = MigrationEvent {
            on_cpu: CpuId(1),
            new_cpu: CpuId(2),
            old_cpu: None,
            pid: Pid(9),
            timestamp: Timestamp(10),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"onCpu":1,"newCpu":2,"oldCpu":null,"pid":9,"timestampTicks":10}"#
        );
    }

    #[test]
    fn test_counter_name() {
        let event =
            CounterEvent { symbol: "need_active_balance", kind: CounterKind::ReturnedTrue, hits: 3 };
        assert_eq!(event.name(), "need_active_balance:returned-true-count");
        assert_eq!(CounterKind::ReturnedTrue.key(), 1);
    }
}
