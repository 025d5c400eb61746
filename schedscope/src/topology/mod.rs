//! # CPU Topology Classification
//!
//! Maps every online CPU to a [`Category`] once per session. Performance and
//! efficiency cores are told apart by a core-id threshold, and SMT siblings
//! come from a configured CPU set; neither is discovered, since both depend
//! on the specific host.
//!
//! A CPU that shows up in events but not in the resulting [`CpuTopology`] is
//! a [`ClassificationError`], never a silent default.

pub mod query;

use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ClassificationError, CpuId, TopologyError};
pub use query::{CpuEntry, FallbackQuery, HostQuery, LscpuQuery, SysfsQuery, TopologyQuery};

/// Topology category of a logical CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Performance,
    Efficiency,
    SmtSibling,
}

impl Category {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Efficiency => "efficiency",
            Self::SmtSibling => "smt-sibling",
        }
    }
}

/// Session-supplied classification inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Cores with an id below this are performance cores
    pub performance_core_threshold: u32,
    /// CPUs that are the second hardware thread of a performance core
    pub smt_siblings: BTreeSet<CpuId>,
}

impl Default for TopologyConfig {
    /// Hybrid 8P+E layout with odd-numbered SMT siblings
    fn default() -> Self {
        Self {
            performance_core_threshold: 8,
            smt_siblings: (1..16).step_by(2).map(CpuId).collect(),
        }
    }
}

/// Immutable CPU → category map for the CPUs online at snapshot time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTopology {
    categories: BTreeMap<CpuId, Category>,
    smt_siblings: BTreeSet<CpuId>,
}

impl CpuTopology {
    /// Classify already-queried entries
    ///
    /// # Errors
    /// Returns [`TopologyError::NoOnlineCpus`] if no entry is online
    pub fn from_entries(
        entries: &[CpuEntry],
        config: &TopologyConfig,
    ) -> Result<Self, TopologyError> {
        let categories: BTreeMap<CpuId, Category> = entries
            .iter()
            .filter(|entry| entry.online)
            .map(|entry| (entry.cpu, categorize(entry, config)))
            .collect();

        if categories.is_empty() {
            return Err(TopologyError::NoOnlineCpus);
        }

        Ok(Self { categories, smt_siblings: config.smt_siblings.clone() })
    }

    /// Category of `cpu`
    ///
    /// # Errors
    /// Returns [`ClassificationError::UnknownCpu`] if `cpu` was not online
    /// when the topology was taken
    pub fn category(&self, cpu: CpuId) -> Result<Category, ClassificationError> {
        self.categories.get(&cpu).copied().ok_or(ClassificationError::UnknownCpu(cpu))
    }

    /// Whether `cpu` is in the configured SMT-sibling set
    #[must_use]
    pub fn is_smt_sibling(&self, cpu: CpuId) -> bool {
        self.smt_siblings.contains(&cpu)
    }

    /// Every classified CPU, ascending
    pub fn iter(&self) -> impl Iterator<Item = (CpuId, Category)> + '_ {
        self.categories.iter().map(|(cpu, category)| (*cpu, *category))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// CPUs in `cpus` that this topology cannot classify, ascending and deduplicated
    pub fn unknown_cpus(&self, cpus: impl IntoIterator<Item = CpuId>) -> Vec<CpuId> {
        cpus.into_iter()
            .filter(|cpu| !self.categories.contains_key(cpu))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn categorize(entry: &CpuEntry, config: &TopologyConfig) -> Category {
    if entry.core >= config.performance_core_threshold {
        Category::Efficiency
    } else if config.smt_siblings.contains(&entry.cpu) {
        Category::SmtSibling
    } else {
        Category::Performance
    }
}

/// Query the host once and classify its online CPUs
///
/// # Errors
/// Returns [`TopologyError`] if the query fails or reports no online CPU
pub fn classify<Q: TopologyQuery>(
    query: &Q,
    config: &TopologyConfig,
) -> Result<CpuTopology, TopologyError> {
    let entries = query.list_cpus()?;
    debug!("Topology query returned {} CPUs", entries.len());

    let topology = CpuTopology::from_entries(&entries, config)?;
    let count = |wanted: Category| topology.iter().filter(|(_, c)| *c == wanted).count();
    info!(
        "✓ Classified {} online CPUs ({} performance, {} SMT sibling, {} efficiency)",
        topology.len(),
        count(Category::Performance),
        count(Category::SmtSibling),
        count(Category::Efficiency),
    );

    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedQuery(Result<Vec<CpuEntry>, ()>);

    impl TopologyQuery for FixedQuery {
        fn list_cpus(&self) -> Result<Vec<CpuEntry>, TopologyError> {
            self.0.clone().map_err(|()| TopologyError::Unavailable("lscpu not found".into()))
        }
    }

    fn entry(cpu: u32, core: u32, online: bool) -> CpuEntry {
        CpuEntry { cpu: CpuId(cpu), core, online }
    }

    fn config(threshold: u32, smt: &[u32]) -> TopologyConfig {
        TopologyConfig {
            performance_core_threshold: threshold,
            smt_siblings: smt.iter().copied().map(CpuId).collect(),
        }
    }

    #[test]
    fn test_threshold_classification() {
        let query = FixedQuery(Ok(vec![entry(0, 0, true), entry(1, 9, true)]));
        let topology = classify(&query, &config(8, &[])).unwrap();

        assert_eq!(topology.category(CpuId(0)), Ok(Category::Performance));
        assert_eq!(topology.category(CpuId(1)), Ok(Category::Efficiency));
        assert_eq!(topology.len(), 2);
    }

    #[test]
    fn test_unknown_cpu_is_error() {
        let query = FixedQuery(Ok(vec![entry(0, 0, true), entry(1, 9, true)]));
        let topology = classify(&query, &config(8, &[])).unwrap();

        assert_eq!(
            topology.category(CpuId(2)),
            Err(ClassificationError::UnknownCpu(CpuId(2)))
        );
        assert_eq!(topology.unknown_cpus([CpuId(2), CpuId(0), CpuId(2)]), [CpuId(2)]);
    }

    #[test]
    fn test_offline_cpus_excluded() {
        let query = FixedQuery(Ok(vec![entry(0, 0, true), entry(1, 0, false)]));
        let topology = classify(&query, &config(8, &[])).unwrap();

        assert!(topology.category(CpuId(1)).is_err());
        assert_eq!(topology.len(), 1);
    }

    #[test]
    fn test_smt_siblings() {
        let query =
            FixedQuery(Ok(vec![entry(0, 0, true), entry(1, 0, true), entry(16, 8, true)]));
        // CPU 16 is listed as SMT but sits on an efficiency core
        let topology = classify(&query, &config(8, &[1, 16])).unwrap();

        assert_eq!(topology.category(CpuId(0)), Ok(Category::Performance));
        assert_eq!(topology.category(CpuId(1)), Ok(Category::SmtSibling));
        assert_eq!(topology.category(CpuId(16)), Ok(Category::Efficiency));
        assert!(topology.is_smt_sibling(CpuId(16)));
    }

    #[test]
    fn test_query_failure() {
        let err = classify(&FixedQuery(Err(())), &TopologyConfig::default()).unwrap_err();
        assert!(matches!(err, TopologyError::Unavailable(_)));
    }

    #[test]
    fn test_no_online_cpus() {
        let query = FixedQuery(Ok(vec![entry(0, 0, false)]));
        let err = classify(&query, &TopologyConfig::default()).unwrap_err();
        assert!(matches!(err, TopologyError::NoOnlineCpus));
    }

    #[test]
    fn test_default_config() {
        let config = TopologyConfig::default();
        assert_eq!(config.performance_core_threshold, 8);
        let smt: Vec<u32> = config.smt_siblings.iter().map(|c| c.0).collect();
        assert_eq!(smt, [1, 3, 5, 7, 9, 11, 13, 15]);
    }
}
