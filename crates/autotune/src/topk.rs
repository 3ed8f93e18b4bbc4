//! Bounded best-K tracking over a stream of results.

use crate::stats::ResultRecord;
use kernelsweep_kernels::config::{Device, MatmulProblem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub id: String,
    pub time_ms: f64,
}

/// The `capacity` lowest times seen so far, ascending.
///
/// A new entry must be strictly faster than the current worst to displace
/// it, so the first-seen entry keeps a tied boundary slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopK {
    capacity: usize,
    entries: Vec<RankedEntry>,
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offers an entry; returns whether it was retained.
    pub fn offer(&mut self, id: impl Into<String>, time_ms: f64) -> bool {
        if self.capacity == 0 || time_ms.is_nan() {
            return false;
        }
        if self.entries.len() >= self.capacity {
            match self.entries.last() {
                Some(worst) if time_ms < worst.time_ms => {
                    self.entries.pop();
                }
                _ => return false,
            }
        }
        // After equal times, so earlier arrivals rank first.
        let at = self.entries.partition_point(|entry| entry.time_ms <= time_ms);
        self.entries.insert(
            at,
            RankedEntry {
                id: id.into(),
                time_ms,
            },
        );
        true
    }
}

/// Which records are eligible for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    /// Problem size ranked per device; devices without an entry rank every size.
    pub sizes: BTreeMap<Device, MatmulProblem>,
}

impl Default for ReportFilter {
    fn default() -> Self {
        Self {
            sizes: BTreeMap::from([
                (Device::Cpu, MatmulProblem::square(4096)),
                (Device::Gpu, MatmulProblem::square(8192)),
            ]),
        }
    }
}

impl ReportFilter {
    pub fn any_size() -> Self {
        Self {
            sizes: BTreeMap::new(),
        }
    }

    pub fn accepts(&self, record: &ResultRecord) -> bool {
        if !record.is_valid() {
            return false;
        }
        match self.sizes.get(&record.config.device()) {
            Some(problem) => *problem == record.config.problem,
            None => true,
        }
    }
}

/// One [`TopK`] per device category.
#[derive(Debug, Clone)]
pub struct Leaderboard {
    capacity: usize,
    filter: ReportFilter,
    by_device: BTreeMap<Device, TopK>,
}

impl Leaderboard {
    pub fn new(capacity: usize, filter: ReportFilter) -> Self {
        Self {
            capacity,
            filter,
            by_device: BTreeMap::new(),
        }
    }

    /// Offers a record's mean total time under `id`. Records without a
    /// valid mean, or at a non-reported size, are ignored.
    pub fn offer_record(&mut self, id: impl Into<String>, record: &ResultRecord) -> bool {
        if !self.filter.accepts(record) {
            return false;
        }
        let Some(time_ms) = record.mean_total_ms() else {
            return false;
        };
        let capacity = self.capacity;
        self.by_device
            .entry(record.config.device())
            .or_insert_with(|| TopK::new(capacity))
            .offer(id, time_ms)
    }

    pub fn device(&self, device: Device) -> &[RankedEntry] {
        self.by_device
            .get(&device)
            .map(TopK::entries)
            .unwrap_or_default()
    }

    pub fn devices(&self) -> impl Iterator<Item = (Device, &TopK)> {
        self.by_device.iter().map(|(device, top)| (*device, top))
    }
}
