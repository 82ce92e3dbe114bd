// MOBATCH DATASET ACCUMULATOR
// APPEND-ONLY HISTORY OF EVERY TELEMETRY RECORD SEEN: SEEDED FROM THE
// PRETRAINING DATASET, THEN GROWN BY EVERY REQUEST (PREDICT AND UPDATE).
//
// ROWS ARE GROUPED PER DEVICE CLASS IN ARRIVAL ORDER. DEVICE CLASSES ARE
// KEPT IN A BTreeMap SO THAT EVERY REFIT WALKS THEM IN THE SAME ORDER:
// IDENTICAL INPUT SEQUENCES MUST PRODUCE BIT-IDENTICAL MODELS.
//
// NO EVICTION BY DEFAULT. WITH A RETENTION CAP, THE OLDEST ROWS OF A
// DEVICE CLASS ARE DROPPED ONCE IT EXCEEDS THE CAP.

use std::collections::{BTreeMap, VecDeque};

use crate::telemetry::{Phase, TelemetryRecord};

#[derive(Default)]
pub struct DeviceHistory {
    rows: VecDeque<TelemetryRecord>,
}

impl DeviceHistory {
    pub fn rows(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self, phase: Phase) -> Option<&TelemetryRecord> {
        self.rows.iter().find(|r| r.phase == phase)
    }

    pub fn latest(&self, phase: Phase) -> Option<&TelemetryRecord> {
        self.rows.iter().rev().find(|r| r.phase == phase)
    }
}

#[derive(Default)]
pub struct DatasetAccumulator {
    devices: BTreeMap<String, DeviceHistory>,
    retention: Option<usize>,
    total: usize,
    evicted: u64,
}

impl DatasetAccumulator {
    pub fn new(retention: Option<usize>) -> Self {
        Self {
            devices: BTreeMap::new(),
            retention: retention.filter(|&n| n > 0),
            total: 0,
            evicted: 0,
        }
    }

    pub fn seeded(records: Vec<TelemetryRecord>, retention: Option<usize>) -> Self {
        let mut acc = Self::new(retention);
        for r in records {
            acc.append(r);
        }
        acc
    }

    pub fn append(&mut self, record: TelemetryRecord) {
        let history = self.devices.entry(record.android_model.clone()).or_default();
        history.rows.push_back(record);
        self.total += 1;

        // CAP ENTRIES: EVICT OLDEST IF OVER LIMIT
        if let Some(cap) = self.retention {
            while history.rows.len() > cap {
                history.rows.pop_front();
                self.total -= 1;
                self.evicted += 1;
            }
        }
    }

    pub fn device(&self, device_class: &str) -> Option<&DeviceHistory> {
        self.devices.get(device_class)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&str, &DeviceHistory)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn latest(&self, device_class: &str, phase: Phase) -> Option<&TelemetryRecord> {
        self.devices.get(device_class)?.latest(phase)
    }

    pub fn first(&self, device_class: &str, phase: Phase) -> Option<&TelemetryRecord> {
        self.devices.get(device_class)?.first(phase)
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    // (DEVICE CLASSES, ROWS)
    pub fn summary(&self) -> (usize, usize) {
        (self.devices.len(), self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(model: &str, phase: Phase, batch: f64) -> TelemetryRecord {
        let mut r = TelemetryRecord::new(model, phase);
        r.metrics.batch_size = Some(batch);
        r
    }

    #[test]
    fn grows_monotonically_without_retention() {
        let mut acc = DatasetAccumulator::new(None);
        for i in 0..100 {
            acc.append(rec("A", Phase::Report, i as f64));
        }
        assert_eq!(acc.len(), 100);
        assert_eq!(acc.evicted(), 0);
    }

    #[test]
    fn first_and_latest_per_phase() {
        let mut acc = DatasetAccumulator::new(None);
        acc.append(rec("A", Phase::Request, 1.0));
        acc.append(rec("A", Phase::Report, 2.0));
        acc.append(rec("A", Phase::Request, 3.0));
        acc.append(rec("A", Phase::Report, 4.0));
        acc.append(rec("B", Phase::Report, 5.0));

        assert_eq!(acc.first("A", Phase::Report).unwrap().metrics.batch_size, Some(2.0));
        assert_eq!(acc.latest("A", Phase::Report).unwrap().metrics.batch_size, Some(4.0));
        assert_eq!(acc.latest("A", Phase::Request).unwrap().metrics.batch_size, Some(3.0));
        assert!(acc.latest("C", Phase::Report).is_none());
        assert_eq!(acc.summary(), (2, 5));
    }

    #[test]
    fn retention_evicts_oldest_per_device() {
        let mut acc = DatasetAccumulator::new(Some(2));
        acc.append(rec("A", Phase::Report, 1.0));
        acc.append(rec("A", Phase::Report, 2.0));
        acc.append(rec("A", Phase::Report, 3.0));
        acc.append(rec("B", Phase::Report, 9.0));

        assert_eq!(acc.len(), 3);
        assert_eq!(acc.evicted(), 1);
        assert_eq!(acc.first("A", Phase::Report).unwrap().metrics.batch_size, Some(2.0));
        assert_eq!(acc.device("B").unwrap().len(), 1);
    }

    #[test]
    fn devices_iterate_in_stable_order() {
        let mut acc = DatasetAccumulator::new(None);
        for name in ["zeta", "alpha", "mid"] {
            acc.append(rec(name, Phase::Report, 1.0));
        }
        let names: Vec<&str> = acc.devices().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
