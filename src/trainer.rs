// MOBATCH TRAINER
// TURNS THE DATASET INTO MODELS UNDER A COST POLICY.
//
// GLOBAL (BATCH) FIT: PER DEVICE CLASS, THE FIRST USABLE POST-PUSH ROW IS
// THE BASELINE. EVERY LATER POST-PUSH ROW BECOMES ONE TRAINING EXAMPLE
// LABELLED WITH THE FINITE-DIFFERENCE SLOPE AGAINST THAT BASELINE. THE
// BASELINE ITSELF NEVER TRAINS (ITS SLOPE IS 0/0). OLS OVER THE UNION.
//
// PER-DEVICE (INCREMENTAL) FIT: ONLY THE LATEST POST-PUSH ROW AND THE
// LATEST PRE-PUSH ROW OF THE DEVICE CLASS. ONE PA STEP ON A FRESH MODEL.
// OLDER HISTORY IS IGNORED.

use crate::dataset::{DatasetAccumulator, DeviceHistory};
use crate::features;
use crate::policy::{CostPolicy, ModelKind, ReferencePoint};
use crate::regression::{fit_ols, LinearModel};
use crate::telemetry::{Phase, TelemetryRecord};

#[derive(Default, Debug)]
pub struct TrainingSet {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<f64>,
    /// Rows skipped for a missing feature, missing label or bad topology.
    pub dropped: usize,
}

impl TrainingSet {
    fn push(&mut self, example: Option<(Vec<f64>, f64)>) {
        match example {
            Some((x, y)) => {
                self.rows.push(x);
                self.labels.push(y);
            }
            None => self.dropped += 1,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn as_reference(policy: &CostPolicy, record: &TelemetryRecord) -> Option<ReferencePoint> {
    Some(ReferencePoint {
        batch_size: record.metrics.batch_size?,
        cost: policy.cost(record)?,
    })
}

fn first_reference(policy: &CostPolicy, history: &DeviceHistory) -> Option<ReferencePoint> {
    history
        .rows()
        .filter(|r| r.phase == Phase::Report)
        .find_map(|r| as_reference(policy, r))
}

/// Anchor of the SLO line for a device class: its first usable post-push
/// row, or the policy's static reference when it has none.
pub fn reference_for(
    policy: &CostPolicy,
    dataset: &DatasetAccumulator,
    device_class: &str,
) -> ReferencePoint {
    dataset
        .device(device_class)
        .and_then(|h| first_reference(policy, h))
        .unwrap_or_else(|| policy.static_reference(device_class))
}

// MODEL INPUT FOR ONE RECORD. None DROPS THE ROW.
pub fn feature_row(
    policy: &CostPolicy,
    record: &TelemetryRecord,
    baseline: Option<&TelemetryRecord>,
) -> Option<Vec<f64>> {
    let derived = if policy.features.needs_derived() {
        features::derive(record, baseline).ok()?
    } else {
        features::DerivedFeatures { total_freq: 0.0, energy_per_unit: None }
    };
    policy.features.vector(record, &derived)
}

pub fn build_training_set(policy: &CostPolicy, dataset: &DatasetAccumulator) -> TrainingSet {
    let mut set = TrainingSet::default();

    for (device, history) in dataset.devices() {
        if !policy.trains_on(device) {
            continue;
        }
        match policy.model {
            ModelKind::Slope => {
                let mut baseline: Option<ReferencePoint> = None;
                let mut last_request: Option<&TelemetryRecord> = None;
                for r in history.rows() {
                    if r.phase == Phase::Request {
                        last_request = Some(r);
                        continue;
                    }
                    let reference = match baseline {
                        Some(b) => b,
                        None => {
                            baseline = as_reference(policy, r);
                            if baseline.is_none() {
                                set.dropped += 1;
                            }
                            continue;
                        }
                    };
                    set.push(
                        policy
                            .slope_label(r, reference)
                            .and_then(|y| feature_row(policy, r, last_request).map(|x| (x, y))),
                    );
                }
            }
            ModelKind::Absolute => {
                for r in history.rows().filter(|r| r.phase == Phase::Report) {
                    set.push(
                        policy
                            .cost(r)
                            .and_then(|y| feature_row(policy, r, None).map(|x| (x, y))),
                    );
                }
            }
        }
    }
    set
}

pub struct GlobalFit {
    /// None when no row survived the training filter.
    pub model: Option<LinearModel>,
    pub rows: usize,
    pub dropped: usize,
}

pub fn fit_global(policy: &CostPolicy, dataset: &DatasetAccumulator) -> GlobalFit {
    let set = build_training_set(policy, dataset);
    GlobalFit {
        model: fit_ols(&set.rows, &set.labels),
        rows: set.len(),
        dropped: set.dropped,
    }
}

pub fn fit_device(
    policy: &CostPolicy,
    dataset: &DatasetAccumulator,
    device_class: &str,
) -> Option<LinearModel> {
    if !policy.per_device {
        return None;
    }
    let report = dataset.latest(device_class, Phase::Report)?;
    let request = dataset.latest(device_class, Phase::Request);
    let x = feature_row(policy, report, request)?;

    let y = match policy.model {
        // A DEVICE'S FIRST REPORT IS ALSO ITS BASELINE: FALL BACK TO THE STATIC ANCHOR
        ModelKind::Slope => policy
            .slope_label(report, reference_for(policy, dataset, device_class))
            .or_else(|| policy.slope_label(report, policy.static_reference(device_class)))?,
        ModelKind::Absolute => policy.cost(report)?,
    };
    Some(policy.pa.fit_one(&x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{variant_policy, Variant};

    fn report(model: &str, batch: f64, latency: f64) -> TelemetryRecord {
        let mut r = TelemetryRecord::new(model, Phase::Report);
        let m = &mut r.metrics;
        m.batch_size = Some(batch);
        m.size_latency_ms = Some(latency);
        m.cores = Some(4.0);
        m.cpu_max_freq[0] = Some(1500.0);
        m.device_total_ram = Some(4096.0);
        m.device_available_ram = Some(2048.0);
        m.temperature = Some(30.0);
        r
    }

    #[test]
    fn baseline_row_never_trains() {
        let p = variant_policy(Variant::Latency);
        let ds = DatasetAccumulator::seeded(
            vec![report("X", 56.0, 100.0), report("X", 64.0, 120.0), report("X", 72.0, 140.0)],
            None,
        );
        let set = build_training_set(&p, &ds);
        assert_eq!(set.len(), 2);
        assert_eq!(set.labels, vec![20.0 / 8.0, 40.0 / 16.0]);
    }

    #[test]
    fn equal_batch_rows_are_dropped() {
        let p = variant_policy(Variant::Latency);
        let ds = DatasetAccumulator::seeded(
            vec![report("X", 56.0, 100.0), report("X", 56.0, 130.0)],
            None,
        );
        let set = build_training_set(&p, &ds);
        assert!(set.is_empty());
        assert_eq!(set.dropped, 1);
    }

    #[test]
    fn baselines_are_per_device() {
        let p = variant_policy(Variant::Latency);
        let ds = DatasetAccumulator::seeded(
            vec![
                report("A", 56.0, 100.0),
                report("B", 8.0, 10.0),
                report("A", 64.0, 116.0),
                report("B", 16.0, 30.0),
            ],
            None,
        );
        let set = build_training_set(&p, &ds);
        // DEVICES WALK IN NAME ORDER: A THEN B
        assert_eq!(set.labels, vec![2.0, 2.5]);
    }

    #[test]
    fn train_device_filter_applies() {
        let mut p = variant_policy(Variant::Latency);
        p.train_devices = Some(["B".to_string()].into_iter().collect());
        let ds = DatasetAccumulator::seeded(
            vec![
                report("A", 56.0, 100.0),
                report("A", 64.0, 116.0),
                report("B", 8.0, 10.0),
                report("B", 16.0, 30.0),
            ],
            None,
        );
        assert_eq!(build_training_set(&p, &ds).labels, vec![2.5]);
    }

    #[test]
    fn absolute_model_trains_on_every_report() {
        let p = variant_policy(Variant::MauiLatency);
        let ds = DatasetAccumulator::seeded(
            vec![report("A", 100.0, 1100.0), report("A", 200.0, 2100.0)],
            None,
        );
        let fit = fit_global(&p, &ds);
        let m = fit.model.unwrap();
        assert_eq!(fit.rows, 2);
        assert!((m.coefficients[0] - 10.0).abs() < 1e-9);
        assert!((m.intercept - 100.0).abs() < 1e-6);
    }

    #[test]
    fn first_report_of_device_uses_static_reference() {
        let p = variant_policy(Variant::Latency);
        let ds = DatasetAccumulator::seeded(vec![report("NEW", 100.0, 600.0)], None);
        let m = fit_device(&p, &ds, "NEW").unwrap();
        // LABEL (600 - 100) / (100 - 0) = 5 > EPSILON: THE MODEL MOVED
        assert!(m.intercept > 0.0);
    }

    #[test]
    fn device_fit_disabled_for_single_regressor_variants() {
        let p = variant_policy(Variant::MauiEnergy);
        let ds = DatasetAccumulator::seeded(vec![report("A", 100.0, 600.0)], None);
        assert!(fit_device(&p, &ds, "A").is_none());
    }

    #[test]
    fn reference_falls_back_to_static() {
        let p = variant_policy(Variant::Energy);
        let ds = DatasetAccumulator::new(None);
        assert_eq!(reference_for(&p, &ds, "COL-L29").cost, 0.6);
    }
}
