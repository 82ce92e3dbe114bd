// MOBATCH COST POLICIES
// PURE-RUST MODULE: NO I/O, NO LOCKS. EVERYTHING THAT DIFFERS BETWEEN THE
// ENERGY, LATENCY AND SINGLE-REGRESSOR VARIANTS LIVES HERE:
//   WHICH FEATURES FEED THE MODEL
//   WHICH COST FIELD IS THE LABEL
//   HOW THE SLO BECOMES A TARGET COST FOR A DEVICE CLASS
//   CLAMP BOUNDS AND THE DEGENERATE-SLOPE FALLBACK
//   PASSIVE-AGGRESSIVE HYPERPARAMETERS

use std::collections::BTreeSet;

use crate::features::DerivedFeatures;
use crate::regression::PassiveAggressive;
use crate::telemetry::{Metric, Schema, TelemetryRecord};

// BATTERY CAPACITIES (mAh) OF THE PROFILED HANDSETS
pub const BATTERY_MAH: [(&str, f64); 5] = [
    ("COL-L29", 3400.0),
    ("STF-L09", 3200.0),
    ("Galaxy S7", 3000.0),
    ("Galaxy S4 Mini", 1900.0),
    ("Xperia E3", 2330.0),
];
pub const DEFAULT_BATTERY_MAH: f64 = 3000.0;

// ENERGY OF A NEAR-EMPTY BATCH (mAh), USED WHEN A DEVICE HAS NO REPORT HISTORY
pub const ENERGY_REFERENCE_MAH: [(&str, f64); 5] = [
    ("COL-L29", 0.6),
    ("STF-L09", 0.12),
    ("Galaxy S7", 0.1),
    ("Galaxy S4 Mini", 0.05),
    ("Xperia E3", 0.14),
];
pub const DEFAULT_ENERGY_REFERENCE_MAH: f64 = 0.1;

// LATENCY OF A NEAR-EMPTY BATCH (ms)
pub const LATENCY_REFERENCE_MS: f64 = 100.0;

// SLO DEFAULTS
pub const ENERGY_SLO_PCT: f64 = 0.075;      // % OF BATTERY CAPACITY PER BATCH
pub const LATENCY_SLO_MS: f64 = 10_000.0;
pub const MAUI_LATENCY_SLO_MS: f64 = 3_000.0;

// BATCH SIZES MUST BE DIVISIBLE BY 8
pub const BATCH_ALIGN: u64 = 8;

const ENERGY_BOUNDS: (u64, u64) = (56, 5000);
const LATENCY_BOUNDS: (u64, u64) = (104, 10_000);
const MAUI_ENERGY_BOUNDS: (u64, u64) = (56, 2000);
const MAUI_LATENCY_BOUNDS: (u64, u64) = (56, 1504);

const PA_C: f64 = 0.1;
const ENERGY_PA_EPSILON: f64 = 0.00006;
const LATENCY_PA_EPSILON: f64 = 0.1;

// VARIANT

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Variant {
    Energy,
    Latency,
    MauiEnergy,
    MauiLatency,
}

impl Variant {
    pub fn label(self) -> &'static str {
        match self {
            Self::Energy => "ENERGY",
            Self::Latency => "LATENCY",
            Self::MauiEnergy => "MAUI-ENERGY",
            Self::MauiLatency => "MAUI-LATENCY",
        }
    }

    pub fn schema(self) -> Schema {
        match self {
            Self::Latency => Schema::latency(),
            _ => Schema::energy(),
        }
    }

    // STRICT PRETRAINING HEADER. LATENCY CSVS USE THE OLDER LAYOUT.
    pub fn dataset_schema(self) -> Schema {
        match self {
            Self::Latency => Schema::latency_dataset(),
            _ => Schema::energy(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CostMetric {
    Energy,
    Latency,
}

impl CostMetric {
    pub fn field(self) -> Metric {
        match self {
            Self::Energy => Metric::SizeEnergy,
            Self::Latency => Metric::SizeLatency,
        }
    }
}

// WHAT THE MODEL PREDICTS
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModelKind {
    /// Features -> cost per unit of batch size.
    Slope,
    /// Batch size -> absolute cost. Inverted through (intercept, coefficient).
    Absolute,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FeatureSet {
    /// deviceTotalRam, deviceAvailableRam, temperature, totalFreq, energyPerUnit
    Energy,
    /// deviceTotalRam, deviceAvailableRam, temperature, totalFreq
    Latency,
    /// batchSize
    BatchOnly,
}

impl FeatureSet {
    pub fn width(self) -> usize {
        match self {
            Self::Energy => 5,
            Self::Latency => 4,
            Self::BatchOnly => 1,
        }
    }

    // None WHEN ANY REQUIRED FEATURE IS MISSING. CALLERS DROP SUCH ROWS.
    pub fn vector(self, record: &TelemetryRecord, derived: &DerivedFeatures) -> Option<Vec<f64>> {
        let m = &record.metrics;
        match self {
            Self::Energy => Some(vec![
                m.device_total_ram?,
                m.device_available_ram?,
                m.temperature?,
                derived.total_freq,
                derived.energy_per_unit?,
            ]),
            Self::Latency => Some(vec![
                m.device_total_ram?,
                m.device_available_ram?,
                m.temperature?,
                derived.total_freq,
            ]),
            Self::BatchOnly => Some(vec![m.batch_size?]),
        }
    }

    pub fn needs_derived(self) -> bool {
        self != Self::BatchOnly
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SloTarget {
    /// Percent of the device's battery capacity, in mAh.
    BatteryPercent(f64),
    /// Fixed budget in the cost unit (ms for latency).
    Fixed(f64),
}

/// A (batch size, cost) point the SLO line is anchored to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReferencePoint {
    pub batch_size: f64,
    pub cost: f64,
}

#[derive(Clone, Debug)]
pub struct CostPolicy {
    pub variant: Variant,
    pub metric: CostMetric,
    pub model: ModelKind,
    pub features: FeatureSet,
    pub slo: SloTarget,
    pub min_batch: u64,
    pub max_batch: u64,
    pub fallback_batch: u64,
    /// Fit and serve one online model per device class.
    pub per_device: bool,
    pub pa: PassiveAggressive,
    /// Restrict global training rows to these device classes. None = all.
    pub train_devices: Option<BTreeSet<String>>,
    /// Drop implausible pretraining rows (cpu usage outside [0,1], no processes).
    pub sanitize_pretraining: bool,
    /// Pretraining header must match the schema column set exactly.
    pub strict_schema: bool,
}

impl CostPolicy {
    pub fn cost(&self, record: &TelemetryRecord) -> Option<f64> {
        record.metrics.get(self.metric.field())
    }

    pub fn target_for(&self, device_class: &str) -> f64 {
        match self.slo {
            SloTarget::BatteryPercent(pct) => pct * battery_mah(device_class) / 100.0,
            SloTarget::Fixed(v) => v,
        }
    }

    pub fn clamp_bounds(&self) -> (u64, u64) {
        (self.min_batch, self.max_batch)
    }

    // STATIC ANCHOR WHEN THE DEVICE HAS NO USABLE REPORT HISTORY
    pub fn static_reference(&self, device_class: &str) -> ReferencePoint {
        let cost = match self.metric {
            CostMetric::Energy => lookup(&ENERGY_REFERENCE_MAH, device_class)
                .unwrap_or(DEFAULT_ENERGY_REFERENCE_MAH),
            CostMetric::Latency => LATENCY_REFERENCE_MS,
        };
        ReferencePoint { batch_size: 0.0, cost }
    }

    // FINITE-DIFFERENCE SLOPE AGAINST A REFERENCE. None WHEN UNDEFINED.
    pub fn slope_label(&self, record: &TelemetryRecord, reference: ReferencePoint) -> Option<f64> {
        let cost = self.cost(record)?;
        let batch = record.metrics.batch_size?;
        let dx = batch - reference.batch_size;
        if dx == 0.0 {
            return None;
        }
        Some((cost - reference.cost) / dx).filter(|v| v.is_finite())
    }

    pub fn trains_on(&self, device_class: &str) -> bool {
        self.train_devices
            .as_ref()
            .map_or(true, |set| set.contains(device_class))
    }

    pub fn plausible(&self, record: &TelemetryRecord) -> bool {
        if !self.sanitize_pretraining {
            return true;
        }
        let m = &record.metrics;
        let usage_ok = m.device_cpu_usage.map_or(false, |u| (0.0..=1.0).contains(&u));
        let procs_ok = m.running_processes.map_or(false, |p| p > 0.0);
        usage_ok && procs_ok
    }
}

fn lookup(table: &[(&str, f64)], key: &str) -> Option<f64> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

pub fn battery_mah(device_class: &str) -> f64 {
    lookup(&BATTERY_MAH, device_class).unwrap_or(DEFAULT_BATTERY_MAH)
}

// VARIANT PRESETS

pub fn variant_policy(v: Variant) -> CostPolicy {
    match v {
        Variant::Energy => CostPolicy {
            variant: v,
            metric: CostMetric::Energy,
            model: ModelKind::Slope,
            features: FeatureSet::Energy,
            slo: SloTarget::BatteryPercent(ENERGY_SLO_PCT),
            min_batch: ENERGY_BOUNDS.0,
            max_batch: ENERGY_BOUNDS.1,
            fallback_batch: ENERGY_BOUNDS.0,
            per_device: true,
            pa: PassiveAggressive::new(PA_C, ENERGY_PA_EPSILON),
            train_devices: None,
            sanitize_pretraining: false,
            strict_schema: false,
        },
        Variant::Latency => CostPolicy {
            variant: v,
            metric: CostMetric::Latency,
            model: ModelKind::Slope,
            features: FeatureSet::Latency,
            slo: SloTarget::Fixed(LATENCY_SLO_MS),
            min_batch: LATENCY_BOUNDS.0,
            max_batch: LATENCY_BOUNDS.1,
            fallback_batch: LATENCY_BOUNDS.0,
            per_device: true,
            pa: PassiveAggressive::new(PA_C, LATENCY_PA_EPSILON),
            train_devices: None,
            sanitize_pretraining: true,
            strict_schema: true,
        },
        Variant::MauiEnergy => CostPolicy {
            variant: v,
            metric: CostMetric::Energy,
            model: ModelKind::Absolute,
            features: FeatureSet::BatchOnly,
            slo: SloTarget::BatteryPercent(ENERGY_SLO_PCT),
            min_batch: MAUI_ENERGY_BOUNDS.0,
            max_batch: MAUI_ENERGY_BOUNDS.1,
            fallback_batch: MAUI_ENERGY_BOUNDS.0,
            per_device: false,
            pa: PassiveAggressive::new(PA_C, LATENCY_PA_EPSILON),
            train_devices: None,
            sanitize_pretraining: false,
            strict_schema: false,
        },
        Variant::MauiLatency => CostPolicy {
            variant: v,
            metric: CostMetric::Latency,
            model: ModelKind::Absolute,
            features: FeatureSet::BatchOnly,
            slo: SloTarget::Fixed(MAUI_LATENCY_SLO_MS),
            min_batch: MAUI_LATENCY_BOUNDS.0,
            max_batch: MAUI_LATENCY_BOUNDS.1,
            fallback_batch: MAUI_LATENCY_BOUNDS.0,
            per_device: false,
            pa: PassiveAggressive::new(PA_C, LATENCY_PA_EPSILON),
            train_devices: None,
            sanitize_pretraining: false,
            strict_schema: false,
        },
    }
}
