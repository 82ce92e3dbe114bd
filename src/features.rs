// MOBATCH FEATURE DERIVATION
// FEATURES NOT PRESENT IN RAW TELEMETRY:
//   totalFreq:     AGGREGATE MAX FREQUENCY OVER A big.LITTLE CLUSTER LAYOUT
//   energyPerUnit: IDLE ENERGY NORMALISED BY CPU USAGE OF A PRE-PUSH RECORD
//
// SLOTS 0-3 ARE THE LITTLE CLUSTER, SLOTS 4-7 THE BIG CLUSTER.

use crate::error::RequestError;
use crate::telemetry::{Metrics, Phase, TelemetryRecord};

pub const LITTLE_SLOTS: std::ops::Range<usize> = 0..4;
pub const BIG_SLOTS: std::ops::Range<usize> = 4..8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DerivedFeatures {
    pub total_freq: f64,
    pub energy_per_unit: Option<f64>,
}

fn cluster_max(freqs: &[Option<f64>]) -> Option<f64> {
    freqs.iter().flatten().copied().reduce(f64::max)
}

// <=4 CORES: LITTLE CLUSTER ONLY. 8 CORES: MEAN OF BOTH CLUSTER MAXIMA.
// ANY OTHER COUNT IS REJECTED, NOT GUESSED.
pub fn total_freq(m: &Metrics) -> Result<f64, RequestError> {
    let cores = m.cores.ok_or(RequestError::MissingField("cores"))?;
    let little = || {
        cluster_max(&m.cpu_max_freq[LITTLE_SLOTS])
            .ok_or(RequestError::MissingField("cpuMaxFrequency[0..4]"))
    };

    if cores <= 4.0 {
        little()
    } else if cores == 8.0 {
        let big = cluster_max(&m.cpu_max_freq[BIG_SLOTS])
            .ok_or(RequestError::MissingField("cpuMaxFrequency[4..8]"))?;
        Ok((little()? + big) / 2.0)
    } else {
        Err(RequestError::UnsupportedTopology { cores })
    }
}

// idleEnergy * 1000 / deviceCpuUsage. None WHEN EITHER IS MISSING OR USAGE IS 0.
pub fn energy_per_unit(baseline: &Metrics) -> Option<f64> {
    let idle = baseline.idle_energy_mah?;
    let usage = baseline.device_cpu_usage?;
    if usage == 0.0 {
        return None;
    }
    Some(idle * 1000.0 / usage).filter(|v| v.is_finite())
}

/// Derive features for `record`.
///
/// `baseline` is the most recent pre-push record of the same device class.
/// A pre-push record is its own baseline, so callers may pass `None` for it.
pub fn derive(
    record: &TelemetryRecord,
    baseline: Option<&TelemetryRecord>,
) -> Result<DerivedFeatures, RequestError> {
    let baseline = match record.phase {
        Phase::Request => Some(record),
        Phase::Report => baseline,
    };
    Ok(DerivedFeatures {
        total_freq: total_freq(&record.metrics)?,
        energy_per_unit: baseline.and_then(|b| energy_per_unit(&b.metrics)),
    })
}
