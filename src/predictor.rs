// MOBATCH PREDICTOR
// MODEL + RECORD -> BATCH SIZE.
//
// SLOPE MODELS: THE MODEL EVALUATES TO COST PER UNIT OF BATCH SIZE, AND THE
// SLO LINE IS ANCHORED AT THE DEVICE'S REFERENCE POINT:
//   target = ref.cost + slope * (batch - ref.batch)
// ABSOLUTE MODELS: cost = intercept + coefficient * batch, I.E. THE SAME LINE
// ANCHORED AT (0, intercept).
//
// ZERO OR NON-FINITE SLOPE NEVER DIVIDES: THE POLICY FALLBACK IS RETURNED.

use crate::error::RequestError;
use crate::features;
use crate::policy::{CostPolicy, ModelKind, ReferencePoint, BATCH_ALIGN};
use crate::regression::LinearModel;
use crate::telemetry::TelemetryRecord;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    pub batch_size: u64,
    /// Unclamped inversion result. None when the fallback was used.
    pub raw: Option<f64>,
    pub slope: f64,
}

impl Prediction {
    pub fn is_fallback(&self) -> bool {
        self.raw.is_none()
    }
}

// ROUND UP TO THE NEXT MULTIPLE OF 8
pub fn quantize_up(batch: u64) -> u64 {
    batch + (BATCH_ALIGN - batch % BATCH_ALIGN) % BATCH_ALIGN
}

/// Truncate, clamp to `[min, max]`, then quantize upward.
///
/// Bounds are expected to be multiples of 8, so the result stays in range.
pub fn clamp_and_quantize(raw: f64, min: u64, max: u64) -> u64 {
    let clamped = if raw.is_nan() {
        min
    } else {
        (raw.trunc().max(min as f64).min(max as f64)) as u64
    };
    quantize_up(clamped).min(max)
}

// SOLVE target = ref.cost + slope * (batch - ref.batch) FOR batch
pub fn invert_slo(reference: ReferencePoint, slope: f64, target: f64) -> Option<f64> {
    if slope == 0.0 || !slope.is_finite() {
        return None;
    }
    Some(reference.batch_size + (target - reference.cost) / slope).filter(|v| v.is_finite())
}

/// Evaluate `model` for `record` and invert the SLO.
///
/// Fails only when the record cannot be turned into a feature vector
/// (unsupported topology, missing field).
pub fn predict(
    policy: &CostPolicy,
    model: &LinearModel,
    record: &TelemetryRecord,
    reference: ReferencePoint,
    target: f64,
) -> Result<Prediction, RequestError> {
    let (anchor, slope) = match policy.model {
        ModelKind::Slope => {
            let derived = features::derive(record, None)?;
            let x = policy
                .features
                .vector(record, &derived)
                .ok_or(RequestError::MissingField("model feature"))?;
            (reference, model.predict(&x))
        }
        ModelKind::Absolute => {
            let coefficient = model.coefficients.first().copied().unwrap_or(0.0);
            (ReferencePoint { batch_size: 0.0, cost: model.intercept }, coefficient)
        }
    };

    let (min, max) = policy.clamp_bounds();
    Ok(match invert_slo(anchor, slope, target) {
        Some(raw) => Prediction {
            batch_size: clamp_and_quantize(raw, min, max),
            raw: Some(raw),
            slope,
        },
        None => Prediction {
            batch_size: policy.fallback_batch,
            raw: None,
            slope,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{variant_policy, Variant};
    use crate::telemetry::Phase;

    fn request(cores: f64) -> TelemetryRecord {
        let mut r = TelemetryRecord::new("X", Phase::Request);
        let m = &mut r.metrics;
        m.cores = Some(cores);
        m.cpu_max_freq[0] = Some(1500.0);
        m.device_total_ram = Some(4096.0);
        m.device_available_ram = Some(2048.0);
        m.temperature = Some(30.0);
        r
    }

    #[test]
    fn quantize_rounds_up_to_multiple_of_eight() {
        assert_eq!(quantize_up(61), 64);
        assert_eq!(quantize_up(64), 64);
        assert_eq!(quantize_up(0), 0);
        assert_eq!(quantize_up(1), 8);
    }

    #[test]
    fn clamp_then_quantize() {
        assert_eq!(clamp_and_quantize(61.0, 56, 5000), 64);
        assert_eq!(clamp_and_quantize(61.9, 56, 5000), 64);
        assert_eq!(clamp_and_quantize(5001.0, 56, 5000), 5000);
        assert_eq!(clamp_and_quantize(-300.0, 56, 5000), 56);
        assert_eq!(clamp_and_quantize(f64::INFINITY, 104, 10_000), 10_000);
        assert_eq!(clamp_and_quantize(f64::NAN, 104, 10_000), 104);
    }

    #[test]
    fn every_output_is_aligned_and_bounded() {
        for (min, max) in [(56, 5000), (104, 10_000), (56, 2000), (56, 1504)] {
            let mut raw = -1000.0;
            while raw < 12_000.0 {
                let b = clamp_and_quantize(raw, min, max);
                assert_eq!(b % 8, 0, "raw {raw}");
                assert!(b >= min && b <= max, "raw {raw} -> {b}");
                raw += 13.7;
            }
        }
    }

    #[test]
    fn inversion_matches_hand_computation() {
        let reference = ReferencePoint { batch_size: 56.0, cost: 0.10 };
        let raw = invert_slo(reference, 0.0025, 0.14).unwrap();
        assert!((raw - 72.0).abs() < 1e-9);
        assert_eq!(invert_slo(reference, 0.0, 0.14), None);
        assert_eq!(invert_slo(reference, f64::NAN, 0.14), None);
    }

    #[test]
    fn zero_slope_returns_fallback() {
        let p = variant_policy(Variant::Latency);
        let model = LinearModel::zeros(4);
        let reference = p.static_reference("X");
        let out = predict(&p, &model, &request(4.0), reference, 10_000.0).unwrap();
        assert_eq!(out.batch_size, 104);
        assert!(out.is_fallback());
    }

    #[test]
    fn unsupported_topology_rejects_request() {
        let p = variant_policy(Variant::Latency);
        let model = LinearModel::zeros(4);
        let err = predict(&p, &model, &request(6.0), p.static_reference("X"), 1.0).unwrap_err();
        assert_eq!(err, RequestError::UnsupportedTopology { cores: 6.0 });
    }

    #[test]
    fn absolute_model_inverts_intercept_and_coefficient() {
        let p = variant_policy(Variant::MauiLatency);
        let model = LinearModel { intercept: 100.0, coefficients: vec![2.0] };
        let r = TelemetryRecord::new("X", Phase::Request);
        // (3000 - 100) / 2 = 1450 -> 1456, UNDER THE 1504 CAP
        let out = predict(&p, &model, &r, p.static_reference("X"), 3000.0).unwrap();
        assert_eq!(out.raw, Some(1450.0));
        assert_eq!(out.batch_size, 1456);
    }
}
