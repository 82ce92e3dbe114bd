// MOBATCH CONFIGURATION
// PROCESS CONFIGURATION AFTER ARGUMENT PARSING. OVERRIDES ARE LAYERED ON
// TOP OF THE VARIANT PRESET, THEN THE RESULT IS VALIDATED AS A WHOLE.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::policy::{variant_policy, CostPolicy, SloTarget, Variant, BATCH_ALIGN};

pub const DEFAULT_PORT: u16 = 9995;
pub const DEFAULT_BIND: &str = "127.0.0.1";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Model(Variant),
    Probe,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Model(v) => v.label(),
            Self::Probe => "PROBE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,
    pub bind: String,
    pub port: u16,
    pub train_dataset: Option<PathBuf>,
    pub slo: Option<f64>,
    pub min_batch: Option<u64>,
    pub max_batch: Option<u64>,
    pub train_devices: Vec<String>,
    pub retain_per_device: Option<usize>,
    pub strict_schema: Option<bool>,
    pub once: bool,
    pub ack_updates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Model(Variant::Energy),
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            train_dataset: None,
            slo: None,
            min_batch: None,
            max_batch: None,
            train_devices: Vec::new(),
            retain_per_device: None,
            strict_schema: None,
            once: false,
            ack_updates: false,
        }
    }
}

impl Config {
    /// Resolve the cost policy for `variant` with every override applied.
    pub fn policy(&self, variant: Variant) -> Result<CostPolicy, ConfigError> {
        let mut p = variant_policy(variant);

        if let Some(v) = self.slo {
            p.slo = match p.slo {
                SloTarget::BatteryPercent(_) => SloTarget::BatteryPercent(v),
                SloTarget::Fixed(_) => SloTarget::Fixed(v),
            };
        }
        // THE FALLBACK FOLLOWS THE FLOOR
        if let Some(min) = self.min_batch {
            p.min_batch = min;
            p.fallback_batch = min;
        }
        if let Some(max) = self.max_batch {
            p.max_batch = max;
        }
        if !self.train_devices.is_empty() {
            p.train_devices = Some(self.train_devices.iter().cloned().collect::<BTreeSet<_>>());
        }
        if let Some(strict) = self.strict_schema {
            p.strict_schema = strict;
        }

        validate_policy(&p)?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            Mode::Model(v) => self.policy(v).map(|_| ()),
            Mode::Probe => Ok(()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

pub fn validate_policy(p: &CostPolicy) -> Result<(), ConfigError> {
    for bound in [p.min_batch, p.max_batch] {
        if bound % BATCH_ALIGN != 0 {
            return Err(ConfigError::UnalignedBound(bound));
        }
    }
    if p.min_batch > p.max_batch {
        return Err(ConfigError::InvertedBounds { min: p.min_batch, max: p.max_batch });
    }
    let slo = match p.slo {
        SloTarget::BatteryPercent(v) | SloTarget::Fixed(v) => v,
    };
    if !slo.is_finite() || slo <= 0.0 {
        return Err(ConfigError::InvalidSlo(slo));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        let cfg = Config::default();
        for v in [Variant::Energy, Variant::Latency, Variant::MauiEnergy, Variant::MauiLatency] {
            assert!(cfg.policy(v).is_ok(), "{:?}", v);
        }
    }

    #[test]
    fn overrides_applied() {
        let cfg = Config {
            slo: Some(500.0),
            min_batch: Some(8),
            max_batch: Some(800),
            train_devices: vec!["A".into()],
            strict_schema: Some(false),
            ..Default::default()
        };
        let p = cfg.policy(Variant::Latency).unwrap();
        assert_eq!(p.slo, SloTarget::Fixed(500.0));
        assert_eq!((p.min_batch, p.max_batch, p.fallback_batch), (8, 800, 8));
        assert!(p.trains_on("A") && !p.trains_on("B"));
        assert!(!p.strict_schema);
    }

    #[test]
    fn bad_bounds_rejected() {
        let unaligned = Config { min_batch: Some(50), ..Default::default() };
        assert_eq!(unaligned.validate(), Err(ConfigError::UnalignedBound(50)));

        let inverted = Config { min_batch: Some(800), max_batch: Some(80), ..Default::default() };
        assert_eq!(
            inverted.validate(),
            Err(ConfigError::InvertedBounds { min: 800, max: 80 })
        );
    }

    #[test]
    fn bad_slo_rejected() {
        for slo in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = Config { slo: Some(slo), ..Default::default() };
            assert!(matches!(cfg.validate(), Err(ConfigError::InvalidSlo(_))));
        }
    }

    #[test]
    fn probe_ignores_model_overrides() {
        let cfg = Config { mode: Mode::Probe, min_batch: Some(3), ..Default::default() };
        assert!(cfg.validate().is_ok());
    }
}
