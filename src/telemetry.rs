// MOBATCH TELEMETRY
// CANONICAL DECODED FORM OF ONE CLIENT MESSAGE OR ONE PRETRAINING ROW.
//
// MESSAGES ARE POSITIONAL: A SCHEMA (ORDERED COLUMN NAMES) MAPS EACH
// POSITION TO A FIELD. HEADER NAMES ARE CANONICALISED SO THAT BOTH
// HISTORICAL LAYOUTS ("volt" VS "volt(mV)", "threads" VS
// "littleThreads"/"bigThreads") DECODE INTO THE SAME Metrics.
//
// EVERY FIELD EXCEPT THE IDENTITY/VERSION FIELDS IS NUMERIC. UNPARSABLE
// OR NON-FINITE VALUES BECOME None, NOT AN ERROR.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::RequestError;

pub const CPU_SLOTS: usize = 8;

// ENERGY LAYOUT (45 COLUMNS). ALSO USED BY BOTH SINGLE-REGRESSOR VARIANTS.
pub const ENERGY_COLUMNS: [&str; 45] = [
    "clientID", "afterPush", "profilerEpoch", "android_model", "android_version",
    "android_serialNumber", "availableMemory(MB)", "runningProcesses", "cores", "threads",
    "bogoMips", "networkLatency(ms)", "sizeLatency(ms)", "meanSizeLatency(ms)",
    "deviceLatency(ms)", "heapSize(MB)", "ramSize(MB)", "bandwidth(Kbps)", "batchSize",
    "sizeEnergy(mAh)", "deviceEnergy", "idleEnergy(mAh)", "deviceTotalRam", "deviceAvailableRam",
    "deviceCpuUsage", "temperature", "batteryLevel", "volt(mV)", "cpuMaxFrequency[0]",
    "cpuMaxFrequency[1]", "cpuMaxFrequency[2]", "cpuMaxFrequency[3]", "cpuMaxFrequency[4]",
    "cpuMaxFrequency[5]", "cpuMaxFrequency[6]", "cpuMaxFrequency[7]", "cpuCurFrequency[0]",
    "cpuCurFrequency[1]", "cpuCurFrequency[2]", "cpuCurFrequency[3]", "cpuCurFrequency[4]",
    "cpuCurFrequency[5]", "cpuCurFrequency[6]", "cpuCurFrequency[7]", "cpuMaxFreqMean",
];

// LATENCY LAYOUT (46 COLUMNS): SPLIT THREAD COUNTS, UNIT-SUFFIXED ENERGY FIELDS
pub const LATENCY_COLUMNS: [&str; 46] = [
    "clientID", "afterPush", "profilerEpoch", "android_model", "android_version",
    "android_serialNumber", "availableMemory(MB)", "runningProcesses", "cores",
    "littleThreads", "bigThreads", "bogoMips", "networkLatency(ms)", "sizeLatency(ms)",
    "meanSizeLatency(ms)", "deviceLatency(ms)", "heapSize(MB)", "ramSize(MB)", "bandwidth(Kbps)",
    "batchSize", "sizeEnergy(mAh)", "deviceEnergy(mAh)", "idleEnergy(mAh)", "deviceTotalRam",
    "deviceAvailableRam", "deviceCpuUsage", "temperature", "batteryLevel", "volt(mV)",
    "cpuMaxFrequency[0]", "cpuMaxFrequency[1]", "cpuMaxFrequency[2]", "cpuMaxFrequency[3]",
    "cpuMaxFrequency[4]", "cpuMaxFrequency[5]", "cpuMaxFrequency[6]", "cpuMaxFrequency[7]",
    "cpuCurFrequency[0]", "cpuCurFrequency[1]", "cpuCurFrequency[2]", "cpuCurFrequency[3]",
    "cpuCurFrequency[4]", "cpuCurFrequency[5]", "cpuCurFrequency[6]", "cpuCurFrequency[7]",
    "cpuMaxFreqMean",
];

// LATENCY PRETRAINING LAYOUT (45 COLUMNS). THE PROFILING CSVS PREDATE THE
// WIRE SPLIT: ONE threads COLUMN, UNSUFFIXED ENERGY FIELDS, meanSizeEnergy.
pub const LATENCY_DATASET_COLUMNS: [&str; 45] = [
    "clientID", "afterPush", "profilerEpoch", "android_model", "android_version",
    "android_serialNumber", "availableMemory(MB)", "runningProcesses", "cores", "threads",
    "bogoMips", "networkLatency(ms)", "sizeLatency(ms)", "meanSizeLatency(ms)",
    "deviceLatency(ms)", "heapSize(MB)", "ramSize(MB)", "bandwidth(Kbps)", "batchSize",
    "sizeEnergy", "deviceEnergy", "meanSizeEnergy", "deviceTotalRam", "deviceAvailableRam",
    "deviceCpuUsage", "temperature", "batteryLevel", "volt", "cpuMaxFrequency[0]",
    "cpuMaxFrequency[1]", "cpuMaxFrequency[2]", "cpuMaxFrequency[3]", "cpuMaxFrequency[4]",
    "cpuMaxFrequency[5]", "cpuMaxFrequency[6]", "cpuMaxFrequency[7]", "cpuCurFrequency[0]",
    "cpuCurFrequency[1]", "cpuCurFrequency[2]", "cpuCurFrequency[3]", "cpuCurFrequency[4]",
    "cpuCurFrequency[5]", "cpuCurFrequency[6]", "cpuCurFrequency[7]", "cpuMaxFreqMean",
];

// --- PHASE ---

/// `afterPush` flag: 0 asks for a batch size, 1 reports the cost of a batch already sent.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Phase {
    Request = 0,
    Report = 1,
}

impl Phase {
    pub fn parse(raw: &str) -> Option<Self> {
        let v: f64 = raw.trim().parse().ok()?;
        if v == 0.0 {
            Some(Self::Request)
        } else if v == 1.0 {
            Some(Self::Report)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Request => "PREDICT",
            Self::Report => "UPDATE",
        }
    }
}

// --- METRICS ---

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Metric {
    AvailableMemory,
    RunningProcesses,
    Cores,
    Threads,
    LittleThreads,
    BigThreads,
    BogoMips,
    NetworkLatency,
    SizeLatency,
    MeanSizeLatency,
    DeviceLatency,
    HeapSize,
    RamSize,
    Bandwidth,
    BatchSize,
    SizeEnergy,
    DeviceEnergy,
    IdleEnergy,
    MeanSizeEnergy,
    DeviceTotalRam,
    DeviceAvailableRam,
    DeviceCpuUsage,
    Temperature,
    BatteryLevel,
    Volt,
    CpuMaxFreqMean,
}

impl Metric {
    fn from_base(base: &str) -> Option<Self> {
        Some(match base {
            "availableMemory" => Self::AvailableMemory,
            "runningProcesses" => Self::RunningProcesses,
            "cores" => Self::Cores,
            "threads" => Self::Threads,
            "littleThreads" => Self::LittleThreads,
            "bigThreads" => Self::BigThreads,
            "bogoMips" => Self::BogoMips,
            "networkLatency" => Self::NetworkLatency,
            "sizeLatency" => Self::SizeLatency,
            "meanSizeLatency" => Self::MeanSizeLatency,
            "deviceLatency" => Self::DeviceLatency,
            "heapSize" => Self::HeapSize,
            "ramSize" => Self::RamSize,
            "bandwidth" => Self::Bandwidth,
            "batchSize" => Self::BatchSize,
            "sizeEnergy" => Self::SizeEnergy,
            "deviceEnergy" => Self::DeviceEnergy,
            "idleEnergy" => Self::IdleEnergy,
            "meanSizeEnergy" => Self::MeanSizeEnergy,
            "deviceTotalRam" => Self::DeviceTotalRam,
            "deviceAvailableRam" => Self::DeviceAvailableRam,
            "deviceCpuUsage" => Self::DeviceCpuUsage,
            "temperature" => Self::Temperature,
            "batteryLevel" => Self::BatteryLevel,
            "volt" => Self::Volt,
            "cpuMaxFreqMean" => Self::CpuMaxFreqMean,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    pub available_memory_mb: Option<f64>,
    pub running_processes: Option<f64>,
    pub cores: Option<f64>,
    pub threads: Option<f64>,
    pub little_threads: Option<f64>,
    pub big_threads: Option<f64>,
    pub bogo_mips: Option<f64>,
    pub network_latency_ms: Option<f64>,
    pub size_latency_ms: Option<f64>,
    pub mean_size_latency_ms: Option<f64>,
    pub device_latency_ms: Option<f64>,
    pub heap_size_mb: Option<f64>,
    pub ram_size_mb: Option<f64>,
    pub bandwidth_kbps: Option<f64>,
    pub batch_size: Option<f64>,
    pub size_energy_mah: Option<f64>,
    pub device_energy: Option<f64>,
    pub idle_energy_mah: Option<f64>,
    pub mean_size_energy: Option<f64>,
    pub device_total_ram: Option<f64>,
    pub device_available_ram: Option<f64>,
    pub device_cpu_usage: Option<f64>,
    pub temperature: Option<f64>,
    pub battery_level: Option<f64>,
    pub volt_mv: Option<f64>,
    pub cpu_max_freq: [Option<f64>; CPU_SLOTS],
    pub cpu_cur_freq: [Option<f64>; CPU_SLOTS],
    pub cpu_max_freq_mean: Option<f64>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        *self.field(metric)
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        *self.field_mut(metric) = value;
    }

    fn field(&self, metric: Metric) -> &Option<f64> {
        match metric {
            Metric::AvailableMemory => &self.available_memory_mb,
            Metric::RunningProcesses => &self.running_processes,
            Metric::Cores => &self.cores,
            Metric::Threads => &self.threads,
            Metric::LittleThreads => &self.little_threads,
            Metric::BigThreads => &self.big_threads,
            Metric::BogoMips => &self.bogo_mips,
            Metric::NetworkLatency => &self.network_latency_ms,
            Metric::SizeLatency => &self.size_latency_ms,
            Metric::MeanSizeLatency => &self.mean_size_latency_ms,
            Metric::DeviceLatency => &self.device_latency_ms,
            Metric::HeapSize => &self.heap_size_mb,
            Metric::RamSize => &self.ram_size_mb,
            Metric::Bandwidth => &self.bandwidth_kbps,
            Metric::BatchSize => &self.batch_size,
            Metric::SizeEnergy => &self.size_energy_mah,
            Metric::DeviceEnergy => &self.device_energy,
            Metric::IdleEnergy => &self.idle_energy_mah,
            Metric::MeanSizeEnergy => &self.mean_size_energy,
            Metric::DeviceTotalRam => &self.device_total_ram,
            Metric::DeviceAvailableRam => &self.device_available_ram,
            Metric::DeviceCpuUsage => &self.device_cpu_usage,
            Metric::Temperature => &self.temperature,
            Metric::BatteryLevel => &self.battery_level,
            Metric::Volt => &self.volt_mv,
            Metric::CpuMaxFreqMean => &self.cpu_max_freq_mean,
        }
    }

    fn field_mut(&mut self, metric: Metric) -> &mut Option<f64> {
        match metric {
            Metric::AvailableMemory => &mut self.available_memory_mb,
            Metric::RunningProcesses => &mut self.running_processes,
            Metric::Cores => &mut self.cores,
            Metric::Threads => &mut self.threads,
            Metric::LittleThreads => &mut self.little_threads,
            Metric::BigThreads => &mut self.big_threads,
            Metric::BogoMips => &mut self.bogo_mips,
            Metric::NetworkLatency => &mut self.network_latency_ms,
            Metric::SizeLatency => &mut self.size_latency_ms,
            Metric::MeanSizeLatency => &mut self.mean_size_latency_ms,
            Metric::DeviceLatency => &mut self.device_latency_ms,
            Metric::HeapSize => &mut self.heap_size_mb,
            Metric::RamSize => &mut self.ram_size_mb,
            Metric::Bandwidth => &mut self.bandwidth_kbps,
            Metric::BatchSize => &mut self.batch_size,
            Metric::SizeEnergy => &mut self.size_energy_mah,
            Metric::DeviceEnergy => &mut self.device_energy,
            Metric::IdleEnergy => &mut self.idle_energy_mah,
            Metric::MeanSizeEnergy => &mut self.mean_size_energy,
            Metric::DeviceTotalRam => &mut self.device_total_ram,
            Metric::DeviceAvailableRam => &mut self.device_available_ram,
            Metric::DeviceCpuUsage => &mut self.device_cpu_usage,
            Metric::Temperature => &mut self.temperature,
            Metric::BatteryLevel => &mut self.battery_level,
            Metric::Volt => &mut self.volt_mv,
            Metric::CpuMaxFreqMean => &mut self.cpu_max_freq_mean,
        }
    }
}

// --- RECORD ---

#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub client_id: String,
    pub phase: Phase,
    pub profiler_epoch: Option<u64>,
    /// Device class. Models and baselines are keyed by this, not by client.
    pub android_model: String,
    pub android_version: String,
    pub serial_number: String,
    pub metrics: Metrics,
}

impl TelemetryRecord {
    pub fn new(android_model: &str, phase: Phase) -> Self {
        Self {
            client_id: String::new(),
            phase,
            profiler_epoch: None,
            android_model: android_model.to_string(),
            android_version: String::new(),
            serial_number: String::new(),
            metrics: Metrics::default(),
        }
    }

    pub fn device_class(&self) -> &str {
        &self.android_model
    }
}

// --- COLUMNS ---

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Column {
    ClientId,
    AfterPush,
    ProfilerEpoch,
    AndroidModel,
    AndroidVersion,
    SerialNumber,
    Metric(Metric),
    CpuMaxFreq(usize),
    CpuCurFreq(usize),
    Unknown,
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // NAME, OPTIONAL [INDEX], OPTIONAL (UNIT)
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_]+)\s*(?:\[(\d+)\])?\s*(?:\(([^)]*)\))?\s*$")
            .expect("header pattern is a valid regex")
    })
}

impl Column {
    pub fn from_header(name: &str) -> Self {
        let caps = match header_pattern().captures(name) {
            Some(c) => c,
            None => return Self::Unknown,
        };
        let base = caps.get(1).map_or("", |m| m.as_str());
        let index = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());

        match (base, index) {
            ("cpuMaxFrequency", Some(i)) if i < CPU_SLOTS => Self::CpuMaxFreq(i),
            ("cpuCurFrequency", Some(i)) if i < CPU_SLOTS => Self::CpuCurFreq(i),
            (_, Some(_)) => Self::Unknown,
            ("clientID", None) => Self::ClientId,
            ("afterPush", None) => Self::AfterPush,
            ("profilerEpoch", None) => Self::ProfilerEpoch,
            ("android_model", None) => Self::AndroidModel,
            ("android_version", None) => Self::AndroidVersion,
            ("android_serialNumber", None) => Self::SerialNumber,
            (base, None) => Metric::from_base(base).map_or(Self::Unknown, Self::Metric),
        }
    }
}

// --- SCHEMA ---

#[derive(Clone, Debug)]
pub struct Schema {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Schema {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().trim().to_string()).collect();
        let columns = names.iter().map(|n| Column::from_header(n)).collect();
        Self { names, columns }
    }

    pub fn energy() -> Self {
        Self::from_names(&ENERGY_COLUMNS)
    }

    pub fn latency() -> Self {
        Self::from_names(&LATENCY_COLUMNS)
    }

    pub fn latency_dataset() -> Self {
        Self::from_names(&LATENCY_DATASET_COLUMNS)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, column: Column) -> Option<usize> {
        self.columns.iter().position(|c| *c == column)
    }

    // EXACT COLUMN-SET COMPARISON. RETURNS (MISSING, UNEXPECTED) RELATIVE TO self.
    pub fn mismatch(&self, actual: &Schema) -> Option<(Vec<String>, Vec<String>)> {
        let expected: BTreeSet<&str> = self.names.iter().map(String::as_str).collect();
        let got: BTreeSet<&str> = actual.names.iter().map(String::as_str).collect();
        if expected == got {
            return None;
        }
        let missing = expected.difference(&got).map(|s| s.to_string()).collect();
        let unexpected = got.difference(&expected).map(|s| s.to_string()).collect();
        Some((missing, unexpected))
    }

    pub fn decode<S: AsRef<str>>(&self, values: &[S]) -> Result<TelemetryRecord, RequestError> {
        if values.len() != self.columns.len() {
            return Err(RequestError::MalformedMessage(format!(
                "expected {} fields, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut phase = None;
        let mut model = None;
        let mut record = TelemetryRecord::new("", Phase::Request);

        for (column, raw) in self.columns.iter().zip(values) {
            let raw = raw.as_ref();
            match *column {
                Column::ClientId => record.client_id = raw.to_string(),
                Column::AfterPush => {
                    phase = Some(Phase::parse(raw).ok_or_else(|| {
                        RequestError::MalformedMessage(format!("bad afterPush flag {raw:?}"))
                    })?);
                }
                Column::ProfilerEpoch => {
                    record.profiler_epoch = parse_numeric(raw)
                        .filter(|v| *v >= 0.0)
                        .map(|v| v as u64);
                }
                Column::AndroidModel => model = Some(raw.to_string()),
                Column::AndroidVersion => record.android_version = raw.to_string(),
                Column::SerialNumber => record.serial_number = raw.to_string(),
                Column::Metric(m) => record.metrics.set(m, parse_numeric(raw)),
                Column::CpuMaxFreq(i) => record.metrics.cpu_max_freq[i] = parse_numeric(raw),
                Column::CpuCurFreq(i) => record.metrics.cpu_cur_freq[i] = parse_numeric(raw),
                Column::Unknown => {}
            }
        }

        record.phase = phase.ok_or(RequestError::MissingField("afterPush"))?;
        record.android_model = model.ok_or(RequestError::MissingField("android_model"))?;
        Ok(record)
    }
}

// COERCE: ANYTHING UNPARSABLE OR NON-FINITE IS A MISSING VALUE
pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy_values() -> Vec<String> {
        let mut v: Vec<String> = ENERGY_COLUMNS.iter().map(|_| "1".to_string()).collect();
        v[0] = "Client1".into();
        v[1] = "0".into();
        v[3] = "Galaxy S7".into();
        v
    }

    #[test]
    fn header_units_and_indices_stripped() {
        assert_eq!(Column::from_header("sizeEnergy(mAh)"), Column::Metric(Metric::SizeEnergy));
        assert_eq!(Column::from_header("sizeEnergy"), Column::Metric(Metric::SizeEnergy));
        assert_eq!(Column::from_header("volt(mV)"), Column::Metric(Metric::Volt));
        assert_eq!(Column::from_header("cpuMaxFrequency[5]"), Column::CpuMaxFreq(5));
        assert_eq!(Column::from_header("cpuCurFrequency[0]"), Column::CpuCurFreq(0));
        assert_eq!(Column::from_header("cpuMaxFrequency[9]"), Column::Unknown);
        assert_eq!(Column::from_header("nonsense"), Column::Unknown);
    }

    #[test]
    fn decode_energy_layout() {
        let schema = Schema::energy();
        let rec = schema.decode(&energy_values()).unwrap();
        assert_eq!(rec.phase, Phase::Request);
        assert_eq!(rec.device_class(), "Galaxy S7");
        assert_eq!(rec.metrics.cores, Some(1.0));
        assert_eq!(rec.metrics.cpu_max_freq[7], Some(1.0));
    }

    #[test]
    fn unparsable_numeric_coerces_to_none() {
        let schema = Schema::energy();
        let mut values = energy_values();
        values[8] = "abc".into();
        values[25] = "nan".into();
        let rec = schema.decode(&values).unwrap();
        assert_eq!(rec.metrics.cores, None);
        assert_eq!(rec.metrics.temperature, None);
    }

    #[test]
    fn wrong_arity_is_malformed() {
        let schema = Schema::energy();
        let values = vec!["1".to_string(); 3];
        assert!(matches!(schema.decode(&values), Err(RequestError::MalformedMessage(_))));
    }

    #[test]
    fn bad_phase_is_malformed() {
        let schema = Schema::energy();
        let mut values = energy_values();
        values[1] = "2".into();
        assert!(matches!(schema.decode(&values), Err(RequestError::MalformedMessage(_))));
    }

    #[test]
    fn latency_layout_splits_threads() {
        let schema = Schema::latency();
        assert_eq!(schema.len(), 46);
        assert_eq!(schema.position(Column::Metric(Metric::LittleThreads)), Some(9));
        assert_eq!(schema.position(Column::Metric(Metric::Threads)), None);
    }

    #[test]
    fn mismatch_reports_both_sides() {
        let expected = Schema::from_names(&["a", "b", "c"]);
        let actual = Schema::from_names(&["a", "c", "d"]);
        let (missing, unexpected) = expected.mismatch(&actual).unwrap();
        assert_eq!(missing, vec!["b".to_string()]);
        assert_eq!(unexpected, vec!["d".to_string()]);
        assert!(expected.mismatch(&Schema::from_names(&["c", "b", "a"])).is_none());
    }
}
