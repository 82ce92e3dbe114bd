// MOBATCH PRETRAINING DATASET
// CSV (OR GZIPPED CSV) WITH A HEADER ROW. EACH DATA ROW IS ONE TELEMETRY
// RECORD, DECODED BY HEADER NAME THROUGH THE SAME SCHEMA MACHINERY AS THE
// WIRE, SO BOTH HISTORICAL COLUMN LAYOUTS LAND IN THE SAME METRICS.
//
// STRICT: HEADER COLUMN SET MUST EQUAL THE VARIANT'S DATASET LAYOUT. FATAL
// OTHERWISE. FOR LATENCY THAT IS THE OLDER 45-COLUMN CSV LAYOUT, NOT THE WIRE.
// LENIENT: UNKNOWN COLUMNS ARE IGNORED.
// EITHER WAY afterPush AND android_model ARE REQUIRED.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::DatasetError;
use crate::policy::CostPolicy;
use crate::telemetry::{Column, Schema, TelemetryRecord};

#[derive(Debug, Default)]
pub struct Pretraining {
    pub records: Vec<TelemetryRecord>,
    /// Rows with the wrong arity or a phase flag other than 0/1.
    pub skipped: usize,
    /// Rows dropped by the plausibility filter.
    pub implausible: usize,
}

impl Pretraining {
    pub fn rows_read(&self) -> usize {
        self.records.len() + self.skipped + self.implausible
    }
}

pub fn load_path(path: &Path, policy: &CostPolicy) -> Result<Pretraining, DatasetError> {
    let file = File::open(path)?;
    let gz = path.extension().map_or(false, |e| e.eq_ignore_ascii_case("gz"));
    let out = if gz {
        load_reader(BufReader::new(flate2::read::GzDecoder::new(file)), policy)?
    } else {
        load_reader(BufReader::new(file), policy)?
    };
    debug!(
        path = %path.display(),
        records = out.records.len(),
        skipped = out.skipped,
        implausible = out.implausible,
        "pretraining dataset loaded"
    );
    Ok(out)
}

pub fn load_reader<R: BufRead>(reader: R, policy: &CostPolicy) -> Result<Pretraining, DatasetError> {
    let mut lines = reader.lines();

    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(DatasetError::MissingHeader),
        }
    };
    let schema = Schema::from_names(&split_row(&header));
    check_header(&schema, policy)?;

    let mut out = Pretraining::default();
    for (n, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = match schema.decode(&split_row(&line)) {
            Ok(r) => r,
            Err(e) => {
                // HEADER IS LINE 1
                warn!(line = n + 2, error = %e, "skipping pretraining row");
                out.skipped += 1;
                continue;
            }
        };
        if !policy.plausible(&record) {
            out.implausible += 1;
            continue;
        }
        out.records.push(record);
    }
    Ok(out)
}

fn check_header(schema: &Schema, policy: &CostPolicy) -> Result<(), DatasetError> {
    if policy.strict_schema {
        if let Some((missing, unexpected)) = policy.variant.dataset_schema().mismatch(schema) {
            return Err(DatasetError::SchemaMismatch { missing, unexpected });
        }
    }

    let required = [
        (Column::AfterPush, "afterPush"),
        (Column::AndroidModel, "android_model"),
    ];
    let missing: Vec<String> = required
        .iter()
        .filter(|(c, _)| schema.position(*c).is_none())
        .map(|(_, name)| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DatasetError::SchemaMismatch { missing, unexpected: Vec::new() });
    }
    Ok(())
}

// COMMA SPLIT WITH DOUBLE-QUOTED FIELDS ("" ESCAPES A QUOTE)
fn split_row(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{variant_policy, Variant};
    use crate::telemetry::{Phase, LATENCY_COLUMNS, LATENCY_DATASET_COLUMNS};

    #[test]
    fn split_handles_quotes() {
        assert_eq!(split_row("a,\"b,c\",d"), vec!["a", "b,c", "d"]);
        assert_eq!(split_row("\"say \"\"hi\"\"\",,x\r"), vec!["say \"hi\"", "", "x"]);
    }

    #[test]
    fn empty_input_has_no_header() {
        let p = variant_policy(Variant::Energy);
        assert!(matches!(load_reader("".as_bytes(), &p), Err(DatasetError::MissingHeader)));
    }

    #[test]
    fn lenient_decodes_by_name() {
        let p = variant_policy(Variant::MauiEnergy);
        let csv = "extra,android_model,afterPush,batchSize,sizeEnergy(mAh)\n\
                   x,A,1,64,0.12\n\
                   x,A,7,72,0.13\n\
                   x,A,1\n";
        let out = load_reader(csv.as_bytes(), &p).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.skipped, 2);
        assert_eq!(out.records[0].phase, Phase::Report);
        assert_eq!(out.records[0].metrics.size_energy_mah, Some(0.12));
    }

    #[test]
    fn strict_rejects_extra_column() {
        let p = variant_policy(Variant::Latency);
        let mut header: Vec<&str> = LATENCY_DATASET_COLUMNS.to_vec();
        header.push("bogus");
        let csv = header.join(",") + "\n";
        match load_reader(csv.as_bytes(), &p) {
            Err(DatasetError::SchemaMismatch { missing, unexpected }) => {
                assert!(missing.is_empty());
                assert_eq!(unexpected, vec!["bogus".to_string()]);
            }
            _ => panic!("expected schema mismatch"),
        }
    }

    #[test]
    fn strict_latency_rejects_wire_layout() {
        let p = variant_policy(Variant::Latency);
        let csv = LATENCY_COLUMNS.join(",") + "\n";
        match load_reader(csv.as_bytes(), &p) {
            Err(DatasetError::SchemaMismatch { missing, unexpected }) => {
                assert!(missing.contains(&"meanSizeEnergy".to_string()));
                assert!(unexpected.contains(&"littleThreads".to_string()));
            }
            _ => panic!("expected schema mismatch"),
        }
    }

    #[test]
    fn required_columns_enforced_in_lenient_mode() {
        let p = variant_policy(Variant::Energy);
        let err = load_reader("batchSize,sizeEnergy\n".as_bytes(), &p).unwrap_err();
        assert!(matches!(err, DatasetError::SchemaMismatch { .. }));
    }

    #[test]
    fn latency_drops_implausible_rows() {
        let p = variant_policy(Variant::Latency);
        let csv = LATENCY_DATASET_COLUMNS.join(",") + "\n";
        let row = |usage: &str, procs: &str| {
            LATENCY_DATASET_COLUMNS
                .iter()
                .map(|c| match *c {
                    "afterPush" => "1",
                    "android_model" => "A",
                    "deviceCpuUsage" => usage,
                    "runningProcesses" => procs,
                    _ => "1",
                })
                .collect::<Vec<_>>()
                .join(",")
                + "\n"
        };
        let csv = csv + &row("0.5", "3") + &row("1.5", "3") + &row("0.5", "0");
        let out = load_reader(csv.as_bytes(), &p).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.implausible, 2);
        assert_eq!(out.rows_read(), 3);
    }
}
