// MOBATCH v1.0.0 -- ADAPTIVE BATCH-SIZE CONTROLLER FOR MOBILE OFFLOADING
// LEARNS HOW ENERGY OR LATENCY SCALES WITH BATCH SIZE PER DEVICE CLASS AND
// ANSWERS EACH CLIENT WITH THE LARGEST BATCH THAT STAYS UNDER THE SLO
//
// LIBRARY: DECODING, FITTING, PREDICTION, DISPATCH
// BINARY: CONFIGURATION, LOGGING, SIGNALS, REPORTING

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, Subscriber};
use tracing_subscriber::EnvFilter;

use mobatch::config::{Config, Mode, DEFAULT_BIND, DEFAULT_PORT};
use mobatch::dataset::DatasetAccumulator;
use mobatch::dispatcher::{Dispatcher, RequestHandler};
use mobatch::policy::Variant;
use mobatch::pretrain;
use mobatch::probe::ProbeHandler;
use mobatch::server::Server;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VariantArg {
    Energy,
    Latency,
    MauiEnergy,
    MauiLatency,
    Probe,
}

impl From<VariantArg> for Mode {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Energy => Mode::Model(Variant::Energy),
            VariantArg::Latency => Mode::Model(Variant::Latency),
            VariantArg::MauiEnergy => Mode::Model(Variant::MauiEnergy),
            VariantArg::MauiLatency => Mode::Model(Variant::MauiLatency),
            VariantArg::Probe => Mode::Probe,
        }
    }
}

#[derive(Parser)]
#[command(name = "mobatch")]
#[command(about = "MOBATCH -- ADAPTIVE BATCH-SIZE CONTROLLER FOR MOBILE OFFLOADING")]
struct Cli {
    // LISTENING PORT
    #[arg(long, alias = "clientPort", default_value_t = DEFAULT_PORT)]
    client_port: u16,

    // LISTEN ADDRESS
    #[arg(long, default_value = DEFAULT_BIND)]
    bind: String,

    // PRETRAINING CSV (.gz ACCEPTED)
    #[arg(long, alias = "trainDataset")]
    train_dataset: Option<PathBuf>,

    // COST MODEL
    #[arg(long, value_enum, default_value_t = VariantArg::Energy)]
    variant: VariantArg,

    // SLO OVERRIDE: PERCENT OF BATTERY (ENERGY) OR MILLISECONDS (LATENCY)
    #[arg(long)]
    slo: Option<f64>,

    // CLAMP BOUNDS, MULTIPLES OF 8
    #[arg(long)]
    min_batch: Option<u64>,
    #[arg(long)]
    max_batch: Option<u64>,

    // RESTRICT GLOBAL TRAINING ROWS TO THESE DEVICE CLASSES (REPEATABLE)
    #[arg(long = "train-device")]
    train_devices: Vec<String>,

    // KEEP AT MOST N ROWS PER DEVICE CLASS (DEFAULT: UNBOUNDED)
    #[arg(long)]
    retain_per_device: Option<usize>,

    // DATASET HEADER MUST MATCH THE VARIANT LAYOUT EXACTLY
    #[arg(long, conflicts_with = "lenient_schema")]
    strict_schema: bool,

    // DATASET HEADER DECODED BY NAME, UNKNOWN COLUMNS IGNORED
    #[arg(long)]
    lenient_schema: bool,

    // SERVE ONE CLIENT CONNECTION, THEN EXIT
    #[arg(long)]
    once: bool,

    // ANSWER REPORT REQUESTS WITH []
    #[arg(long)]
    ack_updates: bool,

    // LOAD AND FIT THE DATASET OFFLINE, PRINT A REPORT, EXIT
    #[arg(long)]
    check: bool,

    // PRINT VERBOSE OUTPUT
    #[arg(long)]
    verbose: bool,

    // DUMP FULL EVENT LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let strict_schema = match (self.strict_schema, self.lenient_schema) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Config {
            mode: self.variant.into(),
            bind: self.bind.clone(),
            port: self.client_port,
            train_dataset: self.train_dataset.clone(),
            slo: self.slo,
            min_batch: self.min_batch,
            max_batch: self.max_batch,
            train_devices: self.train_devices.clone(),
            retain_per_device: self.retain_per_device,
            strict_schema,
            once: self.once,
            ack_updates: self.ack_updates,
        }
    }
}

fn build_handler(cfg: &Config) -> Result<Box<dyn RequestHandler>> {
    let variant = match cfg.mode {
        Mode::Probe => {
            return Ok(Box::new(ProbeHandler::new().with_ack_updates(cfg.ack_updates)));
        }
        Mode::Model(v) => v,
    };
    let policy = cfg.policy(variant)?;

    let records = match &cfg.train_dataset {
        Some(path) => {
            let loaded = pretrain::load_path(path, &policy)
                .with_context(|| format!("load pretraining dataset {}", path.display()))?;
            info!(
                kept = loaded.records.len(),
                skipped = loaded.skipped,
                implausible = loaded.implausible,
                "pretraining dataset"
            );
            loaded.records
        }
        None => Vec::new(),
    };
    let dataset = DatasetAccumulator::seeded(records, cfg.retain_per_device);
    Ok(Box::new(Dispatcher::new(policy, dataset).with_ack_updates(cfg.ack_updates)))
}

// RUST_LOG WINS OVER --verbose
fn log_filter(verbose: bool) -> EnvFilter {
    let default_filter = if verbose { "mobatch=debug" } else { "mobatch=info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

// STRUCTURED LOGGING TO STDERR. THE FILTER IS THE ONLY LEVEL GATE.
fn log_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing::subscriber::set_global_default(log_subscriber(log_filter(cli.verbose)))?;

    let cfg = cli.config();
    cfg.validate()?;

    if cli.check {
        return cli::check::run_check(&cfg);
    }

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    println!("MOBATCH v1.0.0");
    println!("VARIANT:         {}", cfg.mode.label());
    println!("DATASET:         {}", cfg.train_dataset.as_ref()
        .map_or_else(|| "none".to_string(), |p| p.display().to_string()));
    println!("RETENTION:       {}", cfg.retain_per_device
        .map_or_else(|| "unbounded".to_string(), |n| format!("{} rows/device", n)));
    println!("ONCE:            {}", cfg.once);
    println!("VERBOSE:         {}", cli.verbose);
    println!();

    let handler = build_handler(&cfg)?;
    let server = Server::bind(&cfg.listen_addr(), cfg.once)?;
    println!("LISTENING:       {}", server.local_addr()?);
    println!("MOBATCH IS ACTIVE (CTRL+C TO EXIT)");

    let served = server.run(handler.as_ref(), &SHUTDOWN)?;

    println!("MOBATCH IS SHUTTING DOWN");
    handler.report(cli.dump_log);
    println!("  CONNECTIONS:       {}", served);
    println!("MOBATCH OUT.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn default_filter_hides_per_request_debug() {
        let sub = log_subscriber(EnvFilter::new("mobatch=info"));
        tracing::subscriber::with_default(sub, || {
            assert!(tracing::enabled!(target: "mobatch::dispatcher", Level::INFO));
            assert!(!tracing::enabled!(target: "mobatch::dispatcher", Level::DEBUG));
            assert!(!tracing::enabled!(target: "other_crate", Level::TRACE));
        });
    }

    #[test]
    fn verbose_filter_shows_per_request_debug() {
        let sub = log_subscriber(EnvFilter::new("mobatch=debug"));
        tracing::subscriber::with_default(sub, || {
            assert!(tracing::enabled!(target: "mobatch::dispatcher", Level::DEBUG));
            assert!(!tracing::enabled!(target: "mobatch::dispatcher", Level::TRACE));
        });
    }
}
