use anyhow::{bail, Context, Result};

use mobatch::config::{Config, Mode};
use mobatch::dataset::DatasetAccumulator;
use mobatch::policy::{CostPolicy, SloTarget};
use mobatch::predictor;
use mobatch::pretrain;
use mobatch::regression::LinearModel;
use mobatch::telemetry::Phase;
use mobatch::trainer;

fn print_model(model: &LinearModel) {
    println!("  INTERCEPT:         {:.6e}", model.intercept);
    for (i, w) in model.coefficients.iter().enumerate() {
        println!("  COEF[{}]:           {:.6e}", i, w);
    }
}

fn print_devices(policy: &CostPolicy, dataset: &DatasetAccumulator, model: &LinearModel) {
    println!("{:<20} {:<8} {:<10} {:<12} {:<8}", "DEVICE", "ROWS", "REF_BATCH", "REF_COST", "BATCH");
    println!("{}", "-".repeat(62));
    for (device, history) in dataset.devices() {
        let reference = trainer::reference_for(policy, dataset, device);
        // A PRE-PUSH ROW IS WHAT A LIVE PREDICT REQUEST LOOKS LIKE
        let batch = history
            .latest(Phase::Request)
            .and_then(|r| {
                predictor::predict(policy, model, r, reference, policy.target_for(device)).ok()
            })
            .map_or_else(|| "-".to_string(), |p| p.batch_size.to_string());
        println!("{:<20} {:<8} {:<10} {:<12.4} {:<8}",
            device, history.len(), reference.batch_size, reference.cost, batch);
    }
}

// OFFLINE: LOAD THE DATASET, FIT THE GLOBAL MODEL, REPORT. NO SOCKETS.
pub fn run_check(cfg: &Config) -> Result<()> {
    let variant = match cfg.mode {
        Mode::Model(v) => v,
        Mode::Probe => bail!("--check needs a model variant, not probe"),
    };
    let policy = cfg.policy(variant)?;
    let path = cfg
        .train_dataset
        .as_deref()
        .context("--check needs --train-dataset")?;

    println!("MOBATCH DATASET CHECK");
    println!("  PATH:              {}", path.display());
    println!("  VARIANT:           {}", variant.label());
    println!("  SCHEMA:            {}", if policy.strict_schema { "STRICT" } else { "LENIENT" });
    match policy.slo {
        SloTarget::BatteryPercent(p) => println!("  SLO:               {}% OF BATTERY", p),
        SloTarget::Fixed(v) => println!("  SLO:               {}", v),
    }
    println!("  BOUNDS:            {}..{} (fallback {})",
        policy.min_batch, policy.max_batch, policy.fallback_batch);
    println!();

    let loaded = pretrain::load_path(path, &policy)
        .with_context(|| format!("load {}", path.display()))?;
    println!("ROWS READ:           {}", loaded.rows_read());
    println!("  KEPT:              {}", loaded.records.len());
    println!("  SKIPPED:           {}", loaded.skipped);
    println!("  IMPLAUSIBLE:       {}", loaded.implausible);

    let dataset = DatasetAccumulator::seeded(loaded.records, cfg.retain_per_device);
    let fit = trainer::fit_global(&policy, &dataset);
    println!("TRAINING ROWS:       {} ({} dropped)", fit.rows, fit.dropped);
    println!();

    let Some(model) = fit.model else {
        println!("NO USABLE TRAINING ROWS -- EVERY PREDICTION WOULD FALL BACK TO {}",
            policy.fallback_batch);
        bail!("dataset produced no training rows");
    };

    println!("GLOBAL MODEL:");
    print_model(&model);
    println!();
    print_devices(&policy, &dataset, &model);
    println!();
    println!("CHECK PASSED");
    Ok(())
}
