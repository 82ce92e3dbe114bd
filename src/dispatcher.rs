// MOBATCH DISPATCHER
// ONE CRITICAL SECTION AROUND THE DATASET, THE MODEL STORE AND THE EVENT LOG.
// EVERY REQUEST HOLDS IT FOR ITS ENTIRE ROUTE + MUTATE SEQUENCE, SO
// CONCURRENT CONNECTIONS SEE A SERIAL ORDER OF REQUESTS.
//
// ROUTING KEY IS THE afterPush FLAG:
//   0 (REQUEST): PREDICT WITH THE DEVICE'S MODEL, APPEND, ANSWER [BATCH]
//   1 (REPORT):  APPEND, REFIT PER-DEVICE, REFIT GLOBAL, ANSWER NOTHING

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dataset::DatasetAccumulator;
use crate::error::RequestError;
use crate::event::{EventLog, Totals};
use crate::features;
use crate::policy::CostPolicy;
use crate::predictor::{self, Prediction};
use crate::regression::LinearModel;
use crate::store::{ModelSource, ModelStore};
use crate::telemetry::{Phase, Schema, TelemetryRecord};
use crate::trainer;
use crate::wire;

/// Transport seam: one framed request line in, optionally one framed
/// response line out.
pub trait RequestHandler: Send + Sync {
    fn handle_line(&self, line: &str) -> Option<String>;

    /// Print the exit report. `dump` adds the full event time series.
    fn report(&self, dump: bool);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    Predicted {
        prediction: Prediction,
        source: ModelSource,
    },
    Updated {
        device_refit: bool,
        global_rows: usize,
    },
}

struct EngineState {
    dataset: DatasetAccumulator,
    store:   ModelStore,
    log:     EventLog,
}

pub struct Dispatcher {
    policy: CostPolicy,
    schema: Schema,
    ack_updates: bool,
    state: Mutex<EngineState>,
}

impl Dispatcher {
    /// Fit the initial global model from `dataset` and take ownership of it.
    pub fn new(policy: CostPolicy, dataset: DatasetAccumulator) -> Self {
        let fit = trainer::fit_global(&policy, &dataset);
        info!(
            variant = policy.variant.label(),
            rows = fit.rows,
            dropped = fit.dropped,
            "initial global model"
        );
        let global = fit
            .model
            .unwrap_or_else(|| LinearModel::zeros(policy.features.width()));
        let schema = policy.variant.schema();

        Self {
            policy,
            schema,
            ack_updates: false,
            state: Mutex::new(EngineState {
                dataset,
                store: ModelStore::new(global),
                log: EventLog::new(),
            }),
        }
    }

    pub fn with_ack_updates(mut self, ack: bool) -> Self {
        self.ack_updates = ack;
        self
    }

    pub fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // TOPOLOGY IS CHECKED BEFORE ANY STATE CHANGES SO A BAD RECORD NEVER LANDS IN THE DATASET
    fn admit(&self, record: &TelemetryRecord) -> Result<(), RequestError> {
        if self.policy.features.needs_derived() {
            features::total_freq(&record.metrics)?;
        }
        Ok(())
    }

    pub fn handle(&self, record: TelemetryRecord) -> Result<Outcome, RequestError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;

        if let Err(e) = self.admit(&record) {
            st.log.reject();
            return Err(e);
        }

        let device = record.android_model.clone();
        match record.phase {
            Phase::Request => {
                let (model, source) = st.store.get_model_for(&device);
                let reference = trainer::reference_for(&self.policy, &st.dataset, &device);
                let target = self.policy.target_for(&device);
                let prediction = match predictor::predict(&self.policy, model, &record, reference, target) {
                    Ok(p) => p,
                    Err(e) => {
                        st.log.reject();
                        return Err(e);
                    }
                };

                // TELEMETRY IS KEPT EVEN WHEN ONLY A PREDICTION IS SERVED
                st.dataset.append(record);
                st.log.predict(
                    prediction.batch_size,
                    prediction.is_fallback(),
                    Some(source),
                    st.dataset.len(),
                );
                debug!(
                    device = %device,
                    batch = prediction.batch_size,
                    slope = prediction.slope,
                    model = source.label(),
                    fallback = prediction.is_fallback(),
                    "predict"
                );
                Ok(Outcome::Predicted { prediction, source })
            }
            Phase::Report => {
                st.dataset.append(record);

                let device_model = trainer::fit_device(&self.policy, &st.dataset, &device);
                let device_refit = device_model.is_some();
                if let Some(m) = device_model {
                    st.store.replace_per_device(&device, m);
                }

                let fit = trainer::fit_global(&self.policy, &st.dataset);
                if let Some(m) = fit.model {
                    st.store.replace_global(m);
                }
                st.log.update(st.dataset.len());
                debug!(
                    device = %device,
                    device_refit,
                    global_rows = fit.rows,
                    dropped = fit.dropped,
                    "update"
                );
                Ok(Outcome::Updated { device_refit, global_rows: fit.rows })
            }
        }
    }

    pub fn global_model(&self) -> LinearModel {
        self.state.lock().store.global().clone()
    }

    pub fn device_model(&self, device_class: &str) -> Option<LinearModel> {
        self.state.lock().store.device(device_class).cloned()
    }

    pub fn totals(&self) -> Totals {
        self.state.lock().log.totals()
    }

    // (DEVICE CLASSES, ROWS)
    pub fn dataset_summary(&self) -> (usize, usize) {
        self.state.lock().dataset.summary()
    }

    // A REJECTED REPORT GETS NO ANSWER: ITS SENDER NEVER READS ONE
    fn reject_response(&self, phase: Option<Phase>) -> Option<String> {
        match phase {
            Some(Phase::Report) if !self.ack_updates => None,
            _ => Some(wire::encode_response(&[])),
        }
    }
}

impl RequestHandler for Dispatcher {
    fn handle_line(&self, line: &str) -> Option<String> {
        let fields = match wire::decode_fields(line) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "rejecting request");
                self.state.lock().log.reject();
                return self.reject_response(None);
            }
        };
        let record = match self.schema.decode(&fields) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "rejecting request");
                self.state.lock().log.reject();
                return self.reject_response(fields.get(1).and_then(|f| Phase::parse(f)));
            }
        };

        let phase = record.phase;
        match self.handle(record) {
            Ok(Outcome::Predicted { prediction, .. }) => {
                Some(wire::encode_response(&[prediction.batch_size]))
            }
            Ok(Outcome::Updated { .. }) => {
                self.ack_updates.then(|| wire::encode_response(&[]))
            }
            Err(e) => {
                warn!(error = %e, phase = phase.label(), "rejecting request");
                self.reject_response(Some(phase))
            }
        }
    }

    fn report(&self, dump: bool) {
        let st = self.state.lock();
        if dump {
            st.log.dump();
        }
        st.log.summary();
        let (devices, rows) = st.dataset.summary();
        let (global_refits, device_refits) = st.store.refits();
        println!("  VARIANT:           {}", self.policy.variant.label());
        println!("  DEVICE CLASSES:    {}", devices);
        println!("  DATASET ROWS:      {}", rows);
        if st.dataset.evicted() > 0 {
            println!("  EVICTED ROWS:      {}", st.dataset.evicted());
        }
        println!("  DEVICE MODELS:     {}", st.store.device_count());
        println!("  REFITS:            GLOBAL {} / DEVICE {}", global_refits, device_refits);
    }
}
