// MOBATCH LIBRARY
// PURE LOGIC: TELEMETRY DECODING, FEATURES, FITTING, PREDICTION, DISPATCH.
// THE BINARY ADDS ARGUMENT PARSING, SIGNALS AND LOGGING SETUP.

pub mod config;
pub mod dataset;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod features;
pub mod policy;
pub mod predictor;
pub mod pretrain;
pub mod probe;
pub mod regression;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod trainer;
pub mod wire;
