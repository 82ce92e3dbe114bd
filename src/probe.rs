// MOBATCH PROBE HANDLER
// MODEL-FREE RAMP FOR PROFILING RUNS. EACH DEVICE CLASS GETS 8 ON ITS FIRST
// REQUEST, THEN 8 MORE ON EVERY SUBSEQUENT ONE. REPORTS ARE ONLY LOGGED.
//
// ONLY THE afterPush (1) AND android_model (3) POSITIONS ARE READ, SO THE
// PROBE ACCEPTS EITHER TELEMETRY LAYOUT.

use std::collections::hash_map::{Entry, HashMap};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dispatcher::RequestHandler;
use crate::error::RequestError;
use crate::event::EventLog;
use crate::policy::BATCH_ALIGN;
use crate::telemetry::Phase;
use crate::wire;

const PHASE_POS: usize = 1;
const DEVICE_POS: usize = 3;

struct ProbeState {
    per_device: HashMap<String, u64>,
    log:        EventLog,
}

pub struct ProbeHandler {
    ack_updates: bool,
    state: Mutex<ProbeState>,
}

impl Default for ProbeHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeHandler {
    pub fn new() -> Self {
        Self {
            ack_updates: false,
            state: Mutex::new(ProbeState {
                per_device: HashMap::new(),
                log: EventLog::new(),
            }),
        }
    }

    pub fn with_ack_updates(mut self, ack: bool) -> Self {
        self.ack_updates = ack;
        self
    }

    // ADVANCE AND RETURN THE DEVICE'S RAMP
    pub fn next_batch(&self, device_class: &str) -> u64 {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let batch = match st.per_device.entry(device_class.to_string()) {
            Entry::Occupied(mut e) => {
                *e.get_mut() += BATCH_ALIGN;
                *e.get()
            }
            Entry::Vacant(e) => {
                info!(device = %device_class, "new probe device");
                *e.insert(BATCH_ALIGN)
            }
        };
        let devices = st.per_device.len();
        st.log.predict(batch, false, None, devices);
        batch
    }

    fn parse(line: &str) -> Result<(Phase, String), RequestError> {
        let mut fields = wire::decode_fields(line)?;
        if fields.len() <= DEVICE_POS {
            return Err(RequestError::MalformedMessage(format!(
                "expected at least {} fields, got {}",
                DEVICE_POS + 1,
                fields.len()
            )));
        }
        let phase = Phase::parse(&fields[PHASE_POS]).ok_or_else(|| {
            RequestError::MalformedMessage(format!("bad afterPush flag {:?}", fields[PHASE_POS]))
        })?;
        Ok((phase, fields.swap_remove(DEVICE_POS)))
    }
}

impl RequestHandler for ProbeHandler {
    fn handle_line(&self, line: &str) -> Option<String> {
        match Self::parse(line) {
            Ok((Phase::Request, device)) => {
                let batch = self.next_batch(&device);
                debug!(device = %device, batch, "probe");
                Some(wire::encode_response(&[batch]))
            }
            Ok((Phase::Report, device)) => {
                debug!(device = %device, "probe report");
                self.state.lock().log.update(0);
                self.ack_updates.then(|| wire::encode_response(&[]))
            }
            Err(e) => {
                warn!(error = %e, "rejecting probe request");
                self.state.lock().log.reject();
                Some(wire::encode_response(&[]))
            }
        }
    }

    fn report(&self, dump: bool) {
        let st = self.state.lock();
        if dump {
            st.log.dump();
        }
        st.log.summary();
        println!("  VARIANT:           PROBE");
        println!("  DEVICE CLASSES:    {}", st.per_device.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_is_per_device() {
        let p = ProbeHandler::new();
        assert_eq!(p.next_batch("A"), 8);
        assert_eq!(p.next_batch("A"), 16);
        assert_eq!(p.next_batch("B"), 8);
        assert_eq!(p.next_batch("A"), 24);
    }

    #[test]
    fn reports_do_not_advance_ramp() {
        let p = ProbeHandler::new();
        let req = "[\"c\",\"0\",\"1\",\"A\"]\n";
        let rep = "[\"c\",\"1\",\"1\",\"A\"]\n";
        assert_eq!(p.handle_line(req).as_deref(), Some("[\"8\"]\n"));
        assert_eq!(p.handle_line(rep), None);
        assert_eq!(p.handle_line(req).as_deref(), Some("[\"16\"]\n"));
    }

    #[test]
    fn short_message_rejected() {
        let p = ProbeHandler::new();
        assert_eq!(p.handle_line("[\"c\",\"0\"]\n").as_deref(), Some("[]\n"));
        assert_eq!(p.state.lock().log.totals().rejects, 1);
    }
}
