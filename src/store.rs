// MOBATCH MODEL STORE
// ONE GLOBAL MODEL PLUS AT MOST ONE ONLINE MODEL PER DEVICE CLASS.
// LOOKUPS NEVER FAIL: AN UNSEEN DEVICE CLASS RESOLVES TO THE GLOBAL MODEL.
// MODELS ARE REPLACED WHOLESALE, NEVER MERGED, NEVER DELETED.

use std::collections::HashMap;

use crate::regression::LinearModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelSource {
    Global,
    Device,
}

impl ModelSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Device => "DEVICE",
        }
    }
}

pub struct ModelStore {
    global: LinearModel,
    per_device: HashMap<String, LinearModel>,
    global_refits: u64,
    device_refits: u64,
}

impl ModelStore {
    pub fn new(global: LinearModel) -> Self {
        Self {
            global,
            per_device: HashMap::new(),
            global_refits: 0,
            device_refits: 0,
        }
    }

    pub fn get_model_for(&self, device_class: &str) -> (&LinearModel, ModelSource) {
        match self.per_device.get(device_class) {
            Some(m) => (m, ModelSource::Device),
            None => (&self.global, ModelSource::Global),
        }
    }

    pub fn global(&self) -> &LinearModel {
        &self.global
    }

    pub fn device(&self, device_class: &str) -> Option<&LinearModel> {
        self.per_device.get(device_class)
    }

    pub fn replace_global(&mut self, model: LinearModel) {
        self.global = model;
        self.global_refits += 1;
    }

    pub fn replace_per_device(&mut self, device_class: &str, model: LinearModel) {
        self.per_device.insert(device_class.to_string(), model);
        self.device_refits += 1;
    }

    pub fn device_count(&self) -> usize {
        self.per_device.len()
    }

    // (GLOBAL REFITS, PER-DEVICE REFITS)
    pub fn refits(&self) -> (u64, u64) {
        (self.global_refits, self.device_refits)
    }
}
