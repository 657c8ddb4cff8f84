//! In-memory plugin format used by the unit tests.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::backend::{PluginFormatBackend, PluginInstance};
use super::error::{InstantiationError, ScanError};
use super::types::*;

/// Everything the mock observed, shared between backend and instances.
#[derive(Debug, Default)]
pub struct MockLog {
    pub scans: usize,
    pub instantiations: usize,
    pub enumerations: usize,
    pub reads: usize,
    pub writes: Vec<(u32, f64)>,
    pub releases: usize,
    pub configs: Vec<HostAudioConfig>,
}

pub struct MockBackend {
    pub variants: Vec<&'static str>,
    pub params: Vec<(u32, &'static str, f64)>,
    /// Instantiation fails with this message once `instantiations` reaches
    /// the given count (0 = the very first call).
    pub fail_at: Option<(usize, &'static str)>,
    /// Added to every written value, as a plugin that quantizes or smooths would.
    pub drift: f64,
    pub log: Rc<RefCell<MockLog>>,
}

impl MockBackend {
    pub fn new(variants: Vec<&'static str>) -> Self {
        Self {
            variants,
            params: vec![(10, "Gain", 0.5), (11, "Freq", 0.25), (12, "Q", 1.0)],
            fail_at: None,
            drift: 0.0,
            log: Rc::new(RefCell::new(MockLog::default())),
        }
    }

    pub fn failing_at(mut self, call: usize, message: &'static str) -> Self {
        self.fail_at = Some((call, message));
        self
    }

    pub fn with_params(mut self, params: Vec<(u32, &'static str, f64)>) -> Self {
        self.params = params;
        self
    }

    pub fn drifting(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }
}

impl PluginFormatBackend for MockBackend {
    fn format(&self) -> PluginFormat {
        PluginFormat::Vst3
    }

    fn scan(&self, bundle: &Path) -> Result<Vec<PluginDescriptor>, ScanError> {
        self.log.borrow_mut().scans += 1;
        Ok(self
            .variants
            .iter()
            .enumerate()
            .map(|(i, name)| PluginDescriptor {
                name: name.to_string(),
                format: PluginFormat::Vst3,
                bundle_path: bundle.to_path_buf(),
                uid: format!("{:032X}", i),
                vendor: Some("Mock".into()),
                version: None,
                category: None,
            })
            .collect())
    }

    fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Box<dyn PluginInstance>, InstantiationError> {
        let mut log = self.log.borrow_mut();
        let call = log.instantiations;
        log.instantiations += 1;
        log.configs.push(*config);
        if let Some((at, message)) = self.fail_at {
            if call >= at {
                return Err(InstantiationError::new(message));
            }
        }
        Ok(Box::new(MockInstance {
            name: descriptor.name.clone(),
            params: self
                .params
                .iter()
                .map(|&(id, name, value)| ParameterNode {
                    id,
                    name: name.to_string(),
                    group: String::new(),
                    value,
                })
                .collect(),
            drift: self.drift,
            log: self.log.clone(),
        }))
    }
}

pub struct MockInstance {
    name: String,
    params: Vec<ParameterNode>,
    drift: f64,
    log: Rc<RefCell<MockLog>>,
}

impl PluginInstance for MockInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Vec<ParameterNode> {
        self.log.borrow_mut().enumerations += 1;
        self.params.clone()
    }

    fn parameter_value(&self, id: u32) -> Option<f64> {
        self.log.borrow_mut().reads += 1;
        self.params.iter().find(|p| p.id == id).map(|p| p.value)
    }

    fn set_parameter_value(&mut self, id: u32, value: f64) {
        self.log.borrow_mut().writes.push((id, value));
        if let Some(p) = self.params.iter_mut().find(|p| p.id == id) {
            p.value = value + self.drift;
        }
    }
}

impl Drop for MockInstance {
    fn drop(&mut self) {
        self.log.borrow_mut().releases += 1;
    }
}

pub fn bundle() -> PathBuf {
    PathBuf::from("/plugins/Mock.vst3")
}
