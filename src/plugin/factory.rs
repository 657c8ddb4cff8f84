//! Instance creation and destruction, dispatched on the descriptor's format.

use super::backend::PluginInstance;
use super::error::InstantiationError;
use super::runtime::FormatRuntime;
use super::types::*;

pub struct PluginFactory<'rt> {
    runtime: &'rt FormatRuntime,
}

impl<'rt> PluginFactory<'rt> {
    pub fn new(runtime: &'rt FormatRuntime) -> Self {
        Self { runtime }
    }

    /// Build a new instance bound to `config`.  May block for as long as the
    /// plugin needs to initialise.
    pub fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Box<dyn PluginInstance>, InstantiationError> {
        config.validate()?;

        let backend = self.runtime.backend(descriptor.format).ok_or_else(|| {
            InstantiationError::new(format!(
                "plugin format {} is not registered",
                descriptor.format
            ))
        })?;

        log::debug!(
            "{}: instantiating {} ({}) at {} Hz / {} frames",
            descriptor.format,
            descriptor.name,
            descriptor.uid,
            config.sample_rate,
            config.block_size
        );
        backend.instantiate(descriptor, config)
    }

    /// Destroy `instance`, releasing everything it owns.
    pub fn release(&self, instance: Box<dyn PluginInstance>) {
        log::debug!("Releasing {}", instance.name());
        drop(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::mock::{self, MockBackend};

    #[test]
    fn test_instantiate_and_release() {
        let backend = MockBackend::new(vec!["A"]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let factory = PluginFactory::new(&rt);
        let descriptor = rt
            .backend(PluginFormat::Vst3)
            .unwrap()
            .scan(&mock::bundle())
            .unwrap()
            .remove(0);

        let config = HostAudioConfig::new(44100.0, 512);
        let instance = factory.instantiate(&descriptor, &config).unwrap();
        assert_eq!(instance.name(), "A");
        assert_eq!(log.borrow().configs, vec![config]);

        factory.release(instance);
        assert_eq!(log.borrow().releases, 1);
    }

    #[test]
    fn test_invalid_config_never_reaches_backend() {
        let backend = MockBackend::new(vec!["A"]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptor = rt
            .backend(PluginFormat::Vst3)
            .unwrap()
            .scan(&mock::bundle())
            .unwrap()
            .remove(0);

        let err = PluginFactory::new(&rt)
            .instantiate(&descriptor, &HostAudioConfig::new(48000.0, 0))
            .err()
            .unwrap();
        assert!(err.message.contains("block size"));
        assert_eq!(log.borrow().instantiations, 0);
    }

    #[test]
    fn test_unregistered_format_fails() {
        let rt = FormatRuntime::with_backends(vec![Box::new(MockBackend::new(vec![]))]);
        let descriptor = PluginDescriptor {
            name: "X".into(),
            format: PluginFormat::Clap,
            bundle_path: mock::bundle(),
            uid: "com.example.x".into(),
            vendor: None,
            version: None,
            category: None,
        };
        let err = PluginFactory::new(&rt)
            .instantiate(&descriptor, &HostAudioConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.message, "plugin format CLAP is not registered");
    }
}
