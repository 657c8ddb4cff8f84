//! The create / round-trip / destroy loop.
//!
//! Every iteration builds a fresh instance, reads each parameter and writes
//! the same value straight back, then destroys the instance.  The loop does
//! not measure anything itself; it only produces a repeatable load pattern
//! for an outside observer (memory profiler, crash monitor).

use thiserror::Error;

use crate::plugin::{
    HostAudioConfig, InstantiationError, PluginDescriptor, PluginFactory, PluginFormat,
    PluginInstance,
};

/// Destination for human-readable progress lines.
pub trait LineSink {
    fn line(&mut self, line: &str);
}

/// Forwards every line to the `log` facade at info level.
pub struct LogSink;

impl LineSink for LogSink {
    fn line(&mut self, line: &str) {
        log::info!("{}", line);
    }
}

impl LineSink for Vec<String> {
    fn line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

#[derive(Debug, Error)]
pub enum StressError {
    #[error("iteration {iteration}: instantiation failed: {source}")]
    Instantiation {
        iteration: u32,
        #[source]
        source: InstantiationError,
    },
}

/// Outcome of a run that completed every iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub plugin_name: String,
    pub format: PluginFormat,
    pub iterations_completed: u32,
    /// Size of the parameter set seen in the last iteration.
    pub parameter_count: usize,
    /// Out-of-range reads and changed read-backs, summed over all iterations.
    pub warnings: u32,
}

pub struct StressLoop<'a, 'rt> {
    factory: &'a PluginFactory<'rt>,
    sink: &'a mut dyn LineSink,
}

impl<'a, 'rt> StressLoop<'a, 'rt> {
    pub fn new(factory: &'a PluginFactory<'rt>, sink: &'a mut dyn LineSink) -> Self {
        Self { factory, sink }
    }

    pub fn run(
        &mut self,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
        iterations: u32,
        verbose: bool,
    ) -> Result<RunReport, StressError> {
        self.sink.line("***** ITERATING CREATE / SET CYCLES");

        let mut parameter_count = 0;
        let mut warnings = 0;
        for iteration in 0..iterations {
            self.sink
                .line(&format!("==================== ITERATION {}", iteration));

            let mut instance = match self.factory.instantiate(descriptor, config) {
                Ok(instance) => instance,
                Err(source) => {
                    self.sink.line(&source.message);
                    return Err(StressError::Instantiation { iteration, source });
                }
            };

            let (visited, warned) = self.round_trip(instance.as_mut(), verbose);
            parameter_count = visited;
            warnings += warned;

            self.factory.release(instance);
            self.sink.line("");
        }

        Ok(RunReport {
            plugin_name: descriptor.name.clone(),
            format: descriptor.format,
            iterations_completed: iterations,
            parameter_count,
            warnings,
        })
    }

    /// Read every parameter and write the value back unchanged.  Returns the
    /// number of parameters visited and the number of warnings raised.
    fn round_trip(&mut self, instance: &mut dyn PluginInstance, verbose: bool) -> (usize, u32) {
        let params = instance.parameters();
        let mut warnings = 0;

        for param in &params {
            let mut node = param.clone();
            node.value = instance.parameter_value(param.id).unwrap_or(param.value);
            if !node.in_range() {
                log::warn!(
                    "{}.{} reports {} outside [0, 1]",
                    instance.name(),
                    node.path(),
                    node.value
                );
                warnings += 1;
            }

            if verbose {
                self.sink
                    .line(&format!("{}.{} = {}", instance.name(), node.name, node.value));
            }

            instance.set_parameter_value(node.id, node.value);

            if let Some(after) = instance.parameter_value(node.id) {
                if (after - node.value).abs() > 1e-6 {
                    log::warn!(
                        "{}.{} changed on round-trip: {} -> {}",
                        instance.name(),
                        node.path(),
                        node.value,
                        after
                    );
                    warnings += 1;
                }
            }
        }

        (params.len(), warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::mock::MockBackend;
    use crate::plugin::{FormatRuntime, PluginCatalog, find_by_name};

    fn scan(rt: &FormatRuntime) -> Vec<PluginDescriptor> {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Shell.vst3");
        std::fs::create_dir(&bundle).unwrap();
        PluginCatalog::new(rt).scan(&bundle).unwrap()
    }

    #[test]
    fn test_three_iterations_end_to_end() {
        let backend = MockBackend::new(vec!["A", "B", "Q10 Stereo"]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);

        let descriptor = find_by_name(&descriptors, "Q10 Stereo").unwrap();
        assert_eq!(descriptor, &descriptors[2]);

        let factory = PluginFactory::new(&rt);
        let mut lines: Vec<String> = Vec::new();
        let config = HostAudioConfig::new(48000.0, 2048);
        let report = StressLoop::new(&factory, &mut lines)
            .run(descriptor, &config, 3, false)
            .unwrap();

        assert_eq!(report.iterations_completed, 3);
        assert_eq!(report.plugin_name, "Q10 Stereo");
        assert_eq!(report.parameter_count, 3);
        assert_eq!(report.warnings, 0);

        let log = log.borrow();
        assert_eq!(log.instantiations, 3);
        assert_eq!(log.enumerations, 3);
        assert_eq!(log.releases, 3);
        assert_eq!(log.writes.len(), 9);
        assert!(log.configs.iter().all(|c| *c == config));

        // Non-verbose: markers only, no per-parameter lines
        assert!(lines.iter().all(|l| !l.contains(" = ")));
        assert_eq!(
            lines.iter().filter(|l| l.starts_with("=====")).count(),
            3
        );
    }

    #[test]
    fn test_round_trip_writes_back_what_was_read() {
        let backend = MockBackend::new(vec!["EQ"]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);
        let factory = PluginFactory::new(&rt);

        let mut lines: Vec<String> = Vec::new();
        StressLoop::new(&factory, &mut lines)
            .run(&descriptors[0], &HostAudioConfig::default(), 2, true)
            .unwrap();

        let log = log.borrow();
        let expected: [(u32, f64); 3] = [(10, 0.5), (11, 0.25), (12, 1.0)];
        assert_eq!(log.writes[..3], expected);
        assert_eq!(log.writes[3..], expected);

        let verbose: Vec<_> = lines.iter().filter(|l| l.contains(" = ")).collect();
        assert_eq!(
            verbose[..3],
            ["EQ.Gain = 0.5", "EQ.Freq = 0.25", "EQ.Q = 1"]
        );
    }

    #[test]
    fn test_zero_iterations_never_instantiates() {
        let backend = MockBackend::new(vec!["A"]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);
        let factory = PluginFactory::new(&rt);

        let mut lines: Vec<String> = Vec::new();
        let report = StressLoop::new(&factory, &mut lines)
            .run(&descriptors[0], &HostAudioConfig::default(), 0, true)
            .unwrap();

        assert_eq!(report.iterations_completed, 0);
        assert_eq!(log.borrow().instantiations, 0);
        assert_eq!(log.borrow().releases, 0);
    }

    #[test]
    fn test_unknown_name_stops_before_the_loop() {
        let backend = MockBackend::new(vec!["A", "B"]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);

        assert!(find_by_name(&descriptors, "Q10 Stereo").is_err());
        assert_eq!(log.borrow().instantiations, 0);
    }

    #[test]
    fn test_first_instantiation_failure_aborts() {
        let backend = MockBackend::new(vec!["A"]).failing_at(0, "license check failed");
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);
        let factory = PluginFactory::new(&rt);

        let mut lines: Vec<String> = Vec::new();
        let err = StressLoop::new(&factory, &mut lines)
            .run(&descriptors[0], &HostAudioConfig::default(), 5, true)
            .unwrap_err();

        let StressError::Instantiation { iteration, source } = err;
        assert_eq!(iteration, 0);
        assert_eq!(source.message, "license check failed");
        assert_eq!(lines.last().map(String::as_str), Some("license check failed"));

        let log = log.borrow();
        assert_eq!(log.instantiations, 1);
        assert_eq!(log.enumerations, 0);
        assert!(log.writes.is_empty());
        assert_eq!(log.releases, 0);
    }

    #[test]
    fn test_later_failure_keeps_earlier_instances_released() {
        let backend = MockBackend::new(vec!["A"]).failing_at(2, "out of memory");
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);
        let factory = PluginFactory::new(&rt);

        let mut lines: Vec<String> = Vec::new();
        let err = StressLoop::new(&factory, &mut lines)
            .run(&descriptors[0], &HostAudioConfig::default(), 10, false)
            .unwrap_err();

        assert!(matches!(err, StressError::Instantiation { iteration: 2, .. }));
        let log = log.borrow();
        assert_eq!(log.instantiations, 3);
        assert_eq!(log.releases, 2);
    }

    #[test]
    fn test_out_of_range_value_is_written_back_untouched() {
        let backend =
            MockBackend::new(vec!["EQ"]).with_params(vec![(1, "Gain", 1.5), (2, "Mix", 0.5)]);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);
        let factory = PluginFactory::new(&rt);

        let mut lines: Vec<String> = Vec::new();
        let report = StressLoop::new(&factory, &mut lines)
            .run(&descriptors[0], &HostAudioConfig::default(), 4, true)
            .unwrap();

        assert_eq!(report.iterations_completed, 4);
        assert_eq!(report.warnings, 4);
        assert!(lines.iter().any(|l| l == "EQ.Gain = 1.5"));

        let log = log.borrow();
        assert_eq!(log.releases, 4);
        assert!(log.writes.iter().filter(|w| w.0 == 1).all(|w| w.1 == 1.5));
    }

    #[test]
    fn test_drifting_read_back_only_warns() {
        let backend = MockBackend::new(vec!["EQ"]).drifting(0.1);
        let log = backend.log.clone();
        let rt = FormatRuntime::with_backends(vec![Box::new(backend)]);
        let descriptors = scan(&rt);
        let factory = PluginFactory::new(&rt);

        let mut lines: Vec<String> = Vec::new();
        let report = StressLoop::new(&factory, &mut lines)
            .run(&descriptors[0], &HostAudioConfig::default(), 3, false)
            .unwrap();

        assert_eq!(report.iterations_completed, 3);
        // One changed read-back per parameter per iteration
        assert_eq!(report.warnings, 3 * 3);

        let log = log.borrow();
        assert_eq!(log.releases, 3);
        // Each iteration starts from a fresh instance, so the value written
        // is always the one first read.
        let expected: [(u32, f64); 3] = [(10, 0.5), (11, 0.25), (12, 1.0)];
        for chunk in log.writes.chunks(3) {
            assert_eq!(chunk, expected);
        }
    }
}
