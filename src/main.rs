//! plugstress - A plugin lifecycle stress harness
//!
//! Scans a VST3 or CLAP bundle, picks one plugin by name and repeatedly
//! instantiates it, writes every parameter back with its own value and
//! releases it again.

mod clap;
mod config;
mod plugin;
mod stress;
mod vst3;

use ::clap::Parser;
use anyhow::Context;

use config::{Cli, Settings};
use plugin::catalog::report_types;
use plugin::{FormatRuntime, PluginCatalog, PluginFactory, find_by_name};
use stress::{LogSink, StressLoop};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::resolve(&cli).context("failed to resolve settings")?;

    log::info!("Starting plugstress");
    log::debug!("Settings: {:?}", settings);

    let runtime = FormatRuntime::initialise();
    let result = run(&settings, &runtime);
    runtime.shutdown();

    result
}

fn run(settings: &Settings, runtime: &FormatRuntime) -> anyhow::Result<()> {
    let catalog = PluginCatalog::new(runtime).with_format(settings.format);
    let descriptors = catalog
        .scan(&settings.bundle_path)
        .with_context(|| format!("failed to scan {}", settings.bundle_path.display()))?;

    if settings.list_only {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    let mut sink = LogSink;
    report_types(&descriptors, &mut sink);

    let descriptor = find_by_name(&descriptors, &settings.plugin_name)?;
    log::info!(
        "Stressing {} ({}, {}) for {} iterations at {} Hz / {} frames",
        descriptor.name,
        descriptor.format,
        descriptor.uid,
        settings.iterations,
        settings.audio.sample_rate,
        settings.audio.block_size
    );

    let factory = PluginFactory::new(runtime);
    let report = StressLoop::new(&factory, &mut sink).run(
        descriptor,
        &settings.audio,
        settings.iterations,
        settings.verbose,
    )?;

    log::info!(
        "Completed {} iterations of {} ({} parameters, {} warnings)",
        report.iterations_completed,
        report.plugin_name,
        report.parameter_count,
        report.warnings
    );
    Ok(())
}
