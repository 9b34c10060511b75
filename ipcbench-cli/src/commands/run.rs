// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ipcbench run` command - Run as one member of a process group.
//!
//! Every member executes the same matrix; rank 0 aggregates, writes the report
//! and prints the summary.

use std::path::Path;

use anyhow::Context;
use ipcbench_benchmark::{print_summary, JsonReporter, ReportDocument};
use ipcbench_core::coord::GroupEnv;
use ipcbench_core::{
    BackendRegistry, ConfigLoader, ConfigurationError, Driver, RunConfig, RunContext, RunMatrix,
    ScenarioKind, SocketGroup,
};

use crate::RunArgs;

/// Load the config file, or defaults when none was given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RunConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ConfigLoader::defaults()?,
    };
    Ok(config)
}

/// Apply CLI flags on top of the config's matrix defaults.
pub fn apply_overrides(config: &mut RunConfig, args: &RunArgs) -> Result<(), ConfigurationError> {
    if let Some(scenario) = &args.scenario {
        config.matrix.scenarios = ScenarioKind::parse_selection(scenario)?;
    }
    if !args.backends.is_empty() {
        config.matrix.backends = args.backends.clone();
    }
    if !args.data_sizes.is_empty() {
        config.matrix.data_sizes = args.data_sizes.clone();
    }
    if let Some(iterations) = args.iterations {
        config.matrix.iterations = iterations;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    Ok(())
}

/// Resolve the run matrix against the bundled backends.
pub fn build_matrix(
    registry: &BackendRegistry,
    config: &RunConfig,
) -> Result<RunMatrix, ConfigurationError> {
    RunMatrix::resolve(
        registry,
        &config.matrix.backends,
        &config.matrix.scenarios,
        &config.matrix.data_sizes,
        config.matrix.iterations,
    )
}

pub fn execute(config_path: Option<&Path>, args: &RunArgs) -> anyhow::Result<()> {
    let env = GroupEnv::from_env().context("not started by a launcher (try `ipcbench launch`)")?;
    let span = tracing::info_span!("worker", rank = env.rank);
    let _enter = span.enter();

    if env.size < 2 {
        return Err(ConfigurationError::InsufficientProcesses { size: env.size }.into());
    }

    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, args)?;
    let registry = BackendRegistry::with_defaults();
    let matrix = build_matrix(&registry, &config)?;

    tracing::info!(
        size = env.size,
        run_id = %env.run_id,
        cells = matrix.len(),
        "Starting worker"
    );

    let group = SocketGroup::join(&env, &config.coordination)?;
    let ctx = RunContext::new(&group, &config)?;
    let report = Driver::new(&ctx, &registry).run_matrix(&matrix)?;

    // Only rank 0 holds a report.
    if let Some(report) = report {
        let doc = ReportDocument::new(env.run_id.clone(), env.size, report);
        let reporter = JsonReporter::new(&config.output_dir)
            .with_context(|| format!("cannot create {}", config.output_dir.display()))?;
        let path = reporter.save(&doc)?;

        println!();
        print_summary(&doc);
        println!();
        println!("Report saved to: {}", path.display());
    }

    tracing::info!("Worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_matrix_defaults() {
        let mut config = load_config(None).unwrap();
        let args = RunArgs {
            scenario: Some("streaming".to_string()),
            backends: vec!["shm".to_string(), "socket".to_string()],
            data_sizes: vec![1, 10],
            iterations: Some(3),
            output: Some("out".into()),
        };

        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.matrix.scenarios, vec![ScenarioKind::Streaming]);
        assert_eq!(config.matrix.iterations, 3);
        assert_eq!(config.output_dir, Path::new("out"));

        let matrix = build_matrix(&BackendRegistry::with_defaults(), &config).unwrap();
        assert_eq!(matrix.len(), 4);
        assert_eq!(matrix.cells()[0].key(), "shm/streaming/1/3");
    }

    #[test]
    fn test_empty_args_keep_defaults() {
        let mut config = load_config(None).unwrap();
        let before = config.matrix.clone();
        apply_overrides(&mut config, &RunArgs::default()).unwrap();
        assert_eq!(config.matrix, before);
    }

    #[test]
    fn test_bad_selection_is_a_configuration_error() {
        let mut config = load_config(None).unwrap();
        let args = RunArgs {
            scenario: Some("sideways".to_string()),
            ..RunArgs::default()
        };
        assert!(apply_overrides(&mut config, &args).is_err());

        config.matrix.backends = vec!["pigeon".to_string()];
        assert!(matches!(
            build_matrix(&BackendRegistry::with_defaults(), &config),
            Err(ConfigurationError::UnknownBackend { .. })
        ));
    }
}
