pub mod graph;
pub mod runner;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::config::defs::{PipelineError, RunConfig, FLOWCHART_FILE};
use crate::config::pipeline::{read_manifest, read_pipeline_steps, StageInstance};
use crate::pipelines::graph::build_graph;
use crate::pipelines::runner::{run_graph, RunOutcome, StageExecutor};
use crate::utils::system::find_executable;


/// Warns about stage executables that cannot be found from here.
/// Cluster nodes may see a different PATH, so this never fails the run.
fn check_executables(instances: &[StageInstance], config: &RunConfig) {
    for instance in instances {
        let stage = instance.stage;
        match find_executable(stage.executable, config.tools.bin_dir(stage.name)) {
            Some(path) => info!("{} {}: {}", stage.name, stage.version, path.display()),
            None => warn!("{}: {} not found", stage.name, stage.executable),
        }
    }
}


/// Reads both configurations, builds the task graph and runs it.
///
/// # Arguments
///
/// * `config` - Shared run configuration.
/// * `pipeline_config` - TOML pipeline steps.
/// * `manifest` - Sample manifest, one sample per line.
///
/// # Returns
/// RunOutcome
pub async fn run(config: Arc<RunConfig>, pipeline_config: &Path, manifest: &Path) -> Result<RunOutcome, PipelineError> {
    let instances = read_pipeline_steps(pipeline_config)?;
    let samples = read_manifest(manifest)?;
    info!("{} step(s), {} sample(s)", instances.len(), samples.len());
    check_executables(&instances, &config);

    let graph = build_graph(&instances, &samples, &config.out_root)?;
    fs::create_dir_all(&config.out_root)?;
    fs::write(config.out_root.join(FLOWCHART_FILE), graph.to_dot())?;
    info!("{} task(s) to run", graph.nodes.len());

    let outcome = run_graph(&graph, config.clone(), Arc::new(StageExecutor)).await;
    info!("{}", config.stats);
    outcome
}
