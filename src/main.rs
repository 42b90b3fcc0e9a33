use std::env;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{LevelFilter, debug, error, info, warn};

use dnaseq_pipelines::cli::{parse, Arguments};
use dnaseq_pipelines::config::defs::{ExecutionMode, PipelineError, RunConfig};
use dnaseq_pipelines::config::tools::ToolConfig;
use dnaseq_pipelines::pipelines;
use dnaseq_pipelines::pipelines::runner::RunOutcome;
use dnaseq_pipelines::utils::cluster::{ClusterApi, PbsCluster};
use dnaseq_pipelines::utils::command::registry;
use dnaseq_pipelines::utils::system::check_parallelism;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    if args.list_tools {
        list_tools()?;
        return Ok(());
    }

    println!("\n-------------\n dnaseq-pipelines\n-------------\n");

    let run_config = match build_run_config(&args).await {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    match pipelines::run(run_config, &args.pipeline_config, &args.input).await {
        Ok(RunOutcome::Completed(executed)) => {
            debug!("{} node(s) executed", executed.len());
        }
        Ok(RunOutcome::Cancelled) => {
            info!("Cancelled by user");
            return Ok(());
        }
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Checks the arguments and gathers everything the run needs.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
///
/// # Returns
/// RunConfig
async fn build_run_config(args: &Arguments) -> Result<RunConfig, PipelineError> {
    args.check()?;
    args.log_summary();

    let cwd = env::current_dir()?;
    info!("The current directory is {:?}", cwd);

    let tools = ToolConfig::from_file(&args.tool_config)?;
    let mut config = RunConfig::new(cwd, tools);
    config.nb_process = args.nb_process;
    config.force = args.force;
    if let Some(preamble) = &args.preamble {
        config.preamble = fs::read_to_string(preamble)?;
    }

    if args.use_cluster {
        config.mode = ExecutionMode::Cluster;
        config.cluster = PbsCluster::detect().await.map(|cluster| Arc::new(cluster) as Arc<dyn ClusterApi>);
        if config.cluster.is_none() {
            warn!("No cluster backend available; job scripts will run on this host");
        }
    } else {
        check_parallelism(config.nb_process);
    }
    Ok(config)
}

/// Prints every registered stage with its version and executable.
fn list_tools() -> Result<(), PipelineError> {
    for stage in registry()?.iter() {
        let usage = if stage.is_pipeline_stage() { "" } else { " (helper)" };
        println!("{}\t{}\t{}{}", stage.name, stage.version, stage.executable, usage);
    }
    Ok(())
}
