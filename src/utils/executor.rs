//! Runs one validated stage invocation: locally, as a cluster job, or as a bulk array job.

use std::fs::{self, File, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, error, info};
use tokio::process::Command;

use crate::config::defs::{
    PipelineError, RunConfig, ARRAY_INDEX_TOKEN, ARRAY_INDEX_VAR, SCRIPT_SUFFIX,
};
use crate::config::tools::BulkSettings;
use crate::utils::cluster::{ClusterApi, JobRequest};
use crate::utils::command::{java, required, BulkMerge, Options, OptionValue, StageDescriptor};
use crate::utils::file::{merge_vcf_chunks, split_file};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Validated,
    Running,
    Succeeded,
    Failed,
}

struct Job {
    stage: &'static StageDescriptor,
    state: JobState,
}

impl Job {
    fn new(stage: &'static StageDescriptor) -> Self {
        Job { stage, state: JobState::Pending }
    }

    fn advance(&mut self, next: JobState) {
        debug!("{}: {:?} -> {:?}", self.stage.name, self.state, next);
        self.state = next;
    }
}

/// Files a job fills through redirection. Removed on drop unless the job succeeded,
/// including when the job future is dropped mid-run.
struct PartialOutputs {
    paths: Vec<PathBuf>,
}

impl PartialOutputs {
    fn new(stdout: &str, bulk: Option<&BulkPlan>) -> Self {
        let paths = match bulk {
            None => vec![PathBuf::from(stdout)],
            Some(plan) => (1..=plan.nb_chunks)
                .map(|index| PathBuf::from(stdout.replace(ARRAY_INDEX_TOKEN, &index.to_string())))
                .chain([PathBuf::from(&plan.output)])
                .collect(),
        };
        PartialOutputs { paths }
    }

    fn keep(mut self) {
        self.paths.clear();
    }
}

impl Drop for PartialOutputs {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            if fs::remove_file(&path).is_ok() {
                debug!("Removed partial output {}", path.display());
            }
        }
    }
}

/// What a bulk submission changed in the options, needed to merge the chunk results.
#[derive(Debug)]
struct BulkPlan {
    option: String,
    output: String,
    chunk_output: String,
    nb_chunks: usize,
}


/// Validates and runs one invocation of `stage`.
///
/// # Arguments
///
/// * `stage` - Descriptor of the stage to run.
/// * `options` - Options of this invocation; JAR and bulk options are added here.
/// * `out_dir` - Output directory of the node, receiving scripts and chunks.
/// * `config` - Run configuration.
///
/// # Returns
/// Ok once the process (or every array element) exited successfully.
pub async fn run_stage(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let mut job = Job::new(stage);
    let result = run_job(&mut job, options, out_dir, config).await;
    let spawned = job.state == JobState::Running;
    match &result {
        Ok(()) => {
            job.advance(JobState::Succeeded);
            config.stats.record_success();
        }
        Err(e) => {
            job.advance(JobState::Failed);
            if spawned {
                config.stats.record_failure();
            }
            debug!("{}: {}", stage.name, e);
        }
    }
    result
}

async fn run_job(job: &mut Job, mut options: Options, out_dir: &Path, config: &RunConfig) -> Result<(), PipelineError> {
    let stage = job.stage;
    let bulk = match config.tools.bulk(stage.name) {
        Some(settings) => Some(prepare_bulk(stage, &mut options, &settings, out_dir, config)?),
        None => None,
    };
    if stage.jar.is_some() {
        java::inject_jar_options(stage, &mut options, &config.tools)?;
    }

    let safe = stage.check_options_with_split(&options, bulk.as_ref().map(|plan| plan.option.as_str()))?;
    job.advance(JobState::Validated);

    let argv = stage.build_command(&safe, config.tools.bin_dir(stage.name))?;
    let stdout = stage.stdout_path(&safe)?;
    let stderr = stage.stderr_path(&safe)?;

    job.advance(JobState::Running);
    config.stats.record_spawn();
    let partial = PartialOutputs::new(&stdout, bulk.as_ref());
    let result = match (bulk, config.cluster.as_deref()) {
        (Some(plan), Some(cluster)) => run_bulk(stage, cluster, &plan, &argv, &stdout, &stderr, out_dir, config).await,
        (Some(_), None) => Err(PipelineError::BulkRequiresCluster(stage.name.to_string())),
        (None, _) if config.runs_locally() => {
            run_local(&argv, Some(Path::new(&stdout)), Some(Path::new(&stderr))).await
        }
        (None, Some(cluster)) => run_on_cluster(stage, cluster, &argv, &stdout, &stderr, out_dir, config).await,
        (None, None) => run_script_locally(stage, &argv, &stdout, &stderr, out_dir, config).await,
    };
    if result.is_ok() {
        partial.keep();
    }
    result
}

/// Splits the configured option into chunks and points the options at the chunk pattern.
/// Fails before anything is written when no cluster can take the array job.
fn prepare_bulk(
    stage: &StageDescriptor,
    options: &mut Options,
    settings: &BulkSettings,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<BulkPlan, PipelineError> {
    if config.runs_locally() || config.cluster.is_none() {
        return Err(PipelineError::BulkRequiresCluster(stage.name.to_string()));
    }
    let output = match options.get("output").and_then(OptionValue::as_single) {
        Some(output) => output.to_string(),
        None => return Err(PipelineError::BulkWithoutOutput(stage.name.to_string())),
    };
    let to_split = required(stage, options, &settings.split_file)?.to_string();
    if !Path::new(&to_split).is_file() {
        return Err(PipelineError::MissingInputFile { stage: stage.name.to_string(), path: to_split });
    }
    let sample_id = options
        .get("sample_id")
        .and_then(OptionValue::as_single)
        .unwrap_or(stage.name)
        .to_string();

    let pattern = split_file(Path::new(&to_split), settings.nb_chunks, out_dir, &sample_id)?;
    let chunk_output = format!("{}_{}", output, ARRAY_INDEX_TOKEN);
    options.insert(settings.split_file.clone(), pattern.into());
    options.insert("output".to_string(), chunk_output.clone().into());

    Ok(BulkPlan {
        option: settings.split_file.clone(),
        output,
        chunk_output,
        nb_chunks: settings.nb_chunks,
    })
}


/// Spawns `argv` and waits for it, redirecting stdout/stderr into files when given.
/// Dropping the returned future kills the process.
pub async fn run_local(argv: &[String], stdout: Option<&Path>, stderr: Option<&Path>) -> Result<(), PipelineError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(PipelineError::ToolExecution {
            tool: String::new(),
            error: "empty command line".to_string(),
        });
    };
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    if let Some(path) = stdout {
        command.stdout(Stdio::from(File::create(path)?));
    }
    if let Some(path) = stderr {
        command.stderr(Stdio::from(File::create(path)?));
    }

    info!("Running: {}", argv.join(" "));
    let mut child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => PipelineError::ExecutableNotFound(program.clone()),
        _ => PipelineError::IOError(e),
    })?;
    let status = child.wait().await?;
    if !status.success() {
        let log = stderr.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(program));
        error!("{} exited with {}", program, status);
        return Err(PipelineError::CommandFailed { command: argv.join(" "), log });
    }
    Ok(())
}

/// Cluster mode with no cluster available: the generated script runs here instead.
async fn run_script_locally(
    stage: &StageDescriptor,
    argv: &[String],
    stdout: &str,
    stderr: &str,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let script = write_script(stage, argv, stdout, stderr, out_dir, &config.preamble)?;
    let script_arg = script.to_string_lossy().into_owned();
    run_local(&[script_arg], None, None).await.map_err(|e| match e {
        PipelineError::CommandFailed { command, .. } => PipelineError::CommandFailed { command, log: PathBuf::from(stderr) },
        other => other,
    })?;
    fs::remove_file(&script)?;
    Ok(())
}

fn job_request(stage: &StageDescriptor, script: &Path, config: &RunConfig) -> JobRequest {
    JobRequest {
        script: script.to_path_buf(),
        job_name: format!("_{}", stage.name),
        working_dir: config.cwd.clone(),
        walltime: config.tools.walltime(stage.name).map(str::to_string),
        native_spec: config.tools.nodes_spec(stage.name),
    }
}

async fn run_on_cluster(
    stage: &StageDescriptor,
    cluster: &dyn ClusterApi,
    argv: &[String],
    stdout: &str,
    stderr: &str,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let script = write_script(stage, argv, stdout, stderr, out_dir, &config.preamble)?;
    let request = job_request(stage, &script, config);
    let info = cluster.run_job(&request).await?;
    if !info.is_completed() {
        return Err(PipelineError::ClusterJobFailed {
            job: info.job_id.clone(),
            script,
            status: info.describe(),
        });
    }
    fs::remove_file(&script)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_bulk(
    stage: &StageDescriptor,
    cluster: &dyn ClusterApi,
    plan: &BulkPlan,
    argv: &[String],
    stdout: &str,
    stderr: &str,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let script = write_script(stage, argv, stdout, stderr, out_dir, &config.preamble)?;
    let request = job_request(stage, &script, config);
    info!("{}: submitting {} array element(s)", stage.name, plan.nb_chunks);

    let infos = cluster.run_bulk_jobs(&request, plan.nb_chunks).await?;
    if let Some(failed) = infos.iter().find(|info| !info.is_completed()) {
        return Err(PipelineError::ClusterJobFailed {
            job: failed.job_id.clone(),
            script,
            status: failed.describe(),
        });
    }

    match stage.merge {
        Some(BulkMerge::VcfChunks) => merge_vcf_chunks(stage.name, &plan.output, &plan.chunk_output, plan.nb_chunks)?,
        None => return Err(PipelineError::CannotMergeBulkResults(stage.name.to_string())),
    }
    fs::remove_file(&script)?;
    Ok(())
}


/// Quotes one shell word the way POSIX `sh` reads it back unchanged.
pub fn shell_quote(word: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c);
    if !word.is_empty() && word.chars().all(safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r#"'"'"'"#))
}

/// Like `shell_quote`, but the array index placeholder is left for the shell to expand.
fn script_word(word: &str) -> String {
    shell_quote(word).replace(ARRAY_INDEX_TOKEN, &format!("'\"${{{}}}\"'", ARRAY_INDEX_VAR))
}

/// Writes an executable bash script running `argv` with its redirections, in `out_dir`.
///
/// # Arguments
///
/// * `stage` - Stage being run, used to name the script.
/// * `argv` - Command line.
/// * `stdout` - File receiving standard output.
/// * `stderr` - File receiving standard error.
/// * `out_dir` - Directory of the script.
/// * `preamble` - Lines inserted after the shebang (module loads, exports).
///
/// # Returns
/// Path of the script, kept on disk.
pub fn write_script(
    stage: &StageDescriptor,
    argv: &[String],
    stdout: &str,
    stderr: &str,
    out_dir: &Path,
    preamble: &str,
) -> Result<PathBuf, PipelineError> {
    let mut content = String::from("#!/bin/bash\n");
    if !preamble.trim().is_empty() {
        content.push_str(preamble.trim_end());
        content.push('\n');
    }
    let words: Vec<String> = argv.iter().map(|word| script_word(word)).collect();
    content.push_str(&format!(
        "exec {} > {} 2> {}\n",
        words.join(" "),
        script_word(stdout),
        script_word(stderr)
    ));

    let mut file = tempfile::Builder::new()
        .prefix(&format!("{}_", stage.name))
        .suffix(SCRIPT_SUFFIX)
        .tempfile_in(out_dir)?;
    file.write_all(content.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| PipelineError::IOError(e.error))?;
    fs::set_permissions(&path, Permissions::from_mode(0o755))?;
    debug!("{}: wrote {}", stage.name, path.display());
    Ok(path)
}
