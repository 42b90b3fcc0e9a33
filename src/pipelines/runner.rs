//! Executes a task graph on a bounded pool of workers.

use std::fs;
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::defs::{PipelineError, RunConfig, EXECUTED_NODES_FILE};
use crate::pipelines::graph::{NodeId, PipelineGraph, TaskNode};
use crate::utils::command::execute_stage;
use crate::utils::file::is_up_to_date;


/// Runs the work of one node. The runner only decides when.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &TaskNode, config: &RunConfig) -> Result<(), PipelineError>;
}

/// Runs the node's stage with its injected options.
pub struct StageExecutor;

#[async_trait]
impl NodeExecutor for StageExecutor {
    async fn execute(&self, node: &TaskNode, config: &RunConfig) -> Result<(), PipelineError> {
        execute_stage(node.stage, node.invocation_options(), &node.out_dir, config).await
    }
}


/// Reporting entry for a node that ran (or was up to date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedNode {
    pub stage_name: String,
    pub sample_id: String,
    pub output_prefix: String,
}

impl ExecutedNode {
    fn from_node(node: &TaskNode) -> Self {
        ExecutedNode {
            stage_name: node.stage.name.to_string(),
            sample_id: node.sample_id.clone(),
            output_prefix: node.output_prefix(),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Vec<ExecutedNode>),
    Cancelled,
}

#[derive(Debug)]
enum NodeOutcome {
    Executed,
    UpToDate,
    NotStarted,
}


/// Outputs newer than the inputs only count when the last run of the node succeeded.
fn up_to_date(node: &TaskNode) -> bool {
    let inputs: Vec<PathBuf> = node.inputs.iter().map(PathBuf::from).collect();
    let outputs: Vec<PathBuf> = node.outputs.iter().map(PathBuf::from).collect();
    node.completion_marker().is_file() && is_up_to_date(&inputs, &outputs)
}

fn clear_completion(node: &TaskNode) -> Result<(), PipelineError> {
    match fs::remove_file(node.completion_marker()) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn mark_completed(node: &TaskNode) -> Result<(), PipelineError> {
    fs::write(node.completion_marker(), "")?;
    Ok(())
}

fn spawn_node(
    tasks: &mut JoinSet<(NodeId, Result<NodeOutcome, PipelineError>)>,
    node: TaskNode,
    config: Arc<RunConfig>,
    executor: Arc<dyn NodeExecutor>,
    semaphore: Arc<Semaphore>,
    abort: Arc<AtomicBool>,
) {
    tasks.spawn(async move {
        let id = node.id;
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return (id, Ok(NodeOutcome::NotStarted));
        };
        if abort.load(Ordering::SeqCst) {
            return (id, Ok(NodeOutcome::NotStarted));
        }
        if !config.force && up_to_date(&node) {
            info!("{:02}_{} ({}): up to date", node.position, node.stage.name, node.sample_id);
            config.stats.record_skip();
            return (id, Ok(NodeOutcome::UpToDate));
        }
        info!("{:02}_{} ({}): starting", node.position, node.stage.name, node.sample_id);
        let result = match clear_completion(&node) {
            Ok(()) => executor.execute(&node, &config).await.and_then(|_| mark_completed(&node)),
            Err(e) => Err(e),
        };
        (id, result.map(|_| NodeOutcome::Executed))
    });
}

fn write_executed_nodes(config: &RunConfig, executed: &[ExecutedNode]) -> Result<(), PipelineError> {
    let mut file = fs::File::create(config.out_root.join(EXECUTED_NODES_FILE))?;
    writeln!(file, "stage_name\tsample_id\toutput_prefix")?;
    for node in executed {
        writeln!(file, "{}\t{}\t{}", node.stage_name, node.sample_id, node.output_prefix)?;
    }
    Ok(())
}


/// Resolves on Ctrl-C; never when the signal handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Runs every node of `graph`, at most `config.nb_process` at a time, until done or Ctrl-C.
pub async fn run_graph(
    graph: &PipelineGraph,
    config: Arc<RunConfig>,
    executor: Arc<dyn NodeExecutor>,
) -> Result<RunOutcome, PipelineError> {
    run_graph_until(graph, config, executor, interrupted()).await
}

/// Runs every node of `graph`, at most `config.nb_process` at a time.
/// Running local processes are killed when `cancel` resolves.
///
/// # Arguments
///
/// * `graph` - Task graph, nodes in topological order.
/// * `config` - Shared run configuration.
/// * `executor` - What running a node means.
/// * `cancel` - Stops scheduling once resolved.
///
/// # Returns
/// The executed nodes, `Cancelled` once `cancel` resolved, or the first node error once running nodes finished.
pub async fn run_graph_until(
    graph: &PipelineGraph,
    config: Arc<RunConfig>,
    executor: Arc<dyn NodeExecutor>,
    cancel: impl Future<Output = ()>,
) -> Result<RunOutcome, PipelineError> {
    for node in &graph.nodes {
        fs::create_dir_all(&node.out_dir)?;
    }
    fs::create_dir_all(&config.out_root)?;

    let successors = graph.successors();
    let mut waiting: Vec<usize> = graph.nodes.iter().map(|n| n.predecessors.len()).collect();
    let mut executed: Vec<ExecutedNode> = Vec::new();
    let mut first_error: Option<PipelineError> = None;

    let semaphore = Arc::new(Semaphore::new(config.nb_process.max(1)));
    let abort = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for node in graph.nodes.iter().filter(|n| n.predecessors.is_empty()) {
        spawn_node(&mut tasks, node.clone(), config.clone(), executor.clone(), semaphore.clone(), abort.clone());
    }

    tokio::pin!(cancel);

    loop {
        let joined = tokio::select! {
            joined = tasks.join_next() => joined,
            _ = &mut cancel => {
                abort.store(true, Ordering::SeqCst);
                warn!("Cancelled by user");
                tasks.abort_all();
                write_executed_nodes(&config, &executed)?;
                return Ok(RunOutcome::Cancelled);
            }
        };
        let Some(joined) = joined else { break };

        let (id, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("Worker task failed: {}", e);
                abort.store(true, Ordering::SeqCst);
                first_error.get_or_insert(PipelineError::ToolExecution {
                    tool: "worker".to_string(),
                    error: e.to_string(),
                });
                continue;
            }
        };
        let node = &graph.nodes[id];
        match result {
            Ok(NodeOutcome::NotStarted) => {
                debug!("{:02}_{} ({}): not started", node.position, node.stage.name, node.sample_id);
            }
            Ok(NodeOutcome::Executed) | Ok(NodeOutcome::UpToDate) => {
                executed.push(ExecutedNode::from_node(node));
                if abort.load(Ordering::SeqCst) {
                    continue;
                }
                for successor in &successors[id] {
                    waiting[*successor] -= 1;
                    if waiting[*successor] == 0 {
                        spawn_node(
                            &mut tasks,
                            graph.nodes[*successor].clone(),
                            config.clone(),
                            executor.clone(),
                            semaphore.clone(),
                            abort.clone(),
                        );
                    }
                }
            }
            Err(e) => {
                error!("{:02}_{} ({}): {}", node.position, node.stage.name, node.sample_id, e);
                abort.store(true, Ordering::SeqCst);
                first_error.get_or_insert(e);
            }
        }
    }

    write_executed_nodes(&config, &executed)?;
    match first_error {
        Some(e) => Err(e),
        None => Ok(RunOutcome::Completed(executed)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::config::tools::{ToolConfig, ToolSettings};
    use crate::utils::command::{samtools, vcftools, Options, StageDescriptor};

    /// Records which nodes ran and how many ran at once.
    #[derive(Default)]
    struct Recorder {
        invoked: Mutex<Vec<NodeId>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        failing: Option<NodeId>,
    }

    #[async_trait]
    impl NodeExecutor for Recorder {
        async fn execute(&self, node: &TaskNode, _config: &RunConfig) -> Result<(), PipelineError> {
            self.invoked.lock().unwrap().push(node.id);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.failing == Some(node.id) {
                return Err(PipelineError::CommandFailed {
                    command: node.stage.name.to_string(),
                    log: PathBuf::from("x.err"),
                });
            }
            Ok(())
        }
    }

    fn node(id: NodeId, stage: &'static StageDescriptor, out_dir: &Path, predecessors: Vec<NodeId>) -> TaskNode {
        TaskNode {
            id,
            position: id + 1,
            stage,
            sample_id: format!("s{}", id),
            out_dir: out_dir.to_path_buf(),
            inputs: vec![out_dir.join(format!("s{}.sam", id)).display().to_string()],
            outputs: vec![out_dir.join(format!("s{}.sam2bam.bam", id)).display().to_string()],
            predecessors,
            options: Options::new(),
        }
    }

    fn config_in(dir: &Path, nb_process: usize) -> Arc<RunConfig> {
        let mut config = RunConfig::new(dir.to_path_buf(), ToolConfig::default());
        config.nb_process = nb_process;
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_failed_predecessor_blocks_successor() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let graph = PipelineGraph {
            nodes: vec![
                node(0, &samtools::SAM2BAM, dir.path(), vec![]),
                node(1, &samtools::SAM2BAM, dir.path(), vec![0]),
            ],
        };
        let recorder = Arc::new(Recorder { failing: Some(0), ..Default::default() });

        let result = run_graph(&graph, config_in(dir.path(), 2), recorder.clone()).await;
        assert!(matches!(result, Err(PipelineError::CommandFailed { .. })));
        assert_eq!(*recorder.invoked.lock().unwrap(), vec![0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_pool_is_bounded() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut nodes: Vec<TaskNode> = (0..4).map(|id| node(id, &samtools::SAM2BAM, dir.path(), vec![])).collect();
        nodes.push(node(4, &samtools::SAM2BAM, dir.path(), vec![0, 1, 2, 3]));
        let graph = PipelineGraph { nodes };
        let recorder = Arc::new(Recorder::default());

        let outcome = run_graph(&graph, config_in(dir.path(), 2), recorder.clone()).await?;
        let RunOutcome::Completed(executed) = outcome else {
            panic!("run was cancelled");
        };
        assert_eq!(executed.len(), 5);
        assert_eq!(executed.last().map(|n| n.sample_id.as_str()), Some("s4"));
        assert!(recorder.max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(recorder.invoked.lock().unwrap().last(), Some(&4));

        let table = fs::read_to_string(dir.path().join("output").join(EXECUTED_NODES_FILE))?;
        assert_eq!(table.lines().count(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_output_spawns_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut sam2bam = node(0, &samtools::SAM2BAM, dir.path(), vec![]);
        fs::write(&sam2bam.inputs[0], "@HD\n")?;
        sam2bam.outputs = vec![dir.path().join("no_such_dir").join("s0.bam").display().to_string()];
        let graph = PipelineGraph { nodes: vec![sam2bam] };
        let config = config_in(dir.path(), 1);

        let result = run_graph(&graph, config.clone(), Arc::new(StageExecutor)).await;
        assert!(matches!(result, Err(PipelineError::UnwritableOutput { .. })));
        assert_eq!(config.stats.spawned(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_up_to_date_nodes_are_skipped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let graph = PipelineGraph { nodes: vec![node(0, &samtools::SAM2BAM, dir.path(), vec![])] };
        fs::write(&graph.nodes[0].inputs[0], "@HD\n")?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        fs::write(&graph.nodes[0].outputs[0], "BAM")?;

        // Fresh outputs from a run that never completed are not trusted.
        let recorder = Arc::new(Recorder::default());
        let config = config_in(dir.path(), 1);
        run_graph(&graph, config.clone(), recorder.clone()).await?;
        assert_eq!(*recorder.invoked.lock().unwrap(), vec![0]);
        assert_eq!(config.stats.skipped(), 0);
        assert!(graph.nodes[0].completion_marker().is_file());

        let recorder = Arc::new(Recorder::default());
        let config = config_in(dir.path(), 1);
        run_graph(&graph, config.clone(), recorder.clone()).await?;
        assert!(recorder.invoked.lock().unwrap().is_empty());
        assert_eq!(config.stats.skipped(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_node_is_rerun() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let graph = PipelineGraph { nodes: vec![node(0, &samtools::SAM2BAM, dir.path(), vec![])] };
        fs::write(&graph.nodes[0].inputs[0], "@HD\n")?;
        fs::write(graph.nodes[0].completion_marker(), "")?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        fs::write(&graph.nodes[0].outputs[0], "truncated")?;

        let failing = Arc::new(Recorder { failing: Some(0), ..Default::default() });
        let result = run_graph(&graph, config_in(dir.path(), 1), failing).await;
        assert!(result.is_err());
        assert!(!graph.nodes[0].completion_marker().exists());

        let recorder = Arc::new(Recorder::default());
        run_graph(&graph, config_in(dir.path(), 1), recorder.clone()).await?;
        assert_eq!(*recorder.invoked.lock().unwrap(), vec![0]);
        Ok(())
    }

    fn process_alive(pid: u32) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_cancel_kills_running_process() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let bin = dir.path().join("bin");
        fs::create_dir(&bin)?;
        let stub = bin.join("vcf-sort");
        fs::write(&stub, "#!/bin/sh\necho $$ > \"$1.pid\"\necho partial\nexec sleep 30\n")?;
        fs::set_permissions(&stub, fs::Permissions::from_mode(0o755))?;

        let sort_node = node(0, &vcftools::VCF_SORT, dir.path(), vec![]);
        fs::write(&sort_node.inputs[0], "#CHROM\n")?;
        let pid_file = PathBuf::from(format!("{}.pid", sort_node.inputs[0]));
        let output = PathBuf::from(&sort_node.outputs[0]);
        let marker = sort_node.completion_marker();
        let graph = PipelineGraph { nodes: vec![sort_node] };

        let tools = ToolConfig::new(HashMap::from([(
            "VcfSort".to_string(),
            ToolSettings { bin_dir: Some(bin), ..Default::default() },
        )]));
        let config = Arc::new(RunConfig::new(dir.path().to_path_buf(), tools));

        let started = pid_file.clone();
        let cancel = async move {
            while fs::read_to_string(&started).map_or(true, |pid| pid.trim().parse::<u32>().is_err()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let outcome = run_graph_until(&graph, config, Arc::new(StageExecutor), cancel).await?;
        assert!(matches!(outcome, RunOutcome::Cancelled));

        let pid: u32 = fs::read_to_string(&pid_file)?.trim().parse()?;
        let mut waited = 0;
        while (process_alive(pid) || output.exists()) && waited < 500 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(!process_alive(pid), "process {} survived cancellation", pid);
        assert!(!output.exists());
        assert!(!marker.exists());
        Ok(())
    }
}
