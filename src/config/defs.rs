use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::config::tools::ToolConfig;
use crate::utils::cluster::ClusterApi;
use crate::utils::command::OptionKind;

// External software
pub const BWA_TAG: &str = "bwa";
pub const BOWTIE2_TAG: &str = "bowtie2";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const BCFTOOLS_TAG: &str = "bcftools";
pub const FASTQC_TAG: &str = "fastqc";
pub const FASTQ_MCF_TAG: &str = "fastq-mcf";
pub const JAVA_TAG: &str = "java";
pub const VCF_CONCAT_TAG: &str = "vcf-concat";
pub const VCF_SORT_TAG: &str = "vcf-sort";
pub const COVERAGE_GRAPH_TAG: &str = "coverage_graph.py";
pub const READ_QUALITY_GRAPH_TAG: &str = "read_quality_graph.py";
pub const QSUB_TAG: &str = "qsub";
pub const QSTAT_TAG: &str = "qstat";

// Static Filenames
pub const OUTPUT_ROOT: &str = "output";
pub const ALL_SAMPLES: &str = "all_samples";
pub const INPUT_LIST_FILE: &str = "input_files.list";
pub const FLOWCHART_FILE: &str = "flowchart.dot";
pub const EXECUTED_NODES_FILE: &str = "executed_nodes.tsv";
pub const SCRIPT_SUFFIX: &str = "_execute.sh";
pub const CHUNK_DIR_SUFFIX: &str = "_chunks";
pub const COMPLETION_MARKER_EXT: &str = "done";

// Static Parameters
pub const ARRAY_INDEX_VAR: &str = "PBS_ARRAYID";
pub const ARRAY_INDEX_TOKEN: &str = "$PBS_ARRAYID";
pub const DEFAULT_JAVA_MEMORY: &str = "4g";
pub const WRITE_PROBE_EXT: &str = "test";
pub const SAMPLE_CAPTURE: &str = r"[a-zA-Z0-9_\-]+";
pub const CLUSTER_POLL_SECS: u64 = 15;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Local,
    Cluster,
}


/// Broad families used to decide how an error propagates and how it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    OptionValidation,
    Execution,
    BulkSubmission,
    Arity,
    Report,
    Io,
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{}: {keys:?}: invalid steps", .path.display())]
    InvalidSteps { path: PathBuf, keys: Vec<String> },

    #[error("{}: {steps:?}: pipeline steps are not contiguous", .path.display())]
    PipelineStepsNotContiguous { path: PathBuf, steps: Vec<i64> },

    #[error("{}: step {step}: no tool was specified", .path.display())]
    MissingTool { path: PathBuf, step: i64 },

    #[error("{0}: not a valid tool")]
    UnknownTool(String),

    #[error("{}: no such file", .0.display())]
    MissingFile(PathBuf),

    #[error("{0}: cannot be used as a pipeline step")]
    NotAPipelineStage(String),

    #[error("step {position:02} ({stage}): no upstream file matches {patterns:?}")]
    NoMatchingInputs { position: usize, stage: String, patterns: Vec<String> },

    #[error("{stage}: template refers to '{option}', which is not a checked option")]
    TemplateOption { stage: String, option: String },

    #[error("{}: not a JAR file", .0.display())]
    InvalidJar(PathBuf),

    #[error("{stage}: invalid stage descriptor: {reason}")]
    InvalidStageDescriptor { stage: String, reason: String },

    #[error("{stage}: {option}: missing required option")]
    MissingRequiredOption { stage: String, option: String },

    #[error("{stage}: {path}: no such file")]
    MissingInputFile { stage: String, path: String },

    #[error("{stage}: {path}: cannot write file")]
    UnwritableOutput { stage: String, path: String },

    #[error("{stage}: {option}: value does not fit a {kind:?} option")]
    InvalidOptionKind { stage: String, option: String, kind: OptionKind },

    #[error("The following command failed: {command}. Check {} for more detail", .log.display())]
    CommandFailed { command: String, log: PathBuf },

    #[error("{0}: no such executable")]
    ExecutableNotFound(String),

    #[error("{job}: could not run {} ({status})", .script.display())]
    ClusterJobFailed { job: String, script: PathBuf, status: String },

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{0} only works with a cluster backend when using bulk submission")]
    BulkRequiresCluster(String),

    #[error("{0}: unable to join bulk results")]
    CannotMergeBulkResults(String),

    #[error("{0}: cannot run in bulk job (no output option)")]
    BulkWithoutOutput(String),

    #[error("{stage}: {inputs} input(s) for {outputs} output(s): cannot choose between collate and transform")]
    AmbiguousArity { stage: String, inputs: usize, outputs: usize },

    #[error("No reporting options for '{0}'")]
    NotReportable(String),

    #[error("{}: {reason}", .path.display())]
    ReportParse { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        use PipelineError::*;
        match self {
            InvalidConfig(_)
            | InvalidSteps { .. }
            | PipelineStepsNotContiguous { .. }
            | MissingTool { .. }
            | UnknownTool(_)
            | MissingFile(_)
            | NotAPipelineStage(_)
            | NoMatchingInputs { .. }
            | TemplateOption { .. }
            | InvalidJar(_)
            | InvalidStageDescriptor { .. } => ErrorCategory::Config,
            MissingRequiredOption { .. }
            | MissingInputFile { .. }
            | UnwritableOutput { .. }
            | InvalidOptionKind { .. } => ErrorCategory::OptionValidation,
            CommandFailed { .. }
            | ExecutableNotFound(_)
            | ClusterJobFailed { .. }
            | ToolExecution { .. } => ErrorCategory::Execution,
            BulkRequiresCluster(_)
            | CannotMergeBulkResults(_)
            | BulkWithoutOutput(_) => ErrorCategory::BulkSubmission,
            AmbiguousArity { .. } => ErrorCategory::Arity,
            NotReportable(_) | ReportParse { .. } => ErrorCategory::Report,
            IOError(_) => ErrorCategory::Io,
        }
    }

    /// Structural errors are detected before any node runs and abort the whole run.
    pub fn is_structural(&self) -> bool {
        matches!(self.category(), ErrorCategory::Config | ErrorCategory::Arity)
    }
}


/// Process counters for a run, shared by every worker.
#[derive(Debug, Default)]
pub struct JobStats {
    spawned: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl JobStats {
    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }
}

impl fmt::Display for JobStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} process(es) spawned, {} succeeded, {} failed, {} node(s) up to date",
            self.spawned(),
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}


/// Everything a run needs that is decided once before the graph executes.
/// Read-only once wrapped in an `Arc`.
pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_root: PathBuf,
    pub mode: ExecutionMode,
    pub tools: ToolConfig,
    pub cluster: Option<Arc<dyn ClusterApi>>,
    pub preamble: String,
    pub nb_process: usize,
    pub force: bool,
    pub stats: JobStats,
}

impl RunConfig {
    pub fn new(cwd: PathBuf, tools: ToolConfig) -> Self {
        let out_root = cwd.join(OUTPUT_ROOT);
        RunConfig {
            cwd,
            out_root,
            mode: ExecutionMode::Local,
            tools,
            cluster: None,
            preamble: String::new(),
            nb_process: 1,
            force: false,
            stats: JobStats::default(),
        }
    }

    pub fn runs_locally(&self) -> bool {
        self.mode == ExecutionMode::Local
    }
}
