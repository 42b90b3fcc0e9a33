//! Cluster submission seam and the PBS/Torque backend driven through `qsub`/`qstat`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;

use crate::config::defs::{PipelineError, ARRAY_INDEX_VAR, CLUSTER_POLL_SECS, QSTAT_TAG, QSUB_TAG};


/// Final state of one cluster job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub job_id: String,
    pub exit_status: i32,
    pub was_aborted: bool,
    pub has_signal: bool,
    pub has_core_dump: bool,
}

impl JobInfo {
    /// Reads the exit status the job wrapper left in its status file.
    /// A missing or unreadable status means the job never ran to completion.
    pub fn from_status(job_id: &str, status: Option<&str>) -> Self {
        let code = status.and_then(|s| s.trim().parse::<i32>().ok());
        match code {
            None => JobInfo {
                job_id: job_id.to_string(),
                exit_status: -1,
                was_aborted: true,
                has_signal: false,
                has_core_dump: false,
            },
            Some(code) => JobInfo {
                job_id: job_id.to_string(),
                exit_status: code,
                was_aborted: false,
                has_signal: code > 128,
                // bash reports SIGQUIT/SIGSEGV/SIGABRT dumps as 128 + signal
                has_core_dump: matches!(code - 128, 3 | 6 | 11),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        !self.was_aborted && !self.has_signal && !self.has_core_dump && self.exit_status == 0
    }

    pub fn describe(&self) -> String {
        if self.was_aborted {
            "aborted".to_string()
        } else if self.has_core_dump {
            format!("core dumped (exit status {})", self.exit_status)
        } else if self.has_signal {
            format!("killed by signal {}", self.exit_status - 128)
        } else {
            format!("exit status {}", self.exit_status)
        }
    }
}


/// One submission: a self-contained script and its resources.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub script: PathBuf,
    pub job_name: String,
    pub working_dir: PathBuf,
    pub walltime: Option<String>,
    pub native_spec: Option<String>,
}

impl JobRequest {
    fn status_file(&self) -> PathBuf {
        let mut status = self.script.clone().into_os_string();
        status.push(".status");
        PathBuf::from(status)
    }

    fn qsub_args(&self) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            self.job_name.clone(),
            "-d".to_string(),
            self.working_dir.to_string_lossy().into_owned(),
            "-o".to_string(),
            format!("{}.pbs.out", self.script.display()),
            "-e".to_string(),
            format!("{}.pbs.err", self.script.display()),
        ];
        if let Some(walltime) = &self.walltime {
            args.push("-l".to_string());
            args.push(format!("walltime={}", walltime));
        }
        if let Some(spec) = &self.native_spec {
            args.extend(spec.split_whitespace().map(str::to_string));
        }
        args
    }
}


/// Blocking (from the caller's point of view) job submission.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn run_job(&self, request: &JobRequest) -> Result<JobInfo, PipelineError>;

    /// Submits an array of `count` elements, indexed from 1 through the array index variable.
    async fn run_bulk_jobs(&self, request: &JobRequest, count: usize) -> Result<Vec<JobInfo>, PipelineError>;
}


pub struct PbsCluster {
    poll_interval: Duration,
}

impl PbsCluster {
    /// Returns a backend when `qsub` can be spawned on this host.
    pub async fn detect() -> Option<Self> {
        let found = Command::new(QSUB_TAG)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok();
        if found {
            info!("{} found, cluster submission available", QSUB_TAG);
            Some(PbsCluster { poll_interval: Duration::from_secs(CLUSTER_POLL_SECS) })
        } else {
            debug!("{} not found", QSUB_TAG);
            None
        }
    }

    async fn submit(&self, request: &JobRequest, wrapper: String, array: Option<usize>) -> Result<String, PipelineError> {
        let mut args = request.qsub_args();
        if let Some(count) = array {
            args.push("-t".to_string());
            args.push(format!("1-{}", count));
        }
        debug!("{} {}", QSUB_TAG, args.join(" "));

        let mut child = Command::new(QSUB_TAG)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::ToolExecution { tool: QSUB_TAG.to_string(), error: e.to_string() })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(wrapper.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(PipelineError::ClusterJobFailed {
                job: request.job_name.clone(),
                script: request.script.clone(),
                status: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let job_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Submitted {} as job {}", request.job_name, job_id);
        Ok(job_id)
    }

    /// Polls `qstat` until the job is unknown to the server or reported complete.
    async fn wait(&self, job_id: &str) -> Result<(), PipelineError> {
        loop {
            let output = Command::new(QSTAT_TAG)
                .args(["-f", job_id])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .output()
                .await
                .map_err(|e| PipelineError::ToolExecution { tool: QSTAT_TAG.to_string(), error: e.to_string() })?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !output.status.success() || stdout.contains("job_state = C") {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn read_status(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("{}: {}", path.display(), e);
            None
        }
    }
}

#[async_trait]
impl ClusterApi for PbsCluster {
    async fn run_job(&self, request: &JobRequest) -> Result<JobInfo, PipelineError> {
        let status_file = request.status_file();
        let wrapper = format!("{}\necho $? > {}\n", request.script.display(), status_file.display());
        let job_id = self.submit(request, wrapper, None).await?;
        self.wait(&job_id).await?;

        let info = JobInfo::from_status(&job_id, read_status(&status_file).as_deref());
        if status_file.exists() {
            std::fs::remove_file(&status_file)?;
        }
        Ok(info)
    }

    async fn run_bulk_jobs(&self, request: &JobRequest, count: usize) -> Result<Vec<JobInfo>, PipelineError> {
        let status_file = request.status_file();
        let wrapper = format!(
            "{}\necho $? > {}_${{{}}}\n",
            request.script.display(),
            status_file.display(),
            ARRAY_INDEX_VAR
        );
        let job_id = self.submit(request, wrapper, Some(count)).await?;
        self.wait(&job_id).await?;

        let mut infos = Vec::with_capacity(count);
        for index in 1..=count {
            let element = PathBuf::from(format!("{}_{}", status_file.display(), index));
            let element_id = format!("{}-{}", job_id, index);
            infos.push(JobInfo::from_status(&element_id, read_status(&element).as_deref()));
            if element.exists() {
                std::fs::remove_file(&element)?;
            }
        }
        Ok(infos)
    }
}
