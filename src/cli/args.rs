use std::path::PathBuf;

use clap::Parser;
use log::info;

use crate::config::defs::PipelineError;

#[derive(Parser, Debug, Clone)]
#[command(name = "dnaseq-pipelines", version, about = "Execute a NGS pipeline")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "input", default_value = "input_files.txt",
          help = "A file containing the pipeline input files (one sample per line, one or more file per sample)")]
    pub input: PathBuf,

    #[arg(short = 'p', long = "pipeline-config", default_value = "pipeline.toml",
          help = "The pipeline configuration file")]
    pub pipeline_config: PathBuf,

    #[arg(short = 't', long = "tool-config", default_value = "tools.toml",
          help = "The tools configuration file")]
    pub tool_config: PathBuf,

    #[arg(short = 'd', long = "use-cluster", alias = "use-drmaa", action,
          help = "Submit the tasks to the cluster instead of running them locally")]
    pub use_cluster: bool,

    #[arg(short = 'n', long = "nb-process", default_value_t = 1,
          help = "The number of concurrent tasks (allow at least one per sample with --use-cluster)")]
    pub nb_process: usize,

    #[arg(long, help = "Lines inserted at the top of every cluster script (module loads, exports)")]
    pub preamble: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Run every task, even when its outputs are up to date")]
    pub force: bool,

    #[arg(long, default_value_t = false, help = "Print the available tools and exit")]
    pub list_tools: bool,
}

impl Arguments {
    /// The configuration and manifest files must exist and at least one process is needed.
    pub fn check(&self) -> Result<(), PipelineError> {
        let files = [self.pipeline_config.as_path(), self.tool_config.as_path(), self.input.as_path()];
        if let Some(missing) = files.into_iter().find(|path| !path.is_file()) {
            return Err(PipelineError::MissingFile(missing.to_path_buf()));
        }
        if let Some(preamble) = self.preamble.as_deref().filter(|path| !path.is_file()) {
            return Err(PipelineError::MissingFile(preamble.to_path_buf()));
        }
        if self.nb_process < 1 {
            return Err(PipelineError::InvalidConfig("invalid number of process".to_string()));
        }
        Ok(())
    }

    /// Logs the options the run was started with.
    pub fn log_summary(&self) {
        info!("Options used:");
        info!("  --input {}", self.input.display());
        info!("  --pipeline-config {}", self.pipeline_config.display());
        info!("  --tool-config {}", self.tool_config.display());
        info!("  --nb-process {}", self.nb_process);
        if self.use_cluster {
            info!("  --use-cluster");
        }
        if let Some(preamble) = &self.preamble {
            info!("  --preamble {}", preamble.display());
        }
        if self.force {
            info!("  --force");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let args = Arguments::parse_from(["dnaseq-pipelines"]);
        assert_eq!(args.input, PathBuf::from("input_files.txt"));
        assert_eq!(args.nb_process, 1);
        assert!(!args.use_cluster);

        let args = Arguments::parse_from(["dnaseq-pipelines", "--use-drmaa", "-n", "4"]);
        assert!(args.use_cluster);
        assert_eq!(args.nb_process, 4);
    }

    #[test]
    fn test_check() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = |name: &str| dir.path().join(name).display().to_string();
        for name in ["pipeline.toml", "tools.toml", "input_files.txt"] {
            fs::write(dir.path().join(name), "")?;
        }
        let base = [
            "dnaseq-pipelines".to_string(),
            "-p".to_string(),
            path("pipeline.toml"),
            "-t".to_string(),
            path("tools.toml"),
            "-i".to_string(),
        ];

        let mut argv = base.to_vec();
        argv.push(path("input_files.txt"));
        Arguments::parse_from(&argv).check()?;

        argv.extend(["-n".to_string(), "0".to_string()]);
        let err = Arguments::parse_from(&argv).check().unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: invalid number of process");

        let mut argv = base.to_vec();
        argv.push(path("absent.txt"));
        let err = Arguments::parse_from(&argv).check().unwrap_err();
        assert!(err.to_string().ends_with("absent.txt: no such file"));
        Ok(())
    }
}
