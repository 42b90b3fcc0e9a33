//! FastQC quality control of paired reads. FastQC writes beside its input, so
//! results are moved to the stage outputs after each run.

use std::path::Path;

use log::debug;
use tokio::fs;

use crate::config::defs::{PipelineError, RunConfig, FASTQC_TAG};
use crate::utils::command::{input, output, replace_suffix, required, Composite, Options, StageDescriptor, STAGE_DEFAULTS};
use crate::utils::executor;

pub static FASTQC_FASTQ: StageDescriptor = StageDescriptor {
    name: "FastQC_FastQ",
    version: "0.11.2",
    executable: FASTQC_TAG,
    command: "{input}",
    options: &[input("input"), output("output")],
    input_patterns: &[r"_R1\.(\S+\.)?fastq(\.gz)?$", r"_R2\.(\S+\.)?fastq(\.gz)?$"],
    output_suffixes: &["_R1_fastqc.zip", "_R2_fastqc.zip"],
    suffix: Some("fastqc"),
    produces_data: false,
    composite: Some(Composite::FastQc),
    ..STAGE_DEFAULTS
};


/// Runs FastQC once per mate and relocates each report.
pub async fn run_fastqc(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    for (read, report) in [("input1", "output1"), ("input2", "output2")] {
        let read_path = required(stage, &options, read)?.to_string();
        let report_path = required(stage, &options, report)?.to_string();

        let mut mate_options = options.clone();
        mate_options.insert("input".into(), read_path.clone().into());
        mate_options.insert("output".into(), report_path.clone().into());
        executor::run_stage(stage, mate_options, out_dir, config).await?;

        move_results(&read_path, &report_path).await?;
    }
    Ok(())
}

/// `<reads>_fastqc/` goes to the output without `.zip`, `<reads>_fastqc.zip` to the output.
async fn move_results(read_path: &str, report_path: &str) -> Result<(), PipelineError> {
    let produced = replace_suffix(read_path, r"\.fastq(\.gz)?$", "_fastqc");
    let produced_zip = format!("{}.zip", produced);

    if Path::new(&produced).is_dir() {
        let destination = replace_suffix(report_path, r"\.zip$", "");
        debug!("Moving {} to {}", produced, destination);
        fs::rename(&produced, &destination).await?;
    }
    if Path::new(&produced_zip).is_file() {
        debug!("Moving {} to {}", produced_zip, report_path);
        fs::rename(&produced_zip, report_path).await?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_results() -> anyhow::Result<()> {
        let raw = TempDir::new()?;
        let out = TempDir::new()?;
        let reads = raw.path().join("s1_R1.fastq.gz");
        std::fs::write(&reads, b"")?;
        std::fs::create_dir(raw.path().join("s1_R1_fastqc"))?;
        std::fs::write(raw.path().join("s1_R1_fastqc.zip"), b"PK")?;

        let report = out.path().join("s1_R1_fastqc.zip");
        move_results(reads.to_str().unwrap(), report.to_str().unwrap()).await?;

        assert!(report.is_file());
        assert!(out.path().join("s1_R1_fastqc").is_dir());
        assert!(!raw.path().join("s1_R1_fastqc.zip").exists());
        Ok(())
    }
}
