//! samtools stages, plus the index-then-run composites shared by other wrappers.

use std::path::Path;

use crate::config::defs::{PipelineError, RunConfig, SAMTOOLS_TAG};
use crate::utils::command::{
    execute_stage, input, inputs, optional, output, replace_suffix, required, required_list, Composite, Options,
    StageDescriptor, STAGE_DEFAULTS,
};
use crate::utils::executor;

const VERSION: &str = "1.1";
const ALIGNMENTS: &[&str] = &[r"\.(\S+\.)?[sb]am$"];

pub static SAM2BAM: StageDescriptor = StageDescriptor {
    name: "Sam2Bam",
    version: VERSION,
    executable: SAMTOOLS_TAG,
    command: "view -h -b -S {input}",
    stdout: "{output}",
    options: &[input("input"), output("output")],
    input_patterns: &[r"\.(\S+\.)?sam$"],
    output_suffixes: &[".sam2bam.bam"],
    suffix: Some("sam2bam"),
    ..STAGE_DEFAULTS
};

pub static INDEX_BAM: StageDescriptor = StageDescriptor {
    name: "IndexBam",
    version: VERSION,
    executable: SAMTOOLS_TAG,
    command: "index {input}",
    stdout: "{input}.bai.out",
    stderr: "{input}.bai.err",
    options: &[input("input")],
    ..STAGE_DEFAULTS
};

pub static KEEP_MAPPED: StageDescriptor = StageDescriptor {
    name: "KeepMapped",
    version: VERSION,
    executable: SAMTOOLS_TAG,
    command: "view -u -h {mapped_opt} {input}",
    stdout: "{output}",
    options: &[input("input"), output("output"), optional("mapped_opt")],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".mapped.bam"],
    suffix: Some("mapped"),
    composite: Some(Composite::KeepMapped),
    ..STAGE_DEFAULTS
};

pub static FLAG_STAT: StageDescriptor = StageDescriptor {
    name: "FlagStat",
    version: VERSION,
    executable: SAMTOOLS_TAG,
    command: "flagstat {input}",
    stdout: "{output}",
    options: &[input("input"), output("output")],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".flagstat"],
    suffix: Some("flagstat"),
    produces_data: false,
    ..STAGE_DEFAULTS
};

pub static MPILEUP: StageDescriptor = StageDescriptor {
    name: "MPILEUP",
    version: VERSION,
    executable: SAMTOOLS_TAG,
    command: "mpileup {other_opt} -f {reference} {input}",
    stdout: "{output}",
    options: &[input("input"), input("reference"), optional("other_opt"), output("output")],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".mpileup"],
    suffix: Some("mpileup"),
    composite: Some(Composite::IndexThenRun),
    ..STAGE_DEFAULTS
};

pub static MPILEUP_MULTI: StageDescriptor = StageDescriptor {
    name: "MPILEUP_Multi",
    version: VERSION,
    executable: SAMTOOLS_TAG,
    command: "mpileup {other_opt} -f {reference} {inputs}",
    stdout: "{output}",
    options: &[inputs("inputs"), input("reference"), optional("other_opt"), output("output")],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".mpileup"],
    suffix: Some("mpileup"),
    merges_all_inputs: true,
    composite: Some(Composite::IndexEachThenRun),
    ..STAGE_DEFAULTS
};


/// Indexes one alignment file with `samtools index`.
pub async fn index_bam(path: &str, out_dir: &Path, config: &RunConfig) -> Result<(), PipelineError> {
    let options = Options::from([("input".to_string(), path.into())]);
    execute_stage(&INDEX_BAM, options, out_dir, config).await
}

/// Writes the mapped reads to the output, then the unmapped ones to `*.unmapped.bam`.
pub async fn run_keep_mapped(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let output = required(stage, &options, "output")?.to_string();

    let mut mapped = options.clone();
    mapped.insert("mapped_opt".into(), "-F 4".into());
    executor::run_stage(stage, mapped, out_dir, config).await?;

    let mut unmapped = options;
    unmapped.insert("mapped_opt".into(), "-f 4".into());
    unmapped.insert("output".into(), replace_suffix(&output, r"\.mapped\.bam$", ".unmapped.bam").into());
    executor::run_stage(stage, unmapped, out_dir, config).await
}

/// Indexes `input`, then runs the stage.
pub async fn run_indexed(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    index_bam(required(stage, &options, "input")?, out_dir, config).await?;
    executor::run_stage(stage, options, out_dir, config).await
}

/// Indexes every file of `inputs`, then runs the stage.
pub async fn run_indexed_all(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    for path in required_list(stage, &options, "inputs")? {
        index_bam(path, out_dir, config).await?;
    }
    executor::run_stage(stage, options, out_dir, config).await
}
