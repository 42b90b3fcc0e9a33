//! Plotting scripts: per-sample and all-samples coverage, paired-read quality.

use std::fs;
use std::path::Path;

use crate::config::defs::{PipelineError, RunConfig, COVERAGE_GRAPH_TAG, READ_QUALITY_GRAPH_TAG};
use crate::utils::command::samtools::index_bam;
use crate::utils::command::{
    input, inputs, optional, output, replace_suffix, required, required_list, requirement, Composite, Options,
    ReportKind, StageDescriptor, STAGE_DEFAULTS,
};
use crate::utils::executor;
use crate::utils::report::{find_unique, Report, ReportValue};

const COVERAGE_VERSION: &str = "0.3";
const ALIGNMENTS: &[&str] = &[r"\.(\S+\.)?[sb]am$"];

pub static COVERAGE_GRAPH: StageDescriptor = StageDescriptor {
    name: "CoverageGraph",
    version: COVERAGE_VERSION,
    executable: COVERAGE_GRAPH_TAG,
    command: "{other_opt} --out {out_prefix} --bed {targets} --bam {input}",
    options: &[
        input("input"),
        output("output"),
        output("out_prefix"),
        input("targets"),
        optional("other_opt"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".coverage_graph.png"],
    suffix: Some("coverage_graph"),
    produces_data: false,
    composite: Some(Composite::CoverageGraph),
    report: Some(ReportKind::Figure { extension: "png", key: "coverage_figname" }),
    ..STAGE_DEFAULTS
};

pub static COVERAGE_GRAPH_MULTI: StageDescriptor = StageDescriptor {
    name: "CoverageGraph_Multi",
    version: COVERAGE_VERSION,
    executable: COVERAGE_GRAPH_TAG,
    command: "{other_opt} --out {out_prefix} --bed {targets} --bam {inputs}",
    options: &[
        inputs("inputs"),
        output("output"),
        output("out_prefix"),
        input("targets"),
        optional("other_opt"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".coverage_graph.png"],
    suffix: Some("coverage_graph"),
    produces_data: false,
    merges_all_inputs: true,
    composite: Some(Composite::CoverageGraphMulti),
    report: Some(ReportKind::Figure { extension: "png", key: "coverage_multi_figname" }),
    ..STAGE_DEFAULTS
};

pub static READ_QUALITY_GRAPH: StageDescriptor = StageDescriptor {
    name: "ReadQualityGraph",
    version: "0.1",
    executable: READ_QUALITY_GRAPH_TAG,
    command: "{other_opt} --input {input1} {input2} --output {output} --title-prefix {sample_id} --log {output}.log",
    options: &[
        input("input1"),
        input("input2"),
        output("output"),
        requirement("sample_id"),
        optional("other_opt"),
    ],
    input_patterns: &[r"_R1\.(\S+\.)?fastq(\.gz)?$", r"_R2\.(\S+\.)?fastq(\.gz)?$"],
    output_suffixes: &[".read_quality_graph.pdf"],
    suffix: Some("read_quality_graph"),
    produces_data: false,
    report: Some(ReportKind::Figure { extension: "pdf", key: "read_qual_figname" }),
    ..STAGE_DEFAULTS
};


fn with_out_prefix(stage: &StageDescriptor, mut options: Options) -> Result<Options, PipelineError> {
    let out_prefix = replace_suffix(required(stage, &options, "output")?, r"\.png$", "");
    options.insert("out_prefix".into(), out_prefix.into());
    Ok(options)
}

pub async fn run_coverage_graph(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    index_bam(required(stage, &options, "input")?, out_dir, config).await?;
    let options = with_out_prefix(stage, options)?;
    executor::run_stage(stage, options, out_dir, config).await
}

pub async fn run_coverage_graph_multi(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    for path in required_list(stage, &options, "inputs")? {
        index_bam(path, out_dir, config).await?;
    }
    let options = with_out_prefix(stage, options)?;
    executor::run_stage(stage, options, out_dir, config).await
}

/// Copies the unique `<prefix>*.<suffix>.<ext>` figure to `<prefix>_<stage>.<ext>`.
pub fn read_figure_report(
    stage: &StageDescriptor,
    prefix: &str,
    extension: &str,
    key: &str,
) -> Result<Report, PipelineError> {
    let suffix = stage.suffix.unwrap_or(stage.name);
    let figure = find_unique(&format!("{}*.{}.{}", prefix, suffix, extension))?;
    let copy = format!("{}_{}.{}", prefix, stage.name, extension);
    fs::copy(&figure, &copy)?;
    Ok(Report::from([(key.to_string(), ReportValue::Text(copy))]))
}
