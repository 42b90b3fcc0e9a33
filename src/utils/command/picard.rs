//! Picard tools, run from `picard.jar`.

use std::path::Path;

use crate::config::defs::{PipelineError, RunConfig, JAVA_TAG};
use crate::utils::command::{
    input, optional, output, replace_suffix, required, requirement, Composite, JarSpec, Options, ReportKind,
    StageDescriptor, STAGE_DEFAULTS,
};
use crate::utils::executor;
use crate::utils::report::{find_unique, parse_first_table, parse_metrics_section, Report};

const VERSION: &str = "1.127";
const PICARD_JAR: JarSpec = JarSpec {
    file_name: "picard.jar",
    default_dir: "/opt/picard-tools-1.127",
};
const ALIGNMENTS: &[&str] = &[r"\.(\S+\.)?[sb]am$"];

pub static SORT_SAM: StageDescriptor = StageDescriptor {
    name: "SortSam",
    version: VERSION,
    executable: JAVA_TAG,
    command: "SortSam INPUT={input} OUTPUT={output} SORT_ORDER={sort_order} {other_opt}",
    options: &[input("input"), output("output"), requirement("sort_order"), optional("other_opt")],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".sorted.bam"],
    suffix: Some("sorted"),
    jar: Some(PICARD_JAR),
    ..STAGE_DEFAULTS
};

pub static HS_METRICS: StageDescriptor = StageDescriptor {
    name: "HsMetrics",
    version: VERSION,
    executable: JAVA_TAG,
    command: "CalculateHsMetrics INPUT={input} OUTPUT={output} REFERENCE_SEQUENCE={reference} \
              BAIT_INTERVALS={baits} TARGET_INTERVALS={targets} {other_opt}",
    options: &[
        input("input"),
        output("output"),
        input("reference"),
        input("baits"),
        input("targets"),
        optional("other_opt"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".hsmetrics"],
    suffix: Some("hsmetrics"),
    produces_data: false,
    jar: Some(PICARD_JAR),
    report: Some(ReportKind::PicardMetrics),
    ..STAGE_DEFAULTS
};

pub static INSERT_SIZE: StageDescriptor = StageDescriptor {
    name: "InsertSize",
    version: VERSION,
    executable: JAVA_TAG,
    command: "CollectInsertSizeMetrics INPUT={input} OUTPUT={output} REFERENCE_SEQUENCE={reference} \
              HISTOGRAM_FILE={hist_file} {other_opt}",
    options: &[
        input("input"),
        output("output"),
        output("hist_file"),
        input("reference"),
        optional("other_opt"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".insertsize"],
    suffix: Some("insertsize"),
    produces_data: false,
    jar: Some(PICARD_JAR),
    composite: Some(Composite::InsertSize),
    report: Some(ReportKind::InsertSize),
    ..STAGE_DEFAULTS
};

pub static ADD_RG: StageDescriptor = StageDescriptor {
    name: "AddRG",
    version: VERSION,
    executable: JAVA_TAG,
    command: "AddOrReplaceReadGroups I={input} O={output} RGDS={rgds} RGPL={rgpl} RGPU={rgpu} \
              RGSM={sample_id} RGCN={rgcn} RGLB={rglb}",
    options: &[
        input("input"),
        output("output"),
        requirement("rgds"),
        requirement("rgpl"),
        requirement("rgpu"),
        requirement("sample_id"),
        requirement("rgcn"),
        requirement("rglb"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".rg.bam"],
    suffix: Some("rg"),
    jar: Some(PICARD_JAR),
    ..STAGE_DEFAULTS
};

pub static MARK_DUPLICATES: StageDescriptor = StageDescriptor {
    name: "MarkDuplicates",
    version: VERSION,
    executable: JAVA_TAG,
    command: "MarkDuplicates INPUT={input} O={output} METRICS_FILE={metrics} {other_opt}",
    options: &[input("input"), output("output"), output("metrics"), optional("other_opt")],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".dedup.bam"],
    suffix: Some("dedup"),
    jar: Some(PICARD_JAR),
    composite: Some(Composite::MarkDuplicates),
    report: Some(ReportKind::PicardMetrics),
    ..STAGE_DEFAULTS
};


/// Metrics land beside the output as `<output without .bam>.dedup`.
pub async fn run_mark_duplicates(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let metrics = replace_suffix(required(stage, &options, "output")?, r"\.[sb]am$", ".dedup");
    options.insert("metrics".into(), metrics.into());
    executor::run_stage(stage, options, out_dir, config).await
}

/// The histogram is written next to the output with a `.png` extension.
pub async fn run_insert_size(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let output = required(stage, &options, "output")?.to_string();
    options.insert("hist_file".into(), histogram_path(&output).into());
    executor::run_stage(stage, options, out_dir, config).await
}

/// Replaces everything from the first dot of the file name with `.png`.
fn histogram_path(output: &str) -> String {
    let path = Path::new(output);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    path.with_file_name(format!("{}.png", stem)).to_string_lossy().into_owned()
}

/// `## METRICS` table of `<prefix>*.<suffix>` (HsMetrics, MarkDuplicates).
pub fn read_metrics_report(stage: &StageDescriptor, prefix: &str) -> Result<Report, PipelineError> {
    let suffix = stage.suffix.unwrap_or(stage.name);
    let path = find_unique(&format!("{}*.{}", prefix, suffix))?;
    parse_metrics_section(&path)
}

pub fn read_insert_size_report(stage: &StageDescriptor, prefix: &str) -> Result<Report, PipelineError> {
    let suffix = stage.suffix.unwrap_or(stage.name);
    let path = find_unique(&format!("{}*.{}", prefix, suffix))?;
    parse_first_table(&path)
}
