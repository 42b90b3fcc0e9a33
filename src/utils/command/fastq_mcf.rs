//! fastq-mcf adapter clipping and quality trimming of paired reads.

use std::fs;

use crate::config::defs::{PipelineError, FASTQ_MCF_TAG};
use crate::utils::command::{input, optional, output, ReportKind, StageDescriptor, STAGE_DEFAULTS};
use crate::utils::report::{capture_count, find_unique, Report, ReportValue};

pub static CLIP_TRIM: StageDescriptor = StageDescriptor {
    name: "ClipTrim",
    version: "1.1.2-806",
    executable: FASTQ_MCF_TAG,
    command: "{adapters} {input1} {input2} -o {output1} -o {output2} {other_opt}",
    stdout: "{prefix}.out",
    stderr: "{prefix}.err",
    options: &[
        input("input1"),
        input("input2"),
        output("output1"),
        output("output2"),
        input("adapters"),
        optional("other_opt"),
        output("prefix"),
    ],
    input_patterns: &[r"_R1\.(\S+\.)?fastq(\.gz)?$", r"_R2\.(\S+\.)?fastq(\.gz)?$"],
    output_suffixes: &["_R1.ct.fastq.gz", "_R2.ct.fastq.gz"],
    suffix: Some("ct"),
    report: Some(ReportKind::ClipTrim),
    ..STAGE_DEFAULTS
};


/// Read counts from the `<prefix>.out` log of fastq-mcf.
/// Totals are per mate in the log, so they are doubled for the pair.
pub fn read_report(prefix: &str) -> Result<Report, PipelineError> {
    let path = find_unique(&format!("{}.out", prefix))?;
    let content = fs::read_to_string(&path)?;

    let total = capture_count(&path, &content, r"Total reads: (\d+)")? * 2;
    let too_short = capture_count(&path, &content, r"Too short after clip: (\d+)")? * 2;
    let trimmed_r1 = capture_count(&path, &content, r"Trimmed (\d+) reads .*_R1\.fastq\.gz")?;
    let trimmed_r2 = capture_count(&path, &content, r"Trimmed (\d+) reads .*_R2\.fastq\.gz")?;

    Ok(Report::from([
        ("total_reads_before_trim".to_string(), ReportValue::Count(total)),
        ("nb_short_reads_after_trim".to_string(), ReportValue::Count(too_short)),
        ("nb_trimmed_r1".to_string(), ReportValue::Count(trimmed_r1)),
        ("nb_trimmed_r2".to_string(), ReportValue::Count(trimmed_r2)),
    ]))
}
