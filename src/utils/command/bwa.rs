//! BWA stages: ALN (helper), SAMPE and MEM.

use std::path::Path;

use crate::config::defs::{PipelineError, RunConfig, BWA_TAG};
use crate::utils::command::{
    copy_present, execute_stage, input, optional, output, required, Composite, Options, StageDescriptor,
    STAGE_DEFAULTS,
};
use crate::utils::executor;

const VERSION: &str = "0.7.12";
const PAIRED_FASTQ: &[&str] = &[r"_R1\.(\S+\.)?fastq(\.gz)?$", r"_R2\.(\S+\.)?fastq(\.gz)?$"];

pub static ALN: StageDescriptor = StageDescriptor {
    name: "ALN",
    version: VERSION,
    executable: BWA_TAG,
    command: "aln {reference} {other_aln_opt} {input}",
    stdout: "{output}",
    options: &[input("reference"), optional("other_aln_opt"), input("input"), output("output")],
    ..STAGE_DEFAULTS
};

pub static MEM: StageDescriptor = StageDescriptor {
    name: "MEM",
    version: VERSION,
    executable: BWA_TAG,
    command: "mem {reference} {input1} {input2} {other_opt}",
    stdout: "{output}",
    options: &[
        input("reference"),
        optional("other_opt"),
        input("input1"),
        input("input2"),
        output("output"),
    ],
    input_patterns: PAIRED_FASTQ,
    output_suffixes: &[".mem.sam"],
    suffix: Some("mem"),
    ..STAGE_DEFAULTS
};

pub static SAMPE: StageDescriptor = StageDescriptor {
    name: "SAMPE",
    version: VERSION,
    executable: BWA_TAG,
    command: "sampe {reference} {sai1} {sai2} {input1} {input2}",
    stdout: "{output}",
    options: &[
        input("reference"),
        input("sai1"),
        input("sai2"),
        input("input1"),
        input("input2"),
        output("output"),
    ],
    input_patterns: PAIRED_FASTQ,
    output_suffixes: &[".sampe.sam"],
    suffix: Some("sampe"),
    composite: Some(Composite::Sampe),
    ..STAGE_DEFAULTS
};


/// `<dirname(output)>/<basename(read)>.sai`
fn sai_path(read: &str, output: &str) -> String {
    let name = Path::new(read)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| read.to_string());
    let dir = Path::new(output).parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{}.sai", name)).to_string_lossy().into_owned()
}

/// Aligns each mate with ALN, then pairs them with SAMPE.
pub async fn run_sampe(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let output = required(stage, &options, "output")?.to_string();

    for (read, sai) in [("input1", "sai1"), ("input2", "sai2")] {
        let read_path = required(stage, &options, read)?.to_string();
        let sai_file = sai_path(&read_path, &output);

        let mut aln_options = Options::new();
        copy_present(&options, &mut aln_options, &["reference", "other_aln_opt"]);
        aln_options.insert("input".into(), read_path.into());
        aln_options.insert("output".into(), sai_file.clone().into());
        execute_stage(&ALN, aln_options, out_dir, config).await?;

        options.insert(sai.into(), sai_file.into());
    }

    executor::run_stage(stage, options, out_dir, config).await
}
