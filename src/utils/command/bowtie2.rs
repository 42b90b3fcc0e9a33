use crate::config::defs::BOWTIE2_TAG;
use crate::utils::command::{input, optional, output, requirement, StageDescriptor, STAGE_DEFAULTS};

pub static BOWTIE2_ALIGN: StageDescriptor = StageDescriptor {
    name: "Bowtie2_align",
    version: "2.2.4",
    executable: BOWTIE2_TAG,
    command: "{reference} -1 {input1} -2 {input2} -S {output} {other_opt}",
    options: &[
        input("input1"),
        input("input2"),
        output("output"),
        requirement("reference"),
        optional("other_opt"),
    ],
    input_patterns: &[r"_R1\.(\S+\.)?fastq(\.gz)?$", r"_R2\.(\S+\.)?fastq(\.gz)?$"],
    output_suffixes: &[".bowtie2.sam"],
    suffix: Some("bowtie2"),
    ..STAGE_DEFAULTS
};
