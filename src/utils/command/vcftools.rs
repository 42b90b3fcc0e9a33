use crate::config::defs::{VCF_CONCAT_TAG, VCF_SORT_TAG};
use crate::utils::command::{input, inputs, optional, output, StageDescriptor, STAGE_DEFAULTS};

const VERSION: &str = "0.1.12b";

pub static VCF_CONCAT: StageDescriptor = StageDescriptor {
    name: "VcfConcat",
    version: VERSION,
    executable: VCF_CONCAT_TAG,
    command: "{other_opt} {inputs}",
    stdout: "{output}",
    options: &[inputs("inputs"), optional("other_opt"), output("output")],
    input_patterns: &[r"\.(\S+\.)?vcf$"],
    output_suffixes: &[".vcf_concat.vcf"],
    suffix: Some("vcf_concat"),
    merges_all_inputs: true,
    ..STAGE_DEFAULTS
};

pub static VCF_SORT: StageDescriptor = StageDescriptor {
    name: "VcfSort",
    version: VERSION,
    executable: VCF_SORT_TAG,
    command: "{other_opt} {input}",
    stdout: "{output}",
    options: &[input("input"), optional("other_opt"), output("output")],
    input_patterns: &[r"\.(\S+\.)?vcf$"],
    output_suffixes: &[".vcf_sort.vcf"],
    suffix: Some("vcf_sort"),
    ..STAGE_DEFAULTS
};
