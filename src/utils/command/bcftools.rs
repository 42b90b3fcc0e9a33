use crate::config::defs::BCFTOOLS_TAG;
use crate::utils::command::{input, output, BulkMerge, StageDescriptor, STAGE_DEFAULTS};

/// Variant calling from an mpileup; the input is line oriented, so it can be
/// split for array submission and the chunk VCFs merged back.
pub static VARIANT_CALLER: StageDescriptor = StageDescriptor {
    name: "BcftoolsVariantCaller",
    version: "1.1",
    executable: BCFTOOLS_TAG,
    command: "view -vcg {input}",
    stdout: "{output}",
    options: &[input("input"), output("output")],
    input_patterns: &[r"\.(\S+\.)?mpileup$"],
    output_suffixes: &[".bcftools.vcf"],
    suffix: Some("bcftools"),
    merge: Some(BulkMerge::VcfChunks),
    ..STAGE_DEFAULTS
};
