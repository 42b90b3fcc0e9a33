//! GATK 3 walkers, run from `GenomeAnalysisTK.jar`.

use std::path::Path;

use tokio::fs;

use crate::config::defs::{PipelineError, RunConfig, INPUT_LIST_FILE, JAVA_TAG};
use crate::utils::command::samtools::index_bam;
use crate::utils::command::{
    copy_present, execute_stage, input, optional, output, replace_suffix, required, required_list, requirement,
    Composite, JarSpec, OptionSpec, Options, StageDescriptor, STAGE_DEFAULTS,
};
use crate::utils::executor;

const VERSION: &str = "3.3-0";
const GATK_JAR: JarSpec = JarSpec {
    file_name: "GenomeAnalysisTK.jar",
    default_dir: "/opt/GenomeAnalysisTK-3.3-0",
};
const ALIGNMENTS: &[&str] = &[r"\.(\S+\.)?[sb]am$"];
const VARIANTS: &[&str] = &[r"\.(\S+\.)?vcf$"];
const CALLER_OPTIONS: &[OptionSpec] = &[
    input("input"),
    output("output"),
    input("reference"),
    optional("other_opt"),
    input("dbsnp"),
];

pub static REALIGNER_TARGET_CREATOR: StageDescriptor = StageDescriptor {
    name: "RealignerTargetCreator",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T RealignerTargetCreator -I {input} -R {reference} -o {output} {other_rtc_opt}",
    options: &[input("input"), output("output"), input("reference"), optional("other_rtc_opt")],
    jar: Some(GATK_JAR),
    ..STAGE_DEFAULTS
};

pub static INDEL_REALIGNER: StageDescriptor = StageDescriptor {
    name: "IndelRealigner",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T IndelRealigner -R {reference} -I {input} -targetIntervals {interval_file} -o {output} {other_opt}",
    options: &[
        input("input"),
        output("output"),
        input("reference"),
        input("interval_file"),
        optional("other_opt"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".realign_gatk.bam"],
    suffix: Some("realign_gatk"),
    jar: Some(GATK_JAR),
    composite: Some(Composite::IndelRealigner),
    ..STAGE_DEFAULTS
};

pub static PRINT_READS: StageDescriptor = StageDescriptor {
    name: "PrintReads",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T PrintReads -I {input} -R {reference} -BQSR {groups} -o {output} {other_opt}",
    options: &[
        input("input"),
        output("output"),
        input("reference"),
        input("groups"),
        optional("other_opt"),
    ],
    jar: Some(GATK_JAR),
    ..STAGE_DEFAULTS
};

pub static BASE_RECALIBRATOR: StageDescriptor = StageDescriptor {
    name: "BaseRecalibrator",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T BaseRecalibrator -R {reference} -I {input} -knownSites {dbsnp} -o {groups} {other_opt}",
    stdout: "{groups}.out",
    stderr: "{groups}.err",
    options: &[
        input("input"),
        output("groups"),
        input("reference"),
        input("dbsnp"),
        optional("other_opt"),
    ],
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".base_recal.bam"],
    suffix: Some("base_recal"),
    jar: Some(GATK_JAR),
    composite: Some(Composite::BaseRecalibrator),
    ..STAGE_DEFAULTS
};

pub static UNIFIED_GENOTYPER: StageDescriptor = StageDescriptor {
    name: "UnifiedGenotyper",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T UnifiedGenotyper -R {reference} -I {input} --dbsnp {dbsnp} -o {output} {other_opt}",
    options: CALLER_OPTIONS,
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".unified_genotyper.vcf"],
    suffix: Some("unified_genotyper"),
    jar: Some(GATK_JAR),
    composite: Some(Composite::IndexThenRun),
    ..STAGE_DEFAULTS
};

pub static UNIFIED_GENOTYPER_MULTI: StageDescriptor = StageDescriptor {
    name: "UnifiedGenotyper_Multi",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T UnifiedGenotyper -R {reference} --input_file {input} --dbsnp {dbsnp} -o {output} {other_opt}",
    options: CALLER_OPTIONS,
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".unified_genotyper.vcf"],
    suffix: Some("unified_genotyper"),
    merges_all_inputs: true,
    jar: Some(GATK_JAR),
    composite: Some(Composite::GatkMulti),
    ..STAGE_DEFAULTS
};

pub static HAPLOTYPE_CALLER: StageDescriptor = StageDescriptor {
    name: "HaplotypeCaller",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T HaplotypeCaller -R {reference} -I {input} --dbsnp {dbsnp} -o {output} {other_opt}",
    options: CALLER_OPTIONS,
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".haplotype_caller.vcf"],
    suffix: Some("haplotype_caller"),
    jar: Some(GATK_JAR),
    composite: Some(Composite::IndexThenRun),
    ..STAGE_DEFAULTS
};

pub static HAPLOTYPE_CALLER_MULTI: StageDescriptor = StageDescriptor {
    name: "HaplotypeCaller_Multi",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T HaplotypeCaller -R {reference} --input_file {input} --dbsnp {dbsnp} -o {output} {other_opt}",
    options: CALLER_OPTIONS,
    input_patterns: ALIGNMENTS,
    output_suffixes: &[".haplotype_caller.vcf"],
    suffix: Some("haplotype_caller"),
    merges_all_inputs: true,
    jar: Some(GATK_JAR),
    composite: Some(Composite::GatkMulti),
    ..STAGE_DEFAULTS
};

pub static VARIANT_RECALIBRATOR: StageDescriptor = StageDescriptor {
    name: "VariantRecalibrator",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T VariantRecalibrator -R {reference} --input {input} --recal_file {output_recal} \
              --tranches_file {output_tranches} -an QD -an HaplotypeScore -an MQRankSum \
              -an ReadPosRankSum -an FS -an MQ -an InbreedingCoeff \
              --resource:hapmap,{hapmap_config} {hapmap_sites} \
              --resource:omni,{omni_config} {omni_sites} \
              --resource:dbsnp,{dbsnp_config} {dbsnp_sites} {other_opt}",
    stdout: "{output_recal}.out",
    stderr: "{output_recal}.err",
    options: &[
        input("input"),
        output("output_recal"),
        output("output_tranches"),
        input("reference"),
        requirement("hapmap_config"),
        input("hapmap_sites"),
        requirement("omni_config"),
        input("omni_sites"),
        requirement("dbsnp_config"),
        input("dbsnp_sites"),
        optional("other_opt"),
    ],
    jar: Some(GATK_JAR),
    ..STAGE_DEFAULTS
};

pub static APPLY_RECALIBRATION: StageDescriptor = StageDescriptor {
    name: "ApplyRecalibration",
    version: VERSION,
    executable: JAVA_TAG,
    command: "-T ApplyRecalibration -R {reference} --input {input} --out {output} \
              --recal_file {recal_file} --tranches_file {tranches_file} {other_opt}",
    options: &[
        input("input"),
        output("output"),
        input("reference"),
        input("recal_file"),
        input("tranches_file"),
        optional("other_opt"),
    ],
    input_patterns: VARIANTS,
    output_suffixes: &[".variant_recal.vcf"],
    suffix: Some("variant_recal"),
    jar: Some(GATK_JAR),
    composite: Some(Composite::ApplyRecalibration),
    ..STAGE_DEFAULTS
};


/// Index, compute realignment targets (`*.intervals`), then realign.
pub async fn run_indel_realigner(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let input = required(stage, &options, "input")?.to_string();
    index_bam(&input, out_dir, config).await?;

    let intervals = replace_suffix(required(stage, &options, "output")?, r"\.[sb]am$", ".intervals");
    let mut target_options = Options::new();
    copy_present(&options, &mut target_options, &["input", "reference", "other_rtc_opt", "java_memory"]);
    target_options.insert("output".into(), intervals.clone().into());
    execute_stage(&REALIGNER_TARGET_CREATOR, target_options, out_dir, config).await?;

    options.insert("interval_file".into(), intervals.into());
    executor::run_stage(stage, options, out_dir, config).await
}

/// Index, build the recalibration table (`*.grp`), then print the recalibrated reads.
pub async fn run_base_recalibrator(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let input = required(stage, &options, "input")?.to_string();
    index_bam(&input, out_dir, config).await?;

    let groups = replace_suffix(required(stage, &options, "output")?, r"\.[sb]am$", ".grp");
    options.insert("groups".into(), groups.into());
    executor::run_stage(stage, options.clone(), out_dir, config).await?;

    execute_stage(&PRINT_READS, options, out_dir, config).await
}

/// Index every input, list them in `input_files.list` and pass the list as `input`.
pub async fn run_multi(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let inputs = required_list(stage, &options, "inputs")?.to_vec();
    for path in &inputs {
        index_bam(path, out_dir, config).await?;
    }

    let list_file = out_dir.join(INPUT_LIST_FILE);
    fs::write(&list_file, format!("{}\n", inputs.join("\n"))).await?;
    options.insert("input".into(), list_file.to_string_lossy().into_owned().into());
    executor::run_stage(stage, options, out_dir, config).await
}

/// Build the recalibration model (`*.recal`, `*.tranches`), then apply it.
pub async fn run_apply_recalibration(
    stage: &'static StageDescriptor,
    mut options: Options,
    out_dir: &Path,
    config: &RunConfig,
) -> Result<(), PipelineError> {
    let prefix = replace_suffix(required(stage, &options, "output")?, r"\.vcf$", "");
    let recal_file = format!("{}.recal", prefix);
    let tranches_file = format!("{}.tranches", prefix);

    let mut recal_options = Options::new();
    copy_present(
        &options,
        &mut recal_options,
        &[
            "input",
            "reference",
            "hapmap_config",
            "hapmap_sites",
            "omni_config",
            "omni_sites",
            "dbsnp_config",
            "dbsnp_sites",
            "java_memory",
        ],
    );
    if let Some(other) = options.get("other_recal_opt") {
        recal_options.insert("other_opt".into(), other.clone());
    }
    recal_options.insert("output_recal".into(), recal_file.clone().into());
    recal_options.insert("output_tranches".into(), tranches_file.clone().into());
    execute_stage(&VARIANT_RECALIBRATOR, recal_options, out_dir, config).await?;

    options.insert("recal_file".into(), recal_file.into());
    options.insert("tranches_file".into(), tranches_file.into());
    executor::run_stage(stage, options, out_dir, config).await
}
