//! Stage descriptors: typed option contracts, command templates and the static stage registry.

pub mod bcftools;
pub mod bowtie2;
pub mod bwa;
pub mod fastq_mcf;
pub mod fastqc;
pub mod gatk;
pub mod graphs;
pub mod java;
pub mod picard;
pub mod samtools;
pub mod vcftools;

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::path::Path;

use futures::future::{BoxFuture, FutureExt};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::config::defs::{PipelineError, RunConfig, ARRAY_INDEX_TOKEN, WRITE_PROBE_EXT};
use crate::utils::executor;
use crate::utils::report::Report;


/// How an option is checked before the command is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Input,
    InputSet,
    Output,
    Optional,
    Requirement,
    InputToSplit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Single(String),
    Multiple(Vec<String>),
}

impl OptionValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            OptionValue::Single(value) => Some(value),
            OptionValue::Multiple(_) => None,
        }
    }

    pub fn as_multiple(&self) -> Option<&[String]> {
        match self {
            OptionValue::Single(_) => None,
            OptionValue::Multiple(values) => Some(values),
        }
    }

    pub fn joined(&self) -> String {
        match self {
            OptionValue::Single(value) => value.clone(),
            OptionValue::Multiple(values) => values.join(" "),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Single(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Single(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(values: Vec<String>) -> Self {
        OptionValue::Multiple(values)
    }
}

/// Options handed to one stage invocation.
pub type Options = BTreeMap<String, OptionValue>;

/// Options after validation, ready for template substitution.
pub type SafeOptions = BTreeMap<String, String>;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
}

pub const fn input(name: &'static str) -> OptionSpec {
    OptionSpec { name, kind: OptionKind::Input }
}

pub const fn inputs(name: &'static str) -> OptionSpec {
    OptionSpec { name, kind: OptionKind::InputSet }
}

pub const fn output(name: &'static str) -> OptionSpec {
    OptionSpec { name, kind: OptionKind::Output }
}

pub const fn optional(name: &'static str) -> OptionSpec {
    OptionSpec { name, kind: OptionKind::Optional }
}

pub const fn requirement(name: &'static str) -> OptionSpec {
    OptionSpec { name, kind: OptionKind::Requirement }
}


/// Location of the JAR run through `java` for Picard/GATK stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JarSpec {
    pub file_name: &'static str,
    pub default_dir: &'static str,
}

/// Stages whose execution is a fixed sequence of dependent stage calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composite {
    Sampe,
    FastQc,
    KeepMapped,
    IndexThenRun,
    IndexEachThenRun,
    IndelRealigner,
    BaseRecalibrator,
    GatkMulti,
    ApplyRecalibration,
    MarkDuplicates,
    InsertSize,
    CoverageGraph,
    CoverageGraphMulti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    ClipTrim,
    PicardMetrics,
    InsertSize,
    Figure { extension: &'static str, key: &'static str },
}

/// Joins the per-chunk outputs of a bulk submission back into the stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMerge {
    VcfChunks,
}


#[derive(Debug)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub version: &'static str,
    pub executable: &'static str,
    pub command: &'static str,
    pub stdout: &'static str,
    pub stderr: &'static str,
    pub options: &'static [OptionSpec],
    pub input_patterns: &'static [&'static str],
    pub output_suffixes: &'static [&'static str],
    pub suffix: Option<&'static str>,
    pub produces_data: bool,
    pub merges_all_inputs: bool,
    pub jar: Option<JarSpec>,
    pub composite: Option<Composite>,
    pub report: Option<ReportKind>,
    pub merge: Option<BulkMerge>,
}

/// Field defaults shared by every descriptor in the catalogue.
pub const STAGE_DEFAULTS: StageDescriptor = StageDescriptor {
    name: "",
    version: "",
    executable: "",
    command: "",
    stdout: "{output}.out",
    stderr: "{output}.err",
    options: &[],
    input_patterns: &[],
    output_suffixes: &[],
    suffix: None,
    produces_data: true,
    merges_all_inputs: false,
    jar: None,
    composite: None,
    report: None,
    merge: None,
};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{(\w+)\}").unwrap();
}

impl StageDescriptor {
    /// A stage usable as a pipeline step needs a suffix and at least one input pattern.
    pub fn is_pipeline_stage(&self) -> bool {
        self.suffix.is_some() && !self.input_patterns.is_empty() && !self.output_suffixes.is_empty()
    }

    /// Full option contract, including the JVM options of JAR-wrapped stages.
    pub fn contract(&self) -> Vec<OptionSpec> {
        let mut contract = self.options.to_vec();
        if self.jar.is_some() {
            contract.extend_from_slice(java::JAR_OPTIONS);
        }
        contract
    }

    /// Command template, prefixed by the JVM invocation for JAR-wrapped stages.
    pub fn command_template(&self) -> String {
        match self.jar {
            Some(_) => format!("{} {}", java::JAR_COMMAND, self.command),
            None => self.command.to_string(),
        }
    }

    /// Rejects descriptors that could never be wired by the graph builder.
    pub fn check_descriptor(&self) -> Result<(), PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidStageDescriptor {
            stage: self.name.to_string(),
            reason,
        };
        if self.input_patterns.len() < self.output_suffixes.len() && !self.merges_all_inputs {
            return Err(invalid(format!(
                "{} input pattern(s) for {} output suffix(es)",
                self.input_patterns.len(),
                self.output_suffixes.len()
            )));
        }
        for pattern in self.input_patterns {
            Regex::new(pattern).map_err(|e| invalid(format!("{}: {}", pattern, e)))?;
        }
        let contract = self.contract();
        let command = self.command_template();
        for template in [command.as_str(), self.stdout, self.stderr] {
            for name in placeholders(template) {
                if !contract.iter().any(|spec| spec.name == name) {
                    return Err(PipelineError::TemplateOption {
                        stage: self.name.to_string(),
                        option: name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates `options` against the contract.
    ///
    /// # Arguments
    ///
    /// * `options` - Options for this invocation.
    ///
    /// # Returns
    /// The safe options, one string per contract entry.
    pub fn check_options(&self, options: &Options) -> Result<SafeOptions, PipelineError> {
        self.check_options_with_split(options, None)
    }

    /// Same as `check_options`, with `split` checked as a chunked input of a bulk submission.
    pub fn check_options_with_split(
        &self,
        options: &Options,
        split: Option<&str>,
    ) -> Result<SafeOptions, PipelineError> {
        let contract: Vec<OptionSpec> = self
            .contract()
            .into_iter()
            .map(|spec| match split {
                Some(name) if name == spec.name => OptionSpec { name: spec.name, kind: OptionKind::InputToSplit },
                _ => spec,
            })
            .collect();

        // Presence first, so a missing option never leaves a probe file behind
        for spec in &contract {
            if spec.kind != OptionKind::Optional && !options.contains_key(spec.name) {
                return Err(PipelineError::MissingRequiredOption {
                    stage: self.name.to_string(),
                    option: spec.name.to_string(),
                });
            }
        }

        let mut safe = SafeOptions::new();
        for spec in &contract {
            let Some(value) = options.get(spec.name) else {
                safe.insert(spec.name.to_string(), String::new());
                continue;
            };
            let checked = match spec.kind {
                OptionKind::Optional | OptionKind::Requirement => value.joined(),
                OptionKind::Input => {
                    let path = self.single(spec, value)?;
                    if !Path::new(path).is_file() {
                        return Err(PipelineError::MissingInputFile {
                            stage: self.name.to_string(),
                            path: path.to_string(),
                        });
                    }
                    path.to_string()
                }
                OptionKind::InputSet => {
                    let paths = value.as_multiple().ok_or_else(|| self.wrong_kind(spec))?;
                    if let Some(missing) = paths.iter().find(|p| !Path::new(p).is_file()) {
                        return Err(PipelineError::MissingInputFile {
                            stage: self.name.to_string(),
                            path: missing.clone(),
                        });
                    }
                    paths.join(" ")
                }
                OptionKind::Output => {
                    let path = self.single(spec, value)?;
                    probe_writable(path).map_err(|_| PipelineError::UnwritableOutput {
                        stage: self.name.to_string(),
                        path: path.to_string(),
                    })?;
                    path.to_string()
                }
                OptionKind::InputToSplit => {
                    let pattern = self.single(spec, value)?;
                    let globbed = pattern.replace(ARRAY_INDEX_TOKEN, "*");
                    let found = glob::glob(&globbed)
                        .map(|paths| paths.filter_map(Result::ok).count())
                        .unwrap_or(0);
                    if found == 0 {
                        return Err(PipelineError::MissingInputFile {
                            stage: self.name.to_string(),
                            path: pattern.to_string(),
                        });
                    }
                    pattern.to_string()
                }
            };
            safe.insert(spec.name.to_string(), checked);
        }
        Ok(safe)
    }

    fn single<'a>(&self, spec: &OptionSpec, value: &'a OptionValue) -> Result<&'a str, PipelineError> {
        value.as_single().ok_or_else(|| self.wrong_kind(spec))
    }

    fn wrong_kind(&self, spec: &OptionSpec) -> PipelineError {
        PipelineError::InvalidOptionKind {
            stage: self.name.to_string(),
            option: spec.name.to_string(),
            kind: spec.kind,
        }
    }

    /// Builds the argv: `[bin_dir/]executable` then the whitespace-split rendered template.
    pub fn build_command(&self, safe: &SafeOptions, bin_dir: Option<&Path>) -> Result<Vec<String>, PipelineError> {
        let executable = match bin_dir {
            Some(dir) => dir.join(self.executable).to_string_lossy().into_owned(),
            None => self.executable.to_string(),
        };
        let rendered = render_template(self.name, &self.command_template(), safe)?;
        let mut argv = vec![executable];
        argv.extend(rendered.split_whitespace().map(str::to_string));
        Ok(argv)
    }

    pub fn stdout_path(&self, safe: &SafeOptions) -> Result<String, PipelineError> {
        render_template(self.name, self.stdout, safe)
    }

    pub fn stderr_path(&self, safe: &SafeOptions) -> Result<String, PipelineError> {
        render_template(self.name, self.stderr, safe)
    }
}


fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Substitutes every `{name}` of `template` with its safe option value.
pub fn render_template(stage: &str, template: &str, safe: &SafeOptions) -> Result<String, PipelineError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        let value = safe.get(name).ok_or_else(|| PipelineError::TemplateOption {
            stage: stage.to_string(),
            option: name.to_string(),
        })?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(value);
        last = whole.end();
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Creates then deletes `<path>.test`.
pub fn probe_writable(path: &str) -> std::io::Result<()> {
    let probe = format!("{}.{}", path, WRITE_PROBE_EXT);
    OpenOptions::new().write(true).create(true).truncate(true).open(&probe)?;
    if Path::new(&probe).is_file() {
        fs::remove_file(&probe)?;
    }
    Ok(())
}


/// Every stage known to the pipeline, helpers included.
pub static CATALOGUE: &[&StageDescriptor] = &[
    &bwa::ALN,
    &bwa::MEM,
    &bwa::SAMPE,
    &bowtie2::BOWTIE2_ALIGN,
    &fastq_mcf::CLIP_TRIM,
    &fastqc::FASTQC_FASTQ,
    &samtools::SAM2BAM,
    &samtools::INDEX_BAM,
    &samtools::KEEP_MAPPED,
    &samtools::FLAG_STAT,
    &samtools::MPILEUP,
    &samtools::MPILEUP_MULTI,
    &bcftools::VARIANT_CALLER,
    &picard::SORT_SAM,
    &picard::HS_METRICS,
    &picard::INSERT_SIZE,
    &picard::ADD_RG,
    &picard::MARK_DUPLICATES,
    &gatk::REALIGNER_TARGET_CREATOR,
    &gatk::INDEL_REALIGNER,
    &gatk::PRINT_READS,
    &gatk::BASE_RECALIBRATOR,
    &gatk::UNIFIED_GENOTYPER,
    &gatk::UNIFIED_GENOTYPER_MULTI,
    &gatk::HAPLOTYPE_CALLER,
    &gatk::HAPLOTYPE_CALLER_MULTI,
    &gatk::VARIANT_RECALIBRATOR,
    &gatk::APPLY_RECALIBRATION,
    &vcftools::VCF_CONCAT,
    &vcftools::VCF_SORT,
    &graphs::COVERAGE_GRAPH,
    &graphs::COVERAGE_GRAPH_MULTI,
    &graphs::READ_QUALITY_GRAPH,
];


/// Name-indexed view over a set of checked descriptors.
#[derive(Debug)]
pub struct StageRegistry {
    stages: HashMap<&'static str, &'static StageDescriptor>,
    order: Vec<&'static StageDescriptor>,
}

impl StageRegistry {
    pub fn build(descriptors: &[&'static StageDescriptor]) -> Result<Self, PipelineError> {
        let mut stages = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            descriptor.check_descriptor()?;
            if stages.insert(descriptor.name, *descriptor).is_some() {
                return Err(PipelineError::InvalidStageDescriptor {
                    stage: descriptor.name.to_string(),
                    reason: "registered twice".to_string(),
                });
            }
        }
        Ok(StageRegistry { stages, order: descriptors.to_vec() })
    }

    pub fn lookup(&self, name: &str) -> Result<&'static StageDescriptor, PipelineError> {
        self.stages
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownTool(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static StageDescriptor> + '_ {
        self.order.iter().copied()
    }
}

lazy_static! {
    static ref REGISTRY: Result<StageRegistry, (String, String)> =
        StageRegistry::build(CATALOGUE).map_err(|e| match e {
            PipelineError::InvalidStageDescriptor { stage, reason } => (stage, reason),
            other => (String::from("registry"), other.to_string()),
        });
}

pub fn registry() -> Result<&'static StageRegistry, PipelineError> {
    REGISTRY.as_ref().map_err(|(stage, reason)| PipelineError::InvalidStageDescriptor {
        stage: stage.clone(),
        reason: reason.clone(),
    })
}

pub fn lookup(name: &str) -> Result<&'static StageDescriptor, PipelineError> {
    registry()?.lookup(name)
}


/// Runs one invocation of a stage, dispatching to its composite sequence when it has one.
pub fn execute_stage<'a>(
    stage: &'static StageDescriptor,
    options: Options,
    out_dir: &'a Path,
    config: &'a RunConfig,
) -> BoxFuture<'a, Result<(), PipelineError>> {
    async move {
        debug!("{}: executing in {}", stage.name, out_dir.display());
        match stage.composite {
            None => executor::run_stage(stage, options, out_dir, config).await,
            Some(Composite::Sampe) => bwa::run_sampe(stage, options, out_dir, config).await,
            Some(Composite::FastQc) => fastqc::run_fastqc(stage, options, out_dir, config).await,
            Some(Composite::KeepMapped) => samtools::run_keep_mapped(stage, options, out_dir, config).await,
            Some(Composite::IndexThenRun) => samtools::run_indexed(stage, options, out_dir, config).await,
            Some(Composite::IndexEachThenRun) => samtools::run_indexed_all(stage, options, out_dir, config).await,
            Some(Composite::IndelRealigner) => gatk::run_indel_realigner(stage, options, out_dir, config).await,
            Some(Composite::BaseRecalibrator) => gatk::run_base_recalibrator(stage, options, out_dir, config).await,
            Some(Composite::GatkMulti) => gatk::run_multi(stage, options, out_dir, config).await,
            Some(Composite::ApplyRecalibration) => gatk::run_apply_recalibration(stage, options, out_dir, config).await,
            Some(Composite::MarkDuplicates) => picard::run_mark_duplicates(stage, options, out_dir, config).await,
            Some(Composite::InsertSize) => picard::run_insert_size(stage, options, out_dir, config).await,
            Some(Composite::CoverageGraph) => graphs::run_coverage_graph(stage, options, out_dir, config).await,
            Some(Composite::CoverageGraphMulti) => graphs::run_coverage_graph_multi(stage, options, out_dir, config).await,
        }
    }
    .boxed()
}

/// Reads the report a stage left under `prefix` (`<out_dir>/<sample_id>`).
pub fn read_report(stage: &StageDescriptor, prefix: &str) -> Result<Report, PipelineError> {
    match stage.report {
        Some(ReportKind::ClipTrim) => fastq_mcf::read_report(prefix),
        Some(ReportKind::PicardMetrics) => picard::read_metrics_report(stage, prefix),
        Some(ReportKind::InsertSize) => picard::read_insert_size_report(stage, prefix),
        Some(ReportKind::Figure { extension, key }) => graphs::read_figure_report(stage, prefix, extension, key),
        None => Err(PipelineError::NotReportable(stage.name.to_string())),
    }
}


/// Value of a required single-valued option, for composite stages building sub-calls.
pub(crate) fn required<'a>(stage: &StageDescriptor, options: &'a Options, name: &str) -> Result<&'a str, PipelineError> {
    match options.get(name) {
        None => Err(PipelineError::MissingRequiredOption {
            stage: stage.name.to_string(),
            option: name.to_string(),
        }),
        Some(value) => value.as_single().ok_or_else(|| PipelineError::InvalidOptionKind {
            stage: stage.name.to_string(),
            option: name.to_string(),
            kind: OptionKind::Input,
        }),
    }
}

/// Value of a required list option (`inputs` of merge-all stages).
pub(crate) fn required_list<'a>(stage: &StageDescriptor, options: &'a Options, name: &str) -> Result<&'a [String], PipelineError> {
    match options.get(name) {
        None => Err(PipelineError::MissingRequiredOption {
            stage: stage.name.to_string(),
            option: name.to_string(),
        }),
        Some(value) => value.as_multiple().ok_or_else(|| PipelineError::InvalidOptionKind {
            stage: stage.name.to_string(),
            option: name.to_string(),
            kind: OptionKind::InputSet,
        }),
    }
}

/// Copies `names` that are present in `from` into `to`.
pub(crate) fn copy_present(from: &Options, to: &mut Options, names: &[&str]) {
    for name in names {
        if let Some(value) = from.get(*name) {
            to.insert(name.to_string(), value.clone());
        }
    }
}

/// Replaces a trailing match of `pattern` in `path` (e.g. `\.[sb]am$` -> `.grp`).
pub(crate) fn replace_suffix(path: &str, pattern: &str, replacement: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace(path, replacement).into_owned(),
        Err(_) => path.to_string(),
    }
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn opts(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OptionValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_registry_is_consistent() -> anyhow::Result<()> {
        let registry = registry()?;
        assert_eq!(registry.iter().count(), CATALOGUE.len());
        for stage in registry.iter() {
            stage.check_descriptor()?;
            assert!(!stage.version.is_empty(), "{} has no version", stage.name);
            if stage.is_pipeline_stage() {
                for pattern in stage.input_patterns {
                    assert!(Regex::new(pattern).is_ok());
                }
            }
        }
        assert!(matches!(registry.lookup("NoSuchStage"), Err(PipelineError::UnknownTool(_))));
        Ok(())
    }

    #[test]
    fn test_descriptor_invariant_rejected() {
        static BAD: StageDescriptor = StageDescriptor {
            name: "Bad",
            version: "0",
            executable: "true",
            command: "{input}",
            options: &[input("input"), output("output")],
            input_patterns: &[r"\.sam$"],
            output_suffixes: &[".a", ".b"],
            suffix: Some("bad"),
            ..STAGE_DEFAULTS
        };
        let result = StageRegistry::build(&[&BAD]);
        assert!(matches!(result, Err(PipelineError::InvalidStageDescriptor { .. })));
    }

    #[test]
    fn test_template_option_outside_contract() {
        static LEAKY: StageDescriptor = StageDescriptor {
            name: "Leaky",
            version: "0",
            executable: "true",
            command: "{input} {reference}",
            options: &[input("input"), output("output")],
            ..STAGE_DEFAULTS
        };
        let result = LEAKY.check_descriptor();
        assert!(matches!(result, Err(PipelineError::TemplateOption { ref option, .. }) if option == "reference"));
    }

    #[test]
    fn test_check_options_is_idempotent() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input_path = dir.path().join("s1.sam");
        fs::write(&input_path, "@HD\n")?;
        let output_path = dir.path().join("s1.sam2bam.bam");

        let options = opts(&[
            ("input", input_path.to_str().unwrap()),
            ("output", output_path.to_str().unwrap()),
        ]);
        let first = samtools::SAM2BAM.check_options(&options)?;
        let second = samtools::SAM2BAM.check_options(&options)?;
        assert_eq!(first, second);

        let probe = format!("{}.{}", output_path.display(), WRITE_PROBE_EXT);
        assert!(!Path::new(&probe).exists());
        assert!(!output_path.exists());
        Ok(())
    }

    #[test]
    fn test_missing_required_option_before_side_effects() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let output_path = dir.path().join("out.sam");
        let options = opts(&[("output", output_path.to_str().unwrap())]);

        let err = bwa::MEM.check_options(&options).unwrap_err();
        assert!(matches!(err, PipelineError::MissingRequiredOption { ref option, .. } if option == "reference"));
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_optional_defaults_to_empty() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input_path = dir.path().join("s1.vcf");
        fs::write(&input_path, "##fileformat=VCFv4.1\n")?;
        let options = opts(&[
            ("input", input_path.to_str().unwrap()),
            ("output", dir.path().join("s1.vcf_sort.vcf").to_str().unwrap()),
        ]);
        let safe = vcftools::VCF_SORT.check_options(&options)?;
        assert_eq!(safe.get("other_opt").map(String::as_str), Some(""));

        let argv = vcftools::VCF_SORT.build_command(&safe, Some(Path::new("/opt/vcftools/bin")))?;
        assert_eq!(argv, vec!["/opt/vcftools/bin/vcf-sort".to_string(), input_path.display().to_string()]);
        Ok(())
    }

    #[test]
    fn test_input_set_is_space_joined() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let a = dir.path().join("a.vcf");
        let b = dir.path().join("b.vcf");
        fs::write(&a, "")?;
        fs::write(&b, "")?;
        let mut options = Options::new();
        options.insert(
            "inputs".into(),
            OptionValue::Multiple(vec![a.display().to_string(), b.display().to_string()]),
        );
        options.insert("output".into(), dir.path().join("all_samples.vcf").display().to_string().into());

        let safe = vcftools::VCF_CONCAT.check_options(&options)?;
        assert_eq!(safe["inputs"], format!("{} {}", a.display(), b.display()));
        Ok(())
    }

    #[test]
    fn test_wrong_value_shape() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let a = dir.path().join("a.vcf");
        fs::write(&a, "")?;
        let mut options = Options::new();
        options.insert("input".into(), OptionValue::Multiple(vec![a.display().to_string()]));
        options.insert("output".into(), dir.path().join("o.vcf").display().to_string().into());

        let err = vcftools::VCF_SORT.check_options(&options).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOptionKind { kind: OptionKind::Input, .. }));

        let options = opts(&[
            ("inputs", a.to_str().unwrap()),
            ("output", dir.path().join("o.vcf").to_str().unwrap()),
        ]);
        let err = vcftools::VCF_CONCAT.check_options(&options).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOptionKind { kind: OptionKind::InputSet, .. }));
        Ok(())
    }

    #[test]
    fn test_missing_input_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let options = opts(&[
            ("input", dir.path().join("absent.sam").to_str().unwrap()),
            ("output", dir.path().join("o.bam").to_str().unwrap()),
        ]);
        let err = samtools::SAM2BAM.check_options(&options).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInputFile { .. }));
        Ok(())
    }

    #[test]
    fn test_unwritable_output() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input_path = dir.path().join("s1.sam");
        fs::write(&input_path, "")?;
        let options = opts(&[
            ("input", input_path.to_str().unwrap()),
            ("output", dir.path().join("missing_dir").join("o.bam").to_str().unwrap()),
        ]);
        let err = samtools::SAM2BAM.check_options(&options).unwrap_err();
        assert!(matches!(err, PipelineError::UnwritableOutput { .. }));
        Ok(())
    }

    #[test]
    fn test_input_to_split_globs_chunks() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("s1_1.mpileup"), "")?;
        fs::write(dir.path().join("s1_2.mpileup"), "")?;
        let pattern = format!("{}/s1_{}.mpileup", dir.path().display(), ARRAY_INDEX_TOKEN);
        let out = format!("{}/s1.vcf_{}", dir.path().display(), ARRAY_INDEX_TOKEN);
        let options = opts(&[("input", pattern.as_str()), ("output", out.as_str())]);

        let safe = bcftools::VARIANT_CALLER.check_options_with_split(&options, Some("input"))?;
        assert_eq!(safe["input"], pattern);

        let absent = format!("{}/none_{}.mpileup", dir.path().display(), ARRAY_INDEX_TOKEN);
        let options = opts(&[("input", absent.as_str()), ("output", out.as_str())]);
        assert!(bcftools::VARIANT_CALLER.check_options_with_split(&options, Some("input")).is_err());
        Ok(())
    }

    #[test]
    fn test_render_template_missing_value() {
        let safe = SafeOptions::from([("input".to_string(), "a.sam".to_string())]);
        assert_eq!(render_template("X", "view {input}", &safe).unwrap(), "view a.sam");
        let err = render_template("X", "view {input} {output}", &safe).unwrap_err();
        assert!(matches!(err, PipelineError::TemplateOption { ref option, .. } if option == "output"));
    }

    #[test]
    fn test_not_reportable() {
        let err = read_report(&samtools::SAM2BAM, "/nonexistent/s1").unwrap_err();
        assert!(matches!(err, PipelineError::NotReportable(ref name) if name == "Sam2Bam"));
        assert_eq!(err.to_string(), "No reporting options for 'Sam2Bam'");
    }
}
