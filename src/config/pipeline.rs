//! Pipeline configuration (ordered steps) and the sample manifest.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use toml::{Table, Value};

use crate::config::defs::PipelineError;
use crate::utils::command::{self, OptionValue, Options, StageDescriptor};


/// One configured step: a registered stage and the options given to it.
#[derive(Debug, Clone)]
pub struct StageInstance {
    /// 1-based position in the pipeline, used to name the output directory.
    pub position: usize,
    pub stage: &'static StageDescriptor,
    pub options: Options,
}

impl StageInstance {
    /// `NN_StageName`
    pub fn dir_name(&self) -> String {
        format!("{:02}_{}", self.position, self.stage.name)
    }
}


/// Reads the TOML pipeline configuration: one table per integer step key.
///
/// # Arguments
///
/// * `path` - Path to the pipeline configuration.
///
/// # Returns
/// The stage instances, ordered by step.
pub fn read_pipeline_steps(path: &Path) -> Result<Vec<StageInstance>, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    parse_steps(&content, path)
}

pub fn parse_steps(content: &str, path: &Path) -> Result<Vec<StageInstance>, PipelineError> {
    let table: Table = content
        .parse()
        .map_err(|e: toml::de::Error| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))?;

    let invalid: Vec<String> = table
        .keys()
        .filter(|key| key.trim().parse::<i64>().is_err())
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(PipelineError::InvalidSteps { path: path.to_path_buf(), keys: invalid });
    }

    let mut steps: Vec<(i64, &Value)> = table
        .iter()
        .filter_map(|(key, value)| key.trim().parse::<i64>().ok().map(|step| (step, value)))
        .collect();
    steps.sort_by_key(|(step, _)| *step);

    let numbers: Vec<i64> = steps.iter().map(|(step, _)| *step).collect();
    if numbers.windows(2).any(|pair| pair[1] != pair[0] + 1) {
        return Err(PipelineError::PipelineStepsNotContiguous { path: path.to_path_buf(), steps: numbers });
    }

    let mut instances = Vec::with_capacity(steps.len());
    for (index, (step, value)) in steps.into_iter().enumerate() {
        let Some(settings) = value.as_table() else {
            return Err(PipelineError::InvalidSteps { path: path.to_path_buf(), keys: vec![step.to_string()] });
        };
        let tool = match settings.get("tool") {
            Some(Value::String(tool)) if !tool.trim().is_empty() => tool.trim(),
            _ => return Err(PipelineError::MissingTool { path: path.to_path_buf(), step }),
        };
        let stage = command::lookup(tool)?;
        if !stage.is_pipeline_stage() {
            return Err(PipelineError::NotAPipelineStage(stage.name.to_string()));
        }

        let mut options = Options::new();
        for (name, value) in settings.iter().filter(|(name, _)| name.as_str() != "tool") {
            options.insert(name.clone(), option_value(path, name, value)?);
        }
        debug!("Step {}: {} with {} option(s)", step, stage.name, options.len());
        instances.push(StageInstance { position: index + 1, stage, options });
    }
    Ok(instances)
}

/// Scalars become strings; arrays of scalars are joined with spaces.
fn option_value(path: &Path, name: &str, value: &Value) -> Result<OptionValue, PipelineError> {
    let scalar = |value: &Value| match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(d) => Some(d.to_string()),
        Value::Array(_) | Value::Table(_) => None,
    };
    let not_scalar = || PipelineError::InvalidConfig(format!("{}: {}: expected a scalar value", path.display(), name));
    match value {
        Value::Array(items) => {
            let items: Option<Vec<String>> = items.iter().map(scalar).collect();
            Ok(OptionValue::Single(items.ok_or_else(not_scalar)?.join(" ")))
        }
        other => scalar(other).map(OptionValue::Single).ok_or_else(not_scalar),
    }
}


/// Reads the sample manifest: one sample per line, whitespace-separated files.
pub fn read_manifest(path: &Path) -> Result<Vec<Vec<PathBuf>>, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let mut samples = Vec::new();
    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let files: Vec<PathBuf> = line.split_whitespace().map(PathBuf::from).collect();
        if let Some(missing) = files.iter().find(|file| !file.is_file()) {
            return Err(PipelineError::MissingFile(missing.clone()));
        }
        samples.push(files);
    }
    Ok(samples)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PATH: &str = "pipeline.toml";

    fn steps(keys: &[&str]) -> String {
        keys.iter()
            .map(|key| format!("[{}]\ntool = \"Sam2Bam\"\n", key))
            .collect()
    }

    #[test]
    fn test_contiguous_steps_in_order() -> anyhow::Result<()> {
        let content = "[3]\ntool = \"SortSam\"\nsort_order = \"coordinate\"\n\n[1]\ntool = \"MEM\"\nreference = \"ref.fa\"\n\n[2]\ntool = \"Sam2Bam\"\n";
        let instances = parse_steps(content, Path::new(PATH))?;
        let names: Vec<&str> = instances.iter().map(|i| i.stage.name).collect();
        assert_eq!(names, vec!["MEM", "Sam2Bam", "SortSam"]);
        assert_eq!(instances[2].dir_name(), "03_SortSam");
        assert_eq!(instances[2].options["sort_order"], OptionValue::Single("coordinate".into()));
        assert!(!instances[0].options.contains_key("tool"));
        Ok(())
    }

    #[test]
    fn test_steps_may_start_anywhere() -> anyhow::Result<()> {
        let instances = parse_steps(&steps(&["2", "3", "4"]), Path::new(PATH))?;
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[0].position, 1);
        Ok(())
    }

    #[test]
    fn test_gap_in_steps() {
        let err = parse_steps(&steps(&["2", "4", "5"]), Path::new(PATH)).unwrap_err();
        assert!(matches!(err, PipelineError::PipelineStepsNotContiguous { ref steps, .. } if *steps == vec![2, 4, 5]));
        assert!(err.to_string().ends_with("pipeline steps are not contiguous"));
    }

    #[test]
    fn test_non_integer_step() {
        let err = parse_steps(&steps(&["1", "two"]), Path::new(PATH)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSteps { ref keys, .. } if *keys == vec!["two".to_string()]));
    }

    #[test]
    fn test_missing_and_unknown_tool() {
        let err = parse_steps("[1]\nreference = \"ref.fa\"\n", Path::new(PATH)).unwrap_err();
        assert!(matches!(err, PipelineError::MissingTool { step: 1, .. }));
        assert_eq!(err.to_string(), "pipeline.toml: step 1: no tool was specified");

        let err = parse_steps("[1]\ntool = \"Nope\"\n", Path::new(PATH)).unwrap_err();
        assert_eq!(err.to_string(), "Nope: not a valid tool");

        let err = parse_steps("[1]\ntool = \"IndexBam\"\n", Path::new(PATH)).unwrap_err();
        assert!(matches!(err, PipelineError::NotAPipelineStage(_)));
    }

    #[test]
    fn test_scalars_are_stringified() -> anyhow::Result<()> {
        let content = "[1]\ntool = \"ClipTrim\"\nother_opt = [\"-q\", 20]\nthreads = 4\n";
        let instances = parse_steps(content, Path::new(PATH))?;
        assert_eq!(instances[0].options["other_opt"].joined(), "-q 20");
        assert_eq!(instances[0].options["threads"].joined(), "4");
        Ok(())
    }

    #[test]
    fn test_manifest() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let r1 = dir.path().join("s1_R1.fastq");
        let r2 = dir.path().join("s1_R2.fastq");
        fs::write(&r1, "")?;
        fs::write(&r2, "")?;
        let manifest = dir.path().join("input_files.txt");
        fs::write(&manifest, format!("{}\t{}\n\n", r1.display(), r2.display()))?;

        assert_eq!(read_manifest(&manifest)?, vec![vec![r1.clone(), r2]]);

        fs::write(&manifest, format!("{} {}\n", r1.display(), dir.path().join("gone.fastq").display()))?;
        assert!(matches!(read_manifest(&manifest), Err(PipelineError::MissingFile(_))));
        Ok(())
    }
}
