//! JVM wrapping shared by the Picard and GATK stages.

use std::path::PathBuf;

use crate::config::defs::{PipelineError, DEFAULT_JAVA_MEMORY, JAVA_TAG};
use crate::config::tools::ToolConfig;
use crate::utils::command::{optional, requirement, OptionSpec, Options, StageDescriptor};

pub const JAVA_VERSION: &str = "1.7.0_51";

pub const JAR_COMMAND: &str = "-Xmx{java_memory} {java_other_opt} -jar {jar_file}";

pub const JAR_OPTIONS: &[OptionSpec] = &[
    requirement("java_memory"),
    requirement("jar_file"),
    optional("java_other_opt"),
];


/// Resolves the JAR of a stage: `jar_dir` from the tool config, else the default location.
///
/// # Arguments
///
/// * `stage` - JAR-wrapped stage descriptor.
/// * `tools` - Tool configuration.
///
/// # Returns
/// Path to an existing `.jar` file.
pub fn resolve_jar(stage: &StageDescriptor, tools: &ToolConfig) -> Result<PathBuf, PipelineError> {
    let jar = stage.jar.ok_or_else(|| PipelineError::ToolExecution {
        tool: stage.name.to_string(),
        error: format!("{} is not run through {}", stage.name, JAVA_TAG),
    })?;
    let jar_dir = tools
        .jar_dir(stage.name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(jar.default_dir));
    let jar_file = jar_dir.join(jar.file_name);

    if jar_file.extension().and_then(|e| e.to_str()) != Some("jar") {
        return Err(PipelineError::InvalidJar(jar_file));
    }
    if !jar_file.is_file() {
        return Err(PipelineError::MissingFile(jar_file));
    }
    Ok(jar_file)
}

/// Adds `java_memory` (default 4g) and `jar_file` to the options of a JAR-wrapped stage.
pub fn inject_jar_options(stage: &StageDescriptor, options: &mut Options, tools: &ToolConfig) -> Result<(), PipelineError> {
    let jar_file = resolve_jar(stage, tools)?;
    options
        .entry("java_memory".to_string())
        .or_insert_with(|| DEFAULT_JAVA_MEMORY.into());
    options.insert("jar_file".to_string(), jar_file.to_string_lossy().into_owned().into());
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    use crate::config::tools::ToolSettings;
    use crate::utils::command::picard;

    #[test]
    fn test_jar_options_injected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("picard.jar"), b"PK")?;
        let tools = ToolConfig::new(HashMap::from([(
            "SortSam".to_string(),
            ToolSettings { jar_dir: Some(dir.path().to_path_buf()), ..Default::default() },
        )]));

        let mut options = Options::new();
        inject_jar_options(&picard::SORT_SAM, &mut options, &tools)?;
        assert_eq!(options["java_memory"].as_single(), Some("4g"));
        assert_eq!(
            options["jar_file"].as_single(),
            Some(dir.path().join("picard.jar").to_str().unwrap())
        );

        options.insert("java_memory".into(), "16g".into());
        inject_jar_options(&picard::SORT_SAM, &mut options, &tools)?;
        assert_eq!(options["java_memory"].as_single(), Some("16g"));
        Ok(())
    }

    #[test]
    fn test_missing_jar() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let tools = ToolConfig::new(HashMap::from([(
            "SortSam".to_string(),
            ToolSettings { jar_dir: Some(dir.path().to_path_buf()), ..Default::default() },
        )]));
        let err = resolve_jar(&picard::SORT_SAM, &tools).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile(_)));
        Ok(())
    }

    #[test]
    fn test_jar_command_prefix() {
        let template = picard::SORT_SAM.command_template();
        assert!(template.starts_with("-Xmx{java_memory} {java_other_opt} -jar {jar_file} SortSam"));
        assert_eq!(picard::SORT_SAM.executable, JAVA_TAG);
    }
}
