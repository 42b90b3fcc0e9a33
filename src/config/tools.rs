//! Per-stage tool configuration: binary/JAR locations and cluster resources.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::defs::PipelineError;


/// Settings for one stage name. Every field is optional; a missing table means
/// "binary on PATH, default JAR location, no walltime, no array chunking".
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    pub bin_dir: Option<PathBuf>,
    pub jar_dir: Option<PathBuf>,
    pub walltime: Option<String>,
    pub nb_node: Option<u32>,
    pub nb_proc: Option<u32>,
    pub nb_chunks: Option<usize>,
    pub split_file: Option<String>,
}

/// Bulk submission settings, present only when both `nb_chunks` and `split_file` are set.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSettings {
    pub nb_chunks: usize,
    pub split_file: String,
}

#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    tools: HashMap<String, ToolSettings>,
}

impl ToolConfig {
    pub fn new(tools: HashMap<String, ToolSettings>) -> Self {
        ToolConfig { tools }
    }

    /// Reads a TOML tool configuration, one table per stage name.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file.
    ///
    /// # Returns
    /// ToolConfig
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::MissingFile(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let tools: HashMap<String, ToolSettings> = toml::from_str(content)?;
        Ok(ToolConfig { tools })
    }

    pub fn settings(&self, tool_name: &str) -> Option<&ToolSettings> {
        self.tools.get(tool_name)
    }

    /// Directory holding the executable; `None` means the executable is on PATH.
    pub fn bin_dir(&self, tool_name: &str) -> Option<&Path> {
        self.settings(tool_name).and_then(|s| s.bin_dir.as_deref())
    }

    pub fn jar_dir(&self, tool_name: &str) -> Option<&Path> {
        self.settings(tool_name).and_then(|s| s.jar_dir.as_deref())
    }

    pub fn walltime(&self, tool_name: &str) -> Option<&str> {
        self.settings(tool_name).and_then(|s| s.walltime.as_deref())
    }

    /// Native resource specification for the cluster, only when both node and
    /// process counts are configured.
    pub fn nodes_spec(&self, tool_name: &str) -> Option<String> {
        let settings = self.settings(tool_name)?;
        match (settings.nb_node, settings.nb_proc) {
            (Some(nodes), Some(procs)) => Some(format!("-l nodes={}:ppn={}", nodes, procs)),
            _ => None,
        }
    }

    pub fn bulk(&self, tool_name: &str) -> Option<BulkSettings> {
        let settings = self.settings(tool_name)?;
        match (settings.nb_chunks, &settings.split_file) {
            (Some(nb_chunks), Some(split_file)) => Some(BulkSettings {
                nb_chunks: nb_chunks.max(1),
                split_file: split_file.clone(),
            }),
            _ => None,
        }
    }
}
