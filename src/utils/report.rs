//! Parsers for the summary files some stages leave beside their outputs.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::defs::PipelineError;


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportValue {
    Count(u64),
    Text(String),
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportValue::Count(n) => write!(f, "{}", n),
            ReportValue::Text(s) => write!(f, "{}", s),
        }
    }
}

pub type Report = BTreeMap<String, ReportValue>;


/// Finds the single file matching a glob pattern.
///
/// # Arguments
///
/// * `pattern` - Glob, usually `<prefix>*.<suffix>`.
///
/// # Returns
/// The matching path; zero or several matches are a parse error.
pub fn find_unique(pattern: &str) -> Result<PathBuf, PipelineError> {
    let parse_error = |reason: String| PipelineError::ReportParse {
        path: PathBuf::from(pattern),
        reason,
    };
    let matches: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| parse_error(e.to_string()))?
        .filter_map(Result::ok)
        .collect();
    match matches.as_slice() {
        [single] => Ok(single.clone()),
        [] => Err(parse_error("no report file".to_string())),
        many => Err(parse_error(format!("{} report files, expected one", many.len()))),
    }
}

/// First integer captured by `pattern` in `content`.
pub fn capture_count(path: &Path, content: &str, pattern: &str) -> Result<u64, PipelineError> {
    let parse_error = |reason: String| PipelineError::ReportParse {
        path: path.to_path_buf(),
        reason,
    };
    let re = Regex::new(pattern).map_err(|e| parse_error(e.to_string()))?;
    let caps = re
        .captures(content)
        .ok_or_else(|| parse_error(format!("no match for '{}'", pattern)))?;
    caps[1]
        .parse::<u64>()
        .map_err(|e| parse_error(format!("'{}': {}", &caps[1], e)))
}

/// Zips a tab-separated header line with the data line after it; keys are lowercased.
fn zip_header(header: &str, data: &str) -> Report {
    header
        .split('\t')
        .zip(data.split('\t'))
        .map(|(name, value)| (name.to_lowercase(), ReportValue::Text(value.to_string())))
        .collect()
}

/// Picard metrics file: the two lines following `## METRICS` are the header and the values.
pub fn parse_metrics_section(path: &Path) -> Result<Report, PipelineError> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines().skip_while(|line| !line.starts_with("## METRICS"));
    if lines.next().is_none() {
        return Err(PipelineError::ReportParse {
            path: path.to_path_buf(),
            reason: "no '## METRICS' section".to_string(),
        });
    }
    match (lines.next(), lines.next()) {
        (Some(header), Some(data)) => Ok(zip_header(header, data)),
        _ => Err(PipelineError::ReportParse {
            path: path.to_path_buf(),
            reason: "truncated metrics section".to_string(),
        }),
    }
}

/// First non-comment, non-blank line is the header, the next one the values.
pub fn parse_first_table(path: &Path) -> Result<Report, PipelineError> {
    let content = fs::read_to_string(path)?;
    let mut lines = content
        .lines()
        .skip_while(|line| line.starts_with('#') || line.trim().is_empty());
    match (lines.next(), lines.next()) {
        (Some(header), Some(data)) => Ok(zip_header(header, data)),
        _ => Err(PipelineError::ReportParse {
            path: path.to_path_buf(),
            reason: "no metrics table".to_string(),
        }),
    }
}
