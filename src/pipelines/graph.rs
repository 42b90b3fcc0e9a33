//! Builds the task graph from the ordered stage instances and the sample manifest.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::Regex;

use crate::config::defs::{PipelineError, ALL_SAMPLES, COMPLETION_MARKER_EXT, SAMPLE_CAPTURE};
use crate::config::pipeline::StageInstance;
use crate::utils::command::{OptionValue, Options, StageDescriptor};

pub type NodeId = usize;


/// One invocation of one stage for one sample (or for all samples).
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: NodeId,
    pub position: usize,
    pub stage: &'static StageDescriptor,
    pub sample_id: String,
    pub out_dir: PathBuf,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub predecessors: Vec<NodeId>,
    /// Options from the pipeline configuration, before injection.
    pub options: Options,
}

impl TaskNode {
    /// `<out_dir>/<sample_id>`
    pub fn output_prefix(&self) -> String {
        self.out_dir.join(&self.sample_id).to_string_lossy().into_owned()
    }

    /// `<out_dir>/<sample_id>.done`, written once the node succeeded.
    pub fn completion_marker(&self) -> PathBuf {
        self.out_dir.join(format!("{}.{}", self.sample_id, COMPLETION_MARKER_EXT))
    }

    /// Configured options plus the graph-derived inputs, outputs, prefix and sample id.
    pub fn invocation_options(&self) -> Options {
        let mut options = self.options.clone();
        if self.stage.merges_all_inputs {
            options.insert("inputs".to_string(), OptionValue::Multiple(self.inputs.clone()));
        } else {
            insert_numbered(&mut options, "input", &self.inputs);
        }
        insert_numbered(&mut options, "output", &self.outputs);
        options
            .entry("prefix".to_string())
            .or_insert_with(|| self.output_prefix().into());
        options
            .entry("sample_id".to_string())
            .or_insert_with(|| self.sample_id.clone().into());
        options
    }
}

/// `name` for a single value, `name1..nameN` otherwise.
fn insert_numbered(options: &mut Options, name: &str, values: &[String]) {
    match values {
        [single] => {
            options.insert(name.to_string(), single.clone().into());
        }
        many => {
            for (index, value) in many.iter().enumerate() {
                options.insert(format!("{}{}", name, index + 1), value.clone().into());
            }
        }
    }
}


#[derive(Debug, Default)]
pub struct PipelineGraph {
    pub nodes: Vec<TaskNode>,
}

impl PipelineGraph {
    pub fn successors(&self) -> Vec<Vec<NodeId>> {
        let mut successors = vec![Vec::new(); self.nodes.len()];
        for node in &self.nodes {
            for predecessor in &node.predecessors {
                successors[*predecessor].push(node.id);
            }
        }
        successors
    }

    /// Graphviz rendering of the task graph.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph pipeline {\n    rankdir=LR;\n    node [shape=box];\n");
        for node in &self.nodes {
            let _ = writeln!(
                dot,
                "    n{} [label=\"{:02}_{}\\n{}\"];",
                node.id, node.position, node.stage.name, node.sample_id
            );
        }
        for node in &self.nodes {
            for predecessor in &node.predecessors {
                let _ = writeln!(dot, "    n{} -> n{};", predecessor, node.id);
            }
        }
        dot.push_str("}\n");
        dot
    }
}


/// Files handed from one stage to the next, with the node that produced them.
#[derive(Debug, Clone)]
struct Upstream {
    node: Option<NodeId>,
    files: Vec<String>,
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn compile_patterns(stage: &StageDescriptor) -> Result<Vec<Regex>, PipelineError> {
    stage
        .input_patterns
        .iter()
        .map(|pattern| {
            let full = if stage.merges_all_inputs {
                pattern.to_string()
            } else {
                format!(r"(?:^|/)(?P<SAMPLE>{}){}", SAMPLE_CAPTURE, pattern)
            };
            Regex::new(&full).map_err(|e| PipelineError::InvalidStageDescriptor {
                stage: stage.name.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}


/// Wires the stage instances into a DAG of task nodes.
///
/// # Arguments
///
/// * `instances` - Stage instances in pipeline order.
/// * `samples` - Manifest lines, one list of raw files per sample.
/// * `out_root` - Root of the `NN_StageName` output directories.
///
/// # Returns
/// The graph, nodes in a topological order.
pub fn build_graph(
    instances: &[StageInstance],
    samples: &[Vec<PathBuf>],
    out_root: &Path,
) -> Result<PipelineGraph, PipelineError> {
    let mut graph = PipelineGraph::default();
    let mut anchor: Vec<Upstream> = samples
        .iter()
        .map(|files| Upstream {
            node: None,
            files: files.iter().map(|f| f.to_string_lossy().into_owned()).collect(),
        })
        .collect();
    let mut last_suffix = String::new();

    for instance in instances {
        let stage = instance.stage;
        let Some(suffix) = stage.suffix else {
            return Err(PipelineError::NotAPipelineStage(stage.name.to_string()));
        };
        let nb_inputs = stage.input_patterns.len();
        let nb_outputs = stage.output_suffixes.len();
        if !(stage.merges_all_inputs || nb_inputs >= nb_outputs) {
            return Err(PipelineError::AmbiguousArity {
                stage: stage.name.to_string(),
                inputs: nb_inputs,
                outputs: nb_outputs,
            });
        }

        let out_dir = out_root.join(instance.dir_name());
        let patterns = compile_patterns(stage)?;
        let outputs_for = |sample: &str| -> Vec<String> {
            stage
                .output_suffixes
                .iter()
                .map(|s| out_dir.join(format!("{}{}{}", sample, last_suffix, s)).to_string_lossy().into_owned())
                .collect()
        };
        let new_node = |id: NodeId, sample: &str, inputs: Vec<String>, predecessors: Vec<NodeId>| TaskNode {
            id,
            position: instance.position,
            stage,
            sample_id: sample.to_string(),
            out_dir: out_dir.clone(),
            inputs,
            outputs: outputs_for(sample),
            predecessors,
            options: instance.options.clone(),
        };

        let first_id = graph.nodes.len();
        if stage.merges_all_inputs {
            let mut inputs = Vec::new();
            let mut predecessors = Vec::new();
            for upstream in &anchor {
                let matched: Vec<&String> = upstream
                    .files
                    .iter()
                    .filter(|f| patterns.iter().any(|re| re.is_match(file_name(f))))
                    .collect();
                if matched.is_empty() {
                    continue;
                }
                inputs.extend(matched.into_iter().cloned());
                predecessors.extend(upstream.node);
            }
            if !inputs.is_empty() {
                graph.nodes.push(new_node(first_id, ALL_SAMPLES, inputs, predecessors));
            }
        } else {
            let mut seen = HashSet::new();
            for upstream in &anchor {
                // input i is the first file of the upstream matching pattern i
                let matched: Option<Vec<(String, String)>> = patterns
                    .iter()
                    .map(|re| {
                        upstream.files.iter().find_map(|f| {
                            re.captures(file_name(f))
                                .map(|caps| (caps["SAMPLE"].to_string(), f.clone()))
                        })
                    })
                    .collect();
                let Some(matched) = matched else {
                    warn!("{}: skipping upstream files {:?} (no match)", stage.name, upstream.files);
                    continue;
                };
                let sample = matched[0].0.clone();
                if !seen.insert(sample.clone()) {
                    warn!("{}: sample {} already has a node, skipping {:?}", stage.name, sample, upstream.files);
                    continue;
                }
                let inputs = matched.into_iter().map(|(_, file)| file).collect();
                let id = graph.nodes.len();
                graph.nodes.push(new_node(id, &sample, inputs, upstream.node.into_iter().collect()));
            }
        }

        if graph.nodes.len() == first_id {
            return Err(PipelineError::NoMatchingInputs {
                position: instance.position,
                stage: stage.name.to_string(),
                patterns: stage.input_patterns.iter().map(|p| p.to_string()).collect(),
            });
        }
        debug!("{}: {} node(s)", instance.dir_name(), graph.nodes.len() - first_id);

        if stage.produces_data {
            anchor = graph.nodes[first_id..]
                .iter()
                .map(|node| Upstream { node: Some(node.id), files: node.outputs.clone() })
                .collect();
            last_suffix.push('.');
            last_suffix.push_str(suffix);
        }
    }
    Ok(graph)
}


#[cfg(test)]
mod tests {
    use super::*;

    use crate::utils::command::{bwa, fastq_mcf, samtools, vcftools};

    fn instance(position: usize, stage: &'static StageDescriptor) -> StageInstance {
        StageInstance { position, stage, options: Options::new() }
    }

    fn paired_samples() -> Vec<Vec<PathBuf>> {
        ["s1", "s2"]
            .iter()
            .map(|s| {
                vec![
                    PathBuf::from(format!("/data/{}_R1.fastq.gz", s)),
                    PathBuf::from(format!("/data/{}_R2.fastq.gz", s)),
                ]
            })
            .collect()
    }

    #[test]
    fn test_pairing_transform_and_merge() -> anyhow::Result<()> {
        let instances = vec![
            instance(1, &bwa::MEM),
            instance(2, &samtools::SAM2BAM),
            instance(3, &samtools::MPILEUP_MULTI),
        ];
        let graph = build_graph(&instances, &paired_samples(), Path::new("output"))?;

        let per_stage = |position: usize| graph.nodes.iter().filter(|n| n.position == position).count();
        assert_eq!((per_stage(1), per_stage(2), per_stage(3)), (2, 2, 1));

        let mem = &graph.nodes[0];
        assert_eq!(mem.sample_id, "s1");
        assert_eq!(mem.inputs, vec!["/data/s1_R1.fastq.gz", "/data/s1_R2.fastq.gz"]);
        assert_eq!(mem.outputs, vec!["output/01_MEM/s1.mem.sam"]);
        assert!(mem.predecessors.is_empty());

        let sam2bam = &graph.nodes[2];
        assert_eq!(sam2bam.outputs, vec!["output/02_Sam2Bam/s1.mem.sam2bam.bam"]);
        assert_eq!(sam2bam.predecessors, vec![0]);

        let merged = &graph.nodes[4];
        assert_eq!(merged.sample_id, ALL_SAMPLES);
        assert_eq!(merged.predecessors, vec![2, 3]);
        assert_eq!(merged.outputs, vec!["output/03_MPILEUP_Multi/all_samples.mem.sam2bam.mpileup"]);

        for node in &graph.nodes {
            assert!(node.predecessors.iter().all(|p| *p < node.id));
        }
        Ok(())
    }

    #[test]
    fn test_injected_options() -> anyhow::Result<()> {
        let mut clip = instance(1, &fastq_mcf::CLIP_TRIM);
        clip.options.insert("adapters".into(), "adapters.fa".into());
        clip.options.insert("sample_id".into(), "configured".into());
        let instances = vec![clip, instance(2, &bwa::MEM), instance(3, &vcftools::VCF_CONCAT)];

        // VcfConcat matches no upstream file
        let err = build_graph(&instances, &paired_samples(), Path::new("out")).unwrap_err();
        assert!(matches!(err, PipelineError::NoMatchingInputs { position: 3, .. }));

        let graph = build_graph(&instances[..2], &paired_samples(), Path::new("out"))?;
        let options = graph.nodes[0].invocation_options();
        assert_eq!(options["input1"].as_single(), Some("/data/s1_R1.fastq.gz"));
        assert_eq!(options["output2"].as_single(), Some("out/01_ClipTrim/s1_R2.ct.fastq.gz"));
        assert_eq!(options["prefix"].as_single(), Some("out/01_ClipTrim/s1"));
        assert_eq!(options["sample_id"].as_single(), Some("configured"));

        let mem = &graph.nodes[2];
        assert_eq!(mem.inputs, vec!["out/01_ClipTrim/s1_R1.ct.fastq.gz", "out/01_ClipTrim/s1_R2.ct.fastq.gz"]);
        assert_eq!(mem.invocation_options()["output"].as_single(), Some("out/02_MEM/s1.ct.mem.sam"));
        Ok(())
    }

    #[test]
    fn test_non_data_stage_keeps_anchor() -> anyhow::Result<()> {
        let instances = vec![
            instance(1, &bwa::MEM),
            instance(2, &samtools::FLAG_STAT),
            instance(3, &samtools::SAM2BAM),
        ];
        let graph = build_graph(&instances, &paired_samples(), Path::new("output"))?;
        let sam2bam: Vec<&TaskNode> = graph.nodes.iter().filter(|n| n.position == 3).collect();
        assert_eq!(sam2bam[0].predecessors, vec![0]);
        assert_eq!(sam2bam[0].outputs, vec!["output/03_Sam2Bam/s1.mem.sam2bam.bam"]);
        Ok(())
    }

    #[test]
    fn test_unmatched_upstream_skipped() -> anyhow::Result<()> {
        let mut samples = paired_samples();
        samples.push(vec![PathBuf::from("/data/s3_R1.fastq.gz")]);
        let graph = build_graph(&[instance(1, &bwa::MEM)], &samples, Path::new("output"))?;
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.to_dot().contains("n1 [label=\"01_MEM\\ns2\"];"));
        Ok(())
    }
}
