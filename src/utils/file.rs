use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::MultiGzDecoder;
use log::{debug, info};

use crate::config::defs::{PipelineError, ARRAY_INDEX_TOKEN, CHUNK_DIR_SUFFIX};


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_lines(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gzipped(path)? {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// `reads.mpileup.gz` -> (`reads`, `.mpileup`)
fn chunk_name_parts(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name).to_string();
    match name.rfind('.') {
        Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_string()),
        _ => (name, String::new()),
    }
}


/// Splits a line-oriented file into `nb_chunks` files of `ceil(lines / nb_chunks)` lines.
///
/// # Arguments
///
/// * `path` - File to split, plain or gzipped.
/// * `nb_chunks` - Number of chunk files; exactly this many are written, trailing ones may be empty.
/// * `out_dir` - Directory receiving `<sample_id>_chunks/`.
/// * `sample_id` - Names the chunk directory.
///
/// # Returns
/// The chunk path pattern, `<chunk_dir>/<stem>_$PBS_ARRAYID<ext>`, chunks being numbered from 1.
pub fn split_file(path: &Path, nb_chunks: usize, out_dir: &Path, sample_id: &str) -> Result<String, PipelineError> {
    let nb_chunks = nb_chunks.max(1);
    let lines: Vec<String> = open_lines(path)?.lines().collect::<io::Result<_>>()?;
    let per_chunk = lines.len().div_ceil(nb_chunks).max(1);

    let chunk_dir = out_dir.join(format!("{}{}", sample_id, CHUNK_DIR_SUFFIX));
    fs::create_dir_all(&chunk_dir)?;
    let (stem, ext) = chunk_name_parts(path);

    let mut chunks = lines.chunks(per_chunk);
    for index in 1..=nb_chunks {
        let chunk_path = chunk_dir.join(format!("{}_{}{}", stem, index, ext));
        let mut writer = BufWriter::new(File::create(&chunk_path)?);
        for line in chunks.next().unwrap_or_default() {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
    }
    info!(
        "Split {} ({} lines) into {} chunk(s) in {}",
        path.display(),
        lines.len(),
        nb_chunks,
        chunk_dir.display()
    );

    let pattern = chunk_dir.join(format!("{}_{}{}", stem, ARRAY_INDEX_TOKEN, ext));
    Ok(pattern.to_string_lossy().into_owned())
}

/// Concatenates the chunk VCFs `chunk_pattern` (1..=count) into `output`,
/// keeping the header of the first chunk only.
pub fn merge_vcf_chunks(stage: &str, output: &str, chunk_pattern: &str, count: usize) -> Result<(), PipelineError> {
    let mut writer = BufWriter::new(File::create(output)?);
    for index in 1..=count {
        let chunk = chunk_pattern.replace(ARRAY_INDEX_TOKEN, &index.to_string());
        let reader = File::open(&chunk).map_err(|e| {
            debug!("{}: {}", chunk, e);
            PipelineError::CannotMergeBulkResults(stage.to_string())
        })?;
        for line in BufReader::new(reader).lines() {
            let line = line?;
            if index > 1 && line.starts_with('#') {
                continue;
            }
            writeln!(writer, "{}", line)?;
        }
    }
    writer.flush()?;
    Ok(())
}


fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when every output exists and none is older than an input.
pub fn is_up_to_date(inputs: &[PathBuf], outputs: &[PathBuf]) -> bool {
    if outputs.is_empty() {
        return false;
    }
    let output_times: Option<Vec<SystemTime>> = outputs.iter().map(|p| modified(p)).collect();
    let Some(oldest_output) = output_times.and_then(|times| times.into_iter().min()) else {
        return false;
    };
    inputs
        .iter()
        .all(|p| modified(p).is_some_and(|input_time| input_time <= oldest_output))
}


#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn chunk_lines(pattern: &str, index: usize) -> anyhow::Result<Vec<String>> {
        let path = pattern.replace(ARRAY_INDEX_TOKEN, &index.to_string());
        Ok(fs::read_to_string(path)?.lines().map(str::to_string).collect())
    }

    #[test]
    fn test_split_reassembles() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("s1.mpileup");
        let lines: Vec<String> = (1..=10).map(|i| format!("chr1\t{}\tA", i)).collect();
        fs::write(&input, lines.join("\n") + "\n")?;

        let pattern = split_file(&input, 3, dir.path(), "s1")?;
        assert!(pattern.ends_with(&format!("s1_chunks/s1_{}.mpileup", ARRAY_INDEX_TOKEN)));

        let mut rebuilt = Vec::new();
        for index in 1..=3 {
            let chunk = chunk_lines(&pattern, index)?;
            assert!(chunk.len() <= 4);
            rebuilt.extend(chunk);
        }
        assert_eq!(rebuilt, lines);
        Ok(())
    }

    #[test]
    fn test_split_more_chunks_than_lines() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("s1.mpileup");
        fs::write(&input, "a\nb\n")?;

        let pattern = split_file(&input, 4, dir.path(), "s1")?;
        assert_eq!(chunk_lines(&pattern, 1)?, vec!["a"]);
        assert_eq!(chunk_lines(&pattern, 2)?, vec!["b"]);
        assert!(chunk_lines(&pattern, 3)?.is_empty());
        assert!(chunk_lines(&pattern, 4)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_split_gzipped_input() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("s1.mpileup.gz");
        let mut encoder = GzEncoder::new(File::create(&input)?, Compression::default());
        encoder.write_all(b"x\ny\nz\n")?;
        encoder.finish()?;

        assert!(is_gzipped(&input)?);
        let pattern = split_file(&input, 2, dir.path(), "s1")?;
        assert!(pattern.ends_with(&format!("s1_{}.mpileup", ARRAY_INDEX_TOKEN)));
        assert_eq!(chunk_lines(&pattern, 1)?, vec!["x", "y"]);
        assert_eq!(chunk_lines(&pattern, 2)?, vec!["z"]);
        Ok(())
    }

    #[test]
    fn test_merge_vcf_chunks_keeps_first_header() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let base = dir.path().join("s1.bcftools.vcf");
        let base = base.to_str().unwrap();
        fs::write(format!("{}_1", base), "##fileformat=VCFv4.1\n#CHROM\nchr1\t1\n")?;
        fs::write(format!("{}_2", base), "##fileformat=VCFv4.1\n#CHROM\nchr1\t2\n")?;

        let pattern = format!("{}_{}", base, ARRAY_INDEX_TOKEN);
        merge_vcf_chunks("BcftoolsVariantCaller", base, &pattern, 2)?;
        assert_eq!(fs::read_to_string(base)?, "##fileformat=VCFv4.1\n#CHROM\nchr1\t1\nchr1\t2\n");

        let err = merge_vcf_chunks("BcftoolsVariantCaller", base, &pattern, 3).unwrap_err();
        assert!(matches!(err, PipelineError::CannotMergeBulkResults(_)));
        Ok(())
    }

    #[test]
    fn test_up_to_date() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("in.sam");
        let output = dir.path().join("out.bam");
        fs::write(&input, "")?;
        assert!(!is_up_to_date(&[input.clone()], &[output.clone()]));

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&output, "")?;
        assert!(is_up_to_date(&[input.clone()], &[output.clone()]));
        assert!(!is_up_to_date(&[input], &[]));
        Ok(())
    }
}
