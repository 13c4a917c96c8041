// src/io/loader.rs
//! Sequence loading with extension-based format dispatch.

use tracing::info;

use crate::constants;
use crate::error::{AssemblyError, Result};
use crate::io::fasta::stream_fasta_records;
use crate::io::fastq::stream_fastq_records;
use crate::io::sequence::Sequence;

fn is_suffix(path: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|s| path.ends_with(s))
}

/// Load all records from a FASTA/FASTQ file, optionally gzip-compressed.
///
/// Fails with `InputFormat` on an unrecognized extension and `EmptyInput`
/// when the file parses to zero records.
pub fn load_sequences(path: &str) -> Result<Vec<Sequence>> {
    let sequences: Vec<Sequence> =
        if is_suffix(path, &[".fasta", ".fa", ".fasta.gz", ".fa.gz"]) {
            let reader = crate::io::fasta::open_fasta(path)?;
            stream_fasta_records(reader).collect()
        } else if is_suffix(path, &[".fastq", ".fq", ".fastq.gz", ".fq.gz"]) {
            let reader = crate::io::fastq::open_fastq(path)?;
            stream_fastq_records(reader).collect()
        } else {
            return Err(AssemblyError::InputFormat(path.to_string()));
        };

    if sequences.is_empty() {
        return Err(AssemblyError::EmptyInput);
    }

    info!("loaded {} sequences from {}", sequences.len(), path);
    Ok(sequences)
}

/// Load the filler set extracted by a previous run.
pub fn load_fillers() -> Result<Vec<Sequence>> {
    load_sequences(constants::FILLER_SEQS_PATH)
}

/// Append `extra` onto `sequences`, draining it.
pub fn merge_sequences(sequences: &mut Vec<Sequence>, extra: &mut Vec<Sequence>) {
    sequences.append(extra);
}

/// Clip both ends of every filler sequence long enough to afford it.
pub fn trim_sequences(sequences: &mut [Sequence]) {
    for it in sequences.iter_mut() {
        if it.data.len() > constants::MIN_SEQUENCE_LEN {
            let begin = constants::TRIM_LIM.min(it.data.len() / 2);
            let end = it.data.len().saturating_sub(constants::TRIM_LIM).max(begin);
            it.data = it.data[begin..end].to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension() {
        match load_sequences("reads.bam") {
            Err(AssemblyError::InputFormat(path)) => assert_eq!(path, "reads.bam"),
            other => panic!("unexpected: {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_trim_sequences() {
        let long = "A".repeat(3000);
        let mut seqs = vec![
            Sequence::new(0, "long", long),
            Sequence::new(1, "short", "ACGT"),
        ];
        trim_sequences(&mut seqs);
        assert_eq!(seqs[0].data.len(), 3000 - 2 * crate::constants::TRIM_LIM);
        assert_eq!(seqs[1].data, "ACGT");
    }

    #[test]
    fn test_merge_sequences() {
        let mut a = vec![Sequence::new(0, "a", "AC")];
        let mut b = vec![Sequence::new(0, "b", "GT")];
        merge_sequences(&mut a, &mut b);
        assert_eq!(a.len(), 2);
        assert!(b.is_empty());
    }
}
