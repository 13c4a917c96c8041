// src/io/sequence.rs
use serde::{Deserialize, Serialize};

/// A named biological sequence with an optional per-base quality string.
///
/// Ids are dense and re-normalizable; the pipeline relies on `id` matching
/// the sequence's index in the working set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sequence {
    pub id: u32,
    pub name: String,
    pub data: String,
    pub quality: String,
}

impl Sequence {
    pub fn new(id: u32, name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            data: data.into(),
            quality: String::new(),
        }
    }

    pub fn with_quality(
        id: u32,
        name: impl Into<String>,
        data: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            data: data.into(),
            quality: quality.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flip the sequence onto the other strand in place. The quality string,
    /// when present, is reversed alongside.
    pub fn reverse_complement(&mut self) {
        self.data = reverse_complement(&self.data);
        if !self.quality.is_empty() {
            self.quality = self.quality.chars().rev().collect();
        }
    }
}

/// Complement-reverse a nucleotide string. Bases outside {A,C,G,T} map to N.
pub fn reverse_complement(data: &str) -> String {
    data.bytes()
        .rev()
        .map(|b| match b {
            b'A' | b'a' => 'T',
            b'C' | b'c' => 'G',
            b'G' | b'g' => 'C',
            b'T' | b't' => 'A',
            _ => 'N',
        })
        .collect()
}

/// Reassign dense ids matching each sequence's position in the container.
pub fn normalize_ids(sequences: &mut [Sequence]) {
    for (i, it) in sequences.iter_mut().enumerate() {
        it.id = i as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement_involution() {
        let seq = "ACGTTGCAACGT";
        assert_eq!(reverse_complement(&reverse_complement(seq)), seq);
    }

    #[test]
    fn test_reverse_complement_basic() {
        assert_eq!(reverse_complement("ACGT"), "ACGT");
        assert_eq!(reverse_complement("AACC"), "GGTT");
        assert_eq!(reverse_complement("ANT"), "ANT");
    }

    #[test]
    fn test_sequence_reverse_complement_quality() {
        let mut seq = Sequence::with_quality(0, "read", "ACG", "!#%");
        seq.reverse_complement();
        assert_eq!(seq.data, "CGT");
        assert_eq!(seq.quality, "%#!");
    }

    #[test]
    fn test_normalize_ids() {
        let mut seqs = vec![
            Sequence::new(7, "a", "ACGT"),
            Sequence::new(3, "b", "ACGT"),
        ];
        normalize_ids(&mut seqs);
        assert_eq!(seqs[0].id, 0);
        assert_eq!(seqs[1].id, 1);
    }
}
