// src/polish/consensus.rs
//! Consensus polishing of unitigs against the raw reads.
//!
//! Reads are mapped back onto the unitigs with the minimizer engine; each
//! mapped read is scored with the match/mismatch/gap parameters over its
//! projected columns and, when it scores positive, votes per position. The
//! polished name carries a trailing ` C:<f>` coverage tag; `f > 0` is the
//! caller's signal that the unitig was actually touched.

use rayon::prelude::*;

use crate::constants::KMER_DISCARD_FREQ_HARD;
use crate::io::sequence::{reverse_complement, Sequence};
use crate::kmer::minimizer::MinimizerEngine;
use crate::overlap::Overlap;

pub struct ConsensusPolisher {
    match_score: i32,
    mismatch: i32,
    gap: i32,
    k: usize,
    w: usize,
}

impl ConsensusPolisher {
    pub fn new(match_score: i8, mismatch: i8, gap: i8, k: usize, w: usize) -> Self {
        Self {
            match_score: match_score as i32,
            mismatch: mismatch as i32,
            gap: gap as i32,
            k,
            w,
        }
    }

    /// One polishing round over all unitigs. Input order is preserved;
    /// unmapped unitigs come back unchanged with a zero coverage tag.
    pub fn polish(&self, unitigs: &[Sequence], reads: &[Sequence]) -> Vec<Sequence> {
        if unitigs.is_empty() || reads.is_empty() {
            return unitigs.to_vec();
        }

        let mut engine = MinimizerEngine::new(self.k, self.w);
        let targets: Vec<&Sequence> = unitigs.iter().collect();
        engine.minimize(&targets);
        engine.filter(KMER_DISCARD_FREQ_HARD);

        // reads with degenerate quality strings carry no signal worth
        // weighting, everything else votes equally
        let usable: Vec<&Sequence> = reads
            .iter()
            .filter(|read| {
                read.quality.is_empty() || read.quality.bytes().any(|q| q != b'!')
            })
            .collect();

        let mapped: Vec<Vec<Overlap>> = usable
            .par_iter()
            .map(|read| engine.map(read, false, false, true))
            .collect();

        let mut per_unitig: Vec<Vec<(usize, Overlap)>> = vec![Vec::new(); unitigs.len()];
        for (read_idx, overlaps) in mapped.iter().enumerate() {
            for o in overlaps {
                per_unitig[o.rhs_id as usize].push((read_idx, *o));
            }
        }

        unitigs
            .par_iter()
            .zip(per_unitig.par_iter())
            .map(|(unitig, hits)| self.polish_one(unitig, hits, &usable))
            .collect()
    }

    fn polish_one(
        &self,
        unitig: &Sequence,
        hits: &[(usize, Overlap)],
        reads: &[&Sequence],
    ) -> Sequence {
        let target = unitig.data.as_bytes();
        let mut counts = vec![[0u32; 4]; target.len()];
        let mut covered = vec![false; target.len()];

        for &(read_idx, o) in hits {
            let read = reads[read_idx];
            let fragment = if o.strand {
                read.data[o.lhs_begin as usize..o.lhs_end as usize].to_string()
            } else {
                reverse_complement(&read.data)
                    [read.data.len() - o.lhs_end as usize..read.data.len() - o.lhs_begin as usize]
                    .to_string()
            };

            let t_begin = o.rhs_begin as usize;
            let t_end = (o.rhs_end as usize).min(target.len());
            if t_begin >= t_end || fragment.is_empty() {
                continue;
            }

            // project read columns linearly onto the target interval and
            // score the projection before letting it vote
            let span = t_end - t_begin;
            let bytes = fragment.as_bytes();
            let mut matches = 0i32;
            let mut mismatches = 0i32;
            let mut projected: Vec<(usize, u8)> = Vec::with_capacity(span);
            for (col, t_pos) in (t_begin..t_end).enumerate() {
                let r_pos = col * bytes.len() / span;
                let base = bytes[r_pos];
                if base == target[t_pos] {
                    matches += 1;
                } else {
                    mismatches += 1;
                }
                projected.push((t_pos, base));
            }
            let indels = (bytes.len() as i32 - span as i32).abs();
            let score =
                self.match_score * matches + self.mismatch * mismatches + self.gap * indels;
            if score <= 0 {
                continue;
            }

            for (t_pos, base) in projected {
                let idx = match base {
                    b'A' | b'a' => 0,
                    b'C' | b'c' => 1,
                    b'G' | b'g' => 2,
                    b'T' | b't' => 3,
                    _ => continue,
                };
                counts[t_pos][idx] += 1;
                covered[t_pos] = true;
            }
        }

        let polished: String = target
            .iter()
            .enumerate()
            .map(|(i, &original)| {
                let total: u32 = counts[i].iter().sum();
                if total == 0 {
                    return original as char;
                }
                match counts[i].iter().enumerate().max_by_key(|&(_, &v)| v) {
                    Some((0, _)) => 'A',
                    Some((1, _)) => 'C',
                    Some((2, _)) => 'G',
                    Some((3, _)) => 'T',
                    _ => original as char,
                }
            })
            .collect();

        let coverage =
            covered.iter().filter(|&&c| c).count() as f64 / covered.len().max(1) as f64;
        Sequence::new(
            unitig.id,
            format!("{} C:{:.6}", unitig.name, coverage),
            polished,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_bases(len: usize, state: &mut u64) -> String {
        (0..len)
            .map(|_| {
                *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                match (*state >> 33) & 3 {
                    0 => 'A',
                    1 => 'C',
                    2 => 'G',
                    _ => 'T',
                }
            })
            .collect()
    }

    #[test]
    fn test_polish_corrects_isolated_errors() {
        let mut state = 77u64;
        let truth = random_bases(3000, &mut state);

        // the draft differs from the truth at a few positions
        let mut draft = truth.clone().into_bytes();
        for &pos in &[500usize, 1500, 2500] {
            draft[pos] = if draft[pos] == b'A' { b'C' } else { b'A' };
        }
        let draft = String::from_utf8(draft).unwrap();

        let unitigs = vec![Sequence::new(0, "Utg0", draft)];
        // several perfect reads covering the whole unitig
        let reads: Vec<Sequence> = (0..5)
            .map(|i| Sequence::new(i, format!("read{}", i), truth.clone()))
            .collect();

        let polisher = ConsensusPolisher::new(3, -5, -4, 15, 5);
        let polished = polisher.polish(&unitigs, &reads);
        assert_eq!(polished.len(), 1);
        assert_eq!(polished[0].data, truth);
        assert!(polished[0].name.starts_with("Utg0 C:"));

        let tag: f64 = polished[0].name[polished[0].name.rfind(':').unwrap() + 1..]
            .parse()
            .unwrap();
        assert!(tag > 0.9);
    }

    #[test]
    fn test_polish_without_reads_is_identity() {
        let unitigs = vec![Sequence::new(0, "Utg0", "ACGTACGT")];
        let polisher = ConsensusPolisher::new(3, -5, -4, 15, 5);
        let polished = polisher.polish(&unitigs, &[]);
        assert_eq!(polished[0].data, "ACGTACGT");
        assert_eq!(polished[0].name, "Utg0");
    }

    #[test]
    fn test_unmapped_unitig_tagged_zero() {
        let mut state = 5u64;
        let unitigs = vec![Sequence::new(0, "Utg0", random_bases(2000, &mut state))];
        let reads = vec![Sequence::new(0, "read0", random_bases(2000, &mut state))];

        let polisher = ConsensusPolisher::new(3, -5, -4, 15, 5);
        let polished = polisher.polish(&unitigs, &reads);
        assert!(polished[0].name.ends_with("C:0.000000"));
    }
}
