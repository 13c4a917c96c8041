// src/kmer/minimizer.rs
//! Minimizer extraction and the bulk-indexed mapping engine.
//!
//! Minimizers keep roughly 2/(w+1) of all k-mer positions while preserving
//! sensitivity for overlap detection, which is what makes all-vs-all
//! mapping of read sets tractable.
//!
//! Reference: Roberts, M., Hayes, W., Hunt, B. R., Mount, S. M., & Yorke,
//! J. A. (2004). Reducing storage requirements for biological sequence
//! comparison. Bioinformatics, 20(18), 3363-3369.

use ahash::AHashMap;
use rayon::prelude::*;

use crate::io::sequence::Sequence;
use crate::kmer::nthash::NtHashIterator;
use crate::overlap::Overlap;

/// Minimum shared minimizers for a chain to become a candidate overlap.
const MIN_CHAIN_MATCHES: usize = 4;

/// Diagonal band width when clustering shared minimizers.
const CHAIN_BAND: i64 = 500;

/// A k-mer that held the minimum hash in some window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Minimizer {
    pub hash: u64,
    pub position: u32,
    /// True when the canonical hash came from the forward strand.
    pub strand: bool,
}

/// Extract minimizers: the k-mer with minimum canonical hash in each window
/// of `w` consecutive k-mers.
pub fn get_minimizers(seq: &[u8], k: usize, w: usize) -> Vec<Minimizer> {
    if seq.len() < k || w == 0 {
        return Vec::new();
    }

    let mut minimizers = Vec::new();
    let mut window: Vec<(u64, u32, bool)> = Vec::with_capacity(w + 1);
    let mut last_pos: Option<u32> = None;

    for (pos, hash, strand) in NtHashIterator::new(seq, k) {
        window.push((hash, pos as u32, strand));
        if window.len() > w {
            window.remove(0);
        }
        if window.len() < w {
            continue;
        }

        if let Some(&(hash, position, strand)) = window.iter().min_by_key(|&&(h, p, _)| (h, p)) {
            if last_pos != Some(position) {
                minimizers.push(Minimizer {
                    hash,
                    position,
                    strand,
                });
                last_pos = Some(position);
            }
        }
    }

    minimizers
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    seq_id: u32,
    position: u32,
    strand: bool,
}

/// Bulk-indexable minimizer table answering approximate-overlap queries.
///
/// `minimize` indexes a batch of target sequences, `filter` freezes an
/// occurrence cutoff for the most frequent (least informative) minimizers,
/// and `map` chains shared minimizers into candidate overlaps. An indexed
/// engine is immutable during `map`, so queries run concurrently.
pub struct MinimizerEngine {
    k: usize,
    w: usize,
    index: AHashMap<u64, Vec<Posting>>,
    occurrence_threshold: usize,
}

impl MinimizerEngine {
    pub fn new(k: usize, w: usize) -> Self {
        Self {
            k,
            w,
            index: AHashMap::new(),
            occurrence_threshold: usize::MAX,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Replace the index with minimizers of the given batch.
    pub fn minimize(&mut self, sequences: &[&Sequence]) {
        self.index.clear();
        self.occurrence_threshold = usize::MAX;

        let extracted: Vec<(u32, Vec<Minimizer>)> = sequences
            .par_iter()
            .map(|seq| (seq.id, get_minimizers(seq.data.as_bytes(), self.k, self.w)))
            .collect();

        for (seq_id, minimizers) in extracted {
            for m in minimizers {
                self.index.entry(m.hash).or_default().push(Posting {
                    seq_id,
                    position: m.position,
                    strand: m.strand,
                });
            }
        }
    }

    /// Ignore the `frequency` fraction of most frequent minimizers in
    /// subsequent `map` calls.
    pub fn filter(&mut self, frequency: f64) {
        if self.index.is_empty() {
            self.occurrence_threshold = usize::MAX;
            return;
        }
        let mut counts: Vec<usize> = self.index.values().map(|v| v.len()).collect();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        let idx = ((frequency * counts.len() as f64) as usize).min(counts.len() - 1);
        self.occurrence_threshold = counts[idx];
    }

    /// Find candidate overlaps between `query` and the indexed batch.
    ///
    /// `avoid_equal` drops self hits, `avoid_symmetric` keeps each unordered
    /// pair once (targets with id >= query id are skipped), `minhash`
    /// subsamples the query to its `len/k` smallest minimizers. Results are
    /// sorted so the caller sees a deterministic order regardless of hash
    /// map internals.
    pub fn map(
        &self,
        query: &Sequence,
        avoid_equal: bool,
        avoid_symmetric: bool,
        minhash: bool,
    ) -> Vec<Overlap> {
        let mut minimizers = get_minimizers(query.data.as_bytes(), self.k, self.w);
        if minhash {
            let keep = (query.data.len() / self.k).max(MIN_CHAIN_MATCHES);
            if minimizers.len() > keep {
                minimizers.sort_unstable_by_key(|m| m.hash);
                minimizers.truncate(keep);
                minimizers.sort_unstable_by_key(|m| m.position);
            }
        }

        // hits grouped per (target, relative strand)
        let mut hits: AHashMap<(u32, bool), Vec<(u32, u32)>> = AHashMap::new();
        for m in &minimizers {
            let postings = match self.index.get(&m.hash) {
                Some(p) if p.len() <= self.occurrence_threshold => p,
                _ => continue,
            };
            for t in postings {
                if avoid_equal && t.seq_id == query.id {
                    continue;
                }
                if avoid_symmetric && t.seq_id >= query.id {
                    continue;
                }
                let same_strand = m.strand == t.strand;
                hits.entry((t.seq_id, same_strand))
                    .or_default()
                    .push((m.position, t.position));
            }
        }

        let mut overlaps = Vec::new();
        for ((rhs_id, strand), mut matches) in hits {
            if matches.len() < MIN_CHAIN_MATCHES {
                continue;
            }
            let diagonal = |&(q, t): &(u32, u32)| -> i64 {
                if strand {
                    t as i64 - q as i64
                } else {
                    t as i64 + q as i64
                }
            };
            matches.sort_unstable_by_key(|m| (diagonal(m), m.0));

            // split into diagonal-banded chains
            let mut begin = 0;
            for i in 1..=matches.len() {
                if i < matches.len() && diagonal(&matches[i]) - diagonal(&matches[i - 1]) <= CHAIN_BAND
                {
                    continue;
                }
                let chain = &matches[begin..i];
                begin = i;
                if chain.len() < MIN_CHAIN_MATCHES {
                    continue;
                }

                let lhs_begin = chain.iter().map(|m| m.0).min().unwrap();
                let lhs_end = chain.iter().map(|m| m.0).max().unwrap() + self.k as u32;
                let rhs_begin = chain.iter().map(|m| m.1).min().unwrap();
                let rhs_end = chain.iter().map(|m| m.1).max().unwrap() + self.k as u32;

                overlaps.push(Overlap {
                    lhs_id: query.id,
                    lhs_begin,
                    lhs_end,
                    rhs_id,
                    rhs_begin,
                    rhs_end,
                    score: chain.len() as u32,
                    strand,
                });
            }
        }

        overlaps.sort_unstable_by_key(|o| (o.rhs_id, o.strand, o.lhs_begin, o.rhs_begin));
        overlaps
    }

    /// Matched-minimizer base estimate between two sequences, as the union
    /// of matched k-mer intervals on `lhs`.
    pub fn map_pair(&self, lhs: &Sequence, rhs: &Sequence) -> u32 {
        let mut rhs_hashes: AHashMap<u64, ()> = AHashMap::new();
        for m in get_minimizers(rhs.data.as_bytes(), self.k, self.w) {
            rhs_hashes.insert(m.hash, ());
        }

        let mut matched: Vec<u32> = get_minimizers(lhs.data.as_bytes(), self.k, self.w)
            .into_iter()
            .filter(|m| rhs_hashes.contains_key(&m.hash))
            .map(|m| m.position)
            .collect();
        matched.sort_unstable();

        let mut bases = 0u32;
        let mut covered_to = 0u32;
        for pos in matched {
            let begin = pos.max(covered_to);
            let end = pos + self.k as u32;
            if end > begin {
                bases += end - begin;
            }
            covered_to = covered_to.max(end);
        }
        bases
    }
}
