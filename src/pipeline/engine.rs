// src/pipeline/engine.rs
//! The overlap engine: batched all-vs-all mapping and everything the piles
//! learn from it.
//!
//! Two passes feed graph construction. The first (stage -5) builds piles
//! from a hard-preset all-vs-all mapping, trims each sequence to its
//! covered region and removes contained and chimeric reads. The second
//! (stage -4) re-piles with the soft preset to expose repeat-inflated
//! coverage, maps the surviving reads against each other for the final
//! overlap set and drops repeat-induced false overlaps.

use rayon::prelude::*;
use tracing::info;

use crate::constants::{
    KMER_DISCARD_FREQ_HARD, KMER_DISCARD_FREQ_SOFT, MIN_COVERAGE, MIN_SEQUENCE_LEN,
    OVLP_BATCH_LIM, SEQS_BATCH_LIM,
};
use crate::io::fasta::FastaWriter;
use crate::io::sequence::Sequence;
use crate::kmer::minimizer::MinimizerEngine;
use crate::overlap::{self, Overlap, OverlapKind};
use crate::pile::Pile;

/// Overlaps kept per sequence while piling up coverage.
const PILE_OVLP_CAP: usize = 16;

pub struct OverlapEngine {
    k: usize,
    w: usize,
}

impl OverlapEngine {
    pub fn new(k: usize, w: usize) -> Self {
        Self { k, w }
    }

    /// One pile per input sequence.
    pub fn initialize_piles(sequences: &[Sequence]) -> Vec<Pile> {
        sequences
            .iter()
            .map(|seq| Pile::new(seq.id, seq.data.len()))
            .collect()
    }

    /// Chunk `[begin, end)` so each chunk stays under `limit` total bases.
    fn batches(
        sequences: &[Sequence],
        begin: usize,
        end: usize,
        limit: usize,
    ) -> Vec<(usize, usize)> {
        let mut dst = Vec::new();
        let mut bytes = 0usize;
        let mut j = begin;
        for i in begin..end {
            bytes += sequences[i].data.len();
            if i + 1 != end && bytes < limit {
                continue;
            }
            dst.push((j, i + 1));
            j = i + 1;
            bytes = 0;
        }
        dst
    }

    /// Stage -5: pile construction, trimming, contained-read and chimera
    /// resolution. Leaves the piles annotated; all overlaps are discarded.
    pub fn build_piles(&self, sequences: &[Sequence], piles: &mut Vec<Pile>) {
        *piles = Self::initialize_piles(sequences);
        let mut overlaps: Vec<Vec<Overlap>> = vec![Vec::new(); sequences.len()];

        let mut engine = MinimizerEngine::new(self.k, self.w);

        for (j, i) in Self::batches(sequences, 0, sequences.len(), SEQS_BATCH_LIM) {
            let batch: Vec<&Sequence> = sequences[j..i].iter().collect();
            engine.minimize(&batch);
            engine.filter(KMER_DISCARD_FREQ_HARD);
            info!("minimized {} - {} / {}", j, i, sequences.len());

            let mut num_overlaps: Vec<usize> =
                overlaps.iter().map(|o| o.len()).collect();

            for (qj, qi) in Self::batches(sequences, 0, i, OVLP_BATCH_LIM) {
                let produced: Vec<Vec<Overlap>> = sequences[qj..qi]
                    .par_iter()
                    .map(|seq| engine.map(seq, true, true, true))
                    .collect();
                for found in produced {
                    for o in found {
                        overlaps[o.lhs_id as usize].push(o);
                        overlaps[o.rhs_id as usize].push(o.reverse());
                    }
                }

                piles
                    .par_iter_mut()
                    .zip(overlaps.par_iter_mut())
                    .zip(num_overlaps.par_iter_mut())
                    .for_each(|((pile, ovlps), num)| {
                        if ovlps.is_empty() || ovlps.len() == *num {
                            return;
                        }
                        pile.add_layers(&ovlps[*num..]);
                        *num = ovlps.len().min(PILE_OVLP_CAP);
                        if ovlps.len() < PILE_OVLP_CAP {
                            return;
                        }
                        ovlps.sort_by(|lhs, rhs| rhs.length().cmp(&lhs.length()));
                        ovlps.truncate(PILE_OVLP_CAP);
                    });
            }
            info!("mapped sequences {} - {}", j, i);
        }

        // trim and annotate piles
        piles
            .par_iter_mut()
            .zip(overlaps.par_iter_mut())
            .for_each(|(pile, ovlps)| {
                pile.find_valid_region(MIN_COVERAGE);
                if pile.is_invalid() {
                    ovlps.clear();
                } else {
                    pile.find_median();
                    pile.find_chimeric_regions();
                }
            });
        info!("annotated piles");

        self.resolve_contained(piles, &mut overlaps);
        info!("removed contained sequences");

        self.resolve_chimeras(piles, &mut overlaps);
        info!("removed chimeric sequences");
    }

    /// Mark contained reads against their containers. Containment into an
    /// already-contained read is not trusted, so of two identical reads
    /// exactly one survives, carrying the other's read count.
    pub fn resolve_contained(&self, piles: &mut [Pile], overlaps: &mut [Vec<Overlap>]) {
        for i in 0..overlaps.len() {
            let mut k = 0;
            for j in 0..overlaps[i].len() {
                let mut o = overlaps[i][j];
                if !overlap::update(&mut o, piles) {
                    continue;
                }
                match overlap::kind(&o, piles) {
                    OverlapKind::LhsContained
                        if !piles[o.rhs_id as usize].is_maybe_chimeric() =>
                    {
                        if !piles[o.rhs_id as usize].is_contained() {
                            mark_contained(piles, i as u32, o.rhs_id);
                        } else {
                            overlaps[i][k] = o;
                            k += 1;
                        }
                    }
                    OverlapKind::RhsContained
                        if !piles[i].is_maybe_chimeric() =>
                    {
                        if !piles[i].is_contained() {
                            mark_contained(piles, o.rhs_id, i as u32);
                        } else {
                            overlaps[i][k] = o;
                            k += 1;
                        }
                    }
                    _ => {
                        overlaps[i][k] = o;
                        k += 1;
                    }
                }
            }
            overlaps[i].truncate(k);
        }
        for (pile, ovlps) in piles.iter_mut().zip(overlaps.iter_mut()) {
            if pile.is_contained() {
                pile.set_is_invalid();
                ovlps.clear();
            }
        }
    }

    fn resolve_chimeras(&self, piles: &mut [Pile], overlaps: &mut Vec<Vec<Overlap>>) {
        loop {
            let pairs: Vec<(u32, u32)> = overlaps
                .iter()
                .flatten()
                .filter(|o| overlap::kind(o, piles).is_dovetail())
                .map(|o| (o.lhs_id, o.rhs_id))
                .collect();
            let components = connected_components(&pairs, piles);

            let component_medians = median_by_component(&components, piles);
            piles
                .par_iter_mut()
                .zip(overlaps.par_iter_mut())
                .zip(component_medians.par_iter())
                .for_each(|((pile, ovlps), median)| {
                    if let Some(median) = median {
                        pile.clear_chimeric_regions(*median);
                        if pile.is_invalid() {
                            ovlps.clear();
                        }
                    }
                });

            let mut is_changed = false;
            for ovlps in overlaps.iter_mut() {
                let mut k = 0;
                for j in 0..ovlps.len() {
                    let mut o = ovlps[j];
                    if overlap::update(&mut o, piles) {
                        ovlps[k] = o;
                        k += 1;
                    } else {
                        is_changed = true;
                    }
                }
                ovlps.truncate(k);
            }

            if !is_changed {
                // leftover containments mark their short side invalid
                let leftovers: Vec<Overlap> = overlaps.iter().flatten().copied().collect();
                for o in &leftovers {
                    match overlap::kind(o, piles) {
                        OverlapKind::LhsContained => {
                            if !piles[o.rhs_id as usize].is_contained() {
                                mark_contained(piles, o.lhs_id, o.rhs_id);
                            }
                            piles[o.lhs_id as usize].set_is_invalid();
                        }
                        OverlapKind::RhsContained => {
                            if !piles[o.lhs_id as usize].is_contained() {
                                mark_contained(piles, o.rhs_id, o.lhs_id);
                            }
                            piles[o.rhs_id as usize].set_is_invalid();
                        }
                        _ => {}
                    }
                }
                overlaps.clear();
                break;
            }
        }
    }

    /// Stage -4: repeat-aware re-piling and the final overlap set.
    ///
    /// Sequences are reordered valid-first while mapping and restored to id
    /// order before returning. When `store_fillers` is set the surviving
    /// valid regions are saved for the second run.
    pub fn find_final_overlaps(
        &self,
        sequences: &mut [Sequence],
        piles: &mut [Pile],
        store_fillers: bool,
    ) -> Vec<Overlap> {
        // fresh coverage inside the kept regions for the soft pass
        piles.par_iter_mut().for_each(|pile| {
            if !pile.is_invalid() {
                pile.clear_valid_region();
            }
        });
        info!("cleared piles");

        sequences.sort_by_key(|seq| {
            (piles[seq.id as usize].is_invalid(), seq.id)
        });
        let s = sequences
            .iter()
            .position(|seq| piles[seq.id as usize].is_invalid())
            .unwrap_or(sequences.len());

        let mut engine = MinimizerEngine::new(self.k, self.w);
        let mut overlaps: Vec<Vec<Overlap>> = vec![Vec::new(); piles.len()];
        let mut final_overlaps: Vec<Overlap> = Vec::new();

        // map invalid reads onto valid ones to expose repetitive coverage
        for (j, i) in Self::batches(sequences, 0, s, SEQS_BATCH_LIM) {
            let batch: Vec<&Sequence> = sequences[j..i].iter().collect();
            engine.minimize(&batch);
            engine.filter(KMER_DISCARD_FREQ_SOFT);
            info!("minimized {} - {} / {}", j, i, s);

            for (qj, qi) in Self::batches(sequences, s, sequences.len(), OVLP_BATCH_LIM) {
                let produced: Vec<Vec<Overlap>> = sequences[qj..qi]
                    .par_iter()
                    .map(|seq| engine.map(seq, true, false, true))
                    .collect();
                for found in produced {
                    for o in found {
                        overlaps[o.rhs_id as usize].push(o);
                    }
                }

                piles
                    .par_iter_mut()
                    .zip(overlaps.par_iter_mut())
                    .for_each(|(pile, ovlps)| {
                        if !ovlps.is_empty() {
                            pile.add_layers(ovlps);
                            ovlps.clear();
                        }
                    });
            }
            info!("mapped invalid sequences {} - {}", j, i);
        }

        // map valid reads against each other for the final overlap set
        for (j, i) in Self::batches(sequences, 0, s, OVLP_BATCH_LIM) {
            let batch: Vec<&Sequence> = sequences[j..i].iter().collect();
            engine.minimize(&batch);
            engine.filter(KMER_DISCARD_FREQ_HARD);
            info!("minimized {} - {} / {}", j, i, s);

            let produced: Vec<Vec<Overlap>> = sequences[0..i]
                .par_iter()
                .map(|seq| engine.map(seq, true, true, false))
                .collect();
            for found in produced {
                for mut o in found {
                    if !overlap::update(&mut o, piles) {
                        continue;
                    }
                    match overlap::kind(&o, piles) {
                        OverlapKind::Internal => {}
                        OverlapKind::LhsContained => {
                            if !piles[o.rhs_id as usize].is_contained() {
                                mark_contained(piles, o.lhs_id, o.rhs_id);
                            }
                        }
                        OverlapKind::RhsContained => {
                            if !piles[o.lhs_id as usize].is_contained() {
                                mark_contained(piles, o.rhs_id, o.lhs_id);
                            }
                        }
                        _ => match final_overlaps.last_mut() {
                            Some(last)
                                if last.lhs_id == o.lhs_id && last.rhs_id == o.rhs_id =>
                            {
                                if last.length() < o.length() {
                                    *last = o;
                                }
                            }
                            _ => final_overlaps.push(o),
                        },
                    }
                }
            }
            info!("mapped valid sequences {} - {}", j, i);
        }

        piles.par_iter_mut().for_each(|pile| {
            if pile.is_contained() {
                pile.set_is_invalid();
                return;
            }
            if pile.is_invalid() {
                return;
            }
            pile.clear_invalid_region();
            pile.find_median();
        });
        info!("updated piles");

        final_overlaps.retain_mut(|o| overlap::update(o, piles));
        info!("updated overlaps");

        sequences.sort_by_key(|seq| seq.id);

        self.resolve_repeats(piles, &mut final_overlaps);
        info!("removed false overlaps");

        if store_fillers {
            if let Err(e) = store_valid_regions(piles, sequences) {
                tracing::warn!("unable to store filler sequences: {}", e);
            }
        }

        final_overlaps
    }

    /// Fixpoint loop flagging overlaps that stop inside well-supported
    /// repeat regions.
    fn resolve_repeats(&self, piles: &mut [Pile], final_overlaps: &mut Vec<Overlap>) {
        loop {
            let pairs: Vec<(u32, u32)> = final_overlaps
                .iter()
                .filter(|o| overlap::kind(o, piles).is_dovetail())
                .map(|o| (o.lhs_id, o.rhs_id))
                .collect();
            let components = connected_components(&pairs, piles);

            let component_medians = median_by_component(&components, piles);
            piles
                .par_iter_mut()
                .zip(component_medians.par_iter())
                .for_each(|(pile, median)| {
                    if let Some(median) = median {
                        pile.find_repetitive_regions(*median);
                    }
                });

            for o in final_overlaps.iter() {
                piles[o.lhs_id as usize].update_repetitive_regions(o);
                piles[o.rhs_id as usize].update_repetitive_regions(o);
            }

            let mut is_changed = false;
            final_overlaps.retain(|o| {
                if piles[o.lhs_id as usize].check_repetitive_regions(o)
                    || piles[o.rhs_id as usize].check_repetitive_regions(o)
                {
                    is_changed = true;
                    false
                } else {
                    true
                }
            });

            if !is_changed {
                break;
            }
            for pile in piles.iter_mut() {
                pile.clear_repetitive_regions();
            }
        }
    }
}

/// Flag `containee` as contained and hand its reads (its own plus any it
/// had absorbed before) over to `container`. Re-marking an already
/// contained read credits nobody twice.
fn mark_contained(piles: &mut [Pile], containee: u32, container: u32) {
    if !piles[containee as usize].is_contained() {
        let reads = 1 + piles[containee as usize].num_absorbed();
        piles[container as usize].absorb(reads);
        piles[containee as usize].set_is_contained();
    }
}

/// Undirected connected components over dovetail-linked sequence ids;
/// invalid piles are excluded.
pub fn connected_components(pairs: &[(u32, u32)], piles: &[Pile]) -> Vec<Vec<u32>> {
    let mut connections: Vec<Vec<u32>> = vec![Vec::new(); piles.len()];
    for &(lhs, rhs) in pairs {
        connections[lhs as usize].push(rhs);
        connections[rhs as usize].push(lhs);
    }

    let mut dst = Vec::new();
    let mut is_visited = vec![false; piles.len()];
    for i in 0..piles.len() {
        if piles[i].is_invalid() || is_visited[i] {
            continue;
        }
        let mut component = Vec::new();
        let mut que = std::collections::VecDeque::from([i as u32]);
        while let Some(j) = que.pop_front() {
            if is_visited[j as usize] {
                continue;
            }
            is_visited[j as usize] = true;
            component.push(j);
            for &it in &connections[j as usize] {
                que.push_back(it);
            }
        }
        dst.push(component);
    }
    dst
}

/// Per-pile median-of-medians of its component; `None` outside any
/// component.
fn median_by_component(components: &[Vec<u32>], piles: &[Pile]) -> Vec<Option<u32>> {
    let mut dst = vec![None; piles.len()];
    for component in components {
        let mut medians: Vec<u32> = component
            .iter()
            .map(|&jt| piles[jt as usize].median())
            .collect();
        let mid = medians.len() / 2;
        medians.select_nth_unstable(mid);
        let median = medians[mid];
        for &jt in component {
            dst[jt as usize] = Some(median);
        }
    }
    dst
}

/// Save every surviving valid region for the second run's filler set.
fn store_valid_regions(piles: &[Pile], sequences: &[Sequence]) -> std::io::Result<()> {
    let mut writer = FastaWriter::new(crate::constants::FILLER_SEQS_PATH)?;
    let mut cnt = 0usize;
    for seq in sequences {
        let pile = &piles[seq.id as usize];
        if pile.is_invalid() || (pile.len() as usize) < MIN_SEQUENCE_LEN {
            continue;
        }
        let region = &seq.data[pile.begin() as usize..pile.end() as usize];
        writer.write_record(&format!("nc{}", seq.id), region)?;
        cnt += 1;
    }
    info!("saved {} sequence regions", cnt);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pile_with_region(id: u32, len: usize, begin: u32, end: u32) -> Pile {
        let mut pile = Pile::new(id, len);
        pile.set_valid_region(begin, end);
        pile
    }

    #[test]
    fn test_connected_components() {
        let piles = vec![
            pile_with_region(0, 2000, 0, 2000),
            pile_with_region(1, 2000, 0, 2000),
            pile_with_region(2, 2000, 0, 2000),
            pile_with_region(3, 2000, 0, 2000),
        ];
        let pairs = vec![(0, 1), (2, 3)];
        let components = connected_components(&pairs, &piles);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec![0, 1]);
        assert_eq!(components[1], vec![2, 3]);
    }

    #[test]
    fn test_connected_components_skips_invalid() {
        let mut piles = vec![
            pile_with_region(0, 2000, 0, 2000),
            pile_with_region(1, 2000, 0, 2000),
        ];
        piles[1].set_is_invalid();
        let components = connected_components(&[], &piles);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0], vec![0]);
    }

    #[test]
    fn test_batches_respect_limit() {
        let sequences: Vec<Sequence> = (0..10)
            .map(|i| Sequence::new(i, format!("s{}", i), "A".repeat(100)))
            .collect();
        let batches = OverlapEngine::batches(&sequences, 0, 10, 250);
        assert_eq!(batches, vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
        let one = OverlapEngine::batches(&sequences, 0, 10, usize::MAX);
        assert_eq!(one, vec![(0, 10)]);
    }

    #[test]
    fn test_initialize_piles() {
        let sequences = vec![
            Sequence::new(0, "a", "ACGT"),
            Sequence::new(1, "b", "ACGTACGT"),
        ];
        let piles = OverlapEngine::initialize_piles(&sequences);
        assert_eq!(piles.len(), 2);
        assert_eq!(piles[1].end(), 8);
    }

    #[test]
    fn test_resolve_contained_drops_the_short_read() {
        let engine = OverlapEngine::new(15, 5);
        let mut piles = vec![
            pile_with_region(0, 2000, 0, 2000),
            pile_with_region(1, 8000, 0, 8000),
        ];
        let o = Overlap {
            lhs_id: 0,
            lhs_begin: 0,
            lhs_end: 2000,
            rhs_id: 1,
            rhs_begin: 3000,
            rhs_end: 5000,
            score: 0,
            strand: true,
        };
        let mut overlaps = vec![vec![o], vec![o.reverse()]];

        engine.resolve_contained(&mut piles, &mut overlaps);
        assert!(piles[0].is_contained() && piles[0].is_invalid());
        assert!(!piles[1].is_invalid());
        assert!(overlaps[0].is_empty());
        // the container inherits the contained read, exactly once
        assert_eq!(piles[1].num_absorbed(), 1);
        assert_eq!(piles[0].num_absorbed(), 0);
    }

    #[test]
    fn test_resolve_contained_spares_chimeric_candidates() {
        let engine = OverlapEngine::new(15, 5);
        // the long read carries a suspicious coverage pit
        let mut long = Pile::new(1, 8000);
        long.set_valid_region(0, 8000);
        for _ in 0..10 {
            long.add_layers(&[Overlap {
                lhs_id: 1,
                lhs_begin: 0,
                lhs_end: 4000,
                rhs_id: u32::MAX,
                rhs_begin: 0,
                rhs_end: 0,
                score: 0,
                strand: true,
            }]);
            long.add_layers(&[Overlap {
                lhs_id: 1,
                lhs_begin: 4200,
                lhs_end: 8000,
                rhs_id: u32::MAX,
                rhs_begin: 0,
                rhs_end: 0,
                score: 0,
                strand: true,
            }]);
        }
        long.find_median();
        long.find_chimeric_regions();
        assert!(long.is_maybe_chimeric());

        let mut piles = vec![pile_with_region(0, 2000, 0, 2000), long];
        let o = Overlap {
            lhs_id: 0,
            lhs_begin: 0,
            lhs_end: 2000,
            rhs_id: 1,
            rhs_begin: 3000,
            rhs_end: 5000,
            score: 0,
            strand: true,
        };
        let mut overlaps = vec![vec![o], Vec::new()];

        engine.resolve_contained(&mut piles, &mut overlaps);
        // containment against a maybe-chimeric read is not trusted
        assert!(!piles[0].is_contained());
        assert_eq!(overlaps[0].len(), 1);
    }
}
