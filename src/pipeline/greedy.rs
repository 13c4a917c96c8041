// src/pipeline/greedy.rs
//! Second-run greedy reassembly.
//!
//! The unitigs of a finished run are combined with the filler set (valid
//! regions extracted during the first run) and rebuilt into a graph seeded
//! from the unitigs only: fillers are kept when they anchor near a unitig
//! end, the graph is expanded breadth-first from unitig-incident overlaps,
//! and each unitig then greedily claims one left and one right extension
//! path, pruning every alternative edge at the junctions it passes.

use ahash::{AHashMap, AHashSet};
use tracing::info;

use crate::constants::{FILLER_LEN_LIM, MAX_GREEDY_OVLP, OVLP_BATCH_LIM, SEQS_BATCH_LIM};
use crate::error::Result;
use crate::graph::assembly::AssemblyGraph;
use crate::io::loader;
use crate::io::sequence::{normalize_ids, Sequence};
use crate::kmer::minimizer::MinimizerEngine;
use crate::overlap::{self, Overlap, OverlapKind};
use rayon::prelude::*;

/// End-anchoring window: this many bases (or 0.5% of the unitig) from
/// either unitig end.
const ANCHOR_WINDOW: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlapAnchor {
    Irrelevant,
    Left,
    Right,
}

/// The two per-side shortlists of longest overlaps kept for one unitig.
#[derive(Default)]
struct OverlapSideVecs {
    left: Vec<Overlap>,
    right: Vec<Overlap>,
}

impl OverlapSideVecs {
    fn add(&mut self, unitig_len: usize, o: Overlap) {
        let side = if (o.lhs_begin as usize) < unitig_len / 2 {
            &mut self.left
        } else {
            &mut self.right
        };
        let pos = side
            .iter()
            .position(|val| val.length() < o.length())
            .unwrap_or(side.len());
        side.insert(pos, o);
        side.truncate(MAX_GREEDY_OVLP);
    }

    fn merged(self) -> Vec<Overlap> {
        let mut dst = self.left;
        dst.extend(self.right);
        dst
    }
}

pub struct GreedyAssembler {
    k: usize,
    w: usize,
}

impl GreedyAssembler {
    pub fn new(k: usize, w: usize) -> Self {
        Self { k, w }
    }

    /// Overlaps anchored at a unitig end are the only ones that can extend
    /// it; everything else is noise here.
    fn anchor(&self, o: &Overlap, sequences: &[Sequence], n_unitigs: usize) -> OverlapAnchor {
        let lhs_len = sequences[o.lhs_id as usize].data.len() as u32;
        let rhs_len = sequences[o.rhs_id as usize].data.len() as u32;
        if !overlap::kind_with_lengths(o, lhs_len, rhs_len).is_dovetail() {
            return OverlapAnchor::Irrelevant;
        }

        // unitigs sit first in the id space
        let unitig_id = o.lhs_id.min(o.rhs_id);
        if unitig_id as usize >= n_unitigs {
            return OverlapAnchor::Irrelevant;
        }
        let unitig_len = sequences[unitig_id as usize].data.len();

        let window = ((unitig_len as f64 * 0.005) as usize)
            .max(ANCHOR_WINDOW)
            .min(unitig_len);
        let left_delim = window as u32;
        let right_delim = unitig_len.saturating_sub(window) as u32;

        let (begin, end) = if o.lhs_id < o.rhs_id {
            (o.lhs_begin, o.lhs_end)
        } else {
            (o.rhs_begin, o.rhs_end)
        };

        if begin <= left_delim && end <= left_delim {
            return OverlapAnchor::Left;
        }
        if begin >= right_delim && end >= right_delim {
            return OverlapAnchor::Right;
        }
        OverlapAnchor::Irrelevant
    }

    /// Build the unitig-seeded graph. Returns the number of unitigs; their
    /// node pairs occupy the first `2 * n` ids.
    pub fn construct(
        &self,
        graph: &mut AssemblyGraph,
        mut sequences: Vec<Sequence>,
    ) -> Result<usize> {
        let n_unitigs = sequences.len();

        let mut fillers = loader::load_fillers()?;
        fillers.retain(|seq| seq.data.len() <= FILLER_LEN_LIM);
        loader::trim_sequences(&mut fillers);
        loader::merge_sequences(&mut sequences, &mut fillers);
        normalize_ids(&mut sequences);
        info!(
            "assembling {} unitigs with {} fillers",
            n_unitigs,
            sequences.len() - n_unitigs
        );

        let mut engine = MinimizerEngine::new(self.k, self.w);

        // pass one: which fillers anchor to a unitig end at all
        {
            let unitig_refs: Vec<&Sequence> = sequences[..n_unitigs].iter().collect();
            engine.minimize(&unitig_refs);

            let mut relevant: AHashSet<u32> = AHashSet::new();
            for (j, i) in batches(&sequences, n_unitigs, sequences.len(), OVLP_BATCH_LIM) {
                let produced: Vec<Vec<Overlap>> = sequences[j..i]
                    .par_iter()
                    .map(|seq| engine.map(seq, true, false, true))
                    .collect();
                for found in produced {
                    for o in found {
                        if self.anchor(&o, &sequences, n_unitigs) != OverlapAnchor::Irrelevant {
                            relevant.insert(o.lhs_id);
                        }
                    }
                }
            }

            sequences.retain(|seq| (seq.id as usize) < n_unitigs || relevant.contains(&seq.id));
            normalize_ids(&mut sequences);
            info!("kept {} relevant fillers", sequences.len() - n_unitigs);
        }

        // pass two: unitig-filler and filler-filler overlaps
        let mut unitig_overlaps: Vec<OverlapSideVecs> = Vec::new();
        unitig_overlaps.resize_with(n_unitigs, OverlapSideVecs::default);
        let mut overlaps: Vec<Vec<Overlap>> = vec![Vec::new(); sequences.len()];

        for (j, i) in batches(&sequences, 0, sequences.len(), SEQS_BATCH_LIM) {
            let batch: Vec<&Sequence> = sequences[j..i].iter().collect();
            engine.minimize(&batch);
            info!("minimized {} - {} / {}", j, i, sequences.len());

            if i <= n_unitigs {
                continue;
            }
            for (qj, qi) in batches(&sequences, j, i, OVLP_BATCH_LIM) {
                let produced: Vec<Vec<Overlap>> = sequences[qj..qi]
                    .par_iter()
                    .map(|seq| engine.map(seq, true, true, true))
                    .collect();
                for found in produced {
                    for mut o in found {
                        let lhs_len = sequences[o.lhs_id as usize].data.len() as u32;
                        let rhs_len = sequences[o.rhs_id as usize].data.len() as u32;
                        o.score = overlap::kind_with_lengths(&o, lhs_len, rhs_len) as u32;
                        if !(OverlapKind::LhsToRhs as u32..=OverlapKind::RhsToLhs as u32)
                            .contains(&o.score)
                        {
                            continue;
                        }

                        if (o.lhs_id as usize) < n_unitigs {
                            unitig_overlaps[o.lhs_id as usize].add(lhs_len as usize, o);
                        } else if (o.rhs_id as usize) < n_unitigs {
                            unitig_overlaps[o.rhs_id as usize]
                                .add(rhs_len as usize, reversed_dovetail(&o));
                        } else {
                            overlaps[o.lhs_id as usize].push(o);
                            overlaps[o.rhs_id as usize].push(reversed_dovetail(&o));
                        }
                    }
                }
            }
            info!("mapped sequences {} - {}", j, i);
        }

        for (i, side_vecs) in unitig_overlaps.into_iter().enumerate() {
            overlaps[i] = side_vecs.merged();
        }

        // expand the graph outward from the unitigs, breadth first
        let mut node_indices: AHashMap<u32, u32> = AHashMap::new();
        let mut wired: AHashSet<(u32, u32)> = AHashSet::new();
        let mut segments: std::collections::VecDeque<u32> = std::collections::VecDeque::new();

        for i in 0..n_unitigs as u32 {
            let node = graph.add_node_pair(
                &sequences[i as usize].name.clone(),
                sequences[i as usize].data.clone(),
            );
            node_indices.insert(i, node);
        }
        for i in 0..n_unitigs as u32 {
            for o in overlaps[i as usize].clone() {
                self.construction_step(
                    graph,
                    &sequences,
                    &o,
                    &mut node_indices,
                    &mut wired,
                    &mut segments,
                );
            }
        }
        while let Some(segment) = segments.pop_front() {
            for o in overlaps[segment as usize].clone() {
                self.construction_step(
                    graph,
                    &sequences,
                    &o,
                    &mut node_indices,
                    &mut wired,
                    &mut segments,
                );
            }
        }

        info!(
            "greedy graph holds {} nodes and {} edges",
            graph.node_ids().len(),
            graph.edge_ids().len()
        );
        Ok(n_unitigs)
    }

    fn construction_step(
        &self,
        graph: &mut AssemblyGraph,
        sequences: &[Sequence],
        o: &Overlap,
        node_indices: &mut AHashMap<u32, u32>,
        wired: &mut AHashSet<(u32, u32)>,
        segments: &mut std::collections::VecDeque<u32>,
    ) {
        if !node_indices.contains_key(&o.rhs_id) {
            let node = graph.add_node_pair(
                &sequences[o.rhs_id as usize].name.clone(),
                sequences[o.rhs_id as usize].data.clone(),
            );
            node_indices.insert(o.rhs_id, node);
            segments.push_back(o.rhs_id);
        }

        let key = (o.lhs_id.min(o.rhs_id), o.lhs_id.max(o.rhs_id));
        if !wired.insert(key) {
            return;
        }

        let mut tail = node_indices[&o.lhs_id];
        let mut head = node_indices[&o.rhs_id] + (1 - o.strand as u32);

        let mut length = o.lhs_begin as i64 - o.rhs_begin as i64;
        let mut length_pair = o.lhs_end as i64 - o.rhs_end as i64;

        if o.score == OverlapKind::RhsToLhs as u32 {
            std::mem::swap(&mut tail, &mut head);
            length = -length;
            length_pair = -length_pair;
        }

        graph.add_edge_pair(tail, head, length as u32, length_pair as u32);
    }

    /// Greedily claim one extension path per unitig and prune every edge
    /// not chosen along the way.
    pub fn assemble(&self, graph: &mut AssemblyGraph, n_expected: usize) {
        // longest-overlap edges first at every node
        for i in 0..graph.nodes.len() as u32 {
            if graph.nodes[i as usize].is_none() {
                continue;
            }
            let mut inedges = graph.node(i).inedges.clone();
            let mut outedges = graph.node(i).outedges.clone();
            inedges.sort_by(|&a, &b| graph.edge(b).length.cmp(&graph.edge(a).length));
            outedges.sort_by(|&a, &b| graph.edge(b).length.cmp(&graph.edge(a).length));
            graph.node_mut(i).inedges = inedges;
            graph.node_mut(i).outedges = outedges;
        }

        let mut valid_nodes: AHashSet<u32> = AHashSet::new();
        for i in (0..n_expected as u32 * 2).step_by(2) {
            let mut marked_edges: AHashSet<u32> = AHashSet::new();
            let found = self.expand(graph, i, true, &mut valid_nodes, &mut marked_edges)
                || self.expand(graph, i, false, &mut valid_nodes, &mut marked_edges);
            if found {
                info!("found extension path from {}", graph.node(i).name);
                graph.remove_edges(&marked_edges, false);
            }
        }
    }

    fn expand(
        &self,
        graph: &AssemblyGraph,
        start: u32,
        left: bool,
        valid_nodes: &mut AHashSet<u32>,
        marked_edges: &mut AHashSet<u32>,
    ) -> bool {
        let mut dfs_visited: AHashSet<u32> = AHashSet::new();
        if self.expand_from(graph, start, start, left, valid_nodes, &mut dfs_visited, marked_edges)
        {
            valid_nodes.insert(start);
            return true;
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_from(
        &self,
        graph: &AssemblyGraph,
        start: u32,
        current: u32,
        left: bool,
        valid_nodes: &mut AHashSet<u32>,
        dfs_visited: &mut AHashSet<u32>,
        marked_edges: &mut AHashSet<u32>,
    ) -> bool {
        dfs_visited.insert(current);

        let edges = if left {
            graph.node(current).inedges.clone()
        } else {
            graph.node(current).outedges.clone()
        };
        for &e in &edges {
            let next = if left {
                graph.edge(e).tail
            } else {
                graph.edge(e).head
            };
            let reaches = next == start
                || (!valid_nodes.contains(&next)
                    && !dfs_visited.contains(&next)
                    && self.expand_from(
                        graph,
                        start,
                        next,
                        left,
                        valid_nodes,
                        dfs_visited,
                        marked_edges,
                    ));
            if reaches {
                valid_nodes.insert(next);
                for &other in &edges {
                    if other != e {
                        marked_edges.insert(other);
                        marked_edges.insert(other ^ 1);
                    }
                }
                return true;
            }
        }
        false
    }
}

/// Swap sides of a dovetail overlap, flipping its direction tag with it.
fn reversed_dovetail(o: &Overlap) -> Overlap {
    let mut rev = o.reverse();
    rev.score = if o.score == OverlapKind::LhsToRhs as u32 {
        OverlapKind::RhsToLhs as u32
    } else {
        OverlapKind::LhsToRhs as u32
    };
    rev
}

/// Chunk `[begin, end)` of `sequences` under `limit` total bases.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn overlap(
        lhs: (u32, u32, u32),
        rhs: (u32, u32, u32),
        score: u32,
        strand: bool,
    ) -> Overlap {
        Overlap {
            lhs_id: lhs.0,
            lhs_begin: lhs.1,
            lhs_end: lhs.2,
            rhs_id: rhs.0,
            rhs_begin: rhs.1,
            rhs_end: rhs.2,
            score,
            strand,
        }
    }

    #[test]
    fn test_side_vecs_cap_and_order() {
        let mut sides = OverlapSideVecs::default();
        for i in 0..12u32 {
            // all on the left half, growing lengths
            sides.add(
                10000,
                overlap((0, 0, 100 + i * 10), (1 + i, 0, 100 + i * 10), 0, true),
            );
        }
        assert_eq!(sides.left.len(), MAX_GREEDY_OVLP);
        assert!(sides.right.is_empty());
        // longest first, shortest four were displaced
        assert_eq!(sides.left[0].length(), 210);
        assert_eq!(sides.left[MAX_GREEDY_OVLP - 1].length(), 140);
    }

    #[test]
    fn test_side_vecs_split_by_position() {
        let mut sides = OverlapSideVecs::default();
        sides.add(10000, overlap((0, 100, 2000), (1, 0, 1900), 0, true));
        sides.add(10000, overlap((0, 8000, 9900), (2, 0, 1900), 0, true));
        assert_eq!(sides.left.len(), 1);
        assert_eq!(sides.right.len(), 1);
        assert_eq!(sides.merged().len(), 2);
    }

    #[test]
    fn test_anchor_classification() {
        let assembler = GreedyAssembler::new(15, 5);
        let sequences = vec![
            Sequence::new(0, "utg", "A".repeat(100000)),
            Sequence::new(1, "filler", "A".repeat(10000)),
        ];

        // dovetail at the very start of the unitig
        let left = overlap((1, 6000, 10000), (0, 0, 4000), 0, true);
        assert_eq!(assembler.anchor(&left, &sequences, 1), OverlapAnchor::Left);

        // dovetail at the very end
        let right = overlap((1, 0, 4000), (0, 96000, 100000), 0, true);
        assert_eq!(assembler.anchor(&right, &sequences, 1), OverlapAnchor::Right);

        // an internal match anchors nowhere
        let internal = overlap((1, 2000, 6000), (0, 50000, 54000), 0, true);
        assert_eq!(
            assembler.anchor(&internal, &sequences, 1),
            OverlapAnchor::Irrelevant
        );
    }

    #[test]
    fn test_expand_claims_cycle_and_prunes_alternatives() {
        let assembler = GreedyAssembler::new(15, 5);
        let mut graph = AssemblyGraph::new();
        let a = graph.add_node_pair("a", "ACGT".repeat(100));
        let b = graph.add_node_pair("b", "ACGT".repeat(100));
        let c = graph.add_node_pair("c", "ACGT".repeat(100));

        // a cycles back through b; the spur towards c competes at a
        graph.add_edge_pair(a, b, 100, 100); // edges 0, 1
        graph.add_edge_pair(b, a, 100, 100); // edges 2, 3
        graph.add_edge_pair(a, c, 100, 100); // edges 4, 5

        let mut valid = AHashSet::new();
        let mut marked = AHashSet::new();
        assert!(assembler.expand(&graph, a, false, &mut valid, &mut marked));
        assert!(valid.contains(&a) && valid.contains(&b));
        // the competing egress and its pair were pruned
        assert!(marked.contains(&4) && marked.contains(&5));
        assert!(!marked.contains(&0));
    }

    #[test]
    fn test_expand_fails_without_cycle() {
        let assembler = GreedyAssembler::new(15, 5);
        let mut graph = AssemblyGraph::new();
        let a = graph.add_node_pair("a", "ACGT".repeat(100));
        let b = graph.add_node_pair("b", "ACGT".repeat(100));
        graph.add_edge_pair(a, b, 100, 100);

        let mut valid = AHashSet::new();
        let mut marked = AHashSet::new();
        assert!(!assembler.expand(&graph, a, false, &mut valid, &mut marked));
        assert!(marked.is_empty());
    }
}
