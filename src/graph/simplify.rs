// src/graph/simplify.rs
//! Topology-driven simplification passes over the assembly graph.
//!
//! Order matters: transitive reduction first, then alternating tip and
//! bubble removal to a fixpoint, then layout-guided long-edge removal.

use ahash::AHashSet;

use crate::graph::assembly::AssemblyGraph;
use crate::graph::layout::create_force_directed_layout;
use crate::io::sequence::Sequence;
use crate::kmer::minimizer::MinimizerEngine;

/// Dead-end chains with at most this many collapsed reads are tips.
const TIP_READ_LIM: u32 = 5;

/// Bubble search gives up past this many hops from the fork.
const BUBBLE_HOP_LIM: u32 = 3400;

/// Relative length tolerance when a two-hop path explains a direct edge.
const TRANSITIVE_EPS: f64 = 0.12;

pub struct GraphSimplifier {
    k: usize,
    w: usize,
    layout_seed: u64,
}

impl GraphSimplifier {
    pub fn new(k: usize, w: usize) -> Self {
        Self {
            k,
            w,
            layout_seed: 21,
        }
    }

    /// Drop every edge whose span is explained, within tolerance, by a
    /// two-hop path; removed links are remembered in both endpoints'
    /// `transitive` sets for the layout.
    pub fn remove_transitive_edges(&self, graph: &mut AssemblyGraph) -> u32 {
        let is_comparable = |a: f64, b: f64| -> bool {
            (a >= b * (1.0 - TRANSITIVE_EPS) && a <= b * (1.0 + TRANSITIVE_EPS))
                || (b >= a * (1.0 - TRANSITIVE_EPS) && b <= a * (1.0 + TRANSITIVE_EPS))
        };

        let mut candidate: Vec<Option<u32>> = vec![None; graph.nodes.len()];
        let mut marked_edges: AHashSet<u32> = AHashSet::new();

        for it in graph.node_ids() {
            let outedges = graph.node(it).outedges.clone();
            for &jt in &outedges {
                candidate[graph.edge(jt).head as usize] = Some(jt);
            }
            for &jt in &outedges {
                let mid = graph.edge(jt).head;
                for &kt in &graph.node(mid).outedges {
                    let far = graph.edge(kt).head;
                    if let Some(direct) = candidate[far as usize] {
                        if is_comparable(
                            (graph.edge(jt).length + graph.edge(kt).length) as f64,
                            graph.edge(direct).length as f64,
                        ) {
                            marked_edges.insert(direct);
                            marked_edges.insert(direct ^ 1);
                        }
                    }
                }
            }
            for &jt in &outedges {
                candidate[graph.edge(jt).head as usize] = None;
            }
        }

        // remember the removed links for the force-directed layout
        for &i in &marked_edges {
            if i & 1 == 1 {
                let lhs = graph.edge(i).tail & !1;
                let rhs = graph.edge(i).head & !1;
                graph.node_mut(lhs).transitive.insert(rhs);
                graph.node_mut(rhs).transitive.insert(lhs);
            }
        }

        graph.remove_edges(&marked_edges, false);
        marked_edges.len() as u32 / 2
    }

    /// Excise short dead-end chains hanging off junctions.
    pub fn remove_tips(&self, graph: &mut AssemblyGraph) -> u32 {
        let mut num_tips = 0u32;
        let mut is_visited = vec![false; graph.nodes.len()];

        for it in graph.node_ids() {
            if graph.nodes[it as usize].is_none()
                || is_visited[it as usize]
                || !graph.node(it).is_tip()
            {
                continue;
            }

            let mut is_circular = false;
            let mut num_sequences = 0u32;

            let mut end = it;
            while !graph.node(end).is_junction() {
                num_sequences += graph.node(end).count;
                is_visited[end as usize] = true;
                is_visited[(end ^ 1) as usize] = true;
                if graph.node(end).outdegree() == 0 {
                    break;
                }
                let head = graph.edge(graph.node(end).outedges[0]).head;
                if graph.node(head).is_junction() {
                    break;
                }
                end = head;
                if end == it {
                    is_circular = true;
                    break;
                }
            }

            if is_circular || graph.node(end).outdegree() == 0 || num_sequences > TIP_READ_LIM {
                continue;
            }

            let mut marked_edges: AHashSet<u32> = AHashSet::new();
            for &jt in &graph.node(end).outedges {
                if graph.node(graph.edge(jt).head).indegree() > 1 {
                    marked_edges.insert(jt);
                    marked_edges.insert(jt ^ 1);
                }
            }
            if marked_edges.len() / 2 == graph.node(end).outdegree() {
                // the whole chain goes
                let mut begin = it;
                while begin != end {
                    let outedge = graph.node(begin).outedges[0];
                    marked_edges.insert(outedge);
                    marked_edges.insert(outedge ^ 1);
                    begin = graph.edge(outedge).head;
                }
                num_tips += 1;
            }
            graph.remove_edges(&marked_edges, true);
        }

        num_tips
    }

    /// Detect and pop bubbles: two short paths sharing only their
    /// endpoints, kept apart by sequencing error or heterozygosity. The
    /// arm carrying fewer reads loses.
    pub fn remove_bubbles(&self, graph: &mut AssemblyGraph) -> u32 {
        let mut n_nodes_to: Vec<u32> = vec![0; graph.nodes.len()];
        let mut predecessor: Vec<Option<u32>> = vec![None; graph.nodes.len()];

        let path_extract = |predecessor: &[Option<u32>], begin: u32, end: u32| -> Vec<u32> {
            let mut dst = Vec::new();
            let mut it = end;
            while it != begin {
                dst.push(it);
                it = predecessor[it as usize].expect("broken predecessor chain");
            }
            dst.push(begin);
            dst.reverse();
            dst
        };

        let mut num_bubbles = 0u32;
        for it in graph.node_ids() {
            if graph.nodes[it as usize].is_none() || graph.node(it).outdegree() < 2 {
                continue;
            }

            // BFS until some node is reached twice
            let begin = it;
            let mut end: Option<u32> = None;
            let mut other_end: Option<u32> = None;
            let mut que = std::collections::VecDeque::from([begin]);
            let mut visited: Vec<u32> = vec![begin];
            'bfs: while let Some(jt) = que.pop_front() {
                for &kt in &graph.node(jt).outedges {
                    let head = graph.edge(kt).head;
                    if head == begin {
                        continue; // cycle
                    }
                    if n_nodes_to[jt as usize] > BUBBLE_HOP_LIM {
                        continue; // out of reach
                    }
                    n_nodes_to[head as usize] = n_nodes_to[jt as usize] + 1;
                    visited.push(head);
                    que.push_back(head);

                    if predecessor[head as usize].is_some() {
                        end = Some(head);
                        other_end = Some(jt);
                        break 'bfs;
                    }
                    predecessor[head as usize] = Some(jt);
                }
            }

            let mut marked_edges: AHashSet<u32> = AHashSet::new();
            if let (Some(end), Some(other_end)) = (end, other_end) {
                let lhs = path_extract(&predecessor, begin, end);
                let mut rhs = path_extract(&predecessor, begin, other_end);
                rhs.push(end);

                if self.is_bubble(graph, &lhs, &rhs) {
                    let count = |path: &[u32]| -> u32 {
                        path.iter().map(|&n| graph.node(n).count).sum()
                    };
                    let (first, second) = if count(&lhs) > count(&rhs) {
                        (rhs, lhs)
                    } else {
                        (lhs, rhs)
                    };
                    let mut removable = graph.find_removable_edges(&first);
                    if removable.is_empty() {
                        removable = graph.find_removable_edges(&second);
                    }
                    marked_edges.extend(removable);
                }
            }

            for &jt in &visited {
                n_nodes_to[jt as usize] = 0;
                predecessor[jt as usize] = None;
            }

            if !marked_edges.is_empty() {
                num_bubbles += 1;
            }
            graph.remove_edges(&marked_edges, true);
        }

        num_bubbles
    }

    /// Paths form a bubble when they are node-disjoint apart from their
    /// endpoints, never touch a node and its strand twin, and are either
    /// both branch-free or spell near-identical sequences.
    fn is_bubble(&self, graph: &AssemblyGraph, lhs: &[u32], rhs: &[u32]) -> bool {
        if lhs.is_empty() || rhs.is_empty() {
            return false;
        }

        let mut union: AHashSet<u32> = AHashSet::new();
        union.extend(lhs.iter().copied());
        union.extend(rhs.iter().copied());
        if union.len() != lhs.len() + rhs.len() - 2 {
            return false;
        }
        if lhs.iter().any(|&n| union.contains(&(n ^ 1))) {
            return false;
        }

        let branch_free = |path: &[u32]| -> bool {
            path.iter()
                .skip(1)
                .take(path.len().saturating_sub(2))
                .all(|&n| !graph.node(n).is_junction())
        };
        if branch_free(lhs) && branch_free(rhs) {
            return true;
        }

        let path_sequence = |path: &[u32]| -> String {
            let mut data = String::new();
            for window in path.windows(2) {
                if let Some(e) = graph.find_edge(window[0], window[1]) {
                    data.push_str(graph.edge_label(e));
                }
            }
            data.push_str(&graph.node(*path.last().unwrap()).data);
            data
        };

        let ls = path_sequence(lhs);
        let rs = path_sequence(rhs);
        let min_len = ls.len().min(rs.len());
        let max_len = ls.len().max(rs.len());
        if (min_len as f64) < max_len as f64 * 0.8 {
            return false;
        }

        let engine = MinimizerEngine::new(self.k, self.w);
        let matches = engine.map_pair(
            &Sequence::new(0, "lhs", ls),
            &Sequence::new(1, "rhs", rs),
        );
        matches as f64 > 0.5 * min_len as f64
    }

    /// Alternate layout, long-edge pruning at junctions and tip cleanup.
    pub fn remove_long_edges(&mut self, graph: &mut AssemblyGraph, num_rounds: u32) -> u32 {
        let mut num_long_edges = 0u32;

        for _ in 0..num_rounds {
            self.layout_seed <<= 1;
            create_force_directed_layout(graph, self.layout_seed);

            let mut marked_edges: AHashSet<u32> = AHashSet::new();
            for it in graph.node_ids() {
                if graph.nodes[it as usize].is_none() || graph.node(it).outdegree() < 2 {
                    continue;
                }
                let outedges = &graph.node(it).outedges;
                for &jt in outedges {
                    for &kt in outedges {
                        if jt != kt && graph.edge(jt).weight * 2.0 < graph.edge(kt).weight {
                            marked_edges.insert(kt);
                            marked_edges.insert(kt ^ 1);
                        }
                    }
                }
            }
            graph.remove_edges(&marked_edges, false);
            num_long_edges += marked_edges.len() as u32 / 2;

            self.remove_tips(graph);
        }

        num_long_edges
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

    fn wire(graph: &mut AssemblyGraph, tail: u32, head: u32, length: u32, length_pair: u32) {
        graph.add_edge_pair(tail, head, length, length_pair);
    }

    fn node_pair(graph: &mut AssemblyGraph, name: &str, len: usize, state: &mut u64) -> u32 {
        let data = random_bases(len, state);
        graph.add_node_pair(name, data)
    }

    fn simplifier() -> GraphSimplifier {
        GraphSimplifier::new(15, 5)
    }

    #[test]
    fn test_transitive_reduction_triangle() {
        let mut state = 5u64;
        let mut graph = AssemblyGraph::new();
        let a = node_pair(&mut graph, "a", 5000, &mut state);
        let b = node_pair(&mut graph, "b", 5000, &mut state);
        let c = node_pair(&mut graph, "c", 5000, &mut state);

        wire(&mut graph, a, b, 2000, 2000);
        wire(&mut graph, b, c, 2000, 2000);
        // direct edge explained by the two-hop path (4000 within 12%)
        wire(&mut graph, a, c, 4100, 4100);

        let removed = simplifier().remove_transitive_edges(&mut graph);
        assert_eq!(removed, 1);
        assert!(graph.find_edge(a, c).is_none());
        assert!(graph.find_edge(a, b).is_some());
        assert!(graph.find_edge(b, c).is_some());
        // both endpoints remember the removed link
        assert!(graph.node(a).transitive.contains(&c));
        assert!(graph.node(c).transitive.contains(&a));
    }

    #[test]
    fn test_transitive_reduction_keeps_unexplained() {
        let mut state = 6u64;
        let mut graph = AssemblyGraph::new();
        let a = node_pair(&mut graph, "a", 5000, &mut state);
        let b = node_pair(&mut graph, "b", 5000, &mut state);
        let c = node_pair(&mut graph, "c", 5000, &mut state);

        wire(&mut graph, a, b, 2000, 2000);
        wire(&mut graph, b, c, 2000, 2000);
        // far outside the 12% tolerance
        wire(&mut graph, a, c, 6000, 6000);

        assert_eq!(simplifier().remove_transitive_edges(&mut graph), 0);
        assert!(graph.find_edge(a, c).is_some());
    }

    #[test]
    fn test_remove_tips() {
        let mut state = 7u64;
        let mut graph = AssemblyGraph::new();
        // main chain a -> b -> c -> d
        let a = node_pair(&mut graph, "a", 5000, &mut state);
        let b = node_pair(&mut graph, "b", 5000, &mut state);
        let c = node_pair(&mut graph, "c", 5000, &mut state);
        let d = node_pair(&mut graph, "d", 5000, &mut state);
        // 3-read dead end t0 -> t1 -> t2 joining at c
        let t0 = node_pair(&mut graph, "t0", 5000, &mut state);
        let t1 = node_pair(&mut graph, "t1", 5000, &mut state);
        let t2 = node_pair(&mut graph, "t2", 5000, &mut state);

        wire(&mut graph, a, b, 2000, 2000);
        wire(&mut graph, b, c, 2000, 2000);
        wire(&mut graph, c, d, 2000, 2000);
        wire(&mut graph, t0, t1, 2000, 2000);
        wire(&mut graph, t1, t2, 2000, 2000);
        wire(&mut graph, t2, c, 2000, 2000);

        // the upstream chain is heavy enough to survive
        graph.node_mut(a).count = 10;
        graph.node_mut(a ^ 1).count = 10;

        let num_tips = simplifier().remove_tips(&mut graph);
        assert_eq!(num_tips, 1);
        for n in [t0, t1, t2] {
            assert!(graph.nodes[n as usize].is_none());
        }
        // the main chain is intact
        assert!(graph.find_edge(b, c).is_some());
        assert!(graph.find_edge(c, d).is_some());
    }

    #[test]
    fn test_long_tip_kept() {
        let mut state = 8u64;
        let mut graph = AssemblyGraph::new();
        let a = node_pair(&mut graph, "a", 5000, &mut state);
        let b = node_pair(&mut graph, "b", 5000, &mut state);
        let c = node_pair(&mut graph, "c", 5000, &mut state);

        // 8-read dead end, too heavy to discard
        let mut tips = Vec::new();
        for i in 0..8 {
            tips.push(node_pair(&mut graph, &format!("t{}", i), 5000, &mut state));
        }
        wire(&mut graph, a, b, 2000, 2000);
        wire(&mut graph, b, c, 2000, 2000);
        for i in 0..tips.len() - 1 {
            wire(&mut graph, tips[i], tips[i + 1], 2000, 2000);
        }
        wire(&mut graph, *tips.last().unwrap(), b, 2000, 2000);

        graph.node_mut(a).count = 10;
        graph.node_mut(a ^ 1).count = 10;

        assert_eq!(simplifier().remove_tips(&mut graph), 0);
        assert!(graph.nodes[tips[0] as usize].is_some());
        let _ = c;
    }

    #[test]
    fn test_remove_bubbles_branch_free() {
        let mut state = 9u64;
        let mut graph = AssemblyGraph::new();
        let src = node_pair(&mut graph, "src", 5000, &mut state);
        let up = node_pair(&mut graph, "up", 5000, &mut state);
        let down0 = node_pair(&mut graph, "down0", 5000, &mut state);
        let down1 = node_pair(&mut graph, "down1", 5000, &mut state);
        let sink = node_pair(&mut graph, "sink", 5000, &mut state);

        // src forks into `up` and `down0 -> down1`, both rejoin at sink
        wire(&mut graph, src, up, 2000, 2000);
        wire(&mut graph, up, sink, 2000, 2000);
        wire(&mut graph, src, down0, 2000, 2000);
        wire(&mut graph, down0, down1, 2000, 2000);
        wire(&mut graph, down1, sink, 2000, 2000);

        // make the upper arm heavier so the lower one is removed
        graph.node_mut(up).count = 10;
        graph.node_mut(up ^ 1).count = 10;

        let num_bubbles = simplifier().remove_bubbles(&mut graph);
        assert_eq!(num_bubbles, 1);
        assert!(graph.find_edge(src, up).is_some());
        assert!(graph.find_edge(up, sink).is_some());
        // one junction egress survives per side
        assert_eq!(graph.node(src).outdegree(), 1);
        assert_eq!(graph.node(sink).indegree(), 1);
    }

    #[test]
    fn test_bubble_rejects_strand_twin_paths() {
        let mut state = 10u64;
        let mut graph = AssemblyGraph::new();
        let src = node_pair(&mut graph, "src", 5000, &mut state);
        let mid = node_pair(&mut graph, "mid", 5000, &mut state);
        let sink = node_pair(&mut graph, "sink", 5000, &mut state);

        let lhs = vec![src, mid, sink];
        let rhs = vec![src, mid ^ 1, sink];
        assert!(!simplifier().is_bubble(&graph, &lhs, &rhs));
    }

    #[test]
    fn test_bubble_similar_sequences() {
        let mut state = 12u64;
        let mut graph = AssemblyGraph::new();
        let shared = random_bases(4000, &mut state);

        let src = graph.add_node_pair("src", random_bases(5000, &mut state));
        // two arms spelling nearly the same bases
        let arm0 = graph.add_node_pair("arm0", shared.clone());
        let mut mutated = shared.into_bytes();
        for i in (0..mutated.len()).step_by(97) {
            mutated[i] = match mutated[i] {
                b'A' => b'C',
                b'C' => b'G',
                b'G' => b'T',
                _ => b'A',
            };
        }
        let arm1 = graph.add_node_pair("arm1", String::from_utf8(mutated).unwrap());
        let sink = graph.add_node_pair("sink", random_bases(5000, &mut state));
        let spur = graph.add_node_pair("spur", random_bases(5000, &mut state));

        wire(&mut graph, src, arm0, 2000, 2000);
        wire(&mut graph, arm0, sink, 2000, 2000);
        wire(&mut graph, src, arm1, 2000, 2000);
        wire(&mut graph, arm1, sink, 2000, 2000);
        // the spur makes arm0 a junction, forcing the sequence comparison
        wire(&mut graph, arm0, spur, 2000, 2000);

        let lhs = vec![src, arm0, sink];
        let rhs = vec![src, arm1, sink];
        assert!(simplifier().is_bubble(&graph, &lhs, &rhs));
    }
}
