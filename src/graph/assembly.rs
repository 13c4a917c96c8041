// src/graph/assembly.rs
//! Bidirected assembly string graph.
//!
//! Every node and every edge exists twice, once per strand, and the two
//! twins are allocated together so that `pair_id = id ^ 1`. Arena storage
//! (`Vec<Option<_>>` indexed by id) keeps removal cheap and serialization
//! trivial; the dual invariants are
//! `pair(pair(e)) == e`, `pair(e).tail == pair(e.head)` and
//! `pair(n).data == reverse_complement(n.data)`.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::io::sequence::{reverse_complement, Sequence};
use crate::overlap::{self, Overlap, OverlapKind};
use crate::pile::Pile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub name: String,
    pub data: String,
    /// Source reads collapsed into this node.
    pub count: u32,
    pub is_circular: bool,
    pub is_polished: bool,
    pub is_unitig: bool,
    /// Canonical ids of nodes once joined to this one by transitive edges.
    pub transitive: BTreeSet<u32>,
    pub inedges: Vec<u32>,
    pub outedges: Vec<u32>,
}

impl Node {
    pub fn pair_id(&self) -> u32 {
        self.id ^ 1
    }

    pub fn is_rc(&self) -> bool {
        self.id & 1 == 1
    }

    pub fn indegree(&self) -> usize {
        self.inedges.len()
    }

    pub fn outdegree(&self) -> usize {
        self.outedges.len()
    }

    pub fn is_junction(&self) -> bool {
        self.outdegree() > 1 || self.indegree() > 1
    }

    pub fn is_tip(&self) -> bool {
        self.outdegree() > 0 && self.indegree() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: u32,
    /// Overhang on the tail side: `tail.data.len() - overlap_length`.
    pub length: u32,
    /// Layout-derived distance between endpoints.
    pub weight: f64,
    pub tail: u32,
    pub head: u32,
}

impl Edge {
    pub fn pair_id(&self) -> u32 {
        self.id ^ 1
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyGraph {
    pub nodes: Vec<Option<Node>>,
    pub edges: Vec<Option<Edge>>,
}

impl AssemblyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
    }

    pub fn node(&self, id: u32) -> &Node {
        self.nodes[id as usize].as_ref().expect("dangling node id")
    }

    pub fn node_mut(&mut self, id: u32) -> &mut Node {
        self.nodes[id as usize].as_mut().expect("dangling node id")
    }

    pub fn edge(&self, id: u32) -> &Edge {
        self.edges[id as usize].as_ref().expect("dangling edge id")
    }

    pub fn edge_mut(&mut self, id: u32) -> &mut Edge {
        self.edges[id as usize].as_mut().expect("dangling edge id")
    }

    /// Ids of live nodes in allocation order.
    pub fn node_ids(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| i as u32))
            .collect()
    }

    pub fn edge_ids(&self) -> Vec<u32> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|_| i as u32))
            .collect()
    }

    /// The bases an edge contributes when walking tail -> head.
    pub fn edge_label(&self, id: u32) -> &str {
        let edge = self.edge(id);
        &self.node(edge.tail).data[..edge.length as usize]
    }

    /// Allocate a forward/reverse-complement node pair; returns the
    /// principal (even) id.
    pub fn add_node_pair(&mut self, name: &str, data: String) -> u32 {
        let id = self.nodes.len() as u32;
        let rc_data = reverse_complement(&data);
        self.nodes.push(Some(Node {
            id,
            name: name.to_string(),
            data,
            count: 1,
            is_circular: false,
            is_polished: false,
            is_unitig: false,
            transitive: BTreeSet::new(),
            inedges: Vec::new(),
            outedges: Vec::new(),
        }));
        self.nodes.push(Some(Node {
            id: id + 1,
            name: name.to_string(),
            data: rc_data,
            count: 1,
            is_circular: false,
            is_polished: false,
            is_unitig: false,
            transitive: BTreeSet::new(),
            inedges: Vec::new(),
            outedges: Vec::new(),
        }));
        id
    }

    fn add_edge(&mut self, tail: u32, head: u32, length: u32) -> u32 {
        let id = self.edges.len() as u32;
        self.edges.push(Some(Edge {
            id,
            length,
            weight: 0.0,
            tail,
            head,
        }));
        self.node_mut(tail).outedges.push(id);
        self.node_mut(head).inedges.push(id);
        id
    }

    /// Allocate an edge and its strand twin
    /// (`pair.tail == pair(head)`, `pair.head == pair(tail)`).
    pub fn add_edge_pair(&mut self, tail: u32, head: u32, length: u32, length_pair: u32) -> u32 {
        let id = self.add_edge(tail, head, length);
        self.add_edge(head ^ 1, tail ^ 1, length_pair);
        id
    }

    /// Build the graph from trimmed sequences and finalized dovetail
    /// overlaps: a node pair per valid pile, an edge pair per overlap.
    pub fn construct(
        &mut self,
        piles: &[Pile],
        sequences: &[Sequence],
        overlaps: &mut Vec<Overlap>,
    ) {
        let mut sequence_to_node: Vec<i64> = vec![-1; piles.len()];
        for pile in piles {
            if pile.is_invalid() {
                continue;
            }
            let seq = &sequences[pile.id() as usize];
            let data = seq.data[pile.begin() as usize..pile.end() as usize].to_string();
            sequence_to_node[pile.id() as usize] = self.nodes.len() as i64;
            let id = self.add_node_pair(&seq.name, data);
            let count = 1 + pile.num_absorbed();
            self.node_mut(id).count = count;
            self.node_mut(id ^ 1).count = count;
        }

        for o in overlaps.iter_mut() {
            if piles[o.lhs_id as usize].is_invalid() || piles[o.rhs_id as usize].is_invalid() {
                continue;
            }
            if !overlap::finalize(o, piles) {
                continue;
            }

            let mut tail = sequence_to_node[o.lhs_id as usize] as u32;
            let mut head = sequence_to_node[o.rhs_id as usize] as u32 + (1 - o.strand as u32);

            let mut length = o.lhs_begin as i64 - o.rhs_begin as i64;
            let mut length_pair = (piles[o.rhs_id as usize].len() as i64 - o.rhs_end as i64)
                - (piles[o.lhs_id as usize].len() as i64 - o.lhs_end as i64);

            if o.score == OverlapKind::RhsToLhs as u32 {
                std::mem::swap(&mut tail, &mut head);
                length = -length;
                length_pair = -length_pair;
            }

            self.add_edge_pair(tail, head, length as u32, length_pair as u32);
        }
        overlaps.clear();
    }

    /// Detach the given edges; with `remove_nodes` also drop endpoints left
    /// without any edge.
    pub fn remove_edges(&mut self, indices: &AHashSet<u32>, remove_nodes: bool) {
        let mut node_indices: AHashSet<u32> = AHashSet::new();
        for &i in indices {
            let (tail, head) = match &self.edges[i as usize] {
                Some(edge) => (edge.tail, edge.head),
                None => continue,
            };
            if remove_nodes {
                node_indices.insert(tail);
                node_indices.insert(head);
            }
            self.node_mut(tail).outedges.retain(|&e| e != i);
            self.node_mut(head).inedges.retain(|&e| e != i);
        }
        if remove_nodes {
            for i in node_indices {
                let node = self.node(i);
                if node.outdegree() == 0 && node.indegree() == 0 {
                    self.nodes[i as usize] = None;
                }
            }
        }
        for &i in indices {
            self.edges[i as usize] = None;
        }
    }

    pub fn find_edge(&self, tail: u32, head: u32) -> Option<u32> {
        self.node(tail)
            .outedges
            .iter()
            .copied()
            .find(|&e| self.edge(e).head == head)
    }

    /// Collapse every maximal non-junction chain into a unitig node pair.
    ///
    /// Chains shorter than `2 * epsilon + 2` are left alone; non-circular
    /// chains give up `epsilon` nodes at each end so flanking junctions
    /// keep anchors. Returns the number of unitig pairs created.
    pub fn create_unitigs(&mut self, epsilon: u32) -> u32 {
        let mut marked_edges: AHashSet<u32> = AHashSet::new();
        let mut node_updates: Vec<u32> = vec![0; self.nodes.len()];
        let mut is_visited: Vec<bool> = vec![false; self.nodes.len()];
        let mut num_unitigs = 0u32;

        for it in 0..self.nodes.len() as u32 {
            if self.nodes[it as usize].is_none()
                || is_visited[it as usize]
                || self.node(it).is_junction()
            {
                continue;
            }

            let mut extension = 1u32;
            let mut is_circular = false;

            let mut begin = it;
            while !self.node(begin).is_junction() {
                is_visited[begin as usize] = true;
                is_visited[(begin ^ 1) as usize] = true;
                if self.node(begin).indegree() == 0 {
                    break;
                }
                let tail = self.edge(self.node(begin).inedges[0]).tail;
                if self.node(tail).is_junction() {
                    break;
                }
                begin = tail;
                extension += 1;
                if begin == it {
                    is_circular = true;
                    break;
                }
            }

            let mut end = it;
            while !self.node(end).is_junction() {
                is_visited[end as usize] = true;
                is_visited[(end ^ 1) as usize] = true;
                if self.node(end).outdegree() == 0 {
                    break;
                }
                let head = self.edge(self.node(end).outedges[0]).head;
                if self.node(head).is_junction() {
                    break;
                }
                end = head;
                extension += 1;
                if end == it {
                    is_circular = true;
                    break;
                }
            }

            if !is_circular && begin == end {
                continue;
            }
            if !is_circular && extension < 2 * epsilon + 2 {
                continue;
            }

            if begin != end {
                // pull both ends away from the junctions
                for _ in 0..epsilon {
                    begin = self.edge(self.node(begin).outedges[0]).head;
                }
                for _ in 0..epsilon {
                    end = self.edge(self.node(end).inedges[0]).tail;
                }
            }

            let unitig_id = self.synthesize_unitig(begin, end, is_circular);
            num_unitigs += 1;

            if begin != end {
                if self.node(begin).indegree() > 0 {
                    let inedge = self.node(begin).inedges[0];
                    let inedge_pair = inedge ^ 1;
                    marked_edges.insert(inedge);
                    marked_edges.insert(inedge_pair);

                    let tail = self.edge(inedge).tail;
                    let length = self.edge(inedge).length;
                    let pair_head = self.edge(inedge_pair).head;
                    let pair_length = self.edge(inedge_pair).length
                        + self.node(unitig_id ^ 1).data.len() as u32
                        - self.node(begin ^ 1).data.len() as u32;
                    self.add_edge_pair_raw(tail, unitig_id, length, unitig_id ^ 1, pair_head, pair_length);
                }
                if self.node(end).outdegree() > 0 {
                    let outedge = self.node(end).outedges[0];
                    let outedge_pair = outedge ^ 1;
                    marked_edges.insert(outedge);
                    marked_edges.insert(outedge_pair);

                    let head = self.edge(outedge).head;
                    let length = self.edge(outedge).length + self.node(unitig_id).data.len() as u32
                        - self.node(end).data.len() as u32;
                    let pair_tail = self.edge(outedge_pair).tail;
                    let pair_length = self.edge(outedge_pair).length;
                    self.add_edge_pair_raw(unitig_id, head, length, pair_tail, unitig_id ^ 1, pair_length);
                }
            }

            // retire the chain's own edges; remember who absorbed each node
            let mut jt = begin;
            loop {
                let outedge = self.node(jt).outedges[0];
                marked_edges.insert(outedge);
                marked_edges.insert(outedge ^ 1);

                node_updates[(jt & !1) as usize] = unitig_id;
                let absorbed: Vec<u32> =
                    self.node(jt & !1).transitive.iter().copied().collect();
                self.node_mut(unitig_id).transitive.extend(absorbed);

                jt = self.edge(outedge).head;
                if jt == end {
                    break;
                }
            }
        }

        self.remove_edges(&marked_edges, true);

        // retarget transitive annotations onto the unitigs that absorbed them
        for node in self.nodes.iter_mut().flatten() {
            if node.transitive.is_empty() {
                continue;
            }
            node.transitive = node
                .transitive
                .iter()
                .map(|&jt| {
                    let update = node_updates.get(jt as usize).copied().unwrap_or(0);
                    if update == 0 {
                        jt
                    } else {
                        update
                    }
                })
                .collect();
        }

        num_unitigs
    }

    /// Create the unitig node pair for the chain `begin ..= end`.
    fn synthesize_unitig(&mut self, begin: u32, end: u32, is_circular: bool) -> u32 {
        let mut data = String::new();
        let mut count = 0u32;

        let mut it = begin;
        loop {
            let outedge = self.node(it).outedges[0];
            data.push_str(self.edge_label(outedge));
            count += self.node(it).count;
            it = self.edge(outedge).head;
            if it == end {
                break;
            }
        }
        if begin != end {
            data.push_str(&self.node(end).data);
            count += self.node(end).count;
        }

        let id = self.nodes.len() as u32;
        let name = format!("{}{}", if is_circular { "Ctg" } else { "Utg" }, id);
        let rc_data = reverse_complement(&data);

        self.nodes.push(Some(Node {
            id,
            name: name.clone(),
            data,
            count,
            is_circular,
            is_polished: false,
            is_unitig: true,
            transitive: BTreeSet::new(),
            inedges: Vec::new(),
            outedges: Vec::new(),
        }));
        self.nodes.push(Some(Node {
            id: id + 1,
            name,
            data: rc_data,
            count,
            is_circular,
            is_polished: false,
            is_unitig: true,
            transitive: BTreeSet::new(),
            inedges: Vec::new(),
            outedges: Vec::new(),
        }));
        id
    }

    fn add_edge_pair_raw(
        &mut self,
        tail: u32,
        head: u32,
        length: u32,
        pair_tail: u32,
        pair_head: u32,
        pair_length: u32,
    ) {
        self.add_edge(tail, head, length);
        self.add_edge(pair_tail, pair_head, pair_length);
    }

    /// Extract canonical unitigs as sequences tagged with length, collapsed
    /// read count and circularity.
    pub fn get_unitigs(&mut self, drop_unpolished: bool) -> Vec<Sequence> {
        self.create_unitigs(0);

        // a lone surviving node that collapsed contained reads stands as a
        // unitig of its own; unconnected single reads stay noise
        let lonely: Vec<u32> = self
            .node_ids()
            .into_iter()
            .filter(|&id| {
                let node = self.node(id);
                !node.is_rc()
                    && !node.is_unitig
                    && node.count > 1
                    && node.indegree() == 0
                    && node.outdegree() == 0
            })
            .collect();
        for id in lonely {
            let name = format!(
                "{}{}",
                if self.node(id).is_circular { "Ctg" } else { "Utg" },
                id
            );
            self.node_mut(id).is_unitig = true;
            self.node_mut(id).name = name.clone();
            self.node_mut(id ^ 1).is_unitig = true;
            self.node_mut(id ^ 1).name = name;
        }

        let mut dst = Vec::new();
        for node in self.nodes.iter().flatten() {
            if node.is_rc() || !node.is_unitig {
                continue;
            }
            if drop_unpolished && !node.is_polished {
                continue;
            }
            let name = format!(
                "{} LN:i:{} RC:i:{} XO:i:{}",
                node.name,
                node.data.len(),
                node.count,
                node.is_circular as u32
            );
            dst.push(Sequence::new(dst.len() as u32, name, node.data.clone()));
        }
        dst
    }

    /// Edges of `path` that can go without disconnecting anything else:
    /// nothing is removed past the first multi-in junction or before the
    /// last multi-out junction.
    pub fn find_removable_edges(&self, path: &[u32]) -> Vec<u32> {
        if path.len() < 2 {
            return Vec::new();
        }

        let mut pref: i64 = -1;
        for i in 1..path.len() - 1 {
            if self.node(path[i]).indegree() > 1 {
                pref = i as i64;
                break;
            }
        }
        let mut suff: i64 = -1;
        for i in 1..path.len() - 1 {
            if self.node(path[i]).outdegree() > 1 {
                suff = i as i64;
            }
        }

        let mark_range = |begin: usize, end: usize| -> Vec<u32> {
            let mut dst = Vec::new();
            for i in begin..end {
                if let Some(e) = self.find_edge(path[i], path[i + 1]) {
                    dst.push(e);
                    dst.push(e ^ 1);
                }
            }
            dst
        };

        if pref == -1 && suff == -1 {
            return mark_range(0, path.len() - 1);
        }
        if pref != -1 && self.node(path[pref as usize]).outdegree() > 1 {
            return Vec::new();
        }
        if suff != -1 && self.node(path[suff as usize]).indegree() > 1 {
            return Vec::new();
        }

        if pref == -1 {
            mark_range(suff as usize, path.len() - 1)
        } else if suff == -1 {
            mark_range(0, pref as usize)
        } else if suff < pref {
            mark_range(suff as usize, pref as usize)
        } else {
            Vec::new()
        }
    }

    /// Weakly connected components over canonical node ids.
    pub fn components(&self) -> Vec<BTreeSet<u32>> {
        let mut components: Vec<BTreeSet<u32>> = Vec::new();
        let mut is_visited = vec![false; self.nodes.len()];

        for i in 0..self.nodes.len() as u32 {
            if self.nodes[i as usize].is_none() || is_visited[i as usize] {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut que = std::collections::VecDeque::from([i]);
            while let Some(j) = que.pop_front() {
                if is_visited[j as usize] {
                    continue;
                }
                let node = self.node(j);
                is_visited[j as usize] = true;
                is_visited[(j ^ 1) as usize] = true;
                component.insert(j & !1);

                for &e in &node.inedges {
                    que.push_back(self.edge(e).tail);
                }
                for &e in &node.outedges {
                    que.push_back(self.edge(e).head);
                }
                for &e in &self.node(j ^ 1).inedges {
                    que.push_back(self.edge(e).tail);
                }
                for &e in &self.node(j ^ 1).outedges {
                    que.push_back(self.edge(e).head);
                }
            }
            components.push(component);
        }
        components
    }

    /// Pair and strand invariants; debug aid for tests.
    pub fn check_invariants(&self) -> bool {
        for node in self.nodes.iter().flatten() {
            let pair = match self.nodes.get(node.pair_id() as usize) {
                Some(Some(pair)) => pair,
                _ => return false,
            };
            if pair.pair_id() != node.id || reverse_complement(&node.data) != pair.data {
                return false;
            }
        }
        for edge in self.edges.iter().flatten() {
            let pair = match self.edges.get(edge.pair_id() as usize) {
                Some(Some(pair)) => pair,
                _ => return false,
            };
            if pair.pair_id() != edge.id
                || pair.tail != edge.head ^ 1
                || pair.head != edge.tail ^ 1
            {
                return false;
            }
            if !self.node(edge.tail).outedges.contains(&edge.id)
                || !self.node(edge.head).inedges.contains(&edge.id)
            {
                return false;
            }
        }
        true
    }
}
