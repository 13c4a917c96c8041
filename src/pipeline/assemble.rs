// src/pipeline/assemble.rs
//! The stage controller.
//!
//! Drives the pipeline through its checkpointed stages: `-5` overlaps and
//! piles, `-4` graph construction, `-3` transitive reduction, `-2` tips and
//! bubbles, `-1` long edges, then one stage per polishing round. Every
//! block is gated on the current stage so a resumed run re-enters exactly
//! where the archive left off.

use std::time::Instant;

use tracing::info;

use crate::checkpoint;
use crate::error::Result;
use crate::graph::assembly::AssemblyGraph;
use crate::graph::simplify::GraphSimplifier;
use crate::io::sequence::{reverse_complement, Sequence};
use crate::pile::Pile;
use crate::pipeline::engine::OverlapEngine;
use crate::polish::consensus::ConsensusPolisher;

pub struct Assembler {
    stage: i32,
    k: usize,
    w: usize,
    pub piles: Vec<Pile>,
    pub graph: AssemblyGraph,
}

impl Assembler {
    /// `weaken` switches to the large `(k, w)` preset for highly accurate
    /// input sequences.
    pub fn new(weaken: bool) -> Self {
        let (k, w) = if weaken { (29, 9) } else { (15, 5) };
        Self {
            stage: -5,
            k,
            w,
            piles: Vec::new(),
            graph: AssemblyGraph::new(),
        }
    }

    pub fn stage(&self) -> i32 {
        self.stage
    }

    pub fn store(&self) -> Result<()> {
        checkpoint::store(self.stage, &self.piles, &self.graph)
    }

    pub fn load(&mut self) -> Result<()> {
        let archive = checkpoint::load()?;
        self.stage = archive.stage;
        self.piles = archive.piles;
        self.graph = archive.graph;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.piles.clear();
        self.graph.clear();
        self.stage = -5;
    }

    /// Stages `-5` and `-4`: overlap discovery, pile annotation and graph
    /// construction.
    pub fn construct(
        &mut self,
        sequences: &mut Vec<Sequence>,
        store_fillers: bool,
    ) -> Result<()> {
        if sequences.is_empty() || self.stage > -4 {
            return Ok(());
        }

        let engine = OverlapEngine::new(self.k, self.w);

        if self.stage == -5 {
            // archive writability test before hours of work
            self.store()?;
        }

        if self.stage == -5 {
            let timer = Instant::now();
            engine.build_piles(sequences, &mut self.piles);
            self.stage += 1;
            self.store()?;
            info!(
                "reached checkpoint {} {:.2}s",
                self.stage,
                timer.elapsed().as_secs_f32()
            );
        }

        if self.stage == -4 {
            let timer = Instant::now();
            let mut overlaps =
                engine.find_final_overlaps(sequences, &mut self.piles, store_fillers);
            self.graph.construct(&self.piles, sequences, &mut overlaps);
            info!(
                "stored {} nodes and {} edges",
                self.graph.node_ids().len(),
                self.graph.edge_ids().len()
            );
            self.stage += 1;
            self.store()?;
            info!(
                "reached checkpoint {} {:.2}s",
                self.stage,
                timer.elapsed().as_secs_f32()
            );
        }

        Ok(())
    }

    /// Stages `-3` to `-1`: graph simplification down to unitig chains.
    pub fn assemble(&mut self) -> Result<()> {
        if self.stage < -3 || self.stage > -1 {
            return Ok(());
        }

        let mut simplifier = GraphSimplifier::new(self.k, self.w);

        if self.stage == -3 {
            let timer = Instant::now();
            let removed = simplifier.remove_transitive_edges(&mut self.graph);
            info!(
                "removed {} transitive edges {:.2}s",
                removed,
                timer.elapsed().as_secs_f32()
            );
            self.stage += 1;
            self.store()?;
        }

        if self.stage == -2 {
            let timer = Instant::now();
            loop {
                let mut num_changes = simplifier.remove_tips(&mut self.graph);
                num_changes += simplifier.remove_bubbles(&mut self.graph);
                if num_changes == 0 {
                    break;
                }
            }
            info!("removed tips and bubbles {:.2}s", timer.elapsed().as_secs_f32());
            self.stage += 1;
            self.store()?;
        }

        if self.stage == -1 {
            let timer = Instant::now();
            self.graph.create_unitigs(42);
            let removed = simplifier.remove_long_edges(&mut self.graph, 16);
            info!(
                "removed {} long edges {:.2}s",
                removed,
                timer.elapsed().as_secs_f32()
            );
            self.stage += 1;
            self.store()?;
        }

        loop {
            let mut num_changes = simplifier.remove_tips(&mut self.graph);
            num_changes += simplifier.remove_bubbles(&mut self.graph);
            if num_changes == 0 {
                break;
            }
        }

        Ok(())
    }

    /// Stages `0..num_rounds`: consensus polishing, one checkpoint per
    /// round.
    pub fn polish(
        &mut self,
        sequences: &[Sequence],
        match_score: i8,
        mismatch: i8,
        gap: i8,
        num_rounds: i32,
    ) -> Result<()> {
        if sequences.is_empty() || num_rounds <= 0 {
            return Ok(());
        }
        let mut unitigs = self.graph.get_unitigs(false);
        if unitigs.is_empty() {
            return Ok(());
        }

        let polisher = ConsensusPolisher::new(match_score, mismatch, gap, self.k, self.w);

        while self.stage < num_rounds {
            let timer = Instant::now();
            unitigs = polisher.polish(&unitigs, sequences);

            for it in &unitigs {
                self.apply_polished(it);
            }

            self.stage += 1;
            self.store()?;
            info!(
                "polishing round done, reached checkpoint {} {:.2}s",
                self.stage,
                timer.elapsed().as_secs_f32()
            );
        }

        Ok(())
    }

    /// Push one polished sequence back into its node pair when the
    /// trailing coverage tag shows it was actually polished.
    fn apply_polished(&mut self, polished: &Sequence) {
        let id: u32 = match polished.name[3..]
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|digits| digits.parse().ok())
        {
            Some(id) => id,
            None => return,
        };
        let coverage: f64 = match polished
            .name
            .rfind(':')
            .and_then(|tag| polished.name[tag + 1..].parse().ok())
        {
            Some(coverage) => coverage,
            None => return,
        };
        if coverage <= 0.0 {
            return;
        }

        if self
            .graph
            .nodes
            .get(id as usize)
            .map_or(false, |slot| slot.is_some())
        {
            self.graph.node_mut(id).is_polished = true;
            self.graph.node_mut(id).data = polished.data.clone();
            self.graph.node_mut(id ^ 1).is_polished = true;
            self.graph.node_mut(id ^ 1).data = reverse_complement(&polished.data);
        }
    }
}
