// src/checkpoint.rs
//! Stage checkpointing.
//!
//! Each stage boundary persists `(stage, piles, graph)` as one binary
//! archive at a fixed path; `--resume` restores it and the controller
//! continues from the recorded stage. The archive layout is private, only
//! the round trip matters.

use std::fs::File;
use std::io::{BufReader, BufWriter};

use serde::{Deserialize, Serialize};

use crate::constants::CHECKPOINT_PATH;
use crate::error::{AssemblyError, Result};
use crate::graph::assembly::AssemblyGraph;
use crate::pile::Pile;

/// Bumped whenever the archive layout changes; old archives are refused
/// instead of being misread.
const ARCHIVE_VERSION: u32 = 1;

/// Stages run `-5..=num_polishing_rounds`: overlaps/piles, graph
/// construction, transitive reduction, tips/bubbles, long edges, then one
/// stage per polishing round.
#[derive(Debug, Deserialize)]
pub struct Checkpoint {
    version: u32,
    pub stage: i32,
    pub piles: Vec<Pile>,
    pub graph: AssemblyGraph,
}

#[derive(Serialize)]
struct CheckpointRef<'a> {
    version: u32,
    stage: i32,
    piles: &'a [Pile],
    graph: &'a AssemblyGraph,
}

pub fn store(stage: i32, piles: &[Pile], graph: &AssemblyGraph) -> Result<()> {
    store_at(stage, piles, graph, CHECKPOINT_PATH)
}

pub fn load() -> Result<Checkpoint> {
    load_from(CHECKPOINT_PATH)
}

pub fn store_at(stage: i32, piles: &[Pile], graph: &AssemblyGraph, path: &str) -> Result<()> {
    let file = File::create(path)?;
    let archive = CheckpointRef {
        version: ARCHIVE_VERSION,
        stage,
        piles,
        graph,
    };
    bincode::serialize_into(BufWriter::new(file), &archive)
        .map_err(|e| AssemblyError::Archive(e.to_string()))
}

pub fn load_from(path: &str) -> Result<Checkpoint> {
    let file = File::open(path).map_err(|e| AssemblyError::Archive(e.to_string()))?;
    let archive: Checkpoint = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| AssemblyError::Archive(e.to_string()))?;
    if archive.version != ARCHIVE_VERSION {
        return Err(AssemblyError::Archive(format!(
            "unsupported archive version {}",
            archive.version
        )));
    }
    Ok(archive)
}
