// src/io/gfa.rs
use std::fs::File;
use std::io::{BufWriter, Result, Write};

use crate::graph::assembly::AssemblyGraph;

/// Emit the assembly graph in GFA format: one `S` record per canonical
/// surviving node (single unconnected reads are skipped as noise), a self
/// `L` for circular nodes and an `L` record per edge with the overlap
/// length as its cigar.
pub fn write_gfa(graph: &AssemblyGraph, path: &str) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    for node in graph.nodes.iter().flatten() {
        if node.is_rc()
            || (node.count == 1 && node.outdegree() == 0 && node.indegree() == 0)
        {
            continue;
        }
        writeln!(
            writer,
            "S\t{}\t{}\tLN:i:{}\tRC:i:{}",
            node.name,
            node.data,
            node.data.len(),
            node.count
        )?;
        if node.is_circular {
            writeln!(writer, "L\t{}\t+\t{}\t+\t0M", node.name, node.name)?;
        }
    }

    for edge in graph.edges.iter().flatten() {
        let tail = graph.node(edge.tail);
        let head = graph.node(edge.head);
        writeln!(
            writer,
            "L\t{}\t{}\t{}\t{}\t{}M",
            tail.name,
            if tail.is_rc() { '-' } else { '+' },
            head.name,
            if head.is_rc() { '-' } else { '+' },
            tail.data.len() - edge.length as usize
        )?;
    }

    Ok(())
}
