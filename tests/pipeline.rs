//! End-to-end assembly scenarios on synthetic read sets.

use talon::error::AssemblyError;
use talon::graph::assembly::AssemblyGraph;
use talon::graph::simplify::GraphSimplifier;
use talon::io::loader;
use talon::io::sequence::Sequence;
use talon::overlap::Overlap;
use talon::pile::Pile;
use talon::pipeline::engine::OverlapEngine;

fn random_bases(len: usize, state: &mut u64) -> String {
    (0..len)
        .map(|_| {
            *state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            match (*state >> 33) & 3 {
                0 => 'A',
                1 => 'C',
                2 => 'G',
                _ => 'T',
            }
        })
        .collect()
}

/// Error-free reads tiling `genome` at a fixed stride.
fn tile_reads(genome: &str, read_len: usize, stride: usize) -> Vec<Sequence> {
    let mut reads = Vec::new();
    let mut begin = 0;
    while begin + read_len <= genome.len() {
        reads.push(Sequence::new(
            reads.len() as u32,
            format!("read{}", reads.len()),
            genome[begin..begin + read_len].to_string(),
        ));
        begin += stride;
    }
    reads
}

#[test]
fn test_linear_genome_assembles_to_one_unitig() {
    let mut state = 123u64;
    let genome = random_bases(20000, &mut state);
    let mut sequences = tile_reads(&genome, 5000, 250);

    let engine = OverlapEngine::new(15, 5);
    let mut piles = Vec::new();
    engine.build_piles(&sequences, &mut piles);

    // interior reads keep generous valid regions
    let num_valid = piles.iter().filter(|p| !p.is_invalid()).count();
    assert!(num_valid > sequences.len() / 2, "only {} valid piles", num_valid);

    let mut overlaps = engine.find_final_overlaps(&mut sequences, &mut piles, false);
    assert!(!overlaps.is_empty());

    let mut graph = AssemblyGraph::new();
    graph.construct(&piles, &sequences, &mut overlaps);
    assert!(graph.check_invariants());
    assert!(!graph.node_ids().is_empty());

    let simplifier = GraphSimplifier::new(15, 5);
    simplifier.remove_transitive_edges(&mut graph);
    assert!(graph.check_invariants());

    // no comparable triangle survives the reduction
    for u in graph.node_ids() {
        for &e1 in &graph.node(u).outedges {
            let v = graph.edge(e1).head;
            for &e2 in &graph.node(v).outedges {
                let w = graph.edge(e2).head;
                if let Some(direct) = graph.find_edge(u, w) {
                    let two_hop = (graph.edge(e1).length + graph.edge(e2).length) as f64;
                    let len = graph.edge(direct).length as f64;
                    assert!(
                        (len - two_hop).abs() > 0.12 * len,
                        "transitive edge {} -> {} survived",
                        u,
                        w
                    );
                }
            }
        }
    }

    loop {
        let mut num_changes = simplifier.remove_tips(&mut graph);
        num_changes += simplifier.remove_bubbles(&mut graph);
        if num_changes == 0 {
            break;
        }
    }

    let unitigs = graph.get_unitigs(false);
    assert_eq!(unitigs.len(), 1, "expected a single unitig");
    assert!(
        genome.contains(&unitigs[0].data),
        "unitig does not spell a genome substring"
    );
    assert!(
        unitigs[0].data.len() > 15000,
        "unitig too short: {}",
        unitigs[0].data.len()
    );
}

#[test]
fn test_identical_pair_collapses_to_one_unitig() {
    // two identical 5 kb sequences: one is contained, the survivor comes
    // back as a single unitig counting both reads
    let mut state = 17u64;
    let data = random_bases(5000, &mut state);
    let sequences = vec![
        Sequence::new(0, "twin0", data.clone()),
        Sequence::new(1, "twin1", data),
    ];

    let mut piles: Vec<Pile> = sequences
        .iter()
        .map(|seq| {
            let mut pile = Pile::new(seq.id, seq.data.len());
            pile.set_valid_region(0, seq.data.len() as u32);
            pile
        })
        .collect();

    let o = Overlap {
        lhs_id: 0,
        lhs_begin: 0,
        lhs_end: 5000,
        rhs_id: 1,
        rhs_begin: 0,
        rhs_end: 5000,
        score: 0,
        strand: true,
    };
    let mut overlaps = vec![vec![o], vec![o.reverse()]];

    let engine = OverlapEngine::new(15, 5);
    engine.resolve_contained(&mut piles, &mut overlaps);

    assert!(piles[0].is_invalid(), "the contained twin must drop out");
    assert!(!piles[1].is_invalid(), "the surviving twin must stay");

    let mut graph = AssemblyGraph::new();
    let mut finalized = Vec::new();
    graph.construct(&piles, &sequences, &mut finalized);
    // exactly one sequence survives in the node set (as a strand pair)
    assert_eq!(graph.node_ids().len(), 2);

    let unitigs = graph.get_unitigs(false);
    assert_eq!(unitigs.len(), 1);
    assert!(
        unitigs[0].name.contains("RC:i:2"),
        "unexpected name: {}",
        unitigs[0].name
    );
    assert_eq!(unitigs[0].data, sequences[1].data);
}

#[test]
fn test_short_sequences_never_reach_the_graph() {
    // far below the minimum usable length and without deep coverage
    let mut state = 9u64;
    let sequences = vec![
        Sequence::new(0, "short0", random_bases(600, &mut state)),
        Sequence::new(1, "short1", random_bases(700, &mut state)),
    ];

    let engine = OverlapEngine::new(15, 5);
    let mut piles = Vec::new();
    engine.build_piles(&sequences, &mut piles);
    assert!(piles.iter().all(|p| p.is_invalid()));

    let mut graph = AssemblyGraph::new();
    let mut overlaps = Vec::new();
    graph.construct(&piles, &sequences, &mut overlaps);
    assert!(graph.node_ids().is_empty());
}

#[test]
fn test_self_overlap_terminates() {
    // a sequence that repeats itself must not hang the pipeline
    let mut state = 31u64;
    let block = random_bases(3000, &mut state);
    let data = format!("{}{}{}", block, block, block);
    let mut sequences = vec![Sequence::new(0, "tandem", data)];

    let engine = OverlapEngine::new(15, 5);
    let mut piles = Vec::new();
    engine.build_piles(&sequences, &mut piles);
    let _ = engine.find_final_overlaps(&mut sequences, &mut piles, false);
    // low coverage leaves the lone read invalid, never looping
    assert!(piles[0].is_invalid());
}

#[test]
fn test_unknown_extension_is_input_format_error() {
    match loader::load_sequences("reads.sam") {
        Err(AssemblyError::InputFormat(path)) => assert_eq!(path, "reads.sam"),
        other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
    }
}

#[test]
fn test_empty_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.fasta");
    std::fs::write(&path, "").unwrap();

    match loader::load_sequences(path.to_str().unwrap()) {
        Err(AssemblyError::EmptyInput) => {}
        other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
    }
}

#[test]
fn test_fastq_roundtrip_through_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads.fastq");
    std::fs::write(&path, "@r0\nACGTACGT\n+\nIIIIIIII\n@r1\nTTTTACGT\n+\nIIIIIIII\n").unwrap();

    let sequences = loader::load_sequences(path.to_str().unwrap()).unwrap();
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences[0].name, "r0");
    assert_eq!(sequences[0].data, "ACGTACGT");
    assert_eq!(sequences[1].quality, "IIIIIIII");
}
