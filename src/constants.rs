//! Pipeline-wide constants.

/// Non-chimeric valid regions extracted between runs live here.
pub const FILLER_SEQS_PATH: &str = "extracted.fasta";

/// Binary checkpoint archive path.
pub const CHECKPOINT_PATH: &str = "talon.ckpt";

/// Sequences whose usable region shrinks below this are dropped.
pub const MIN_SEQUENCE_LEN: usize = 1000;

/// Overlaps shorter than this on either side carry no signal.
pub const MIN_OVERLAP_LEN: u32 = 84;

/// Minimum pile coverage for the valid region search.
pub const MIN_COVERAGE: u32 = 4;

pub const KMER_DISCARD_FREQ_HARD: f64 = 0.001;

pub const KMER_DISCARD_FREQ_SOFT: f64 = 0.00001;

/// Bases clipped from both ends of filler sequences.
pub const TRIM_LIM: usize = 800;

pub const SEQS_BATCH_LIM: usize = 1 << 32;

pub const OVLP_BATCH_LIM: usize = 1 << 30;

pub const FILLER_LEN_LIM: usize = 20000;

/// Overlaps kept per unitig side in the greedy second run.
pub const MAX_GREEDY_OVLP: usize = 8;
