// src/overlap.rs
//! Bidirected overlap records and the geometry passes that clip, classify
//! and finalize them against per-sequence piles.

use serde::{Deserialize, Serialize};

use crate::constants::MIN_OVERLAP_LEN;
use crate::pile::Pile;

/// Classification of a clipped overlap relative to both valid regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum OverlapKind {
    /// Too much overhang on either side to be trusted.
    Internal = 0,
    LhsContained = 1,
    RhsContained = 2,
    /// lhs hangs off the left of rhs.
    LhsToRhs = 3,
    RhsToLhs = 4,
}

impl OverlapKind {
    pub fn is_contained(self) -> bool {
        matches!(self, OverlapKind::LhsContained | OverlapKind::RhsContained)
    }

    pub fn is_dovetail(self) -> bool {
        matches!(self, OverlapKind::LhsToRhs | OverlapKind::RhsToLhs)
    }
}

/// A declared approximate alignment between two sequences.
///
/// `score` is repurposed across phases: the minimizer engine stores the
/// number of shared minimizers, `finalize` overwrites it with the
/// `OverlapKind` tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Overlap {
    pub lhs_id: u32,
    pub lhs_begin: u32,
    pub lhs_end: u32,
    pub rhs_id: u32,
    pub rhs_begin: u32,
    pub rhs_end: u32,
    pub score: u32,
    /// True when both sequences agree in orientation.
    pub strand: bool,
}

impl Overlap {
    /// The same overlap seen from the other sequence.
    pub fn reverse(&self) -> Overlap {
        Overlap {
            lhs_id: self.rhs_id,
            lhs_begin: self.rhs_begin,
            lhs_end: self.rhs_end,
            rhs_id: self.lhs_id,
            rhs_begin: self.lhs_begin,
            rhs_end: self.lhs_end,
            score: self.score,
            strand: self.strand,
        }
    }

    /// Longer of the two matched intervals.
    pub fn length(&self) -> u32 {
        (self.rhs_end - self.rhs_begin).max(self.lhs_end - self.lhs_begin)
    }
}

/// Clip `o` to both piles' valid regions, keeping the strand geometry
/// consistent: trimming one side shifts the other by the same amount.
///
/// Fails when either pile is invalid, when the overlap falls outside a
/// valid region, or when either clipped side drops below the minimum
/// informative length.
pub fn update(o: &mut Overlap, piles: &[Pile]) -> bool {
    let lhs = &piles[o.lhs_id as usize];
    let rhs = &piles[o.rhs_id as usize];

    if lhs.is_invalid() || rhs.is_invalid() {
        return false;
    }
    if o.lhs_begin >= lhs.end()
        || o.lhs_end <= lhs.begin()
        || o.rhs_begin >= rhs.end()
        || o.rhs_end <= rhs.begin()
    {
        return false;
    }

    // every trim on one side propagates to the matching end of the other
    let lhs_head_clip = lhs.begin().saturating_sub(o.lhs_begin) as i64;
    let lhs_tail_clip = o.lhs_end.saturating_sub(lhs.end()) as i64;
    let rhs_head_clip = rhs.begin().saturating_sub(o.rhs_begin) as i64;
    let rhs_tail_clip = o.rhs_end.saturating_sub(rhs.end()) as i64;

    let lhs_begin = o.lhs_begin as i64
        + if o.strand { rhs_head_clip } else { rhs_tail_clip };
    let lhs_end = o.lhs_end as i64
        - if o.strand { rhs_tail_clip } else { rhs_head_clip };
    let rhs_begin = o.rhs_begin as i64
        + if o.strand { lhs_head_clip } else { lhs_tail_clip };
    let rhs_end = o.rhs_end as i64
        - if o.strand { lhs_tail_clip } else { lhs_head_clip };

    if lhs_begin >= lhs.end() as i64
        || lhs_end <= lhs.begin() as i64
        || rhs_begin >= rhs.end() as i64
        || rhs_end <= rhs.begin() as i64
    {
        return false;
    }

    let lhs_begin = lhs_begin.max(lhs.begin() as i64) as u32;
    let lhs_end = lhs_end.min(lhs.end() as i64) as u32;
    let rhs_begin = rhs_begin.max(rhs.begin() as i64) as u32;
    let rhs_end = rhs_end.min(rhs.end() as i64) as u32;

    if lhs_begin >= lhs_end
        || lhs_end - lhs_begin < MIN_OVERLAP_LEN
        || rhs_begin >= rhs_end
        || rhs_end - rhs_begin < MIN_OVERLAP_LEN
    {
        return false;
    }

    o.lhs_begin = lhs_begin;
    o.lhs_end = lhs_end;
    o.rhs_begin = rhs_begin;
    o.rhs_end = rhs_end;

    true
}

fn classify(
    lhs_length: u32,
    lhs_begin: u32,
    lhs_end: u32,
    rhs_length: u32,
    rhs_begin: u32,
    rhs_end: u32,
) -> OverlapKind {
    let overhang =
        lhs_begin.min(rhs_begin) + (lhs_length - lhs_end).min(rhs_length - rhs_end);

    if ((lhs_end - lhs_begin) as f64) < ((lhs_end - lhs_begin + overhang) as f64) * 0.875
        || ((rhs_end - rhs_begin) as f64) < ((rhs_end - rhs_begin + overhang) as f64) * 0.875
    {
        return OverlapKind::Internal;
    }
    if lhs_begin <= rhs_begin && lhs_length - lhs_end <= rhs_length - rhs_end {
        return OverlapKind::LhsContained;
    }
    if rhs_begin <= lhs_begin && rhs_length - rhs_end <= lhs_length - lhs_end {
        return OverlapKind::RhsContained;
    }
    if lhs_begin > rhs_begin {
        return OverlapKind::LhsToRhs;
    }
    OverlapKind::RhsToLhs
}

/// Classify a clipped overlap. Coordinates are taken relative to each
/// pile's valid region, with the rhs flipped onto the lhs orientation.
pub fn kind(o: &Overlap, piles: &[Pile]) -> OverlapKind {
    let lhs = &piles[o.lhs_id as usize];
    let rhs = &piles[o.rhs_id as usize];

    let lhs_length = lhs.end() - lhs.begin();
    let lhs_begin = o.lhs_begin - lhs.begin();
    let lhs_end = o.lhs_end - lhs.begin();

    let rhs_length = rhs.end() - rhs.begin();
    let rhs_begin = if o.strand {
        o.rhs_begin - rhs.begin()
    } else {
        rhs_length - (o.rhs_end - rhs.begin())
    };
    let rhs_end = if o.strand {
        o.rhs_end - rhs.begin()
    } else {
        rhs_length - (o.rhs_begin - rhs.begin())
    };

    classify(lhs_length, lhs_begin, lhs_end, rhs_length, rhs_begin, rhs_end)
}

/// Classify against raw sequence lengths, for overlaps that never went
/// through pile trimming.
pub fn kind_with_lengths(o: &Overlap, lhs_length: u32, rhs_length: u32) -> OverlapKind {
    let rhs_begin = if o.strand {
        o.rhs_begin
    } else {
        rhs_length - o.rhs_end
    };
    let rhs_end = if o.strand {
        o.rhs_end
    } else {
        rhs_length - o.rhs_begin
    };

    classify(lhs_length, o.lhs_begin, o.lhs_end, rhs_length, rhs_begin, rhs_end)
}

/// Stamp the overlap kind into `score`, keep only dovetails and rebase
/// coordinates onto the trimmed sequences, flipping the rhs interval onto
/// the canonical orientation for reverse-strand overlaps.
pub fn finalize(o: &mut Overlap, piles: &[Pile]) -> bool {
    o.score = kind(o, piles) as u32;
    if o.score < OverlapKind::LhsToRhs as u32 {
        return false;
    }

    let lhs = &piles[o.lhs_id as usize];
    let rhs = &piles[o.rhs_id as usize];

    o.lhs_begin -= lhs.begin();
    o.lhs_end -= lhs.begin();

    o.rhs_begin -= rhs.begin();
    o.rhs_end -= rhs.begin();
    if !o.strand {
        let rhs_begin = o.rhs_begin;
        o.rhs_begin = rhs.len() - o.rhs_end;
        o.rhs_end = rhs.len() - rhs_begin;
    }
    true
}
