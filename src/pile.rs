// src/pile.rs
//! Per-sequence coverage piles.
//!
//! A pile owns a base-resolution coverage histogram built from overlap
//! intervals and derives everything the pipeline needs to know about its
//! sequence: the usable (valid) region, the coverage median, suspected
//! chimeric breakpoints and repeat-inflated regions, plus the contained /
//! invalid flags that remove the sequence from graph construction.

use serde::{Deserialize, Serialize};

use crate::constants::MIN_SEQUENCE_LEN;
use crate::overlap::Overlap;

/// Coverage multiple of the component median marking a repeat region.
const REPEAT_COVERAGE_RATIO: f64 = 1.42;

/// Terminating overlaps needed before a repeat region invalidates others.
const REPEAT_HIT_LIM: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepeatRegion {
    begin: u32,
    end: u32,
    hits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pile {
    id: u32,
    data: Vec<u32>,
    begin: u32,
    end: u32,
    median: u32,
    chimeric_regions: Vec<(u32, u32)>,
    repetitive_regions: Vec<RepeatRegion>,
    num_absorbed: u32,
    is_invalid: bool,
    is_contained: bool,
}

impl Pile {
    pub fn new(id: u32, len: usize) -> Self {
        Self {
            id,
            data: vec![0; len],
            begin: 0,
            end: len as u32,
            median: 0,
            chimeric_regions: Vec::new(),
            repetitive_regions: Vec::new(),
            num_absorbed: 0,
            is_invalid: false,
            is_contained: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Valid region start, absolute.
    pub fn begin(&self) -> u32 {
        self.begin
    }

    /// Valid region end, absolute.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Length of the valid region; finalized overlap coordinates live in
    /// `[0, len())`.
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn median(&self) -> u32 {
        self.median
    }

    pub fn is_invalid(&self) -> bool {
        self.is_invalid
    }

    pub fn is_contained(&self) -> bool {
        self.is_contained
    }

    pub fn is_maybe_chimeric(&self) -> bool {
        !self.chimeric_regions.is_empty()
    }

    /// Reads collapsed into this sequence through containment.
    pub fn num_absorbed(&self) -> u32 {
        self.num_absorbed
    }

    /// Credit `reads` contained reads to this sequence; they surface as the
    /// node's collapsed read count in the graph.
    pub fn absorb(&mut self, reads: u32) {
        self.num_absorbed += reads;
    }

    pub fn set_is_invalid(&mut self) {
        self.is_invalid = true;
    }

    pub fn set_is_contained(&mut self) {
        self.is_contained = true;
    }

    pub fn set_valid_region(&mut self, begin: u32, end: u32) {
        debug_assert!(begin <= end && end as usize <= self.data.len());
        self.begin = begin;
        self.end = end;
    }

    /// The interval of `o` lying on this pile's sequence.
    fn own_interval(&self, o: &Overlap) -> Option<(u32, u32)> {
        if o.lhs_id == self.id {
            Some((o.lhs_begin, o.lhs_end))
        } else if o.rhs_id == self.id {
            Some((o.rhs_begin, o.rhs_end))
        } else {
            None
        }
    }

    /// Increment coverage under each overlap's interval on this sequence.
    pub fn add_layers(&mut self, overlaps: &[Overlap]) {
        if self.data.is_empty() {
            return;
        }
        let mut diff = vec![0i64; self.data.len() + 1];
        for o in overlaps {
            if let Some((begin, end)) = self.own_interval(o) {
                let begin = (begin as usize).min(self.data.len());
                let end = (end as usize).min(self.data.len());
                if begin < end {
                    diff[begin] += 1;
                    diff[end] -= 1;
                }
            }
        }
        let mut coverage = 0i64;
        for (i, d) in diff.iter().take(self.data.len()).enumerate() {
            coverage += d;
            self.data[i] = (self.data[i] as i64 + coverage).max(0) as u32;
        }
    }

    /// Keep the longest run of coverage `>= min_coverage` as the valid
    /// region; invalidate the pile when no run reaches the minimum
    /// sequence length.
    pub fn find_valid_region(&mut self, min_coverage: u32) {
        let mut best: (u32, u32) = (0, 0);
        let mut run_begin: Option<usize> = None;
        for i in 0..=self.data.len() {
            let covered = i < self.data.len() && self.data[i] >= min_coverage;
            match (covered, run_begin) {
                (true, None) => run_begin = Some(i),
                (false, Some(b)) => {
                    if (i - b) as u32 > best.1 - best.0 {
                        best = (b as u32, i as u32);
                    }
                    run_begin = None;
                }
                _ => {}
            }
        }

        self.begin = best.0;
        self.end = best.1;
        if self.len() < MIN_SEQUENCE_LEN as u32 {
            self.set_is_invalid();
        }
    }

    /// Median coverage across the valid region.
    pub fn find_median(&mut self) {
        if self.begin >= self.end {
            self.median = 0;
            return;
        }
        let mut values: Vec<u32> =
            self.data[self.begin as usize..self.end as usize].to_vec();
        let mid = values.len() / 2;
        values.select_nth_unstable(mid);
        self.median = values[mid];
    }

    /// Record interior coverage pits (locally under-covered windows) as
    /// candidate chimeric breakpoints.
    pub fn find_chimeric_regions(&mut self) {
        self.chimeric_regions.clear();
        if self.begin >= self.end || self.median == 0 {
            return;
        }

        let mut run_begin: Option<u32> = None;
        for i in self.begin..=self.end {
            let shallow = i < self.end && self.data[i as usize] * 2 < self.median;
            match (shallow, run_begin) {
                (true, None) => run_begin = Some(i),
                (false, Some(b)) => {
                    // pits touching the region edges are trimming, not breaks
                    if b > self.begin && i < self.end {
                        self.chimeric_regions.push((b, i));
                    }
                    run_begin = None;
                }
                _ => {}
            }
        }
    }

    /// Resolve candidate breakpoints against a component-wide median: pits
    /// that stay shallow globally split the valid region, and the longest
    /// piece survives (or the pile is invalidated).
    pub fn clear_chimeric_regions(&mut self, component_median: u32) {
        if self.chimeric_regions.is_empty() {
            return;
        }

        let mut cuts: Vec<(u32, u32)> = Vec::new();
        for &(begin, end) in &self.chimeric_regions {
            let pit_min = self.data[begin as usize..end as usize]
                .iter()
                .copied()
                .min()
                .unwrap_or(0);
            if pit_min * 2 < component_median {
                cuts.push((begin, end));
            }
        }
        self.chimeric_regions.clear();

        if cuts.is_empty() {
            return;
        }

        let mut best: (u32, u32) = (self.begin, self.begin);
        let mut piece_begin = self.begin;
        for &(cut_begin, cut_end) in cuts.iter().chain([(self.end, self.end)].iter()) {
            if cut_begin > piece_begin && cut_begin - piece_begin > best.1 - best.0 {
                best = (piece_begin, cut_begin);
            }
            piece_begin = piece_begin.max(cut_end);
        }

        self.begin = best.0;
        self.end = best.1;
        if self.len() < MIN_SEQUENCE_LEN as u32 {
            self.set_is_invalid();
        }
    }

    /// Zero coverage inside the valid region, keeping the region itself.
    pub fn clear_valid_region(&mut self) {
        for it in &mut self.data[self.begin as usize..self.end as usize] {
            *it = 0;
        }
    }

    /// Zero coverage outside the valid region.
    pub fn clear_invalid_region(&mut self) {
        for (i, it) in self.data.iter_mut().enumerate() {
            if (i as u32) < self.begin || i as u32 >= self.end {
                *it = 0;
            }
        }
    }

    /// Record runs covered well above the component median as repeat
    /// regions.
    pub fn find_repetitive_regions(&mut self, component_median: u32) {
        self.repetitive_regions.clear();
        if self.begin >= self.end || component_median == 0 {
            return;
        }
        let threshold = component_median as f64 * REPEAT_COVERAGE_RATIO;

        let mut run_begin: Option<u32> = None;
        for i in self.begin..=self.end {
            let repetitive = i < self.end && self.data[i as usize] as f64 > threshold;
            match (repetitive, run_begin) {
                (true, None) => run_begin = Some(i),
                (false, Some(b)) => {
                    self.repetitive_regions.push(RepeatRegion {
                        begin: b,
                        end: i,
                        hits: 0,
                    });
                    run_begin = None;
                }
                _ => {}
            }
        }
    }

    fn terminates_inside(region: &RepeatRegion, begin: u32, end: u32) -> bool {
        let intersects = begin < region.end && end > region.begin;
        let spans = begin <= region.begin && end >= region.end;
        intersects && !spans
    }

    /// Count overlaps that stop inside a repeat region instead of spanning
    /// it; such regions accumulate evidence of inducing false overlaps.
    pub fn update_repetitive_regions(&mut self, o: &Overlap) {
        let (begin, end) = match self.own_interval(o) {
            Some(interval) => interval,
            None => return,
        };
        for region in &mut self.repetitive_regions {
            if Self::terminates_inside(region, begin, end) {
                region.hits += 1;
            }
        }
    }

    /// True when `o` terminates inside a repeat region with enough
    /// terminating evidence; such overlaps are dropped.
    pub fn check_repetitive_regions(&self, o: &Overlap) -> bool {
        let (begin, end) = match self.own_interval(o) {
            Some(interval) => interval,
            None => return false,
        };
        self.repetitive_regions
            .iter()
            .any(|r| r.hits >= REPEAT_HIT_LIM && Self::terminates_inside(r, begin, end))
    }

    pub fn clear_repetitive_regions(&mut self) {
        self.repetitive_regions.clear();
    }
}
