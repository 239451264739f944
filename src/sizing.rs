//! Adaptive generation sizing.
//!
//! After each collection the observed survival ratio is pushed into a small
//! ring; a weighted estimate biased toward recent history then drives the
//! nursery threshold up or down between its configured bounds. The old
//! generation threshold chases a target major survival rate instead.

use crate::globals::{align_up, ALLOCATION_GRAIN};
use crate::heaplet::HeapletOptions;

/// Length of the survival-ratio history ring.
pub const SURVIVAL_RATIO_NO: usize = 8;

pub struct SurvivalHistory {
    ring: [f64; SURVIVAL_RATIO_NO],
    len: usize,
    next: usize,
}

impl SurvivalHistory {
    pub(crate) const fn new() -> Self {
        Self {
            ring: [0.0; SURVIVAL_RATIO_NO],
            len: 0,
            next: 0,
        }
    }

    pub(crate) fn record(&mut self, ratio: f64) {
        self.ring[self.next] = ratio;
        self.next = (self.next + 1) % SURVIVAL_RATIO_NO;
        if self.len < SURVIVAL_RATIO_NO {
            self.len += 1;
        }
    }

    /// Weighted mean where an entry `age` collections old carries weight
    /// `recent_bias^age`, `recent_bias` in [0.5, 1).
    pub(crate) fn estimate(&self, recent_bias: f64) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        let mut weight = 1.0;
        let mut sum = 0.0;
        let mut total_weight = 0.0;
        for age in 0..self.len {
            let slot = (self.next + SURVIVAL_RATIO_NO - 1 - age) % SURVIVAL_RATIO_NO;
            sum += self.ring[slot] * weight;
            total_weight += weight;
            weight *= recent_bias;
        }
        sum / total_weight
    }
}

/// New nursery threshold after a minor collection. `live_bytes` is what the
/// young generation still holds; the threshold never drops below it.
pub(crate) fn adapt_nursery_threshold(
    options: &HeapletOptions,
    history: &SurvivalHistory,
    current: usize,
    live_bytes: usize,
) -> usize {
    let estimate = history.estimate(options.recent_bias);
    let mut threshold = current as f64;
    if estimate < options.low_survival_rate {
        threshold *= options.shrinkage_ratio;
    } else if estimate > options.high_survival_rate {
        threshold *= options.growth_ratio;
    }
    let mut threshold = threshold as usize;
    threshold = threshold.clamp(options.min_nursery, options.max_nursery);
    if threshold < live_bytes {
        threshold = align_up(live_bytes, ALLOCATION_GRAIN);
    }
    threshold
}

/// New old-space threshold after a major collection: sized so that the next
/// major observes roughly the target survival rate.
pub(crate) fn adapt_old_threshold(options: &HeapletOptions, old_live_bytes: usize) -> usize {
    let target = options.target_major_survival_rate.max(0.05);
    let mut threshold = (old_live_bytes as f64 / target) as usize;
    threshold = threshold.clamp(options.min_old, options.max_old);
    if threshold < old_live_bytes {
        threshold = align_up(old_live_bytes, ALLOCATION_GRAIN);
    }
    threshold
}
