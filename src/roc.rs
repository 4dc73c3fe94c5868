/// Number of histogram slots used for the coverage ROC curves
pub const SLOTS: usize = 70;

/// With 2/3, depth 1 lands near the histogram center and the top slot sits at depth 1.5
pub const SLOTS_MID: f64 = 2.0 / 3.0;

fn slot_of(depth: f32) -> usize {
    let v = (depth * (SLOTS as f32 * SLOTS_MID as f32) + 0.5) as usize;
    v.min(SLOTS - 1)
}

/// Accumulate the slot counts for one chromosome's normalized depths
pub fn counts_at_depth(depths: &[f32], counts: &mut [usize]) {
    assert_eq!(counts.len(), SLOTS, "expecting counts to be length {SLOTS}");
    for &d in depths {
        counts[slot_of(d)] += 1;
    }
}

/// Cumulative proportion of tiles at or above the normalized depth given by each slot
///
/// `roc[0]` is 1 and the vector is non-increasing. The depth of slot `i` is
/// `i / (SLOTS * SLOTS_MID)`.
///
pub fn counts_roc(counts: &[usize]) -> Vec<f32> {
    let mut totals = vec![0usize; counts.len()];
    totals[counts.len() - 1] = counts[counts.len() - 1];
    for i in (0..counts.len() - 1).rev() {
        totals[i] = totals[i + 1] + counts[i];
    }

    let max = totals[0] as f32;
    if max == 0.0 {
        return vec![0.0; counts.len()];
    }
    totals.iter().map(|&t| t as f32 / max).collect()
}

/// Add each sample's ROC slope around depth 1 to `slopes`, weighted by `scalar`
///
/// The slope is taken between normalized depth 1 - 0.15 and 1 + 0.15; `scalar` is the
/// chromosome length in megabases so large chromosomes dominate the average.
///
pub fn update_slopes(rocs: &[Vec<f32>], scalar: f32, slopes: &mut [f32]) {
    let n = 0.1;
    let ilo = (0.5 + (SLOTS_MID - n) * SLOTS as f64) as usize;
    let ihi = (0.5 + (SLOTS_MID + n) * SLOTS as f64) as usize;

    for (slope, vals) in slopes.iter_mut().zip(rocs.iter()) {
        let (lo, hi) = (vals[ilo], vals[ihi]);
        *slope += (lo - hi) * scalar;
    }
}

/// Count of tiles in or out of the expected normalized depth range of ~1
#[derive(Clone, Copy, Debug, Default)]
pub struct BinCounter {
    /// count of sites outside of (0.85, 1.15)
    pub out: usize,
    /// count of sites below 0.15
    pub low: usize,
    /// count of sites above 1.15
    pub hi: usize,
    /// count of sites inside of (0.85, 1.15)
    pub in_: usize,
}

impl BinCounter {
    /// Count one chromosome's depths; tiles beyond the row's length count as zero
    pub fn count(&mut self, depths: &[f32], n: usize) {
        for &d in depths {
            if !(0.85..=1.15).contains(&d) {
                self.out += 1;
                if d > 1.15 {
                    self.hi += 1;
                } else if d < 0.15 {
                    self.low += 1;
                }
            } else {
                self.in_ += 1;
            }
        }
        self.out += n.saturating_sub(depths.len());
        self.low += n.saturating_sub(depths.len());
    }
}
