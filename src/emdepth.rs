//! Simplified EM assignment of integer copy numbers from a cohort-normalized depth
//! vector. Works best with more samples, and assumes most samples sit at copy number 2.
//! No normalization happens here; incoming depths are expected to be normalized already.

use statrs::distribution::{Discrete, Poisson};

use crate::sample_index::TILE_WIDTH;

/// Number of copy-number classes; the top class absorbs everything at or above it
pub const MAX_COPY_NUMBER: usize = 8;

const EPS: f64 = 0.001;
const MAX_ITER: usize = 10;

/// Genomic span of the tile a depth vector was observed at
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Position {
    pub start: u32,
    pub end: u32,
}

/// Result of one EM fit: the copy-number centers and the observed depths
///
/// `centers[cn]` is the expected depth at that copy number; `centers[2]` is the diploid
/// depth the rest are derived from.
///
#[derive(Clone, Debug)]
pub struct Emd {
    pub centers: Vec<f64>,
    pub depths: Vec<f32>,
    pub position: Position,
}

fn mean(a: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    a.iter().sum::<f64>() / a.len() as f64
}

fn median(a: &[f32]) -> f64 {
    let mut v = a.to_vec();
    v.sort_by(|x, y| x.partial_cmp(y).unwrap());
    v[v.len() / 2] as f64
}

/// Sum of absolute differences and the largest absolute difference
fn sum_max_diff(a: &[f64], b: &[f64]) -> (f64, f64) {
    let mut sum = 0.0;
    let mut max = 0.0f64;
    for (av, bv) in a.iter().zip(b.iter()) {
        let d = (av - bv).abs();
        sum += d;
        max = max.max(d);
    }
    (sum, max)
}

/// Index of the center closest to `d`
fn closest_center(centers: &[f64], d: f64) -> usize {
    let idx = centers.partition_point(|&c| c < d);
    if idx == 0 {
        return 0;
    }
    if idx == centers.len() {
        return centers.len() - 1;
    }
    if (d - centers[idx]).abs() < (d - centers[idx - 1]).abs() {
        idx
    } else {
        idx - 1
    }
}

/// Fit copy-number centers to the given normalized depths
///
/// Iteratively assigns depths to the nearest copy-number bin, re-centers the diploid
/// bin, and derives the other centers from it. The span between CN 1 and CN 3 is
/// widened each round to bias weak evidence toward CN 2.
///
pub fn em_depth(depths: &[f32], position: Position) -> Emd {
    if depths.is_empty() {
        return Emd {
            centers: vec![0.0; MAX_COPY_NUMBER],
            depths: Vec::new(),
            position,
        };
    }
    let m = median(depths);

    let mut centers = vec![0.0f64; MAX_COPY_NUMBER];
    centers[0] = EPS * m;
    centers[2] = m;
    for cn in 1..MAX_COPY_NUMBER {
        if cn != 2 {
            centers[cn] = m * cn as f64 / 2.0;
        }
    }

    let mut last_centers = centers.clone();
    let mut binned: Vec<Vec<f64>> = vec![Vec::new(); MAX_COPY_NUMBER];
    binned[2].reserve(depths.len());

    let (mut sumd, mut maxd) = (100.0f64, 100.0f64);
    let mut iter = 0;
    while iter < MAX_ITER && !(maxd < 0.5 && sumd < EPS) {
        last_centers.copy_from_slice(&centers);
        for bin in binned.iter_mut() {
            bin.clear();
        }

        // MAXIMIZATION: put samples in the bin they are closest to
        for &df in depths {
            let d = df as f64;
            // most common case of copy-number 2
            if d > centers[1]
                && d < centers[3]
                && (d - centers[2]).abs() < (d - centers[1]).abs()
                && (d - centers[2]).abs() < (d - centers[3]).abs()
            {
                binned[2].push(d);
                continue;
            }
            binned[closest_center(&centers, d)].push(d);
        }

        // EXPECTATION: adjust the diploid center, deriving it from the other bins when
        // no sample landed in bin 2
        centers[2] = mean(&binned[2]);
        if centers[2] == 0.0 {
            let n = depths.len() as f64;
            for (cn, bin) in binned.iter().enumerate().skip(1) {
                let pdepth = bin.len() as f64 / n;
                centers[2] += mean(bin) * (2.0 / cn as f64) * pdepth;
            }
        }

        for cn in 1..MAX_COPY_NUMBER {
            centers[cn] = centers[2] * cn as f64 / 2.0;
        }
        centers[0] = EPS * centers[2];

        // make CN 2 more likely by expanding the range between CN 1 and CN 3
        let span = centers[2] - centers[1];
        centers[1] -= span / 2.0;
        centers[3] += span / 2.0;

        (sumd, maxd) = sum_max_diff(&centers, &last_centers);
        iter += 1;
    }

    Emd {
        centers,
        depths: depths.to_vec(),
        position,
    }
}

impl Emd {
    /// Integer copy number per sample
    ///
    /// Samples map to the nearest center; extreme outliers land in the top bin. CN 1
    /// and CN 3 calls that are nearly as well explained by the diploid center are
    /// pulled back to CN 2.
    ///
    pub fn cn(&self) -> Vec<usize> {
        let mut cns = self
            .depths
            .iter()
            .map(|&d| closest_center(&self.centers, d as f64))
            .collect::<Vec<_>>();
        self.adjust_cns(&mut cns);
        cns
    }

    /// For copy numbers 1 and 3, make sure the call is clearly better than CN 2
    fn adjust_cns(&self, cns: &mut [usize]) {
        if self.centers[2] <= 0.0 {
            return;
        }
        for (i, cn) in cns.iter_mut().enumerate() {
            if *cn != 1 && *cn != 3 {
                continue;
            }
            if self.centers[*cn] <= 0.0 {
                continue;
            }
            let k = (0.5 + self.depths[i]) as u64;
            let p_assigned = Poisson::new(self.centers[*cn]).unwrap().pmf(k);
            let p_diploid = Poisson::new(self.centers[2]).unwrap().pmf(k);
            if p_assigned <= 0.0 || p_diploid / p_assigned > 0.95 {
                *cn = 2;
            }
        }
    }

    /// log2 fold change of each sample's depth against the diploid center
    pub fn log2_fc(&self) -> Vec<f64> {
        self.depths
            .iter()
            .map(|&d| (d as f64 / self.centers[2]).log2())
            .collect()
    }

    /// Compare copy-number states against another fit over the same samples
    ///
    /// Returns the indexes that share a non-diploid state in both fits, the indexes
    /// whose state changed, and the fraction of samples with the same state.
    ///
    pub fn same(&self, other: &Emd) -> (Vec<usize>, Vec<usize>, f64) {
        let a = self.cn();
        let b = other.cn();
        assert_eq!(a.len(), b.len());

        let mut shared = Vec::new();
        let mut changed = Vec::new();
        for i in 0..a.len() {
            if a[i] == b[i] {
                if a[i] != 2 {
                    shared.push(i);
                }
            } else {
                changed.push(i);
            }
        }
        let pct = (a.len() - changed.len()) as f64 / a.len() as f64;
        (shared, changed, pct)
    }
}

/// A run of adjacent non-diploid tiles for one sample
#[derive(Clone, Debug)]
pub struct Cnv {
    pub sample_index: usize,
    pub depths: Vec<f32>,
    pub positions: Vec<Position>,
    pub log2fcs: Vec<f64>,
    pub cns: Vec<usize>,
    /// positions where other samples' runs started inside this run's span, usable to
    /// subdivide a cohort-level event
    pub cohort_splits: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
struct CnvRun {
    depths: Vec<f32>,
    positions: Vec<Position>,
    log2fcs: Vec<f64>,
    cns: Vec<usize>,
    splits: Vec<u32>,
}

impl CnvRun {
    fn into_cnv(mut self, sample_index: usize) -> Cnv {
        self.splits.sort_unstable();
        self.splits.dedup();
        Cnv {
            sample_index,
            depths: self.depths,
            positions: self.positions,
            log2fcs: self.log2fcs,
            cns: self.cns,
            cohort_splits: self.splits,
        }
    }
}

/// Tracks potential CNV runs per sample as EM results stream in tile order
///
/// An incoming non-diploid tile merges with the sample's open run when the gap since
/// the run's last tile is at most three tile widths; a larger gap closes the run and
/// emits it. Accessed by a single producer; flush picks up whatever is still open.
///
pub struct CnvCache {
    max_gap: u32,
    runs: Vec<Option<CnvRun>>,
}

impl CnvCache {
    pub fn new(n_samples: usize) -> Self {
        Self {
            max_gap: (3 * TILE_WIDTH) as u32,
            runs: vec![None; n_samples],
        }
    }

    pub fn push(&mut self, emd: &Emd) -> Vec<Cnv> {
        assert_eq!(emd.depths.len(), self.runs.len());
        let cns = emd.cn();
        let fcs = emd.log2_fc();

        let mut emitted = Vec::new();
        let mut new_starts = Vec::new();

        for (i, &cn) in cns.iter().enumerate() {
            if cn == 2 {
                continue;
            }

            let extend = match &self.runs[i] {
                Some(run) => {
                    let last_end = run.positions.last().unwrap().end;
                    emd.position.start.saturating_sub(last_end) <= self.max_gap
                }
                None => false,
            };

            if !extend {
                if let Some(run) = self.runs[i].take() {
                    emitted.push(run.into_cnv(i));
                }
                self.runs[i] = Some(CnvRun::default());
                new_starts.push(emd.position.start);
            }

            let run = self.runs[i].as_mut().unwrap();
            run.depths.push(emd.depths[i]);
            run.positions.push(emd.position);
            run.log2fcs.push(fcs[i]);
            run.cns.push(cn);
        }

        // record where the cohort picked up new events inside still-open runs
        for run in self.runs.iter_mut().flatten() {
            let own_start = run.positions[0].start;
            for &s in &new_starts {
                if s != own_start {
                    run.splits.push(s);
                }
            }
        }

        emitted
    }

    /// Close and emit all open runs
    pub fn flush(&mut self) -> Vec<Cnv> {
        let mut emitted = Vec::new();
        for (i, run) in self.runs.iter_mut().enumerate() {
            if let Some(run) = run.take() {
                emitted.push(run.into_cnv(i));
            }
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const P: Position = Position { start: 123, end: 456 };

    #[test]
    fn test_em_depth_mixed_cohort() {
        let v = vec![1.0, 8.0, 33.0, 34.0, 35.0, 37.0, 31.0, 22.0, 66.0];
        let cns = em_depth(&v, P).cn();
        assert_eq!(cns, vec![0, 1, 2, 2, 2, 2, 2, 2, 4]);
    }

    #[test]
    fn test_em_depth_all_diploid() {
        let v = vec![30.0, 28.0, 33.0, 34.0, 35.0, 37.0, 31.0, 22.0, 38.0];
        let cns = em_depth(&v, P).cn();
        assert_eq!(cns, vec![2; 9]);
    }

    #[test]
    fn test_em_depth_synthetic_diploid_converges_fast() {
        let v = vec![0.9, 0.95, 1.0, 1.02, 1.05, 1.1, 0.92, 1.08];
        let emd = em_depth(&v, P);
        assert_eq!(emd.cn(), vec![2; 8]);
        // three iterations is plenty for clean diploid data
        assert_relative_eq!(emd.centers[2], 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_em_depth_outliers_and_posterior() {
        let v = vec![296.6, 16.7, 17.0, 3019.2, 14.4, 16.5, 14.2, 26.0, 7.0];
        let emd = em_depth(&v, P);
        let cns = emd.cn();

        // extreme outliers land in the top bin
        assert_eq!(cns[0], MAX_COPY_NUMBER - 1);
        assert_eq!(cns[3], MAX_COPY_NUMBER - 1);
        // the diploid cluster
        for i in [1, 2, 4, 5, 6] {
            assert_eq!(cns[i], 2, "sample {i} at depth {}", v[i]);
        }
        assert_eq!(cns[7], 3);
        assert_eq!(cns[8], 1);
    }

    #[test]
    fn test_same() {
        let v1 = vec![296.6, 16.7, 17.0, 3019.2, 14.4, 16.5, 14.2, 26.0, 7.0];
        let v2 = vec![96.6, 16.7, 17.0, 319.2, 14.4, 16.5, 14.2, 7.0, 16.0];
        let a = em_depth(&v1, P);
        let b = em_depth(&v2, P);

        let (shared, changed, pct) = b.same(&a);
        assert_eq!(shared, vec![0, 3]);
        assert_eq!(changed, vec![7, 8]);
        assert_relative_eq!(pct, 7.0 / 9.0);
    }

    #[test]
    fn test_log2_fc() {
        let v = vec![30.0, 28.0, 33.0, 34.0, 35.0, 37.0, 31.0, 22.0, 38.0];
        let emd = em_depth(&v, P);
        let fcs = emd.log2_fc();
        // a depth matching the diploid center has a fold change of 0
        let c2 = emd.centers[2];
        for (d, fc) in v.iter().zip(fcs.iter()) {
            assert_relative_eq!(*fc, (*d as f64 / c2).log2());
        }
    }

    #[test]
    fn test_cnv_cache_merge_and_gap() {
        let v = vec![1.0, 8.0, 33.0, 34.0, 35.0, 37.0, 31.0, 22.0, 66.0];
        let tile = TILE_WIDTH as u32;
        let mut cache = CnvCache::new(v.len());

        // first tile opens runs for the three non-diploid samples
        let emd1 = em_depth(&v, Position { start: 0, end: tile });
        assert!(cache.push(&emd1).is_empty());

        // a gap of exactly three tiles still merges
        let emd2 = em_depth(&v, Position { start: 4 * tile, end: 5 * tile });
        assert!(cache.push(&emd2).is_empty());

        // a larger gap closes the open runs and starts fresh ones
        let emd3 = em_depth(&v, Position { start: 20 * tile, end: 21 * tile });
        let closed = cache.push(&emd3);
        assert_eq!(closed.len(), 3);

        let first = closed.iter().find(|c| c.sample_index == 0).unwrap();
        assert_eq!(first.cns, vec![0, 0]);
        assert_eq!(first.positions.len(), 2);
        assert_eq!(first.positions[1].start, 4 * tile);
        assert_eq!(first.depths, vec![1.0, 1.0]);

        let flushed = cache.flush();
        assert_eq!(flushed.len(), 3);
        assert!(cache.flush().is_empty());
    }

    #[test]
    fn test_cnv_cache_cohort_splits() {
        let tile = TILE_WIDTH as u32;
        let mut cache = CnvCache::new(2);

        // sample 0 goes non-diploid first, sample 1 follows a tile later
        let emd1 = em_depth(
            &[10.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0],
            Position { start: 0, end: tile },
        );
        // only track the first two samples in the cache
        let mut cache_emd1 = emd1.clone();
        cache_emd1.depths.truncate(2);
        cache.push(&cache_emd1);

        let emd2 = em_depth(
            &[10.0, 40.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0],
            Position { start: tile, end: 2 * tile },
        );
        let mut cache_emd2 = emd2.clone();
        cache_emd2.depths.truncate(2);
        cache.push(&cache_emd2);

        let flushed = cache.flush();
        let run0 = flushed.iter().find(|c| c.sample_index == 0).unwrap();
        // sample 1's run start is recorded as a cohort split inside sample 0's run
        assert_eq!(run0.cohort_splits, vec![tile]);
    }
}
