use std::fmt;
use std::io::Write;

use log::info;

use crate::bed_regions::GenomeRegions;
use crate::chrom_list::ChromList;
use crate::errors::IndexError;
use crate::sample_index::{TILE_WIDTH, read_sample_index};

/// Cohort tile volumes are divided by this before summing so the totals stay well
/// inside f64 precision
const VOLUME_SCALAR: f64 = 1e9;

/// A region of the genome created by `split`
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    /// amount of data in this chunk
    pub sum: f64,
    /// number of splits
    pub splits: usize,
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{:.2}\t{}",
            self.chrom, self.start, self.end, self.sum, self.splits
        )
    }
}

fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
        / (values.len() - 1) as f64;
    (mean, var.sqrt())
}

/// Clamp outlier tiles so centromere and mappability spikes don't dominate the split
///
/// Any tile above mean + 3 stddev is replaced by 8x the mean.
fn chop(sizes: &mut [Vec<f64>]) {
    for size in sizes.iter_mut() {
        let (m, std) = mean_stddev(size);
        let max = m + 3.0 * std;
        for s in size.iter_mut() {
            if *s > max {
                *s = 8.0 * m;
            }
        }
    }
}

/// Return the proportion of data in each chromosome, and each chromosome's total
fn percents(sizes: &mut [Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    chop(sizes);
    let sums = sizes.iter().map(|s| s.iter().sum::<f64>()).collect::<Vec<_>>();
    let tot = sums.iter().sum::<f64>();
    let pcts = sums.iter().map(|s| s / tot).collect::<Vec<_>>();
    (pcts, sums)
}

/// Sum raw tile volumes across the cohort, indexed by reference id
///
/// Samples are read sequentially into the shared accumulator; rows extend to the
/// longest sample seen for each reference.
pub fn cohort_tile_sums(
    paths: &[String],
    chrom_list: &ChromList,
) -> Result<Vec<Vec<f64>>, IndexError> {
    let mut sizes: Vec<Vec<f64>> = Vec::new();

    for path in paths {
        let index = read_sample_index(path)?;
        let sample_sizes = index.sizes();
        for chrom_index in 0..chrom_list.data.len() {
            while sizes.len() <= chrom_index {
                sizes.push(Vec::new());
            }
            let Some(o) = sample_sizes.get(chrom_index) else {
                break;
            };
            let s = &mut sizes[chrom_index];
            let shared = s.len().min(o.len());
            for (j, &v) in o.iter().enumerate().take(shared) {
                s[j] += v as f64 / VOLUME_SCALAR;
            }
            for &v in o.iter().skip(shared) {
                s.push(v as f64 / VOLUME_SCALAR);
            }
        }
    }
    Ok(sizes)
}

/// Generate `n` chunks of approximately equal cohort data volume
///
/// Tiles are walked in reference order, accumulating data until the per-reference
/// target is reached. A single tile holding more than one target's worth of data is
/// sub-split into equal-width pieces, and tiles overlapping a problematic region are cut
/// early so downstream work on those regions stays small.
pub fn split(
    mut sizes: Vec<Vec<f64>>,
    chrom_list: &ChromList,
    n: usize,
    problematic: Option<&GenomeRegions>,
) -> Vec<Chunk> {
    let (pcts, sums) = percents(&mut sizes);
    let mut chunks = Vec::with_capacity(n + chrom_list.data.len());

    for (ri, chrom_info) in chrom_list.data.iter().enumerate() {
        let chrom = chrom_info.label.as_str();
        let ref_len = chrom_info.length as i64;

        if ri >= sizes.len() || sizes[ri].is_empty() {
            // output the empty chrom with a sum of 0 so the user isn't surprised
            chunks.push(Chunk {
                chrom: chrom.to_string(),
                start: 0,
                end: ref_len,
                sum: 0.0,
                splits: 0,
            });
            continue;
        }

        let mut nr = (pcts[ri] * n as f64) as usize;
        if nr == 0 {
            if pcts[ri] > 0.0 {
                nr = 1;
            } else {
                chunks.push(Chunk {
                    chrom: chrom.to_string(),
                    start: 0,
                    end: ref_len,
                    sum: 0.0,
                    splits: 0,
                });
                continue;
            }
        }

        // the target: each emitted chunk should hold about this much data
        let target = sums[ri] / nr as f64;
        let size = &sizes[ri];
        let tree = problematic.and_then(|p| p.chrom(chrom));

        let mut sum = 0.0;
        let mut lasti = 0usize;

        for i in 0..size.len() {
            let tile_start = i as i64 * TILE_WIDTH;
            let tile_end = (i as i64 + 1) * TILE_WIDTH;
            let ovl = tree.map(|t| t.intersect(tile_start, tile_end)).unwrap_or(false);

            // a single hot tile gets its own sub-split chunks
            if size[i] > target || (size[i] >= 0.05 * target && ovl) {
                if i > lasti {
                    chunks.push(Chunk {
                        chrom: chrom.to_string(),
                        start: lasti as i64 * TILE_WIDTH,
                        end: tile_start,
                        sum,
                        splits: 1,
                    });
                }
                sum = size[i];
                let mut nsplits = (0.5 + sum / (target / 2.0)) as usize;
                if nsplits > 8 {
                    nsplits = 8;
                } else if nsplits < 1 {
                    nsplits = if ovl { 3 } else { 1 };
                }
                let mut start = tile_start;
                let l = (TILE_WIDTH as f64 / nsplits as f64 + 1.0) as i64;
                let tile_end = if i == size.len() - 1 {
                    ref_len.min(tile_end)
                } else {
                    tile_end
                };
                for _ in 0..nsplits {
                    let end = tile_end.min(start + l);
                    if end <= start {
                        break;
                    }
                    chunks.push(Chunk {
                        chrom: chrom.to_string(),
                        start,
                        end,
                        sum: sum / nsplits as f64,
                        splits: nsplits,
                    });
                    start += l;
                }

                lasti = i + 1;
                sum = 0.0;
                continue;
            }

            sum += size[i];
            if sum >= target || i == size.len() - 1 || (sum >= 0.2 * target && ovl) {
                let end = if i == size.len() - 1 { ref_len } else { tile_end };
                chunks.push(Chunk {
                    chrom: chrom.to_string(),
                    start: lasti as i64 * TILE_WIDTH,
                    end,
                    sum,
                    splits: 1,
                });
                lasti = i + 1;
                sum = 0.0;
            }
        }
    }
    chunks
}

/// Entry point for the indexsplit command: read the cohort and print the chunk table
pub fn run_indexsplit(
    paths: &[String],
    chrom_list: &ChromList,
    n: usize,
    problematic: Option<&GenomeRegions>,
) -> Result<(), IndexError> {
    info!("splitting {} indexes into ~{} chunks", paths.len(), n);

    let sizes = cohort_tile_sums(paths, chrom_list)?;
    let chunks = split(sizes, chrom_list, n, problematic);

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    for chunk in &chunks {
        writeln!(out, "{chunk}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn chrom_list_of(entries: &[(&str, u64)]) -> ChromList {
        let mut chrom_list = ChromList::default();
        for (label, length) in entries {
            chrom_list.add_chrom(label, *length);
        }
        chrom_list
    }

    #[test]
    fn test_even_split() {
        // 10 equal tiles into 5 chunks: each chunk spans 2 tiles with weight 2
        let chrom_list = chrom_list_of(&[("chr1", 10 * TILE_WIDTH as u64)]);
        let sizes = vec![vec![1.0; 10]];

        let chunks = split(sizes, &chrom_list, 5, None);
        assert_eq!(chunks.len(), 5);
        for (k, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.start, k as i64 * 2 * TILE_WIDTH);
            assert_eq!(chunk.end, (k as i64 + 1) * 2 * TILE_WIDTH);
            assert_relative_eq!(chunk.sum, 2.0);
            assert_eq!(chunk.splits, 1);
        }
    }

    #[test]
    fn test_hot_tile_subsplit() {
        let chrom_list = chrom_list_of(&[("chr1", 5 * TILE_WIDTH as u64)]);
        // the hot tile is clamped to 8 * mean before splitting
        let sizes = vec![vec![1.0, 1.0, 100.0, 1.0, 1.0]];

        let chunks = split(sizes, &chrom_list, 5, None);

        // clamped hot tile value: mean 20.8, so 166.4; the first two tiles flush first
        let hot = chunks.iter().filter(|c| c.splits > 1).collect::<Vec<_>>();
        assert!(!hot.is_empty());
        let nsplits = hot[0].splits;
        assert_eq!(hot.len(), nsplits);
        assert!(nsplits <= 8);
        // hot sub-chunks stay inside the single 16KB tile
        assert!(hot.iter().all(|c| c.start >= 2 * TILE_WIDTH && c.end <= 3 * TILE_WIDTH));

        // coverage: chunks tile the reference without gaps
        let mut pos = 0;
        for chunk in &chunks {
            assert_eq!(chunk.start, pos);
            assert!(chunk.end > chunk.start);
            pos = chunk.end;
        }
        assert_eq!(pos, 5 * TILE_WIDTH);
    }

    #[test]
    fn test_weight_conservation() {
        let chrom_list = chrom_list_of(&[("chr1", 20 * TILE_WIDTH as u64)]);
        let sizes = vec![(0..20).map(|i| 1.0 + (i % 3) as f64).collect::<Vec<f64>>()];
        let mut clamped = sizes.clone();
        chop(&mut clamped);
        let expected: f64 = clamped[0].iter().sum();

        // sub-split chunks carry sum/nsplits each, so the plain sum is conserved
        let chunks = split(sizes, &chrom_list, 4, None);
        let total: f64 = chunks.iter().map(|c| c.sum).sum();
        assert_relative_eq!(total, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_reference() {
        let chrom_list = chrom_list_of(&[("chr1", 3 * TILE_WIDTH as u64), ("chrEmpty", 1000)]);
        let sizes = vec![vec![1.0, 1.0, 1.0]];

        let chunks = split(sizes, &chrom_list, 2, None);
        let empty = chunks.iter().find(|c| c.chrom == "chrEmpty").unwrap();
        assert_eq!((empty.start, empty.end), (0, 1000));
        assert_relative_eq!(empty.sum, 0.0);
        assert_eq!(empty.splits, 0);
    }

    #[test]
    fn test_problematic_early_cut() {
        let chrom_list = chrom_list_of(&[("chr1", 10 * TILE_WIDTH as u64)]);
        let sizes = vec![vec![1.0; 10]];

        let mut probs = GenomeRegions::default();
        // tile 1 overlaps a problematic region
        probs.add_region("chr1", TILE_WIDTH + 10, TILE_WIDTH + 20);

        let chunks = split(sizes, &chrom_list, 5, Some(&probs));
        // the problematic tile gets cut out on its own, so we end up with extra chunks
        assert!(chunks.len() > 5);
        let mut pos = 0;
        for chunk in chunks.iter() {
            assert_eq!(chunk.start, pos);
            pos = chunk.end;
        }
        assert_eq!(pos, 10 * TILE_WIDTH);
    }

    #[test]
    fn test_chunk_display() {
        let chunk = Chunk {
            chrom: "chr1".to_string(),
            start: 0,
            end: 16384,
            sum: 2.0,
            splits: 1,
        };
        assert_eq!(format!("{chunk}"), "chr1\t0\t16384\t2.00\t1");
    }

    #[test]
    fn test_chop() {
        let mut sizes = vec![vec![1.0, 1.0, 1.0, 1.0, 100.0]];
        chop(&mut sizes);
        let (m, _) = mean_stddev(&[1.0, 1.0, 1.0, 1.0, 100.0]);
        assert_relative_eq!(sizes[0][4], 8.0 * m);
        assert_relative_eq!(sizes[0][0], 1.0);
    }
}
