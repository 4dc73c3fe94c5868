use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use rust_htslib::bam::{self, Read};

use crate::bai;
use crate::crai;
use crate::errors::IndexError;

/// Length in bases of the interval tiling used by bai linear indexes
pub const TILE_WIDTH: i64 = 0x4000;

/// The maximum normalized depth value
pub const MAX_CN: f32 = 6.0;

/// Per-tile data volumes for one sample, plus the sample's normalization constant
///
/// Tile volume arrays are sparse-tail truncated: tiles past the last one with data are
/// simply absent and must be treated as zero by consumers.
///
pub struct SampleIndex {
    path: String,
    sizes: Vec<Vec<i64>>,
    mapped: u64,
    unmapped: u64,
    median_size_per_tile: f64,
}

impl SampleIndex {
    pub fn new(
        sizes: Vec<Vec<i64>>,
        mapped: u64,
        unmapped: u64,
        path: &str,
    ) -> Result<Self, IndexError> {
        let median_size_per_tile = median_tile_size(&sizes).ok_or(IndexError::EmptyIndex {
            path: path.to_string(),
        })?;
        Ok(Self {
            path: path.to_string(),
            sizes,
            mapped,
            unmapped,
            median_size_per_tile,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The size of each 16KB block, in slices of chromosomes
    pub fn sizes(&self) -> &[Vec<i64>] {
        &self.sizes
    }

    pub fn mapped(&self) -> u64 {
        self.mapped
    }

    pub fn unmapped(&self) -> u64 {
        self.unmapped
    }

    /// Normalized depth of every tile in the given reference
    ///
    /// Values are scaled so that the sample-wide median tile is 1, then clamped to
    /// [0, MAX_CN]. References past the end of the index return an empty vector.
    ///
    pub fn normalized_depth(&self, ref_id: usize) -> Vec<f32> {
        let Some(ref_sizes) = self.sizes.get(ref_id) else {
            return Vec::new();
        };

        ref_sizes
            .iter()
            .map(|&size| (size as f64 / self.median_size_per_tile).min(MAX_CN as f64) as f32)
            .collect()
    }
}

/// Median tile volume across all references
///
/// The median is more stable than the mean here. Sparse chromosomes can push the naive
/// median to zero, in which case it is re-taken on the non-zero suffix.
///
fn median_tile_size(sizes: &[Vec<i64>]) -> Option<f64> {
    let mut all = sizes.iter().flatten().copied().collect::<Vec<_>>();
    if all.is_empty() {
        return None;
    }
    all.sort_unstable();

    let mut mid = all.len() / 2;
    if all[mid] == 0 {
        while mid < all.len() && all[mid] == 0 {
            mid += 1;
        }
        let suffix = &all[mid..];
        if suffix.is_empty() {
            return None;
        }
        return Some(suffix[suffix.len() / 2] as f64);
    }
    Some(all[mid] as f64)
}

/// Locate the `.bai` file for an input path
///
/// The input may be the index itself, the alignment file with the index at
/// `<path>.bai`, or the alignment file with a swapped `.bam` -> `.bai` extension.
///
fn open_bai(path: &str) -> Result<File, IndexError> {
    if path.ends_with(".bai") {
        return File::open(path).map_err(IndexError::Io);
    }
    if let Ok(f) = File::open(format!("{path}.bai")) {
        return Ok(f);
    }
    if let Some(stem) = path.strip_suffix(".bam") {
        if let Ok(f) = File::open(format!("{stem}.bai")) {
            return Ok(f);
        }
    }
    Err(IndexError::invalid(path, "unable to locate a .bai for this input"))
}

/// Load a `SampleIndex` from a bam/bai or crai path
///
/// The associated alignment file itself is never required: crai inputs decompress the
/// index directly, and bam inputs only need the `.bai` next to them.
///
pub fn read_sample_index(path: &str) -> Result<SampleIndex, IndexError> {
    if path.ends_with(".crai") {
        let file = File::open(path).map_err(IndexError::Io)?;
        let content = crai::read_crai(MultiGzDecoder::new(BufReader::new(file)), path)?;
        let sizes = content.tile_sizes(path)?;
        return SampleIndex::new(sizes, 0, 0, path);
    }

    let reader = BufReader::new(open_bai(path)?);
    let content = bai::read_bai(reader, path)?;
    SampleIndex::new(content.tile_sizes, content.mapped, content.unmapped, path)
}

/// Derive a short sample name for one input path
///
/// Bam inputs prefer the SM tag of the header read groups when the alignment file is
/// readable and all read groups agree; everything else falls back to the basename with
/// index/alignment extensions stripped and remaining dots flattened.
///
pub fn short_sample_name(path: &str) -> String {
    if path.ends_with(".bam") {
        if let Some(name) = read_group_sample_name(path) {
            return name;
        }
    }

    let base = Path::new(path)
        .file_name()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    let mut base = base.as_str();
    for ext in [".crai", ".bai", ".cram", ".bam"] {
        if let Some(stripped) = base.strip_suffix(ext) {
            base = stripped;
        }
    }
    base.replace('.', "-")
}

fn read_group_sample_name(path: &str) -> Option<String> {
    let bam_reader = bam::Reader::from_path(path).ok()?;
    let text = String::from_utf8_lossy(bam_reader.header().as_bytes()).into_owned();

    let mut names = Vec::new();
    for line in text.lines().filter(|x| x.starts_with("@RG")) {
        for field in line.split('\t') {
            if let Some(sample) = field.strip_prefix("SM:") {
                if !names.contains(&sample.to_string()) {
                    names.push(sample.to_string());
                }
            }
        }
    }

    match names.len() {
        1 => Some(names.pop().unwrap()),
        _ => None,
    }
}

/// Disambiguate repeated sample names with a numeric suffix, preserving input order
pub fn dedup_sample_names(names: &mut [String]) {
    for i in 0..names.len() {
        let mut n = 1;
        for j in (i + 1)..names.len() {
            if names[j] == names[i] {
                n += 1;
                names[j] = format!("{}_{}", names[j], n);
            }
        }
    }
}
