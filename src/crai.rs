use std::io::{BufRead, BufReader, Read};

use crate::errors::IndexError;
use crate::sample_index::TILE_WIDTH;

/// Scalar applied to slice bytes-per-base so synthesized tile volumes keep enough
/// integer resolution. Its exact value is not observable in normalized output.
const PER_BASE_SCALAR: f64 = 100_000.0;

/// Index information for one cram slice
#[derive(Clone, Debug)]
pub struct CraiSlice {
    pub aln_start: i64,
    pub aln_span: i64,
    pub container_start: i64,
    pub slice_start: i64,
    pub slice_bytes: i64,
}

/// Parsed `.crai` content: slices grouped per reference, in reference-id order
pub struct CraiContent {
    pub slices: Vec<Vec<CraiSlice>>,
}

impl CraiContent {
    /// Synthesize per-tile data volumes for every reference
    ///
    /// Cram slices have arbitrary genomic spans, so each slice's byte count is spread
    /// uniformly over the 16KB tiles it covers to match the bai tiling.
    ///
    pub fn tile_sizes(&self, path: &str) -> Result<Vec<Vec<i64>>, IndexError> {
        self.slices
            .iter()
            .map(|slices| make_sizes(slices, path))
            .collect()
    }
}

/// Interpolate 16KB tile volumes from the slices of one reference
///
/// Gaps between slices become zero tiles; a slice shorter than one tile carries its
/// per-base weight into the next tile boundary.
///
fn make_sizes(slices: &[CraiSlice], path: &str) -> Result<Vec<i64>, IndexError> {
    if slices.is_empty() {
        return Ok(Vec::new());
    }

    let mut slices = slices.to_vec();
    slices.sort_by_key(|s| s.aln_start);

    let last = &slices[slices.len() - 1];
    let mut sizes =
        Vec::with_capacity(((last.aln_start + last.aln_span) / TILE_WIDTH + 1) as usize);

    let tile_width = TILE_WIDTH;
    let mut last_start = 0i64;
    let mut last_val = 0i64;

    for sl in &slices {
        if sl.aln_span <= 0 {
            return Err(IndexError::invalid(
                path,
                format!("non-positive alignment span at position {}", sl.aln_start),
            ));
        }

        // back fill gap tiles before this slice
        let mut first_fill = true;
        while last_start <= sl.aln_start - tile_width {
            if first_fill {
                sizes.push(last_val);
                last_val = 0;
                first_fill = false;
            } else {
                sizes.push(0);
            }
            last_start += tile_width;
        }

        let overhang = sl.aln_start - last_start;
        if !(-tile_width..=tile_width).contains(&overhang) {
            return Err(IndexError::invalid(path, "slice offsets out of order"));
        }

        let per_tile = (PER_BASE_SCALAR * sl.slice_bytes as f64 / sl.aln_span as f64) as i64;
        let n_tiles = sl.aln_span / tile_width;

        if n_tiles == 0 && sl.aln_start - last_start < tile_width {
            last_val = per_tile;
            continue;
        }

        for _ in 0..n_tiles {
            sizes.push(per_tile);
        }

        let covered_tile = (sl.aln_start + sl.aln_span) / tile_width;
        if sizes.len() as i64 - 1 > covered_tile {
            return Err(IndexError::invalid(path, "slice tiling out of bounds"));
        }

        last_start += tile_width * n_tiles;
        last_val = per_tile;
    }

    Ok(sizes)
}

/// Parse `.crai` records from an (already decompressed) tab-separated stream
///
/// Six integer fields per line: seq_id, aln_start, aln_span, container_offset,
/// slice_offset, slice_bytes. Reference ids may be sparse; skipped ids get empty
/// slice lists.
///
pub fn read_crai<R: Read>(reader: R, path: &str) -> Result<CraiContent, IndexError> {
    let reader = BufReader::new(reader);

    let mut slices: Vec<Vec<CraiSlice>> = Vec::new();
    for (line_index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| IndexError::invalid(path, format!("read failure: {e}")))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.len() != 6 {
            return Err(IndexError::invalid(
                path,
                format!(
                    "expected 6 fields in index, got {} at line {}",
                    fields.len(),
                    line_index + 1
                ),
            ));
        }

        let parse = |k: usize, label: &str| -> Result<i64, IndexError> {
            fields[k].parse::<i64>().map_err(|_| {
                IndexError::invalid(
                    path,
                    format!("unable to parse {label} ({}) at line {}", fields[k], line_index + 1),
                )
            })
        };

        let seq_id = parse(0, "seqID")?;
        if seq_id < 0 {
            // unplaced slices carry no tile information
            continue;
        }
        while slices.len() <= seq_id as usize {
            slices.push(Vec::new());
        }

        slices[seq_id as usize].push(CraiSlice {
            aln_start: parse(1, "alignment start")?,
            aln_span: parse(2, "alignment span")?,
            container_start: parse(3, "container start")?,
            slice_start: parse(4, "slice start")?,
            slice_bytes: parse(5, "slice length")?,
        });
    }

    Ok(CraiContent { slices })
}
