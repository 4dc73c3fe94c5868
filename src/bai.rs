use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::errors::IndexError;

const BAI_MAGIC: [u8; 4] = *b"BAI\x01";

/// Bin number of the reference-statistics pseudo bin used in BAI indexes
const STATS_DUMMY_BIN: u32 = 0x924a;

/// A 64-bit bgzf virtual offset: `(compressed_offset << 16) | uncompressed_offset`
///
/// The linear ordering of virtual offsets matches the underlying file order, so the raw
/// scalar doubles as a data-volume coordinate.
///
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct VirtualOffset(pub u64);

impl VirtualOffset {
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        Self((compressed << 16) | uncompressed as u64)
    }

    pub fn compressed(&self) -> u64 {
        self.0 >> 16
    }

    pub fn uncompressed(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn value(&self) -> i64 {
        self.0 as i64
    }
}

/// Per-tile data volumes and read-count stats parsed from one `.bai` file
pub struct BaiContent {
    /// For each reference, the approximate compressed bytes of alignment data in each
    /// 16KB tile. Length is one less than the linear-index interval count; trailing
    /// zero tiles may be absent.
    pub tile_sizes: Vec<Vec<i64>>,
    pub mapped: u64,
    pub unmapped: u64,
}

/// Parse a `.bai` index from its standard on-disk format
///
/// Bins are consumed only to advance the reader, except the stats pseudo-bin whose
/// second chunk carries the per-reference mapped/unmapped read counts. Tile volumes come
/// from the linear index: the difference of adjacent interval virtual offsets.
///
pub fn read_bai<R: Read>(mut reader: R, path: &str) -> Result<BaiContent, IndexError> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| IndexError::invalid(path, "truncated bai header"))?;
    if magic != BAI_MAGIC {
        return Err(IndexError::invalid(path, "bad bai magic"));
    }

    let n_ref = read_i32(&mut reader, path, "n_ref")?;
    if n_ref < 0 {
        return Err(IndexError::invalid(path, "negative reference count"));
    }

    let mut tile_sizes = Vec::with_capacity(n_ref as usize);
    let mut mapped = 0u64;
    let mut unmapped = 0u64;

    for ref_index in 0..n_ref {
        let n_bin = read_i32(&mut reader, path, "n_bin")?;
        for _ in 0..n_bin {
            let bin = read_u32(&mut reader, path, "bin")?;
            let n_chunk = read_i32(&mut reader, path, "n_chunk")?;
            if bin == STATS_DUMMY_BIN && n_chunk == 2 {
                // chunk 1 is the reference begin/end span, chunk 2 the read counts
                let _ref_beg = read_u64(&mut reader, path, "ref_beg")?;
                let _ref_end = read_u64(&mut reader, path, "ref_end")?;
                mapped += read_u64(&mut reader, path, "n_mapped")?;
                unmapped += read_u64(&mut reader, path, "n_unmapped")?;
            } else {
                for _ in 0..n_chunk {
                    let _chunk_beg = read_u64(&mut reader, path, "chunk_beg")?;
                    let _chunk_end = read_u64(&mut reader, path, "chunk_end")?;
                }
            }
        }

        let n_intv = read_i32(&mut reader, path, "n_intv")?;
        let mut intervals = Vec::with_capacity(n_intv.max(0) as usize);
        for _ in 0..n_intv {
            intervals.push(VirtualOffset(read_u64(&mut reader, path, "ioffset")?));
        }

        let mut sizes = Vec::with_capacity(intervals.len().saturating_sub(1));
        for pair in intervals.windows(2) {
            let size = pair[1].value() - pair[0].value();
            if size < 0 {
                return Err(IndexError::invalid(
                    path,
                    format!("non-monotonic virtual offsets for reference {ref_index}"),
                ));
            }
            sizes.push(size);
        }
        tile_sizes.push(sizes);
    }

    // optional trailer with the count of placeless reads
    if let Ok(n_no_coor) = reader.read_u64::<LittleEndian>() {
        unmapped += n_no_coor;
    }

    Ok(BaiContent {
        tile_sizes,
        mapped,
        unmapped,
    })
}

fn read_i32<R: Read>(reader: &mut R, path: &str, field: &str) -> Result<i32, IndexError> {
    reader
        .read_i32::<LittleEndian>()
        .map_err(|_| IndexError::invalid(path, format!("truncated while reading {field}")))
}

fn read_u32<R: Read>(reader: &mut R, path: &str, field: &str) -> Result<u32, IndexError> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|_| IndexError::invalid(path, format!("truncated while reading {field}")))
}

fn read_u64<R: Read>(reader: &mut R, path: &str, field: &str) -> Result<u64, IndexError> {
    reader
        .read_u64::<LittleEndian>()
        .map_err(|_| IndexError::invalid(path, format!("truncated while reading {field}")))
}
