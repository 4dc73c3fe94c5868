use std::collections::HashMap;
use std::io::{BufRead, BufReader};

use rust_htslib::bam::{self, Read};
use unwrap::unwrap;

use crate::errors::IndexError;

#[derive(Clone, Debug, PartialEq)]
pub struct ChromInfo {
    pub label: String,
    pub length: u64,
}

/// Ordered list of chromosome names and lengths, with label lookup
///
/// The order matches the source (alignment-file header or fasta index), and defines the
/// reference IDs used throughout the per-tile data structures.
///
#[derive(Clone, Debug, Default)]
pub struct ChromList {
    pub data: Vec<ChromInfo>,
    label_to_index: HashMap<String, usize>,
}

impl ChromList {
    pub fn add_chrom(&mut self, label: &str, length: u64) {
        assert!(!self.label_to_index.contains_key(label));
        self.label_to_index
            .insert(label.to_string(), self.data.len());
        self.data.push(ChromInfo {
            label: label.to_string(),
            length,
        });
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.label_to_index.get(label).copied()
    }

    pub fn from_bam_header(header: &bam::HeaderView) -> Self {
        let mut chrom_list = Self::default();
        for tid in 0..header.target_count() {
            let label = std::str::from_utf8(header.tid2name(tid)).unwrap();
            let length = header.target_len(tid).unwrap();
            chrom_list.add_chrom(label, length);
        }
        chrom_list
    }

    pub fn from_bam_filename(filename: &str) -> Self {
        let bam_reader = unwrap!(
            bam::Reader::from_path(filename),
            "Unable to open alignment file: '{filename}'"
        );
        Self::from_bam_header(bam_reader.header())
    }

    /// Build the chromosome list from a fasta index
    ///
    /// Only the name and length columns are used; records keep their file order.
    ///
    pub fn from_fai(filename: &str) -> Result<Self, IndexError> {
        let reader = BufReader::new(std::fs::File::open(filename)?);

        let mut chrom_list = Self::default();
        for (line_index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let words = line.split('\t').collect::<Vec<_>>();
            if words.len() < 2 {
                return Err(IndexError::invalid(
                    filename,
                    format!("expected at least 2 fai fields at line {}", line_index + 1),
                ));
            }
            let length = words[1].parse::<u64>().map_err(|_| {
                IndexError::invalid(
                    filename,
                    format!("unable to parse length '{}' at line {}", words[1], line_index + 1),
                )
            })?;
            chrom_list.add_chrom(words[0], length);
        }

        if chrom_list.data.is_empty() {
            return Err(IndexError::invalid(filename, "no usable chromosomes"));
        }
        Ok(chrom_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_add_chrom() {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 10000);
        chrom_list.add_chrom("chr2", 5000);

        assert_eq!(chrom_list.data.len(), 2);
        assert_eq!(chrom_list.index_of("chr2"), Some(1));
        assert_eq!(chrom_list.index_of("chr3"), None);
        assert_eq!(chrom_list.data[0].length, 10000);
    }

    #[test]
    fn test_from_fai() {
        let dir = tempfile::tempdir().unwrap();
        let fai_path = dir.path().join("ref.fa.fai");
        let mut f = std::fs::File::create(&fai_path).unwrap();
        writeln!(f, "chr1\t248956422\t112\t70\t71").unwrap();
        writeln!(f, "chr2\t242193529\t252513167\t70\t71").unwrap();

        let chrom_list = ChromList::from_fai(fai_path.to_str().unwrap()).unwrap();
        assert_eq!(chrom_list.data.len(), 2);
        assert_eq!(chrom_list.data[0].label, "chr1");
        assert_eq!(chrom_list.data[1].length, 242193529);
    }

    #[test]
    fn test_from_fai_bad_length() {
        let dir = tempfile::tempdir().unwrap();
        let fai_path = dir.path().join("ref.fa.fai");
        let mut f = std::fs::File::create(&fai_path).unwrap();
        writeln!(f, "chr1\tnot_a_number").unwrap();

        assert!(ChromList::from_fai(fai_path.to_str().unwrap()).is_err());
    }
}
