use std::collections::HashMap;
use std::io::Read;

use bio::data_structures::interval_tree::IntervalTree;
use log::info;
use unwrap::unwrap;

/// A set of chromosome regions which can be efficiently queried
#[derive(Clone, Default)]
pub struct ChromRegions {
    regions: IntervalTree<i64, u8>,
}

impl ChromRegions {
    /// Return true if the start-end range intersects with any regions stored in this object
    pub fn intersect(&self, start: i64, end: i64) -> bool {
        self.regions.find(start..end).next().is_some()
    }

    pub fn add_region(&mut self, start: i64, end: i64) {
        self.regions.insert(start..end, Default::default());
    }
}

/// Genomic intervals keyed by chromosome name, e.g. regions needing finer splits
#[derive(Clone, Default)]
pub struct GenomeRegions {
    pub chroms: HashMap<String, ChromRegions>,
}

impl GenomeRegions {
    /// Read regions from a BED file (plain or bgzf/gzip compressed)
    ///
    /// Only the first three columns are used: chrom, 0-based start, end.
    ///
    pub fn from_bed(filename: &str, label: &str) -> Self {
        use rust_htslib::bgzf;

        info!("Reading {label} regions from file '{filename}'");

        let mut regions = GenomeRegions::default();
        let mut reader = unwrap!(
            bgzf::Reader::from_path(filename),
            "Unable to open {label} regions file: '{filename}'"
        );

        let mut content = String::new();
        unwrap!(
            reader.read_to_string(&mut content),
            "Can't parse text from {label} regions file: '{filename}'"
        );

        for line in content.split('\n') {
            if line.is_empty() {
                continue;
            }

            let words = line.split('\t').collect::<Vec<_>>();
            assert!(
                words.len() >= 3,
                "expected at least 3 columns in {label} regions file: '{filename}'"
            );
            let chrom = words[0];
            let start = words[1].parse::<i64>().unwrap();
            let end = words[2].parse::<i64>().unwrap();
            regions.add_region(chrom, start, end);
        }

        regions
    }

    pub fn add_region(&mut self, chrom: &str, start: i64, end: i64) {
        self.chroms
            .entry(chrom.to_string())
            .or_default()
            .add_region(start, end);
    }

    pub fn chrom(&self, chrom: &str) -> Option<&ChromRegions> {
        self.chroms.get(chrom)
    }
}
