//! Track stats for the whole indexcov run
//!

use std::fs::File;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

pub const RUN_STATS_FILENAME: &str = "run.stats.json";

#[derive(Deserialize, Serialize)]
pub struct RunStep {
    pub name: String,
    pub version: String,
}

#[derive(Default, Deserialize, Serialize)]
pub struct SampleRunStats {
    pub sample_name: String,
    pub mapped: u64,
    pub unmapped: u64,
}

#[derive(Deserialize, Serialize)]
pub struct IndexcovRunStats {
    pub run_step: RunStep,
    pub chromosome_count: usize,
    pub samples: Vec<SampleRunStats>,
    pub total_runtime_secs: f64,
}

/// Write run_stats structure out in json format
pub fn write_indexcov_run_stats(output_dir: &Utf8Path, run_stats: &IndexcovRunStats) {
    let filename = output_dir.join(RUN_STATS_FILENAME);

    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &run_stats).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_run_stats() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = Utf8Path::from_path(dir.path()).unwrap();

        let stats = IndexcovRunStats {
            run_step: RunStep {
                name: "indexcov".to_string(),
                version: "0.0.0".to_string(),
            },
            chromosome_count: 2,
            samples: vec![SampleRunStats {
                sample_name: "s1".to_string(),
                mapped: 100,
                unmapped: 3,
            }],
            total_runtime_secs: 1.5,
        };
        write_indexcov_run_stats(output_dir, &stats);

        let text = std::fs::read_to_string(output_dir.join(RUN_STATS_FILENAME)).unwrap();
        let parsed: IndexcovRunStats = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.samples[0].mapped, 100);
        assert_eq!(parsed.chromosome_count, 2);
    }
}
