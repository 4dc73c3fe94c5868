use clap::Args;
use simple_error::{SimpleResult, bail};

#[derive(Args, Default)]
pub struct DepthSettings {
    /// Window size in which to calculate mean depth
    #[arg(short = 'w', long = "window", value_name = "BP", default_value_t = 250)]
    pub window_size: usize,

    /// Windows with depth at or above this are excessive; 0 reports the depth of all
    /// regions without an excessive class
    #[arg(short = 'm', long = "maxmeandepth", value_name = "DEPTH", default_value_t = 0)]
    pub max_mean_depth: u32,

    /// Mapping quality cutoff passed to the depth subprocess
    #[arg(short = 'Q', long = "mapq", value_name = "MAPQ", default_value_t = 1)]
    pub mapq: u32,

    /// Optional chromosome to limit the analysis to
    #[arg(short = 'c', long, value_name = "CHROM")]
    pub chrom: Option<String>,

    /// Minimum depth considered callable
    #[arg(long = "mincov", value_name = "DEPTH", default_value_t = 4)]
    pub min_cov: u32,

    /// Path to the reference fasta (a .fai must sit next to it)
    #[arg(short = 'r', long = "reference", value_name = "FASTA")]
    pub reference: String,

    /// Number of depth subprocesses to run in parallel
    #[arg(short = 'p', long, value_name = "N", default_value_t = 4)]
    pub processes: usize,

    /// Optional BED of positions or regions to restrict depth calculations to
    #[arg(short = 'b', long, value_name = "BED")]
    pub bed: Option<String>,

    /// Prefix for the output files (-depth.bed, -callable.bed)
    #[arg(value_name = "PREFIX")]
    pub prefix: String,

    /// Alignment file for which to calculate depth
    #[arg(value_name = "BAM")]
    pub bam: String,
}

/// Validate settings and update to parameters that can't be processed automatically by clap
pub fn validate_and_fix_depth_settings(settings: DepthSettings) -> SimpleResult<DepthSettings> {
    if settings.window_size == 0 {
        bail!("--window must be greater than 0");
    }
    if settings.prefix.is_empty() {
        bail!("you must specify an output prefix");
    }
    if !std::path::Path::new(&settings.reference).exists() {
        bail!("Can't find specified reference file: '{}'", settings.reference);
    }
    if !std::path::Path::new(&settings.bam).exists() {
        bail!("Can't find specified alignment file: '{}'", settings.bam);
    }
    if let Some(bed) = &settings.bed {
        if !std::path::Path::new(bed).exists() {
            bail!("Can't find specified regions file: '{}'", bed);
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.fa");
        let bam = dir.path().join("sample.bam");
        for path in [&reference, &bam] {
            write!(std::fs::File::create(path).unwrap(), "x").unwrap();
        }

        let settings = DepthSettings {
            window_size: 250,
            reference: reference.to_str().unwrap().to_string(),
            bam: bam.to_str().unwrap().to_string(),
            prefix: "out".to_string(),
            ..Default::default()
        };
        assert!(validate_and_fix_depth_settings(settings).is_ok());

        let missing_prefix = DepthSettings {
            window_size: 250,
            reference: reference.to_str().unwrap().to_string(),
            bam: bam.to_str().unwrap().to_string(),
            ..Default::default()
        };
        assert!(validate_and_fix_depth_settings(missing_prefix).is_err());
    }
}
