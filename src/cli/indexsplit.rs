use clap::Args;
use simple_error::{SimpleResult, bail};

#[derive(Args, Default)]
pub struct IndexsplitSettings {
    /// Number of regions to split the genome into
    #[arg(short = 'n', value_name = "N")]
    pub n: usize,

    /// Fasta index file; required when no .bam is listed among the inputs
    #[arg(long, value_name = "FILE")]
    pub fai: Option<String>,

    /// BED file of problematic regions to split small
    #[arg(short = 'p', long = "problematic", value_name = "BED")]
    pub problematic: Option<String>,

    /// Bai's/crais to use for splitting the genome
    #[arg(value_name = "INDEX", required = true, num_args = 1..)]
    pub indexes: Vec<String>,
}

/// Validate settings and update to parameters that can't be processed automatically by clap
pub fn validate_and_fix_indexsplit_settings(
    settings: IndexsplitSettings,
) -> SimpleResult<IndexsplitSettings> {
    if settings.n == 0 {
        bail!("-n must be greater than 0");
    }

    let any_bam = settings.indexes.iter().any(|x| x.ends_with(".bam"));
    if !any_bam && settings.fai.is_none() {
        bail!("--fai is required when no .bam is listed among the inputs");
    }

    if let Some(problematic) = &settings.problematic {
        if !std::path::Path::new(problematic).exists() {
            bail!("Can't find specified problematic regions file: '{}'", problematic);
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let settings = IndexsplitSettings {
            n: 10,
            indexes: vec!["a.bam".to_string()],
            ..Default::default()
        };
        assert!(validate_and_fix_indexsplit_settings(settings).is_ok());

        let zero_n = IndexsplitSettings {
            n: 0,
            indexes: vec!["a.bam".to_string()],
            ..Default::default()
        };
        assert!(validate_and_fix_indexsplit_settings(zero_n).is_err());

        let crai_no_fai = IndexsplitSettings {
            n: 10,
            indexes: vec!["a.crai".to_string()],
            ..Default::default()
        };
        assert!(validate_and_fix_indexsplit_settings(crai_no_fai).is_err());
    }
}
