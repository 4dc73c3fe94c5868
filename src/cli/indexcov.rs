use camino::Utf8PathBuf;
use clap::Args;
use regex::Regex;
use simple_error::{SimpleResult, bail};

/// Default pattern of reference names excluded from the analysis: viral/decoy contigs,
/// unplaced and alternate haplotype sequence
pub const DEFAULT_EXCLUDE_PATT: &str = r"^chrEBV$|^NC|_random$|Un_|^HLA\-|_alt$|hap\d$";

#[derive(Args, Default)]
pub struct IndexcovSettings {
    /// Directory for output files (created if absent)
    #[arg(short = 'd', long, value_name = "DIR")]
    pub directory: Utf8PathBuf,

    /// Comma delimited names of the sex chromosome(s) used to infer sex; set to '' if
    /// no sex chromosomes are present
    #[arg(short = 'X', long, value_name = "CSV", default_value = "X,Y")]
    pub sex: String,

    /// Regular expression of chromosome names to exclude
    #[arg(long = "excludepatt", value_name = "REGEX", default_value = DEFAULT_EXCLUDE_PATT)]
    pub exclude_patt: String,

    /// Plot GL chromosomes like GL000201.1 which are not plotted by default
    #[arg(short = 'e', long = "includegl")]
    pub include_gl: bool,

    /// Optional single chromosome to restrict the analysis to
    #[arg(short = 'c', long, value_name = "CHROM")]
    pub chrom: Option<String>,

    /// Fasta index file; required when inputs are crais or bare index files
    #[arg(short = 'f', long, value_name = "FILE")]
    pub fai: Option<String>,

    /// Bam(s), bai(s) or crai(s) for which to estimate coverage
    #[arg(value_name = "INDEX", required = true, num_args = 1..)]
    pub indexes: Vec<String>,

    #[arg(skip)]
    pub sex_list: Vec<String>,

    #[arg(skip)]
    pub exclude: Option<Regex>,
}

/// Validate settings and update to parameters that can't be processed automatically by clap
pub fn validate_and_fix_indexcov_settings(
    settings: IndexcovSettings,
) -> SimpleResult<IndexcovSettings> {
    let mut settings = settings;

    if settings.directory.as_str().is_empty() {
        bail!("Must specify an output directory");
    }

    settings.sex_list = settings
        .sex
        .trim()
        .split(',')
        .filter(|x| !x.is_empty())
        .map(|x| x.to_string())
        .collect();

    settings.exclude = if settings.exclude_patt.is_empty() {
        None
    } else {
        match Regex::new(&settings.exclude_patt) {
            Ok(x) => Some(x),
            Err(e) => bail!("Invalid --excludepatt regular expression: {}", e),
        }
    };

    let any_bam = settings.indexes.iter().any(|x| x.ends_with(".bam"));
    if !any_bam && settings.fai.is_none() {
        bail!("--fai is required when no .bam is listed among the inputs");
    }
    if let Some(fai) = &settings.fai {
        if !std::path::Path::new(fai).exists() {
            bail!("Can't find specified fasta index file: '{}'", fai);
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> IndexcovSettings {
        IndexcovSettings {
            directory: Utf8PathBuf::from("out"),
            sex: "X,Y".to_string(),
            exclude_patt: DEFAULT_EXCLUDE_PATT.to_string(),
            indexes: vec!["sample.bam".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_sex_list_parse() {
        let settings = validate_and_fix_indexcov_settings(base_settings()).unwrap();
        assert_eq!(settings.sex_list, vec!["X", "Y"]);

        let mut empty_sex = base_settings();
        empty_sex.sex = "".to_string();
        let settings = validate_and_fix_indexcov_settings(empty_sex).unwrap();
        assert!(settings.sex_list.is_empty());
    }

    #[test]
    fn test_default_exclude_pattern() {
        let settings = validate_and_fix_indexcov_settings(base_settings()).unwrap();
        let exclude = settings.exclude.unwrap();
        for name in ["chrEBV", "GL000220.1_random", "chrUn_gl000229", "HLA-A", "chr6_apd_hap1"] {
            assert!(exclude.is_match(name), "expected '{name}' to be excluded");
        }
        for name in ["chr1", "chrX", "22"] {
            assert!(!exclude.is_match(name), "expected '{name}' to be kept");
        }
    }

    #[test]
    fn test_fai_required_without_bam() {
        let mut settings = base_settings();
        settings.indexes = vec!["sample.crai".to_string()];
        assert!(validate_and_fix_indexcov_settings(settings).is_err());
    }
}
