use std::collections::HashMap;

use log::warn;
use simple_error::{SimpleResult, bail};

/// Expected ploidy of the input samples
pub const PLOIDY: usize = 2;

/// Estimate the copy number of one chromosome for every sample
///
/// This is a crude estimate but it tends to work well: twice the median of the non-zero
/// normalized depths. Tiles at exactly zero are excluded as centromere. A sample with no
/// non-zero tiles reports -0.1 to flag missing data.
///
pub fn copy_numbers(depths: &[Vec<f32>]) -> Vec<f64> {
    let mut meds = Vec::with_capacity(depths.len());
    for d in depths {
        let mut tmp = d.iter().copied().filter(|&dp| dp != 0.0).collect::<Vec<_>>();
        if tmp.is_empty() {
            meds.push(-0.1);
            continue;
        }
        tmp.sort_by(|a, b| a.partial_cmp(b).unwrap());
        meds.push(PLOIDY as f64 * tmp[tmp.len() / 2] as f64);
    }
    meds
}

/// Check whether `chrom` is one of the configured sex chromosomes
///
/// Only exact names match, but a near miss differing by a "chr" prefix is logged so the
/// user can fix the --sex argument.
///
pub fn is_sex_chrom(sex_chroms: &[String], chrom: &str) -> bool {
    for a in sex_chroms {
        if a == chrom {
            return true;
        }
        let na = if let Some(stripped) = a.strip_prefix("chr") {
            stripped.to_string()
        } else if chrom.starts_with("chr") {
            format!("chr{a}")
        } else {
            a.clone()
        };
        if na == chrom {
            warn!(
                "found chromosome \"{chrom}\", wanted \"{a}\"; please use exact chromosome names for --sex"
            );
        }
    }
    false
}

/// Compare observed sex chromosomes against the configured list
///
/// A mismatch is only a warning; finding none at all under a non-default configuration
/// is an error since the user explicitly asked for chromosomes that don't exist.
///
pub fn check_sex_chroms(
    observed: &HashMap<String, Vec<f64>>,
    expected: &[String],
) -> SimpleResult<()> {
    if observed.len() == expected.len() {
        return Ok(());
    }

    let mut found = observed.keys().cloned().collect::<Vec<_>>();
    found.sort();
    let msg = format!(
        "expected {} sex chromosomes, found: {}. You can set the expected with --sex '{}'",
        expected.len(),
        observed.len(),
        found.join(",")
    );

    if observed.is_empty() && expected != ["X".to_string(), "Y".to_string()] {
        bail!("{}", msg);
    }
    warn!("{msg}");
    Ok(())
}
