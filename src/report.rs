use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use log::info;
use rust_htslib::bgzf;
use unwrap::unwrap;

use crate::errors::IndexError;
use crate::pca::PcaResult;
use crate::roc::{self, BinCounter, SLOTS, SLOTS_MID};
use crate::sample_index::TILE_WIDTH;

/// Open the bgzf-compressed bedGraph output
pub fn bedgraph_writer(base: &Utf8Path) -> bgzf::Writer {
    let filename = format!("{base}.bed.gz");
    info!("Writing per-tile depth bedGraph to file: '{filename}'");
    unwrap!(
        bgzf::Writer::from_path(&filename),
        "Unable to create depth bedGraph file: '{filename}'"
    )
}

pub fn roc_writer(base: &Utf8Path) -> BufWriter<File> {
    let filename = format!("{base}.roc");
    info!("Writing coverage ROC table to file: '{filename}'");
    let f = unwrap!(
        File::create(&filename),
        "Unable to create ROC table file: '{filename}'"
    );
    BufWriter::new(f)
}

pub fn write_bedgraph_header<W: Write>(w: &mut W, names: &[String]) -> Result<(), IndexError> {
    writeln!(w, "#chrom\tstart\tend\t{}", names.join("\t"))?;
    Ok(())
}

/// Write one bedGraph row per tile; samples shorter than `longest` pad with zero
pub fn write_bedgraph_rows<W: Write>(
    w: &mut W,
    chrom: &str,
    depths: &[Vec<f32>],
    longest: usize,
) -> Result<(), IndexError> {
    let mut row = String::new();
    for i in 0..longest {
        row.clear();
        for d in depths {
            row.push('\t');
            match d.get(i) {
                Some(&v) => row.push_str(&format_depth(v)),
                None => row.push('0'),
            }
        }
        writeln!(
            w,
            "{}\t{}\t{}{}",
            chrom,
            i as i64 * TILE_WIDTH,
            (i as i64 + 1) * TILE_WIDTH,
            row
        )?;
    }
    Ok(())
}

/// Format a normalized depth with 3 significant digits, trailing zeros trimmed
fn format_depth(v: f32) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let prec = (2 - v.abs().log10().floor() as i32).max(0) as usize;
    let s = format!("{v:.prec$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Compute each sample's ROC vector for one chromosome and append the table rows
pub fn write_rocs<W: Write>(
    counts: &[Vec<usize>],
    names: &[String],
    chrom: &str,
    fh: &mut W,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let rocs = counts.iter().map(|c| roc::counts_roc(c)).collect::<Vec<_>>();

    writeln!(fh, "#chrom\tcov\t{}", names.join("\t"))?;
    let mut vals = String::new();
    for i in 0..SLOTS {
        vals.clear();
        for sample_rocs in rocs.iter() {
            vals.push('\t');
            vals.push_str(&format!("{:.2}", sample_rocs[i]));
        }
        writeln!(
            fh,
            "{}\t{:.2}{}",
            chrom,
            i as f64 / (SLOTS as f64 * SLOTS_MID),
            vals
        )?;
    }
    Ok(rocs)
}

/// Write the PED-style sample summary
///
/// One row per sample: pedigree placeholders, the inferred sex, per-sex-chromosome copy
/// numbers, tile bin counts, the ROC slope, the outlier ratio, up to 5 PC scores, and
/// mapped/unmapped read counts when the indexes carried them.
///
/// The `_inferred` key is added to `sexes` as a side effect so downstream consumers of
/// the sex table see the final integer calls.
///
#[allow(clippy::too_many_arguments)]
pub fn write_ped(
    base: &Utf8Path,
    sexes: &mut HashMap<String, Vec<f64>>,
    sex_keys: &[String],
    samples: &[String],
    counters: &[BinCounter],
    slopes: &[f32],
    pca: Option<&PcaResult>,
    mapped: Option<&[u64]>,
    unmapped: Option<&[u64]>,
) -> Result<(), IndexError> {
    let filename = format!("{base}.ped");
    info!("Writing sample summary to file: '{filename}'");
    let mut f = BufWriter::new(File::create(&filename)?);

    let pc_count = pca.map(|p| p.variance_fraction.len().min(5)).unwrap_or(0);

    let mut hdr = sex_keys.iter().map(|k| format!("CN{k}")).collect::<Vec<_>>();
    hdr.extend(
        ["bins.out", "bins.lo", "bins.hi", "bins.in", "slope", "p.out"]
            .iter()
            .map(|x| x.to_string()),
    );
    for i in 0..pc_count {
        hdr.push(format!("PC{}", i + 1));
    }
    if mapped.is_some() {
        hdr.push("mapped".to_string());
        hdr.push("unmapped".to_string());
    }
    writeln!(
        f,
        "#family_id\tsample_id\tpaternal_id\tmaternal_id\tsex\tphenotype\t{}",
        hdr.join("\t")
    )?;

    let inferred_key = sex_keys.iter().find(|k| sexes.contains_key(*k)).cloned();
    let mut inferred_all = vec![-9.0f64; samples.len()];

    for (i, sample) in samples.iter().enumerate() {
        let inferred = match &inferred_key {
            Some(k) => (0.5 + sexes[k][i]).floor() as i64,
            None => -9,
        };
        inferred_all[i] = inferred as f64;

        let mut s = Vec::with_capacity(hdr.len());
        for k in sex_keys {
            match sexes.get(k) {
                Some(cns) => s.push(format!("{:.2}", cns[i])),
                None => s.push("-9".to_string()),
            }
        }
        let cnt = &counters[i];
        s.push(format!("{}", cnt.out));
        s.push(format!("{}", cnt.low));
        s.push(format!("{}", cnt.hi));
        s.push(format!("{}", cnt.in_));
        s.push(format!("{:.3}", slopes[i]));
        s.push(format!("{:.2}", cnt.out as f64 / cnt.in_ as f64));
        if let Some(p) = pca {
            for j in 0..pc_count {
                s.push(format!("{:.2}", p.scores[i][j]));
            }
        }
        if let (Some(mapped), Some(unmapped)) = (mapped, unmapped) {
            s.push(format!("{}", mapped[i]));
            s.push(format!("{}", unmapped[i]));
        }

        writeln!(f, "unknown\t{}\t-9\t-9\t{}\t-9\t{}", sample, inferred, s.join("\t"))?;
    }

    sexes.insert("_inferred".to_string(), inferred_all);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roc::counts_at_depth;
    use std::io::Read;

    #[test]
    fn test_format_depth() {
        assert_eq!(format_depth(0.0), "0");
        assert_eq!(format_depth(1.0), "1");
        assert_eq!(format_depth(0.5), "0.5");
        assert_eq!(format_depth(1.2345), "1.23");
        assert_eq!(format_depth(0.012345), "0.0123");
        assert_eq!(format_depth(6.0), "6");
    }

    #[test]
    fn test_write_bedgraph_rows() {
        let mut out = Vec::new();
        let depths = vec![vec![1.0, 0.5], vec![1.0]];
        write_bedgraph_rows(&mut out, "chr1", &depths, 2).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "chr1\t0\t16384\t1\t1");
        // the short sample pads with zero
        assert_eq!(lines[1], "chr1\t16384\t32768\t0.5\t0");
    }

    #[test]
    fn test_write_rocs() {
        let mut counts = vec![vec![0usize; SLOTS]];
        counts_at_depth(&[1.0, 1.0, 1.0], &mut counts[0]);

        let mut out = Vec::new();
        let names = vec!["s1".to_string()];
        let rocs = write_rocs(&counts, &names, "chr1", &mut out).unwrap();
        assert_eq!(rocs.len(), 1);

        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), SLOTS + 1);
        assert_eq!(lines[0], "#chrom\tcov\ts1");
        assert_eq!(lines[1], "chr1\t0.00\t1.00");
        assert!(lines[SLOTS].starts_with("chr1\t1.48\t"));
    }

    #[test]
    fn test_write_ped() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap().join("cohort-indexcov");

        let mut sexes = HashMap::new();
        sexes.insert("X".to_string(), vec![2.01, 0.99]);
        sexes.insert("Y".to_string(), vec![0.02, 1.02]);
        let sex_keys = vec!["X".to_string(), "Y".to_string()];
        let samples = vec!["a".to_string(), "b".to_string()];
        let counters = vec![
            BinCounter { out: 10, low: 2, hi: 3, in_: 90 },
            BinCounter { out: 20, low: 4, hi: 6, in_: 80 },
        ];
        let slopes = vec![0.85f32, 0.92];

        write_ped(
            &base, &mut sexes, &sex_keys, &samples, &counters, &slopes, None, None, None,
        )
        .unwrap();

        let text = std::fs::read_to_string(format!("{base}.ped")).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "#family_id\tsample_id\tpaternal_id\tmaternal_id\tsex\tphenotype\tCNX\tCNY\tbins.out\tbins.lo\tbins.hi\tbins.in\tslope\tp.out"
        );
        assert_eq!(lines[1], "unknown\ta\t-9\t-9\t2\t-9\t2.01\t0.02\t10\t2\t3\t90\t0.850\t0.11");
        assert_eq!(lines[2], "unknown\tb\t-9\t-9\t1\t-9\t0.99\t1.02\t20\t4\t6\t80\t0.920\t0.25");

        // the inferred integer calls are published back into the sex table
        assert_eq!(sexes["_inferred"], vec![2.0, 1.0]);
    }

    #[test]
    fn test_bedgraph_writer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap().join("cohort-indexcov");

        let mut w = bedgraph_writer(&base);
        let names = vec!["s1".to_string()];
        write_bedgraph_header(&mut w, &names).unwrap();
        write_bedgraph_rows(&mut w, "chr1", &[vec![1.0]], 1).unwrap();
        drop(w);

        let mut reader = bgzf::Reader::from_path(format!("{base}.bed.gz")).unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "#chrom\tstart\tend\ts1\nchr1\t0\t16384\t1\n");
    }
}
