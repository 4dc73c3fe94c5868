use std::collections::HashMap;
use std::sync::mpsc::channel;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use simple_error::{SimpleResult, bail};

use crate::chrom_list::ChromList;
use crate::cli::IndexcovSettings;
use crate::coverage;
use crate::errors::IndexError;
use crate::pca;
use crate::report;
use crate::roc::{self, BinCounter, SLOTS};
use crate::run_stats::{IndexcovRunStats, RunStep, SampleRunStats, write_indexcov_run_stats};
use crate::sample_index::{
    SampleIndex, TILE_WIDTH, dedup_sample_names, read_sample_index, short_sample_name,
};
use crate::version::TILECOV_VERSION;

/// Number of index files read concurrently
const READER_THREADS: usize = 4;

/// Output base path: `<dir>/<dirname>-indexcov`
pub fn get_base(directory: &Utf8Path) -> Utf8PathBuf {
    let prefix = directory.file_name().unwrap_or("indexcov");
    directory.join(format!("{prefix}-indexcov"))
}

/// The lengths and names of references, from the first bam input or the fasta index
fn get_references(settings: &IndexcovSettings) -> SimpleResult<ChromList> {
    if settings.indexes[0].ends_with(".bam") {
        return Ok(ChromList::from_bam_filename(&settings.indexes[0]));
    }
    match &settings.fai {
        Some(fai) => match ChromList::from_fai(fai) {
            Ok(x) => Ok(x),
            Err(e) => bail!("{}", e),
        },
        None => bail!("--fai is required when inputs are bare index files"),
    }
}

/// Read all sample indexes, `READER_THREADS` at a time, keeping input order
fn load_indexes(paths: &[String]) -> Result<Vec<SampleIndex>, IndexError> {
    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(READER_THREADS)
        .build()
        .unwrap();

    let mut slots: Vec<Option<Result<SampleIndex, IndexError>>> =
        (0..paths.len()).map(|_| None).collect();

    let (tx, rx) = channel();
    worker_pool.scope(move |scope| {
        for (i, path) in paths.iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                tx.send((i, read_sample_index(path))).unwrap();
            });
        }
    });
    for (i, result) in rx {
        slots[i] = Some(result);
    }

    slots.into_iter().map(|slot| slot.unwrap()).collect()
}

/// Reject samples whose tile data cannot belong to the cohort reference list
fn check_cohort(chrom_list: &ChromList, index: &SampleIndex) -> Result<(), IndexError> {
    if index.sizes().len() > chrom_list.data.len() {
        return Err(IndexError::IncompatibleCohort {
            path: index.path().to_string(),
            reason: format!(
                "index has {} references but the cohort list has {}",
                index.sizes().len(),
                chrom_list.data.len()
            ),
        });
    }
    for (chrom_index, sizes) in index.sizes().iter().enumerate() {
        let tiles = chrom_list.data[chrom_index].length.div_ceil(TILE_WIDTH as u64);
        if sizes.len() as u64 > tiles + 1 {
            return Err(IndexError::IncompatibleCohort {
                path: index.path().to_string(),
                reason: format!(
                    "reference '{}' has {} tiles of data but its length supports only {}",
                    chrom_list.data[chrom_index].label,
                    sizes.len(),
                    tiles
                ),
            });
        }
    }
    Ok(())
}

pub fn run_indexcov(settings: &IndexcovSettings) -> SimpleResult<()> {
    let start = Instant::now();

    // these only steer the (optional) chart sink, never the numeric outputs
    if let Ok(n) = std::env::var("INDEXCOV_N_BACKGROUNDS") {
        info!("marking first {n} samples as background in plots");
    }
    if let Ok(fmt) = std::env::var("INDEXCOV_FMT") {
        info!("additional static chart formats requested: {fmt}");
    }

    let chrom_list = get_references(settings)?;
    if let Some(chrom) = &settings.chrom {
        if chrom_list.index_of(chrom).is_none() {
            bail!("{}", IndexError::MissingReference { chrom: chrom.clone() });
        }
    }

    info!("running on {} indexes", settings.indexes.len());
    let indexes = match load_indexes(&settings.indexes) {
        Ok(x) => x,
        Err(e) => bail!("{}", e),
    };
    for index in &indexes {
        if let Err(e) = check_cohort(&chrom_list, index) {
            bail!("{}", e);
        }
    }

    let mut names = settings
        .indexes
        .iter()
        .map(|p| short_sample_name(p))
        .collect::<Vec<_>>();
    dedup_sample_names(&mut names);

    let base = get_base(&settings.directory);
    let n_samples = indexes.len();

    let mut bgz = report::bedgraph_writer(&base);
    if let Err(e) = report::write_bedgraph_header(&mut bgz, &names) {
        bail!("{}", e);
    }
    let mut roc_fh = report::roc_writer(&base);

    let mut sexes: HashMap<String, Vec<f64>> = HashMap::new();
    let mut counts = vec![vec![0usize; SLOTS]; n_samples];
    let mut depths: Vec<Vec<f32>> = vec![Vec::new(); n_samples];
    let mut slopes = vec![0f32; n_samples];
    let mut n_slopes = 0usize;
    let mut bin_counters = vec![BinCounter::default(); n_samples];
    let mut pca_rows: Vec<Vec<u8>> = vec![Vec::with_capacity(200_000); n_samples];
    let mut chrom_names: Vec<String> = Vec::new();
    let mut wrote_any = false;

    for (chrom_index, chrom_info) in chrom_list.data.iter().enumerate() {
        let chrom = chrom_info.label.as_str();
        if let Some(only) = &settings.chrom {
            if only != chrom {
                continue;
            }
        }
        if let Some(exclude) = &settings.exclude {
            if exclude.is_match(chrom) {
                continue;
            }
        }

        // some samples may not have all the data, so the longest sample drives printing
        let mut longest = 0usize;
        let mut longesti = 0usize;
        for (k, index) in indexes.iter().enumerate() {
            depths[k] = index.normalized_depth(chrom_index);
            if depths[k].len() > longest {
                longest = depths[k].len();
                longesti = k;
            }
            for c in counts[k].iter_mut() {
                *c = 0;
            }
            roc::counts_at_depth(&depths[k], &mut counts[k]);
        }

        let is_sex = coverage::is_sex_chrom(&settings.sex_list, chrom);
        if is_sex {
            if !depths[longesti].is_empty() {
                sexes.insert(chrom.to_string(), coverage::copy_numbers(&depths));
            }
        } else {
            // autosomes feed the PCA matrix and the per-sample bin stats
            for k in 0..n_samples {
                for &d in &depths[k] {
                    pca_rows[k].push(pca::quantize_depth(d));
                }
                for _ in depths[k].len()..longest {
                    pca_rows[k].push(0);
                }
                bin_counters[k].count(&depths[k], longest);
            }
        }

        if let Err(e) = report::write_bedgraph_rows(&mut bgz, chrom, &depths, longest) {
            bail!("{}", e);
        }

        if !depths[longesti].is_empty() {
            wrote_any = true;
            let rocs = match report::write_rocs(&counts, &names, chrom, &mut roc_fh) {
                Ok(x) => x,
                Err(e) => bail!("{}", e),
            };
            // only track chromosomes with at least 3 regions for the summary stats
            if (settings.include_gl || !chrom.starts_with("GL")) && depths[longesti].len() > 2 {
                if !is_sex && longest > 100 {
                    roc::update_slopes(&rocs, chrom_info.length as f32 / 1e6, &mut slopes);
                    n_slopes += 1;
                }
                chrom_names.push(chrom.to_string());
            }
        }
    }

    if !wrote_any {
        bail!("no usable chromosomes across {} indexes", n_samples);
    }

    if n_slopes > 0 {
        for s in slopes.iter_mut() {
            *s /= n_slopes as f32;
        }
    }

    coverage::check_sex_chroms(&sexes, &settings.sex_list)?;
    if sexes.is_empty() {
        info!("sex chromosomes not found");
    } else {
        for k in &settings.sex_list {
            if !sexes.contains_key(k) {
                warn!("chromosome {k} not found");
            }
        }
    }

    let pca_result = pca::project(&pca_rows);

    let any_counts = indexes.iter().any(|x| x.mapped() > 0 || x.unmapped() > 0);
    let mapped = any_counts.then(|| indexes.iter().map(|x| x.mapped()).collect::<Vec<_>>());
    let unmapped = any_counts.then(|| indexes.iter().map(|x| x.unmapped()).collect::<Vec<_>>());

    if let Err(e) = report::write_ped(
        &base,
        &mut sexes,
        &settings.sex_list,
        &names,
        &bin_counters,
        &slopes,
        pca_result.as_ref(),
        mapped.as_deref(),
        unmapped.as_deref(),
    ) {
        bail!("{}", e);
    }

    write_indexcov_run_stats(
        &settings.directory,
        &IndexcovRunStats {
            run_step: RunStep {
                name: "indexcov".to_string(),
                version: TILECOV_VERSION.to_string(),
            },
            chromosome_count: chrom_names.len(),
            samples: names
                .iter()
                .zip(indexes.iter())
                .map(|(name, index)| SampleRunStats {
                    sample_name: name.clone(),
                    mapped: index.mapped(),
                    unmapped: index.unmapped(),
                })
                .collect(),
            total_runtime_secs: start.elapsed().as_secs_f64(),
        },
    );

    info!("indexcov finished: see '{base}.ped' for the per-sample summary");
    Ok(())
}
