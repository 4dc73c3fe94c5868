use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;

use log::{error, info};
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::cli::DepthSettings;
use crate::errors::IndexError;

/// Size in basepairs of the genomic chunks used for parallelization
const STEP: i64 = 5_000_000;

/// Coverage classification of a single base
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum CoverageClass {
    #[strum(serialize = "NO_COVERAGE")]
    NoCoverage,
    #[strum(serialize = "LOW_COVERAGE")]
    LowCoverage,
    #[strum(serialize = "CALLABLE")]
    Callable,
    #[strum(serialize = "EXCESSIVE_COVERAGE")]
    Excessive,
}

/// Classify one base's depth; the excessive check only applies when a max is configured
pub fn classify(depth: u32, min_cov: u32, max_mean_depth: u32) -> CoverageClass {
    if depth == 0 {
        CoverageClass::NoCoverage
    } else if depth < min_cov {
        CoverageClass::LowCoverage
    } else if max_mean_depth > 0 && depth >= max_mean_depth {
        CoverageClass::Excessive
    } else {
        CoverageClass::Callable
    }
}

/// Mean depth over one fixed window; gap positions count as zero
#[derive(Clone, Debug, PartialEq)]
pub struct WindowDepth {
    pub start: i64,
    pub end: i64,
    pub mean: f64,
}

/// Maximal run of consecutive bases sharing one coverage class, 0-based half-open
#[derive(Clone, Debug, PartialEq)]
pub struct CallableRun {
    pub start: i64,
    pub end: i64,
    pub class: CoverageClass,
}

#[derive(Clone, Copy, Debug)]
pub struct AggregateOptions {
    pub window_size: i64,
    pub min_cov: u32,
    pub max_mean_depth: u32,
}

/// Aggregate one chunk's per-base depth records into window means and callability runs
///
/// Records are 1-based `(pos, depth)` pairs over the 0-based half-open region
/// `[region_start, region_end)`. Positions absent from the stream are depth 0. Window
/// records are emitted for every window touching the region, aligned to absolute
/// coordinates and not truncated at the region end; callability runs are truncated.
///
pub fn aggregate_chunk(
    records: impl Iterator<Item = (i64, u32)>,
    region_start: i64,
    region_end: i64,
    opts: &AggregateOptions,
) -> (Vec<WindowDepth>, Vec<CallableRun>) {
    let w = opts.window_size;
    assert!(w > 0 && region_end > region_start);

    let first_window = region_start / w;
    let n_windows = ((region_end - 1) / w - first_window + 1) as usize;
    let mut window_sums = vec![0f64; n_windows];

    let mut runs: Vec<CallableRun> = Vec::new();
    let mut push_run = |start: i64, end: i64, class: CoverageClass| {
        if let Some(last) = runs.last_mut() {
            if last.class == class && last.end == start {
                last.end = end;
                return;
            }
        }
        runs.push(CallableRun { start, end, class });
    };

    // expected next 1-based position; anything skipped had no coverage
    let mut next_pos = region_start + 1;
    for (pos, depth) in records {
        if pos < next_pos || pos > region_end {
            continue;
        }
        if pos > next_pos {
            push_run(next_pos - 1, pos - 1, CoverageClass::NoCoverage);
        }
        push_run(pos - 1, pos, classify(depth, opts.min_cov, opts.max_mean_depth));

        window_sums[((pos - 1) / w - first_window) as usize] += depth as f64;
        next_pos = pos + 1;
    }
    if next_pos <= region_end {
        push_run(next_pos - 1, region_end, CoverageClass::NoCoverage);
    }

    let windows = window_sums
        .iter()
        .enumerate()
        .map(|(i, &sum)| {
            let start = (first_window + i as i64) * w;
            WindowDepth {
                start,
                end: start + w,
                mean: sum / w as f64,
            }
        })
        .collect();

    (windows, runs)
}

/// One genomic region handed to a depth subprocess, 0-based half-open
#[derive(Clone, Debug)]
pub struct GenomeChunk {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
}

fn chunks_from_chrom_list(chrom_list: &ChromList, chrom: Option<&str>) -> Vec<GenomeChunk> {
    let mut chunks = Vec::new();
    for chrom_info in chrom_list.data.iter() {
        if let Some(only) = chrom {
            if chrom_info.label != only {
                continue;
            }
        }
        let length = chrom_info.length as i64;
        let mut start = 0;
        while start < length {
            chunks.push(GenomeChunk {
                chrom: chrom_info.label.clone(),
                start,
                end: length.min(start + STEP),
            });
            start += STEP;
        }
    }
    chunks
}

fn chunks_from_bed(filename: &str) -> Result<Vec<GenomeChunk>, IndexError> {
    let reader = BufReader::new(File::open(filename)?);
    let mut chunks = Vec::new();
    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let words = line.split('\t').collect::<Vec<_>>();
        if words.len() < 3 {
            return Err(IndexError::invalid(
                filename,
                format!("expected 3 bed columns at line {}", line_index + 1),
            ));
        }
        let parse = |s: &str| {
            s.parse::<i64>().map_err(|_| {
                IndexError::invalid(
                    filename,
                    format!("unable to parse coordinate '{s}' at line {}", line_index + 1),
                )
            })
        };
        chunks.push(GenomeChunk {
            chrom: words[0].to_string(),
            start: parse(words[1])?,
            end: parse(words[2])?,
        });
    }
    Ok(chunks)
}

/// Run `samtools depth` over one chunk and aggregate its output
fn run_chunk(
    settings: &DepthSettings,
    chunk: &GenomeChunk,
    opts: &AggregateOptions,
) -> Result<(Vec<WindowDepth>, Vec<CallableRun>), String> {
    let region = format!("{}:{}-{}", chunk.chrom, chunk.start + 1, chunk.end);
    let mut cmd = Command::new("samtools");
    cmd.arg("depth")
        .arg("-Q")
        .arg(settings.mapq.to_string())
        .arg("-d")
        .arg((settings.max_mean_depth + 1000).to_string())
        .arg("-r")
        .arg(&region)
        .arg("--reference")
        .arg(&settings.reference)
        .arg(&settings.bam)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let cmd_str = format!("samtools depth -Q {} -r {} {}", settings.mapq, region, settings.bam);

    let mut child = cmd.spawn().map_err(|e| format!("{cmd_str}: {e}"))?;
    let stdout = BufReader::new(child.stdout.take().unwrap());

    let records = stdout.lines().map_while(Result::ok).filter_map(|line| {
        let mut fields = line.split('\t');
        let _chrom = fields.next()?;
        let pos = fields.next()?.parse::<i64>().ok()?;
        let depth = fields.next()?.parse::<u32>().ok()?;
        Some((pos, depth))
    });

    let result = aggregate_chunk(records, chunk.start, chunk.end, opts);

    let status = child.wait().map_err(|e| format!("{cmd_str}: {e}"))?;
    if !status.success() {
        return Err(cmd_str);
    }
    Ok(result)
}

/// Entry point for the depth command
///
/// One subprocess per 5MB chunk, fanned out across the configured worker count;
/// results are funneled back over a channel and written in chunk-definition order.
///
pub fn run_depth(settings: &DepthSettings) -> SimpleResult<()> {
    let chunks = if let Some(bed) = &settings.bed {
        match chunks_from_bed(bed) {
            Ok(x) => x,
            Err(e) => bail!("{}", e),
        }
    } else {
        let fai = format!("{}.fai", settings.reference);
        let chrom_list = match ChromList::from_fai(&fai) {
            Ok(x) => x,
            Err(e) => bail!("{}", e),
        };
        chunks_from_chrom_list(&chrom_list, settings.chrom.as_deref())
    };
    if chunks.is_empty() {
        bail!("no regions to process");
    }
    info!("depth: running on {} chunks", chunks.len());

    let chrom_suffix = settings
        .chrom
        .as_ref()
        .map(|c| format!(".{c}"))
        .unwrap_or_default();
    let depth_path = format!("{}{}.depth.bed", settings.prefix, chrom_suffix);
    let callable_path = format!("{}{}.callable.bed", settings.prefix, chrom_suffix);
    let mut depth_out = BufWriter::new(unwrap!(
        File::create(&depth_path),
        "Unable to create depth output file: '{depth_path}'"
    ));
    let mut callable_out = BufWriter::new(unwrap!(
        File::create(&callable_path),
        "Unable to create callable output file: '{callable_path}'"
    ));

    let opts = AggregateOptions {
        window_size: settings.window_size as i64,
        min_cov: settings.min_cov,
        max_mean_depth: settings.max_mean_depth,
    };

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.processes.max(1))
        .build()
        .unwrap();

    let had_error = AtomicBool::new(false);
    let (tx, rx) = channel();

    worker_pool.scope(|scope| {
        // writer drains the channel concurrently, releasing chunks in input order
        let writer_chunks = &chunks;
        let writer_error = &had_error;
        let depth_out = &mut depth_out;
        let callable_out = &mut callable_out;
        scope.spawn(move |_| {
            let mut pending: BTreeMap<usize, Result<(Vec<WindowDepth>, Vec<CallableRun>), String>> =
                BTreeMap::new();
            let mut next = 0usize;
            for (i, result) in rx {
                pending.insert(i, result);
                while let Some(result) = pending.remove(&next) {
                    match result {
                        Ok((windows, runs)) => {
                            let chrom = &writer_chunks[next].chrom;
                            for win in windows {
                                writeln!(
                                    depth_out,
                                    "{}\t{}\t{}\t{:.2}",
                                    chrom, win.start, win.end, win.mean
                                )
                                .unwrap();
                            }
                            for run in runs {
                                writeln!(
                                    callable_out,
                                    "{}\t{}\t{}\t{}",
                                    chrom, run.start, run.end, run.class
                                )
                                .unwrap();
                            }
                        }
                        Err(cmd) => {
                            error!("ERROR with command: {cmd}");
                            writer_error.store(true, Ordering::Relaxed);
                        }
                    }
                    next += 1;
                }
            }
        });

        for (i, chunk) in chunks.iter().enumerate() {
            let tx = tx.clone();
            let opts = &opts;
            scope.spawn(move |_| {
                tx.send((i, run_chunk(settings, chunk, opts))).unwrap();
            });
        }
        drop(tx);
    });

    unwrap!(depth_out.flush(), "Unable to write depth output file: '{depth_path}'");
    unwrap!(
        callable_out.flush(),
        "Unable to write callable output file: '{callable_path}'"
    );

    if had_error.load(Ordering::Relaxed) {
        bail!("one or more depth subprocesses failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn opts(window_size: i64, min_cov: u32, max_mean_depth: u32) -> AggregateOptions {
        AggregateOptions {
            window_size,
            min_cov,
            max_mean_depth,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0, 4, 0), CoverageClass::NoCoverage);
        assert_eq!(classify(3, 4, 0), CoverageClass::LowCoverage);
        assert_eq!(classify(4, 4, 0), CoverageClass::Callable);
        // no excessive class without a configured maximum
        assert_eq!(classify(1000, 4, 0), CoverageClass::Callable);
        assert_eq!(classify(1000, 4, 100), CoverageClass::Excessive);
    }

    #[test]
    fn test_coverage_class_display() {
        assert_eq!(CoverageClass::NoCoverage.to_string(), "NO_COVERAGE");
        assert_eq!(CoverageClass::Excessive.to_string(), "EXCESSIVE_COVERAGE");
    }

    #[test]
    fn test_aggregate_chunk_windows_and_callability() {
        let records = vec![(1i64, 10u32), (2, 10), (3, 0), (4, 0), (5, 10)];
        let (windows, runs) = aggregate_chunk(records.into_iter(), 0, 5, &opts(2, 4, 0));

        assert_eq!(
            runs,
            vec![
                CallableRun { start: 0, end: 2, class: CoverageClass::Callable },
                CallableRun { start: 2, end: 4, class: CoverageClass::NoCoverage },
                CallableRun { start: 4, end: 5, class: CoverageClass::Callable },
            ]
        );

        assert_eq!(windows.len(), 3);
        assert_eq!((windows[0].start, windows[0].end), (0, 2));
        assert_relative_eq!(windows[0].mean, 10.0);
        assert_relative_eq!(windows[1].mean, 0.0);
        // the final window keeps its full width even past the region end
        assert_eq!((windows[2].start, windows[2].end), (4, 6));
        assert_relative_eq!(windows[2].mean, 5.0);
    }

    #[test]
    fn test_aggregate_chunk_gap_fill() {
        // stream gaps count as zero coverage
        let records = vec![(2i64, 5u32), (8, 5)];
        let (windows, runs) = aggregate_chunk(records.into_iter(), 0, 10, &opts(5, 4, 0));

        assert_eq!(
            runs,
            vec![
                CallableRun { start: 0, end: 1, class: CoverageClass::NoCoverage },
                CallableRun { start: 1, end: 2, class: CoverageClass::Callable },
                CallableRun { start: 2, end: 7, class: CoverageClass::NoCoverage },
                CallableRun { start: 7, end: 8, class: CoverageClass::Callable },
                CallableRun { start: 8, end: 10, class: CoverageClass::NoCoverage },
            ]
        );

        assert_eq!(windows.len(), 2);
        assert_relative_eq!(windows[0].mean, 1.0);
        assert_relative_eq!(windows[1].mean, 1.0);
    }

    #[test]
    fn test_aggregate_chunk_low_and_excessive() {
        let records = vec![(1i64, 2u32), (2, 2), (3, 50), (4, 10)];
        let (_, runs) = aggregate_chunk(records.into_iter(), 0, 4, &opts(4, 4, 20));

        assert_eq!(
            runs,
            vec![
                CallableRun { start: 0, end: 2, class: CoverageClass::LowCoverage },
                CallableRun { start: 2, end: 3, class: CoverageClass::Excessive },
                CallableRun { start: 3, end: 4, class: CoverageClass::Callable },
            ]
        );
    }

    #[test]
    fn test_aggregate_chunk_empty_stream() {
        let (windows, runs) = aggregate_chunk(std::iter::empty(), 0, 6, &opts(3, 4, 0));
        assert_eq!(
            runs,
            vec![CallableRun { start: 0, end: 6, class: CoverageClass::NoCoverage }]
        );
        assert_eq!(windows.len(), 2);
        assert_relative_eq!(windows[0].mean, 0.0);
    }

    #[test]
    fn test_aggregate_chunk_offset_region() {
        // windows align to absolute coordinates, not the region start
        let records = vec![(1001i64, 8u32), (1002, 8)];
        let (windows, runs) = aggregate_chunk(records.into_iter(), 1000, 1004, &opts(250, 4, 0));

        assert_eq!(windows.len(), 1);
        assert_eq!((windows[0].start, windows[0].end), (1000, 1250));
        assert_relative_eq!(windows[0].mean, 16.0 / 250.0);
        assert_eq!(runs.last().unwrap().end, 1004);
    }

    #[test]
    fn test_chunks_from_chrom_list() {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("chr1", 12_000_000);
        chrom_list.add_chrom("chr2", 1_000_000);

        let chunks = chunks_from_chrom_list(&chrom_list, None);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].end, STEP);
        assert_eq!(chunks[2].end, 12_000_000);
        assert_eq!(chunks[3].chrom, "chr2");

        let only = chunks_from_chrom_list(&chrom_list, Some("chr2"));
        assert_eq!(only.len(), 1);
    }
}
