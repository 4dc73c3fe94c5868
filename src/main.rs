use std::process;

use camino::Utf8Path;
use hhmmss::Hhmmss;
use log::info;
use simple_error::{SimpleError, SimpleResult};

use tilecov::cli::{self, Commands};
use tilecov::version::TILECOV_VERSION;
use tilecov::{bed_regions, chrom_list, depth, indexcov, indexsplit};

static PROG_NAME: &str = env!("CARGO_PKG_NAME");

/// Route log records to stderr, tagged with the subcommand that produced them, and
/// mirror them into `tilecov.log` inside the output directory when the command owns one
fn setup_logger(
    subcommand: &str,
    output_dir: Option<&Utf8Path>,
    debug: bool,
) -> Result<(), fern::InitError> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let tag = format!("{PROG_NAME} {subcommand}");
    let mut dispatch = fern::Dispatch::new()
        .level(level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                tag,
                record.level(),
                message
            ))
        })
        .chain(std::io::stderr());

    if let Some(output_dir) = output_dir {
        dispatch = dispatch.chain(fern::log_file(
            output_dir.join(format!("{PROG_NAME}.log")),
        )?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Create the output directory for commands that own one, then setup the logger
///
/// The log file lives inside the output directory, so the directory has to exist before
/// any other validation gets a chance to log.
///
fn setup_output_dir_and_logger(settings: &cli::Settings) {
    let output_dir = settings.get_output_dir();
    if let Some(output_dir) = output_dir {
        if !output_dir.is_dir() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                eprintln!("unable to create output directory '{output_dir}': {e}");
                process::exit(exitcode::CANTCREAT);
            }
        }
    }
    setup_logger(settings.command.name(), output_dir, settings.shared.debug).unwrap();
}

fn indexsplit_references(settings: &cli::IndexsplitSettings) -> SimpleResult<chrom_list::ChromList> {
    if settings.indexes[0].ends_with(".bam") {
        return Ok(chrom_list::ChromList::from_bam_filename(&settings.indexes[0]));
    }
    match &settings.fai {
        Some(fai) => {
            chrom_list::ChromList::from_fai(fai).map_err(|e| SimpleError::new(e.to_string()))
        }
        None => Err(SimpleError::new(
            "--fai is required when no .bam is listed among the inputs",
        )),
    }
}

fn run(settings: &cli::Settings) -> SimpleResult<()> {
    info!("Starting {PROG_NAME} {TILECOV_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );

    let start = std::time::Instant::now();

    match &settings.command {
        Commands::Indexcov(x) => {
            indexcov::run_indexcov(x)?;
        }
        Commands::Indexsplit(x) => {
            let chrom_list = indexsplit_references(x)?;
            let problematic = x
                .problematic
                .as_ref()
                .map(|p| bed_regions::GenomeRegions::from_bed(p, "problematic"));
            indexsplit::run_indexsplit(&x.indexes, &chrom_list, x.n, problematic.as_ref())
                .map_err(|e| SimpleError::new(e.to_string()))?;
        }
        Commands::Depth(x) => {
            depth::run_depth(x)?;
        }
    }

    info!(
        "{PROG_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::parse_settings();

    setup_output_dir_and_logger(&settings);

    let settings = cli::validate_and_fix_settings(settings);

    if let Err(err) = run(&settings) {
        eprintln!("{}", err);
        process::exit(2);
    }
}
