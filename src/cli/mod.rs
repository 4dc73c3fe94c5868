mod depth;
mod indexcov;
mod indexsplit;

use camino::Utf8Path;
use clap::{Args, Parser, Subcommand};
use simple_error::SimpleResult;

pub use self::depth::{DepthSettings, validate_and_fix_depth_settings};
pub use self::indexcov::{
    DEFAULT_EXCLUDE_PATT, IndexcovSettings, validate_and_fix_indexcov_settings,
};
pub use self::indexsplit::{IndexsplitSettings, validate_and_fix_indexsplit_settings};

#[derive(Subcommand)]
pub enum Commands {
    /// Estimate per-sample coverage across the genome from alignment-file indexes alone
    Indexcov(IndexcovSettings),

    /// Split the genome into regions of roughly equal cohort data volume
    Indexsplit(IndexsplitSettings),

    /// Per-base depth aggregation into windowed means and callability classes
    Depth(DepthSettings),
}

impl Commands {
    /// The subcommand name as typed on the command line, used to tag log records
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Indexcov(_) => "indexcov",
            Commands::Indexsplit(_) => "indexsplit",
            Commands::Depth(_) => "depth",
        }
    }
}

#[derive(Args, Default)]
pub struct SharedSettings {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(propagate_version = true, rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(subcommand)]
    pub command: Commands,
}

impl Settings {
    /// Output directory for commands that own one, used to place the log file
    pub fn get_output_dir(&self) -> Option<&Utf8Path> {
        match &self.command {
            Commands::Indexcov(x) => Some(&x.directory),
            Commands::Indexsplit(_) | Commands::Depth(_) => None,
        }
    }
}

/// Validate settings and update parameters that can't be processed by clap
///
/// Parts of this process assume logging is already setup
///
pub fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.command = match settings.command {
        Commands::Indexcov(x) => Commands::Indexcov(validate_and_fix_indexcov_settings(x)?),
        Commands::Indexsplit(x) => Commands::Indexsplit(validate_and_fix_indexsplit_settings(x)?),
        Commands::Depth(x) => Commands::Depth(validate_and_fix_depth_settings(x)?),
    };

    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {}", msg);
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}
