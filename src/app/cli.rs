use crate::app::models::DEFAULT_LOCKFILE;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Trim a root filesystem down to what its target binaries need"
)]
pub struct Cli {
    /// Profile describing targets, packages, filters and keep/prune rules
    #[arg(long, short = 'p')]
    pub profile: PathBuf,

    /// Root directory of the image to trim
    #[arg(long, default_value = "/")]
    pub root: PathBuf,

    /// Actually remove files (default is a dry run)
    #[arg(long, conflicts_with = "check")]
    pub apply: bool,

    /// Only validate the profile
    #[arg(long)]
    pub check: bool,

    /// Use a predefined set of options from presets.toml
    #[arg(long)]
    pub preset: Option<String>,

    /// Extra glob patterns for paths to keep (e.g. '/etc/ssl/**')
    #[arg(long, num_args = 1..)]
    pub keep: Option<Vec<String>>,

    /// Extra glob patterns for paths to prune
    #[arg(long, num_args = 1..)]
    pub prune: Option<Vec<String>>,

    /// Extra filter tags: l10n, i18n, doc, man, log, dir, junk
    #[arg(long, num_args = 1..)]
    pub filter: Option<Vec<String>>,

    /// List removed paths in the dry-run report
    #[arg(long)]
    pub show_removed: bool,

    /// Leave /tmp untouched
    #[arg(long)]
    pub keep_tmp: bool,

    /// Marker file written into the image after a successful run
    #[arg(long, default_value = DEFAULT_LOCKFILE)]
    pub lockfile: PathBuf,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}
