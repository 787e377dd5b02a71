use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Baseline feature table, csv or tsv (will over-write the config file)
    #[arg(short, long)]
    pub baseline: Option<PathBuf>,

    /// Feature table of the run to align (will over-write the config file)
    #[arg(short, long)]
    pub alignee: Option<PathBuf>,

    /// Path to the output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Treat the baseline as a mass tag database instead of a run
    #[arg(short, long)]
    pub mass_tags: bool,
}
