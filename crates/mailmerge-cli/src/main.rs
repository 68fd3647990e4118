//! mailmerge CLI
//!
//! Merges the rows of a CSV or Excel file into a Word template, producing a
//! single document with one filled-in copy of the template per row.

mod logging;

use clap::Parser;
use mailmerge_core::{merge_files, MergeContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mailmerge")]
#[command(about = "Merge CSV/Excel rows into a Word template", long_about = None)]
#[command(version)]
struct Cli {
    /// Word template (.docx) containing ${Header} placeholders
    template: PathBuf,

    /// Data file (.csv, .xls or .xlsx); the first row holds the headers
    data: PathBuf,

    /// Where to write the merged document
    output: PathBuf,

    /// Only merge rows whose value in this column is "1" or "true"
    #[arg(long, value_name = "COLUMN", env = "MAILMERGE_INCLUDE_INDICATOR")]
    include_indicator: Option<String>,

    /// Print a JSON summary of the merge to stdout
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(logging::level_from_flags(cli.verbose, cli.quiet));

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> mailmerge_core::Result<()> {
    let context = MergeContext {
        include_indicator_column: cli.include_indicator.filter(|c| !c.is_empty()),
    };

    let summary = merge_files(&cli.template, &cli.data, &cli.output, &context)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
