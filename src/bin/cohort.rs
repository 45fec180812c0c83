// ----------------------------------- CLI -----------------------------------

#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "cohort", about = "Run tractography over every subject in a directory")]
pub struct Cli {

    /// Directory containing one subdirectory per subject (HCP layout)
    #[clap(short, long)]
    pub input_dir: PathBuf,

    /// Where per-subject tractograms are written
    #[clap(short, long)]
    pub output_dir: PathBuf,

    /// Tracking configuration (TOML)
    #[clap(short, long)]
    pub config: PathBuf,

    /// Only process these subjects (default: everything in the input dir)
    #[clap(short, long)]
    pub subjects: Vec<String>,

    /// Worker pool width
    #[clap(short = 'j', long, default_value = "4")]
    pub n_threads: usize,
}

// ----------------------------------------------------------------------------

use std::error::Error;
use std::fs::create_dir_all;
use std::path::PathBuf;

use clap::Parser;

use fascicle::cohort::{self, Outcome};
use fascicle::config::track::read_config_file;

fn main() -> Result<(), Box<dyn Error>> {

    let args = Cli::parse();
    let config = read_config_file(args.config);

    create_dir_all(&args.output_dir)?;

    let subjects = if args.subjects.is_empty() {
        cohort::discover_subjects(&args.input_dir)?
    } else {
        args.subjects.clone()
    };
    println!("Processing {} subjects from {}", subjects.len(), args.input_dir.display());

    let outcomes = cohort::run(&config, &args.input_dir, &args.output_dir, &subjects, args.n_threads);

    // A failed subject must not fail the batch; just make the failures easy to find
    let failures: Vec<_> = outcomes.iter()
        .filter(|(_, o)| matches!(o, Outcome::Failed { .. }))
        .collect();
    if !failures.is_empty() {
        println!("\nFailed subjects:");
        for (id, outcome) in failures {
            if let Outcome::Failed { error } = outcome {
                println!("  {id}: {error}");
            }
        }
    }
    Ok(())
}
