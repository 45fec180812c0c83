// ----------------------------------- CLI -----------------------------------

#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "track", about = "Whole-brain tractography for one subject")]
pub struct Cli {

    /// Diffusion-weighted volume (4D NIfTI)
    #[clap(long)]
    pub dwi: PathBuf,

    /// b-values text file
    #[clap(long)]
    pub bvals: PathBuf,

    /// b-vectors text file
    #[clap(long)]
    pub bvecs: PathBuf,

    /// FreeSurfer wmparc parcellation (3D NIfTI)
    #[clap(long)]
    pub wmparc: PathBuf,

    /// Where to write the tractogram
    #[clap(short, long, default_value = "tracks.trk")]
    pub out: PathBuf,

    /// Reconstruction model
    #[clap(long, value_enum, default_value = "csd")]
    pub recon: ReconMethod,

    /// Tracking flavour
    #[clap(long, value_enum, default_value = "prob")]
    pub tracking: TrackingMethod,

    /// Seeds per white-matter voxel
    #[clap(short, long, default_value = "20")]
    pub seed_density: usize,

    /// Isotropic voxel size stamped into the tractogram header, in mm
    #[clap(long, default_value = "1.25")]
    pub voxel_size: f32,

    /// Fix the RNG for a reproducible run
    #[clap(long)]
    pub rng_seed: Option<u64>,

    /// Maximum number of rayon threads
    #[clap(short = 'j', long, default_value = "4")]
    pub n_threads: usize,
}

// ----------------------------------------------------------------------------

use std::error::Error;
use std::fs::create_dir_all;
use std::path::PathBuf;

use clap::Parser;

use fascicle::io::trk;
use fascicle::pipeline::{run_tractography, TractographyParams};
use fascicle::utils::{group_digits, timing::Progress};
use fascicle::{ReconMethod, TrackingMethod};

fn main() -> Result<(), Box<dyn Error>> {

    let args = Cli::parse();

    match rayon::ThreadPoolBuilder::new().num_threads(args.n_threads).build_global() {
        Err(e) => println!("{}", e),
        Ok(_)  => println!("Using up to {} threads.", args.n_threads),
    }

    // Make sure the destination is writable before the long computation
    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() { create_dir_all(parent)?; }
    }

    let params = TractographyParams {
        recon: args.recon,
        tracking: args.tracking,
        seed_density: args.seed_density,
        rng_seed: args.rng_seed,
        ..TractographyParams::default()
    };

    let mut progress = Progress::new();
    let output = run_tractography(&args.dwi, &args.bvals, &args.bvecs, &args.wmparc, params)?;
    progress.done_with_message("Reconstructed tractogram streamlines");

    trk::write(&args.out, &output.streamlines, output.dim, [args.voxel_size; 3])?;
    println!("Wrote {} streamlines to {}",
             group_digits(output.streamlines.len()), args.out.display());
    Ok(())
}
