//! Batch orchestration: run the tractography pipeline over a cohort of
//! subjects with a bounded worker pool. Subjects are fully independent; one
//! subject's failure must never take its siblings down.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::track::Config;
use crate::io::trk;
use crate::pipeline::{run_tractography, TractographyParams};

/// Expected input layout per subject, HCP-style:
/// `<root>/<subject>/T1w/Diffusion/{data.nii.gz,bvals,bvecs}` and
/// `<root>/<subject>/T1w/wmparc.nii.gz`.
#[derive(Clone, Debug)]
pub struct SubjectPaths {
    pub id: String,
    pub dwi: PathBuf,
    pub bvals: PathBuf,
    pub bvecs: PathBuf,
    pub wmparc: PathBuf,
}

impl SubjectPaths {

    pub fn hcp(root: &Path, id: &str) -> Self {
        let t1w = root.join(id).join("T1w");
        let diffusion = t1w.join("Diffusion");
        Self {
            id: id.to_string(),
            dwi: diffusion.join("data.nii.gz"),
            bvals: diffusion.join("bvals"),
            bvecs: diffusion.join("bvecs"),
            wmparc: t1w.join("wmparc.nii.gz"),
        }
    }

    /// Resolve a missing per-subject parcellation against the template root,
    /// when one is configured.
    pub fn with_template_fallback(mut self, template_root: Option<&Path>) -> Self {
        if !self.wmparc.is_file() {
            if let Some(root) = template_root {
                let fallback = root.join("wmparc.nii.gz");
                if fallback.is_file() {
                    self.wmparc = fallback;
                }
            }
        }
        self
    }

    /// Names of the expected inputs that are absent.
    pub fn missing_inputs(&self) -> Vec<&'static str> {
        [("dwi", &self.dwi), ("bvals", &self.bvals), ("bvecs", &self.bvecs), ("wmparc", &self.wmparc)]
            .into_iter()
            .filter(|(_, p)| !p.is_file())
            .map(|(name, _)| name)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Tractogram written; how many streamlines survived the length filter
    Done { kept: usize },
    /// Expected inputs absent: not an error, the subject just isn't there
    Skipped { missing: Vec<&'static str> },
    Failed { error: String },
}

/// Subject directories under `root`, sorted by name.
pub fn discover_subjects(root: &Path) -> std::io::Result<Vec<String>> {
    let mut subjects: Vec<String> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    subjects.sort();
    Ok(subjects)
}

pub fn run(
    config: &Config,
    input_root: &Path,
    output_dir: &Path,
    subjects: &[String],
    n_threads: usize,
) -> Vec<(String, Outcome)> {
    let progress = Progress::new(subjects.len());
    let pool = rayon::ThreadPoolBuilder::new().num_threads(n_threads).build().unwrap();

    let outcomes = pool.install(|| {
        subjects.par_iter().map(|id| {
            let outcome = run_subject(config, input_root, output_dir, id);
            progress.subject_done(id, &outcome);
            (id.clone(), outcome)
        }).collect()
    });
    progress.finish();
    outcomes
}

fn run_subject(config: &Config, input_root: &Path, output_dir: &Path, id: &str) -> Outcome {
    let paths = SubjectPaths::hcp(input_root, id)
        .with_template_fallback(config.space.template_root.as_deref());

    let missing = paths.missing_inputs();
    if !missing.is_empty() {
        return Outcome::Skipped { missing };
    }

    let params = TractographyParams {
        recon: config.recon,
        tracking: config.tracking,
        seed_density: config.seed_density,
        step_size: config.step_size,
        max_angle_deg: config.max_angle,
        min_points: config.min_points,
        rng_seed: config.rng_seed,
    };

    let output = match run_tractography(&paths.dwi, &paths.bvals, &paths.bvecs, &paths.wmparc, params) {
        Ok(output) => output,
        Err(e) => return Outcome::Failed { error: e.to_string() },
    };

    // Write to a scratch name and rename, so a failed subject never leaves a
    // half-written tractogram behind
    let final_path = output_dir.join(format!("{id}.trk"));
    let part_path = output_dir.join(format!("{id}.trk.part"));
    let voxel = config.space.voxel_size;
    let written = trk::write(&part_path, &output.streamlines, output.dim, [voxel; 3])
        .and_then(|()| Ok(fs::rename(&part_path, &final_path)?));
    match written {
        Ok(()) => Outcome::Done { kept: output.streamlines.len() },
        Err(e) => {
            let _ = fs::remove_file(&part_path);
            Outcome::Failed { error: e.to_string() }
        }
    }
}

/// Progress bar and per-subject tallies for the cohort run.
struct Progress(Mutex<Inner>);

struct Inner {
    bar: ProgressBar,
    done: usize,
    skipped: usize,
    failed: usize,
}

impl Progress {

    fn new(n_subjects: usize) -> Self {
        let bar = ProgressBar::new(n_subjects as u64);
        bar.set_style(ProgressStyle::default_bar()
                      .template("Subjects: [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise})")
                      .unwrap());
        bar.tick();
        Self(Mutex::new(Inner { bar, done: 0, skipped: 0, failed: 0 }))
    }

    fn subject_done(&self, id: &str, outcome: &Outcome) {
        let mut inner = self.0.lock().unwrap();
        match outcome {
            Outcome::Done { kept } => {
                inner.done += 1;
                inner.bar.println(format!("{id}: {kept} streamlines"));
            }
            Outcome::Skipped { missing } => {
                inner.skipped += 1;
                inner.bar.println(format!("{id}: skipped (missing {})", missing.join(", ")));
            }
            Outcome::Failed { error } => {
                inner.failed += 1;
                inner.bar.println(format!("{id}: FAILED: {error}"));
            }
        }
        inner.bar.inc(1);
    }

    fn finish(&self) {
        let inner = self.0.lock().unwrap();
        inner.bar.finish_with_message("cohort complete");
        println!("{} done, {} skipped, {} failed",
                 inner.done, inner.skipped, inner.failed);
    }
}
