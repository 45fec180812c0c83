//! Configuration file parser for tractography runs

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::recon::ReconMethod;
use crate::streamline::MIN_POINTS;
use crate::track::{TrackingMethod, MAX_ANGLE_DEG, STEP_SIZE};

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {

    /// Reconstruction model: "csd" or "csa"
    #[serde(default = "mandatory")]
    pub recon: ReconMethod,

    /// Tracking flavour: "det" or "prob"
    #[serde(default = "mandatory")]
    pub tracking: TrackingMethod,

    /// Seeds per white-matter voxel
    #[serde(default = "default_seed_density")]
    pub seed_density: usize,

    /// Step length in voxel units
    #[serde(default = "default_step_size")]
    pub step_size: f32,

    /// Maximum turning angle between steps, in degrees
    #[serde(default = "default_max_angle")]
    pub max_angle: f32,

    /// Streamlines with at most this many points are dropped
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// Fix the RNG for reproducible runs
    #[serde(default)]
    pub rng_seed: Option<u64>,

    pub space: Space,
}

/// Where the pipeline's spatial context comes from. These options used to be
/// scraped out of the process environment; they are spelled out here instead.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Space {

    /// Isotropic voxel resolution stamped into tractogram headers, in mm
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f32,

    /// Directory holding template volumes; a subject without its own
    /// parcellation falls back to `<template_root>/wmparc.nii.gz`
    #[serde(default)]
    pub template_root: Option<PathBuf>,
}

fn default_seed_density() -> usize { 20 }
fn default_step_size() -> f32 { STEP_SIZE }
fn default_max_angle() -> f32 { MAX_ANGLE_DEG }
fn default_min_points() -> usize { MIN_POINTS }
fn default_voxel_size() -> f32 { 1.25 }

pub fn read_config_file(path: PathBuf) -> Config {
    let config: String = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Couldn't read config file `{path:?}`: {e}"));
    toml::from_str(&config)
        .unwrap_or_else(|e| panic!("Couldn't parse config file `{path:?}`: {e}"))
}

// Hack to allow mandatory fields to be missing during testing.
#[cfg(not(test))]
fn mandatory<T>() -> T { panic!("MISSING MANDATORY FIELD. TODO: which one?") }
#[cfg(test)]
fn mandatory<T: Default>() -> T { T::default() }

#[cfg(test)]
impl Default for ReconMethod {
    fn default() -> Self { ReconMethod::Csd }
}
#[cfg(test)]
impl Default for TrackingMethod {
    fn default() -> Self { TrackingMethod::Prob }
}
