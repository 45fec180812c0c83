//! The tracer: one streamline per seed, traced in both directions from the
//! seed and joined. Every attempted path is returned, short ones included;
//! length filtering is the caller's business.

use crate::streamline::Streamline;
use crate::track::{BinaryStoppingCriterion, DirectionGetter, MAX_STEPS, STEP_SIZE};
use crate::types::{Point, Vector};

#[derive(Clone, Copy, Debug)]
pub struct TrackingParams {
    pub step_size: f32,
    pub max_steps: usize,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self { step_size: STEP_SIZE, max_steps: MAX_STEPS }
    }
}

/// Trace one path per seed, in seed order. Per-seed work is independent; the
/// result is semantically a set.
pub fn track<G: DirectionGetter>(
    getter: &mut G,
    stop: &BinaryStoppingCriterion,
    seeds: &[Point],
    params: TrackingParams,
) -> Vec<Streamline> {
    seeds.iter()
        .map(|&seed| track_one(getter, stop, seed, params))
        .collect()
}

fn track_one<G: DirectionGetter>(
    getter: &mut G,
    stop: &BinaryStoppingCriterion,
    seed: Point,
    params: TrackingParams,
) -> Streamline {
    let Some(first) = getter.initial_direction(seed) else {
        // nothing to follow here; the seed alone is the (short) path
        return vec![seed];
    };

    let forward = half_track(getter, stop, seed, first, params);
    let backward = half_track(getter, stop, seed, -first, params);

    // backward half reversed, seed, forward half
    let mut path: Streamline = Vec::with_capacity(backward.len() + forward.len() + 1);
    path.extend(backward.into_iter().rev());
    path.push(seed);
    path.extend(forward);
    path
}

/// Walk from `seed` (excluded) along `direction` until the stopping criterion
/// fires, the getter gives up, or the step budget runs out. The point that
/// left the mask is kept: it is the terminal step that triggered the stop.
fn half_track<G: DirectionGetter>(
    getter: &mut G,
    stop: &BinaryStoppingCriterion,
    seed: Point,
    direction: Vector,
    params: TrackingParams,
) -> Streamline {
    let mut points = Vec::new();
    let mut here = seed;
    let mut dir = direction;
    for _ in 0..params.max_steps {
        here += dir * params.step_size;
        points.push(here);
        if !stop.within(here) { break; }
        match getter.next_direction(here, dir) {
            Some(d) => dir = d,
            None => break,
        }
    }
    points
}

#[cfg(test)]
mod test_local {
    use super::*;
    use ndarray::Array3;

    /// Direction getter that always goes straight up.
    struct StraightUp;

    impl DirectionGetter for StraightUp {
        fn initial_direction(&mut self, _seed: Point) -> Option<Vector> {
            Some(Vector::new(0.0, 0.0, 1.0))
        }
        fn next_direction(&mut self, _point: Point, previous: Vector) -> Option<Vector> {
            Some(previous)
        }
    }

    /// Getter with no opinion anywhere.
    struct Mute;

    impl DirectionGetter for Mute {
        fn initial_direction(&mut self, _seed: Point) -> Option<Vector> { None }
        fn next_direction(&mut self, _point: Point, _previous: Vector) -> Option<Vector> { None }
    }

    fn full_mask(n: usize) -> Array3<bool> {
        Array3::from_elem((n, n, n), true)
    }

    #[test]
    fn one_streamline_per_seed() {
        let mask = full_mask(10);
        let stop = BinaryStoppingCriterion::new(&mask);
        let seeds: Vec<Point> = (0..10).map(|k| Point::new(5.0, 5.0, k as f32)).collect();
        let tracks = track(&mut StraightUp, &stop, &seeds, TrackingParams::default());
        assert_eq!(tracks.len(), seeds.len());
    }

    #[test]
    fn paths_span_the_column_and_stop_at_the_boundary() {
        let mask = full_mask(10);
        let stop = BinaryStoppingCriterion::new(&mask);
        let seeds = [Point::new(5.0, 5.0, 2.0), Point::new(5.0, 5.0, 8.0)];
        for t in track(&mut StraightUp, &stop, &seeds, TrackingParams::default()) {
            // first and last points are the terminal steps beyond the mask
            assert!(!stop.within(*t.first().unwrap()));
            assert!(!stop.within(*t.last().unwrap()));
            for p in &t[1..t.len() - 1] {
                assert!(stop.within(*p), "interior point {p} escaped the mask");
            }
            // whole z column at half-voxel steps, plus the two terminal steps
            assert_eq!(t.len(), 22);
        }
    }

    #[test]
    fn no_initial_direction_gives_seed_only_path() {
        let mask = full_mask(4);
        let stop = BinaryStoppingCriterion::new(&mask);
        let tracks = track(&mut Mute, &stop, &[Point::new(1.0, 1.0, 1.0)], TrackingParams::default());
        assert_eq!(tracks, vec![vec![Point::new(1.0, 1.0, 1.0)]]);
    }

    #[test]
    fn step_budget_bounds_path_length() {
        // a mask with no boundary in reach and a getter that never gives up
        let mask = full_mask(4);
        let stop = BinaryStoppingCriterion::new(&mask);
        struct Circler;
        impl DirectionGetter for Circler {
            fn initial_direction(&mut self, _s: Point) -> Option<Vector> {
                Some(Vector::new(1.0, 0.0, 0.0))
            }
            fn next_direction(&mut self, _p: Point, previous: Vector) -> Option<Vector> {
                // keep turning in the xy plane: never leaves a small orbit
                let turned = Vector::new(-previous.y, previous.x, 0.0);
                Some((previous * 0.9 + turned * 0.1).normalize())
            }
        }
        let params = TrackingParams { step_size: 0.1, max_steps: 50 };
        let tracks = track(&mut Circler, &stop, &[Point::new(1.5, 1.5, 1.5)], params);
        assert!(tracks[0].len() <= 2 * 50 + 1);
    }
}
