//! White-matter masks derived from a FreeSurfer `wmparc` parcellation.

use ndarray::Array3;

/// FreeSurfer label ranges that count as white matter: the corpus-callosum
/// labels (251-255) and the gyral white-matter labels (3000-5002).
pub const WM_LABEL_RANGES: [(i32, i32); 2] = [(251, 255), (3000, 5002)];

pub fn is_wm_label(label: i32) -> bool {
    WM_LABEL_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&label))
}

/// Binary white-matter mask from a parcellation volume. Labels arrive as
/// floats (NIfTI images carry them that way); they are rounded before the
/// membership test, so the mask is a pure function of the label values.
pub fn wm_mask(parcellation: &Array3<f32>) -> Array3<bool> {
    parcellation.mapv(|v| is_wm_label(v.round() as i32))
}

#[cfg(test)]
mod test_mask {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest(/**/ label, expected,
             case( 250, false),
             case( 251, true ),
             case( 255, true ),
             case( 256, false),
             case(2999, false),
             case(3000, true ),
             case(5002, true ),
             case(5003, false),
             case(   0, false),
             case(  -1, false),
    )]
    fn label_set_boundaries(label: i32, expected: bool) {
        assert_eq!(is_wm_label(label), expected);
    }

    #[test]
    fn mask_is_pure_function_of_parcellation() {
        let mut parc = Array3::<f32>::zeros((4, 4, 4));
        parc[(0, 0, 0)] = 251.0;
        parc[(1, 2, 3)] = 3000.0;
        parc[(3, 3, 3)] = 17.0; // grey-matter label
        let a = wm_mask(&parc);
        let b = wm_mask(&parc);
        assert_eq!(a, b);
        assert_eq!(a.iter().filter(|&&v| v).count(), 2);
        assert!(a[(0, 0, 0)] && a[(1, 2, 3)]);
        assert!(!a[(3, 3, 3)]);
    }

    #[test]
    fn float_labels_are_rounded_not_truncated() {
        let mut parc = Array3::<f32>::zeros((1, 1, 2));
        parc[(0, 0, 0)] = 250.9999; // stored float for label 251
        parc[(0, 0, 1)] = 250.4;
        let m = wm_mask(&parc);
        assert!(m[(0, 0, 0)]);
        assert!(!m[(0, 0, 1)]);
    }
}
