//! Shared test utilities for the cube-engine workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Reference and datetime fixtures
//! - Synthetic catalog and raster reader collaborators
//! - Instrumented cubes and mock swarm workers
//! - Float assertion macros
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{daily_reference, FnCube, assert_approx_eq};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Element-wise approximate equality of two `f64` slices where NaN equals NaN.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_values_approx_eq;
///
/// assert_values_approx_eq!(&[1.0, f64::NAN], &[1.00001, f64::NAN], 0.001);
/// ```
#[macro_export]
macro_rules! assert_values_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                let left: &[f64] = &left_val[..];
                let right: &[f64] = &right_val[..];
                let epsilon: f64 = $epsilon as f64;
                assert_eq!(left.len(), right.len(), "length mismatch");
                for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
                    let same = (l.is_nan() && r.is_nan()) || (l - r).abs() <= epsilon;
                    if !same {
                        panic!(
                            "assertion failed: values differ at {}\n  left: `{:?}`,\n right: `{:?}`",
                            i, l, r
                        );
                    }
                }
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_rejects_nan() {
        assert_approx_eq!(f64::NAN, 1.0, 0.001);
    }

    #[test]
    fn test_assert_values_approx_eq_nan_aware() {
        assert_values_approx_eq!(&[1.0, f64::NAN, 3.0], &[1.0000001, f64::NAN, 3.0], 1e-6);
    }

    #[test]
    fn test_assert_values_approx_eq_accepts_temporaries() {
        fn halves(n: usize) -> Vec<f64> {
            vec![0.5; n]
        }
        assert_values_approx_eq!(halves(3), vec![0.5, 0.5, 0.5], 1e-12);
        assert_values_approx_eq!(halves(2).as_slice(), [0.5, 0.5], 1e-12);
    }

    #[test]
    #[should_panic(expected = "values differ at 1")]
    fn test_assert_values_approx_eq_fails() {
        assert_values_approx_eq!(&[1.0, f64::NAN], &[1.0, 2.0], 1e-6);
    }
}
