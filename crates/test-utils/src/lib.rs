//! Shared test utilities for the pbench workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Run file fixtures
//! - Test case and ammo generators
//! - Temporary directory and fake tool helpers
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
//! use test_utils::{fixtures, write_run_file};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use generators::*;
pub use paths::*;

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
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that a count lies in an inclusive range.
///
/// ```ignore
/// use test_utils::assert_within;
///
/// assert_within!(items_in_second, 9, 10);
/// ```
#[macro_export]
macro_rules! assert_within {
    ($value:expr, $low:expr, $high:expr) => {{
        let value = $value;
        if value < $low || value > $high {
            panic!(
                "assertion failed: `{:?}` not within [{:?}, {:?}]",
                value, $low, $high
            );
        }
    }};
}
