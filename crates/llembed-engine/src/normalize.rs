//! Normalization of pooled vectors.

use llembed_core::Normalization;

/// Normalize `input` into `output` using `mode`.
///
/// Both slices must have the same length; extra elements in either are left
/// untouched. A zero vector normalizes to zeros.
pub fn normalize_into(input: &[f32], output: &mut [f32], mode: Normalization) {
    match mode {
        Normalization::Euclidean => {
            let sum: f64 = input.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
            let scale = if sum > 0.0 { 1.0 / sum.sqrt() } else { 0.0 };
            for (out, &v) in output.iter_mut().zip(input) {
                #[allow(clippy::cast_possible_truncation)]
                {
                    *out = (f64::from(v) * scale) as f32;
                }
            }
        }
    }
}
