use thiserror::Error;

/// Error type for graph construction.
///
/// Floating-point exceptional values (infinity, NaN) are *not* errors: they
/// propagate through values and gradients like any other `f64`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GradError {
  #[error("power exponent must be a plain number, not a graph value")]
  UnsupportedOperandKind,
}
