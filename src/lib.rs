//!
//! # scalargrad
//!
//! Reverse-mode automatic differentiation over scalar expression graphs.
//!
//! Operations on [`Var`] handles implicitly record a DAG of nodes on a
//! [`Tape`]; [`Var::backward`] linearizes the graph reachable from a root and
//! accumulates the derivative of the root with respect to every node.
//!
//! ## Sharp edges
//!
//! - Floating-point exceptional values are not trapped: dividing by zero
//!   yields an infinity that flows through later values and gradients.
//! - Gradients are never reset automatically. Running two backward passes
//!   over overlapping graphs without [`TapeGuard::zero_grad`] (or per-node
//!   [`Var::zero_grad`]) sums their contributions.
//!
//! ```
//! use scalargrad::Tape;
//!
//! let mut tape = Tape::new();
//! let guard = tape.guard();
//! let a = guard.var(-4.0);
//! let b = guard.var(2.0);
//! let f = (a + b).powf(2.0) + a * b;
//! f.backward();
//! assert_eq!(f.value(), -4.0);
//! assert_eq!(a.grad(), -2.0);
//! assert_eq!(b.grad(), -8.0);
//! ```

mod error;
mod op;
mod tape;

pub mod dot;
pub mod nn;

pub use error::GradError;
pub use op::OpKind;
pub use tape::{Exponent, Tape, TapeGuard, Var};
