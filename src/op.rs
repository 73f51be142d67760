use smallvec::{smallvec, SmallVec};

/// Provenance tag recording which operation produced a node.
///
/// Each non-leaf kind pairs a forward formula with a local gradient rule; the
/// backward executor dispatches on this tag instead of attaching a closure to
/// every node. Subtraction and division are not kinds of their own: they lower
/// to `Add` + `Neg` and `Mul` + `Pow { exponent: -1.0 }` at construction time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpKind {
  /// An input or constant; no operands, nothing to propagate.
  Leaf,
  /// `a + b`; passes the upstream gradient to both operands.
  Add,
  /// `a * b`; each operand receives the other's value times upstream.
  Mul,
  /// `a.powf(exponent)` for a fixed real exponent (never a node);
  /// `d/da = exponent * a^(exponent - 1)`.
  Pow { exponent: f64 },
  /// `-a`; `d/da = -1`.
  Neg,
  /// `tanh(a)`; the rule reads the produced value `t`: `d/da = 1 - t^2`.
  Tanh,
  /// `e^a`; the rule reads the produced value: `d/da = e^a`.
  Exp,
}

impl OpKind {
  /// Exact operand count for this kind.
  pub(crate) fn arity(&self) -> usize {
    match self {
      OpKind::Leaf => 0,
      OpKind::Add | OpKind::Mul => 2,
      OpKind::Pow { .. } | OpKind::Neg | OpKind::Tanh | OpKind::Exp => 1,
    }
  }

  /// Short label for rendering; empty for leaves.
  pub fn label(&self) -> String {
    match self {
      OpKind::Leaf => String::new(),
      OpKind::Add => "+".to_string(),
      OpKind::Mul => "*".to_string(),
      OpKind::Pow { exponent } => format!("**{exponent}"),
      OpKind::Neg => "neg".to_string(),
      OpKind::Tanh => "tanh".to_string(),
      OpKind::Exp => "exp".to_string(),
    }
  }
}

/// Gradient contributions a node sends into each of its operands, in operand
/// order.
///
/// `out_value` is the node's own forward value (tanh and exp read it instead
/// of recomputing), `upstream` its accumulated gradient at the time the rule
/// fires, and `operand_values` the forward values of its operands.
pub(crate) fn local_grads(
  op: OpKind,
  out_value: f64,
  upstream: f64,
  operand_values: &[f64],
) -> SmallVec<[f64; 2]> {
  match op {
    OpKind::Leaf => SmallVec::new(),
    OpKind::Add => smallvec![upstream, upstream],
    OpKind::Mul => smallvec![
      operand_values[1] * upstream,
      operand_values[0] * upstream
    ],
    OpKind::Pow { exponent } => {
      let base = operand_values[0];
      smallvec![exponent * base.powf(exponent - 1.0) * upstream]
    }
    OpKind::Neg => smallvec![-upstream],
    OpKind::Tanh => smallvec![(1.0 - out_value * out_value) * upstream],
    OpKind::Exp => smallvec![out_value * upstream],
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn arity_matches_kind() {
    assert_eq!(OpKind::Leaf.arity(), 0);
    assert_eq!(OpKind::Add.arity(), 2);
    assert_eq!(OpKind::Mul.arity(), 2);
    assert_eq!(OpKind::Pow { exponent: 2.0 }.arity(), 1);
    assert_eq!(OpKind::Neg.arity(), 1);
    assert_eq!(OpKind::Tanh.arity(), 1);
    assert_eq!(OpKind::Exp.arity(), 1);
  }

  #[test]
  fn leaf_sends_nothing() {
    assert!(local_grads(OpKind::Leaf, 3.0, 1.0, &[]).is_empty());
  }

  #[test]
  fn mul_swaps_operand_values() {
    let grads = local_grads(OpKind::Mul, 12.0, 2.0, &[3.0, 4.0]);
    assert_eq!(grads.as_slice(), &[8.0, 6.0]);
  }

  #[test]
  fn pow_label_includes_exponent() {
    assert_eq!(OpKind::Pow { exponent: -1.0 }.label(), "**-1");
    assert_eq!(OpKind::Pow { exponent: 2.0 }.label(), "**2");
  }
}
