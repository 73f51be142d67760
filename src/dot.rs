//! Graphviz rendering of an expression graph.
//!
//! Read-only consumer of the inspection API: each node becomes a record
//! showing its value and gradient, each non-leaf additionally gets a small
//! op node so the operation tag is visible between operands and result.

use std::fmt::Write;

use rustc_hash::FxHashSet;

use crate::op::OpKind;
use crate::tape::Var;

/// Collect all nodes reachable from `root` and the operand edges between
/// them, without touching any graph state.
fn trace<'snap>(root: &Var<'snap>) -> (Vec<Var<'snap>>, Vec<(Var<'snap>, Var<'snap>)>) {
  let mut nodes = Vec::new();
  let mut edges = Vec::new();
  let mut seen = FxHashSet::default();
  let mut stack = vec![*root];

  while let Some(var) = stack.pop() {
    if !seen.insert(var.id()) {
      continue;
    }
    nodes.push(var);
    for operand in var.operands() {
      edges.push((operand, var));
      stack.push(operand);
    }
  }

  (nodes, edges)
}

/// Render the graph rooted at `root` as a Graphviz `digraph` in DOT syntax.
pub fn draw_dot(root: &Var<'_>) -> String {
  let (nodes, edges) = trace(root);

  let mut dot = String::new();
  dot.push_str("digraph G {\n  rankdir=LR;\n");

  for var in &nodes {
    let uid = var.id();
    let _ = writeln!(
      dot,
      "  n{uid} [shape=record, label=\"{{ data {:.4} | grad {:.4} }}\"];",
      var.value(),
      var.grad(),
    );
    let op = var.op();
    if op != OpKind::Leaf {
      let _ = writeln!(dot, "  n{uid}op [label=\"{}\"];", op.label());
      let _ = writeln!(dot, "  n{uid}op -> n{uid};");
    }
  }

  for (from, to) in &edges {
    let _ = writeln!(dot, "  n{} -> n{}op;", from.id(), to.id());
  }

  dot.push_str("}\n");
  dot
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tape::Tape;

  #[test]
  fn renders_ops_and_edges() {
    let mut tape = Tape::new();
    let guard = tape.guard();
    let a = guard.var(2.0);
    let b = guard.var(-3.0);
    let c = (a * b).tanh();
    c.backward();

    let dot = draw_dot(&c);
    assert!(dot.starts_with("digraph G {"));
    assert!(dot.contains("rankdir=LR"));
    assert!(dot.contains("tanh"));
    assert!(dot.contains("\"*\""));
    // one record per reachable node: a, b, a*b, tanh
    assert_eq!(dot.matches("shape=record").count(), 4);
    // operand edges: two into mul, one into tanh
    assert_eq!(dot.matches("op;").count(), 3);
  }

  #[test]
  fn fan_out_node_rendered_once() {
    let mut tape = Tape::new();
    let guard = tape.guard();
    let a = guard.var(3.0);
    let b = a * a;
    let dot = draw_dot(&b);
    assert_eq!(dot.matches("shape=record").count(), 2);
  }
}
