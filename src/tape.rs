use std::cell::RefCell;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use bit_set::BitSet;
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};

use crate::error::GradError;
use crate::op::{local_grads, OpKind};

pub(crate) type NodeIndex = usize;

/// One slot in the arena: forward value, gradient accumulator, and provenance.
///
/// `value` is set at construction (leaves may later be overwritten through
/// [`Var::set_value`] for parameter updates); `grad` starts at 0.0 and is only
/// ever written by backward passes and the explicit reset APIs.
#[derive(Debug)]
struct Node {
  value: f64,
  grad: f64,
  op: OpKind,
  operands: SmallVec<[NodeIndex; 2]>,
}

/// The arena. Nodes are appended and never removed, so an operand index always
/// refers to a node created strictly earlier; cycles cannot form.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
  nodes: RefCell<Vec<Node>>,
}

impl Snapshot {
  #[inline]
  fn add_node(&self, value: f64, op: OpKind, operands: SmallVec<[NodeIndex; 2]>) -> NodeIndex {
    debug_assert_eq!(op.arity(), operands.len());
    let mut nodes = self.nodes.borrow_mut();
    let node = nodes.len();
    nodes.push(Node {
      value,
      grad: 0.0,
      op,
      operands,
    });
    node
  }
}

/// A handle to one node of the graph.
///
/// Handles are `Copy`: using the same `Var` as an operand of several
/// operations is how fan-out happens, and the backward pass accumulates
/// every consumer's contribution into it.
#[derive(Clone, Copy)]
pub struct Var<'snap> {
  node: NodeIndex,
  snap: &'snap Snapshot,
}

impl<'snap> Var<'snap> {
  /// Forward value of this node.
  #[inline]
  pub fn value(&self) -> f64 {
    self.snap.nodes.borrow()[self.node].value
  }

  /// Accumulated gradient. Zero until a backward pass reaches this node.
  #[inline]
  pub fn grad(&self) -> f64 {
    self.snap.nodes.borrow()[self.node].grad
  }

  /// Which operation produced this node.
  #[inline]
  pub fn op(&self) -> OpKind {
    self.snap.nodes.borrow()[self.node].op
  }

  /// Operand handles in construction order; empty for leaves.
  pub fn operands(&self) -> SmallVec<[Var<'snap>; 2]> {
    let nodes = self.snap.nodes.borrow();
    nodes[self.node]
      .operands
      .iter()
      .map(|&node| Var {
        node,
        snap: self.snap,
      })
      .collect()
  }

  /// Arena index of this node; stable for the life of the tape.
  #[inline]
  pub fn id(&self) -> usize {
    self.node
  }

  /// Reset this node's gradient to 0.0.
  ///
  /// Backward passes accumulate; reusing a graph across passes without a
  /// reset sums the contributions of every pass (see [`Var::backward`]).
  #[inline]
  pub fn zero_grad(&self) {
    self.snap.nodes.borrow_mut()[self.node].grad = 0.0;
  }

  /// Overwrite this node's forward value.
  ///
  /// Intended for leaf parameters in a training loop. Derived node values are
  /// never recomputed; rebuild the expression to see an updated forward.
  #[inline]
  pub fn set_value(&self, value: f64) {
    self.snap.nodes.borrow_mut()[self.node].value = value;
  }

  /// Materialize a plain number as a fresh leaf on the same tape.
  #[inline]
  fn lift(&self, constant: f64) -> Var<'snap> {
    Var {
      node: self.snap.add_node(constant, OpKind::Leaf, SmallVec::new()),
      snap: self.snap,
    }
  }

  #[inline]
  fn derive(&self, value: f64, op: OpKind, operands: SmallVec<[NodeIndex; 2]>) -> Var<'snap> {
    Var {
      node: self.snap.add_node(value, op, operands),
      snap: self.snap,
    }
  }

  /// Raise to a fixed real exponent.
  ///
  /// A zero base with a negative exponent yields an infinity, which then
  /// propagates through values and gradients like any other float.
  #[inline]
  pub fn powf(&self, exponent: f64) -> Var<'snap> {
    let v = self.value();
    self.derive(v.powf(exponent), OpKind::Pow { exponent }, smallvec![self.node])
  }

  /// Raise to an exponent that may be supplied as a number or (erroneously)
  /// as another graph value.
  ///
  /// The exponent of a power node is a plain number by contract; passing a
  /// `Var` fails with [`GradError::UnsupportedOperandKind`].
  pub fn pow<E>(&self, exponent: E) -> Result<Var<'snap>, GradError>
  where
    E: Into<Exponent<'snap>>,
  {
    match exponent.into() {
      Exponent::Constant(k) => Ok(self.powf(k)),
      Exponent::Var(_) => Err(GradError::UnsupportedOperandKind),
    }
  }

  #[inline]
  pub fn tanh(&self) -> Var<'snap> {
    let t = self.value().tanh();
    self.derive(t, OpKind::Tanh, smallvec![self.node])
  }

  #[inline]
  pub fn exp(&self) -> Var<'snap> {
    let v = self.value();
    self.derive(v.exp(), OpKind::Exp, smallvec![self.node])
  }

  /// Run a backward pass seeded at this node.
  ///
  /// Forces this node's gradient to 1.0, then walks the topological order in
  /// reverse, each node accumulating into its operands with its *current*
  /// gradient as upstream. By the time a node's rule fires, every consumer of
  /// that node has already fired, so shared subexpressions receive the sum of
  /// all their consumers' contributions.
  ///
  /// Nothing is zeroed beforehand: a second pass over the same graph without
  /// an explicit reset ([`Var::zero_grad`] / [`TapeGuard::zero_grad`]) adds
  /// its contributions on top of the first. Calling this on a leaf just sets
  /// its gradient to 1.0.
  pub fn backward(&self) {
    let order = topological_order(self.snap, self.node);
    trace!("backward pass over {} nodes", order.len());

    let mut nodes = self.snap.nodes.borrow_mut();
    // seed: the derivative of the root with respect to itself
    nodes[self.node].grad = 1.0;

    for &index in order.iter().rev() {
      let (op, out_value, upstream) = {
        let node = &nodes[index];
        (node.op, node.value, node.grad)
      };
      if op == OpKind::Leaf {
        continue;
      }
      let operands = nodes[index].operands.clone();
      let operand_values: SmallVec<[f64; 2]> =
        operands.iter().map(|&i| nodes[i].value).collect();
      let contributions = local_grads(op, out_value, upstream, &operand_values);
      for (&operand, contribution) in operands.iter().zip(contributions) {
        nodes[operand].grad += contribution;
      }
    }
  }
}

impl fmt::Debug for Var<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Var")
      .field("node", &self.node)
      .field("value", &self.value())
      .field("grad", &self.grad())
      .field("op", &self.op())
      .finish()
  }
}

/// Exponent argument for [`Var::pow`]: either a plain number (supported) or a
/// graph value (rejected). Converting explicitly here keeps the "number or
/// node" question out of the operation itself.
pub enum Exponent<'snap> {
  Constant(f64),
  Var(Var<'snap>),
}

impl From<f64> for Exponent<'_> {
  fn from(k: f64) -> Self {
    Exponent::Constant(k)
  }
}

impl From<i32> for Exponent<'_> {
  fn from(k: i32) -> Self {
    Exponent::Constant(k.into())
  }
}

impl<'snap> From<Var<'snap>> for Exponent<'snap> {
  fn from(var: Var<'snap>) -> Self {
    Exponent::Var(var)
  }
}

impl<'snap> From<&Var<'snap>> for Exponent<'snap> {
  fn from(var: &Var<'snap>) -> Self {
    Exponent::Var(*var)
  }
}

/// Post-order DFS from `root` with an explicit work stack, visiting operands
/// in order before emitting the node itself. Shared operands are emitted
/// exactly once, at the position of their first discovery. Every node's
/// operands therefore occur strictly before it in the result.
fn topological_order(snap: &Snapshot, root: NodeIndex) -> Vec<NodeIndex> {
  let nodes = snap.nodes.borrow();

  let mut order = Vec::new();
  let mut visited = BitSet::with_capacity(nodes.len());
  let mut stack = vec![(root, false)];

  while let Some((index, operands_processed)) = stack.pop() {
    if operands_processed {
      order.push(index);
    } else if visited.insert(index) {
      // marker to emit the node after its operands
      stack.push((index, true));
      // push in reverse so the first operand is visited first
      for &operand in nodes[index].operands.iter().rev() {
        if !visited.contains(operand) {
          stack.push((operand, false));
        }
      }
    }
  }

  order
}

impl<'snap> Add for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn add(self, other: Self) -> Self::Output {
    let value = self.value() + other.value();
    self.derive(value, OpKind::Add, smallvec![self.node, other.node])
  }
}

impl<'snap> Add<f64> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn add(self, other: f64) -> Self::Output {
    self + self.lift(other)
  }
}

impl<'snap> Add<&Var<'snap>> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn add(self, other: &Var<'snap>) -> Self::Output {
    self + *other
  }
}

impl<'snap> Add for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn add(self, other: Self) -> Self::Output {
    *self + *other
  }
}

impl<'snap> Add<Var<'snap>> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn add(self, other: Var<'snap>) -> Self::Output {
    *self + other
  }
}

impl<'snap> Add<f64> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn add(self, other: f64) -> Self::Output {
    *self + other
  }
}

impl<'snap> Neg for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn neg(self) -> Self::Output {
    let value = -self.value();
    self.derive(value, OpKind::Neg, smallvec![self.node])
  }
}

impl<'snap> Neg for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn neg(self) -> Self::Output {
    -*self
  }
}

impl<'snap> Sub for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn sub(self, other: Self) -> Self::Output {
    self + (-other)
  }
}

impl<'snap> Sub<f64> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn sub(self, other: f64) -> Self::Output {
    self + (-self.lift(other))
  }
}

impl<'snap> Sub<&Var<'snap>> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn sub(self, other: &Var<'snap>) -> Self::Output {
    self - *other
  }
}

impl<'snap> Sub for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn sub(self, other: Self) -> Self::Output {
    *self - *other
  }
}

impl<'snap> Sub<Var<'snap>> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn sub(self, other: Var<'snap>) -> Self::Output {
    *self - other
  }
}

impl<'snap> Sub<f64> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn sub(self, other: f64) -> Self::Output {
    *self - other
  }
}

impl<'snap> Mul for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn mul(self, other: Self) -> Self::Output {
    let value = self.value() * other.value();
    self.derive(value, OpKind::Mul, smallvec![self.node, other.node])
  }
}

impl<'snap> Mul<f64> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn mul(self, other: f64) -> Self::Output {
    self * self.lift(other)
  }
}

impl<'snap> Mul<&Var<'snap>> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn mul(self, other: &Var<'snap>) -> Self::Output {
    self * *other
  }
}

impl<'snap> Mul for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn mul(self, other: Self) -> Self::Output {
    *self * *other
  }
}

impl<'snap> Mul<Var<'snap>> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn mul(self, other: Var<'snap>) -> Self::Output {
    *self * other
  }
}

impl<'snap> Mul<f64> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn mul(self, other: f64) -> Self::Output {
    *self * other
  }
}

impl<'snap> Div for Var<'snap> {
  type Output = Var<'snap>;

  /// Lowered to `self * other.powf(-1.0)`; a zero divisor produces an
  /// infinity rather than an error.
  #[inline]
  fn div(self, other: Self) -> Self::Output {
    self * other.powf(-1.0)
  }
}

impl<'snap> Div<f64> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline]
  fn div(self, other: f64) -> Self::Output {
    self / self.lift(other)
  }
}

impl<'snap> Div<&Var<'snap>> for Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn div(self, other: &Var<'snap>) -> Self::Output {
    self / *other
  }
}

impl<'snap> Div for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn div(self, other: Self) -> Self::Output {
    *self / *other
  }
}

impl<'snap> Div<Var<'snap>> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn div(self, other: Var<'snap>) -> Self::Output {
    *self / other
  }
}

impl<'snap> Div<f64> for &Var<'snap> {
  type Output = Var<'snap>;

  #[inline(always)]
  fn div(self, other: f64) -> Self::Output {
    *self / other
  }
}

/// The tape owning the graph arena. Nodes are appended as operations execute
/// and are never reclaimed; rebuilding a forward pass in a loop grows the
/// arena (memory reclamation is deliberately out of scope).
#[derive(Debug, Default)]
pub struct Tape {
  snap: Snapshot,
}

impl Tape {
  pub fn new() -> Self {
    Self {
      snap: Snapshot::default(),
    }
  }

  /// Borrow the tape for graph construction.
  pub fn guard(&mut self) -> TapeGuard<'_> {
    TapeGuard { snap: &self.snap }
  }
}

/// Construction handle for a tape; creates leaves and owns the whole-graph
/// gradient reset.
pub struct TapeGuard<'snap> {
  snap: &'snap Snapshot,
}

impl<'snap> TapeGuard<'snap> {
  /// Create a leaf node (an input or constant) with gradient 0.0.
  #[inline]
  pub fn var(&self, value: f64) -> Var<'snap> {
    Var {
      node: self.snap.add_node(value, OpKind::Leaf, SmallVec::new()),
      snap: self.snap,
    }
  }

  /// Reset every node's gradient to 0.0.
  ///
  /// Required between backward passes that revisit the same nodes; backward
  /// never does this on its own.
  pub fn zero_grad(&self) {
    let mut nodes = self.snap.nodes.borrow_mut();
    debug!("zeroing gradients of {} nodes", nodes.len());
    for node in nodes.iter_mut() {
      node.grad = 0.0;
    }
  }

  /// Number of nodes currently on the tape.
  pub fn node_count(&self) -> usize {
    self.snap.nodes.borrow().len()
  }
}
