//! Neuron/layer/MLP composition on top of the scalar graph.
//!
//! A thin consumer of the core API: it wires leaf parameters and inputs into
//! expressions and reads gradients back after a backward pass. No algorithmic
//! content of its own.

use rand::Rng;

use crate::tape::{TapeGuard, Var};

/// A single neuron: `tanh(sum(w_i * x_i) + b)`.
pub struct Neuron<'snap> {
  w: Vec<Var<'snap>>,
  b: Var<'snap>,
}

impl<'snap> Neuron<'snap> {
  /// Weights and bias initialized uniformly in `[-1, 1)`.
  pub fn new(guard: &TapeGuard<'snap>, nin: usize, rng: &mut impl Rng) -> Self {
    Self {
      w: (0..nin).map(|_| guard.var(rng.gen_range(-1.0..1.0))).collect(),
      b: guard.var(rng.gen_range(-1.0..1.0)),
    }
  }

  pub fn forward(&self, xs: &[Var<'snap>]) -> Var<'snap> {
    let mut act = self.b;
    for (w, x) in self.w.iter().zip(xs) {
      act = act + *w * *x;
    }
    act.tanh()
  }

  pub fn parameters(&self) -> Vec<Var<'snap>> {
    let mut params = self.w.clone();
    params.push(self.b);
    params
  }
}

/// A fully-connected layer of neurons sharing the same inputs.
pub struct Layer<'snap> {
  neurons: Vec<Neuron<'snap>>,
}

impl<'snap> Layer<'snap> {
  pub fn new(guard: &TapeGuard<'snap>, nin: usize, nout: usize, rng: &mut impl Rng) -> Self {
    Self {
      neurons: (0..nout).map(|_| Neuron::new(guard, nin, rng)).collect(),
    }
  }

  pub fn forward(&self, xs: &[Var<'snap>]) -> Vec<Var<'snap>> {
    self.neurons.iter().map(|n| n.forward(xs)).collect()
  }

  pub fn parameters(&self) -> Vec<Var<'snap>> {
    self.neurons.iter().flat_map(Neuron::parameters).collect()
  }
}

/// A multilayer perceptron: `nin` inputs feeding layers of the given widths.
pub struct Mlp<'snap> {
  layers: Vec<Layer<'snap>>,
}

impl<'snap> Mlp<'snap> {
  pub fn new(guard: &TapeGuard<'snap>, nin: usize, nouts: &[usize], rng: &mut impl Rng) -> Self {
    let sizes: Vec<usize> = std::iter::once(nin).chain(nouts.iter().copied()).collect();
    Self {
      layers: sizes
        .windows(2)
        .map(|pair| Layer::new(guard, pair[0], pair[1], rng))
        .collect(),
    }
  }

  pub fn forward(&self, xs: &[Var<'snap>]) -> Vec<Var<'snap>> {
    let mut activations = xs.to_vec();
    for layer in &self.layers {
      activations = layer.forward(&activations);
    }
    activations
  }

  pub fn parameters(&self) -> Vec<Var<'snap>> {
    self.layers.iter().flat_map(Layer::parameters).collect()
  }

  /// Reset parameter gradients before the next backward pass.
  ///
  /// Intermediate nodes of an old forward pass are never revisited by a new
  /// one, so only parameters need clearing in a training loop.
  pub fn zero_grad(&self) {
    for p in self.parameters() {
      p.zero_grad();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tape::Tape;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn parameter_counts() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut tape = Tape::new();
    let guard = tape.guard();
    let net = Mlp::new(&guard, 3, &[4, 4, 1], &mut rng);
    // 4*(3+1) + 4*(4+1) + 1*(4+1)
    assert_eq!(net.parameters().len(), 41);
  }

  #[test]
  fn forward_is_bounded_by_tanh() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut tape = Tape::new();
    let guard = tape.guard();
    let net = Mlp::new(&guard, 2, &[3, 1], &mut rng);
    let xs = [guard.var(1.0), guard.var(-1.0)];
    let out = net.forward(&xs);
    assert_eq!(out.len(), 1);
    assert!(out[0].value().abs() <= 1.0);
  }

  #[test]
  fn gradient_descent_reduces_loss() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut tape = Tape::new();
    let guard = tape.guard();
    let net = Mlp::new(&guard, 3, &[4, 4, 1], &mut rng);

    let xs = [
      [2.0, 3.0, -1.0],
      [3.0, -1.0, 0.5],
      [0.5, 1.0, 1.0],
      [1.0, 1.0, -1.0],
    ];
    let ys = [1.0, -1.0, -1.0, 1.0];

    let mut first_loss = None;
    let mut last_loss = f64::INFINITY;
    for _ in 0..100 {
      let mut loss = guard.var(0.0);
      for (x, y) in xs.iter().zip(ys) {
        let inputs: Vec<_> = x.iter().map(|&v| guard.var(v)).collect();
        let pred = net.forward(&inputs)[0];
        let err = pred - y;
        loss = loss + err * err;
      }
      net.zero_grad();
      loss.backward();
      for p in net.parameters() {
        p.set_value(p.value() - 0.05 * p.grad());
      }
      first_loss.get_or_insert(loss.value());
      last_loss = loss.value();
    }

    assert!(last_loss < first_loss.unwrap());
  }
}
