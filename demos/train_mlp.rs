use std::fs;

use scalargrad::nn::Mlp;
use scalargrad::{dot, Tape, Var};

/// Train a small MLP on four samples with a squared-error loss, then write
/// the final loss graph to a DOT file for rendering with graphviz.
fn main() {
  let mut tape = Tape::new();
  let guard = tape.guard();
  let mut rng = rand::thread_rng();
  let net = Mlp::new(&guard, 3, &[4, 4, 1], &mut rng);

  let xs = [
    [2.0, 3.0, -1.0],
    [3.0, -1.0, 0.5],
    [0.5, 1.0, 1.0],
    [1.0, 1.0, -1.0],
  ];
  let ys = [1.0, -1.0, -1.0, 1.0];

  let mut last_loss: Option<Var> = None;
  for step in 0..20 {
    // forward: fresh input leaves and activations every iteration
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
      p.set_value(p.value() - 0.1 * p.grad());
    }

    println!("{step} {}", loss.value());
    last_loss = Some(loss);
  }

  println!("\nfinal predictions:");
  for (x, y) in xs.iter().zip(ys) {
    let inputs: Vec<_> = x.iter().map(|&v| guard.var(v)).collect();
    let pred = net.forward(&inputs)[0];
    println!("input: {x:?}, predicted: {:.4}, target: {y}", pred.value());
  }

  if let Some(loss) = last_loss {
    fs::write("mlp_graph.dot", dot::draw_dot(&loss)).expect("failed to write mlp_graph.dot");
    println!("\nwrote loss graph to mlp_graph.dot ({} nodes)", guard.node_count());
  }
}
