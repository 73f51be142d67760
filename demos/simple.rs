use scalargrad::Tape;

fn main() {
  // Record a tiny computation on the tape, then differentiate it
  let mut tape = Tape::new();
  let guard = tape.guard();
  let x = guard.var(1.0);
  let y = x * x;
  y.backward();
  println!("value: {}, dy/dx: {}", y.value(), x.grad());
}
