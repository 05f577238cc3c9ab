//! Demo for the tensor graph engine.
//!
//! Builds a few small graphs, runs forward passes and reverse-mode
//! gradients, and checks the results against hand-computed values.

use tg_graph::{GraphError, Session};
use tg_tensor::Tensor;

fn tensor(dims: &[usize], values: &[f32]) -> Result<Tensor, GraphError> {
    Ok(Tensor::builder(dims).values(values.to_vec()).build()?)
}

fn main() {
    env_logger::init();

    if let Err(error) = run() {
        eprintln!("FAIL: {}", error);
        std::process::exit(1);
    }
    println!("\nPASS");
}

fn run() -> Result<(), GraphError> {
    chained_expression()?;
    broadcast_product()?;
    matrix_product()?;
    Ok(())
}

/// e = (a + b) * (b + 1) at a = 2, b = 1.
fn chained_expression() -> Result<(), GraphError> {
    println!("=== Chained expression: e = (a + b) * (b + 1) ===");

    let session = Session::new();
    let a = session.scalar(2.0);
    let b = session.scalar(1.0);
    let one = session.scalar(1.0);

    let c = session.add(&[a.clone(), b.clone()]);
    let d = session.add(&[b.clone(), one]);
    let e = session.mul(&[c, d]);

    session.compute(&[], &[e.clone()])?;
    session.gradient()?;

    let results = session.results();
    let value = results.get_output(&e)?;
    println!("e      = {}", value.values()[0]);
    print_gradient(&session, "de/da", &a)?;
    print_gradient(&session, "de/db", &b)?;

    expect(value.values() == [6.0], "e should be 6")?;
    expect(
        results.get_gradient(&a).map(|g| g.values().to_vec()) == Some(vec![2.0]),
        "de/da should be 2",
    )?;
    expect(
        results.get_gradient(&b).map(|g| g.values().to_vec()) == Some(vec![5.0]),
        "de/db should be 5",
    )
}

/// Element-wise product of a 2x3 tensor with a broadcast 1x3 tensor.
fn broadcast_product() -> Result<(), GraphError> {
    println!("\n=== Broadcast product: c = a * b ===");

    let session = Session::new();
    let a = session.constant(tensor(&[2, 3], &[3.0, 8.0, 2.0, 5.0, 1.0, 6.0])?);
    let b = session.constant(tensor(&[1, 3], &[3.0, 2.0, 1.0])?);
    let c = session.mul(&[a.clone(), b.clone()]);

    session.compute(&[], &[c.clone()])?;
    session.gradient()?;

    let results = session.results();
    println!("c      = {}", results.get_output(&c)?);
    print_gradient(&session, "dc/da", &a)?;
    print_gradient(&session, "dc/db", &b)?;

    expect(
        results.get_output(&c)? == tensor(&[2, 3], &[9.0, 16.0, 2.0, 15.0, 2.0, 6.0])?,
        "forward product mismatch",
    )?;
    expect(
        results.get_gradient(&b) == Some(tensor(&[1, 3], &[8.0, 9.0, 8.0])?),
        "gradient of the broadcast operand should sum over the broadcast axis",
    )
}

/// C = A * B through the GEMM backend, with gradients.
fn matrix_product() -> Result<(), GraphError> {
    println!("\n=== Matrix product: C = A * B ===");

    let session = Session::new();
    let a = session.constant(tensor(&[2, 3], &[2.0, 1.0, 4.0, 0.0, 1.0, 1.0])?);
    let b = session.constant(tensor(
        &[3, 4],
        &[6.0, 3.0, -1.0, 0.0, 1.0, 1.0, 0.0, 4.0, -2.0, 5.0, 0.0, 2.0],
    )?);
    let c = session.matmul(false, false, &a, &b);

    session.compute(&[], &[c.clone()])?;
    session.gradient()?;

    let results = session.results();
    println!("C      = {}", results.get_output(&c)?);
    print_gradient(&session, "dC/dA", &a)?;
    print_gradient(&session, "dC/dB", &b)?;

    expect(
        results.get_output(&c)?
            == tensor(&[2, 4], &[5.0, 27.0, -2.0, 12.0, -1.0, 6.0, 0.0, 6.0])?,
        "matrix product mismatch",
    )?;
    expect(
        results.get_gradient(&a) == Some(tensor(&[2, 3], &[8.0, 6.0, 5.0, 8.0, 6.0, 5.0])?),
        "gradient of A mismatch",
    )
}

fn print_gradient(
    session: &Session,
    label: &str,
    node: &tg_graph::Node,
) -> Result<(), GraphError> {
    match session.results().get_gradient(node) {
        Some(gradient) => println!("{} = {}", label, gradient),
        None => println!("{} = <none>", label),
    }
    Ok(())
}

fn expect(condition: bool, message: &str) -> Result<(), GraphError> {
    if !condition {
        eprintln!("FAIL: {}", message);
        std::process::exit(1);
    }
    Ok(())
}
