//! Matrix-multiplication forward and gradient tests, covering every
//! combination of the per-operand transpose flags.

use tg_graph::{GraphError, Node, Session};
use tg_tensor::Tensor;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tensor(dims: &[usize], values: &[f32]) -> Tensor {
    Tensor::builder(dims).values(values.to_vec()).build().unwrap()
}

/// A = [[2,1,4],[0,1,1]] as stored for the given transpose flag.
fn matrix_a(session: &Session, transposed: bool) -> Node {
    if transposed {
        session.constant(tensor(&[3, 2], &[2.0, 0.0, 1.0, 1.0, 4.0, 1.0]))
    } else {
        session.constant(tensor(&[2, 3], &[2.0, 1.0, 4.0, 0.0, 1.0, 1.0]))
    }
}

/// B = [[6,3,-1,0],[1,1,0,4],[-2,5,0,2]] as stored for the given flag.
fn matrix_b(session: &Session, transposed: bool) -> Node {
    if transposed {
        session.constant(tensor(
            &[4, 3],
            &[6.0, 1.0, -2.0, 3.0, 1.0, 5.0, -1.0, 0.0, 0.0, 0.0, 4.0, 2.0],
        ))
    } else {
        session.constant(tensor(
            &[3, 4],
            &[6.0, 3.0, -1.0, 0.0, 1.0, 1.0, 0.0, 4.0, -2.0, 5.0, 0.0, 2.0],
        ))
    }
}

fn expected_product() -> Tensor {
    tensor(&[2, 4], &[5.0, 27.0, -2.0, 12.0, -1.0, 6.0, 0.0, 6.0])
}

fn run_forward(a_transpose: bool, b_transpose: bool) -> Tensor {
    let session = Session::new();
    let a = matrix_a(&session, a_transpose);
    let b = matrix_b(&session, b_transpose);
    let c = session.matmul(a_transpose, b_transpose, &a, &b);

    session.compute(&[], &[c.clone()]).unwrap();
    session.results().get_output(&c).unwrap()
}

#[test]
fn matmul_untransposed() {
    init_logging();
    assert_eq!(run_forward(false, false), expected_product());
}

#[test]
fn matmul_a_transposed() {
    init_logging();
    assert_eq!(run_forward(true, false), expected_product());
}

#[test]
fn matmul_b_transposed() {
    init_logging();
    assert_eq!(run_forward(false, true), expected_product());
}

#[test]
fn matmul_both_transposed() {
    init_logging();
    assert_eq!(run_forward(true, true), expected_product());
}

#[test]
fn matmul_incompatible_dimensions_fail() {
    init_logging();
    let session = Session::new();

    // 2x3 against 3x4 only multiplies with both flags clear; every flagged
    // variant has a mismatched inner dimension.
    for (a_t, b_t) in [(true, false), (false, true), (true, true)] {
        let a = matrix_a(&session, false);
        let b = matrix_b(&session, false);
        let c = session.matmul(a_t, b_t, &a, &b);

        let result = session.compute(&[], &[c]);
        match result {
            Err(GraphError::Execution(inner)) => {
                assert!(matches!(*inner, GraphError::InnerDimension(_, _)));
            }
            other => panic!("expected an execution error, got {:?}", other),
        }
    }
}

#[test]
fn matmul_rejects_non_2d_operands() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[3], &[1.0, 2.0, 3.0]));
    let b = matrix_b(&session, false);
    let c = session.matmul(false, false, &a, &b);

    let result = session.compute(&[], &[c]);
    match result {
        Err(GraphError::Execution(inner)) => {
            assert!(matches!(*inner, GraphError::NotTwoDimensional(1)));
        }
        other => panic!("expected an execution error, got {:?}", other),
    }
}

fn run_gradient(a_transpose: bool, b_transpose: bool) -> (Tensor, Tensor) {
    let session = Session::new();
    let a = matrix_a(&session, a_transpose);
    let b = matrix_b(&session, b_transpose);
    let c = session.matmul(a_transpose, b_transpose, &a, &b);

    session.compute(&[], &[c.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    (
        results.get_gradient(&a).unwrap(),
        results.get_gradient(&b).unwrap(),
    )
}

#[test]
fn matmul_gradient_untransposed() {
    init_logging();
    let (da, db) = run_gradient(false, false);
    assert_eq!(da, tensor(&[2, 3], &[8.0, 6.0, 5.0, 8.0, 6.0, 5.0]));
    assert_eq!(
        db,
        tensor(
            &[3, 4],
            &[2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 5.0, 5.0, 5.0, 5.0],
        )
    );
}

#[test]
fn matmul_gradient_a_transposed() {
    init_logging();
    let (da, db) = run_gradient(true, false);
    assert_eq!(da, tensor(&[3, 2], &[8.0, 8.0, 6.0, 6.0, 5.0, 5.0]));
    assert_eq!(
        db,
        tensor(
            &[3, 4],
            &[2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 5.0, 5.0, 5.0, 5.0],
        )
    );
}

#[test]
fn matmul_gradient_b_transposed() {
    init_logging();
    let (da, db) = run_gradient(false, true);
    assert_eq!(da, tensor(&[2, 3], &[8.0, 6.0, 5.0, 8.0, 6.0, 5.0]));
    assert_eq!(
        db,
        tensor(
            &[4, 3],
            &[2.0, 2.0, 5.0, 2.0, 2.0, 5.0, 2.0, 2.0, 5.0, 2.0, 2.0, 5.0],
        )
    );
}

#[test]
fn matmul_gradient_both_transposed() {
    init_logging();
    let (da, db) = run_gradient(true, true);
    assert_eq!(da, tensor(&[3, 2], &[8.0, 8.0, 6.0, 6.0, 5.0, 5.0]));
    assert_eq!(
        db,
        tensor(
            &[4, 3],
            &[2.0, 2.0, 5.0, 2.0, 2.0, 5.0, 2.0, 2.0, 5.0, 2.0, 2.0, 5.0],
        )
    );
}

#[test]
fn matmul_feeds_elementwise_chain() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[2, 2], &[1.0, 2.0, 3.0, 4.0]));
    let b = session.constant(tensor(&[2, 2], &[5.0, 6.0, 7.0, 8.0]));
    let product = session.matmul(false, false, &a, &b);
    let shifted = session.add(&[product.clone(), session.scalar(1.0)]);

    session.compute(&[], &[shifted.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert_eq!(
        results.get_output(&product).unwrap(),
        tensor(&[2, 2], &[19.0, 22.0, 43.0, 50.0])
    );
    assert_eq!(
        results.get_output(&shifted).unwrap(),
        tensor(&[2, 2], &[20.0, 23.0, 44.0, 51.0])
    );
    // The addition passes ones through, so the product's gradients match the
    // plain matmul rules: dA = ones * B^T, dB = A^T * ones.
    assert_eq!(
        results.get_gradient(&a).unwrap(),
        tensor(&[2, 2], &[11.0, 15.0, 11.0, 15.0])
    );
    assert_eq!(
        results.get_gradient(&b).unwrap(),
        tensor(&[2, 2], &[4.0, 4.0, 6.0, 6.0])
    );
}
