//! End-to-end graph execution and gradient tests.

use tg_graph::{GraphError, Session};
use tg_tensor::{Tensor, TensorError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tensor(dims: &[usize], values: &[f32]) -> Tensor {
    Tensor::builder(dims).values(values.to_vec()).build().unwrap()
}

#[test]
fn add_broadcast_gradients() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[2, 3], &[3.0, 8.0, 2.0, 5.0, 1.0, 6.0]));
    let b = session.constant(tensor(&[1, 3], &[3.0, 2.0, 1.0]));
    let c = session.add(&[a.clone(), b.clone()]);

    session.compute(&[], &[c.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert_eq!(
        results.get_output(&c).unwrap(),
        tensor(&[2, 3], &[6.0, 10.0, 3.0, 8.0, 3.0, 7.0])
    );
    assert_eq!(
        results.get_gradient(&a).unwrap(),
        tensor(&[2, 3], &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0])
    );
    assert_eq!(
        results.get_gradient(&b).unwrap(),
        tensor(&[1, 3], &[2.0, 2.0, 2.0])
    );
}

#[test]
fn multiply_broadcast_gradients() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[2, 3], &[3.0, 8.0, 2.0, 5.0, 1.0, 6.0]));
    let b = session.constant(tensor(&[1, 3], &[3.0, 2.0, 1.0]));
    let c = session.mul(&[a.clone(), b.clone()]);

    session.compute(&[], &[c.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert_eq!(
        results.get_output(&c).unwrap(),
        tensor(&[2, 3], &[9.0, 16.0, 2.0, 15.0, 2.0, 6.0])
    );
    assert_eq!(
        results.get_gradient(&a).unwrap(),
        tensor(&[2, 3], &[3.0, 2.0, 1.0, 3.0, 2.0, 1.0])
    );
    assert_eq!(
        results.get_gradient(&b).unwrap(),
        tensor(&[1, 3], &[8.0, 9.0, 8.0])
    );
}

#[test]
fn chained_gradients() {
    init_logging();
    let session = Session::new();

    let a = session.scalar(2.0);
    let b = session.scalar(1.0);
    let one = session.scalar(1.0);

    let c = session.add(&[a.clone(), b.clone()]);
    let d = session.add(&[b.clone(), one]);
    let e = session.mul(&[c, d]);

    session.compute(&[], &[e.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert_eq!(results.get_output(&e).unwrap().values(), &[6.0]);
    assert_eq!(results.get_gradient(&a).unwrap().values(), &[2.0]);
    assert_eq!(results.get_gradient(&b).unwrap().values(), &[5.0]);
}

#[test]
fn compute_with_placeholders() {
    init_logging();
    let session = Session::new();

    let a = session.placeholder();
    let b = session.placeholder();
    let c = session.placeholder();

    let d = session.add(&[a.clone(), a.clone()]);
    let e = session.mul(&[a.clone(), b.clone(), d]);

    let bindings = vec![
        (a, tensor(&[1], &[2.0])),
        (b, tensor(&[3], &[1.0, 5.0, 6.0])),
        (c, tensor(&[3], &[3.0, 2.0, 8.0])),
    ];
    session.compute(&bindings, &[e.clone()]).unwrap();

    assert_eq!(
        session.results().get_output(&e).unwrap(),
        tensor(&[3], &[8.0, 40.0, 48.0])
    );
}

#[test]
fn multiple_graphs_do_not_interfere() {
    init_logging();
    let session = Session::new();

    let a = session.placeholder();
    let b = session.placeholder();
    let c = session.placeholder();

    let d = session.add(&[a.clone(), a.clone()]);
    let e = session.mul(&[a.clone(), b.clone(), d.clone()]);
    let f = session.add(&[a.clone(), c.clone()]);

    let bindings = vec![
        (a, tensor(&[1], &[2.0])),
        (b, tensor(&[3], &[1.0, 5.0, 6.0])),
        (c, tensor(&[3], &[3.0, 2.0, 8.0])),
    ];
    session.compute(&bindings, &[e.clone(), f.clone()]).unwrap();

    let second = session.add_graph();
    session.set_current(&second);

    let pd = session.placeholder();
    let pe = session.placeholder();
    let pf = session.placeholder();

    let g = session.mul(&[pd.clone(), pf.clone()]);
    let h = session.add(&[pe.clone(), pf.clone()]);
    let i = session.mul(&[g, h]);

    let results = session.results();
    let bindings = vec![
        (pd, results.get_output(&d).unwrap()),
        (pe, results.get_output(&e).unwrap()),
        (pf, results.get_output(&f).unwrap()),
    ];
    session.compute(&bindings, &[i.clone()]).unwrap();

    assert_eq!(
        session.results().get_output(&i).unwrap(),
        tensor(&[3], &[260.0, 704.0, 2320.0])
    );
}

#[test]
fn separate_trees_in_one_compute() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[3], &[3.0, 2.0, 1.0]));
    let b = session.constant(tensor(&[3], &[1.0, 2.0, 1.0]));
    let c = session.constant(tensor(&[3], &[1.0, 3.0, 2.0]));
    let d = session.constant(tensor(&[3], &[1.0, 2.0, 3.0]));

    let e = session.add(&[a, b]);
    let f = session.add(&[c, d]);

    session.compute(&[], &[e.clone(), f.clone()]).unwrap();

    let results = session.results();
    assert_eq!(results.get_output(&e).unwrap(), tensor(&[3], &[4.0, 4.0, 2.0]));
    assert_eq!(results.get_output(&f).unwrap(), tensor(&[3], &[2.0, 5.0, 5.0]));
}

#[test]
fn unused_nodes_are_sorted_out() {
    init_logging();
    let session = Session::new();

    let a = session.placeholder();
    let b = session.placeholder();
    let c = session.placeholder();

    let d = session.add(&[a.clone(), a.clone()]);
    let e = session.mul(&[a.clone(), b.clone(), d.clone()]);
    let f = session.add(&[a.clone(), c.clone()]);

    let g = session.mul(&[d.clone(), f.clone()]);
    let h = session.add(&[e.clone(), f.clone()]);
    session.mul(&[g.clone(), h.clone()]);

    let sorted = session
        .current_graph()
        .sort_for(&[e.clone(), g.clone()])
        .unwrap();

    // Only the cone of {e, g}: a, b, c, d, e, f, g; h and the final product
    // are sorted out.
    let ids: Vec<_> = sorted.iter().map(|n| n.id()).collect();
    assert_eq!(ids.len(), 7);
    assert!(!ids.contains(&h.id()));

    // The two leaves feeding the deepest chains come first, then the three
    // mid-distance nodes, then the end nodes.
    let leading: Vec<_> = ids[..2].to_vec();
    assert!(leading.contains(&a.id()));
    assert!(leading.contains(&c.id()));

    let middle: Vec<_> = ids[2..5].to_vec();
    assert!(middle.contains(&b.id()));
    assert!(middle.contains(&d.id()));
    assert!(middle.contains(&f.id()));

    let trailing: Vec<_> = ids[5..].to_vec();
    assert!(trailing.contains(&e.id()));
    assert!(trailing.contains(&g.id()));
}

#[test]
fn unreachable_nodes_are_not_evaluated() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[1], &[1.0]));
    let b = session.constant(tensor(&[1], &[2.0]));
    let used = session.add(&[a.clone(), b.clone()]);
    let unused = session.mul(&[a, b]);

    session.compute(&[], &[used.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert_eq!(results.get_output(&used).unwrap().values(), &[3.0]);
    assert!(matches!(
        results.get_output(&unused),
        Err(GraphError::MissingOutput(_))
    ));
    assert_eq!(results.get_gradient(&unused), None);
}

#[test]
fn compute_is_idempotent() {
    init_logging();
    let session = Session::new();

    let a = session.placeholder();
    let b = session.constant(tensor(&[2], &[10.0, 20.0]));
    let c = session.add(&[a.clone(), b]);

    let bindings = vec![(a, tensor(&[2], &[1.0, 2.0]))];
    session.compute(&bindings, &[c.clone()]).unwrap();
    let first = session.results().get_output(&c).unwrap();

    session.compute(&bindings, &[c.clone()]).unwrap();
    let second = session.results().get_output(&c).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, tensor(&[2], &[11.0, 22.0]));
}

#[test]
fn reversed_child_order_matches() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[2, 3], &[3.0, 8.0, 2.0, 5.0, 1.0, 6.0]));
    let b = session.constant(tensor(&[1, 3], &[3.0, 2.0, 1.0]));
    let forward = session.mul(&[a.clone(), b.clone()]);
    let reversed = session.mul(&[b.clone(), a.clone()]);

    session.compute(&[], &[forward.clone(), reversed.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert_eq!(
        results.get_output(&forward).unwrap(),
        results.get_output(&reversed).unwrap()
    );
    // Both consumers contribute, so each gradient doubles the single-use one.
    assert_eq!(
        results.get_gradient(&a).unwrap(),
        tensor(&[2, 3], &[6.0, 4.0, 2.0, 6.0, 4.0, 2.0])
    );
    assert_eq!(
        results.get_gradient(&b).unwrap(),
        tensor(&[1, 3], &[16.0, 18.0, 16.0])
    );
}

#[test]
fn gradient_before_compute_fails() {
    init_logging();
    let session = Session::new();

    let a = session.scalar(1.0);
    let b = session.scalar(2.0);
    session.add(&[a, b]);

    assert_eq!(session.gradient(), Err(GraphError::NotComputed));
}

#[test]
fn missing_placeholder_binding_fails() {
    init_logging();
    let session = Session::new();

    let a = session.placeholder();
    let b = session.constant(tensor(&[1], &[1.0]));
    let c = session.add(&[a, b]);

    assert!(matches!(
        session.compute(&[], &[c]),
        Err(GraphError::MissingOutput(_))
    ));
}

#[test]
fn empty_outputs_are_a_no_op() {
    init_logging();
    let session = Session::new();
    session.scalar(1.0);
    assert_eq!(session.compute(&[], &[]), Ok(()));
}

#[test]
fn broadcast_mismatch_fails_compute() {
    init_logging();
    let session = Session::new();

    let a = session.constant(tensor(&[3, 2], &[0.0; 6]));
    let b = session.constant(tensor(&[3, 5], &[0.0; 15]));
    let c = session.add(&[a, b]);

    let result = session.compute(&[], &[c]);
    match result {
        Err(GraphError::Execution(inner)) => {
            assert!(matches!(*inner, GraphError::Tensor(TensorError::Broadcast { .. })));
        }
        other => panic!("expected an execution error, got {:?}", other),
    }
}

#[test]
fn results_clear_forgets_everything() {
    init_logging();
    let session = Session::new();

    let a = session.scalar(3.0);
    let b = session.scalar(4.0);
    let c = session.add(&[a.clone(), b]);

    session.compute(&[], &[c.clone()]).unwrap();
    session.gradient().unwrap();

    let results = session.results();
    assert!(results.get_output(&c).is_ok());
    assert!(results.get_gradient(&a).is_some());

    results.clear();
    assert!(matches!(
        results.get_output(&c),
        Err(GraphError::MissingOutput(_))
    ));
    assert_eq!(results.get_gradient(&a), None);
}

#[test]
fn session_clear_starts_a_fresh_graph() {
    init_logging();
    let session = Session::new();

    let a = session.scalar(1.0);
    let b = session.scalar(2.0);
    session.add(&[a, b]);
    assert_eq!(session.current_graph().node_count(), 3);

    session.clear();
    assert_eq!(session.current_graph().node_count(), 0);

    // The fresh graph computes independently of the dropped one.
    let c = session.scalar(5.0);
    let d = session.scalar(7.0);
    let e = session.mul(&[c, d]);
    session.compute(&[], &[e.clone()]).unwrap();
    assert_eq!(session.results().get_output(&e).unwrap().values(), &[35.0]);
}
