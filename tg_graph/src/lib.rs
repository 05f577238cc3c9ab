//! # tg_graph - Computational graph engine
//!
//! Reverse-mode automatic differentiation over a DAG of tensor operations.
//! A [`Session`] owns one or more [`Graph`]s; nodes register with the
//! session's current graph as they are constructed. [`Session::compute`]
//! evaluates the cone of the requested outputs in topological-plus-distance
//! order on a worker pool, and [`Session::gradient`] accumulates the
//! gradient of every evaluated node by reverse propagation of adjoint
//! contributions.
//!
//! ```
//! use tg_graph::Session;
//!
//! let session = Session::new();
//! let a = session.scalar(2.0);
//! let b = session.scalar(1.0);
//! let one = session.scalar(1.0);
//!
//! // e = (a + b) * (b + 1)
//! let c = session.add(&[a.clone(), b.clone()]);
//! let d = session.add(&[b.clone(), one]);
//! let e = session.mul(&[c, d]);
//!
//! session.compute(&[], &[e.clone()]).unwrap();
//! session.gradient().unwrap();
//!
//! let results = session.results();
//! assert_eq!(results.get_output(&e).unwrap().values(), &[6.0]);
//! assert_eq!(results.get_gradient(&a).unwrap().values(), &[2.0]);
//! assert_eq!(results.get_gradient(&b).unwrap().values(), &[5.0]);
//! ```
//!
//! Placeholders defer their values to the compute call:
//!
//! ```
//! use tg_graph::Session;
//! use tg_tensor::Tensor;
//!
//! let session = Session::new();
//! let x = session.placeholder();
//! let weights = session.constant(
//!     Tensor::builder(&[1, 3]).values(vec![2.0, 3.0, 4.0]).build().unwrap(),
//! );
//! let scaled = session.mul(&[x.clone(), weights]);
//!
//! let bindings = vec![(
//!     x,
//!     Tensor::builder(&[2, 3])
//!         .values(vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0])
//!         .build()
//!         .unwrap(),
//! )];
//! session.compute(&bindings, &[scaled.clone()]).unwrap();
//!
//! assert_eq!(
//!     session.results().get_output(&scaled).unwrap().values(),
//!     &[2.0, 3.0, 4.0, 4.0, 6.0, 8.0]
//! );
//! ```

mod error;
mod graph;
mod node;
mod pool;
mod results;
mod session;

pub use error::{GraphError, Result};
pub use graph::Graph;
pub use node::{Node, NodeId, NodeKind};
pub use pool::TaskHandle;
pub use results::{AdjointMap, Results};
pub use session::Session;
