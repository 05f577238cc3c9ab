//! # tg_tensor - Tensor semantic layer
//!
//! Row-major dense arrays of `f32` with the shape algebra the graph engine
//! relies on: NumPy-style right-aligned broadcasting, un-broadcasting (summing
//! along replicated axes), element-wise primitives, and axis sums.
//!
//! The core type is [`Tensor`], built through [`Tensor::builder`]:
//!
//! ```
//! use tg_tensor::Tensor;
//!
//! let t = Tensor::builder(&[2, 3])
//!     .values(vec![3.0, 8.0, 2.0, 5.0, 1.0, 6.0])
//!     .build()
//!     .unwrap();
//! assert_eq!(t.dims(), &[2, 3]);
//! assert_eq!(t.get(&[1, 0]).unwrap(), 5.0);
//! ```

mod error;
pub mod ops;
pub(crate) mod shape;
mod tensor;

pub use error::{Result, TensorError};
pub use tensor::{Builder, Tensor};
