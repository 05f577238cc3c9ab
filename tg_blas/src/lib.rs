//! # tg_blas - Linear-algebra backend facade
//!
//! This crate is the boundary between the graph engine and whatever performs
//! the actual single-precision matrix multiplies. The [`Blas`] trait exposes
//! the minimal surface the engine needs: move a host slice into a device
//! buffer, read a buffer back, release it, and run a row-major `sgemm` with
//! per-operand transpose flags.
//!
//! The default backend is [`HostBlas`], which keeps "device" buffers in host
//! memory and runs a plain triple-loop kernel. A GPU implementation plugs in
//! through [`install`] without the engine changing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use log::trace;
use thiserror::Error;

/// Errors surfaced by a [`Blas`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlasError {
    #[error("unknown device buffer '{0}'")]
    UnknownBuffer(u64),
    #[error("buffer read of {requested} values exceeds allocation of {available}")]
    ReadOutOfBounds { requested: usize, available: usize },
    #[error("sgemm operand '{operand}' requires {required} values but the buffer holds {available}")]
    OperandTooSmall {
        operand: &'static str,
        required: usize,
        available: usize,
    },
}

pub type Result<T> = std::result::Result<T, BlasError>;

/// Opaque identifier of a device-side buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Access intent for a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// The backend contract.
///
/// `sgemm` computes `C := op(A) * op(B) + C` over row-major buffers, where
/// `op(X)` transposes `X` when the matching flag is set. `C` must be
/// zero-initialized by the caller when a fresh product is wanted. The
/// leading-dimension arguments `lda`/`ldb`/`ldc` are the row strides of the
/// raw (untransposed) buffers.
pub trait Blas: Send + Sync {
    fn allocate(&self, access: Access, values: &[f32]) -> Result<BufferId>;

    fn read_buffer(&self, buffer: BufferId, len: usize) -> Result<Vec<f32>>;

    fn release(&self, buffer: BufferId);

    #[allow(clippy::too_many_arguments)]
    fn sgemm(
        &self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        a_transpose: bool,
        b_transpose: bool,
        m: usize,
        n: usize,
        k: usize,
        lda: usize,
        ldb: usize,
        ldc: usize,
    ) -> Result<()>;
}

static GLOBAL: OnceLock<Box<dyn Blas>> = OnceLock::new();

/// Returns the process-wide backend, installing [`HostBlas`] on first use.
pub fn global() -> &'static dyn Blas {
    GLOBAL.get_or_init(|| Box::new(HostBlas::new())).as_ref()
}

/// Installs a backend for the whole process. Returns `false` when a backend
/// is already in place (the first computation installs the default).
pub fn install(backend: Box<dyn Blas>) -> bool {
    GLOBAL.set(backend).is_ok()
}

/// Owning handle to a device allocation. The allocation is released when the
/// handle is dropped.
#[derive(Debug)]
pub struct DeviceBuffer {
    id: BufferId,
    len: usize,
}

impl DeviceBuffer {
    /// Copies `values` to the device and returns the owning handle.
    pub fn allocate(access: Access, values: &[f32]) -> Result<DeviceBuffer> {
        let id = global().allocate(access, values)?;
        Ok(DeviceBuffer {
            id,
            len: values.len(),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        global().release(self.id);
    }
}

/// Host-resident reference backend.
///
/// Buffers live in a registry keyed by id, so the allocate/read/release
/// lifecycle behaves exactly like a device backend without any hardware.
pub struct HostBlas {
    buffers: Mutex<HashMap<u64, Vec<f32>>>,
    next_id: AtomicU64,
}

impl HostBlas {
    pub fn new() -> HostBlas {
        HostBlas {
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn buffers(&self) -> MutexGuard<'_, HashMap<u64, Vec<f32>>> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fetch(buffers: &HashMap<u64, Vec<f32>>, buffer: BufferId) -> Result<&Vec<f32>> {
        buffers
            .get(&buffer.0)
            .ok_or(BlasError::UnknownBuffer(buffer.0))
    }
}

impl Default for HostBlas {
    fn default() -> Self {
        Self::new()
    }
}

impl Blas for HostBlas {
    fn allocate(&self, _access: Access, values: &[f32]) -> Result<BufferId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers().insert(id, values.to_vec());
        trace!("allocated buffer {} ({} values)", id, values.len());
        Ok(BufferId(id))
    }

    fn read_buffer(&self, buffer: BufferId, len: usize) -> Result<Vec<f32>> {
        let buffers = self.buffers();
        let values = Self::fetch(&buffers, buffer)?;
        if len > values.len() {
            return Err(BlasError::ReadOutOfBounds {
                requested: len,
                available: values.len(),
            });
        }
        Ok(values[..len].to_vec())
    }

    fn release(&self, buffer: BufferId) {
        if self.buffers().remove(&buffer.0).is_some() {
            trace!("released buffer {}", buffer.0);
        }
    }

    fn sgemm(
        &self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        a_transpose: bool,
        b_transpose: bool,
        m: usize,
        n: usize,
        k: usize,
        lda: usize,
        ldb: usize,
        ldc: usize,
    ) -> Result<()> {
        let mut buffers = self.buffers();

        // The raw operand extents follow from the transpose flags: op(A) is
        // m x k, so the raw A buffer is k x m when flagged and m x k otherwise.
        let a_required = required_len(if a_transpose { k } else { m }, lda);
        let b_required = required_len(if b_transpose { n } else { k }, ldb);
        let c_required = required_len(m, ldc);

        let a_values = Self::fetch(&buffers, a)?.clone();
        let b_values = Self::fetch(&buffers, b)?.clone();
        check_operand("a", a_required, a_values.len())?;
        check_operand("b", b_required, b_values.len())?;

        let c_values = buffers
            .get_mut(&c.0)
            .ok_or(BlasError::UnknownBuffer(c.0))?;
        check_operand("c", c_required, c_values.len())?;

        trace!(
            "sgemm m={} n={} k={} a_t={} b_t={}",
            m,
            n,
            k,
            a_transpose,
            b_transpose
        );

        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for l in 0..k {
                    let av = if a_transpose {
                        a_values[l * lda + i]
                    } else {
                        a_values[i * lda + l]
                    };
                    let bv = if b_transpose {
                        b_values[j * ldb + l]
                    } else {
                        b_values[l * ldb + j]
                    };
                    acc += av * bv;
                }
                c_values[i * ldc + j] += acc;
            }
        }

        Ok(())
    }
}

fn required_len(rows: usize, ld: usize) -> usize {
    rows * ld
}

fn check_operand(operand: &'static str, required: usize, available: usize) -> Result<()> {
    if available < required {
        return Err(BlasError::OperandTooSmall {
            operand,
            required,
            available,
        });
    }
    Ok(())
}
