//! OpenCL execution of the elementwise stages of a denoiser forward pass.
use ndarray::*;
use ocl::builders::KernelBuilder;
use ocl::{Buffer, Program, Queue};
use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GpuError>;

/// Various errors that can occur when working with an OpenCL backend
#[derive(Debug, Error)]
pub enum GpuError {
    #[error(transparent)]
    Ocl(WrappedOclError),
    #[error("ndarray memory layout not contiguous")]
    NotContiguousMemory,
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl From<ocl::Error> for GpuError {
    fn from(err: ocl::Error) -> Self {
        GpuError::Ocl(WrappedOclError(err))
    }
}

#[derive(Debug)]
pub struct WrappedOclError(pub ocl::Error);

impl std::error::Error for WrappedOclError {}

impl fmt::Display for WrappedOclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! impl_kernels {
    (unary[$($(#[$unopmeta:meta])* $unop:ident, $unopname:literal, $unopcode:literal);*],
    binary[$($(#[$binopmeta:meta])* $binop:ident, $binopname:literal, $binopcode:literal);*]
    ) => {
        pub static PROGRAM: &'static str = concat!(
            $(
             concat!("__kernel void ", $unopname, "(__global const float *src, __global float *res) {
                 int const idx = get_global_id(0);
                 float a = src[idx];
                 res[idx] = ",
                $unopcode,
                ";\n}\n",
             ),
            )*
            $(
             concat!("__kernel void ", $binopname, "(__global const float *a_g, __global const float *b_g, __global float *res) {
                 int const idx = get_global_id(0);
                 float a = a_g[idx];
                 float b = b_g[idx];
                 res[idx] = ",
                $binopcode,
                ";\n}\n",
             ),
            )*
        );

        /// Returns a [`ocl::ProQue`] with `PROGRAM` as source
        pub fn program() -> ocl::Result<ocl::ProQue> {
            ocl::ProQue::builder().src(PROGRAM).build()
        }

        /// Kernel unary operations
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum UnaryOps {
            $(
                $(#[$unopmeta])*
                $unop,
            )*
        }

        impl AsRef<str> for UnaryOps {
            fn as_ref(&self) -> &str {
                match self {
                    $(
                        UnaryOps::$unop => $unopname,
                    )*
                }
            }
        }

        impl From<UnaryOps> for String {
            fn from(ops: UnaryOps) -> String {
                ops.as_ref().to_string()
            }
        }

        /// Kernel binary operations
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum BinaryOps {
            $(
                $(#[$binopmeta])*
                $binop,
            )*
        }

        impl AsRef<str> for BinaryOps {
            fn as_ref(&self) -> &str {
                match self {
                    $(
                        BinaryOps::$binop => $binopname,
                    )*
                }
            }
        }

        impl From<BinaryOps> for String {
            fn from(ops: BinaryOps) -> String {
                ops.as_ref().to_string()
            }
        }
    };
}

// `unary` kernels map every element of one array, `binary` kernels combine two
// arrays of identical shape element by element
impl_kernels!(
    unary[
        /// Returns a new array with same dimensions as `a` and
        /// `res[idx] = max(a[idx], 0)`
        ReLu, "relu_", "max(a, (float)0.)"
    ],
    binary[
        /// Returns a new array with `a + b` values, the residual connection
        Add, "add_", "a + b"
    ]
);

/// Holds OpenCL objects required when executing kernel functions
#[derive(Debug, Clone)]
pub struct OpenCLKernelCtx {
    /// the opencl program that contains the kernel code
    pub prg: Program,
    /// The queue used for enqueuing a command
    pub queue: Queue,
}

impl OpenCLKernelCtx {
    /// Builds `PROGRAM` for the default platform and device.
    pub fn new() -> Result<Self> {
        let pro_que = program()?;
        Ok(Self {
            prg: pro_que.program().clone(),
            queue: pro_que.queue().clone(),
        })
    }

    /// Execute a known unary kernel function
    pub fn unary_op<D: Dimension>(
        &self,
        a: &Array<f32, D>,
        ops: UnaryOps,
    ) -> Result<Array<f32, D>> {
        unary_op_ocl(ops, a, &self.prg, self.queue.clone())
    }

    /// Execute a known binary kernel function
    pub fn binary_op<D: Dimension>(
        &self,
        a: &Array<f32, D>,
        b: &Array<f32, D>,
        ops: BinaryOps,
    ) -> Result<Array<f32, D>> {
        binary_op_ocl(ops, a, b, &self.prg, self.queue.clone())
    }
}

/// Executes a known binary operation with OpenCL on arrays of identical shape
fn binary_op_ocl<D: Dimension>(
    ops: BinaryOps,
    a: &Array<f32, D>,
    b: &Array<f32, D>,
    prg: &Program,
    queue: Queue,
) -> Result<Array<f32, D>> {
    if a.shape() != b.shape() {
        return Err(ShapeError::from_kind(ndarray::ErrorKind::IncompatibleShape).into());
    }
    let len = a.len();
    let a_buf = host_slice_buf(a, queue.clone(), len)?;
    let b_buf = host_slice_buf(b, queue.clone(), len)?;

    let res_buf = Buffer::<f32>::builder()
        .queue(queue.clone())
        .len(len)
        .build()?;

    let kernel = KernelBuilder::new()
        .name(ops)
        .program(prg)
        .queue(queue)
        .global_work_size(len)
        .arg(&a_buf)
        .arg(&b_buf)
        .arg(&res_buf)
        .build()?;

    unsafe {
        kernel.enq()?;
    }
    let mut res = vec![0.; len];
    res_buf.read(&mut res).enq()?;

    Ok(Array::from_shape_vec(a.raw_dim(), res)?)
}

/// Executes a known unary operation with OpenCL on every element in the ndarray
/// `a`
fn unary_op_ocl<D: Dimension>(
    ops: UnaryOps,
    a: &Array<f32, D>,
    prg: &Program,
    queue: Queue,
) -> Result<Array<f32, D>> {
    let len = a.len();
    let src_buf = host_slice_buf(a, queue.clone(), len)?;

    let res_buf = Buffer::<f32>::builder()
        .queue(queue.clone())
        .len(len)
        .build()?;

    let kernel = KernelBuilder::new()
        .name(ops)
        .program(prg)
        .queue(queue)
        .global_work_size(len)
        .arg(&src_buf)
        .arg(&res_buf)
        .build()?;

    unsafe {
        kernel.enq()?;
    }

    let mut res = vec![0.; len];
    res_buf.read(&mut res).enq()?;

    Ok(Array::from_shape_vec(a.raw_dim(), res)?)
}

/// Creates a new OpenCL buffer that borrows array `a`'s memory
///
/// ### Safety
///
/// See [`Buffer::use_host_slice`], a must outlive the created buffer.
/// Only standard layout is accepted so that results come back in logical order.
fn host_slice_buf<D: Dimension>(
    a: &Array<f32, D>,
    queue: Queue,
    len: usize,
) -> Result<Buffer<f32>> {
    let mut buf = Buffer::<f32>::builder().queue(queue).len(len);

    buf = unsafe { buf.use_host_slice(a.as_slice().ok_or(GpuError::NotContiguousMemory)?) };
    Ok(buf.build()?)
}
