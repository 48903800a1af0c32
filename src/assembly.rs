//! Local assembly of patch operators and residuals.
pub mod buffers;
pub mod builder;
pub mod kernel;
pub mod target;
pub mod wrapper;

pub use buffers::{InsertMode, LocalMatrix, LocalVector};
pub use builder::PatchKernelBuilder;
pub use kernel::{
    compile_matrix_kernel, compile_matrix_kernel_with, compile_residual_kernel, compile_residual_kernel_with,
    BoundArguments, CompiledKernel, KernelCall, StateBuffers,
};
pub use wrapper::{ArgData, KernelOutput};
