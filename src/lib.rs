//! Patch-local finite element assembly for overlapping Schwarz-type solvers.
//!
//! The crate compiles variational forms into kernels that assemble a single patch of cells into
//! dense local buffers, translates boundary constraints into the dofs they fix across mixed
//! spaces, and decomposes a mesh into overlapping patches by directional sweeps. The
//! [`solver`] module hands all of it to an overlapping-block solver.
pub mod assembly;
pub mod dofs;
pub mod element;
pub mod error;
pub mod form;
pub mod form_compiler;
pub mod mesh;
pub mod options;
pub mod patch;
pub mod quadrature;
pub mod solver;
pub mod space;
pub mod topology;

pub(crate) mod workspace;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;

pub use error::PatchError;
