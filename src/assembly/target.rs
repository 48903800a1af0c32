//! Destinations of wrapper arguments that emit their own statements.
//!
//! The dense targets make a wrapper believe it assembles into a global structure over a set of
//! a single virtual entity, while it actually writes into the caller's local buffer: maps are
//! addressed by loop position instead of entity index, and no local-to-global translation
//! takes place.
use crate::assembly::wrapper::{insert_mode, Access, IterationSet, MapIndexing, MapRef, Param, Stmt};
use crate::error::PatchError;
use crate::form::IntegralType;

/// What a target needs to know about the wrapper it emits statements for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EmitContext {
    pub iteration: IterationSet,
}

/// The sparsity of a matrix consisting of one dense block.
///
/// Every block query yields the same block, whatever the indices.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DenseSparsity {
    nrows: usize,
    ncols: usize,
}

impl DenseSparsity {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self { nrows, ncols }
    }

    /// Number of blocks in each direction.
    pub fn shape(&self) -> (usize, usize) {
        (1, 1)
    }

    pub fn block(&self, _i: usize, _j: usize) -> DenseSparsity {
        *self
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }
}

/// A set of one virtual entity carrying a single value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VirtualDofSet {
    pub size: usize,
    pub cdim: usize,
}

impl Default for VirtualDofSet {
    fn default() -> Self {
        Self { size: 1, cdim: 1 }
    }
}

pub trait MatrixTarget {
    fn sparsity(&self) -> DenseSparsity;

    /// Emits the statements that move the element tensor in `buffer` into the matrix.
    fn emit_addto(
        &self,
        context: &EmitContext,
        buffer: usize,
        rows: &MapRef,
        cols: &MapRef,
        access: Access,
    ) -> eyre::Result<Vec<Stmt>>;
}

pub trait DatTarget {
    fn dataset(&self) -> VirtualDofSet;

    /// Emits the statements that read the entity's data into `buffer`.
    fn emit_gather(
        &self,
        context: &EmitContext,
        buffer: usize,
        data: Param,
        map: Option<&MapRef>,
        dim: usize,
    ) -> eyre::Result<Vec<Stmt>>;

    /// Emits the statements that write the element vector in `buffer` to the output.
    fn emit_scatter(
        &self,
        context: &EmitContext,
        buffer: usize,
        map: Option<&MapRef>,
        dim: usize,
        access: Access,
    ) -> eyre::Result<Vec<Stmt>>;
}

fn check_supported(context: &EmitContext, maps: &[&MapRef]) -> eyre::Result<()> {
    let iteration = &context.iteration;
    if iteration.extruded {
        if iteration.integral_type == IntegralType::InteriorFacet {
            return Err(PatchError::unimplemented(
                "Local assembly of interior facet integrals on extruded meshes",
            ));
        }
        return Err(PatchError::unimplemented("Local assembly on extruded meshes"));
    }
    if maps.iter().any(|map| map.vector_index) {
        return Err(PatchError::unimplemented("Local assembly with vector-indexed maps"));
    }
    Ok(())
}

/// A dense local matrix, written through the caller's matrix handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DenseMat {
    sparsity: DenseSparsity,
}

impl DenseMat {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            sparsity: DenseSparsity::new(nrows, ncols),
        }
    }
}

impl MatrixTarget for DenseMat {
    fn sparsity(&self) -> DenseSparsity {
        self.sparsity
    }

    fn emit_addto(
        &self,
        context: &EmitContext,
        buffer: usize,
        rows: &MapRef,
        cols: &MapRef,
        access: Access,
    ) -> eyre::Result<Vec<Stmt>> {
        check_supported(context, &[rows, cols])?;
        Ok(vec![Stmt::AddTo {
            rows: rows.with_indexing(MapIndexing::Local),
            cols: cols.with_indexing(MapIndexing::Local),
            buffer,
            mode: insert_mode(access)?,
        }])
    }
}

/// A dense local vector, read from or written to the caller's buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DenseDat {
    dataset: VirtualDofSet,
}

impl DenseDat {
    pub fn new() -> Self {
        Self::default()
    }

    fn local_map(map: Option<&MapRef>) -> eyre::Result<MapRef> {
        map.map(|m| m.with_indexing(MapIndexing::Local))
            .ok_or_else(|| PatchError::invariant("Local data must be accessed through a map"))
    }
}

impl DatTarget for DenseDat {
    fn dataset(&self) -> VirtualDofSet {
        self.dataset
    }

    fn emit_gather(
        &self,
        context: &EmitContext,
        buffer: usize,
        data: Param,
        map: Option<&MapRef>,
        dim: usize,
    ) -> eyre::Result<Vec<Stmt>> {
        check_supported(context, &map.into_iter().collect::<Vec<_>>())?;
        Ok(vec![Stmt::Gather {
            buffer,
            data,
            map: Some(Self::local_map(map)?),
            dim,
        }])
    }

    fn emit_scatter(
        &self,
        context: &EmitContext,
        buffer: usize,
        map: Option<&MapRef>,
        dim: usize,
        access: Access,
    ) -> eyre::Result<Vec<Stmt>> {
        check_supported(context, &map.into_iter().collect::<Vec<_>>())?;
        Ok(vec![Stmt::Scatter {
            buffer,
            map: Self::local_map(map)?,
            dim,
            mode: insert_mode(access)?,
            masked: true,
        }])
    }
}
