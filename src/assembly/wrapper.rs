//! Per-entity wrappers around element kernels.
//!
//! A [`Wrapper`] is a small straight-line program that is run once for every entity in a
//! batch: it gathers the entity's coordinate and coefficient data into scratch buffers, calls
//! the element kernel and moves the element tensor to its destination. The program is built by
//! [`generate`] from a list of [`WrapperArg`]s. Data that lives in ordinary global arrays is
//! gathered by the generator itself; arguments bound to a [`MatrixTarget`] or [`DatTarget`]
//! emit their own statements, which is how local dense assembly is plugged in.
use crate::assembly::buffers::{InsertMode, LocalMatrix};
use crate::assembly::target::{DatTarget, EmitContext, MatrixTarget};
use crate::error::PatchError;
use crate::form::IntegralType;
use crate::form_compiler::{facet_count, ElementKernel};
use crate::workspace::{with_thread_local_workspace, ThreadLocalWorkspace};
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
    Inc,
}

/// A per-call parameter of a wrapper, numbered in order of declaration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Param(pub usize);

/// Which loop variable selects the row of an index map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MapIndexing {
    /// The entity index `entities[n]`.
    Global,
    /// The loop position `n`.
    Local,
}

/// A reference to an index map passed as a parameter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MapRef {
    pub param: Param,
    pub arity: usize,
    pub indexing: MapIndexing,
    /// Whether only a single component of the map rows is addressed.
    pub vector_index: bool,
}

impl MapRef {
    pub fn new(param: Param, arity: usize) -> Self {
        Self {
            param,
            arity,
            indexing: MapIndexing::Global,
            vector_index: false,
        }
    }

    pub fn with_indexing(self, indexing: MapIndexing) -> Self {
        Self { indexing, ..self }
    }

    pub fn with_vector_index(self) -> Self {
        Self {
            vector_index: true,
            ..self
        }
    }
}

/// Where the data of a wrapper argument comes from or goes to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The output handle of the call.
    Output,
    Param(Param),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Zero {
        buffer: usize,
    },
    /// `buffer[k * dim + d] = data[map[row * arity + k] * dim + d]`, or the first `dim` values
    /// of `data` without a map.
    Gather {
        buffer: usize,
        data: Param,
        map: Option<MapRef>,
        dim: usize,
    },
    GatherFacetNumbers {
        buffer: usize,
        data: Param,
        count: usize,
    },
    Call {
        output: usize,
        inputs: Vec<usize>,
        facets: Option<usize>,
    },
    /// Inserts the row-major block `buffer` into the output matrix.
    AddTo {
        rows: MapRef,
        cols: MapRef,
        buffer: usize,
        mode: InsertMode,
    },
    /// Moves `buffer` into the output vector. A masked scatter skips negative map entries.
    Scatter {
        buffer: usize,
        map: MapRef,
        dim: usize,
        mode: InsertMode,
        masked: bool,
    },
}

/// The set of entities a wrapper is generated for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IterationSet {
    pub integral_type: IntegralType,
    pub size: usize,
    pub extruded: bool,
}

impl IterationSet {
    /// A set consisting of a single representative entity.
    pub fn single(integral_type: IntegralType) -> Self {
        Self {
            integral_type,
            size: 1,
            extruded: false,
        }
    }
}

pub enum WrapperArg<'a> {
    Mat {
        target: &'a dyn MatrixTarget,
        access: Access,
        rows: MapRef,
        cols: MapRef,
    },
    Dat {
        target: Option<&'a dyn DatTarget>,
        access: Access,
        data: Destination,
        map: Option<MapRef>,
        dim: usize,
    },
    FacetNumbers {
        data: Param,
    },
}

/// The output handle of a wrapper invocation.
#[derive(Debug)]
pub enum KernelOutput<'a> {
    Matrix(&'a mut LocalMatrix),
    Vector(&'a mut [f64]),
}

/// The data of a per-call parameter.
#[derive(Debug, Copy, Clone)]
pub enum ArgData<'a> {
    Scalars(&'a [f64]),
    Indices(&'a [i32]),
}

/// Everything a wrapper invocation reads and writes.
#[derive(Debug)]
pub struct Frame<'a> {
    pub start: usize,
    pub entities: &'a [usize],
    pub output: KernelOutput<'a>,
    pub params: &'a [ArgData<'a>],
}

#[derive(Debug, Default)]
struct WrapperScratch {
    real: Vec<Vec<f64>>,
    facets: Vec<Vec<usize>>,
}

#[derive(Debug)]
pub struct Wrapper {
    name: String,
    kernel: Arc<ElementKernel>,
    iteration: IterationSet,
    buffers: Vec<usize>,
    facet_buffers: Vec<usize>,
    body: Vec<Stmt>,
    scratch: ThreadLocalWorkspace,
}

/// Generates the wrapper for `kernel` over the given iteration set.
///
/// The kernel receives the output buffer, then the buffers of all read arguments in order,
/// then the local facet numbers if any.
pub fn generate(
    name: impl Into<String>,
    kernel: Arc<ElementKernel>,
    iteration: IterationSet,
    args: &[WrapperArg<'_>],
) -> eyre::Result<Wrapper> {
    let name = name.into();
    let context = EmitContext { iteration };
    let mut buffers = Vec::new();
    let mut facet_buffers = Vec::new();
    let mut prologue = Vec::new();
    let mut epilogue = Vec::new();
    let mut output = None;
    let mut inputs = Vec::new();
    let mut facets = None;

    let mut set_output = |buffer: usize| {
        if output.replace(buffer).is_some() {
            Err(PatchError::invariant(format!("Wrapper {} has more than one output", name)))
        } else {
            Ok(())
        }
    };

    for arg in args {
        match arg {
            WrapperArg::Mat {
                target,
                access,
                rows,
                cols,
            } => {
                let block = target.sparsity().block(0, 0);
                if block.dims() != (rows.arity, cols.arity) {
                    return Err(PatchError::invariant(format!(
                        "Sparsity block {:?} does not match map arities ({}, {})",
                        block.dims(),
                        rows.arity,
                        cols.arity
                    )));
                }
                let buffer = buffers.len();
                buffers.push(rows.arity * cols.arity);
                set_output(buffer)?;
                prologue.push(Stmt::Zero { buffer });
                epilogue.extend(target.emit_addto(&context, buffer, rows, cols, *access)?);
            }
            WrapperArg::Dat {
                target,
                access,
                data,
                map,
                dim,
            } => {
                if let Some(target) = target {
                    let cdim = target.dataset().cdim;
                    if *dim != cdim {
                        return Err(PatchError::invariant(format!(
                            "Data of dimension {} bound to a target of dimension {}",
                            dim, cdim
                        )));
                    }
                }
                let buffer = buffers.len();
                buffers.push(map.map_or(1, |m| m.arity) * dim);
                match (access, data) {
                    (Access::Read, Destination::Param(param)) => {
                        inputs.push(buffer);
                        let statements = match target {
                            Some(target) => target.emit_gather(&context, buffer, *param, map.as_ref(), *dim)?,
                            None => vec![Stmt::Gather {
                                buffer,
                                data: *param,
                                map: map.map(|m| m.with_indexing(MapIndexing::Global)),
                                dim: *dim,
                            }],
                        };
                        prologue.extend(statements);
                    }
                    (Access::Write | Access::Inc, Destination::Output) => {
                        set_output(buffer)?;
                        prologue.push(Stmt::Zero { buffer });
                        let statements = match (target, map) {
                            (Some(target), _) => target.emit_scatter(&context, buffer, map.as_ref(), *dim, *access)?,
                            (None, Some(map)) => vec![Stmt::Scatter {
                                buffer,
                                map: map.with_indexing(MapIndexing::Global),
                                dim: *dim,
                                mode: insert_mode(*access)?,
                                masked: false,
                            }],
                            (None, None) => {
                                return Err(PatchError::unimplemented("Global reductions are not supported"));
                            }
                        };
                        epilogue.extend(statements);
                    }
                    (access, data) => {
                        return Err(PatchError::invariant(format!(
                            "Unsupported access {:?} to {:?} in wrapper {}",
                            access, data, name
                        )));
                    }
                }
            }
            WrapperArg::FacetNumbers { data } => {
                let count = facet_count(iteration.integral_type);
                let buffer = facet_buffers.len();
                facet_buffers.push(count);
                prologue.push(Stmt::GatherFacetNumbers {
                    buffer,
                    data: *data,
                    count,
                });
                facets = Some(buffer);
            }
        }
    }

    if iteration.extruded {
        return Err(PatchError::unimplemented("Extruded iteration is not supported"));
    }
    let output = output.ok_or_else(|| PatchError::invariant(format!("Wrapper {} has no output", name)))?;
    check_kernel_signature(&kernel, &buffers, output, &inputs, facets.is_some())?;

    let mut body = prologue;
    body.push(Stmt::Call {
        output,
        inputs,
        facets,
    });
    body.extend(epilogue);

    Ok(Wrapper {
        name,
        kernel,
        iteration,
        buffers,
        facet_buffers,
        body,
        scratch: ThreadLocalWorkspace::new(),
    })
}

/// The insertion mode that realizes an output access.
pub fn insert_mode(access: Access) -> eyre::Result<InsertMode> {
    match access {
        Access::Write => Ok(InsertMode::Insert),
        Access::Inc => Ok(InsertMode::Add),
        Access::Read => Err(PatchError::invariant("Read-only arguments cannot be written")),
    }
}

fn check_kernel_signature(
    kernel: &ElementKernel,
    buffers: &[usize],
    output: usize,
    inputs: &[usize],
    has_facets: bool,
) -> eyre::Result<()> {
    if buffers[output] != kernel.output_len() {
        return Err(PatchError::invariant(format!(
            "Kernel {} writes {} values, but its output buffer holds {}",
            kernel.name(),
            kernel.output_len(),
            buffers[output]
        )));
    }
    let input_lengths: Vec<usize> = inputs.iter().map(|&b| buffers[b]).collect();
    if input_lengths != kernel.input_lengths() {
        return Err(PatchError::invariant(format!(
            "Kernel {} expects inputs of lengths {:?}, but the wrapper provides {:?}",
            kernel.name(),
            kernel.input_lengths(),
            input_lengths
        )));
    }
    if has_facets != (facet_count(kernel.integral_type()) > 0) {
        return Err(PatchError::invariant(format!(
            "Local facet numbers do not match the {} integral of kernel {}",
            kernel.integral_type(),
            kernel.name()
        )));
    }
    Ok(())
}

impl Wrapper {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> &Arc<ElementKernel> {
        &self.kernel
    }

    pub fn iteration(&self) -> &IterationSet {
        &self.iteration
    }

    pub fn body(&self) -> &[Stmt] {
        &self.body
    }

    /// Runs the wrapper for the loop positions `start..entities.len()`.
    pub fn execute(&self, frame: Frame<'_>) -> eyre::Result<()> {
        let Frame {
            start,
            entities,
            mut output,
            params,
        } = frame;
        trace!(
            "Running {} on {} entities",
            self.name,
            entities.len().saturating_sub(start)
        );
        with_thread_local_workspace(&self.scratch, |scratch: &mut WrapperScratch| -> eyre::Result<()> {
            scratch.real.resize_with(self.buffers.len(), Vec::new);
            for (buffer, &len) in scratch.real.iter_mut().zip(&self.buffers) {
                buffer.resize(len, 0.0);
            }
            scratch.facets.resize_with(self.facet_buffers.len(), Vec::new);
            for (buffer, &len) in scratch.facets.iter_mut().zip(&self.facet_buffers) {
                buffer.resize(len, 0);
            }

            for n in start..entities.len() {
                let entity = entities[n];
                for stmt in &self.body {
                    self.execute_stmt(stmt, n, entity, scratch, &mut output, params)?;
                }
            }
            Ok(())
        })
    }

    fn execute_stmt(
        &self,
        stmt: &Stmt,
        n: usize,
        entity: usize,
        scratch: &mut WrapperScratch,
        output: &mut KernelOutput<'_>,
        params: &[ArgData<'_>],
    ) -> eyre::Result<()> {
        match stmt {
            Stmt::Zero { buffer } => scratch.real[*buffer].fill(0.0),
            Stmt::Gather { buffer, data, map, dim } => {
                let data = scalars(params, *data)?;
                let buffer = &mut scratch.real[*buffer];
                match map {
                    Some(map) => {
                        for (k, &index) in map_row(params, map, n, entity)?.iter().enumerate() {
                            for d in 0..*dim {
                                buffer[k * dim + d] = if index < 0 {
                                    0.0
                                } else {
                                    *data.get(index as usize * dim + d).ok_or_else(|| {
                                        PatchError::invariant(format!("Map entry {} is out of bounds for data", index))
                                    })?
                                };
                            }
                        }
                    }
                    None => {
                        let values = data
                            .get(..*dim)
                            .ok_or_else(|| PatchError::invariant("Global data is too short"))?;
                        buffer.copy_from_slice(values);
                    }
                }
            }
            Stmt::GatherFacetNumbers { buffer, data, count } => {
                let numbers = indices(params, *data)?
                    .get(entity * count..(entity + 1) * count)
                    .ok_or_else(|| PatchError::invariant(format!("No local facet numbers for facet {}", entity)))?;
                for (target, &number) in scratch.facets[*buffer].iter_mut().zip(numbers) {
                    *target = usize::try_from(number)
                        .map_err(|_| PatchError::invariant(format!("Invalid local facet number {}", number)))?;
                }
            }
            Stmt::Call {
                output: out,
                inputs,
                facets,
            } => {
                let mut element_tensor = std::mem::take(&mut scratch.real[*out]);
                let input_data: Vec<&[f64]> = inputs.iter().map(|&b| scratch.real[b].as_slice()).collect();
                let facet_numbers = facets.map(|f| scratch.facets[f].as_slice()).unwrap_or(&[]);
                let result = self
                    .kernel
                    .tabulate(&mut element_tensor, &input_data, facet_numbers);
                scratch.real[*out] = element_tensor;
                result?;
            }
            Stmt::AddTo {
                rows,
                cols,
                buffer,
                mode,
            } => {
                let matrix = match output {
                    KernelOutput::Matrix(matrix) => matrix,
                    KernelOutput::Vector(_) => {
                        return Err(PatchError::invariant(format!(
                            "Wrapper {} assembles a matrix, but was given a vector",
                            self.name
                        )))
                    }
                };
                let row_indices = map_row(params, rows, n, entity)?;
                let col_indices = map_row(params, cols, n, entity)?;
                matrix.set_values(row_indices, col_indices, &scratch.real[*buffer], *mode)?;
            }
            Stmt::Scatter {
                buffer,
                map,
                dim,
                mode,
                masked,
            } => {
                let vector = match output {
                    KernelOutput::Vector(vector) => vector,
                    KernelOutput::Matrix(_) => {
                        return Err(PatchError::invariant(format!(
                            "Wrapper {} assembles a vector, but was given a matrix",
                            self.name
                        )))
                    }
                };
                let values = &scratch.real[*buffer];
                for (k, &index) in map_row(params, map, n, entity)?.iter().enumerate() {
                    if index < 0 {
                        if *masked {
                            continue;
                        }
                        return Err(PatchError::invariant(format!("Negative map entry {} in unmasked scatter", index)));
                    }
                    for d in 0..*dim {
                        let entry = vector.get_mut(index as usize * dim + d).ok_or_else(|| {
                            PatchError::invariant(format!("Map entry {} is out of bounds for the output", index))
                        })?;
                        match mode {
                            InsertMode::Insert => *entry = values[k * dim + d],
                            InsertMode::Add => *entry += values[k * dim + d],
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn scalars<'a>(params: &[ArgData<'a>], param: Param) -> eyre::Result<&'a [f64]> {
    match params.get(param.0) {
        Some(ArgData::Scalars(data)) => Ok(data),
        _ => Err(PatchError::invariant(format!("Parameter {} must be scalar data", param.0))),
    }
}

fn indices<'a>(params: &[ArgData<'a>], param: Param) -> eyre::Result<&'a [i32]> {
    match params.get(param.0) {
        Some(ArgData::Indices(data)) => Ok(data),
        _ => Err(PatchError::invariant(format!("Parameter {} must be an index map", param.0))),
    }
}

fn map_row<'a>(params: &[ArgData<'a>], map: &MapRef, n: usize, entity: usize) -> eyre::Result<&'a [i32]> {
    let row = match map.indexing {
        MapIndexing::Global => entity,
        MapIndexing::Local => n,
    };
    indices(params, map.param)?
        .get(row * map.arity..(row + 1) * map.arity)
        .ok_or_else(|| {
            PatchError::invariant(format!(
                "Index map parameter {} has no row {} of arity {}",
                map.param.0, row, map.arity
            ))
        })
}

impl fmt::Display for MapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = match self.indexing {
            MapIndexing::Global => "i",
            MapIndexing::Local => "n",
        };
        write!(f, "p{}[{} * {} + k]", self.param.0, row, self.arity)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Zero { buffer } => write!(f, "zero(t{});", buffer),
            Stmt::Gather {
                buffer,
                data,
                map: Some(map),
                dim,
            } => write!(f, "t{}[k * {} + d] = p{}[{} * {} + d];", buffer, dim, data.0, map, dim),
            Stmt::Gather {
                buffer, data, map: None, ..
            } => write!(f, "t{}[d] = p{}[d];", buffer, data.0),
            Stmt::GatherFacetNumbers { buffer, data, count } => {
                write!(f, "f{}[k] = p{}[i * {} + k];", buffer, data.0, count)
            }
            Stmt::Call {
                output,
                inputs,
                facets,
            } => {
                write!(f, "kernel(t{}", output)?;
                for input in inputs {
                    write!(f, ", t{}", input)?;
                }
                if let Some(facets) = facets {
                    write!(f, ", f{}", facets)?;
                }
                write!(f, ");")
            }
            Stmt::AddTo {
                rows,
                cols,
                buffer,
                mode,
            } => write!(
                f,
                "MatSetValues(out, {}, &{}, {}, &{}, t{}, {:?});",
                rows.arity, rows, cols.arity, cols, buffer, mode
            ),
            Stmt::Scatter {
                buffer,
                map,
                dim,
                mode,
                masked,
            } => {
                let op = match mode {
                    InsertMode::Insert => "=",
                    InsertMode::Add => "+=",
                };
                if *masked {
                    write!(f, "if ({} >= 0) ", map)?;
                }
                write!(f, "out[{} * {} + d] {} t{}[k * {} + d];", map, dim, op, buffer, dim)
            }
        }
    }
}

impl fmt::Display for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// {}", self.kernel)?;
        writeln!(f, "void {}(int start, int end, const int *entities, ...) {{", self.name)?;
        for (b, len) in self.buffers.iter().enumerate() {
            writeln!(f, "  double t{}[{}];", b, len)?;
        }
        for (b, len) in self.facet_buffers.iter().enumerate() {
            writeln!(f, "  int f{}[{}];", b, len)?;
        }
        writeln!(f, "  for (int n = start; n < end; ++n) {{")?;
        writeln!(f, "    int i = entities[n];")?;
        for stmt in &self.body {
            writeln!(f, "    {}", stmt)?;
        }
        writeln!(f, "  }}")?;
        write!(f, "}}")
    }
}
