//! Compilation of forms into kernels that assemble a single patch into dense local buffers.
//!
//! Each compiled kernel wraps an element kernel in a per-entity loop generated for a set of
//! one representative entity. The output and the state are bound to dense targets, so the loop
//! addresses them through the caller's local index maps by loop position. Everything else
//! (coordinates, coefficients, local facet numbers) is read from the global data of the mesh
//! and the coefficients, captured once by [`CompiledKernel::bind`].
//!
//! Kernels are never cached. The parameter layout, in particular the position of the state,
//! depends on the state given at compile time.
use crate::assembly::builder::PatchKernelBuilder;
use crate::assembly::target::{DatTarget, DenseDat, DenseMat};
use crate::assembly::wrapper::{
    generate, Access, Destination, Frame, IterationSet, MapRef, Param, Wrapper, WrapperArg,
};
use crate::error::PatchError;
use crate::form::{Form, IntegralType, SubdomainId};
use crate::form_compiler::{
    facet_count, form_coefficient, sides, CoefficientStrategy, CompiledIntegral, FormCompiler, KernelInfo,
    QuadratureFormCompiler,
};
use crate::mesh::TriangleMesh;
use crate::space::{Coefficient, FunctionSpace, NodeLayout};
use log::debug;
use std::ops::Range;
use std::sync::Arc;

pub use crate::assembly::wrapper::{ArgData, KernelOutput};

/// Name under which patch forms are compiled.
pub const SUBSPACE_FORM_NAME: &str = "subspace_form";

/// What a wrapper parameter is filled with.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    RowMap,
    ColMap,
    Coordinates,
    CoordinateMap,
    Coefficient {
        coefficient: Coefficient,
        values: Range<usize>,
    },
    /// The node map of a leaf space.
    CoefficientMap {
        space: FunctionSpace,
    },
    State,
    StateMap,
    FacetNumbers,
}

impl ParamSource {
    /// Whether the parameter is supplied anew on every call.
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            ParamSource::RowMap | ParamSource::ColMap | ParamSource::State | ParamSource::StateMap
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FixedData {
    Scalars(Vec<f64>),
    Indices(Vec<i32>),
}

/// Argument data captured once for the lifetime of a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArguments {
    kernel: String,
    data: Vec<Option<FixedData>>,
}

/// The current iterate and its local index map.
#[derive(Debug, Copy, Clone)]
pub struct StateBuffers<'a> {
    pub values: &'a [f64],
    pub map: &'a [i32],
}

/// The data of a single kernel invocation.
#[derive(Debug)]
pub struct KernelCall<'a> {
    /// First loop position to process.
    pub start: usize,
    /// The entities to process: cells for cell kernels, interior facet numbers for facet kernels.
    pub entities: &'a [usize],
    pub output: KernelOutput<'a>,
    /// Local indices of the rows, one row of arity entries per loop position.
    pub row_map: &'a [i32],
    /// Local indices of the columns. Defaults to the row map.
    pub col_map: Option<&'a [i32]>,
    pub fixed: &'a BoundArguments,
    pub state: Option<StateBuffers<'a>>,
}

/// A kernel that computes the local contribution of a batch of entities.
#[derive(Debug)]
pub struct CompiledKernel {
    info: KernelInfo,
    mesh: Arc<TriangleMesh>,
    wrapper: Wrapper,
    params: Vec<ParamSource>,
    state_position: Option<usize>,
}

impl CompiledKernel {
    pub fn info(&self) -> &KernelInfo {
        &self.info
    }

    pub fn integral_type(&self) -> IntegralType {
        self.info.integral_type
    }

    /// Position of the state among the wrapper arguments, with the output at position 0 and
    /// the coordinates at position 1.
    pub fn state_position(&self) -> Option<usize> {
        self.state_position
    }

    pub fn params(&self) -> &[ParamSource] {
        &self.params
    }

    pub fn wrapper(&self) -> &Wrapper {
        &self.wrapper
    }

    /// Captures the data of all parameters that stay fixed between calls.
    pub fn bind(&self) -> eyre::Result<BoundArguments> {
        let facet_integral = self.integral_type() == IntegralType::InteriorFacet;
        let data = self
            .params
            .iter()
            .map(|source| -> eyre::Result<Option<FixedData>> {
                Ok(match source {
                    ParamSource::Coordinates => Some(FixedData::Scalars(self.mesh.coordinates())),
                    ParamSource::CoordinateMap if facet_integral => {
                        Some(FixedData::Indices(self.mesh.interior_facet_vertex_map()))
                    }
                    ParamSource::CoordinateMap => Some(FixedData::Indices(self.mesh.cell_vertex_map())),
                    ParamSource::Coefficient { coefficient, values } => {
                        let values = coefficient.values().get(values.clone()).ok_or_else(|| {
                            PatchError::invariant(format!("Value range out of bounds for {}", coefficient.name()))
                        })?;
                        Some(FixedData::Scalars(values.to_vec()))
                    }
                    ParamSource::CoefficientMap { space } => {
                        let layout = space
                            .layout()
                            .ok_or_else(|| PatchError::invariant(format!("Space {} has no node map", space)))?;
                        let map = if facet_integral {
                            layout.interior_facet_node_map()
                        } else {
                            layout.cell_node_map()
                        };
                        Some(FixedData::Indices(map.to_vec()))
                    }
                    ParamSource::FacetNumbers => Some(FixedData::Indices(self.mesh.interior_facet_local_numbers())),
                    ParamSource::RowMap | ParamSource::ColMap | ParamSource::State | ParamSource::StateMap => None,
                })
            })
            .collect::<eyre::Result<_>>()?;
        Ok(BoundArguments {
            kernel: self.info.name.clone(),
            data,
        })
    }

    /// Runs the kernel for the loop positions `call.start..call.entities.len()`.
    pub fn invoke(&self, call: KernelCall<'_>) -> eyre::Result<()> {
        let KernelCall {
            start,
            entities,
            output,
            row_map,
            col_map,
            fixed,
            state,
        } = call;
        if fixed.kernel != self.info.name || fixed.data.len() != self.params.len() {
            return Err(PatchError::invariant(format!(
                "Arguments bound for kernel {} passed to kernel {}",
                fixed.kernel, self.info.name
            )));
        }
        if self.state_position.is_some() && state.is_none() {
            return Err(PatchError::invariant(format!(
                "Kernel {} reads the state, but no state was supplied",
                self.info.name
            )));
        }

        let params = self
            .params
            .iter()
            .zip(&fixed.data)
            .map(|(source, fixed)| match (source, fixed, state) {
                (_, Some(FixedData::Scalars(values)), _) => Ok(ArgData::Scalars(values)),
                (_, Some(FixedData::Indices(indices)), _) => Ok(ArgData::Indices(indices)),
                (ParamSource::RowMap, None, _) => Ok(ArgData::Indices(row_map)),
                (ParamSource::ColMap, None, _) => Ok(ArgData::Indices(col_map.unwrap_or(row_map))),
                (ParamSource::State, None, Some(state)) => Ok(ArgData::Scalars(state.values)),
                (ParamSource::StateMap, None, Some(state)) => Ok(ArgData::Indices(state.map)),
                (source, None, _) => Err(PatchError::invariant(format!("Parameter {:?} has no data", source))),
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        self.wrapper.execute(Frame {
            start,
            entities,
            output,
            params: &params,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OutputKind {
    Matrix,
    Vector,
}

/// Compiles the cell and interior facet kernels of a bilinear form.
///
/// If a state is given, it is read through a per-call buffer and kept whole even on a mixed
/// space.
pub fn compile_matrix_kernel(
    form: &Form,
    state: Option<&Coefficient>,
) -> eyre::Result<(Vec<CompiledKernel>, Vec<CompiledKernel>)> {
    compile_matrix_kernel_with(&QuadratureFormCompiler, form, state)
}

pub fn compile_matrix_kernel_with(
    compiler: &dyn FormCompiler,
    form: &Form,
    state: Option<&Coefficient>,
) -> eyre::Result<(Vec<CompiledKernel>, Vec<CompiledKernel>)> {
    let (test, trial) = match form.arguments() {
        [test, trial] => (test, trial),
        arguments => {
            return Err(PatchError::configuration(format!(
                "Matrix kernels need a bilinear form, got {} arguments",
                arguments.len()
            )))
        }
    };
    if test.space() != trial.space() {
        return Err(PatchError::configuration(format!(
            "Test space {} and trial space {} must match",
            test.space(),
            trial.space()
        )));
    }

    let integrals = compile_integrals(compiler, form, state)?;
    for integral in &integrals {
        check_subdomain(&integral.info)?;
        if !matches!(
            integral.info.integral_type,
            IntegralType::Cell | IntegralType::InteriorFacet
        ) {
            return Err(PatchError::configuration(format!(
                "Only cell and interior facet integrals are supported, got {}",
                integral.info.integral_type
            )));
        }
    }

    let mut cell_kernels = Vec::new();
    let mut facet_kernels = Vec::new();
    for integral in integrals {
        let kernel = build_kernel(form, integral, state, OutputKind::Matrix)?;
        match kernel.integral_type() {
            IntegralType::InteriorFacet => facet_kernels.push(kernel),
            _ => cell_kernels.push(kernel),
        }
    }
    debug!(
        "Compiled {} cell and {} interior facet matrix kernels",
        cell_kernels.len(),
        facet_kernels.len()
    );
    Ok((cell_kernels, facet_kernels))
}

/// Compiles the cell kernel of a residual form that depends on `state`.
pub fn compile_residual_kernel(form: &Form, state: &Coefficient) -> eyre::Result<CompiledKernel> {
    compile_residual_kernel_with(&QuadratureFormCompiler, form, state)
}

pub fn compile_residual_kernel_with(
    compiler: &dyn FormCompiler,
    form: &Form,
    state: &Coefficient,
) -> eyre::Result<CompiledKernel> {
    let test = match form.arguments() {
        [test] => test,
        arguments => {
            return Err(PatchError::configuration(format!(
                "Residual kernels need a linear form, got {} arguments",
                arguments.len()
            )))
        }
    };
    if state.space() != test.space() {
        return Err(PatchError::configuration(format!(
            "State space {} and test space {} must be dual to one another",
            state.space(),
            test.space()
        )));
    }

    let integrals = compile_integrals(compiler, form, Some(state))?;
    for integral in &integrals {
        check_subdomain(&integral.info)?;
        if integral.info.integral_type != IntegralType::Cell {
            return Err(PatchError::configuration(format!(
                "Only cell integrals are supported for residuals, got {}",
                integral.info.integral_type
            )));
        }
    }
    if integrals.len() != 1 {
        return Err(PatchError::invariant(format!(
            "Residual form compiled into {} kernels, expected one",
            integrals.len()
        )));
    }
    let integral = integrals
        .into_iter()
        .next()
        .ok_or_else(|| PatchError::invariant("Residual form compiled into no kernels"))?;

    let kernel = build_kernel(form, integral, Some(state), OutputKind::Vector)?;
    if kernel.state_position().is_none() {
        return Err(PatchError::invariant(format!(
            "Residual kernel {} does not read the state {}",
            kernel.info().name,
            state.name()
        )));
    }
    Ok(kernel)
}

fn compile_integrals(
    compiler: &dyn FormCompiler,
    form: &Form,
    state: Option<&Coefficient>,
) -> eyre::Result<Vec<CompiledIntegral>> {
    match state {
        Some(state) => {
            let builder = PatchKernelBuilder::dont_split([state]);
            let strategy: &dyn CoefficientStrategy = &builder;
            compiler.compile(form, SUBSPACE_FORM_NAME, false, Some(strategy))
        }
        None => compiler.compile(form, SUBSPACE_FORM_NAME, false, None),
    }
}

fn check_subdomain(info: &KernelInfo) -> eyre::Result<()> {
    if info.subdomain_id != SubdomainId::Otherwise {
        return Err(PatchError::configuration(format!(
            "Only integrals over the whole domain are supported, got subdomain {} in {}",
            info.subdomain_id, info.name
        )));
    }
    Ok(())
}

fn build_kernel(
    form: &Form,
    integral: CompiledIntegral,
    state: Option<&Coefficient>,
    output: OutputKind,
) -> eyre::Result<CompiledKernel> {
    let CompiledIntegral { kernel, info } = integral;
    let test_space = form
        .arguments()
        .first()
        .map(|test| test.space())
        .ok_or_else(|| PatchError::invariant("Local assembly needs a test space"))?;
    let integral_type = info.integral_type;
    let sides = sides(integral_type);
    let arity = test_space.cell_arity() * sides;

    let mat = DenseMat::new(arity, arity);
    let dat = DenseDat::new();
    let dat_target: &dyn DatTarget = &dat;

    let mut params = Vec::new();
    let mut param = |source: ParamSource| {
        params.push(source);
        Param(params.len() - 1)
    };

    let row_map = MapRef::new(param(ParamSource::RowMap), arity);
    let mut args = Vec::new();
    match output {
        OutputKind::Matrix => args.push(WrapperArg::Mat {
            target: &mat,
            access: Access::Inc,
            rows: row_map,
            cols: MapRef::new(param(ParamSource::ColMap), arity),
        }),
        OutputKind::Vector => args.push(WrapperArg::Dat {
            target: Some(dat_target),
            access: Access::Inc,
            data: Destination::Output,
            map: Some(row_map),
            dim: 1,
        }),
    }
    args.push(WrapperArg::Dat {
        target: None,
        access: Access::Read,
        data: Destination::Param(param(ParamSource::Coordinates)),
        map: Some(MapRef::new(param(ParamSource::CoordinateMap), 3 * sides)),
        dim: 2,
    });

    let mut state_position = None;
    for &number in &info.coefficient_map {
        let coefficient = form_coefficient(form, number)?;
        if Some(coefficient) == state {
            state_position = Some(args.len());
            args.push(WrapperArg::Dat {
                target: Some(dat_target),
                access: Access::Read,
                data: Destination::Param(param(ParamSource::State)),
                map: Some(MapRef::new(param(ParamSource::StateMap), arity)),
                dim: 1,
            });
            continue;
        }
        for (space, values) in coefficient.split() {
            let nodes = space.layout().map(NodeLayout::nodes_per_cell).ok_or_else(|| {
                PatchError::invariant(format!("Subspace {} of {} is not a leaf", space, coefficient.name()))
            })?;
            let dim = space.block_size();
            let data = param(ParamSource::Coefficient {
                coefficient: coefficient.clone(),
                values,
            });
            let map = MapRef::new(param(ParamSource::CoefficientMap { space }), nodes * sides);
            args.push(WrapperArg::Dat {
                target: None,
                access: Access::Read,
                data: Destination::Param(data),
                map: Some(map),
                dim,
            });
        }
    }
    if facet_count(integral_type) > 0 {
        args.push(WrapperArg::FacetNumbers {
            data: param(ParamSource::FacetNumbers),
        });
    }

    let wrapper = generate(
        format!("wrap_{}", info.name),
        kernel,
        IterationSet::single(integral_type),
        &args,
    )?;
    debug!("Generated local assembly wrapper:\n{}", wrapper);

    Ok(CompiledKernel {
        info,
        mesh: Arc::clone(form.mesh()),
        wrapper,
        params,
        state_position,
    })
}
