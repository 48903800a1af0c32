//! Registration of patch kernels, patches and constrained dofs with an overlapping-block solver.
//!
//! The solver itself lives behind [`PatchSolverBackend`]. The adapters compile the local kernels
//! once, capture all fixed coefficient data and hand the backend callbacks that assemble a single
//! patch into dense local buffers.
use crate::assembly::kernel::{compile_matrix_kernel, compile_residual_kernel, BoundArguments, CompiledKernel};
use crate::assembly::{KernelCall, KernelOutput, LocalMatrix, LocalVector, StateBuffers};
use crate::dofs::{BoundaryDofs, DirichletConstraint};
use crate::error::PatchError;
use crate::form::Form;
use crate::mesh::TriangleMesh;
use crate::options::OptionsDatabase;
use crate::patch::{PatchCollection, PatchConstructionStrategy, StrategyRegistry};
use crate::space::{Coefficient, FunctionSpace};
use log::{debug, info};
use std::fmt::Debug;
use std::sync::Arc;

/// Appended to the prefix of an adapter to form the prefix of its backend.
pub const PATCH_PREFIX: &str = "patch_";

/// The data of one local assembly request.
#[derive(Debug, Copy, Clone)]
pub struct PatchRequest<'a> {
    /// The mesh point the patch was built around.
    pub point: usize,
    /// The current iterate, if the backend solves a nonlinear problem.
    pub state: Option<&'a [f64]>,
    /// Cell indices for cell callbacks, mesh points for interior facet callbacks.
    pub entities: &'a [usize],
    /// Local dof indices per entity, with constrained dofs negative.
    pub dofmap: &'a [i32],
    /// Local dof indices per entity including constrained dofs.
    pub dofmap_with_all: Option<&'a [i32]>,
}

/// Computes the local operator of a patch.
pub trait LocalOperator: Debug + Send + Sync {
    fn compute(&self, request: &PatchRequest<'_>, matrix: &mut LocalMatrix) -> eyre::Result<()>;
}

/// Computes the local residual of a patch.
pub trait LocalResidual: Debug + Send + Sync {
    fn compute(&self, request: &PatchRequest<'_>, output: &mut LocalVector) -> eyre::Result<()>;
}

fn state_buffers<'a>(kernel: &CompiledKernel, request: &PatchRequest<'a>) -> eyre::Result<Option<StateBuffers<'a>>> {
    if kernel.state_position().is_none() {
        return Ok(None);
    }
    match (request.state, request.dofmap_with_all) {
        (Some(values), Some(map)) => Ok(Some(StateBuffers { values, map })),
        (None, _) => Err(PatchError::invariant(format!(
            "Kernel {} reads the state, but the request at point {} carries none",
            kernel.info().name,
            request.point
        ))),
        (_, None) => Err(PatchError::invariant(format!(
            "Kernel {} reads the state, but the request at point {} has no complete dof map",
            kernel.info().name,
            request.point
        ))),
    }
}

/// Assembles the cell contributions to a patch operator.
#[derive(Debug)]
pub struct CellOperator {
    kernel: CompiledKernel,
    fixed: BoundArguments,
    finalize: bool,
}

impl CellOperator {
    pub fn new(kernel: CompiledKernel) -> eyre::Result<Self> {
        let fixed = kernel.bind()?;
        Ok(Self {
            kernel,
            fixed,
            finalize: false,
        })
    }

    /// Zeroes the matrix before and assembles it after the kernel runs.
    pub fn finalizing(mut self) -> Self {
        self.finalize = true;
        self
    }

    pub fn kernel(&self) -> &CompiledKernel {
        &self.kernel
    }
}

impl LocalOperator for CellOperator {
    fn compute(&self, request: &PatchRequest<'_>, matrix: &mut LocalMatrix) -> eyre::Result<()> {
        let state = state_buffers(&self.kernel, request)?;
        if self.finalize {
            matrix.zero_entries();
        }
        self.kernel.invoke(KernelCall {
            start: 0,
            entities: request.entities,
            output: KernelOutput::Matrix(matrix),
            row_map: request.dofmap,
            col_map: None,
            fixed: &self.fixed,
            state,
        })?;
        if self.finalize {
            matrix.assemble();
        }
        Ok(())
    }
}

/// Assembles the interior facet contributions to a patch operator.
///
/// The backend refers to facets by mesh point, the kernel by interior facet number. Facet
/// contributions always accumulate on top of the cell contributions already in the matrix.
#[derive(Debug)]
pub struct InteriorFacetOperator {
    kernel: CompiledKernel,
    fixed: BoundArguments,
    mesh: Arc<TriangleMesh>,
    finalize: bool,
}

impl InteriorFacetOperator {
    pub fn new(kernel: CompiledKernel, mesh: &Arc<TriangleMesh>) -> eyre::Result<Self> {
        let fixed = kernel.bind()?;
        Ok(Self {
            kernel,
            fixed,
            mesh: Arc::clone(mesh),
            finalize: false,
        })
    }

    /// Assembles the matrix after the kernel runs.
    pub fn finalizing(mut self) -> Self {
        self.finalize = true;
        self
    }

    pub fn kernel(&self) -> &CompiledKernel {
        &self.kernel
    }
}

impl LocalOperator for InteriorFacetOperator {
    fn compute(&self, request: &PatchRequest<'_>, matrix: &mut LocalMatrix) -> eyre::Result<()> {
        let facets = request
            .entities
            .iter()
            .map(|&point| {
                self.mesh.interior_facet_number(point).ok_or_else(|| {
                    PatchError::invariant(format!("Point {} is not an interior facet", point))
                })
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        let state = state_buffers(&self.kernel, request)?;
        self.kernel.invoke(KernelCall {
            start: 0,
            entities: &facets,
            output: KernelOutput::Matrix(matrix),
            row_map: request.dofmap,
            col_map: None,
            fixed: &self.fixed,
            state,
        })?;
        if self.finalize {
            matrix.assemble();
        }
        Ok(())
    }
}

/// Assembles the residual of a patch at the current iterate.
#[derive(Debug)]
pub struct CellResidual {
    kernel: CompiledKernel,
    fixed: BoundArguments,
}

impl CellResidual {
    pub fn new(kernel: CompiledKernel) -> eyre::Result<Self> {
        let fixed = kernel.bind()?;
        Ok(Self { kernel, fixed })
    }

    pub fn kernel(&self) -> &CompiledKernel {
        &self.kernel
    }
}

impl LocalResidual for CellResidual {
    fn compute(&self, request: &PatchRequest<'_>, output: &mut LocalVector) -> eyre::Result<()> {
        let state = state_buffers(&self.kernel, request)?;
        output.zero_entries();
        self.kernel.invoke(KernelCall {
            start: 0,
            entities: request.entities,
            output: KernelOutput::Vector(output.as_mut_slice()),
            row_map: request.dofmap,
            col_map: None,
            fixed: &self.fixed,
            state,
        })?;
        // Marks the vector final; the values are left as the kernel wrote them
        output.assemble();
        Ok(())
    }
}

/// How the discretisation of the operator space is laid out, one entry per subspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscretisationInfo {
    pub value_sizes: Vec<usize>,
    pub cell_node_lists: Vec<Vec<i32>>,
    /// Cumulative dof counts, starting at zero, one more entry than there are subspaces.
    pub offsets: Vec<usize>,
    pub constrained: BoundaryDofs,
}

impl DiscretisationInfo {
    pub fn new(space: &FunctionSpace, constrained: BoundaryDofs) -> eyre::Result<Self> {
        let subspaces = space.subspaces();
        let cell_node_lists = subspaces
            .iter()
            .map(|subspace| {
                subspace
                    .layout()
                    .map(|layout| layout.cell_node_map().to_vec())
                    .ok_or_else(|| PatchError::invariant(format!("Subspace {} has no node layout", subspace)))
            })
            .collect::<eyre::Result<_>>()?;
        let offsets = std::iter::once(0)
            .chain(subspaces.iter().scan(0, |total, subspace| {
                *total += subspace.dof_count();
                Some(*total)
            }))
            .collect();
        Ok(Self {
            value_sizes: subspaces.iter().map(FunctionSpace::value_size).collect(),
            cell_node_lists,
            offsets,
            constrained,
        })
    }
}

/// Builds the patches when the backend sets up.
#[derive(Debug, Clone)]
pub struct PatchConstruction {
    strategy: Arc<dyn PatchConstructionStrategy>,
    mesh: Arc<TriangleMesh>,
    options: OptionsDatabase,
    prefix: String,
}

impl PatchConstruction {
    pub fn construct(&self) -> eyre::Result<PatchCollection> {
        let options = self.options.with_prefix(&self.prefix);
        self.strategy.construct(self.mesh.as_ref(), &options)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Why a nonlinear patch solve stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConvergedReason {
    Iterating,
    ConvergedIterations,
    ConvergedResidual,
    Diverged,
}

/// Iteration control of the nonlinear patch solve.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NonlinearSettings {
    pub max_iterations: usize,
    pub skip_convergence_test: bool,
}

/// The overlapping-block solver that owns the patch loop.
pub trait PatchSolverBackend {
    fn set_options_prefix(&mut self, prefix: &str);

    fn set_topology(&mut self, mesh: Arc<TriangleMesh>);

    fn set_cell_numbering(&mut self, numbering: Vec<i32>);

    fn set_discretisation_info(&mut self, info: DiscretisationInfo);

    fn set_compute_operator(&mut self, operator: Arc<dyn LocalOperator>);

    fn set_compute_operator_interior_facets(&mut self, operator: Arc<dyn LocalOperator>);

    fn set_compute_function(&mut self, residual: Arc<dyn LocalResidual>);

    fn set_patch_construction(&mut self, construction: PatchConstruction);

    fn set_nonlinear_settings(&mut self, settings: NonlinearSettings);

    /// Builds the patches and local operators. Called again whenever the operators change.
    fn set_up(&mut self) -> eyre::Result<()>;

    fn apply(&mut self, x: &[f64], y: &mut [f64]) -> eyre::Result<()>;

    fn apply_transpose(&mut self, x: &[f64], y: &mut [f64]) -> eyre::Result<()>;

    /// Runs one nonlinear patch sweep, updating `x` in place.
    fn solve(&mut self, rhs: &[f64], x: &mut [f64]) -> eyre::Result<ConvergedReason>;
}

/// The discrete problem a patch solver works on.
#[derive(Debug, Clone)]
pub struct PatchProblem {
    /// The residual form, linear in the test function and depending on `state`.
    pub residual: Option<Form>,
    pub jacobian: Form,
    /// A separate form to assemble the preconditioner from.
    pub preconditioner: Option<Form>,
    pub state: Option<Coefficient>,
    pub constraints: Vec<DirichletConstraint>,
}

/// Where the operator to build patches for comes from.
#[derive(Debug, Clone)]
pub enum OperatorSource {
    /// The preconditioning form of the problem (or its Jacobian), with its constraints.
    Assembled,
    /// A matrix-free operator with its own constraints.
    MatrixFree {
        form: Form,
        row_constraints: Vec<DirichletConstraint>,
        col_constraints: Vec<DirichletConstraint>,
    },
}

impl OperatorSource {
    fn resolve<'a>(&'a self, problem: &'a PatchProblem) -> eyre::Result<(&'a Form, &'a [DirichletConstraint])> {
        match self {
            OperatorSource::Assembled => Ok((
                problem.preconditioner.as_ref().unwrap_or(&problem.jacobian),
                &problem.constraints,
            )),
            OperatorSource::MatrixFree {
                form,
                row_constraints,
                col_constraints,
            } => {
                if row_constraints != col_constraints {
                    return Err(PatchError::configuration("Row and column constraints must match"));
                }
                Ok((form, row_constraints))
            }
        }
    }
}

fn operator_space(form: &Form) -> eyre::Result<&FunctionSpace> {
    form.arguments()
        .first()
        .map(|test| test.space())
        .ok_or_else(|| PatchError::configuration("The operator form has no arguments"))
}

fn single_cell_kernel(kernels: Vec<CompiledKernel>) -> eyre::Result<CompiledKernel> {
    let count = kernels.len();
    let mut kernels = kernels.into_iter();
    match (kernels.next(), kernels.next()) {
        (Some(kernel), None) => Ok(kernel),
        _ => Err(PatchError::configuration(format!(
            "Patch operators need exactly one cell kernel, got {}",
            count
        ))),
    }
}

fn single_facet_kernel(kernels: Vec<CompiledKernel>) -> eyre::Result<Option<CompiledKernel>> {
    let count = kernels.len();
    let mut kernels = kernels.into_iter();
    match (kernels.next(), kernels.next()) {
        (kernel, None) => Ok(kernel),
        _ => Err(PatchError::configuration(format!(
            "Patch operators support at most one interior facet kernel, got {}",
            count
        ))),
    }
}

fn patch_construction(
    mesh: &Arc<TriangleMesh>,
    options: &OptionsDatabase,
    patch_prefix: &str,
    type_key: &str,
    registry: &StrategyRegistry,
) -> eyre::Result<PatchConstruction> {
    let view = options.with_prefix(patch_prefix);
    let strategy = registry.resolve(view.require(type_key)?)?;
    Ok(PatchConstruction {
        strategy,
        mesh: Arc::clone(mesh),
        options: options.clone(),
        prefix: patch_prefix.to_string(),
    })
}

fn register_operator<B: PatchSolverBackend>(
    backend: &mut B,
    form: &Form,
    state: Option<&Coefficient>,
    finalize: bool,
) -> eyre::Result<()> {
    let (cell_kernels, facet_kernels) = compile_matrix_kernel(form, state)?;
    let mut cell_operator = CellOperator::new(single_cell_kernel(cell_kernels)?)?;
    if finalize {
        cell_operator = cell_operator.finalizing();
    }
    backend.set_compute_operator(Arc::new(cell_operator));
    if let Some(kernel) = single_facet_kernel(facet_kernels)? {
        let mut facet_operator = InteriorFacetOperator::new(kernel, form.mesh())?;
        if finalize {
            facet_operator = facet_operator.finalizing();
        }
        backend.set_compute_operator_interior_facets(Arc::new(facet_operator));
    }
    Ok(())
}

fn register_discretisation<B: PatchSolverBackend>(
    backend: &mut B,
    form: &Form,
    constraints: &[DirichletConstraint],
) -> eyre::Result<()> {
    let space = operator_space(form)?;
    let constrained = BoundaryDofs::from_constraints(constraints);
    debug!(
        "{} constrained dofs including ghosts, {} owned",
        constrained.ghost.len(),
        constrained.global.len()
    );
    backend.set_topology(Arc::clone(form.mesh()));
    backend.set_cell_numbering(form.mesh().cell_numbering());
    backend.set_discretisation_info(DiscretisationInfo::new(space, constrained)?);
    Ok(())
}

/// A preconditioner applying local solves on overlapping patches.
#[derive(Debug)]
pub struct PatchPreconditioner<B> {
    backend: B,
    prefix: String,
}

impl<B: PatchSolverBackend> PatchPreconditioner<B> {
    /// Sets up the backend, reading options from the process-wide database.
    pub fn initialize(problem: &PatchProblem, source: &OperatorSource, prefix: &str, backend: B) -> eyre::Result<Self> {
        let options = OptionsDatabase::global().read().clone();
        Self::initialize_with(problem, source, prefix, &options, &StrategyRegistry::default(), backend)
    }

    pub fn initialize_with(
        problem: &PatchProblem,
        source: &OperatorSource,
        prefix: &str,
        options: &OptionsDatabase,
        registry: &StrategyRegistry,
        mut backend: B,
    ) -> eyre::Result<Self> {
        let (form, constraints) = source.resolve(problem)?;
        let patch_prefix = format!("{}{}", prefix, PATCH_PREFIX);
        backend.set_options_prefix(&patch_prefix);

        register_operator(&mut backend, form, None, false)?;
        register_discretisation(&mut backend, form, constraints)?;
        backend.set_patch_construction(patch_construction(
            form.mesh(),
            options,
            &patch_prefix,
            "pc_patch_construct_type",
            registry,
        )?);
        backend.set_up()?;
        info!("Set up patch preconditioner with prefix \"{}\"", patch_prefix);
        Ok(Self {
            backend,
            prefix: prefix.to_string(),
        })
    }

    pub fn update(&mut self) -> eyre::Result<()> {
        self.backend.set_up()
    }

    pub fn apply(&mut self, x: &[f64], y: &mut [f64]) -> eyre::Result<()> {
        self.backend.apply(x, y)
    }

    pub fn apply_transpose(&mut self, x: &[f64], y: &mut [f64]) -> eyre::Result<()> {
        self.backend.apply_transpose(x, y)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// The result of one nonlinear smoothing step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// The correction `x - y`, where `y` is the iterate after the patch sweep.
    pub update: Vec<f64>,
    pub reason: ConvergedReason,
}

/// A nonlinear smoother solving local nonlinear problems on overlapping patches.
#[derive(Debug)]
pub struct PatchNonlinearSmoother<B> {
    backend: B,
    prefix: String,
}

impl<B: PatchSolverBackend> PatchNonlinearSmoother<B> {
    pub fn initialize(problem: &PatchProblem, source: &OperatorSource, prefix: &str, backend: B) -> eyre::Result<Self> {
        let options = OptionsDatabase::global().read().clone();
        Self::initialize_with(problem, source, prefix, &options, &StrategyRegistry::default(), backend)
    }

    pub fn initialize_with(
        problem: &PatchProblem,
        source: &OperatorSource,
        prefix: &str,
        options: &OptionsDatabase,
        registry: &StrategyRegistry,
        mut backend: B,
    ) -> eyre::Result<Self> {
        let state = problem
            .state
            .as_ref()
            .ok_or_else(|| PatchError::configuration("Nonlinear patch smoothers need a state"))?;
        let residual = problem
            .residual
            .as_ref()
            .ok_or_else(|| PatchError::configuration("Nonlinear patch smoothers need a residual form"))?;
        let (form, constraints) = source.resolve(problem)?;
        let patch_prefix = format!("{}{}", prefix, PATCH_PREFIX);
        backend.set_options_prefix(&patch_prefix);

        register_operator(&mut backend, form, Some(state), true)?;
        backend.set_compute_function(Arc::new(CellResidual::new(compile_residual_kernel(residual, state)?)?));
        register_discretisation(&mut backend, form, constraints)?;
        backend.set_patch_construction(patch_construction(
            form.mesh(),
            options,
            &patch_prefix,
            "snes_patch_construct_type",
            registry,
        )?);
        backend.set_nonlinear_settings(NonlinearSettings {
            max_iterations: 1,
            skip_convergence_test: true,
        });
        backend.set_up()?;
        info!("Set up nonlinear patch smoother with prefix \"{}\"", patch_prefix);
        Ok(Self {
            backend,
            prefix: prefix.to_string(),
        })
    }

    pub fn update(&mut self) -> eyre::Result<()> {
        self.backend.set_up()
    }

    /// Runs one patch sweep from `x` and returns the correction.
    ///
    /// Without a right-hand side, the sweep solves against zero.
    pub fn step(&mut self, x: &[f64], rhs: Option<&[f64]>) -> eyre::Result<StepOutcome> {
        let zeros;
        let rhs = match rhs {
            Some(rhs) => rhs,
            None => {
                zeros = vec![0.0; x.len()];
                &zeros
            }
        };
        let mut y = x.to_vec();
        let reason = self.backend.solve(rhs, &mut y)?;
        let update = x.iter().zip(&y).map(|(x_i, y_i)| x_i - y_i).collect();
        Ok(StepOutcome { update, reason })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
