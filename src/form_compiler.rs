//! Compilation of symbolic forms into element kernels.
//!
//! [`FormCompiler`] is the boundary the patch assembly drives. It turns every group of integrals
//! sharing an integral type and subdomain into an [`ElementKernel`], a routine that tabulates
//! the local element tensor from gathered coordinate and coefficient data. How coefficients are
//! presented to the kernel (split into their subspaces or kept whole) is decided by a
//! pluggable [`CoefficientStrategy`].
//!
//! Local numbering of an argument or coefficient on an element is block-wise: the blocks of a
//! mixed space are concatenated, and within a block the values are node-major with interleaved
//! vector components. For interior facets every block holds the values of the `+` cell followed
//! by those of the `-` cell.
use crate::element::{reference_facet_point, AffineTriangle, LagrangeTriangle};
use crate::error::PatchError;
use crate::form::{Expr, Form, IntegralType, Operand, SubdomainId, Terminal};
use crate::quadrature;
use crate::space::{Coefficient, FunctionSpace, ValueShape};
use itertools::Itertools;
use nalgebra::{Matrix2, Point2, Vector2};
use std::fmt;
use std::sync::Arc;

/// A coefficient as it appears in the argument list of an element kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelCoefficient {
    pub name: String,
    pub coefficient: Coefficient,
    /// Position of the coefficient in the coefficients of the form.
    pub number: usize,
    /// The subspace this argument stands in for, or `None` if the whole coefficient is passed.
    pub sub: Option<usize>,
    /// The space of the data passed for this argument.
    pub space: FunctionSpace,
}

impl KernelCoefficient {
    pub fn is_whole(&self) -> bool {
        self.sub.is_none()
    }
}

/// Decides how the coefficients of a form are laid out as kernel arguments.
pub trait CoefficientStrategy {
    /// Lays out the coefficients with the given numbers, which are sorted and distinct.
    fn set_coefficients(&self, form: &Form, enabled: &[usize]) -> eyre::Result<Vec<KernelCoefficient>>;
}

/// Splits every coefficient on a mixed space into one argument per subspace.
#[derive(Debug, Copy, Clone, Default)]
pub struct SplitCoefficients;

impl CoefficientStrategy for SplitCoefficients {
    fn set_coefficients(&self, form: &Form, enabled: &[usize]) -> eyre::Result<Vec<KernelCoefficient>> {
        let mut arguments = Vec::new();
        for &number in enabled {
            let coefficient = form_coefficient(form, number)?;
            if coefficient.space().is_mixed() {
                for (sub, space) in coefficient.space().subspaces().into_iter().enumerate() {
                    arguments.push(KernelCoefficient {
                        name: format!("w_{}", arguments.len()),
                        coefficient: coefficient.clone(),
                        number,
                        sub: Some(sub),
                        space,
                    });
                }
            } else {
                arguments.push(KernelCoefficient {
                    name: format!("w_{}", arguments.len()),
                    coefficient: coefficient.clone(),
                    number,
                    sub: None,
                    space: coefficient.space().clone(),
                });
            }
        }
        Ok(arguments)
    }
}

/// Looks up a coefficient of a form by its number.
pub fn form_coefficient(form: &Form, number: usize) -> eyre::Result<&Coefficient> {
    form.coefficients().get(number).ok_or_else(|| {
        PatchError::invariant(format!(
            "Coefficient number {} out of range for form with {} coefficients",
            number,
            form.coefficients().len()
        ))
    })
}

/// Metadata of a compiled integral.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelInfo {
    pub name: String,
    pub integral_type: IntegralType,
    pub subdomain_id: SubdomainId,
    /// Numbers of the form coefficients the kernel reads, in ascending order.
    pub coefficient_map: Vec<usize>,
    pub domain_number: usize,
}

#[derive(Debug, Clone)]
pub struct CompiledIntegral {
    pub kernel: Arc<ElementKernel>,
    pub info: KernelInfo,
}

pub trait FormCompiler {
    /// Compiles every integral group of `form`.
    ///
    /// With `split` set, the form itself would be split into blocks of its mixed arguments.
    /// `strategy` lays out the coefficients; `None` selects the compiler's default.
    fn compile(
        &self,
        form: &Form,
        name: &str,
        split: bool,
        strategy: Option<&dyn CoefficientStrategy>,
    ) -> eyre::Result<Vec<CompiledIntegral>>;
}

/// Compiles forms into kernels that integrate by a fixed quadrature rule.
///
/// The triangle rule is exact for polynomials of degree 5 and the facet rule for degree 5,
/// which covers products of up to two `P2` functions with an affine coefficient.
#[derive(Debug, Copy, Clone, Default)]
pub struct QuadratureFormCompiler;

impl FormCompiler for QuadratureFormCompiler {
    fn compile(
        &self,
        form: &Form,
        name: &str,
        split: bool,
        strategy: Option<&dyn CoefficientStrategy>,
    ) -> eyre::Result<Vec<CompiledIntegral>> {
        if split {
            return Err(PatchError::unimplemented("Splitting forms into blocks is not supported"));
        }
        let strategy = strategy.unwrap_or(&SplitCoefficients);

        let mut groups: Vec<((IntegralType, SubdomainId), Vec<&Expr>)> = Vec::new();
        for integral in form.integrals() {
            let key = (integral.integral_type, integral.subdomain_id);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, integrands)) => integrands.push(&integral.integrand),
                None => groups.push((key, vec![&integral.integrand])),
            }
        }

        groups
            .into_iter()
            .enumerate()
            .map(|(index, ((integral_type, subdomain_id), integrands))| -> eyre::Result<CompiledIntegral> {
                let integrand = integrands
                    .into_iter()
                    .cloned()
                    .reduce(|a, b| a + b)
                    .ok_or_else(|| PatchError::invariant("Integral group without integrands"))?;

                let mut coefficient_map = Vec::new();
                integrand.visit_terminals(&mut |terminal| {
                    if let Operand::Coefficient(c) = &terminal.operand {
                        if let Some(number) = form.coefficient_number(c) {
                            coefficient_map.push(number);
                        }
                    }
                });
                let coefficient_map: Vec<usize> = coefficient_map.into_iter().sorted().dedup().collect();
                let coefficients = strategy.set_coefficients(form, &coefficient_map)?;

                let kernel_name = format!("{}_{}_integral_{}", name, integral_type, index);
                let kernel = ElementKernel::new(kernel_name.clone(), form, integral_type, &integrand, coefficients)?;
                Ok(CompiledIntegral {
                    kernel: Arc::new(kernel),
                    info: KernelInfo {
                        name: kernel_name,
                        integral_type,
                        subdomain_id,
                        coefficient_map,
                        domain_number: 0,
                    },
                })
            })
            .collect()
    }
}

/// Number of cells whose data an integral of the given type sees.
pub fn sides(integral_type: IntegralType) -> usize {
    match integral_type {
        IntegralType::InteriorFacet => 2,
        IntegralType::Cell | IntegralType::ExteriorFacet => 1,
    }
}

/// Number of local facet numbers an integral of the given type needs.
pub fn facet_count(integral_type: IntegralType) -> usize {
    match integral_type {
        IntegralType::Cell => 0,
        IntegralType::ExteriorFacet => 1,
        IntegralType::InteriorFacet => 2,
    }
}

/// Position of a local degree of freedom of an argument.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct ArgumentDof {
    block: usize,
    side: usize,
    node: usize,
    component: usize,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct BasisRef {
    argument: usize,
    block: usize,
    element: LagrangeTriangle,
    component: usize,
    derivative: Option<usize>,
    side: usize,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct FieldRef {
    input: usize,
    offset: usize,
    element: LagrangeTriangle,
    block_size: usize,
    component: usize,
    derivative: Option<usize>,
    side: usize,
}

/// An integrand with all terminals resolved to kernel inputs.
#[derive(Debug, Clone, PartialEq)]
enum KernelExpr {
    Constant(f64),
    Coordinate(usize),
    Basis(BasisRef),
    Field(FieldRef),
    Sum(Box<KernelExpr>, Box<KernelExpr>),
    Product(Box<KernelExpr>, Box<KernelExpr>),
    Neg(Box<KernelExpr>),
}

#[derive(Debug, Clone, Default)]
struct ElementTable {
    values: Vec<f64>,
    gradients: Vec<Vector2<f64>>,
}

/// Basis functions of every supported element evaluated at one point of one cell.
#[derive(Debug, Clone)]
struct SideEvaluation {
    x: Point2<f64>,
    tables: [ElementTable; 3],
}

impl SideEvaluation {
    fn new() -> Self {
        Self {
            x: Point2::origin(),
            tables: Default::default(),
        }
    }

    fn populate(&mut self, triangle: &AffineTriangle<f64>, inverse_transpose: &Matrix2<f64>, xi: &Point2<f64>) {
        self.x = triangle.map_reference_coords(xi);
        for element in [LagrangeTriangle::P0, LagrangeTriangle::P1, LagrangeTriangle::P2] {
            let table = &mut self.tables[element.degree()];
            let n = element.num_nodes();
            table.values.resize(n, 0.0);
            table.gradients.resize(n, Vector2::zeros());
            element.populate_basis(&mut table.values, xi);
            element.populate_gradients(&mut table.gradients, xi);
            for g in &mut table.gradients {
                *g = inverse_transpose * *g;
            }
        }
    }

    fn table(&self, element: LagrangeTriangle) -> &ElementTable {
        &self.tables[element.degree()]
    }
}

/// The tabulation routine for one integral group of a form.
#[derive(Debug, Clone)]
pub struct ElementKernel {
    name: String,
    integral_type: IntegralType,
    shape: Vec<usize>,
    argument_dofs: Vec<Vec<ArgumentDof>>,
    coefficients: Vec<KernelCoefficient>,
    input_lengths: Vec<usize>,
    integrand: KernelExpr,
}

struct ResolveContext<'a> {
    form: &'a Form,
    integral_type: IntegralType,
    coefficients: &'a [KernelCoefficient],
}

impl ElementKernel {
    fn new(
        name: String,
        form: &Form,
        integral_type: IntegralType,
        integrand: &Expr,
        coefficients: Vec<KernelCoefficient>,
    ) -> eyre::Result<Self> {
        let sides = sides(integral_type);
        let argument_dofs: Vec<Vec<ArgumentDof>> = form
            .arguments()
            .iter()
            .map(|argument| {
                let mut dofs = Vec::new();
                for (block, space) in argument.space().subspaces().iter().enumerate() {
                    let nodes = space.element().map(|e| e.num_nodes()).unwrap_or(0);
                    for side in 0..sides {
                        for node in 0..nodes {
                            for component in 0..space.block_size() {
                                dofs.push(ArgumentDof {
                                    block,
                                    side,
                                    node,
                                    component,
                                });
                            }
                        }
                    }
                }
                dofs
            })
            .collect();
        let shape = argument_dofs.iter().map(Vec::len).collect();

        let input_lengths = std::iter::once(6 * sides)
            .chain(coefficients.iter().map(|c| c.space.cell_arity() * sides))
            .collect();

        let context = ResolveContext {
            form,
            integral_type,
            coefficients: &coefficients,
        };
        let integrand = context.resolve(integrand)?;

        Ok(Self {
            name,
            integral_type,
            shape,
            argument_dofs,
            coefficients,
            input_lengths,
            integrand,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn integral_type(&self) -> IntegralType {
        self.integral_type
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Dimensions of the local tensor, one entry per argument.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn output_len(&self) -> usize {
        self.shape.iter().product()
    }

    /// The coefficient arguments, following the coordinate argument.
    pub fn coefficients(&self) -> &[KernelCoefficient] {
        &self.coefficients
    }

    /// The expected length of every input: coordinates first, then one entry per coefficient.
    pub fn input_lengths(&self) -> &[usize] {
        &self.input_lengths
    }

    /// Adds the element tensor into `output`, which is row-major.
    ///
    /// `inputs` holds the coordinates of the cell vertices (interleaved, `+` cell first on
    /// interior facets) followed by the gathered data of every coefficient argument. `facets`
    /// holds the local facet numbers for facet integrals.
    pub fn tabulate(&self, output: &mut [f64], inputs: &[&[f64]], facets: &[usize]) -> eyre::Result<()> {
        self.check_inputs(output, inputs, facets)?;

        let sides = sides(self.integral_type);
        let mut triangles = Vec::with_capacity(sides);
        let mut inverse_transposes = Vec::with_capacity(sides);
        let mut determinants = Vec::with_capacity(sides);
        for coords in inputs[0].chunks_exact(6) {
            let triangle = AffineTriangle::from_interleaved(coords);
            let jacobian = triangle.reference_jacobian();
            let det = jacobian.determinant();
            let inverse = jacobian
                .try_inverse()
                .filter(|_| det.abs() > f64::EPSILON)
                .ok_or_else(|| PatchError::invariant(format!("Degenerate cell in kernel {}", self.name)))?;
            triangles.push(triangle);
            inverse_transposes.push(inverse.transpose());
            determinants.push(det.abs());
        }

        let mut evaluations = vec![SideEvaluation::new(); sides];
        let mut index = vec![0; self.rank()];
        let mut accumulate = |evaluations: &[SideEvaluation], scale: f64, output: &mut [f64]| {
            for (entry, value) in output.iter_mut().enumerate() {
                let mut remainder = entry;
                for (i, dim) in index.iter_mut().zip(&self.shape).rev() {
                    *i = remainder % dim;
                    remainder /= dim;
                }
                *value += scale * self.evaluate(&self.integrand, evaluations, inputs, &index);
            }
        };

        match self.integral_type {
            IntegralType::Cell => {
                let (weights, points) = quadrature::triangle::<f64>();
                for (w, xi) in weights.iter().zip(&points) {
                    evaluations[0].populate(&triangles[0], &inverse_transposes[0], xi);
                    accumulate(&evaluations, w * determinants[0], output);
                }
            }
            IntegralType::ExteriorFacet | IntegralType::InteriorFacet => {
                let [a, b] = triangles[0].facet_endpoints(facets[0]);
                let length = (b - a).norm();
                // The - cell may traverse the shared facet in the opposite direction
                let reversed = sides == 2 && {
                    let [c, _] = triangles[1].facet_endpoints(facets[1]);
                    (c - a).norm() > (c - b).norm()
                };
                let (weights, points) = quadrature::segment::<f64>();
                for (w, t) in weights.iter().zip(&points) {
                    for side in 0..sides {
                        let t_side = if side == 1 && reversed { 1.0 - t } else { *t };
                        let xi = reference_facet_point(facets[side], t_side);
                        evaluations[side].populate(&triangles[side], &inverse_transposes[side], &xi);
                    }
                    accumulate(&evaluations, w * length, output);
                }
            }
        }
        Ok(())
    }

    fn check_inputs(&self, output: &[f64], inputs: &[&[f64]], facets: &[usize]) -> eyre::Result<()> {
        if output.len() != self.output_len() {
            return Err(PatchError::invariant(format!(
                "Kernel {} writes {} values, but the output holds {}",
                self.name,
                self.output_len(),
                output.len()
            )));
        }
        if inputs.len() != self.input_lengths.len() {
            return Err(PatchError::invariant(format!(
                "Kernel {} takes {} inputs, got {}",
                self.name,
                self.input_lengths.len(),
                inputs.len()
            )));
        }
        if let Some((i, (input, expected))) = inputs
            .iter()
            .zip(&self.input_lengths)
            .enumerate()
            .find(|(_, (input, expected))| input.len() != **expected)
        {
            return Err(PatchError::invariant(format!(
                "Input {} of kernel {} has length {}, expected {}",
                i,
                self.name,
                input.len(),
                expected
            )));
        }
        if facets.len() != facet_count(self.integral_type) || facets.iter().any(|&f| f >= 3) {
            return Err(PatchError::invariant(format!(
                "Kernel {} received invalid local facet numbers {:?}",
                self.name, facets
            )));
        }
        Ok(())
    }

    fn evaluate(&self, expr: &KernelExpr, evaluations: &[SideEvaluation], inputs: &[&[f64]], index: &[usize]) -> f64 {
        match expr {
            KernelExpr::Constant(value) => *value,
            KernelExpr::Coordinate(k) => evaluations[0].x[*k],
            KernelExpr::Basis(basis) => {
                let dof = &self.argument_dofs[basis.argument][index[basis.argument]];
                if dof.block != basis.block || dof.side != basis.side || dof.component != basis.component {
                    return 0.0;
                }
                let table = evaluations[basis.side].table(basis.element);
                match basis.derivative {
                    None => table.values[dof.node],
                    Some(d) => table.gradients[dof.node][d],
                }
            }
            KernelExpr::Field(field) => {
                let table = evaluations[field.side].table(field.element);
                let nodes = field.element.num_nodes();
                let data = &inputs[field.input][field.offset + field.side * nodes * field.block_size..];
                (0..nodes)
                    .map(|n| {
                        let phi = match field.derivative {
                            None => table.values[n],
                            Some(d) => table.gradients[n][d],
                        };
                        data[n * field.block_size + field.component] * phi
                    })
                    .sum()
            }
            KernelExpr::Sum(a, b) => {
                self.evaluate(a, evaluations, inputs, index) + self.evaluate(b, evaluations, inputs, index)
            }
            KernelExpr::Product(a, b) => {
                self.evaluate(a, evaluations, inputs, index) * self.evaluate(b, evaluations, inputs, index)
            }
            KernelExpr::Neg(a) => -self.evaluate(a, evaluations, inputs, index),
        }
    }
}

impl fmt::Display for ElementKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(A[{}]", self.name, self.shape.iter().join("]["))?;
        write!(f, ", coords[{}]", self.input_lengths[0])?;
        for (c, len) in self.coefficients.iter().zip(&self.input_lengths[1..]) {
            write!(f, ", {}[{}]", c.name, len)?;
        }
        if facet_count(self.integral_type) > 0 {
            write!(f, ", facet[{}]", facet_count(self.integral_type))?;
        }
        write!(f, ")")
    }
}

impl<'a> ResolveContext<'a> {
    fn resolve(&self, expr: &Expr) -> eyre::Result<KernelExpr> {
        Ok(match expr {
            Expr::Constant(value) => KernelExpr::Constant(*value),
            Expr::SpatialCoordinate(k) if *k < 2 => KernelExpr::Coordinate(*k),
            Expr::SpatialCoordinate(k) => {
                return Err(PatchError::configuration(format!(
                    "Spatial coordinate {} does not exist in two dimensions",
                    k
                )))
            }
            Expr::Terminal(terminal) => self.resolve_terminal(terminal)?,
            Expr::Sum(a, b) => KernelExpr::Sum(Box::new(self.resolve(a)?), Box::new(self.resolve(b)?)),
            Expr::Product(a, b) => KernelExpr::Product(Box::new(self.resolve(a)?), Box::new(self.resolve(b)?)),
            Expr::Neg(a) => KernelExpr::Neg(Box::new(self.resolve(a)?)),
        })
    }

    fn resolve_terminal(&self, terminal: &Terminal) -> eyre::Result<KernelExpr> {
        let side = match (self.integral_type, terminal.restriction) {
            (IntegralType::InteriorFacet, Some(restriction)) => restriction.side(),
            (IntegralType::InteriorFacet, None) => {
                return Err(PatchError::configuration(
                    "Terminals in interior facet integrals must be restricted to a side",
                ))
            }
            (integral_type, Some(_)) => {
                return Err(PatchError::configuration(format!(
                    "Restricted terminal in {} integral",
                    integral_type
                )))
            }
            (_, None) => 0,
        };
        if let Some(d) = terminal.derivative.filter(|&d| d >= 2) {
            return Err(PatchError::configuration(format!(
                "Derivative direction {} does not exist in two dimensions",
                d
            )));
        }

        let space = terminal.operand.space();
        let (block, leaf) = match (space.is_mixed(), terminal.sub) {
            (true, Some(sub)) => (sub, space.sub(sub)?),
            (true, None) => {
                return Err(PatchError::configuration(format!(
                    "Terminal on mixed space {} needs a subspace index",
                    space
                )))
            }
            (false, None) => (0, space.clone()),
            (false, Some(sub)) => {
                return Err(PatchError::configuration(format!(
                    "Subspace index {} given for space {}, which is not mixed",
                    sub, space
                )))
            }
        };
        let element = leaf
            .element()
            .ok_or_else(|| PatchError::invariant("Subspace of a mixed space must be a leaf"))?;
        let component = match (leaf.value_shape(), terminal.component) {
            (Some(ValueShape::Vector(dim)), Some(c)) if c < dim => c,
            (Some(ValueShape::Vector(_)), None) => {
                return Err(PatchError::configuration(format!(
                    "Terminal on vector space {} needs a component",
                    leaf
                )))
            }
            (Some(ValueShape::Scalar), None) | (Some(ValueShape::Scalar), Some(0)) => 0,
            (_, component) => {
                return Err(PatchError::configuration(format!(
                    "Component {:?} out of range for space {}",
                    component, leaf
                )))
            }
        };

        match &terminal.operand {
            Operand::Argument(argument) => {
                let number = argument.number();
                if self.form.arguments().get(number) != Some(argument) {
                    return Err(PatchError::configuration(format!(
                        "Argument {} on {} is not an argument of the form",
                        number,
                        argument.space()
                    )));
                }
                Ok(KernelExpr::Basis(BasisRef {
                    argument: number,
                    block,
                    element,
                    component,
                    derivative: terminal.derivative,
                    side,
                }))
            }
            Operand::Coefficient(coefficient) => {
                let number = self.form.coefficient_number(coefficient).ok_or_else(|| {
                    PatchError::invariant(format!("Coefficient {} is not part of the form", coefficient.name()))
                })?;
                let (position, argument) = self
                    .coefficients
                    .iter()
                    .find_position(|arg| arg.number == number && (arg.sub.is_none() || arg.sub == Some(block)))
                    .ok_or_else(|| {
                        PatchError::invariant(format!(
                            "Coefficient {} has no kernel argument for subspace {}",
                            coefficient.name(),
                            block
                        ))
                    })?;
                let offset = if argument.is_whole() {
                    let sides = sides(self.integral_type);
                    argument
                        .space
                        .subspaces()
                        .iter()
                        .take(block)
                        .map(|s| s.cell_arity() * sides)
                        .sum()
                } else {
                    0
                };
                Ok(KernelExpr::Field(FieldRef {
                    input: position + 1,
                    offset,
                    element,
                    block_size: leaf.block_size(),
                    component,
                    derivative: terminal.derivative,
                    side,
                }))
            }
        }
    }
}
