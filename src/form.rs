//! Symbolic variational forms.
//!
//! A [`Form`] is a sum of [`Integral`]s of scalar expressions that are linear in each of the
//! form's [`Argument`]s. The expression language is deliberately small: terminals (arguments
//! and coefficients, optionally restricted to a subspace, a vector component, a spatial
//! derivative and a side of an interior facet), constants, spatial coordinates, sums, products
//! and negation.
use crate::error::PatchError;
use crate::mesh::TriangleMesh;
use crate::space::{Coefficient, FunctionSpace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

/// The side of an interior facet a terminal is evaluated on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Restriction {
    Plus,
    Minus,
}

impl Restriction {
    pub fn side(&self) -> usize {
        match self {
            Restriction::Plus => 0,
            Restriction::Minus => 1,
        }
    }
}

/// A test (number 0) or trial (number 1) function.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    number: usize,
    space: FunctionSpace,
}

impl Argument {
    pub fn new(number: usize, space: &FunctionSpace) -> Self {
        Self {
            number,
            space: space.clone(),
        }
    }

    pub fn test(space: &FunctionSpace) -> Self {
        Self::new(0, space)
    }

    pub fn trial(space: &FunctionSpace) -> Self {
        Self::new(1, space)
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn space(&self) -> &FunctionSpace {
        &self.space
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Argument(Argument),
    Coefficient(Coefficient),
}

impl Operand {
    pub fn space(&self) -> &FunctionSpace {
        match self {
            Operand::Argument(argument) => argument.space(),
            Operand::Coefficient(coefficient) => coefficient.space(),
        }
    }
}

/// An argument or coefficient, possibly narrowed down to a single scalar quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Terminal {
    pub operand: Operand,
    /// Subspace of a mixed space.
    pub sub: Option<usize>,
    /// Component of a vector space.
    pub component: Option<usize>,
    /// Spatial direction of a first derivative.
    pub derivative: Option<usize>,
    pub restriction: Option<Restriction>,
}

impl Terminal {
    fn from_operand(operand: Operand) -> Self {
        Self {
            operand,
            sub: None,
            component: None,
            derivative: None,
            restriction: None,
        }
    }

    pub fn sub(mut self, index: usize) -> Self {
        self.sub = Some(index);
        self
    }

    pub fn component(mut self, index: usize) -> Self {
        self.component = Some(index);
        self
    }

    /// The derivative in the spatial direction `direction`.
    pub fn dx(mut self, direction: usize) -> Self {
        self.derivative = Some(direction);
        self
    }

    pub fn restrict(mut self, restriction: Restriction) -> Self {
        self.restriction = Some(restriction);
        self
    }

    pub fn plus(self) -> Self {
        self.restrict(Restriction::Plus)
    }

    pub fn minus(self) -> Self {
        self.restrict(Restriction::Minus)
    }
}

impl From<&Argument> for Terminal {
    fn from(argument: &Argument) -> Self {
        Self::from_operand(Operand::Argument(argument.clone()))
    }
}

impl From<&Coefficient> for Terminal {
    fn from(coefficient: &Coefficient) -> Self {
        Self::from_operand(Operand::Coefficient(coefficient.clone()))
    }
}

impl Argument {
    pub fn terminal(&self) -> Terminal {
        Terminal::from(self)
    }
}

impl Coefficient {
    pub fn terminal(&self) -> Terminal {
        Terminal::from(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(f64),
    SpatialCoordinate(usize),
    Terminal(Terminal),
    Sum(Box<Expr>, Box<Expr>),
    Product(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Constant(value)
    }

    /// The `index`-th component of the physical coordinate.
    pub fn x(index: usize) -> Self {
        Expr::SpatialCoordinate(index)
    }

    /// Visits every terminal in the expression, left to right.
    pub fn visit_terminals<'a>(&'a self, f: &mut impl FnMut(&'a Terminal)) {
        match self {
            Expr::Constant(_) | Expr::SpatialCoordinate(_) => {}
            Expr::Terminal(terminal) => f(terminal),
            Expr::Sum(a, b) | Expr::Product(a, b) => {
                a.visit_terminals(f);
                b.visit_terminals(f);
            }
            Expr::Neg(a) => a.visit_terminals(f),
        }
    }
}

impl From<Terminal> for Expr {
    fn from(terminal: Terminal) -> Self {
        Expr::Terminal(terminal)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Constant(value)
    }
}

impl From<&Argument> for Expr {
    fn from(argument: &Argument) -> Self {
        Expr::Terminal(argument.into())
    }
}

impl From<&Coefficient> for Expr {
    fn from(coefficient: &Coefficient) -> Self {
        Expr::Terminal(coefficient.into())
    }
}

macro_rules! impl_binary_ops {
    ($lhs:ty) => {
        impl<R: Into<Expr>> Add<R> for $lhs {
            type Output = Expr;

            fn add(self, rhs: R) -> Expr {
                Expr::Sum(Box::new(self.into()), Box::new(rhs.into()))
            }
        }

        impl<R: Into<Expr>> Sub<R> for $lhs {
            type Output = Expr;

            fn sub(self, rhs: R) -> Expr {
                Expr::Sum(Box::new(self.into()), Box::new(-Into::<Expr>::into(rhs)))
            }
        }

        impl<R: Into<Expr>> Mul<R> for $lhs {
            type Output = Expr;

            fn mul(self, rhs: R) -> Expr {
                Expr::Product(Box::new(self.into()), Box::new(rhs.into()))
            }
        }

        impl Neg for $lhs {
            type Output = Expr;

            fn neg(self) -> Expr {
                Expr::Neg(Box::new(self.into()))
            }
        }
    };
}

impl_binary_ops!(Expr);
impl_binary_ops!(Terminal);

impl Mul<Expr> for f64 {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::Constant(self) * rhs
    }
}

impl Mul<Terminal> for f64 {
    type Output = Expr;

    fn mul(self, rhs: Terminal) -> Expr {
        Expr::Constant(self) * rhs
    }
}

/// The inner product of the spatial gradients of two scalar terminals.
pub fn grad_dot(a: &Terminal, b: &Terminal) -> Expr {
    (a.clone().dx(0) * b.clone().dx(0)) + (a.clone().dx(1) * b.clone().dx(1))
}

/// The jump `t(+) - t(-)` of a terminal across an interior facet.
pub fn jump(terminal: &Terminal) -> Expr {
    terminal.clone().plus() - terminal.clone().minus()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntegralType {
    Cell,
    InteriorFacet,
    ExteriorFacet,
}

impl fmt::Display for IntegralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegralType::Cell => write!(f, "cell"),
            IntegralType::InteriorFacet => write!(f, "interior_facet"),
            IntegralType::ExteriorFacet => write!(f, "exterior_facet"),
        }
    }
}

/// The part of the domain an integral is restricted to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubdomainId {
    /// The whole domain.
    Otherwise,
    Id(usize),
}

impl fmt::Display for SubdomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubdomainId::Otherwise => write!(f, "otherwise"),
            SubdomainId::Id(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Integral {
    pub integral_type: IntegralType,
    pub subdomain_id: SubdomainId,
    pub integrand: Expr,
}

impl Integral {
    pub fn new(integral_type: IntegralType, integrand: impl Into<Expr>) -> Self {
        Self {
            integral_type,
            subdomain_id: SubdomainId::Otherwise,
            integrand: integrand.into(),
        }
    }

    pub fn cell(integrand: impl Into<Expr>) -> Self {
        Self::new(IntegralType::Cell, integrand)
    }

    pub fn interior_facet(integrand: impl Into<Expr>) -> Self {
        Self::new(IntegralType::InteriorFacet, integrand)
    }

    pub fn exterior_facet(integrand: impl Into<Expr>) -> Self {
        Self::new(IntegralType::ExteriorFacet, integrand)
    }

    pub fn with_subdomain(mut self, subdomain_id: SubdomainId) -> Self {
        self.subdomain_id = subdomain_id;
        self
    }
}

/// An immutable multilinear form.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    mesh: Arc<TriangleMesh>,
    arguments: Vec<Argument>,
    integrals: Vec<Integral>,
    coefficients: Vec<Coefficient>,
}

impl Form {
    /// Creates a form from its arguments, ordered by number, and its integrals.
    pub fn new(arguments: Vec<Argument>, integrals: Vec<Integral>) -> eyre::Result<Self> {
        if arguments.len() > 2 {
            return Err(PatchError::configuration(format!(
                "Forms may have at most two arguments, got {}",
                arguments.len()
            )));
        }
        for (i, argument) in arguments.iter().enumerate() {
            if argument.number() != i {
                return Err(PatchError::configuration(format!(
                    "Argument at position {} has number {}",
                    i,
                    argument.number()
                )));
            }
        }
        if integrals.is_empty() {
            return Err(PatchError::configuration("Form has no integrals"));
        }

        let mut coefficients: Vec<Coefficient> = Vec::new();
        for integral in &integrals {
            integral.integrand.visit_terminals(&mut |terminal| {
                if let Operand::Coefficient(c) = &terminal.operand {
                    if !coefficients.contains(c) {
                        coefficients.push(c.clone());
                    }
                }
            });
        }

        let mut spaces = arguments
            .iter()
            .map(Argument::space)
            .chain(coefficients.iter().map(Coefficient::space));
        let mesh = spaces
            .next()
            .map(|space| Arc::clone(space.mesh()))
            .ok_or_else(|| PatchError::configuration("Form has neither arguments nor coefficients"))?;
        if !spaces.all(|space| Arc::ptr_eq(space.mesh(), &mesh)) {
            return Err(PatchError::configuration("All arguments and coefficients of a form must share the mesh"));
        }

        Ok(Self {
            mesh,
            arguments,
            integrals,
            coefficients,
        })
    }

    /// A bilinear form with the given test and trial spaces.
    pub fn bilinear(test: &Argument, trial: &Argument, integrals: Vec<Integral>) -> eyre::Result<Self> {
        Self::new(vec![test.clone(), trial.clone()], integrals)
    }

    /// A linear form with the given test space.
    pub fn linear(test: &Argument, integrals: Vec<Integral>) -> eyre::Result<Self> {
        Self::new(vec![test.clone()], integrals)
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn rank(&self) -> usize {
        self.arguments.len()
    }

    pub fn integrals(&self) -> &[Integral] {
        &self.integrals
    }

    /// The distinct coefficients of the form, in order of first appearance.
    pub fn coefficients(&self) -> &[Coefficient] {
        &self.coefficients
    }

    /// The position of a coefficient in [`Form::coefficients`].
    pub fn coefficient_number(&self, coefficient: &Coefficient) -> Option<usize> {
        self.coefficients.iter().position(|c| c == coefficient)
    }

    pub fn mesh(&self) -> &Arc<TriangleMesh> {
        &self.mesh
    }
}
