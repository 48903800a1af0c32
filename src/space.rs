//! Function spaces, their node layouts and coefficient fields.
//!
//! A [`FunctionSpace`] is a small tree: a leaf is a Lagrange space with either a scalar or a
//! vector value shape, and an interior node is a mixed composition of leaves. Spaces are cheap
//! to clone and immutable once built.
use crate::element::LagrangeTriangle;
use crate::error::PatchError;
use crate::mesh::{PointKind, TriangleMesh};
use crate::topology::Topology;
use itertools::Itertools;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Node numbering of a Lagrange element on a mesh.
///
/// Nodes belonging to points without the ghost label are numbered first, so that the owned
/// nodes are exactly `0 .. owned_node_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLayout {
    element: LagrangeTriangle,
    node_count: usize,
    owned_node_count: usize,
    cell_nodes: Vec<i32>,
    interior_facet_nodes: Vec<i32>,
    boundary_nodes: Vec<usize>,
    node_coordinates: Vec<Point2<f64>>,
}

impl NodeLayout {
    pub fn new(mesh: &TriangleMesh, element: LagrangeTriangle) -> Self {
        let dofs = element.entity_dofs();
        let dofs_at = |point: usize| match mesh.point_kind(point) {
            Some(PointKind::Cell(_)) => dofs.cell,
            Some(PointKind::Vertex(_)) => dofs.vertex,
            Some(PointKind::Edge(_)) => dofs.edge,
            None => 0,
        };

        let chart = mesh.chart();
        let (owned, ghost): (Vec<usize>, Vec<usize>) = chart.clone().partition(|&p| !mesh.is_ghost(p));
        let mut point_offsets = vec![usize::MAX; chart.len()];
        let mut node_count = 0;
        let mut owned_node_count = 0;
        for (is_owned, points) in [(true, &owned), (false, &ghost)] {
            for &p in points {
                let count = dofs_at(p);
                if count > 0 {
                    point_offsets[p] = node_count;
                    node_count += count;
                }
            }
            if is_owned {
                owned_node_count = node_count;
            }
        }

        let point_nodes = |point: usize| {
            let offset = point_offsets[point];
            (0..dofs_at(point)).map(move |k| offset + k)
        };

        let mut cell_nodes = Vec::with_capacity(mesh.num_cells() * element.num_nodes());
        for (c, (cell, edges)) in mesh.cells().iter().zip(mesh.cell_edges()).enumerate() {
            for &v in cell {
                cell_nodes.extend(point_nodes(mesh.vertex_point(v)));
            }
            for &e in edges {
                cell_nodes.extend(point_nodes(mesh.edge_point(e)));
            }
            cell_nodes.extend(point_nodes(mesh.cell_point(c)));
        }
        let cell_nodes: Vec<i32> = cell_nodes.into_iter().map(|n| n as i32).collect();

        let arity = element.num_nodes();
        let interior_facet_nodes = mesh
            .interior_facets()
            .iter()
            .flat_map(|facet| facet.cells)
            .flat_map(|c| cell_nodes[arity * c..arity * (c + 1)].iter().copied())
            .collect();

        let boundary_nodes = mesh
            .exterior_edges()
            .flat_map(|e| {
                let [a, b] = mesh.edges()[e];
                point_nodes(mesh.vertex_point(a))
                    .chain(point_nodes(mesh.vertex_point(b)))
                    .chain(point_nodes(mesh.edge_point(e)))
                    .collect::<Vec<_>>()
            })
            .sorted_unstable()
            .dedup()
            .collect();

        let mut node_coordinates = vec![Point2::origin(); node_count];
        for p in chart {
            let centroid = mesh.closure_centroid(p);
            for n in point_nodes(p) {
                node_coordinates[n] = Point2::new(centroid[0], centroid[1]);
            }
        }

        Self {
            element,
            node_count,
            owned_node_count,
            cell_nodes,
            interior_facet_nodes,
            boundary_nodes,
            node_coordinates,
        }
    }

    pub fn element(&self) -> LagrangeTriangle {
        self.element
    }

    /// Total number of nodes, including nodes on ghost points.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn owned_node_count(&self) -> usize {
        self.owned_node_count
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.element.num_nodes()
    }

    /// The nodes of each cell, [`NodeLayout::nodes_per_cell`] entries per cell.
    pub fn cell_node_map(&self) -> &[i32] {
        &self.cell_nodes
    }

    /// The nodes of both cells adjacent to each interior facet, twice
    /// [`NodeLayout::nodes_per_cell`] entries per facet.
    pub fn interior_facet_node_map(&self) -> &[i32] {
        &self.interior_facet_nodes
    }

    /// Sorted nodes on the closure of the exterior facets.
    pub fn boundary_nodes(&self) -> &[usize] {
        &self.boundary_nodes
    }

    pub fn node_coordinates(&self) -> &[Point2<f64>] {
        &self.node_coordinates
    }
}

/// The value shape of a leaf space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueShape {
    Scalar,
    /// A vector composition of `dim` copies of a scalar element.
    Vector(usize),
}

impl ValueShape {
    pub fn block_size(&self) -> usize {
        match self {
            ValueShape::Scalar => 1,
            ValueShape::Vector(dim) => *dim,
        }
    }
}

/// How a space is composed, as seen from its root.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Composition<'a> {
    Scalar,
    Vector(usize),
    Mixed(&'a [FunctionSpace]),
}

#[derive(Debug)]
enum SpaceKind {
    Leaf { layout: Arc<NodeLayout>, shape: ValueShape },
    Mixed { subspaces: Vec<FunctionSpace> },
}

#[derive(Debug)]
struct SpaceInner {
    mesh: Arc<TriangleMesh>,
    kind: SpaceKind,
}

#[derive(Debug, Clone)]
pub struct FunctionSpace {
    inner: Arc<SpaceInner>,
}

impl FunctionSpace {
    /// A scalar Lagrange space of the given degree.
    pub fn lagrange(mesh: &Arc<TriangleMesh>, degree: usize) -> eyre::Result<Self> {
        Self::leaf(mesh, degree, ValueShape::Scalar)
    }

    /// A vector composition of `dim` copies of a scalar Lagrange space.
    pub fn vector_lagrange(mesh: &Arc<TriangleMesh>, degree: usize, dim: usize) -> eyre::Result<Self> {
        if dim == 0 {
            return Err(PatchError::configuration("Vector spaces need at least one component"));
        }
        Self::leaf(mesh, degree, ValueShape::Vector(dim))
    }

    fn leaf(mesh: &Arc<TriangleMesh>, degree: usize, shape: ValueShape) -> eyre::Result<Self> {
        let element = LagrangeTriangle::from_degree(degree)?;
        let layout = Arc::new(NodeLayout::new(mesh, element));
        Ok(Self {
            inner: Arc::new(SpaceInner {
                mesh: Arc::clone(mesh),
                kind: SpaceKind::Leaf { layout, shape },
            }),
        })
    }

    /// A mixed composition of leaf spaces on a common mesh.
    pub fn mixed(subspaces: Vec<FunctionSpace>) -> eyre::Result<Self> {
        let first = subspaces
            .first()
            .ok_or_else(|| PatchError::configuration("Mixed spaces need at least one subspace"))?;
        let mesh = Arc::clone(first.mesh());
        for (i, space) in subspaces.iter().enumerate() {
            if space.is_mixed() {
                return Err(PatchError::configuration(format!(
                    "Subspace {} of a mixed space must not itself be mixed",
                    i
                )));
            }
            if !Arc::ptr_eq(space.mesh(), &mesh) {
                return Err(PatchError::configuration("All subspaces of a mixed space must share the mesh"));
            }
        }
        Ok(Self {
            inner: Arc::new(SpaceInner {
                mesh,
                kind: SpaceKind::Mixed { subspaces },
            }),
        })
    }

    pub fn mesh(&self) -> &Arc<TriangleMesh> {
        &self.inner.mesh
    }

    pub fn composition(&self) -> Composition<'_> {
        match &self.inner.kind {
            SpaceKind::Leaf {
                shape: ValueShape::Scalar, ..
            } => Composition::Scalar,
            SpaceKind::Leaf {
                shape: ValueShape::Vector(dim),
                ..
            } => Composition::Vector(*dim),
            SpaceKind::Mixed { subspaces } => Composition::Mixed(subspaces),
        }
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self.inner.kind, SpaceKind::Mixed { .. })
    }

    /// The subspaces of a mixed space, or the space itself for a leaf.
    pub fn subspaces(&self) -> Vec<FunctionSpace> {
        match &self.inner.kind {
            SpaceKind::Leaf { .. } => vec![self.clone()],
            SpaceKind::Mixed { subspaces } => subspaces.clone(),
        }
    }

    pub fn num_subspaces(&self) -> usize {
        match &self.inner.kind {
            SpaceKind::Leaf { .. } => 1,
            SpaceKind::Mixed { subspaces } => subspaces.len(),
        }
    }

    /// The `index`-th subspace of a mixed space.
    pub fn sub(&self, index: usize) -> eyre::Result<FunctionSpace> {
        match &self.inner.kind {
            SpaceKind::Mixed { subspaces } => subspaces.get(index).cloned().ok_or_else(|| {
                PatchError::configuration(format!(
                    "Subspace index {} out of range for mixed space with {} subspaces",
                    index,
                    subspaces.len()
                ))
            }),
            SpaceKind::Leaf { .. } => Err(PatchError::configuration(format!(
                "Cannot take subspace {} of a space that is not mixed",
                index
            ))),
        }
    }

    pub fn layout(&self) -> Option<&NodeLayout> {
        match &self.inner.kind {
            SpaceKind::Leaf { layout, .. } => Some(layout),
            SpaceKind::Mixed { .. } => None,
        }
    }

    pub fn element(&self) -> Option<LagrangeTriangle> {
        self.layout().map(NodeLayout::element)
    }

    pub fn value_shape(&self) -> Option<ValueShape> {
        match &self.inner.kind {
            SpaceKind::Leaf { shape, .. } => Some(*shape),
            SpaceKind::Mixed { .. } => None,
        }
    }

    /// Number of components per node of a leaf. Mixed spaces have block size 1.
    pub fn block_size(&self) -> usize {
        self.value_shape().map(|shape| shape.block_size()).unwrap_or(1)
    }

    /// Number of values per node of a leaf, or the sum over subspaces of a mixed space.
    pub fn value_size(&self) -> usize {
        match &self.inner.kind {
            SpaceKind::Leaf { shape, .. } => shape.block_size(),
            SpaceKind::Mixed { subspaces } => subspaces.iter().map(FunctionSpace::value_size).sum(),
        }
    }

    /// Number of degrees of freedom, including those on ghost points.
    pub fn dof_count(&self) -> usize {
        self.sum_over_leaves(|layout, shape| layout.node_count() * shape.block_size())
    }

    /// Number of degrees of freedom on owned points.
    pub fn owned_dof_count(&self) -> usize {
        self.sum_over_leaves(|layout, shape| layout.owned_node_count() * shape.block_size())
    }

    /// Number of degrees of freedom each cell contributes, summed over subspaces.
    pub fn cell_arity(&self) -> usize {
        self.sum_over_leaves(|layout, shape| layout.nodes_per_cell() * shape.block_size())
    }

    fn sum_over_leaves(&self, f: impl Fn(&NodeLayout, ValueShape) -> usize + Copy) -> usize {
        match &self.inner.kind {
            SpaceKind::Leaf { layout, shape } => f(layout, *shape),
            SpaceKind::Mixed { subspaces } => subspaces.iter().map(|s| s.sum_over_leaves(f)).sum(),
        }
    }
}

impl PartialEq for FunctionSpace {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        if !Arc::ptr_eq(self.mesh(), other.mesh()) {
            return false;
        }
        match (&self.inner.kind, &other.inner.kind) {
            (
                SpaceKind::Leaf { layout: a, shape: sa },
                SpaceKind::Leaf { layout: b, shape: sb },
            ) => a.element() == b.element() && sa == sb,
            (SpaceKind::Mixed { subspaces: a }, SpaceKind::Mixed { subspaces: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for FunctionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            SpaceKind::Leaf { layout, shape } => match shape {
                ValueShape::Scalar => write!(f, "P{}", layout.element().degree()),
                ValueShape::Vector(dim) => write!(f, "P{}^{}", layout.element().degree(), dim),
            },
            SpaceKind::Mixed { subspaces } => write!(f, "{}", subspaces.iter().join(" x ")),
        }
    }
}

static NEXT_COEFFICIENT_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a coefficient.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoefficientId(usize);

#[derive(Debug)]
struct CoefficientInner {
    id: CoefficientId,
    name: String,
    space: FunctionSpace,
    values: Vec<f64>,
}

/// A discrete field on a function space.
///
/// Values of a mixed coefficient are stored as the concatenation of the values of its
/// subspaces. Within a vector leaf, values are node-major with interleaved components.
#[derive(Debug, Clone)]
pub struct Coefficient {
    inner: Arc<CoefficientInner>,
}

impl Coefficient {
    /// A coefficient with all values zero.
    pub fn new(name: impl Into<String>, space: &FunctionSpace) -> Self {
        let values = vec![0.0; space.dof_count()];
        Self::from_parts(name.into(), space.clone(), values)
    }

    pub fn with_values(name: impl Into<String>, space: &FunctionSpace, values: Vec<f64>) -> eyre::Result<Self> {
        if values.len() != space.dof_count() {
            return Err(PatchError::configuration(format!(
                "Coefficient on {} needs {} values, got {}",
                space,
                space.dof_count(),
                values.len()
            )));
        }
        Ok(Self::from_parts(name.into(), space.clone(), values))
    }

    /// Interpolates a scalar function into a scalar leaf space by evaluation at the nodes.
    pub fn interpolate(
        name: impl Into<String>,
        space: &FunctionSpace,
        f: impl Fn(&Point2<f64>) -> f64,
    ) -> eyre::Result<Self> {
        match (space.layout(), space.value_shape()) {
            (Some(layout), Some(ValueShape::Scalar)) => {
                let values = layout.node_coordinates().iter().map(f).collect();
                Self::with_values(name, space, values)
            }
            _ => Err(PatchError::unimplemented(format!(
                "Interpolation is only supported for scalar spaces, not {}",
                space
            ))),
        }
    }

    fn from_parts(name: String, space: FunctionSpace, values: Vec<f64>) -> Self {
        let id = CoefficientId(NEXT_COEFFICIENT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(CoefficientInner {
                id,
                name,
                space,
                values,
            }),
        }
    }

    pub fn id(&self) -> CoefficientId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn space(&self) -> &FunctionSpace {
        &self.inner.space
    }

    pub fn values(&self) -> &[f64] {
        &self.inner.values
    }

    /// The subspaces of the coefficient's space, each with the range of its values.
    pub fn split(&self) -> Vec<(FunctionSpace, Range<usize>)> {
        let mut offset = 0;
        self.space()
            .subspaces()
            .into_iter()
            .map(|space| {
                let range = offset..offset + space.dof_count();
                offset = range.end;
                (space, range)
            })
            .collect()
    }
}

impl PartialEq for Coefficient {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Coefficient {}

impl std::hash::Hash for Coefficient {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}
