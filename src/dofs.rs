//! Degrees of freedom fixed by boundary-value constraints.
//!
//! Global dofs are numbered by concatenating the subspaces of the root space. Within a leaf,
//! dof `node * bs + component` belongs to the given node and component.
use crate::error::PatchError;
use crate::space::{Composition, FunctionSpace};
use itertools::Itertools;

/// Fixes the values of a (sub)space at a set of nodes.
///
/// The constrained space is reached from `root` by following `indices`: an index into a mixed
/// space selects a subspace, an index into a vector space selects a single component and must
/// come last.
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletConstraint {
    root: FunctionSpace,
    indices: Vec<usize>,
    nodes: Vec<usize>,
    resolved: ResolvedPath,
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedPath {
    leaf: FunctionSpace,
    component: Option<usize>,
    preceding: Vec<FunctionSpace>,
}

fn resolve_path(root: &FunctionSpace, indices: &[usize]) -> eyre::Result<ResolvedPath> {
    let mut space = root.clone();
    let mut component = None;
    let mut preceding = Vec::new();
    for (i, &index) in indices.iter().enumerate() {
        match space.composition() {
            Composition::Mixed(subspaces) => {
                preceding.extend(subspaces.iter().take(index).cloned());
                space = space.sub(index)?;
            }
            Composition::Vector(dim) => {
                if index >= dim {
                    return Err(PatchError::configuration(format!(
                        "Component {} out of range for {}",
                        index, space
                    )));
                }
                if i + 1 != indices.len() {
                    return Err(PatchError::configuration(format!(
                        "Component {} of {} cannot be restricted any further",
                        index, space
                    )));
                }
                component = Some(index);
            }
            Composition::Scalar => {
                return Err(PatchError::configuration(format!(
                    "Cannot take subspace {} of scalar space {}",
                    index, space
                )));
            }
        }
    }
    Ok(ResolvedPath {
        leaf: space,
        component,
        preceding,
    })
}

impl DirichletConstraint {
    /// A constraint on the given nodes of the space reached from `root` through `indices`.
    pub fn new(root: &FunctionSpace, indices: &[usize], nodes: Vec<usize>) -> eyre::Result<Self> {
        let resolved = resolve_path(root, indices)?;
        let layout = resolved
            .leaf
            .layout()
            .ok_or_else(|| PatchError::configuration(format!("Cannot constrain the whole of mixed space {}", root)))?;
        if let Some(&node) = nodes.iter().find(|&&n| n >= layout.node_count()) {
            return Err(PatchError::configuration(format!(
                "Constrained node {} out of range for {} with {} nodes",
                node,
                resolved.leaf,
                layout.node_count()
            )));
        }
        Ok(Self {
            root: root.clone(),
            indices: indices.to_vec(),
            nodes,
            resolved,
        })
    }

    /// A constraint on all nodes on the boundary of the mesh.
    pub fn on_boundary(root: &FunctionSpace, indices: &[usize]) -> eyre::Result<Self> {
        let resolved = resolve_path(root, indices)?;
        let nodes = resolved
            .leaf
            .layout()
            .map(|layout| layout.boundary_nodes().to_vec())
            .ok_or_else(|| PatchError::configuration(format!("Cannot constrain the whole of mixed space {}", root)))?;
        Self::new(root, indices, nodes)
    }

    pub fn root(&self) -> &FunctionSpace {
        &self.root
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    /// The leaf space holding the constrained nodes.
    pub fn space(&self) -> &FunctionSpace {
        &self.resolved.leaf
    }

    /// The global dofs fixed by the constraint, sorted and without duplicates.
    ///
    /// With `include_ghost`, offsets count all dofs of preceding subspaces and all constrained
    /// nodes are kept. Otherwise offsets count owned dofs only, and nodes on ghost points are
    /// dropped.
    ///
    /// The ghost-inclusive result is a superset of the ghost-exclusive one only when no ghost
    /// dofs precede the constrained block. With ghosts in a preceding mixed block the two
    /// conventions use different offsets, and the sets need not overlap.
    pub fn fixed_dofs(&self, include_ghost: bool) -> Vec<usize> {
        let ResolvedPath {
            leaf,
            component,
            preceding,
        } = &self.resolved;

        let mut offset: usize = preceding
            .iter()
            .map(|space| {
                if include_ghost {
                    space.dof_count()
                } else {
                    space.owned_dof_count()
                }
            })
            .sum();
        offset += component.unwrap_or(0);

        let bs = leaf.block_size();
        let components = if component.is_some() { 0..1 } else { 0..bs };
        let owned_nodes = leaf
            .layout()
            .map(|layout| layout.owned_node_count())
            .unwrap_or(0);

        self.nodes
            .iter()
            .filter(|&&node| include_ghost || node < owned_nodes)
            .flat_map(|&node| components.clone().map(move |j| node * bs + j + offset))
            .sorted_unstable()
            .dedup()
            .collect()
    }
}

/// Dofs fixed by a set of constraints, in both index conventions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryDofs {
    /// Dofs including those on ghost points.
    pub ghost: Vec<usize>,
    /// Dofs on owned points only.
    pub global: Vec<usize>,
}

impl BoundaryDofs {
    pub fn from_constraints<'a>(constraints: impl IntoIterator<Item = &'a DirichletConstraint>) -> Self {
        let mut ghost = Vec::new();
        let mut global = Vec::new();
        for constraint in constraints {
            ghost.extend(constraint.fixed_dofs(true));
            global.extend(constraint.fixed_dofs(false));
        }
        ghost.sort_unstable();
        ghost.dedup();
        global.sort_unstable();
        global.dedup();
        Self { ghost, global }
    }
}
