//! Conforming triangle meshes with the point-chart view used by patch solvers.
use crate::error::PatchError;
use crate::topology::{PointLabels, Topology, GHOST_LABEL};
use itertools::Itertools;
use nalgebra::Point2;
use rustc_hash::FxHashMap;
use std::ops::Range;

pub mod procedural;

/// A facet shared by exactly two cells.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InteriorFacet {
    pub edge: usize,
    pub cells: [usize; 2],
    /// The local facet number of the edge in each of the two cells.
    pub local_facets: [usize; 2],
}

/// The kind of entity a chart point refers to, together with its index among entities of that kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PointKind {
    Cell(usize),
    Vertex(usize),
    Edge(usize),
}

/// Index-based triangle mesh in two dimensions.
///
/// Besides the connectivity, the mesh derives its edges and exposes all entities as points of
/// a single chart: cells come first, then vertices, then edges.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<Point2<f64>>,
    cells: Vec<[usize; 3]>,
    edges: Vec<[usize; 2]>,
    // Edge i of a cell connects local vertex i with local vertex (i + 1) % 3
    cell_edges: Vec<[usize; 3]>,
    edge_cells: Vec<Vec<usize>>,
    vertex_cells: Vec<Vec<usize>>,
    // Identity map, so that the closure of a vertex can be returned as a slice
    vertex_indices: Vec<usize>,
    interior_facets: Vec<InteriorFacet>,
    edge_interior_facet: Vec<Option<usize>>,
    labels: PointLabels,
}

impl TriangleMesh {
    pub fn from_vertices_and_cells(vertices: Vec<Point2<f64>>, cells: Vec<[usize; 3]>) -> eyre::Result<Self> {
        let num_vertices = vertices.len();
        let mut edges = Vec::new();
        let mut edge_lookup = FxHashMap::default();
        let mut cell_edges = Vec::with_capacity(cells.len());
        let mut edge_cells: Vec<Vec<usize>> = Vec::new();
        let mut vertex_cells = vec![Vec::new(); num_vertices];

        for (cell_index, cell) in cells.iter().enumerate() {
            if let Some(&v) = cell.iter().find(|&&v| v >= num_vertices) {
                return Err(PatchError::configuration(format!(
                    "Cell {} refers to vertex {}, but the mesh only has {} vertices",
                    cell_index, v, num_vertices
                )));
            }
            if !cell.iter().all_unique() {
                return Err(PatchError::configuration(format!("Cell {} is degenerate", cell_index)));
            }

            let mut local_edges = [0; 3];
            for i in 0..3 {
                let (a, b) = (cell[i], cell[(i + 1) % 3]);
                let key = [a.min(b), a.max(b)];
                let edge_index = *edge_lookup.entry(key).or_insert_with(|| {
                    edges.push(key);
                    edge_cells.push(Vec::new());
                    edges.len() - 1
                });
                edge_cells[edge_index].push(cell_index);
                local_edges[i] = edge_index;
            }
            cell_edges.push(local_edges);

            for &v in cell {
                vertex_cells[v].push(cell_index);
            }
        }

        let mut interior_facets = Vec::new();
        let mut edge_interior_facet = vec![None; edges.len()];
        for (edge_index, incident) in edge_cells.iter().enumerate() {
            match incident.as_slice() {
                [_] => {}
                &[c0, c1] => {
                    let local_facet = |c: usize| {
                        cell_edges[c]
                            .iter()
                            .position(|&e| e == edge_index)
                            .expect("Edge must be incident to its cells")
                    };
                    edge_interior_facet[edge_index] = Some(interior_facets.len());
                    interior_facets.push(InteriorFacet {
                        edge: edge_index,
                        cells: [c0, c1],
                        local_facets: [local_facet(c0), local_facet(c1)],
                    });
                }
                _ => {
                    return Err(PatchError::configuration(format!(
                        "Edge {:?} is shared by {} cells, the mesh is not a manifold",
                        edges[edge_index],
                        incident.len()
                    )))
                }
            }
        }

        Ok(Self {
            vertices,
            cells,
            edges,
            cell_edges,
            edge_cells,
            vertex_cells,
            vertex_indices: (0..num_vertices).collect(),
            interior_facets,
            edge_interior_facet,
            labels: PointLabels::default(),
        })
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn cells(&self) -> &[[usize; 3]] {
        &self.cells
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn cell_edges(&self) -> &[[usize; 3]] {
        &self.cell_edges
    }

    pub fn interior_facets(&self) -> &[InteriorFacet] {
        &self.interior_facets
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Edges with only one incident cell.
    pub fn exterior_edges(&self) -> impl Iterator<Item = usize> + '_ {
        self.edge_cells
            .iter()
            .enumerate()
            .filter(|(_, cells)| cells.len() == 1)
            .map(|(edge, _)| edge)
    }

    pub fn cell_point(&self, cell: usize) -> usize {
        cell
    }

    pub fn vertex_point(&self, vertex: usize) -> usize {
        self.num_cells() + vertex
    }

    pub fn edge_point(&self, edge: usize) -> usize {
        self.num_cells() + self.num_vertices() + edge
    }

    pub fn point_kind(&self, point: usize) -> Option<PointKind> {
        let (nc, nv, ne) = (self.num_cells(), self.num_vertices(), self.num_edges());
        if point < nc {
            Some(PointKind::Cell(point))
        } else if point < nc + nv {
            Some(PointKind::Vertex(point - nc))
        } else if point < nc + nv + ne {
            Some(PointKind::Edge(point - nc - nv))
        } else {
            None
        }
    }

    /// The vertices in the closure of a point.
    pub fn closure_vertices(&self, point: usize) -> &[usize] {
        match self.point_kind(point) {
            Some(PointKind::Cell(c)) => &self.cells[c],
            Some(PointKind::Edge(e)) => &self.edges[e],
            Some(PointKind::Vertex(v)) => std::slice::from_ref(&self.vertex_indices[v]),
            None => &[],
        }
    }

    /// The cells whose closure contains the given point, in ascending order.
    pub fn star_cells(&self, point: usize) -> Vec<usize> {
        match self.point_kind(point) {
            Some(PointKind::Cell(c)) => vec![c],
            Some(PointKind::Edge(e)) => self.edge_cells[e].iter().copied().sorted().collect(),
            Some(PointKind::Vertex(v)) => self.vertex_cells[v].iter().copied().sorted().collect(),
            None => Vec::new(),
        }
    }

    /// Maps a chart point to the index of the interior facet it represents.
    pub fn interior_facet_number(&self, point: usize) -> Option<usize> {
        match self.point_kind(point) {
            Some(PointKind::Edge(e)) => self.edge_interior_facet[e],
            _ => None,
        }
    }

    /// Maps chart points to cell indices, with `-1` for points that are not cells.
    pub fn cell_numbering(&self) -> Vec<i32> {
        self.chart()
            .map(|p| match self.point_kind(p) {
                Some(PointKind::Cell(c)) => c as i32,
                _ => -1,
            })
            .collect()
    }

    /// Interleaved vertex coordinates.
    pub fn coordinates(&self) -> Vec<f64> {
        self.vertices.iter().flat_map(|v| [v.x, v.y]).collect()
    }

    /// The vertex indices of every cell, three per cell.
    pub fn cell_vertex_map(&self) -> Vec<i32> {
        self.cells.iter().flatten().map(|&v| v as i32).collect()
    }

    /// The vertex indices of both cells adjacent to each interior facet, six per facet.
    pub fn interior_facet_vertex_map(&self) -> Vec<i32> {
        self.interior_facets
            .iter()
            .flat_map(|facet| facet.cells.iter().flat_map(|&c| self.cells[c]))
            .map(|v| v as i32)
            .collect()
    }

    /// The local facet numbers of each interior facet in its two cells, two per facet.
    pub fn interior_facet_local_numbers(&self) -> Vec<i32> {
        self.interior_facets
            .iter()
            .flat_map(|facet| facet.local_facets)
            .map(|f| f as i32)
            .collect()
    }

    pub fn labels(&self) -> &PointLabels {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut PointLabels {
        &mut self.labels
    }

    /// Marks a point as a halo point owned by another process.
    pub fn mark_ghost(&mut self, point: usize) {
        self.labels.set(GHOST_LABEL, point, 1);
    }

    pub fn is_ghost(&self, point: usize) -> bool {
        self.labels.has_label(GHOST_LABEL, point)
    }
}

impl Topology for TriangleMesh {
    fn chart(&self) -> Range<usize> {
        0..self.num_cells() + self.num_vertices() + self.num_edges()
    }

    fn geometric_dim(&self) -> usize {
        2
    }

    fn populate_closure_coordinates(&self, point: usize, output: &mut Vec<f64>) {
        for &v in self.closure_vertices(point) {
            let x = &self.vertices[v];
            output.push(x.x);
            output.push(x.y);
        }
    }

    fn label_value(&self, label: &str, point: usize) -> Option<i32> {
        self.labels.get(label, point)
    }
}
