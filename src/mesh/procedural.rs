//! Basic procedural mesh generation routines.
use crate::error::PatchError;
use crate::mesh::TriangleMesh;
use nalgebra::{Point2, Vector2};

/// A uniform triangulation of the unit square `[0, 1]^2`.
///
/// # Panics
///
/// Panics if `cells_per_dim` is zero.
pub fn create_unit_square_uniform_tri_mesh_2d(cells_per_dim: usize) -> TriangleMesh {
    create_rectangular_uniform_tri_mesh_2d(&Point2::origin(), &Vector2::new(1.0, 1.0), [cells_per_dim; 2])
        .expect("Unit square mesh parameters are valid for positive cell counts")
}

/// Generates a uniform triangulation of an axis-aligned rectangle.
///
/// Each rectangular cell of the `num_cells[0] x num_cells[1]` grid is split into two
/// counter-clockwise triangles along its diagonal from the lower left to the upper right corner.
pub fn create_rectangular_uniform_tri_mesh_2d(
    lower_left: &Point2<f64>,
    extents: &Vector2<f64>,
    num_cells: [usize; 2],
) -> eyre::Result<TriangleMesh> {
    let [nx, ny] = num_cells;
    if nx == 0 || ny == 0 {
        return Err(PatchError::configuration("Rectangular mesh needs at least one cell per dimension"));
    }
    if extents.iter().any(|&e| !(e > 0.0)) {
        return Err(PatchError::configuration("Rectangular mesh needs positive extents"));
    }

    let h = Vector2::new(extents.x / nx as f64, extents.y / ny as f64);
    let to_vertex_index = |i: usize, j: usize| (nx + 1) * j + i;

    let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1));
    for j in 0..=ny {
        for i in 0..=nx {
            vertices.push(lower_left + Vector2::new(i as f64 * h.x, j as f64 * h.y));
        }
    }

    let mut cells = Vec::with_capacity(2 * nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            let a = to_vertex_index(i, j);
            let b = to_vertex_index(i + 1, j);
            let c = to_vertex_index(i + 1, j + 1);
            let d = to_vertex_index(i, j + 1);
            cells.push([a, b, c]);
            cells.push([a, c, d]);
        }
    }

    TriangleMesh::from_vertices_and_cells(vertices, cells)
}
