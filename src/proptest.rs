use crate::mesh::procedural::create_rectangular_uniform_tri_mesh_2d;
use crate::mesh::TriangleMesh;
use crate::patch::{Sweep, SweepDirection};
use crate::topology::PointCloud;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use nalgebra::{Point2, Vector2};

pub fn point2() -> impl Strategy<Value = Point2<f64>> {
    // Pick a reasonably small range to pick coordinates from,
    // otherwise we can easily get floating point numbers that are
    // so ridiculously large as to break anything we might want to do with them
    let range = -10.0..10.0;
    [range.clone(), range.clone()].prop_map(|[x, y]| Point2::new(x, y))
}

/// Sweeps along one of the first `dim` axes with up to `max_divisions` divisions.
pub fn sweep(dim: usize, max_divisions: usize) -> impl Strategy<Value = Sweep> {
    (0..dim, any::<bool>(), 1..=max_divisions).prop_map(|(axis, ascending, divisions)| Sweep {
        axis,
        direction: if ascending {
            SweepDirection::Ascending
        } else {
            SweepDirection::Descending
        },
        divisions,
    })
}

impl Arbitrary for Sweep {
    /// The dimension of the domain to sweep through.
    type Parameters = usize;
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(dim: Self::Parameters) -> Self::Strategy {
        sweep(dim.max(1), 8).boxed()
    }
}

/// Point clouds in `dim` dimensions, some of whose points may be labeled as ghosts.
pub fn point_cloud(dim: usize, max_points: usize) -> impl Strategy<Value = PointCloud> {
    let range = -10.0..10.0;
    vec((vec(range, dim), any::<bool>()), 1..=max_points).prop_map(move |points| {
        let coordinates = points.iter().flat_map(|(x, _)| x.clone()).collect();
        let mut cloud = PointCloud::from_interleaved(dim, coordinates);
        for (i, (_, ghost)) in points.iter().enumerate() {
            // Keep at least the first point eligible
            if *ghost && i > 0 {
                cloud.mark_ghost(i);
            }
        }
        cloud
    })
}

/// Uniform triangle meshes of rectangles with up to `max_cells_per_dim` cells along each axis.
pub fn rectangular_tri_mesh(max_cells_per_dim: usize) -> impl Strategy<Value = TriangleMesh> {
    let extent = 0.1..10.0;
    (
        point2(),
        [extent.clone(), extent],
        [1..=max_cells_per_dim, 1..=max_cells_per_dim],
    )
        .prop_filter_map("Mesh must be valid", |(lower_left, [w, h], cells)| {
            create_rectangular_uniform_tri_mesh_2d(&lower_left, &Vector2::new(w, h), cells).ok()
        })
}
