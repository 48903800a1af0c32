//! Minimal topological queries needed for patch construction.
use nalgebra::DVector;
use rustc_hash::FxHashMap;
use std::ops::Range;

/// Label marking halo points owned by another process.
pub const GHOST_LABEL: &str = "ghost";

/// A chart of mesh points with geometry and labels.
///
/// Points are identified by consecutive integers in [`Topology::chart`]. A point may be any
/// kind of mesh entity (cell, facet, vertex); its geometry is given by the coordinates of the
/// vertices in its closure.
pub trait Topology: Sync {
    fn chart(&self) -> Range<usize>;

    fn geometric_dim(&self) -> usize;

    /// Appends the coordinates of the vertices in the closure of `point` to `output`.
    ///
    /// Coordinates are interleaved, so that `output` grows by a multiple of
    /// [`Topology::geometric_dim`].
    fn populate_closure_coordinates(&self, point: usize, output: &mut Vec<f64>);

    /// The value of the given label at `point`, or `None` if the point is not labeled.
    fn label_value(&self, label: &str, point: usize) -> Option<i32>;

    /// The mean of the closure coordinates of `point`.
    fn closure_centroid(&self, point: usize) -> DVector<f64> {
        let dim = self.geometric_dim();
        let mut coords = Vec::new();
        self.populate_closure_coordinates(point, &mut coords);
        let count = coords.len() / dim.max(1);
        let mut centroid = DVector::zeros(dim);
        for vertex in coords.chunks_exact(dim) {
            for (c, x) in centroid.iter_mut().zip(vertex) {
                *c += *x;
            }
        }
        if count > 0 {
            centroid /= count as f64;
        }
        centroid
    }
}

/// Named integer labels on points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointLabels {
    labels: FxHashMap<String, FxHashMap<usize, i32>>,
}

impl PointLabels {
    pub fn set(&mut self, label: &str, point: usize, value: i32) {
        self.labels
            .entry(label.to_string())
            .or_default()
            .insert(point, value);
    }

    pub fn clear(&mut self, label: &str, point: usize) {
        if let Some(values) = self.labels.get_mut(label) {
            values.remove(&point);
        }
    }

    pub fn get(&self, label: &str, point: usize) -> Option<i32> {
        self.labels
            .get(label)
            .and_then(|values| values.get(&point))
            .copied()
    }

    pub fn has_label(&self, label: &str, point: usize) -> bool {
        self.get(label, point).is_some()
    }
}

/// A collection of isolated points, each being its own closure.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    dim: usize,
    coordinates: Vec<f64>,
    labels: PointLabels,
}

impl PointCloud {
    /// Creates a point cloud from interleaved coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `dim` is zero or the number of coordinates is not a multiple of `dim`.
    pub fn from_interleaved(dim: usize, coordinates: Vec<f64>) -> Self {
        assert!(dim > 0, "Dimension must be positive");
        assert_eq!(coordinates.len() % dim, 0, "Coordinates must come in groups of dim");
        Self {
            dim,
            coordinates,
            labels: PointLabels::default(),
        }
    }

    pub fn num_points(&self) -> usize {
        self.coordinates.len() / self.dim
    }

    pub fn point(&self, index: usize) -> &[f64] {
        &self.coordinates[self.dim * index..self.dim * (index + 1)]
    }

    pub fn labels_mut(&mut self) -> &mut PointLabels {
        &mut self.labels
    }

    pub fn mark_ghost(&mut self, point: usize) {
        self.labels.set(GHOST_LABEL, point, 1);
    }
}

impl Topology for PointCloud {
    fn chart(&self) -> Range<usize> {
        0..self.num_points()
    }

    fn geometric_dim(&self) -> usize {
        self.dim
    }

    fn populate_closure_coordinates(&self, point: usize, output: &mut Vec<f64>) {
        output.extend_from_slice(self.point(point));
    }

    fn label_value(&self, label: &str, point: usize) -> Option<i32> {
        self.labels.get(label, point)
    }
}
