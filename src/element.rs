//! Lagrange finite elements on triangles.
//!
//! The reference element is the triangle defined by the corners (-1, -1), (1, -1), (-1, 1),
//! as elsewhere in fenris. Local facet `i` runs from reference vertex `i` to reference vertex
//! `(i + 1) % 3`.
use crate::error::PatchError;
use nalgebra::{Matrix2, Point2, RealField, Vector2};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Number of nodes an element attaches to each kind of mesh entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityDofs {
    pub vertex: usize,
    pub edge: usize,
    pub cell: usize,
}

/// Scalar Lagrange elements on triangles.
///
/// Node ordering for `P2` follows the `Tri6` convention: the three vertices first, then the
/// midpoints of the edges (0, 1), (1, 2) and (2, 0).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LagrangeTriangle {
    /// Piecewise constant, discontinuous.
    P0,
    P1,
    P2,
}

impl LagrangeTriangle {
    pub fn from_degree(degree: usize) -> eyre::Result<Self> {
        match degree {
            0 => Ok(Self::P0),
            1 => Ok(Self::P1),
            2 => Ok(Self::P2),
            _ => Err(PatchError::unimplemented(format!(
                "Lagrange elements of degree {} are not supported",
                degree
            ))),
        }
    }

    pub fn degree(&self) -> usize {
        match self {
            Self::P0 => 0,
            Self::P1 => 1,
            Self::P2 => 2,
        }
    }

    pub fn num_nodes(&self) -> usize {
        match self {
            Self::P0 => 1,
            Self::P1 => 3,
            Self::P2 => 6,
        }
    }

    pub fn entity_dofs(&self) -> EntityDofs {
        match self {
            Self::P0 => EntityDofs {
                vertex: 0,
                edge: 0,
                cell: 1,
            },
            Self::P1 => EntityDofs {
                vertex: 1,
                edge: 0,
                cell: 0,
            },
            Self::P2 => EntityDofs {
                vertex: 1,
                edge: 1,
                cell: 0,
            },
        }
    }

    /// Evaluates all basis functions at the given reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the output does not have exactly one entry per node.
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn populate_basis<T: RealField>(&self, output: &mut [T], xi: &Point2<T>) {
        assert_eq!(output.len(), self.num_nodes(), "Basis buffer has wrong length");
        match self {
            Self::P0 => output[0] = 1.0,
            Self::P1 => output.clone_from_slice(&p1_basis(xi)),
            Self::P2 => {
                let psi = p1_basis(xi);
                output[0] = psi[0].clone() * (2.0 * psi[0].clone() - 1.0);
                output[1] = psi[1].clone() * (2.0 * psi[1].clone() - 1.0);
                output[2] = psi[2].clone() * (2.0 * psi[2].clone() - 1.0);
                output[3] = 4.0 * psi[0].clone() * psi[1].clone();
                output[4] = 4.0 * psi[1].clone() * psi[2].clone();
                output[5] = 4.0 * psi[0].clone() * psi[2].clone();
            }
        }
    }

    /// Evaluates the gradients of all basis functions with respect to reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the output does not have exactly one entry per node.
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    pub fn populate_gradients<T: RealField>(&self, output: &mut [Vector2<T>], xi: &Point2<T>) {
        assert_eq!(output.len(), self.num_nodes(), "Gradient buffer has wrong length");
        match self {
            Self::P0 => output[0] = Vector2::zeros(),
            Self::P1 => output.clone_from_slice(&p1_gradients()),
            Self::P2 => {
                let psi = p1_basis(xi);
                let g = p1_gradients::<T>();
                let vertex_gradient = |i: usize| &g[i] * (4.0 * psi[i].clone() - 1.0);
                let edge_gradient =
                    |i: usize, j: usize| &g[i] * (4.0 * psi[j].clone()) + &g[j] * (4.0 * psi[i].clone());
                output[0] = vertex_gradient(0);
                output[1] = vertex_gradient(1);
                output[2] = vertex_gradient(2);
                output[3] = edge_gradient(0, 1);
                output[4] = edge_gradient(1, 2);
                output[5] = edge_gradient(0, 2);
            }
        }
    }
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn reference_vertices<T: RealField>() -> [Point2<T>; 3] {
    [Point2::new(-1.0, -1.0), Point2::new(1.0, -1.0), Point2::new(-1.0, 1.0)]
}

/// Maps a parameter `t` in `[0, 1]` along the given local facet to reference coordinates.
pub fn reference_facet_point<T: RealField>(local_facet: usize, t: T) -> Point2<T> {
    let vertices = reference_vertices::<T>();
    let a = &vertices[local_facet % 3];
    let b = &vertices[(local_facet + 1) % 3];
    a + (b - a) * t
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
fn p1_basis<T: RealField>(xi: &Point2<T>) -> [T; 3] {
    [
        -0.5 * xi.x.clone() - 0.5 * xi.y.clone(),
        0.5 * xi.x.clone() + 0.5,
        0.5 * xi.y.clone() + 0.5,
    ]
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
fn p1_gradients<T: RealField>() -> [Vector2<T>; 3] {
    [Vector2::new(-0.5, -0.5), Vector2::new(0.5, 0.0), Vector2::new(0.0, 0.5)]
}

/// The affine map from the reference triangle to a physical triangle.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineTriangle<T: RealField> {
    vertices: [Point2<T>; 3],
}

impl<T: RealField> AffineTriangle<T> {
    pub fn from_vertices(vertices: [Point2<T>; 3]) -> Self {
        Self { vertices }
    }

    /// Constructs the triangle from interleaved coordinates `[x0, y0, x1, y1, x2, y2]`.
    ///
    /// # Panics
    ///
    /// Panics if fewer than six coordinates are given.
    pub fn from_interleaved(coords: &[T]) -> Self {
        let p = |i: usize| Point2::new(coords[2 * i].clone(), coords[2 * i + 1].clone());
        Self::from_vertices([p(0), p(1), p(2)])
    }

    pub fn vertices(&self) -> &[Point2<T>; 3] {
        &self.vertices
    }

    #[allow(non_snake_case)]
    pub fn reference_jacobian(&self) -> Matrix2<T> {
        let G = p1_gradients::<T>();
        let mut J = Matrix2::zeros();
        for (x, g) in self.vertices.iter().zip(G.iter()) {
            J += x.coords.clone() * g.transpose();
        }
        J
    }

    pub fn map_reference_coords(&self, xi: &Point2<T>) -> Point2<T> {
        let phi = p1_basis(xi);
        let mut x = Vector2::zeros();
        for (v, phi_i) in self.vertices.iter().zip(phi) {
            x += &v.coords * phi_i;
        }
        Point2::from(x)
    }

    /// Physical coordinates of the endpoints of the given local facet.
    pub fn facet_endpoints(&self, local_facet: usize) -> [Point2<T>; 2] {
        [
            self.vertices[local_facet % 3].clone(),
            self.vertices[(local_facet + 1) % 3].clone(),
        ]
    }
}
