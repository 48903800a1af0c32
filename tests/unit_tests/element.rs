use fenris_patch::element::{reference_facet_point, reference_vertices, AffineTriangle, LagrangeTriangle};
use fenris_patch::PatchError;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{Matrix2, Point2, Vector2};
use proptest::prelude::*;

const ELEMENTS: [LagrangeTriangle; 3] = [LagrangeTriangle::P0, LagrangeTriangle::P1, LagrangeTriangle::P2];

fn reference_point() -> impl Strategy<Value = Point2<f64>> {
    (0.0..1.0, 0.0..1.0).prop_map(|(a, b): (f64, f64)| {
        // Fold the unit square onto the reference triangle
        let (a, b) = if a + b > 1.0 { (1.0 - a, 1.0 - b) } else { (a, b) };
        Point2::new(2.0 * a - 1.0, 2.0 * b - 1.0)
    })
}

fn p2_nodes() -> [Point2<f64>; 6] {
    [
        Point2::new(-1.0, -1.0),
        Point2::new(1.0, -1.0),
        Point2::new(-1.0, 1.0),
        Point2::new(0.0, -1.0),
        Point2::new(0.0, 0.0),
        Point2::new(-1.0, 0.0),
    ]
}

#[test]
fn elements_by_degree() {
    for (degree, element) in ELEMENTS.iter().enumerate() {
        assert_eq!(LagrangeTriangle::from_degree(degree).unwrap(), *element);
        assert_eq!(element.degree(), degree);
    }
    let err = LagrangeTriangle::from_degree(3).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_unimplemented());
}

#[test]
fn entity_dofs_add_up_to_node_count() {
    for element in ELEMENTS {
        let dofs = element.entity_dofs();
        assert_eq!(3 * dofs.vertex + 3 * dofs.edge + dofs.cell, element.num_nodes());
    }
}

#[test]
fn basis_functions_are_nodal() {
    let p1_nodes = reference_vertices::<f64>();
    for (i, xi) in p1_nodes.iter().enumerate() {
        let mut phi = [0.0; 3];
        LagrangeTriangle::P1.populate_basis(&mut phi, xi);
        for (j, phi_j) in phi.iter().enumerate() {
            assert_scalar_eq!(*phi_j, if i == j { 1.0 } else { 0.0 }, comp = abs, tol = 1e-14);
        }
    }

    for (i, xi) in p2_nodes().iter().enumerate() {
        let mut phi = [0.0; 6];
        LagrangeTriangle::P2.populate_basis(&mut phi, xi);
        for (j, phi_j) in phi.iter().enumerate() {
            assert_scalar_eq!(*phi_j, if i == j { 1.0 } else { 0.0 }, comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn reference_facets_run_between_consecutive_vertices() {
    let vertices = reference_vertices::<f64>();
    for facet in 0..3 {
        assert_eq!(reference_facet_point(facet, 0.0), vertices[facet]);
        assert_eq!(reference_facet_point(facet, 1.0), vertices[(facet + 1) % 3]);
    }
    assert_eq!(reference_facet_point(1, 0.5), Point2::new(0.0, 0.0));
}

#[test]
fn affine_triangle_maps_reference_vertices() {
    let triangle = AffineTriangle::from_interleaved(&[1.0, 1.0, 3.0, 1.0, 1.0, 4.0]);
    let reference = reference_vertices::<f64>();
    for (xi, x) in reference.iter().zip(triangle.vertices()) {
        assert_matrix_eq!(triangle.map_reference_coords(xi).coords, x.coords, comp = abs, tol = 1e-14);
    }
    let expected = Matrix2::new(1.0, 0.0, 0.0, 1.5);
    assert_matrix_eq!(triangle.reference_jacobian(), expected, comp = abs, tol = 1e-14);
    assert_eq!(triangle.facet_endpoints(2), [Point2::new(1.0, 4.0), Point2::new(1.0, 1.0)]);
}

proptest! {
    #[test]
    fn basis_functions_form_a_partition_of_unity(xi in reference_point()) {
        for element in ELEMENTS {
            let mut phi = vec![0.0; element.num_nodes()];
            let mut gradients = vec![Vector2::zeros(); element.num_nodes()];
            element.populate_basis(&mut phi, &xi);
            element.populate_gradients(&mut gradients, &xi);
            prop_assert!((phi.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            prop_assert!(gradients.iter().sum::<Vector2<f64>>().norm() < 1e-12);
        }
    }

    #[test]
    fn gradients_match_finite_differences(xi in reference_point()) {
        let h = 1e-6;
        for element in ELEMENTS {
            let n = element.num_nodes();
            let mut gradients = vec![Vector2::zeros(); n];
            element.populate_gradients(&mut gradients, &xi);
            for direction in 0..2 {
                let mut forward = xi;
                let mut backward = xi;
                forward[direction] += h;
                backward[direction] -= h;
                let (mut phi_forward, mut phi_backward) = (vec![0.0; n], vec![0.0; n]);
                element.populate_basis(&mut phi_forward, &forward);
                element.populate_basis(&mut phi_backward, &backward);
                for i in 0..n {
                    let fd = (phi_forward[i] - phi_backward[i]) / (2.0 * h);
                    prop_assert!((fd - gradients[i][direction]).abs() < 1e-6);
                }
            }
        }
    }
}
