//! Quadrature rules for triangles and their facets.
use nalgebra::{Point2, RealField};
use numeric_literals::replace_float_literals;

pub type QuadraturePair<T, P> = (Vec<T>, Vec<P>);
pub type QuadraturePair1d<T> = QuadraturePair<T, T>;
pub type QuadraturePair2d<T> = QuadraturePair<T, Point2<T>>;

/// A 7-point rule on the reference triangle (-1, -1), (1, -1), (-1, 1).
///
/// The rule integrates polynomials up to degree 5 exactly. Weights sum to the area of the
/// reference triangle, which is 2.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn triangle<T: RealField>() -> QuadraturePair2d<T> {
    // (barycentric coordinates, weight normalized to unit area)
    let a1 = 0.059715871789770;
    let b1 = 0.470142064105115;
    let a2 = 0.797426985353087;
    let b2 = 0.101286507323456;
    let w1 = 0.132394152788506;
    let w2 = 0.125939180544827;
    let third = 1.0 / 3.0;
    let barycentric: [([T; 3], T); 7] = [
        ([third.clone(), third.clone(), third.clone()], 0.225),
        ([a1.clone(), b1.clone(), b1.clone()], w1.clone()),
        ([b1.clone(), a1.clone(), b1.clone()], w1.clone()),
        ([b1.clone(), b1.clone(), a1.clone()], w1.clone()),
        ([a2.clone(), b2.clone(), b2.clone()], w2.clone()),
        ([b2.clone(), a2.clone(), b2.clone()], w2.clone()),
        ([b2.clone(), b2.clone(), a2.clone()], w2.clone()),
    ];

    barycentric
        .into_iter()
        .map(|([_, l1, l2], w)| (w * 2.0, Point2::new(2.0 * l1 - 1.0, 2.0 * l2 - 1.0)))
        .unzip()
}

/// The 3-point Gauss-Legendre rule on `[0, 1]`, exact for polynomials up to degree 5.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn segment<T: RealField>() -> QuadraturePair1d<T> {
    let offset = 0.5 * T::sqrt(3.0 / 5.0);
    let weights = vec![5.0 / 18.0, 8.0 / 18.0, 5.0 / 18.0];
    let points = vec![0.5 - offset.clone(), 0.5, 0.5 + offset];
    (weights, points)
}
