use crate::unit_square;
use fenris_patch::form::{grad_dot, jump, Argument, Expr, Form, Integral, IntegralType, Restriction, SubdomainId};
use fenris_patch::space::{Coefficient, FunctionSpace};
use fenris_patch::PatchError;

fn assert_configuration_error<T: std::fmt::Debug>(result: eyre::Result<T>) {
    let err = result.unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_configuration(), "{}", err);
}

#[test]
fn coefficients_are_numbered_by_first_appearance() {
    let mesh = unit_square(1);
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let f = Coefficient::new("f", &space);
    let g = Coefficient::new("g", &space);
    let h = Coefficient::new("h", &space);
    let u = Argument::trial(&space);
    let v = Argument::test(&space);

    let form = Form::bilinear(
        &v,
        &u,
        vec![
            Integral::cell(g.terminal() * u.terminal() * v.terminal() + f.terminal() * g.terminal()),
            Integral::interior_facet(h.terminal().plus() * jump(&u.terminal()) * jump(&v.terminal())),
        ],
    )
    .unwrap();
    assert_eq!(form.rank(), 2);
    assert_eq!(form.coefficients(), &[g.clone(), f.clone(), h.clone()]);
    assert_eq!(form.coefficient_number(&f), Some(1));
    assert_eq!(form.coefficient_number(&Coefficient::new("f", &space)), None);
    assert_eq!(form.integrals()[1].integral_type, IntegralType::InteriorFacet);
    assert!(std::sync::Arc::ptr_eq(form.mesh(), &mesh));
}

#[test]
fn expressions_compose_terminals() {
    let mesh = unit_square(1);
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let u = Argument::trial(&space);
    let v = Argument::test(&space);

    let expr = 2.0 * u.terminal() - Expr::x(1);
    let mut count = 0;
    expr.visit_terminals(&mut |_| count += 1);
    assert_eq!(count, 1);
    assert_eq!(
        expr,
        Expr::Sum(
            Box::new(Expr::Product(
                Box::new(Expr::Constant(2.0)),
                Box::new(Expr::Terminal(u.terminal()))
            )),
            Box::new(Expr::Neg(Box::new(Expr::SpatialCoordinate(1)))),
        )
    );

    let mut derivatives = Vec::new();
    grad_dot(&u.terminal(), &v.terminal()).visit_terminals(&mut |t| derivatives.push(t.derivative));
    assert_eq!(derivatives, vec![Some(0), Some(0), Some(1), Some(1)]);

    let mut restrictions = Vec::new();
    jump(&v.terminal()).visit_terminals(&mut |t| restrictions.push(t.restriction));
    assert_eq!(restrictions, vec![Some(Restriction::Plus), Some(Restriction::Minus)]);
    assert_eq!(Restriction::Minus.side(), 1);
}

#[test]
fn integrals_default_to_the_whole_domain() {
    let mesh = unit_square(1);
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let v = Argument::test(&space);
    let integral = Integral::cell(v.terminal());
    assert_eq!(integral.subdomain_id, SubdomainId::Otherwise);
    assert_eq!(integral.with_subdomain(SubdomainId::Id(3)).subdomain_id, SubdomainId::Id(3));
    assert_eq!(SubdomainId::Id(3).to_string(), "3");
    assert_eq!(IntegralType::InteriorFacet.to_string(), "interior_facet");
}

#[test]
fn invalid_forms_are_rejected() {
    let mesh = unit_square(1);
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let u = Argument::trial(&space);
    let v = Argument::test(&space);
    let integrals = || vec![Integral::cell(u.terminal() * v.terminal())];

    assert_configuration_error(Form::new(vec![u.clone(), v.clone()], integrals()));
    assert_configuration_error(Form::new(vec![v.clone(), u.clone(), Argument::new(2, &space)], integrals()));
    assert_configuration_error(Form::bilinear(&v, &u, vec![]));
    assert_configuration_error(Form::new(vec![], vec![Integral::cell(1.0)]));

    let other_space = FunctionSpace::lagrange(&unit_square(1), 1).unwrap();
    let w = Coefficient::new("w", &other_space);
    assert_configuration_error(Form::linear(&v, vec![Integral::cell(w.terminal() * v.terminal())]));
}

#[test]
fn functionals_of_coefficients_take_the_mesh_of_their_coefficients() {
    let mesh = unit_square(1);
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let f = Coefficient::new("f", &space);
    let form = Form::new(vec![], vec![Integral::cell(f.terminal() * f.terminal())]).unwrap();
    assert_eq!(form.rank(), 0);
    assert_eq!(form.coefficients(), &[f]);
}
