use crate::{reference_mesh, unit_square};
use fenris_patch::form::{jump, Argument, Expr, Form, Integral, SubdomainId};
use fenris_patch::form_compiler::{FormCompiler, QuadratureFormCompiler};
use fenris_patch::space::{Coefficient, FunctionSpace};
use fenris_patch::PatchError;
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;

fn compile(form: &Form) -> eyre::Result<Vec<fenris_patch::form_compiler::CompiledIntegral>> {
    QuadratureFormCompiler.compile(form, "form", false, None)
}

fn assert_configuration_error<T: std::fmt::Debug>(result: eyre::Result<T>) {
    let err = result.unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_configuration(), "{}", err);
}

const REFERENCE_COORDINATES: [f64; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

#[test]
fn integrals_are_grouped_by_type_and_subdomain() {
    let mesh = unit_square(1);
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let f = Coefficient::new("f", &space);
    let g = Coefficient::new("g", &space);
    let u = Argument::trial(&space);
    let v = Argument::test(&space);
    let mass = || u.terminal() * v.terminal();

    let form = Form::bilinear(
        &v,
        &u,
        vec![
            Integral::cell(g.terminal() * mass()),
            Integral::interior_facet(jump(&u.terminal()) * jump(&v.terminal())),
            Integral::cell(f.terminal() * mass()),
            Integral::cell(mass()).with_subdomain(SubdomainId::Id(2)),
        ],
    )
    .unwrap();
    let integrals = compile(&form).unwrap();
    let names: Vec<_> = integrals.iter().map(|i| i.info.name.as_str()).collect();
    assert_eq!(
        names,
        ["form_cell_integral_0", "form_interior_facet_integral_1", "form_cell_integral_2"]
    );
    assert_eq!(integrals[0].info.coefficient_map, vec![0, 1]);
    assert!(integrals[1].info.coefficient_map.is_empty());
    assert_eq!(integrals[2].info.subdomain_id, SubdomainId::Id(2));

    let cell_kernel = &integrals[0].kernel;
    assert_eq!(cell_kernel.name(), "form_cell_integral_0");
    assert_eq!(cell_kernel.shape(), &[3, 3]);
    assert_eq!(cell_kernel.input_lengths(), &[6, 3, 3]);
    assert_eq!(cell_kernel.coefficients().len(), 2);

    let facet_kernel = &integrals[1].kernel;
    assert_eq!(facet_kernel.shape(), &[6, 6]);
    assert_eq!(facet_kernel.input_lengths(), &[12]);
    assert!(facet_kernel.to_string().contains("facet[2]"));
}

#[test]
fn splitting_forms_is_unimplemented() {
    let mesh = reference_mesh();
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let v = Argument::test(&space);
    let form = Form::linear(&v, vec![Integral::cell(v.terminal())]).unwrap();
    let err = QuadratureFormCompiler.compile(&form, "form", true, None).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_unimplemented());
}

#[test]
fn tabulation_adds_into_the_output() {
    let mesh = reference_mesh();
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let v = Argument::test(&space);
    let form = Form::linear(&v, vec![Integral::cell(Expr::x(0) * v.terminal())]).unwrap();
    let kernel = compile(&form).unwrap().remove(0).kernel;

    let mut output = [0.0; 3];
    kernel.tabulate(&mut output, &[&REFERENCE_COORDINATES], &[]).unwrap();
    let expected = DVector::from_column_slice(&[1.0, 2.0, 1.0]) / 24.0;
    assert_matrix_eq!(DVector::from_column_slice(&output), expected, comp = abs, tol = 1e-14);

    kernel.tabulate(&mut output, &[&REFERENCE_COORDINATES], &[]).unwrap();
    assert_matrix_eq!(DVector::from_column_slice(&output), 2.0 * expected, comp = abs, tol = 1e-14);
}

#[test]
fn vector_and_mixed_arguments_are_laid_out_blockwise() {
    let mesh = reference_mesh();
    let vector = FunctionSpace::vector_lagrange(&mesh, 1, 2).unwrap();
    let scalar = FunctionSpace::lagrange(&mesh, 0).unwrap();
    let space = FunctionSpace::mixed(vec![vector, scalar]).unwrap();
    let v = Argument::test(&space);
    // Integrates the second velocity component and the pressure
    let form = Form::linear(
        &v,
        vec![Integral::cell(v.terminal().sub(0).component(1) + v.terminal().sub(1))],
    )
    .unwrap();
    let kernel = compile(&form).unwrap().remove(0).kernel;
    assert_eq!(kernel.shape(), &[7]);

    let mut output = [0.0; 7];
    kernel.tabulate(&mut output, &[&REFERENCE_COORDINATES], &[]).unwrap();
    let sixth = 1.0 / 6.0;
    let expected = DVector::from_column_slice(&[0.0, sixth, 0.0, sixth, 0.0, sixth, 0.5]);
    assert_matrix_eq!(DVector::from_column_slice(&output), expected, comp = abs, tol = 1e-14);
}

#[test]
fn coefficients_are_gathered_from_their_inputs() {
    let mesh = reference_mesh();
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let f = Coefficient::new("f", &space);
    let v = Argument::test(&space);
    let form = Form::linear(&v, vec![Integral::cell(f.terminal().dx(0) * v.terminal())]).unwrap();
    let kernel = compile(&form).unwrap().remove(0).kernel;

    // f = 3x has derivative 3, integrated against each basis function
    let mut output = [0.0; 3];
    kernel
        .tabulate(&mut output, &[&REFERENCE_COORDINATES, &[0.0, 3.0, 0.0]], &[])
        .unwrap();
    assert_matrix_eq!(DVector::from_column_slice(&output), DVector::repeat(3, 0.5), comp = abs, tol = 1e-13);
}

#[test]
fn invalid_tabulation_data_is_an_invariant_violation() {
    let mesh = reference_mesh();
    let space = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let v = Argument::test(&space);
    let form = Form::linear(&v, vec![Integral::cell(v.terminal())]).unwrap();
    let kernel = compile(&form).unwrap().remove(0).kernel;

    let invariant = |result: eyre::Result<()>| PatchError::classify(&result.unwrap_err()).unwrap().is_invariant_violation();
    let mut output = [0.0; 3];
    assert!(invariant(kernel.tabulate(&mut output[..2], &[&REFERENCE_COORDINATES], &[])));
    assert!(invariant(kernel.tabulate(&mut output, &[], &[])));
    assert!(invariant(kernel.tabulate(&mut output, &[&REFERENCE_COORDINATES[..4]], &[])));
    assert!(invariant(kernel.tabulate(&mut output, &[&REFERENCE_COORDINATES], &[0])));
    assert!(invariant(kernel.tabulate(&mut output, &[&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0]], &[])));
}

#[test]
fn malformed_terminals_are_configuration_errors() {
    let mesh = reference_mesh();
    let scalar = FunctionSpace::lagrange(&mesh, 1).unwrap();
    let vector = FunctionSpace::vector_lagrange(&mesh, 1, 2).unwrap();
    let mixed = FunctionSpace::mixed(vec![scalar.clone(), scalar.clone()]).unwrap();

    let v = Argument::test(&scalar);
    let linear = |integral: Integral| Form::linear(&v, vec![integral]).unwrap();
    assert_configuration_error(compile(&linear(Integral::cell(v.terminal().plus()))));
    assert_configuration_error(compile(&linear(Integral::interior_facet(v.terminal()))));
    assert_configuration_error(compile(&linear(Integral::cell(v.terminal().dx(2)))));
    assert_configuration_error(compile(&linear(Integral::cell(v.terminal().sub(0)))));
    assert_configuration_error(compile(&linear(Integral::cell(v.terminal().component(1)))));
    assert_configuration_error(compile(&linear(Integral::cell(Expr::x(2) * v.terminal()))));

    let w = Argument::test(&vector);
    assert_configuration_error(compile(&Form::linear(&w, vec![Integral::cell(w.terminal())]).unwrap()));
    let m = Argument::test(&mixed);
    assert_configuration_error(compile(&Form::linear(&m, vec![Integral::cell(m.terminal())]).unwrap()));

    // An argument that is not part of the form
    let stranger = Argument::trial(&scalar);
    assert_configuration_error(compile(&linear(Integral::cell(stranger.terminal() * v.terminal()))));
}
