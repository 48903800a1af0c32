use crate::reference_mesh;
use fenris_patch::assembly::target::DenseMat;
use fenris_patch::assembly::wrapper::{
    generate, Access, ArgData, Destination, Frame, IterationSet, KernelOutput, MapRef, Param, Stmt, WrapperArg,
};
use fenris_patch::assembly::LocalMatrix;
use fenris_patch::form::{Argument, Form, Integral, IntegralType};
use fenris_patch::form_compiler::{ElementKernel, FormCompiler, QuadratureFormCompiler};
use fenris_patch::space::FunctionSpace;
use fenris_patch::PatchError;
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use std::sync::Arc;

fn compile_single(form: &Form) -> Arc<ElementKernel> {
    let mut integrals = QuadratureFormCompiler.compile(form, "form", false, None).unwrap();
    assert_eq!(integrals.len(), 1);
    integrals.remove(0).kernel
}

fn mass_kernel() -> Arc<ElementKernel> {
    let space = FunctionSpace::lagrange(&reference_mesh(), 1).unwrap();
    let u = Argument::trial(&space);
    let v = Argument::test(&space);
    compile_single(&Form::bilinear(&v, &u, vec![Integral::cell(u.terminal() * v.terminal())]).unwrap())
}

fn load_kernel() -> Arc<ElementKernel> {
    let space = FunctionSpace::lagrange(&reference_mesh(), 1).unwrap();
    let v = Argument::test(&space);
    compile_single(&Form::linear(&v, vec![Integral::cell(v.terminal())]).unwrap())
}

fn coordinates_arg<'a>(arity: usize) -> WrapperArg<'a> {
    WrapperArg::Dat {
        target: None,
        access: Access::Read,
        data: Destination::Param(Param(2)),
        map: Some(MapRef::new(Param(3), arity)),
        dim: 2,
    }
}

#[test]
fn dense_matrix_wrapper_assembles_the_element_matrix() {
    let mesh = reference_mesh();
    let mat = DenseMat::new(3, 3);
    let args = [
        WrapperArg::Mat {
            target: &mat,
            access: Access::Inc,
            rows: MapRef::new(Param(0), 3),
            cols: MapRef::new(Param(1), 3),
        },
        coordinates_arg(3),
    ];
    let wrapper = generate("wrap_mass", mass_kernel(), IterationSet::single(IntegralType::Cell), &args).unwrap();
    assert_eq!(wrapper.name(), "wrap_mass");
    assert!(matches!(wrapper.body().first(), Some(Stmt::Zero { .. })));
    assert!(matches!(wrapper.body().last(), Some(Stmt::AddTo { .. })));

    let source = wrapper.to_string();
    assert!(source.contains("void wrap_mass("));
    assert!(source.contains("MatSetValues(out, 3, &p0[n * 3 + k], 3, &p1[n * 3 + k]"));
    assert!(source.contains("p3[i * 3 + k]"));

    let coordinates = mesh.coordinates();
    let vertex_map = mesh.cell_vertex_map();
    // Rows and columns permuted by the local maps
    let rows = [2, 0, 1];
    let cols = [0, 1, 2];
    let params = [
        ArgData::Indices(&rows),
        ArgData::Indices(&cols),
        ArgData::Scalars(&coordinates),
        ArgData::Indices(&vertex_map),
    ];
    let mut output = LocalMatrix::zeros(3, 3);
    wrapper
        .execute(Frame {
            start: 0,
            entities: &[0],
            output: KernelOutput::Matrix(&mut output),
            params: &params,
        })
        .unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        1.0, 2.0, 1.0,
        1.0, 1.0, 2.0,
        2.0, 1.0, 1.0,
    ]) / 24.0;
    assert_matrix_eq!(output.into_values(), expected, comp = abs, tol = 1e-12);
}

#[test]
fn global_scatter_rejects_negative_map_entries() {
    let mesh = reference_mesh();
    let args = [
        WrapperArg::Dat {
            target: None,
            access: Access::Inc,
            data: Destination::Output,
            map: Some(MapRef::new(Param(0), 3)),
            dim: 1,
        },
        WrapperArg::Dat {
            target: None,
            access: Access::Read,
            data: Destination::Param(Param(1)),
            map: Some(MapRef::new(Param(2), 3)),
            dim: 2,
        },
    ];
    let wrapper = generate("wrap_load", load_kernel(), IterationSet::single(IntegralType::Cell), &args).unwrap();

    let coordinates = mesh.coordinates();
    let vertex_map = mesh.cell_vertex_map();
    let mut output = [0.0; 3];
    let run = |map: &[i32], output: &mut [f64]| {
        let params = [
            ArgData::Indices(map),
            ArgData::Scalars(&coordinates),
            ArgData::Indices(&vertex_map),
        ];
        wrapper.execute(Frame {
            start: 0,
            entities: &[0],
            output: KernelOutput::Vector(output),
            params: &params,
        })
    };

    run(&[0, 1, 2][..], &mut output[..]).unwrap();
    for value in output {
        assert!((value - 1.0 / 6.0).abs() < 1e-12);
    }

    let err = run(&[0, -1, 2][..], &mut output[..]).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}

#[test]
fn extruded_iteration_is_unimplemented() {
    let mat = DenseMat::new(3, 3);
    let args = [
        WrapperArg::Mat {
            target: &mat,
            access: Access::Inc,
            rows: MapRef::new(Param(0), 3),
            cols: MapRef::new(Param(1), 3),
        },
        coordinates_arg(3),
    ];
    let iteration = IterationSet {
        extruded: true,
        ..IterationSet::single(IntegralType::Cell)
    };
    let err = generate("wrap_mass", mass_kernel(), iteration, &args).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_unimplemented());
}

#[test]
fn mismatched_kernel_signature_is_an_invariant_violation() {
    let mat = DenseMat::new(3, 3);
    let args = [
        WrapperArg::Mat {
            target: &mat,
            access: Access::Inc,
            rows: MapRef::new(Param(0), 3),
            cols: MapRef::new(Param(1), 3),
        },
        // Only two of the three vertices
        coordinates_arg(2),
    ];
    let err = generate("wrap_mass", mass_kernel(), IterationSet::single(IntegralType::Cell), &args).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}

#[test]
fn sparsity_must_match_map_arities() {
    let mat = DenseMat::new(3, 3);
    let args = [
        WrapperArg::Mat {
            target: &mat,
            access: Access::Inc,
            rows: MapRef::new(Param(0), 4),
            cols: MapRef::new(Param(1), 4),
        },
        coordinates_arg(3),
    ];
    let err = generate("wrap_mass", mass_kernel(), IterationSet::single(IntegralType::Cell), &args).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}

#[test]
fn wrapper_without_output_is_an_invariant_violation() {
    let args = [coordinates_arg(3)];
    let err = generate("wrap_mass", mass_kernel(), IterationSet::single(IntegralType::Cell), &args).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}
