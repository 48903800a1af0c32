use fenris_patch::assembly::target::{DatTarget, DenseDat, DenseMat, DenseSparsity, EmitContext, MatrixTarget};
use fenris_patch::assembly::wrapper::{Access, IterationSet, MapIndexing, MapRef, Param, Stmt};
use fenris_patch::assembly::InsertMode;
use fenris_patch::form::IntegralType;
use fenris_patch::PatchError;

fn context(integral_type: IntegralType, extruded: bool) -> EmitContext {
    EmitContext {
        iteration: IterationSet {
            extruded,
            ..IterationSet::single(integral_type)
        },
    }
}

fn assert_unimplemented(result: eyre::Result<Vec<Stmt>>) {
    let err = result.unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_unimplemented(), "{}", err);
}

#[test]
fn dense_sparsity_is_a_single_block() {
    let sparsity = DenseSparsity::new(6, 4);
    assert_eq!(sparsity.shape(), (1, 1));
    assert_eq!(sparsity.dims(), (6, 4));
    assert_eq!(sparsity.block(0, 0), sparsity);
    assert_eq!(sparsity.block(3, 7), sparsity);
    assert_eq!(DenseMat::new(6, 4).sparsity(), sparsity);
}

#[test]
fn dense_dat_is_a_single_virtual_value() {
    let dataset = DenseDat::new().dataset();
    assert_eq!(dataset.size, 1);
    assert_eq!(dataset.cdim, 1);
}

#[test]
fn dense_mat_addto_indexes_maps_by_loop_position() {
    let rows = MapRef::new(Param(0), 3);
    let cols = MapRef::new(Param(1), 3);
    let statements = DenseMat::new(3, 3)
        .emit_addto(&context(IntegralType::Cell, false), 0, &rows, &cols, Access::Inc)
        .unwrap();
    assert_eq!(
        statements,
        vec![Stmt::AddTo {
            rows: rows.with_indexing(MapIndexing::Local),
            cols: cols.with_indexing(MapIndexing::Local),
            buffer: 0,
            mode: InsertMode::Add,
        }]
    );

    let written = DenseMat::new(3, 3)
        .emit_addto(&context(IntegralType::Cell, false), 0, &rows, &cols, Access::Write)
        .unwrap();
    assert!(matches!(written[0], Stmt::AddTo { mode: InsertMode::Insert, .. }));
}

#[test]
fn dense_dat_gather_and_scatter_index_maps_by_loop_position() {
    let map = MapRef::new(Param(2), 6);
    let dat = DenseDat::new();
    let context = context(IntegralType::Cell, false);

    let gather = dat.emit_gather(&context, 1, Param(3), Some(&map), 1).unwrap();
    assert_eq!(
        gather,
        vec![Stmt::Gather {
            buffer: 1,
            data: Param(3),
            map: Some(map.with_indexing(MapIndexing::Local)),
            dim: 1,
        }]
    );

    let scatter = dat.emit_scatter(&context, 0, Some(&map), 1, Access::Inc).unwrap();
    assert_eq!(
        scatter,
        vec![Stmt::Scatter {
            buffer: 0,
            map: map.with_indexing(MapIndexing::Local),
            dim: 1,
            mode: InsertMode::Add,
            masked: true,
        }]
    );
}

#[test]
fn dense_dat_without_map_is_an_invariant_violation() {
    let dat = DenseDat::new();
    let context = context(IntegralType::Cell, false);
    let err = dat.emit_gather(&context, 0, Param(0), None, 1).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
    let err = dat.emit_scatter(&context, 0, None, 1, Access::Inc).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}

#[test]
fn read_access_cannot_be_scattered() {
    let map = MapRef::new(Param(0), 3);
    let err = DenseDat::new()
        .emit_scatter(&context(IntegralType::Cell, false), 0, Some(&map), 1, Access::Read)
        .unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}

#[test]
fn extruded_iteration_is_unimplemented() {
    let map = MapRef::new(Param(0), 3);
    let mat = DenseMat::new(3, 3);
    let dat = DenseDat::new();
    let extruded = context(IntegralType::Cell, true);
    assert_unimplemented(mat.emit_addto(&extruded, 0, &map, &map, Access::Inc));
    assert_unimplemented(dat.emit_gather(&extruded, 0, Param(1), Some(&map), 1));
    assert_unimplemented(dat.emit_scatter(&extruded, 0, Some(&map), 1, Access::Inc));
}

#[test]
fn extruded_interior_facets_are_unimplemented() {
    let map = MapRef::new(Param(0), 6);
    let err = DenseMat::new(6, 6)
        .emit_addto(&context(IntegralType::InteriorFacet, true), 0, &map, &map, Access::Inc)
        .unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_unimplemented());
    assert!(err.to_string().contains("interior facet"));
}

#[test]
fn vector_indexed_maps_are_unimplemented() {
    let map = MapRef::new(Param(0), 3);
    let indexed = map.with_vector_index();
    let context = context(IntegralType::Cell, false);
    assert_unimplemented(DenseMat::new(3, 3).emit_addto(&context, 0, &indexed, &map, Access::Inc));
    assert_unimplemented(DenseMat::new(3, 3).emit_addto(&context, 0, &map, &indexed, Access::Inc));
    assert_unimplemented(DenseDat::new().emit_gather(&context, 0, Param(1), Some(&indexed), 1));
    assert_unimplemented(DenseDat::new().emit_scatter(&context, 0, Some(&indexed), 1, Access::Inc));
}
