use fenris_patch::assembly::{InsertMode, LocalMatrix, LocalVector};
use fenris_patch::PatchError;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};

#[test]
fn local_matrix_set_values_skips_negative_indices() {
    let mut matrix = LocalMatrix::zeros(3, 3);
    let block = [1.0, 2.0, 3.0, 4.0];
    matrix
        .set_values(&[0, -1], &[2, 1], &block, InsertMode::Insert)
        .unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        0.0, 2.0, 1.0,
        0.0, 0.0, 0.0,
        0.0, 0.0, 0.0,
    ]);
    assert_matrix_eq!(matrix.values().clone(), expected);
}

#[test]
fn local_matrix_insert_modes() {
    let mut matrix = LocalMatrix::zeros(2, 2);
    matrix
        .set_values(&[0, 1], &[0, 1], &[1.0, 2.0, 3.0, 4.0], InsertMode::Add)
        .unwrap();
    matrix
        .set_values(&[0, 1], &[0, 1], &[1.0, 1.0, 1.0, 1.0], InsertMode::Add)
        .unwrap();
    assert_matrix_eq!(matrix.values().clone(), DMatrix::from_row_slice(2, 2, &[2.0, 3.0, 4.0, 5.0]));

    matrix
        .set_values(&[1], &[0], &[-7.0], InsertMode::Insert)
        .unwrap();
    assert_matrix_eq!(matrix.values().clone(), DMatrix::from_row_slice(2, 2, &[2.0, 3.0, -7.0, 5.0]));
}

#[test]
fn local_matrix_rejects_out_of_bounds_and_mismatched_blocks() {
    let mut matrix = LocalMatrix::zeros(2, 2);

    let err = matrix
        .set_values(&[0, 2], &[0], &[1.0, 1.0], InsertMode::Add)
        .unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
    // Entries preceding the offending one are not written either
    let err = matrix
        .set_values(&[0, 1], &[1, 3], &[1.0, 1.0, 1.0, 1.0], InsertMode::Insert)
        .unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
    assert_matrix_eq!(matrix.values().clone(), DMatrix::<f64>::zeros(2, 2));

    let err = matrix
        .set_values(&[0, 1], &[0, 1], &[1.0], InsertMode::Add)
        .unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}

#[test]
fn local_matrix_assembly_state() {
    let mut matrix = LocalMatrix::zeros(2, 2);
    assert!(!matrix.is_assembled());
    matrix.assemble();
    assert!(matrix.is_assembled());

    matrix
        .set_values(&[0], &[0], &[1.0], InsertMode::Add)
        .unwrap();
    assert!(!matrix.is_assembled());
    matrix.assemble();
    assert_eq!(matrix.values()[(0, 0)], 1.0);

    matrix.zero_entries();
    assert!(!matrix.is_assembled());
    assert_matrix_eq!(matrix.into_values(), DMatrix::<f64>::zeros(2, 2));
}

#[test]
fn local_vector_set_zero_and_assemble() {
    let mut vector = LocalVector::zeros(3);
    assert_eq!(vector.len(), 3);
    assert!(!vector.is_empty());

    vector.set(&[1.0, 2.0, 3.0]).unwrap();
    vector.assemble();
    assert!(vector.is_assembled());
    assert_matrix_eq!(vector.values().clone(), DVector::from_column_slice(&[1.0, 2.0, 3.0]));

    vector.as_mut_slice()[1] = 5.0;
    assert!(!vector.is_assembled());
    assert_eq!(vector.as_slice(), &[1.0, 5.0, 3.0]);

    vector.zero_entries();
    assert_eq!(vector.as_slice(), &[0.0, 0.0, 0.0]);

    let err = vector.set(&[1.0]).unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_invariant_violation());
}
