use fenris_patch::PatchError;

#[test]
fn errors_are_classified_through_reports() {
    let report = PatchError::configuration("Must set foo");
    let error = PatchError::classify(&report).unwrap();
    assert_eq!(error, &PatchError::Configuration("Must set foo".to_string()));
    assert!(error.is_configuration());
    assert!(!error.is_unimplemented());
    assert!(!error.is_invariant_violation());
    assert_eq!(report.to_string(), "Invalid configuration: Must set foo");

    let report = PatchError::unimplemented("extruded meshes");
    assert!(PatchError::classify(&report).unwrap().is_unimplemented());
    assert_eq!(report.to_string(), "Not implemented: extruded meshes");

    let report = PatchError::invariant("map too short");
    assert!(PatchError::classify(&report).unwrap().is_invariant_violation());
    assert_eq!(report.to_string(), "Invariant violated: map too short");
}

#[test]
fn context_does_not_hide_the_classification() {
    use eyre::WrapErr;
    let result: eyre::Result<()> = Err(PatchError::configuration("Must set foo"));
    let report = result.wrap_err("Setting up patch solver").unwrap_err();
    assert!(PatchError::classify(&report).unwrap().is_configuration());
    assert_eq!(report.to_string(), "Setting up patch solver");
}

#[test]
fn foreign_errors_are_not_classified() {
    let report = eyre::eyre!("something else");
    assert!(PatchError::classify(&report).is_none());
}
