use fenris_patch::options::OptionsDatabase;
use fenris_patch::PatchError;

#[test]
fn options_are_parsed_from_command_line_arguments() {
    let db = OptionsDatabase::from_args([
        "program",
        "-patch_pc_patch_construct_type",
        "plane_smoother",
        "--patch_pc_patch_construct_ps_sweeps",
        "0+2:1-3",
        "-monitor",
        "-shift",
        "-1.5",
        "-verbose",
    ]);
    assert_eq!(db.len(), 5);
    assert_eq!(db.get("patch_pc_patch_construct_type"), Some("plane_smoother"));
    assert_eq!(db.get("patch_pc_patch_construct_ps_sweeps"), Some("0+2:1-3"));
    assert_eq!(db.get("monitor"), Some("true"));
    assert_eq!(db.get("shift"), Some("-1.5"));
    assert_eq!(db.get("verbose"), Some("true"));
    assert!(!db.contains("program"));
}

#[test]
fn prefixed_views_read_full_keys() {
    let mut db = OptionsDatabase::new();
    db.set("fieldsplit_0_patch_pc_patch_construct_type", "plane_smoother");
    db.set("fieldsplit_0_patch_max_iterations", "3");
    db.set("fieldsplit_0_patch_max_iterations_bad", "three");

    let view = db.with_prefix("fieldsplit_0_");
    assert_eq!(view.prefix(), "fieldsplit_0_");
    assert_eq!(view.get("patch_pc_patch_construct_type"), Some("plane_smoother"));

    let nested = view.nested("patch_");
    assert_eq!(nested.prefix(), "fieldsplit_0_patch_");
    assert_eq!(nested.full_key("x"), "fieldsplit_0_patch_x");
    assert_eq!(nested.require("pc_patch_construct_type").unwrap(), "plane_smoother");
    assert_eq!(nested.parse::<usize>("max_iterations").unwrap(), Some(3));
    assert_eq!(nested.parse::<usize>("min_iterations").unwrap(), None);

    let err = nested.parse::<usize>("max_iterations_bad").unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_configuration());
    assert!(err.to_string().contains("fieldsplit_0_patch_max_iterations_bad"));
}

#[test]
fn missing_required_options_name_the_full_key() {
    let db = OptionsDatabase::new();
    let err = db
        .with_prefix("snes_")
        .nested("patch_")
        .require("snes_patch_construct_type")
        .unwrap_err();
    assert!(PatchError::classify(&err).unwrap().is_configuration());
    assert_eq!(
        err.to_string(),
        "Invalid configuration: Must set snes_patch_snes_patch_construct_type"
    );
}

#[test]
fn databases_merge_and_remove_entries() {
    let mut a = OptionsDatabase::new();
    a.set("x", "1");
    a.set("y", "2");
    let mut b = OptionsDatabase::new();
    b.set("y", "3");
    b.set("z", "4");
    a.extend(&b);
    assert_eq!(a.get("y"), Some("3"));
    assert_eq!(a.len(), 3);
    assert_eq!(a.remove("x"), Some("1".to_string()));
    assert_eq!(a.remove("x"), None);
    assert!(!a.is_empty());
}

#[test]
fn databases_round_trip_through_json() {
    let mut db = OptionsDatabase::new();
    db.set("patch_pc_patch_construct_type", "plane_smoother");
    db.set("patch_pc_patch_construct_ps_sweeps", "0+4");
    let json = serde_json::to_string(&db).unwrap();
    assert_eq!(
        json,
        r#"{"patch_pc_patch_construct_ps_sweeps":"0+4","patch_pc_patch_construct_type":"plane_smoother"}"#
    );
    let parsed: OptionsDatabase = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, db);
}

#[test]
fn global_database_is_shared() {
    let key = "options_test_global_database_is_shared";
    OptionsDatabase::global().write().set(key, "yes");
    assert_eq!(OptionsDatabase::global().read().get(key), Some("yes"));
    OptionsDatabase::global().write().remove(key);
}
