use std::fs;

use quince_core::{format_error, QuinceError, RuntimeCtx};
use tempfile::tempdir;

#[test]
fn eval_file_reports_errors_against_the_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.qn");
    fs::write(&path, "(def a 1)\n\n(let [b] b)\n").expect("write");

    let ctx = RuntimeCtx::new();
    let err = ctx.eval_file(&path).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "{}:3: Bindings array for let must contain an even number of forms",
            path.display()
        )
    );
}

#[test]
fn eval_file_returns_the_last_value() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("ok.qn");
    fs::write(&path, "(ns Script)\n(defn sq [x] (* x x))\n(sq 9)\n").expect("write");

    let ctx = RuntimeCtx::new();
    assert_eq!(ctx.eval_file(&path).expect("eval").to_string(), "81");
    assert_eq!(ctx.current_namespace().name(), "Script");
}

#[test]
fn missing_files_are_io_errors() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("absent.qn");
    let err = RuntimeCtx::new().eval_file(&path).unwrap_err();
    assert!(matches!(err, QuinceError::Io(_)));
    assert!(format_error(&err).starts_with(&path.display().to_string()));
}

#[test]
fn compiled_files_disassemble_and_rerun() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("unit.qn");
    fs::write(&path, "(def total 0)\n(def total (+ total 5))\ntotal\n").expect("write");

    let ctx = RuntimeCtx::new();
    let unit = ctx.compile_file(&path).expect("compile");
    assert_eq!(unit.forms.len(), 3);
    let listing = unit.to_string();
    assert!(listing.contains("form 2"), "{}", listing);
    assert_eq!(ctx.run_unit(&unit).expect("run").to_string(), "5");
}
