mod common;

use common::{eval_err_str, eval_in, eval_str};
use quince_core::RuntimeCtx;

#[test]
fn ns_switches_the_current_namespace() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, "(ns Geometry::Shapes)");
    assert_eq!(ctx.current_namespace().name(), "Geometry::Shapes");
    assert_eq!(eval_in(&ctx, "*ns*").to_string(), "Geometry::Shapes");
    assert_eq!(eval_in(&ctx, "Geometry").to_string(), "Geometry");
}

#[test]
fn core_functions_stay_visible_after_switching() {
    assert_eq!(eval_str("(ns Foo) (def x 1) (+ x 1)"), "2");
}

#[test]
fn qualified_names_reach_other_namespaces() {
    assert_eq!(
        eval_str("(ns Foo) (def x 41) (in-ns 'Bar) (+ Foo/x 1)"),
        "42"
    );
    assert_eq!(
        eval_str("(ns Foo) (defn double [x] (* 2 x)) (ns Bar) (Foo/double 21)"),
        "42"
    );
}

#[test]
fn vars_are_local_to_their_namespace() {
    assert_eq!(
        eval_err_str("(ns Foo) (def x 1) (ns Bar) x"),
        "(test):1: NameError: Undefined variable 'x' on Bar"
    );
}

#[test]
fn local_definitions_shadow_core() {
    assert_eq!(eval_str("(ns Mine) (def inc (fn [x] :mine)) (inc 1)"), ":mine");
    assert_eq!(eval_str("(ns Mine) (def inc (fn [x] :mine)) (ns Other) (inc 1)"), "2");
}

#[test]
fn metadata_is_stored_per_var_and_reset_by_def() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, "(ns Meta) (def x 1) (set-meta! 'x {:doc \"d\"})");
    assert_eq!(eval_in(&ctx, "(meta 'x)").to_string(), "{:doc \"d\"}");
    eval_in(&ctx, "(def x 2)");
    assert_eq!(eval_in(&ctx, "(meta 'x)").to_string(), "nil");
}

#[test]
fn namespaces_answer_var_methods() {
    assert_eq!(
        eval_str("(ns Vars) (def a 1) (def b 2) (. *ns* vars)"),
        "[:a :b]"
    );
    assert_eq!(eval_str("(ns Vars) (def a 1) (. *ns* get_var :a)"), "1");
}

#[test]
fn module_functions_are_callable_through_qualified_names() {
    assert_eq!(
        eval_str("(try (Kernel/raise KeyError \"gone\") (rescue e (. e message)))"),
        "\"gone\""
    );
    assert_eq!(eval_str("(Kernel/p :shown)"), ":shown");
}
