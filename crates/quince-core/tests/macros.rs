mod common;

use common::{eval_err_str, eval_in, eval_str};
use quince_core::RuntimeCtx;

#[test]
fn send_sugar_expands_to_a_send_form() {
    assert_eq!(
        eval_str("(= (macroexpand '(.foo recv a b)) '(. recv foo a b))"),
        "true"
    );
    assert_eq!(
        eval_str("(= (macroexpand '(Klass. a b)) '(. Klass new a b))"),
        "true"
    );
}

#[test]
fn macroexpand_1_applies_a_single_step() {
    assert_eq!(
        eval_str("(macroexpand-1 '(defn f [x] x))"),
        "(def f (fn f [x] x))"
    );
    assert_eq!(eval_str("(macroexpand-1 '(+ 1 2))"), "(+ 1 2)");
}

#[test]
fn defmacro_defines_a_compile_time_rewrite() {
    let ctx = RuntimeCtx::new();
    eval_in(
        &ctx,
        "(defmacro unless [c & body] (list 'if c nil (concat '(do) body)))",
    );
    assert!(ctx.core().is_macro("unless"));
    assert_eq!(eval_in(&ctx, "(unless false 1 2)").to_string(), "2");
    assert_eq!(eval_in(&ctx, "(unless true 1 2)").to_string(), "nil");
    assert_eq!(
        eval_in(&ctx, "(macroexpand '(unless c x))").to_string(),
        "(if c nil (do x))"
    );
}

#[test]
fn macros_defined_earlier_in_a_source_apply_later_in_it() {
    assert_eq!(
        eval_str("(defmacro twice [x] (list 'do x x)) (def n 0) (twice (def n (inc n))) n"),
        "2"
    );
}

#[test]
fn special_forms_win_over_macros_of_the_same_name() {
    assert_eq!(
        eval_str("(defmacro let [& args] 42) (let [a 1] a)"),
        "1"
    );
    assert_eq!(
        eval_str("(defmacro if [& args] :macro) (if true :special :other)"),
        ":special"
    );
}

#[test]
fn macro_failures_name_the_macro_and_call_site() {
    assert_eq!(
        eval_err_str("(defmacro boom [] (Kernel/raise \"bad\"))\n(boom)"),
        "(test):2: Error while expanding macro 'boom': RuntimeError: bad"
    );
}

#[test]
fn inline_metadata_rewrites_direct_calls() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, "(def sq (fn [x] (* x x)))");
    assert_eq!(eval_in(&ctx, "(sq 4)").to_string(), "16");
    eval_in(
        &ctx,
        "(set-meta! 'sq {:inline (fn [x] ''inlined) :inline-arities (fn [n] (= n 1))})",
    );
    assert_eq!(eval_in(&ctx, "(sq 4)").to_string(), "inlined");
    let err = ctx.eval_source("(sq 4 5)", "(test)", 1).unwrap_err();
    assert_eq!(
        err.to_string(),
        "ArgumentError: wrong number of arguments (2 for 1)"
    );
}

#[test]
fn runaway_expansion_is_bounded() {
    let options = quince_core::EvalOptions {
        macroexpand_limit: 50,
        ..Default::default()
    };
    let ctx = RuntimeCtx::with_options(options);
    eval_in(&ctx, "(defmacro forever [] '(forever))");
    let err = ctx.eval_source("(forever)", "(test)", 1).unwrap_err();
    assert!(
        err.to_string().starts_with("(test):1: "),
        "unexpected error: {}",
        err
    );
}
