mod common;

use common::{eval_err, eval_err_str, eval_in, eval_str};
use quince_core::RuntimeCtx;

#[test]
fn rescue_binds_the_exception() {
    assert_eq!(
        eval_str("(try (Kernel/raise ArgumentError \"boom\") (rescue [e ArgumentError] (. e message)))"),
        "\"boom\""
    );
    assert_eq!(
        eval_str("(try (/ 1 0) (rescue e (. e class)))"),
        "ZeroDivisionError"
    );
}

#[test]
fn try_without_an_exception_yields_the_body_value() {
    assert_eq!(eval_str("(try 1 2 (rescue e :rescued))"), "2");
}

#[test]
fn rescue_clauses_are_tried_in_order() {
    assert_eq!(
        eval_str(
            "(try (Kernel/raise KeyError \"k\")
               (rescue [e TypeError] :type)
               (rescue [e IndexError] :index)
               (rescue e :other))"
        ),
        ":index"
    );
    assert_eq!(
        eval_str("(try (Kernel/raise TypeError \"t\") (rescue [e ArgumentError TypeError] :either))"),
        ":either"
    );
}

#[test]
fn bare_rescue_only_catches_standard_errors() {
    let err = eval_err("(try (Kernel/raise Exception \"fatal\") (rescue e :caught))");
    assert_eq!(err.to_string(), "Exception: fatal");
}

#[test]
fn ensure_runs_exactly_once_on_every_path() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, "(def n 0)");
    eval_in(&ctx, "(try 1 (ensure (def n (inc n))))");
    assert_eq!(eval_in(&ctx, "n").to_string(), "1");
    eval_in(
        &ctx,
        "(try (Kernel/raise \"x\") (rescue e nil) (ensure (def n (inc n))))",
    );
    assert_eq!(eval_in(&ctx, "n").to_string(), "2");
    let err = ctx
        .eval_source("(try (Kernel/raise \"y\") (ensure (def n (inc n))))", "(test)", 1)
        .unwrap_err();
    assert_eq!(err.to_string(), "RuntimeError: y");
    assert_eq!(eval_in(&ctx, "n").to_string(), "3");
}

#[test]
fn inner_ensure_runs_before_outer_rescue() {
    assert_eq!(
        eval_str(
            "(def log [])
             (try
               (try (Kernel/raise TypeError \"t\")
                 (rescue [e ArgumentError] (.push log :wrong))
                 (ensure (.push log :inner-ensure)))
               (rescue [e TypeError] (.push log :outer-rescue)))
             log"
        ),
        "[:inner-ensure :outer-rescue]"
    );
}

#[test]
fn ensure_value_is_discarded() {
    assert_eq!(eval_str("(try :body (ensure :ensure))"), ":body");
    assert_eq!(
        eval_str("(try (Kernel/raise \"x\") (rescue e :rescued) (ensure :ensure))"),
        ":rescued"
    );
}

#[test]
fn exceptions_raised_in_functions_cross_frames() {
    assert_eq!(
        eval_str(
            "(def explode (fn [] (Kernel/raise ArgumentError \"deep\")))
             (try (explode) (rescue e (. e message)))"
        ),
        "\"deep\""
    );
}

#[test]
fn uncaught_exceptions_report_where_they_escaped() {
    assert_eq!(
        eval_err_str("(def a 1)\n(Kernel/raise \"nope\")"),
        "(test):2: RuntimeError: nope"
    );
}
