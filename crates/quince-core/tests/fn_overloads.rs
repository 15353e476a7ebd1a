mod common;

use common::{eval_err, eval_err_str, eval_in, eval_str};
use quince_core::RuntimeCtx;

const OVERLOADED: &str = "(def f (fn ([] :zero) ([x] [:one x]) ([x y & more] [:many x y more])))";

#[test]
fn overload_selection_follows_argument_count() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, OVERLOADED);
    let table = [
        ("(f)", ":zero"),
        ("(f 1)", "[:one 1]"),
        ("(f 1 2)", "[:many 1 2 []]"),
        ("(f 1 2 3 4 5)", "[:many 1 2 [3 4 5]]"),
    ];
    for (call, expected) in table {
        assert_eq!(eval_in(&ctx, call).to_string(), expected, "{}", call);
    }
}

#[test]
fn gaps_between_overloads_raise_argument_error() {
    let err = eval_err("(def g (fn ([a] 1) ([a b c] 3))) (g 1 2)");
    assert_eq!(err.to_string(), "ArgumentError: No matching overload");
    assert_eq!(
        eval_err("(def g (fn ([a] 1) ([a b c] 3))) (g)").to_string(),
        "ArgumentError: wrong number of arguments (0 for 1..3)"
    );
}

#[test]
fn optional_arguments_take_defaults() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, "(def g (fn [a ? (b (* a 10))] [a b]))");
    assert_eq!(eval_in(&ctx, "(g 1)").to_string(), "[1 10]");
    assert_eq!(eval_in(&ctx, "(g 1 2)").to_string(), "[1 2]");
    let err = ctx.eval_source("(g)", "(test)", 1).unwrap_err();
    assert_eq!(
        err.to_string(),
        "ArgumentError: wrong number of arguments (0 for 1..2)"
    );
}

#[test]
fn rest_arguments_collect_surplus() {
    assert_eq!(eval_str("((fn [a & more] more) 1 2 3)"), "[2 3]");
    assert_eq!(eval_str("((fn [& more] more))"), "[]");
}

#[test]
fn named_functions_can_call_themselves() {
    assert_eq!(
        eval_str("(def fact (fn fact [n] (if (< n 2) 1 (* n (fact (dec n)))))) (fact 10)"),
        "3628800"
    );
}

#[test]
fn recur_targets_the_enclosing_overload() {
    assert_eq!(
        eval_str("(def down (fn [n] (if (= n 0) :done (recur (dec n))))) (down 100000)"),
        ":done"
    );
}

#[test]
fn defn_keeps_the_doc_string() {
    let ctx = RuntimeCtx::new();
    eval_in(&ctx, "(defn square \"Multiplies x by itself.\" [x] (* x x))");
    assert_eq!(eval_in(&ctx, "(square 7)").to_string(), "49");
    assert_eq!(
        eval_in(&ctx, "(. square doc)").to_string(),
        "\"Multiplies x by itself.\""
    );
    assert_eq!(eval_in(&ctx, "(. square name)").to_string(), "\"square\"");
}

#[test]
fn block_arguments_receive_the_passed_block() {
    assert_eq!(
        eval_str("(def twice (fn [x | f] (f (f x)))) (. twice call 3 | inc)"),
        "5"
    );
    assert_eq!(
        eval_str("(def has-block (fn [| b] (nil? b))) [(has-block) (. has-block call | inc)]"),
        "[true false]"
    );
}

#[test]
fn short_fn_literals() {
    assert_eq!(eval_str("(#(+ % 1) 2)"), "3");
    assert_eq!(eval_str("(. [1 2 3] map | #(* % %))"), "[1 4 9]");
}

#[test]
fn overlapping_overloads_are_compile_errors() {
    assert_eq!(
        eval_err_str("(fn ([& a] 1) ([& b] 2))"),
        "(test):1: Can't have more than one variadic overload"
    );
    assert_eq!(
        eval_err_str("(fn ([a & r] 1) ([a b c] 2))"),
        "(test):1: Can't have a fixed arity overload with more params than a variadic overload"
    );
}
