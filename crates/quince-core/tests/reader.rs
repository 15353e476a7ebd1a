mod common;

use common::{eval, eval_err};
use quince_core::symbols::SymbolTable;
use quince_core::value::Value;
use quince_core::{read_string, Reader, ReaderOptions};

#[test]
fn interning_returns_the_same_identifier() {
    let table = SymbolTable::global();
    let a = table.intern("reader-test-name");
    let b = table.intern("reader-test-name");
    let c = table.intern("reader-test-other");
    assert!(a.same(&b));
    assert!(!a.same(&c));
}

#[test]
fn literals_print_back_as_read() {
    for src in ["42", "-7", "2.5", "\"hi\"", ":kw", "1/3", "nil", "true"] {
        assert_eq!(eval(src).to_string(), src);
    }
}

#[test]
fn quoted_structures_survive_print_and_read() {
    let value = eval("'(1 [2 3] {:a #{4}} \"s\")");
    let printed = value.to_string();
    assert_eq!(eval(&format!("'{}", printed)), value);
}

#[test]
fn empty_lists_share_one_instance() {
    for src in ["'()", "(list)", "(rest '(1))"] {
        match eval(src) {
            Value::List(list) => assert!(list.is_empty_singleton(), "{}", src),
            other => panic!("{} evaluated to {}", src, other),
        }
    }
}

#[test]
fn unterminated_forms_are_incomplete() {
    let err = read_string("(1 2", "r.qn", 3).unwrap_err();
    assert!(err.is_incomplete());
    assert!(err.to_string().starts_with("r.qn:3: "), "{}", err);
}

#[test]
fn stray_closers_are_plain_syntax_errors() {
    let err = read_string(")", "r.qn", 1).unwrap_err();
    assert!(!err.is_incomplete());
    assert!(err.to_string().starts_with("r.qn:1: "), "{}", err);
    assert!(eval_err("(+ 1 2))").to_string().starts_with("(test):1: "));
}

#[test]
fn reading_is_incremental() {
    let options = ReaderOptions::default()
        .with_source_name("inc.qn")
        .with_start_line(10);
    let mut reader = Reader::new_with_options("(a)\n\n(b c)", options);
    let first = reader.read_next().expect("read").expect("form");
    assert_eq!(first.line(), 10);
    let second = reader.read_next().expect("read").expect("form");
    assert_eq!(second.line(), 12);
    assert!(reader.read_next().expect("read").is_none());
}

#[test]
fn syntax_errors_stop_before_later_forms_run() {
    let ctx = quince_core::RuntimeCtx::new();
    let err = ctx.eval_source("(def a 1) (def b", "(test)", 1).unwrap_err();
    assert!(err.is_incomplete());
    assert_eq!(common::eval_in(&ctx, "a").to_string(), "1");
}
