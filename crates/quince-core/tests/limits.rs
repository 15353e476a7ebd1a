mod common;

use common::{eval_in, FILE};
use quince_core::options::DEFAULT_MAX_DEPTH;
use quince_core::{
    format_error, read_string, with_eval_stack, EvalOptions, Reader, ReaderOptions, RuntimeCtx,
};

const COUNT_DOWN: &str = "(def f (fn f [n] (if (= n 0) 0 (+ 1 (f (dec n))))))";

fn limited(max_depth: usize) -> RuntimeCtx {
    RuntimeCtx::with_options(EvalOptions {
        max_depth,
        ..Default::default()
    })
}

fn failure(ctx: &RuntimeCtx, src: &str) -> String {
    match ctx.eval_source(src, FILE, 1) {
        Ok(value) => panic!("expected {:?} to fail, got {}", src, value),
        Err(err) => format_error(&err),
    }
}

fn on_eval_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    with_eval_stack(f).expect("spawn eval thread")
}

#[test]
fn non_tail_recursion_within_the_limit_completes() {
    let result = on_eval_stack(|| {
        let ctx = limited(DEFAULT_MAX_DEPTH);
        eval_in(&ctx, COUNT_DOWN);
        eval_in(&ctx, "(f 1500)").to_string()
    });
    assert_eq!(result, "1500");
}

#[test]
fn runaway_recursion_raises_system_stack_error() {
    let message = on_eval_stack(|| {
        let ctx = limited(DEFAULT_MAX_DEPTH);
        eval_in(&ctx, COUNT_DOWN);
        failure(&ctx, "(f 200000)")
    });
    assert_eq!(message, "(test):1: SystemStackError: stack level too deep");
}

#[test]
fn stack_errors_are_rescued_by_name_only() {
    let (rescued, bare, after, depth) = on_eval_stack(|| {
        let ctx = limited(50);
        eval_in(&ctx, COUNT_DOWN);
        let rescued = eval_in(
            &ctx,
            "(try (f 100) (rescue [e SystemStackError] (. e message)))",
        )
        .to_string();
        let bare = failure(&ctx, "(try (f 100) (rescue e :caught))");
        let after = eval_in(&ctx, "(f 40)").to_string();
        (rescued, bare, after, ctx.call_depth())
    });
    assert_eq!(rescued, "\"stack level too deep\"");
    assert_eq!(bare, "(test):1: SystemStackError: stack level too deep");
    assert_eq!(after, "40");
    assert_eq!(depth, 0);
}

#[test]
fn deeply_nested_source_is_a_syntax_error() {
    let (err, incomplete, shallow) = on_eval_stack(|| {
        let ctx = limited(30);
        let deep = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        let err = ctx.eval_source(&deep, FILE, 1).unwrap_err();
        let shallow = format!("{}1{}", "[".repeat(10), "]".repeat(10));
        (
            format_error(&err),
            err.is_incomplete(),
            eval_in(&ctx, &shallow).to_string(),
        )
    });
    assert_eq!(err, "(test):1: Form nested too deeply (max depth: 30)");
    assert!(!incomplete);
    assert_eq!(shallow, "[[[[[[[[[[1]]]]]]]]]]");
}

#[test]
fn reader_nesting_limit_counts_prefix_forms() {
    let options = ReaderOptions::default().with_max_depth(4);
    let mut reader = Reader::new_with_options("'''a", options.clone());
    assert!(reader.read_next().is_ok());
    let mut reader = Reader::new_with_options("''''a", options);
    let err = reader.read_next().unwrap_err();
    assert_eq!(err.to_string(), "(eval):1: Form nested too deeply (max depth: 4)");
}

#[test]
fn huge_nesting_fails_cleanly_with_default_limits() {
    let err = on_eval_stack(|| {
        let src = format!("{}{}", "(".repeat(20_000), ")".repeat(20_000));
        read_string(&src, "deep.qn", 1)
            .map(|forms| forms.len())
            .map_err(|err| err.to_string())
    });
    assert_eq!(
        err,
        Err(format!(
            "deep.qn:1: Form nested too deeply (max depth: {})",
            DEFAULT_MAX_DEPTH
        ))
    );
}

#[test]
fn macro_built_nesting_is_a_compile_error() {
    let (small, err) = on_eval_stack(|| {
        let ctx = limited(40);
        eval_in(
            &ctx,
            "(defmacro nest [n] (if (= n 0) 0 (list 'inc (list 'nest (dec n)))))",
        );
        let small = eval_in(&ctx, "(nest 5)").to_string();
        (small, failure(&ctx, "(nest 100)"))
    });
    assert_eq!(small, "5");
    assert_eq!(err, "(test):1: Form nested too deeply (max depth: 40)");
}
