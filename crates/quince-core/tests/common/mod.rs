#![allow(dead_code)]

use quince_core::{format_error, QuinceError, RuntimeCtx, Value};

pub const FILE: &str = "(test)";

pub fn eval_in(ctx: &RuntimeCtx, src: &str) -> Value {
    ctx.eval_source(src, FILE, 1)
        .unwrap_or_else(|e| panic!("failed to eval {:?}: {}", src, format_error(&e)))
}

pub fn eval(src: &str) -> Value {
    eval_in(&RuntimeCtx::new(), src)
}

/// Printed (inspect) form of the result.
pub fn eval_str(src: &str) -> String {
    eval(src).to_string()
}

pub fn eval_err(src: &str) -> QuinceError {
    match RuntimeCtx::new().eval_source(src, FILE, 1) {
        Ok(value) => panic!("expected {:?} to fail, got {}", src, value),
        Err(err) => err,
    }
}

/// Error as the command line would print it, without the tag.
pub fn eval_err_str(src: &str) -> String {
    format_error(&eval_err(src))
}
