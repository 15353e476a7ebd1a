pub mod ast;
pub mod builtins;
pub mod error;
pub mod fn_form;
pub mod interrupt;
pub mod macroexpand;
pub mod namespace;
pub mod options;
pub mod reader;
pub mod runtime;
pub mod scope;
mod short_fn;
pub mod special_forms;
pub mod symbols;
mod syntax_quote;
pub mod try_form;
pub mod value;
pub mod vm;

pub use error::{format_error, QuinceError, ERROR_TAG, WARN_TAG};
pub use options::EvalOptions;
pub use reader::{read_string, Reader, ReaderOptions};
pub use runtime::{with_eval_stack, CompiledUnit, RuntimeCtx};
pub use value::Value;

/// Evaluates `code` in a fresh runtime.
pub fn eval_source(code: &str, options: Option<EvalOptions>) -> Result<Value, QuinceError> {
    let ctx = RuntimeCtx::with_options(options.unwrap_or_default());
    ctx.eval(code)
}
