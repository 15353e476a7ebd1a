use crate::error::QuinceError;
use crate::runtime::RuntimeCtx;
use crate::value::{Arity, Value};

/// Binds a native function in a namespace. The body must not capture its
/// environment; it receives the runtime and the evaluated arguments.
#[macro_export]
macro_rules! def_native {
    ($ns:expr, $name:expr, $arity:expr, |$ctx:ident, $args:ident| $body:expr) => {
        $ns.set_var(
            $name,
            $crate::builtins::core::native(
                $name,
                $arity,
                |$ctx: &$crate::runtime::RuntimeCtx,
                 $args: Vec<$crate::value::Value>|
                 -> Result<$crate::value::Value, $crate::error::QuinceError> { $body },
            ),
        );
    };
}

pub use def_native;

pub mod classes;
pub mod core;
pub mod methods;
pub mod numeric;

/// Binds the builtin classes under the root module and fills the core
/// namespace.
pub fn install(ctx: &RuntimeCtx) {
    for class in classes::classes().all() {
        ctx.root().const_set(class.name(), Value::Module(class.clone()));
    }
    core::install(ctx);
}

pub fn err<T>(msg: impl Into<String>) -> Result<T, QuinceError> {
    Err(QuinceError::runtime(msg))
}

/// `N`, `N+` or `N..M`, as used in arity errors.
pub fn arity_text(arity: Arity) -> String {
    match arity.max {
        None => format!("{}+", arity.min),
        Some(max) if max == arity.min => max.to_string(),
        Some(max) => format!("{}..{}", arity.min, max),
    }
}

pub fn check_arity(args: &[Value], arity: Arity) -> Result<(), QuinceError> {
    if arity.accepts(args.len()) {
        Ok(())
    } else {
        Err(QuinceError::arity(args.len(), arity_text(arity)))
    }
}

/// Name given as a symbol, string or identifier.
pub fn name_arg(value: &Value) -> Result<String, QuinceError> {
    match value {
        Value::Symbol(s) => Ok(s.to_string()),
        Value::String(s) => Ok(s.read().clone()),
        Value::Identifier(id) => Ok(id.name().to_string()),
        other => Err(QuinceError::type_error(format!(
            "{} is not a symbol nor a string",
            other
        ))),
    }
}

pub fn int_arg(value: &Value) -> Result<i64, QuinceError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(QuinceError::type_error(format!(
            "no implicit conversion of {} into Integer",
            other.type_name()
        ))),
    }
}
