use std::cmp::Ordering;
use std::io::Write;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{Form, Span};
use crate::builtins::numeric;
use crate::builtins::{err, name_arg};
use crate::error::QuinceError;
use crate::macroexpand::{macroexpand, macroexpand_1};
use crate::namespace::{find_or_create, NamespaceRef};
use crate::runtime::RuntimeCtx;
use crate::value::{Arity, HashTable, List, NativeFn, NativeFnPtr, Value};

/// Wraps a Rust function as a callable value.
pub fn native(name: &'static str, arity: Arity, func: NativeFnPtr) -> Value {
    Value::Native(Arc::new(NativeFn { name, arity, func }))
}

fn macro_meta() -> Value {
    let mut meta = HashTable::new();
    meta.insert(Value::symbol("macro"), Value::Bool(true));
    Value::hash(meta)
}

fn mark_macro(ns: &NamespaceRef, name: &str) {
    // The var was bound just above, so this cannot miss.
    let _ = ns.set_meta(name, macro_meta());
}

fn ident(ctx: &RuntimeCtx, name: &str) -> Value {
    Value::Identifier(ctx.symbols().intern(name))
}

fn seq_arg(fname: &str, value: &Value) -> Result<Vec<Value>, QuinceError> {
    value.seq_items().ok_or_else(|| {
        QuinceError::type_error(format!(
            "{}: {} is not a sequence",
            fname,
            value.type_name()
        ))
    })
}

fn as_list(fname: &str, value: &Value) -> Result<List, QuinceError> {
    match value {
        Value::List(list) => Ok(list.clone()),
        other => seq_arg(fname, other).map(List::from_vec),
    }
}

fn fold_numbers(
    args: &[Value],
    init: Value,
    op: fn(&Value, &Value) -> Result<Value, QuinceError>,
) -> Result<Value, QuinceError> {
    args.iter().try_fold(init, |acc, arg| op(&acc, arg))
}

fn chain_compare(args: &[Value], accept: fn(Ordering) -> bool) -> Result<Value, QuinceError> {
    for pair in args.windows(2) {
        if !accept(numeric::compare(&pair[0], &pair[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn all_equal(args: &[Value]) -> bool {
    args.windows(2).all(|pair| numeric::num_eq(&pair[0], &pair[1]))
}

fn write_stdout(text: &str) -> Result<Value, QuinceError> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .map_err(|e| QuinceError::io("<stdout>", e))?;
    Ok(Value::Nil)
}

fn namespace_path(value: &Value) -> Result<Vec<String>, QuinceError> {
    let name = match value {
        Value::Namespace(ns) => ns.name().to_string(),
        other => name_arg(other)?,
    };
    if name.is_empty() {
        return err("in-ns expects a namespace name");
    }
    Ok(name.split("::").map(str::to_string).collect())
}

/// Namespace owning the var named by `value`: its qualifier when given,
/// otherwise wherever the name currently resolves, otherwise the current
/// namespace.
fn var_owner(ctx: &RuntimeCtx, value: &Value) -> Result<(NamespaceRef, String), QuinceError> {
    let name = name_arg(value)?;
    let id = ctx.symbols().intern(&name);
    let ns = ctx
        .var_home(&id)
        .unwrap_or_else(|| ctx.current_namespace());
    Ok((ns, id.unqualified_name().to_string()))
}

fn expand_value(
    ctx: &RuntimeCtx,
    value: &Value,
    once: bool,
) -> Result<Value, QuinceError> {
    let form = Form::from_value(value, Span::at_line(1))?;
    let file = ctx.options().source_name.clone();
    let expanded = if once {
        macroexpand_1(ctx, &form, &file)?
    } else {
        macroexpand(ctx, &form, &file)?
    };
    Ok(expanded.to_value())
}

pub(crate) fn install(ctx: &RuntimeCtx) {
    let core = ctx.core().clone();

    // --- Namespaces and vars ---
    def_native!(core, "in-ns", Arity::exactly(1), |ctx, args| {
        let names = namespace_path(&args[0])?;
        let ns = find_or_create(ctx.root(), &names)?;
        debug!(namespace = ns.name(), "switching namespace");
        ctx.set_current_namespace(ns.clone());
        Ok(Value::Namespace(ns))
    });
    def_native!(core, "set-meta!", Arity::exactly(2), |ctx, args| {
        let (ns, name) = var_owner(ctx, &args[0])?;
        ns.set_meta(&name, args[1].clone())?;
        Ok(args[1].clone())
    });
    def_native!(core, "meta", Arity::exactly(1), |ctx, args| {
        let (ns, name) = var_owner(ctx, &args[0])?;
        Ok(ns.metadata(&name).unwrap_or(Value::Nil))
    });

    // --- Macros ---
    def_native!(core, "ns", Arity::exactly(1), |ctx, args| {
        let quoted = Value::list(vec![ident(ctx, "quote"), args[0].clone()]);
        Ok(Value::list(vec![ident(ctx, "in-ns"), quoted]))
    });
    mark_macro(&core, "ns");
    def_native!(core, "defn", Arity::at_least(2), |ctx, args| {
        let name = args[0].clone();
        let mut fn_form = vec![ident(ctx, "fn"), name.clone()];
        fn_form.extend(args[1..].iter().cloned());
        Ok(Value::list(vec![ident(ctx, "def"), name, Value::list(fn_form)]))
    });
    mark_macro(&core, "defn");
    def_native!(core, "defmacro", Arity::at_least(2), |ctx, args| {
        let name = args[0].clone();
        let mut fn_form = vec![ident(ctx, "fn"), name.clone()];
        fn_form.extend(args[1..].iter().cloned());
        let quoted = Value::list(vec![ident(ctx, "quote"), name.clone()]);
        Ok(Value::list(vec![
            ident(ctx, "do"),
            Value::list(vec![ident(ctx, "def"), name, Value::list(fn_form)]),
            Value::list(vec![ident(ctx, "set-meta!"), quoted.clone(), macro_meta()]),
            quoted,
        ]))
    });
    mark_macro(&core, "defmacro");
    def_native!(core, "macroexpand-1", Arity::exactly(1), |ctx, args| {
        expand_value(ctx, &args[0], true)
    });
    def_native!(core, "macroexpand", Arity::exactly(1), |ctx, args| {
        expand_value(ctx, &args[0], false)
    });

    // --- Constructors ---
    def_native!(core, "list", Arity::at_least(0), |_ctx, args| Ok(Value::list(args)));
    def_native!(core, "array", Arity::at_least(0), |_ctx, args| Ok(Value::array(args)));
    def_native!(core, "hash-set", Arity::at_least(0), |_ctx, args| Ok(Value::set(args)));
    def_native!(core, "hash", Arity::at_least(0), |_ctx, args| {
        if args.len() % 2 != 0 {
            return Err(QuinceError::argument_error(
                "hash expects an even number of arguments",
            ));
        }
        let mut table = HashTable::new();
        let mut items = args.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            table.insert(key, value);
        }
        Ok(Value::hash(table))
    });
    def_native!(core, "concat", Arity::at_least(0), |_ctx, args| {
        let mut items = Vec::new();
        for arg in &args {
            items.extend(seq_arg("concat", arg)?);
        }
        Ok(Value::list(items))
    });
    def_native!(core, "apply", Arity::at_least(2), |ctx, args| {
        let mut args = args;
        let callee = args.remove(0);
        let spread = args.pop().unwrap_or(Value::Nil);
        args.extend(seq_arg("apply", &spread)?);
        ctx.call_value(&callee, args)
    });
    def_native!(core, "identifier", Arity::exactly(1), |ctx, args| {
        let name = name_arg(&args[0])?;
        Ok(Value::Identifier(ctx.symbols().intern(&name)))
    });
    def_native!(core, "gensym", Arity::range(0, 1), |ctx, args| {
        let prefix = match args.as_slice() {
            [] => "g".to_string(),
            [prefix] => name_arg(prefix)?,
            _ => return err("gensym expects zero or one argument"),
        };
        Ok(Value::Identifier(ctx.symbols().gensym(&prefix)))
    });

    // --- Arithmetic ---
    def_native!(core, "+", Arity::at_least(0), |_ctx, args| {
        fold_numbers(&args, Value::Int(0), numeric::add)
    });
    def_native!(core, "*", Arity::at_least(0), |_ctx, args| {
        fold_numbers(&args, Value::Int(1), numeric::mul)
    });
    def_native!(core, "-", Arity::at_least(1), |_ctx, args| match args.as_slice() {
        [x] => numeric::negate(x),
        [first, rest @ ..] => fold_numbers(rest, first.clone(), numeric::sub),
        [] => err("- expects at least one number"),
    });
    def_native!(core, "/", Arity::at_least(1), |_ctx, args| match args.as_slice() {
        [x] => numeric::div(&Value::Int(1), x),
        [first, rest @ ..] => fold_numbers(rest, first.clone(), numeric::div),
        [] => err("/ expects at least one number"),
    });
    def_native!(core, "mod", Arity::exactly(2), |_ctx, args| {
        numeric::rem(&args[0], &args[1])
    });
    def_native!(core, "inc", Arity::exactly(1), |_ctx, args| {
        numeric::add(&args[0], &Value::Int(1))
    });
    def_native!(core, "dec", Arity::exactly(1), |_ctx, args| {
        numeric::sub(&args[0], &Value::Int(1))
    });

    // --- Comparison ---
    def_native!(core, "=", Arity::at_least(1), |_ctx, args| Ok(Value::Bool(all_equal(&args))));
    def_native!(core, "not=", Arity::at_least(1), |_ctx, args| {
        Ok(Value::Bool(!all_equal(&args)))
    });
    def_native!(core, "<", Arity::at_least(1), |_ctx, args| {
        chain_compare(&args, Ordering::is_lt)
    });
    def_native!(core, ">", Arity::at_least(1), |_ctx, args| {
        chain_compare(&args, Ordering::is_gt)
    });
    def_native!(core, "<=", Arity::at_least(1), |_ctx, args| {
        chain_compare(&args, Ordering::is_le)
    });
    def_native!(core, ">=", Arity::at_least(1), |_ctx, args| {
        chain_compare(&args, Ordering::is_ge)
    });
    def_native!(core, "not", Arity::exactly(1), |_ctx, args| {
        Ok(Value::Bool(!args[0].is_truthy()))
    });
    def_native!(core, "nil?", Arity::exactly(1), |_ctx, args| Ok(Value::Bool(args[0].is_nil())));
    def_native!(core, "identity", Arity::exactly(1), |_ctx, args| {
        Ok(args.into_iter().next().unwrap_or(Value::Nil))
    });

    // --- Sequences ---
    def_native!(core, "first", Arity::exactly(1), |_ctx, args| match &args[0] {
        Value::List(list) => Ok(list.first().cloned().unwrap_or(Value::Nil)),
        other => Ok(seq_arg("first", other)?.into_iter().next().unwrap_or(Value::Nil)),
    });
    def_native!(core, "rest", Arity::exactly(1), |_ctx, args| {
        Ok(Value::List(as_list("rest", &args[0])?.rest()))
    });
    def_native!(core, "next", Arity::exactly(1), |_ctx, args| {
        let rest = as_list("next", &args[0])?.rest();
        Ok(if rest.is_empty() { Value::Nil } else { Value::List(rest) })
    });
    def_native!(core, "cons", Arity::exactly(2), |_ctx, args| {
        let tail = as_list("cons", &args[1])?;
        Ok(Value::List(List::cons(args[0].clone(), tail)))
    });
    def_native!(core, "count", Arity::exactly(1), |_ctx, args| match &args[0] {
        Value::String(s) => Ok(Value::Int(s.read().chars().count() as i64)),
        Value::List(list) => Ok(Value::Int(list.len() as i64)),
        other => Ok(Value::Int(seq_arg("count", other)?.len() as i64)),
    });
    def_native!(core, "seq", Arity::exactly(1), |_ctx, args| {
        let list = as_list("seq", &args[0])?;
        Ok(if list.is_empty() { Value::Nil } else { Value::List(list) })
    });

    // --- Strings and output ---
    def_native!(core, "str", Arity::at_least(0), |_ctx, args| {
        Ok(Value::string(
            args.iter().map(Value::to_display_string).collect::<String>(),
        ))
    });
    def_native!(core, "println", Arity::at_least(0), |_ctx, args| {
        let rendered: Vec<String> = args.iter().map(Value::to_display_string).collect();
        write_stdout(&format!("{}\n", rendered.join(" ")))
    });
    def_native!(core, "print", Arity::at_least(0), |_ctx, args| {
        let rendered: Vec<String> = args.iter().map(Value::to_display_string).collect();
        write_stdout(&rendered.join(" "))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(ctx: &RuntimeCtx, src: &str) -> Value {
        ctx.eval_source(src, "(test)", 1).expect("eval")
    }

    #[test]
    fn arithmetic_folds_left() {
        let ctx = RuntimeCtx::new();
        assert_eq!(eval(&ctx, "(+)"), Value::Int(0));
        assert_eq!(eval(&ctx, "(- 10 1 2)"), Value::Int(7));
        assert_eq!(eval(&ctx, "(- 3)"), Value::Int(-3));
        assert_eq!(eval(&ctx, "(* 2 3 4)"), Value::Int(24));
        assert_eq!(eval(&ctx, "(< 1 2 3)"), Value::Bool(true));
        assert_eq!(eval(&ctx, "(< 1 3 2)"), Value::Bool(false));
        assert_eq!(eval(&ctx, "(= 1 1.0)"), Value::Bool(true));
    }

    #[test]
    fn sequence_functions() {
        let ctx = RuntimeCtx::new();
        assert_eq!(eval(&ctx, "(first [1 2])"), Value::Int(1));
        assert_eq!(eval(&ctx, "(first nil)"), Value::Nil);
        assert_eq!(eval(&ctx, "(rest '(1 2 3))").to_string(), "(2 3)");
        assert_eq!(eval(&ctx, "(next [1])"), Value::Nil);
        assert_eq!(eval(&ctx, "(cons 0 [1 2])").to_string(), "(0 1 2)");
        assert_eq!(eval(&ctx, "(count \"héllo\")"), Value::Int(5));
        assert_eq!(eval(&ctx, "(seq [])"), Value::Nil);
        assert_eq!(eval(&ctx, "(concat [1] '(2) nil [3])").to_string(), "(1 2 3)");
        assert_eq!(eval(&ctx, "(apply + 1 2 [3 4])"), Value::Int(10));
        assert_eq!(eval(&ctx, "(str \"a\" 1 nil :b)").to_string(), "\"a1b\"");
    }

    #[test]
    fn hash_requires_pairs() {
        let ctx = RuntimeCtx::new();
        let err = ctx.eval_source("(hash 1)", "(test)", 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ArgumentError: hash expects an even number of arguments"
        );
    }

    #[test]
    fn core_macros_are_marked() {
        let ctx = RuntimeCtx::new();
        for name in ["ns", "defn", "defmacro"] {
            assert!(ctx.core().is_macro(name), "{} should be a macro", name);
        }
        assert!(!ctx.core().is_macro("list"));
        assert!(ctx.core().is_fn("list"));
    }
}
