use std::borrow::Cow;

use tracing::trace;

use crate::ast::Form;
use crate::error::QuinceError;
use crate::runtime::RuntimeCtx;
use crate::value::Value;

/// Applies one rewrite to `form`: `.method` send sugar, `Class.`
/// constructor sugar, or a macro call. Returns the input borrowed when
/// nothing applies.
pub fn macroexpand_1<'f>(
    ctx: &RuntimeCtx,
    form: &'f Form,
    file: &str,
) -> Result<Cow<'f, Form>, QuinceError> {
    let Some(items) = form.as_list() else {
        return Ok(Cow::Borrowed(form));
    };
    let Some(head) = items.first().and_then(Form::as_identifier) else {
        return Ok(Cow::Borrowed(form));
    };
    if head.is_constant() {
        return Ok(Cow::Borrowed(form));
    }
    let name = head.name();
    let args = &items[1..];
    let symbols = ctx.symbols();
    let span = form.span;

    if name.len() > 1 && name != ".." && name.starts_with('.') {
        let Some((receiver, rest)) = args.split_first() else {
            return Err(QuinceError::compile(
                file,
                form.line(),
                "Too few arguments to send expression, expecting (.method receiver ...)",
            ));
        };
        let mut expanded = Vec::with_capacity(items.len() + 1);
        expanded.push(Form::identifier(symbols.intern("."), head_span(items)));
        expanded.push(receiver.clone());
        expanded.push(Form::identifier(symbols.intern(&name[1..]), head_span(items)));
        expanded.extend(rest.iter().cloned());
        return Ok(Cow::Owned(Form::list(expanded, span)));
    }

    if name.len() > 1 && name != ".." && name.ends_with('.') {
        let mut expanded = Vec::with_capacity(items.len() + 2);
        expanded.push(Form::identifier(symbols.intern("."), head_span(items)));
        expanded.push(Form::identifier(
            symbols.intern(&name[..name.len() - 1]),
            head_span(items),
        ));
        expanded.push(Form::identifier(symbols.intern("new"), head_span(items)));
        expanded.extend(args.iter().cloned());
        return Ok(Cow::Owned(Form::list(expanded, span)));
    }

    let Some(ns) = ctx.var_home(head) else {
        return Ok(Cow::Borrowed(form));
    };
    let var_name = head.unqualified_name();
    if !ns.is_macro(var_name) {
        return Ok(Cow::Borrowed(form));
    }
    let Some(macro_fn) = ns.lookup(var_name) else {
        return Ok(Cow::Borrowed(form));
    };
    trace!(macro_name = name, line = form.line(), "expanding macro");
    let arg_values: Vec<Value> = args.iter().map(Form::to_value).collect();
    let expanded = ctx
        .call_value(&macro_fn, arg_values)
        .and_then(|value| Form::from_value(&value, span))
        .map_err(|err| macro_failure(err, name, file, form.line()))?;
    Ok(Cow::Owned(expanded))
}

fn head_span(items: &[Form]) -> crate::ast::Span {
    items.first().map(|head| head.span).unwrap_or_default()
}

fn macro_failure(err: QuinceError, name: &str, file: &str, line: usize) -> QuinceError {
    match err {
        QuinceError::Interrupted => err,
        other => QuinceError::compile(
            file,
            line,
            format!("Error while expanding macro '{}': {}", name, other),
        ),
    }
}

/// Expands `form` until no rewrite applies. Gives up with a compile error
/// after the configured number of steps.
pub fn macroexpand<'f>(
    ctx: &RuntimeCtx,
    form: &'f Form,
    file: &str,
) -> Result<Cow<'f, Form>, QuinceError> {
    let limit = ctx.options().macroexpand_limit;
    let mut current = Cow::Borrowed(form);
    for _ in 0..limit {
        let next = match macroexpand_1(ctx, &current, file)? {
            Cow::Borrowed(_) => None,
            Cow::Owned(expanded) => Some(expanded),
        };
        match next {
            Some(expanded) => current = Cow::Owned(expanded),
            None => return Ok(current),
        }
    }
    Err(QuinceError::compile(
        file,
        form.line(),
        format!(
            "Macro expansion of {} did not finish after {} steps",
            form, limit
        ),
    ))
}
