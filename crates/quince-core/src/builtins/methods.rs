use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::Arc;

use tracing::trace;

use crate::builtins::classes::classes;
use crate::builtins::numeric;
use crate::builtins::{check_arity, int_arg, name_arg};
use crate::error::QuinceError;
use crate::namespace::NamespaceRef;
use crate::runtime::RuntimeCtx;
use crate::value::{
    Arity, ArrayRef, BoundMethod, Builtin, ExceptionObject, HashRef, HashTable, List, ModuleRef,
    RegexValue, StrRef, Value,
};

type MethodResult = Result<Option<Value>, QuinceError>;

fn found(value: Value) -> MethodResult {
    Ok(Some(value))
}

fn int(n: usize) -> Value {
    Value::Int(n as i64)
}

fn no_block(name: &str) -> QuinceError {
    QuinceError::argument_error(format!("no block given to '{}'", name))
}

fn require_block<'b>(block: Option<&'b Value>, name: &str) -> Result<&'b Value, QuinceError> {
    block.ok_or_else(|| no_block(name))
}

fn string_arg(value: &Value) -> Result<String, QuinceError> {
    value.as_str().ok_or_else(|| {
        QuinceError::type_error(format!(
            "no implicit conversion of {} into String",
            value.type_name()
        ))
    })
}

/// Ordering used by `sort`, `min`, `max` and `<=>`.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, QuinceError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.read().as_str().cmp(y.read().as_str())),
        (Value::Symbol(x), Value::Symbol(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.read().clone(), y.read().clone());
            for (p, q) in x.iter().zip(y.iter()) {
                let ordering = compare_values(p, q)?;
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ if numeric::is_number(a) && numeric::is_number(b) => numeric::compare(a, b),
        _ => Err(QuinceError::argument_error(format!(
            "comparison of {} with {} failed",
            a.type_name(),
            b
        ))),
    }
}

/// Largest string, in bytes, that `String#*` builds.
const MAX_STRING_BYTES: usize = 1 << 28;
/// Largest array that `Array.new` and `Array#[]=` grow to.
const MAX_ARRAY_LEN: usize = 1 << 24;

/// Normalizes an index that may count from the end.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Sends `name` to `receiver`. Receivers dispatch on their builtin class
/// first, then fall back to the methods every object answers.
pub fn send(
    ctx: &RuntimeCtx,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    block: Option<Value>,
) -> Result<Value, QuinceError> {
    trace!(method = name, receiver = receiver.type_name(), "send");
    let block = block.as_ref();
    let handled = match receiver {
        Value::Int(_) | Value::Float(_) | Value::Rational(_) => {
            number_method(ctx, receiver, name, &args, block)?
        }
        Value::String(s) => string_method(s, name, &args)?,
        Value::Symbol(s) => symbol_method(s, name, &args)?,
        Value::Regex(r) => regex_method(r, name, &args)?,
        Value::Identifier(id) => match name {
            "name" | "to_s" => found(Value::string(id.name())),
            "to_sym" => found(Value::symbol(id.name())),
            "constant?" => found(Value::Bool(id.is_constant())),
            "qualified?" => found(Value::Bool(id.is_qualified())),
            "namespace" => found(id.namespace_part().map_or(Value::Nil, Value::string)),
            "unqualified_name" => found(Value::string(id.unqualified_name())),
            _ => Ok(None),
        }?,
        Value::Array(items) => array_method(ctx, receiver, items, name, &args, block)?,
        Value::Hash(table) => hash_method(ctx, receiver, table, name, &args, block)?,
        Value::Set(set) => set_method(ctx, set, name, &args, block)?,
        Value::List(list) => list_method(ctx, list, name, &args, block)?,
        Value::Function(_) | Value::Native(_) | Value::Method(_) => {
            proc_method(ctx, receiver, name, args.clone(), block)?
        }
        Value::Module(module) => module_method(module, name, &args)?,
        Value::Exception(exc) => match name {
            "message" | "to_s" => found(Value::string(exc.message())),
            "full_message" => found(Value::string(exc.to_string())),
            "location" => found(exc.location().map_or(Value::Nil, |(file, line)| {
                Value::string(format!("{}:{}", file, line))
            })),
            _ => Ok(None),
        }?,
        Value::Namespace(ns) => namespace_method(ns, name, &args)?,
        Value::Nil => match name {
            "to_s" => found(Value::string("")),
            "to_a" => found(Value::array(Vec::new())),
            "nil?" => found(Value::Bool(true)),
            _ => Ok(None),
        }?,
        Value::Bool(b) => match (name, args.as_slice()) {
            ("&", [other]) => found(Value::Bool(*b && other.is_truthy())),
            ("|", [other]) => found(Value::Bool(*b || other.is_truthy())),
            ("^", [other]) => found(Value::Bool(*b != other.is_truthy())),
            _ => Ok(None),
        }?,
    };
    if let Some(value) = handled {
        return Ok(value);
    }
    if let Some(value) = object_method(ctx, receiver, name, args, block)? {
        return Ok(value);
    }
    Err(QuinceError::no_method_error(format!(
        "undefined method '{}' for {}:{}",
        name,
        receiver,
        classes().class_of(receiver).name()
    )))
}

fn object_method(
    ctx: &RuntimeCtx,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    block: Option<&Value>,
) -> MethodResult {
    match (name, args.as_slice()) {
        ("class", []) => found(Value::Module(classes().class_of(receiver))),
        ("inspect", []) => found(Value::string(receiver.to_string())),
        ("to_s", []) => found(Value::string(receiver.to_display_string())),
        ("==", [other]) | ("eql?", [other]) => found(Value::Bool(receiver == other)),
        ("!=", [other]) => found(Value::Bool(receiver != other)),
        ("===", [other]) => found(Value::Bool(numeric::num_eq(receiver, other))),
        ("equal?", [other]) => found(Value::Bool(same_object(receiver, other))),
        ("!", []) => found(Value::Bool(!receiver.is_truthy())),
        ("nil?", []) => found(Value::Bool(false)),
        ("is_a?", [Value::Module(class)]) | ("kind_of?", [Value::Module(class)]) => {
            found(Value::Bool(classes().is_a(receiver, class)))
        }
        ("instance_of?", [Value::Module(class)]) => {
            found(Value::Bool(Arc::ptr_eq(&classes().class_of(receiver), class)))
        }
        ("hash", []) => {
            let mut hasher = DefaultHasher::new();
            receiver.hash(&mut hasher);
            found(Value::Int(hasher.finish() as i64))
        }
        ("send", [method, ..]) | ("__send__", [method, ..]) => {
            let method = name_arg(method)?;
            let rest = args[1..].to_vec();
            send(ctx, receiver, &method, rest, block.cloned()).map(Some)
        }
        ("tap", []) => {
            ctx.call_value(require_block(block, "tap")?, vec![receiver.clone()])?;
            found(receiver.clone())
        }
        _ => Ok(None),
    }
}

fn same_object(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Arc::ptr_eq(x, y),
        (Value::Array(x), Value::Array(y)) => Arc::ptr_eq(x, y),
        (Value::Hash(x), Value::Hash(y)) => Arc::ptr_eq(x, y),
        _ => a == b,
    }
}

fn number_method(
    ctx: &RuntimeCtx,
    receiver: &Value,
    name: &str,
    args: &[Value],
    block: Option<&Value>,
) -> MethodResult {
    let binary = |op: fn(&Value, &Value) -> Result<Value, QuinceError>| -> MethodResult {
        check_arity(args, Arity::exactly(1))?;
        op(receiver, &args[0]).map(Some)
    };
    let compare = |accept: fn(Ordering) -> bool| -> MethodResult {
        check_arity(args, Arity::exactly(1))?;
        Ok(Some(Value::Bool(accept(numeric::compare(receiver, &args[0])?))))
    };
    match name {
        "+" => binary(numeric::add),
        "-" => binary(numeric::sub),
        "*" => binary(numeric::mul),
        "/" => binary(numeric::div),
        "%" | "modulo" => binary(numeric::rem),
        "**" => binary(numeric::pow),
        "-@" => numeric::negate(receiver).map(Some),
        "<" => compare(Ordering::is_lt),
        ">" => compare(Ordering::is_gt),
        "<=" => compare(Ordering::is_le),
        ">=" => compare(Ordering::is_ge),
        "<=>" => {
            check_arity(args, Arity::exactly(1))?;
            match numeric::compare(receiver, &args[0]) {
                Ok(ordering) => found(Value::Int(ordering as i64)),
                Err(_) => found(Value::Nil),
            }
        }
        "==" | "===" => {
            check_arity(args, Arity::exactly(1))?;
            found(Value::Bool(numeric::num_eq(receiver, &args[0])))
        }
        "abs" => numeric::abs(receiver).map(Some),
        "to_i" | "truncate" => numeric::to_i64(receiver).map(|n| Some(Value::Int(n))),
        "to_f" => numeric::to_f64(receiver).map(|f| Some(Value::Float(f))),
        "floor" | "ceil" | "round" => {
            let f = numeric::to_f64(receiver)?;
            let rounded = match name {
                "floor" => f.floor(),
                "ceil" => f.ceil(),
                _ => f.round(),
            };
            numeric::to_i64(&Value::Float(rounded)).map(|n| Some(Value::Int(n)))
        }
        "zero?" => numeric::is_zero(receiver).map(|z| Some(Value::Bool(z))),
        "numerator" | "denominator" => match receiver {
            Value::Rational(r) => {
                found(Value::Int(if name == "numerator" { *r.numer() } else { *r.denom() }))
            }
            Value::Int(n) => found(Value::Int(if name == "numerator" { *n } else { 1 })),
            _ => Ok(None),
        },
        "even?" | "odd?" | "succ" | "next" | "pred" | "times" => {
            let Value::Int(n) = receiver else {
                return Ok(None);
            };
            match name {
                "even?" => found(Value::Bool(n % 2 == 0)),
                "odd?" => found(Value::Bool(n % 2 != 0)),
                "succ" | "next" => numeric::add(receiver, &Value::Int(1)).map(Some),
                "pred" => numeric::sub(receiver, &Value::Int(1)).map(Some),
                _ => {
                    let block = require_block(block, "times")?;
                    for i in 0..*n {
                        ctx.call_value(block, vec![Value::Int(i)])?;
                    }
                    found(receiver.clone())
                }
            }
        }
        _ => Ok(None),
    }
}

fn string_method(s: &StrRef, name: &str, args: &[Value]) -> MethodResult {
    match (name, args) {
        ("+", [other]) => {
            let other = string_arg(other)?;
            found(Value::string(format!("{}{}", s.read(), other)))
        }
        ("*", [count]) => {
            let count = int_arg(count)?;
            if count < 0 {
                return Err(QuinceError::argument_error("negative argument"));
            }
            let s = s.read();
            s.len()
                .checked_mul(count as usize)
                .filter(|total| *total <= MAX_STRING_BYTES)
                .ok_or_else(|| QuinceError::argument_error("argument too big"))?;
            found(Value::string(s.repeat(count as usize)))
        }
        ("<<", [other]) | ("concat", [other]) => {
            let other = other.to_display_string();
            s.write().push_str(&other);
            found(Value::String(s.clone()))
        }
        ("<=>", [Value::String(other)]) => {
            found(Value::Int(s.read().as_str().cmp(other.read().as_str()) as i64))
        }
        ("length", []) | ("size", []) => found(int(s.read().chars().count())),
        ("empty?", []) => found(Value::Bool(s.read().is_empty())),
        ("upcase", []) => found(Value::string(s.read().to_uppercase())),
        ("downcase", []) => found(Value::string(s.read().to_lowercase())),
        ("capitalize", []) => {
            let text = s.read();
            let mut chars = text.chars();
            let capitalized = match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            };
            found(Value::string(capitalized))
        }
        ("reverse", []) => found(Value::string(s.read().chars().rev().collect::<String>())),
        ("strip", []) => found(Value::string(s.read().trim())),
        ("chars", []) => found(Value::array(
            s.read().chars().map(|c| Value::string(c.to_string())).collect(),
        )),
        ("to_s", []) | ("to_str", []) => found(Value::String(s.clone())),
        ("dup", []) => found(Value::string(s.read().clone())),
        ("to_sym", []) => found(Value::symbol(&s.read())),
        ("to_i", []) => {
            let text = s.read();
            let trimmed = text.trim_start();
            let digits: String = trimmed
                .char_indices()
                .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
                .map(|(_, c)| c)
                .collect();
            found(Value::Int(digits.parse().unwrap_or(0)))
        }
        ("to_f", []) => found(Value::Float(s.read().trim().parse().unwrap_or(0.0))),
        ("include?", [other]) => found(Value::Bool(s.read().contains(&string_arg(other)?))),
        ("start_with?", [other]) => {
            found(Value::Bool(s.read().starts_with(&string_arg(other)?)))
        }
        ("end_with?", [other]) => found(Value::Bool(s.read().ends_with(&string_arg(other)?))),
        ("index", [other]) => {
            let text = s.read();
            let needle = string_arg(other)?;
            found(
                text.find(&needle)
                    .map_or(Value::Nil, |byte| int(text[..byte].chars().count())),
            )
        }
        ("[]", [index]) => {
            let text = s.read();
            let len = text.chars().count();
            found(
                resolve_index(int_arg(index)?, len)
                    .and_then(|i| text.chars().nth(i))
                    .map_or(Value::Nil, |c| Value::string(c.to_string())),
            )
        }
        ("split", []) => found(Value::array(
            s.read().split_whitespace().map(Value::string).collect(),
        )),
        ("split", [Value::Regex(re)]) => found(Value::array(
            re.regex().split(&s.read()).map(Value::string).collect(),
        )),
        ("split", [sep]) => {
            let sep = string_arg(sep)?;
            found(Value::array(s.read().split(sep.as_str()).map(Value::string).collect()))
        }
        ("=~", [Value::Regex(re)]) => found(regex_index(re, &s.read())),
        ("sub", [Value::Regex(re), replacement]) => found(Value::string(
            re.regex().replace(&s.read(), string_arg(replacement)?.as_str()),
        )),
        ("gsub", [Value::Regex(re), replacement]) => found(Value::string(
            re.regex().replace_all(&s.read(), string_arg(replacement)?.as_str()),
        )),
        ("sub", [pattern, replacement]) => found(Value::string(s.read().replacen(
            &string_arg(pattern)?,
            &string_arg(replacement)?,
            1,
        ))),
        ("gsub", [pattern, replacement]) => found(Value::string(
            s.read()
                .replace(&string_arg(pattern)?, &string_arg(replacement)?),
        )),
        _ => Ok(None),
    }
}

fn regex_index(re: &RegexValue, text: &str) -> Value {
    re.regex()
        .find(text)
        .map_or(Value::Nil, |m| int(text[..m.start()].chars().count()))
}

fn symbol_method(s: &Arc<str>, name: &str, args: &[Value]) -> MethodResult {
    match (name, args) {
        ("to_s", []) | ("name", []) | ("id2name", []) => found(Value::string(s.to_string())),
        ("to_sym", []) => found(Value::Symbol(s.clone())),
        ("to_proc", []) => found(Value::Method(Arc::new(BoundMethod {
            receiver: None,
            name: s.clone(),
        }))),
        ("length", []) | ("size", []) => found(int(s.chars().count())),
        ("<=>", [Value::Symbol(other)]) => found(Value::Int(s.cmp(other) as i64)),
        _ => Ok(None),
    }
}

fn regex_method(re: &RegexValue, name: &str, args: &[Value]) -> MethodResult {
    match (name, args) {
        ("match?", [text]) => found(Value::Bool(re.regex().is_match(&string_arg(text)?))),
        ("===", [Value::String(text)]) => found(Value::Bool(re.regex().is_match(&text.read()))),
        ("===", [_]) => found(Value::Bool(false)),
        ("=~", [text]) => found(regex_index(re, &string_arg(text)?)),
        ("match", [text]) => {
            let text = string_arg(text)?;
            found(re.regex().captures(&text).map_or(Value::Nil, |caps| {
                Value::array(
                    caps.iter()
                        .map(|m| m.map_or(Value::Nil, |m| Value::string(m.as_str())))
                        .collect(),
                )
            }))
        }
        ("source", []) => found(Value::string(re.source())),
        _ => Ok(None),
    }
}

fn call_with_item(ctx: &RuntimeCtx, block: &Value, item: Value) -> Result<Value, QuinceError> {
    ctx.call_value(block, vec![item])
}

fn map_items(ctx: &RuntimeCtx, block: &Value, items: Vec<Value>) -> Result<Vec<Value>, QuinceError> {
    items
        .into_iter()
        .map(|item| call_with_item(ctx, block, item))
        .collect()
}

fn filter_items(
    ctx: &RuntimeCtx,
    block: &Value,
    items: Vec<Value>,
    keep: bool,
) -> Result<Vec<Value>, QuinceError> {
    let mut out = Vec::new();
    for item in items {
        if call_with_item(ctx, block, item.clone())?.is_truthy() == keep {
            out.push(item);
        }
    }
    Ok(out)
}

fn sort_items(
    ctx: &RuntimeCtx,
    items: &mut [Value],
    block: Option<&Value>,
) -> Result<(), QuinceError> {
    let mut failure = None;
    items.sort_by(|a, b| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let ordering = match block {
            Some(block) => ctx
                .call_value(block, vec![a.clone(), b.clone()])
                .and_then(|n| int_arg(&n))
                .map(|n| n.cmp(&0)),
            None => compare_values(a, b),
        };
        ordering.unwrap_or_else(|e| {
            failure = Some(e);
            Ordering::Equal
        })
    });
    failure.map_or(Ok(()), Err)
}

fn extreme(items: Vec<Value>, want: Ordering) -> Result<Value, QuinceError> {
    let mut best: Option<Value> = None;
    for item in items {
        best = match best {
            Some(current) if compare_values(&item, &current)? != want => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.unwrap_or(Value::Nil))
}

fn reduce_items(
    ctx: &RuntimeCtx,
    items: Vec<Value>,
    init: Option<Value>,
    block: &Value,
) -> Result<Value, QuinceError> {
    let mut items = items.into_iter();
    let Some(mut acc) = init.or_else(|| items.next()) else {
        return Ok(Value::Nil);
    };
    for item in items {
        acc = ctx.call_value(block, vec![acc, item])?;
    }
    Ok(acc)
}

/// Block-taking methods shared by arrays, lists and sets. Results come back
/// as a plain vector or value; callers rewrap them in their own collection.
fn enumerable_method(
    ctx: &RuntimeCtx,
    items: Vec<Value>,
    name: &str,
    args: &[Value],
    block: Option<&Value>,
) -> Result<Option<Enumerated>, QuinceError> {
    let result = match (name, args) {
        ("map", []) | ("collect", []) => {
            Enumerated::Items(map_items(ctx, require_block(block, name)?, items)?)
        }
        ("each", []) => {
            let block = require_block(block, name)?;
            for item in items {
                call_with_item(ctx, block, item)?;
            }
            Enumerated::Receiver
        }
        ("each_with_index", []) => {
            let block = require_block(block, name)?;
            for (i, item) in items.into_iter().enumerate() {
                ctx.call_value(block, vec![item, int(i)])?;
            }
            Enumerated::Receiver
        }
        ("select", []) | ("filter", []) => {
            Enumerated::Items(filter_items(ctx, require_block(block, name)?, items, true)?)
        }
        ("reject", []) => {
            Enumerated::Items(filter_items(ctx, require_block(block, name)?, items, false)?)
        }
        ("reduce", []) | ("inject", []) => {
            Enumerated::Value(reduce_items(ctx, items, None, require_block(block, name)?)?)
        }
        ("reduce", [init]) | ("inject", [init]) => Enumerated::Value(reduce_items(
            ctx,
            items,
            Some(init.clone()),
            require_block(block, name)?,
        )?),
        ("find", []) | ("detect", []) => {
            let block = require_block(block, name)?;
            let mut hit = Value::Nil;
            for item in items {
                if call_with_item(ctx, block, item.clone())?.is_truthy() {
                    hit = item;
                    break;
                }
            }
            Enumerated::Value(hit)
        }
        ("any?", []) | ("all?", []) => {
            let mut answers = Vec::with_capacity(items.len());
            for item in items {
                let answer = match block {
                    Some(block) => call_with_item(ctx, block, item)?.is_truthy(),
                    None => item.is_truthy(),
                };
                answers.push(answer);
            }
            let result = if name == "any?" {
                answers.iter().any(|a| *a)
            } else {
                answers.iter().all(|a| *a)
            };
            Enumerated::Value(Value::Bool(result))
        }
        ("include?", [needle]) | ("member?", [needle]) => {
            Enumerated::Value(Value::Bool(items.iter().any(|item| numeric::num_eq(item, needle))))
        }
        ("count", []) => match block {
            Some(block) => Enumerated::Value(int(filter_items(ctx, block, items, true)?.len())),
            None => Enumerated::Value(int(items.len())),
        },
        ("count", [needle]) => Enumerated::Value(int(
            items.iter().filter(|item| numeric::num_eq(item, needle)).count(),
        )),
        ("length", []) | ("size", []) => Enumerated::Value(int(items.len())),
        ("empty?", []) => Enumerated::Value(Value::Bool(items.is_empty())),
        ("to_a", []) => Enumerated::Value(Value::array(items)),
        ("sort", []) => {
            let mut items = items;
            sort_items(ctx, &mut items, block)?;
            Enumerated::Items(items)
        }
        ("min", []) => Enumerated::Value(extreme(items, Ordering::Less)?),
        ("max", []) => Enumerated::Value(extreme(items, Ordering::Greater)?),
        ("sum", []) => {
            let mut total = Value::Int(0);
            for item in &items {
                total = numeric::add(&total, item)?;
            }
            Enumerated::Value(total)
        }
        ("join", []) | ("join", [_]) => {
            let sep = match args.first() {
                Some(sep) => string_arg(sep)?,
                None => String::new(),
            };
            let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
            Enumerated::Value(Value::string(parts.join(&sep)))
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

enum Enumerated {
    Items(Vec<Value>),
    Value(Value),
    Receiver,
}

fn array_method(
    ctx: &RuntimeCtx,
    receiver: &Value,
    items: &ArrayRef,
    name: &str,
    args: &[Value],
    block: Option<&Value>,
) -> MethodResult {
    let direct = match (name, args) {
        ("[]", [index]) | ("at", [index]) => {
            let items = items.read();
            Some(resolve_index(int_arg(index)?, items.len()).map_or(Value::Nil, |i| items[i].clone()))
        }
        ("fetch", [index]) => {
            let items = items.read();
            let n = int_arg(index)?;
            let i = resolve_index(n, items.len()).ok_or_else(|| {
                QuinceError::index_error(format!(
                    "index {} outside of array bounds: {}...{}",
                    n,
                    -(items.len() as i64),
                    items.len()
                ))
            })?;
            Some(items[i].clone())
        }
        ("[]=", [index, value]) => {
            let mut items = items.write();
            let n = int_arg(index)?;
            let i = if n < 0 {
                resolve_index(n, items.len()).ok_or_else(|| {
                    QuinceError::index_error(format!("index {} too small for array", n))
                })?
            } else if n as u64 >= MAX_ARRAY_LEN as u64 {
                return Err(QuinceError::index_error(format!("index {} too big", n)));
            } else {
                n as usize
            };
            if i >= items.len() {
                items.resize(i + 1, Value::Nil);
            }
            items[i] = value.clone();
            Some(value.clone())
        }
        ("first", []) => Some(items.read().first().cloned().unwrap_or(Value::Nil)),
        ("last", []) => Some(items.read().last().cloned().unwrap_or(Value::Nil)),
        ("first", [n]) | ("take", [n]) => {
            let n = usize::try_from(int_arg(n)?).unwrap_or(0);
            Some(Value::array(items.read().iter().take(n).cloned().collect()))
        }
        ("drop", [n]) => {
            let n = usize::try_from(int_arg(n)?).unwrap_or(0);
            Some(Value::array(items.read().iter().skip(n).cloned().collect()))
        }
        ("<<", [value]) => {
            items.write().push(value.clone());
            Some(receiver.clone())
        }
        ("push", values) | ("append", values) => {
            items.write().extend(values.iter().cloned());
            Some(receiver.clone())
        }
        ("pop", []) => Some(items.write().pop().unwrap_or(Value::Nil)),
        ("shift", []) => {
            let mut items = items.write();
            Some(if items.is_empty() { Value::Nil } else { items.remove(0) })
        }
        ("unshift", [value]) => {
            items.write().insert(0, value.clone());
            Some(receiver.clone())
        }
        ("concat", [other]) => {
            let extra = other.seq_items().ok_or_else(|| {
                QuinceError::type_error(format!(
                    "no implicit conversion of {} into Array",
                    other.type_name()
                ))
            })?;
            items.write().extend(extra);
            Some(receiver.clone())
        }
        ("+", [Value::Array(other)]) => {
            let mut joined = items.read().clone();
            joined.extend(other.read().iter().cloned());
            Some(Value::array(joined))
        }
        ("delete", [value]) => {
            let mut items = items.write();
            let before = items.len();
            items.retain(|item| item != value);
            Some(if items.len() < before { value.clone() } else { Value::Nil })
        }
        ("index", [value]) => Some(
            items
                .read()
                .iter()
                .position(|item| numeric::num_eq(item, value))
                .map_or(Value::Nil, int),
        ),
        ("reverse", []) => Some(Value::array(items.read().iter().rev().cloned().collect())),
        ("uniq", []) => {
            let mut seen = im::HashSet::new();
            let mut out = Vec::new();
            for item in items.read().iter() {
                if seen.insert(item.clone()).is_none() {
                    out.push(item.clone());
                }
            }
            Some(Value::array(out))
        }
        ("compact", []) => Some(Value::array(
            items.read().iter().filter(|v| !v.is_nil()).cloned().collect(),
        )),
        ("flatten", []) => {
            let mut out = Vec::new();
            flatten_into(&items.read(), &mut out);
            Some(Value::array(out))
        }
        ("dup", []) => Some(Value::array(items.read().clone())),
        ("to_a", []) => Some(receiver.clone()),
        ("to_list", []) => Some(Value::List(List::from_vec(items.read().clone()))),
        _ => None,
    };
    if direct.is_some() {
        return Ok(direct);
    }
    let snapshot = items.read().clone();
    Ok(
        enumerable_method(ctx, snapshot, name, args, block)?.map(|result| match result {
            Enumerated::Items(items) => Value::array(items),
            Enumerated::Value(value) => value,
            Enumerated::Receiver => receiver.clone(),
        }),
    )
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) => flatten_into(&inner.read(), out),
            other => out.push(other.clone()),
        }
    }
}

fn hash_method(
    ctx: &RuntimeCtx,
    receiver: &Value,
    table: &HashRef,
    name: &str,
    args: &[Value],
    block: Option<&Value>,
) -> MethodResult {
    let pairs = || -> Vec<(Value, Value)> { table.read().iter().cloned().collect() };
    match (name, args) {
        ("[]", [key]) => found(table.read().get(key).cloned().unwrap_or(Value::Nil)),
        ("[]=", [key, value]) | ("store", [key, value]) => {
            table.write().insert(key.clone(), value.clone());
            found(value.clone())
        }
        ("fetch", [key]) => table
            .read()
            .get(key)
            .cloned()
            .map(Some)
            .ok_or_else(|| QuinceError::key_error(format!("key not found: {}", key))),
        ("fetch", [key, default]) => {
            found(table.read().get(key).cloned().unwrap_or_else(|| default.clone()))
        }
        ("key?", [key]) | ("has_key?", [key]) | ("include?", [key]) | ("member?", [key]) => {
            found(Value::Bool(table.read().contains_key(key)))
        }
        ("keys", []) => found(Value::array(pairs().into_iter().map(|(k, _)| k).collect())),
        ("values", []) => found(Value::array(pairs().into_iter().map(|(_, v)| v).collect())),
        ("length", []) | ("size", []) | ("count", []) => found(int(table.read().len())),
        ("empty?", []) => found(Value::Bool(table.read().is_empty())),
        ("delete", [key]) => found(table.write().remove(key).unwrap_or(Value::Nil)),
        ("merge", [Value::Hash(other)]) => {
            let mut merged = table.read().clone();
            for (k, v) in other.read().iter() {
                merged.insert(k.clone(), v.clone());
            }
            found(Value::hash(merged))
        }
        ("dup", []) => found(Value::hash(table.read().clone())),
        ("to_a", []) => found(Value::array(
            pairs()
                .into_iter()
                .map(|(k, v)| Value::array(vec![k, v]))
                .collect(),
        )),
        ("each", []) => {
            let block = require_block(block, name)?;
            for (k, v) in pairs() {
                ctx.call_value(block, vec![k, v])?;
            }
            found(receiver.clone())
        }
        ("map", []) => {
            let block = require_block(block, name)?;
            let mut out = Vec::new();
            for (k, v) in pairs() {
                out.push(ctx.call_value(block, vec![k, v])?);
            }
            found(Value::array(out))
        }
        ("select", []) | ("filter", []) | ("reject", []) => {
            let block = require_block(block, name)?;
            let keep = name != "reject";
            let mut out = HashTable::new();
            for (k, v) in pairs() {
                if ctx.call_value(block, vec![k.clone(), v.clone()])?.is_truthy() == keep {
                    out.insert(k, v);
                }
            }
            found(Value::hash(out))
        }
        _ => Ok(None),
    }
}

/// Sets are persistent: updating methods return a new set.
fn set_method(
    ctx: &RuntimeCtx,
    set: &im::HashSet<Value>,
    name: &str,
    args: &[Value],
    block: Option<&Value>,
) -> MethodResult {
    let other_set = |value: &Value| -> Result<im::HashSet<Value>, QuinceError> {
        match value {
            Value::Set(other) => Ok(other.clone()),
            other => Ok(other
                .seq_items()
                .ok_or_else(|| {
                    QuinceError::type_error(format!("value must be a set, got {}", other.type_name()))
                })?
                .into_iter()
                .collect()),
        }
    };
    match (name, args) {
        ("include?", [item]) | ("member?", [item]) | ("contains?", [item]) => {
            found(Value::Bool(set.contains(item)))
        }
        ("add", [item]) | ("<<", [item]) => found(Value::Set(set.update(item.clone()))),
        ("delete", [item]) => found(Value::Set(set.without(item))),
        ("union", [other]) | ("|", [other]) => {
            found(Value::Set(set.clone().union(other_set(other)?)))
        }
        ("intersection", [other]) | ("&", [other]) => {
            found(Value::Set(set.clone().intersection(other_set(other)?)))
        }
        ("difference", [other]) | ("-", [other]) => {
            found(Value::Set(set.clone().relative_complement(other_set(other)?)))
        }
        ("subset?", [other]) => found(Value::Bool(set.is_subset(other_set(other)?))),
        _ => {
            let items: Vec<Value> = set.iter().cloned().collect();
            Ok(
                enumerable_method(ctx, items, name, args, block)?.map(|result| match result {
                    Enumerated::Items(items) => Value::set(items),
                    Enumerated::Value(value) => value,
                    Enumerated::Receiver => Value::Set(set.clone()),
                }),
            )
        }
    }
}

fn list_method(
    ctx: &RuntimeCtx,
    list: &List,
    name: &str,
    args: &[Value],
    block: Option<&Value>,
) -> MethodResult {
    match (name, args) {
        ("first", []) => found(list.first().cloned().unwrap_or(Value::Nil)),
        ("rest", []) => found(Value::List(list.rest())),
        ("last", []) => found(list.iter().last().cloned().unwrap_or(Value::Nil)),
        ("cons", [item]) => found(Value::List(List::cons(item.clone(), list.clone()))),
        ("[]", [index]) | ("nth", [index]) => found(
            resolve_index(int_arg(index)?, list.len())
                .and_then(|i| list.iter().nth(i).cloned())
                .unwrap_or(Value::Nil),
        ),
        ("reverse", []) => found(Value::List(
            list.iter()
                .fold(List::empty(), |acc, item| List::cons(item.clone(), acc)),
        )),
        ("to_list", []) => found(Value::List(list.clone())),
        _ => Ok(
            enumerable_method(ctx, list.to_vec(), name, args, block)?.map(|result| match result {
                Enumerated::Items(items) => Value::List(List::from_vec(items)),
                Enumerated::Value(value) => value,
                Enumerated::Receiver => Value::List(list.clone()),
            }),
        ),
    }
}

fn proc_arity(receiver: &Value) -> Value {
    let arity = match receiver {
        Value::Function(closure) => {
            let proto = &closure.proto;
            if proto.splat_index.is_some() || proto.required_args != proto.total_args {
                -(proto.required_args as i64) - 1
            } else {
                proto.required_args as i64
            }
        }
        Value::Native(native) if native.arity.max == Some(native.arity.min) => {
            native.arity.min as i64
        }
        Value::Native(native) => -(native.arity.min as i64) - 1,
        _ => -1,
    };
    Value::Int(arity)
}

fn proc_method(
    ctx: &RuntimeCtx,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    block: Option<&Value>,
) -> MethodResult {
    match name {
        "call" | "yield" | "()" | "[]" => {
            let block = block.cloned().unwrap_or(Value::Nil);
            ctx.call_with_block(receiver, args, block).map(Some)
        }
        "to_proc" => found(receiver.clone()),
        "arity" => found(proc_arity(receiver)),
        "name" => found(match receiver {
            Value::Function(closure) => closure.proto.name().map_or(Value::Nil, Value::string),
            Value::Native(native) => Value::string(native.name),
            Value::Method(method) => Value::string(method.name.to_string()),
            _ => Value::Nil,
        }),
        "doc" => found(match receiver {
            Value::Function(closure) => {
                closure.proto.doc.as_deref().map_or(Value::Nil, Value::string)
            }
            _ => Value::Nil,
        }),
        _ => Ok(None),
    }
}

fn instantiate(class: &ModuleRef, args: &[Value]) -> MethodResult {
    let c = classes();
    if class.is_subclass_of(&c.exception) {
        let message = match args {
            [] => class.name().to_string(),
            [message] => message.to_display_string(),
            _ => return Err(QuinceError::arity(args.len(), "0..1")),
        };
        return found(Value::Exception(ExceptionObject::new(class.clone(), message)));
    }
    match class.builtin() {
        Some(Builtin::Array) => match args {
            [] => found(Value::array(Vec::new())),
            [size] | [size, _] => {
                let size = usize::try_from(int_arg(size)?)
                    .map_err(|_| QuinceError::argument_error("negative array size"))?;
                if size > MAX_ARRAY_LEN {
                    return Err(QuinceError::argument_error("array size too big"));
                }
                let fill = args.get(1).cloned().unwrap_or(Value::Nil);
                found(Value::array(vec![fill; size]))
            }
            _ => Err(QuinceError::arity(args.len(), "0..2")),
        },
        Some(Builtin::Hash) => {
            check_arity(args, Arity::exactly(0))?;
            found(Value::hash(HashTable::new()))
        }
        Some(Builtin::String) => match args {
            [] => found(Value::string("")),
            [text] => found(Value::string(string_arg(text)?)),
            _ => Err(QuinceError::arity(args.len(), "0..1")),
        },
        Some(Builtin::Set) => found(Value::set(args.iter().cloned())),
        _ => Ok(None),
    }
}

fn kernel_method(name: &str, args: &[Value]) -> MethodResult {
    match name {
        "raise" => {
            let err = match args {
                [] => QuinceError::runtime("unhandled exception"),
                [Value::String(message)] => QuinceError::runtime(message.read().clone()),
                [Value::Exception(exc)] => QuinceError::Raised(exc.clone()),
                [Value::Module(class)] | [Value::Module(class), _]
                    if class.is_subclass_of(&classes().exception) =>
                {
                    let message = args
                        .get(1)
                        .map_or_else(|| class.name().to_string(), Value::to_display_string);
                    QuinceError::Raised(ExceptionObject::new(class.clone(), message))
                }
                _ => QuinceError::type_error("exception class/object expected"),
            };
            Err(err)
        }
        "puts" => {
            let mut out = String::new();
            if args.is_empty() {
                out.push('\n');
            }
            for arg in args {
                let lines = match arg {
                    Value::Array(items) => items.read().clone(),
                    other => vec![other.clone()],
                };
                for line in lines {
                    let text = line.to_display_string();
                    out.push_str(&text);
                    if !text.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
            write_out(&out)?;
            found(Value::Nil)
        }
        "print" => {
            let text: String = args.iter().map(Value::to_display_string).collect();
            write_out(&text)?;
            found(Value::Nil)
        }
        "p" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&arg.to_string());
                out.push('\n');
            }
            write_out(&out)?;
            found(match args {
                [] => Value::Nil,
                [single] => single.clone(),
                many => Value::array(many.to_vec()),
            })
        }
        _ => Ok(None),
    }
}

fn write_out(text: &str) -> Result<(), QuinceError> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .map_err(|e| QuinceError::io("<stdout>", e))
}

fn module_method(module: &ModuleRef, name: &str, args: &[Value]) -> MethodResult {
    if module.builtin() == Some(Builtin::Kernel) {
        if let Some(value) = kernel_method(name, args)? {
            return found(value);
        }
    }
    match (name, args) {
        ("new", _) => instantiate(module, args),
        ("name", []) | ("to_s", []) => found(Value::string(module.name())),
        ("===", [value]) => found(Value::Bool(classes().is_a(value, module))),
        ("<", [Value::Module(other)]) => found(Value::Bool(
            !Arc::ptr_eq(module, other) && module.is_subclass_of(other),
        )),
        ("<=", [Value::Module(other)]) => found(Value::Bool(module.is_subclass_of(other))),
        ("superclass", []) => found(
            module
                .superclass()
                .map_or(Value::Nil, |class| Value::Module(class.clone())),
        ),
        ("ancestors", []) => found(Value::array(
            module.ancestors().into_iter().map(Value::Module).collect(),
        )),
        ("const_get", [constant]) => {
            let constant = name_arg(constant)?;
            module.const_get(&constant).map(Some).ok_or_else(|| {
                QuinceError::name_error(format!("uninitialized constant {}", constant))
            })
        }
        ("constants", []) => found(Value::array(
            module
                .const_names()
                .iter()
                .map(|name| Value::symbol(name))
                .collect(),
        )),
        _ => Ok(None),
    }
}

fn namespace_method(ns: &NamespaceRef, name: &str, args: &[Value]) -> MethodResult {
    match (name, args) {
        ("name", []) | ("to_s", []) => found(Value::string(ns.name())),
        ("get", [var]) | ("get_var", [var]) => ns.get_var(&name_arg(var)?).map(Some),
        ("set", [var, value]) | ("set_var", [var, value]) => {
            ns.set_var(&name_arg(var)?, value.clone());
            found(value.clone())
        }
        ("has_var?", [var]) | ("var?", [var]) => found(Value::Bool(ns.has_var(&name_arg(var)?))),
        ("vars", []) => found(Value::array(
            ns.var_names().iter().map(|name| Value::symbol(name)).collect(),
        )),
        ("meta", [var]) => found(ns.metadata(&name_arg(var)?).unwrap_or(Value::Nil)),
        ("set_meta", [var, meta]) => {
            ns.set_meta(&name_arg(var)?, meta.clone())?;
            found(meta.clone())
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(receiver: Value, name: &str, args: Vec<Value>) -> Result<Value, QuinceError> {
        let ctx = RuntimeCtx::new();
        send(&ctx, &receiver, name, args, None)
    }

    #[test]
    fn numbers_answer_arithmetic() {
        assert_eq!(call(Value::Int(2), "+", vec![Value::Int(3)]).expect("+"), Value::Int(5));
        assert_eq!(
            call(Value::Int(2), "<=>", vec![Value::Int(3)]).expect("<=>"),
            Value::Int(-1)
        );
        assert_eq!(call(Value::Float(2.6), "round", vec![]).expect("round"), Value::Int(3));
    }

    #[test]
    fn arrays_mutate_in_place() {
        let array = Value::array(vec![Value::Int(1)]);
        call(array.clone(), "<<", vec![Value::Int(2)]).expect("push");
        assert_eq!(array.to_string(), "[1 2]");
        assert_eq!(call(array.clone(), "[]", vec![Value::Int(-1)]).expect("[]"), Value::Int(2));
        assert_eq!(call(array.clone(), "[]", vec![Value::Int(5)]).expect("[]"), Value::Nil);
        let err = call(array, "fetch", vec![Value::Int(5)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "IndexError: index 5 outside of array bounds: -2...2"
        );
    }

    #[test]
    fn oversized_strings_are_rejected() {
        let repeated = call(Value::string("ab"), "*", vec![Value::Int(3)]).expect("*");
        assert_eq!(repeated, Value::string("ababab"));
        for count in [i64::MAX, 1 << 40] {
            let err = call(Value::string("ab"), "*", vec![Value::Int(count)]).unwrap_err();
            assert_eq!(err.to_string(), "ArgumentError: argument too big");
        }
        let empty = call(Value::string(""), "*", vec![Value::Int(i64::MAX)]).expect("*");
        assert_eq!(empty, Value::string(""));
    }

    #[test]
    fn index_assignment_grows_within_bounds() {
        let array = Value::array(vec![Value::Int(1)]);
        call(array.clone(), "[]=", vec![Value::Int(3), Value::Int(4)]).expect("[]=");
        assert_eq!(array.to_string(), "[1 nil nil 4]");
        let err = call(array.clone(), "[]=", vec![Value::Int(i64::MAX), Value::Nil]).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("IndexError: index {} too big", i64::MAX)
        );
        assert_eq!(array.to_string(), "[1 nil nil 4]");

        let class = Value::Module(classes().array.clone());
        let err = call(class, "new", vec![Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.to_string(), "ArgumentError: array size too big");
    }

    #[test]
    fn unknown_methods_raise_no_method_error() {
        let err = call(Value::Int(1), "frobnicate", vec![]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "NoMethodError: undefined method 'frobnicate' for 1:Integer"
        );
        assert!(err
            .exception()
            .is_some_and(|exc| exc.is_a(&classes().name_error)));
    }

    #[test]
    fn exception_classes_instantiate() {
        let class = Value::Module(classes().type_error.clone());
        let exc = call(class.clone(), "new", vec![Value::string("bad")]).expect("new");
        assert_eq!(exc.to_string(), "#<TypeError: bad>");
        assert_eq!(
            call(class, "===", vec![exc]).expect("==="),
            Value::Bool(true)
        );
    }

    #[test]
    fn sorting_and_joining() {
        let array = Value::array(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let sorted = call(array, "sort", vec![]).expect("sort");
        assert_eq!(sorted.to_string(), "[1 2 3]");
        let joined = call(sorted, "join", vec![Value::string(",")]).expect("join");
        assert_eq!(joined, Value::string("1,2,3"));
        let err = call(
            Value::array(vec![Value::Int(1), Value::string("a")]),
            "sort",
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("ArgumentError: comparison of"));
    }

    #[test]
    fn kernel_raise_builds_exceptions() {
        let kernel = Value::Module(classes().kernel.clone());
        let err = call(
            kernel.clone(),
            "raise",
            vec![Value::Module(classes().key_error.clone()), Value::string("k")],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "KeyError: k");
        let err = call(kernel, "raise", vec![Value::string("plain")]).unwrap_err();
        assert_eq!(err.to_string(), "RuntimeError: plain");
    }
}
