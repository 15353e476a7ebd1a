use std::fmt;

use num::rational::Rational64;
use regex::{Regex, RegexBuilder};

use crate::error::QuinceError;
use crate::symbols::Identifier;
use crate::value::{HashTable, List, RegexValue, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub index: usize,
}

impl Span {
    pub fn at_line(line: usize) -> Self {
        Self {
            line,
            col: 1,
            index: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RegexOptions {
    pub ignore_case: bool,
    pub extended: bool,
    pub multiline: bool,
}

impl RegexOptions {
    /// Option letters in reader order (`i`, `x`, `m`).
    pub fn letters(&self) -> String {
        let mut out = String::new();
        if self.ignore_case {
            out.push('i');
        }
        if self.extended {
            out.push('x');
        }
        if self.multiline {
            out.push('m');
        }
        out
    }

    pub fn build(&self, pattern: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(self.ignore_case)
            .ignore_whitespace(self.extended)
            .dot_matches_new_line(self.multiline)
            .build()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FormKind {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Rational(Rational64),
    String(String),
    Symbol(String),
    Regex {
        pattern: String,
        options: RegexOptions,
    },
    Identifier(Identifier),
    List(Vec<Form>),
    Array(Vec<Form>),
    /// Flattened `k v k v ...`.
    Hash(Vec<Form>),
    Set(Vec<Form>),
}

#[derive(Clone, Debug)]
pub struct Form {
    pub kind: FormKind,
    pub span: Span,
}

/// Spans are ignored.
impl PartialEq for Form {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Form {
    pub fn new(kind: FormKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn nil(span: Span) -> Self {
        Self::new(FormKind::Nil, span)
    }

    pub fn identifier(id: Identifier, span: Span) -> Self {
        Self::new(FormKind::Identifier(id), span)
    }

    pub fn list(items: Vec<Form>, span: Span) -> Self {
        Self::new(FormKind::List(items), span)
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    pub fn as_identifier(&self) -> Option<&Identifier> {
        match &self.kind {
            FormKind::Identifier(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_identifier_named(&self, name: &str) -> bool {
        self.as_identifier().is_some_and(|id| id.name() == name)
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::Array(items) => Some(items),
            _ => None,
        }
    }

    /// `(head arg)` where `head` names the given identifier.
    pub fn is_call_to(&self, name: &str) -> bool {
        self.as_list()
            .and_then(|items| items.first())
            .is_some_and(|head| head.is_identifier_named(name))
    }

    /// Converts this form into the runtime value it denotes when quoted.
    pub fn to_value(&self) -> Value {
        match &self.kind {
            FormKind::Nil => Value::Nil,
            FormKind::Bool(b) => Value::Bool(*b),
            FormKind::Int(n) => Value::Int(*n),
            FormKind::Float(f) => Value::Float(*f),
            FormKind::Rational(r) => Value::Rational(*r),
            FormKind::String(s) => Value::string(s.clone()),
            FormKind::Symbol(s) => Value::symbol(s),
            FormKind::Regex { pattern, options } => match RegexValue::new(pattern, *options) {
                Ok(regex) => Value::Regex(regex),
                Err(_) => Value::string(pattern.clone()),
            },
            FormKind::Identifier(id) => Value::Identifier(id.clone()),
            FormKind::List(items) => {
                Value::List(List::from_vec(items.iter().map(Form::to_value).collect()))
            }
            FormKind::Array(items) => Value::array(items.iter().map(Form::to_value).collect()),
            FormKind::Hash(items) => {
                let mut table = HashTable::new();
                for pair in items.chunks(2) {
                    if let [k, v] = pair {
                        table.insert(k.to_value(), v.to_value());
                    }
                }
                Value::hash(table)
            }
            FormKind::Set(items) => Value::set(items.iter().map(Form::to_value)),
        }
    }

    /// Converts a runtime value (typically a macro's return value) back into a
    /// form. Values with no source representation are rejected.
    pub fn from_value(value: &Value, span: Span) -> Result<Form, QuinceError> {
        let kind = match value {
            Value::Nil => FormKind::Nil,
            Value::Bool(b) => FormKind::Bool(*b),
            Value::Int(n) => FormKind::Int(*n),
            Value::Float(f) => FormKind::Float(*f),
            Value::Rational(r) => FormKind::Rational(*r),
            Value::String(s) => FormKind::String(s.read().clone()),
            Value::Symbol(s) => FormKind::Symbol(s.to_string()),
            Value::Regex(r) => FormKind::Regex {
                pattern: r.source().to_string(),
                options: r.options(),
            },
            Value::Identifier(id) => FormKind::Identifier(id.clone()),
            Value::List(list) => FormKind::List(
                list.iter()
                    .map(|v| Form::from_value(v, span))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Array(items) => FormKind::Array(
                items
                    .read()
                    .iter()
                    .map(|v| Form::from_value(v, span))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Hash(table) => {
                let table = table.read();
                let mut items = Vec::with_capacity(table.len() * 2);
                for (k, v) in table.iter() {
                    items.push(Form::from_value(k, span)?);
                    items.push(Form::from_value(v, span)?);
                }
                FormKind::Hash(items)
            }
            Value::Set(set) => FormKind::Set(
                set.iter()
                    .map(|v| Form::from_value(v, span))
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(QuinceError::type_error(format!(
                    "No form for value {} ({})",
                    other,
                    other.type_name()
                )))
            }
        };
        Ok(Form::new(kind, span))
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_compare_without_spans() {
        let a = Form::new(FormKind::Int(1), Span::at_line(1));
        let b = Form::new(FormKind::Int(1), Span::at_line(9));
        assert_eq!(a, b);
    }

    #[test]
    fn value_conversion_keeps_structure() {
        let id = Identifier::intern("x");
        let form = Form::list(
            vec![
                Form::identifier(id.clone(), Span::default()),
                Form::new(
                    FormKind::Hash(vec![
                        Form::new(FormKind::Symbol("a".into()), Span::default()),
                        Form::new(FormKind::Int(1), Span::default()),
                    ]),
                    Span::default(),
                ),
            ],
            Span::default(),
        );
        let back = Form::from_value(&form.to_value(), Span::default()).expect("convert");
        assert_eq!(back, form);
    }

    #[test]
    fn modules_have_no_form() {
        let value = Value::Module(crate::builtins::classes::classes().object.clone());
        let err = Form::from_value(&value, Span::default()).unwrap_err();
        assert!(err.to_string().contains("No form for value"));
    }
}
