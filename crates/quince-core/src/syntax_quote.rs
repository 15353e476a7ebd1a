use std::collections::HashMap;

use crate::ast::{Form, FormKind, Span};
use crate::symbols::{Identifier, SymbolTable};

/// Rewrites one syntax-quoted form into the `concat`/`list` calls that build
/// it at runtime. A quoter lives for a single `` ` `` so every `x#` inside it
/// maps to the same gensym.
pub struct SyntaxQuoter<'a> {
    symbols: &'a SymbolTable,
    gensyms: HashMap<String, Identifier>,
}

impl<'a> SyntaxQuoter<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            gensyms: HashMap::new(),
        }
    }

    pub fn quote(&mut self, form: &Form) -> Result<Form, String> {
        let span = form.span;
        match &form.kind {
            FormKind::List(items) => {
                if form.is_call_to("unquote") {
                    return Ok(items.get(1).cloned().unwrap_or_else(|| Form::nil(span)));
                }
                if form.is_call_to("unquote-splicing") {
                    return Err("splicing unquote (~@) not in list".into());
                }
                self.quote_seq(items, span)
            }
            FormKind::Array(items) => self.apply_builder("array", items, span),
            FormKind::Set(items) => self.apply_builder("hash-set", items, span),
            FormKind::Hash(items) => self.apply_builder("hash", items, span),
            FormKind::Identifier(id) => {
                let name = id.name();
                let quoted = match name.strip_suffix('#') {
                    Some(prefix) if !prefix.is_empty() => self
                        .gensyms
                        .entry(name.to_string())
                        .or_insert_with(|| self.symbols.gensym(prefix))
                        .clone(),
                    _ => id.clone(),
                };
                Ok(self.call("quote", vec![Form::identifier(quoted, span)], span))
            }
            _ => Ok(form.clone()),
        }
    }

    fn quote_seq(&mut self, items: &[Form], span: Span) -> Result<Form, String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let part = if item.is_call_to("unquote") {
                let inner = item.as_list().and_then(|l| l.get(1)).cloned();
                self.call("list", vec![inner.unwrap_or_else(|| Form::nil(span))], span)
            } else if item.is_call_to("unquote-splicing") {
                let inner = item.as_list().and_then(|l| l.get(1)).cloned();
                inner.unwrap_or_else(|| Form::nil(span))
            } else {
                let quoted = self.quote(item)?;
                self.call("list", vec![quoted], span)
            };
            parts.push(part);
        }
        Ok(self.call("concat", parts, span))
    }

    fn apply_builder(&mut self, builder: &str, items: &[Form], span: Span) -> Result<Form, String> {
        let seq = self.quote_seq(items, span)?;
        let builder = Form::identifier(self.symbols.intern(builder), span);
        Ok(self.call("apply", vec![builder, seq], span))
    }

    fn call(&self, head: &str, mut args: Vec<Form>, span: Span) -> Form {
        args.insert(0, Form::identifier(self.symbols.intern(head), span));
        Form::list(args, span)
    }
}
