use std::borrow::Cow;

use crate::ast::{Form, FormKind, Span};
use crate::error::QuinceError;
use crate::fn_form::{dispatch_plan, parse_fn, ArityShape, DispatchStep, FnDefinition};
use crate::macroexpand::macroexpand;
use crate::runtime::RuntimeCtx;
use crate::scope::{LocalReference, Scope, ScopeChain, VarRef};
use crate::special_forms::SpecialForm;
use crate::symbols::Identifier;
use crate::try_form::{parse_try, TryOutcome, TryRouting};
use crate::value::{List, RegexValue, Value};
use crate::vm::bytecode::{Chunk, FunctionPrototype};
use crate::vm::generator::Generator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailContext {
    Value,
    Tail,
}

/// Bytecode for one top-level form plus the slot count its frame needs.
#[derive(Debug)]
pub struct CompiledForm {
    pub chunk: Chunk,
    pub local_count: usize,
}

pub fn compile_toplevel(
    ctx: &RuntimeCtx,
    form: &Form,
    file: &str,
) -> Result<CompiledForm, QuinceError> {
    let mut compiler = Compiler::new(ctx, file);
    compiler.compile(form, TailContext::Value)?;
    compiler.gen.ret();
    let local_count = compiler.scopes.local_count();
    let chunk = compiler
        .gen
        .close()
        .map_err(|msg| QuinceError::compile(file, form.line(), msg))?;
    Ok(CompiledForm { chunk, local_count })
}

fn local(slot: usize) -> LocalReference {
    LocalReference { slot, depth: 0 }
}

pub struct Compiler<'a> {
    ctx: &'a RuntimeCtx,
    file: String,
    scopes: ScopeChain,
    gen: Generator,
    depth: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(ctx: &'a RuntimeCtx, file: &str) -> Self {
        Self {
            ctx,
            file: file.to_string(),
            scopes: ScopeChain::new(),
            gen: Generator::new(file),
            depth: 0,
        }
    }

    fn error<T>(&self, line: usize, message: impl Into<String>) -> Result<T, QuinceError> {
        Err(QuinceError::compile(&self.file, line, message))
    }

    fn intern(&self, name: &str) -> Identifier {
        self.ctx.symbols().intern(name)
    }

    pub fn compile(&mut self, form: &Form, tail: TailContext) -> Result<(), QuinceError> {
        let max_depth = self.ctx.options().max_depth;
        if self.depth >= max_depth {
            return self.error(
                form.line(),
                format!("Form nested too deeply (max depth: {})", max_depth),
            );
        }
        self.depth += 1;
        let result = self.compile_form(form, tail);
        self.depth -= 1;
        result
    }

    fn compile_form(&mut self, form: &Form, tail: TailContext) -> Result<(), QuinceError> {
        self.gen.set_span(form.span);
        match &form.kind {
            FormKind::Nil => self.gen.push_nil(),
            FormKind::Bool(b) => self.gen.push_literal(Value::Bool(*b)),
            FormKind::Int(n) => self.gen.push_literal(Value::Int(*n)),
            FormKind::Float(f) => self.gen.push_literal(Value::Float(*f)),
            FormKind::Rational(r) => self.gen.push_literal(Value::Rational(*r)),
            FormKind::String(s) => {
                self.gen.push_literal(Value::string(s.clone()));
                self.gen.string_dup();
            }
            FormKind::Symbol(s) => self.gen.push_literal(Value::symbol(s)),
            FormKind::Regex { pattern, options } => match RegexValue::new(pattern, *options) {
                Ok(regex) => self.gen.push_literal(Value::Regex(regex)),
                Err(err) => return self.error(form.line(), format!("Invalid regexp: {}", err)),
            },
            FormKind::Identifier(id) => self.compile_identifier(id),
            FormKind::List(items) => return self.compile_list(form, items, tail),
            FormKind::Array(items) => {
                self.compile_each(items)?;
                self.gen.make_array(items.len());
            }
            FormKind::Hash(items) => {
                self.compile_each(items)?;
                self.gen.make_hash(items.len() / 2);
            }
            FormKind::Set(items) => {
                self.compile_each(items)?;
                self.gen.make_set(items.len());
            }
        }
        Ok(())
    }

    fn compile_each(&mut self, forms: &[Form]) -> Result<(), QuinceError> {
        for form in forms {
            self.compile(form, TailContext::Value)?;
        }
        Ok(())
    }

    fn compile_const_path(&mut self, names: &[String]) {
        self.gen.push_const_top();
        for name in names {
            self.gen.find_const(name);
        }
    }

    fn qualifier_names(id: &Identifier) -> Vec<String> {
        id.namespace_part()
            .map(|ns| ns.split("::").map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn compile_identifier(&mut self, id: &Identifier) {
        if id.name() == "self" {
            self.gen.push_self();
        } else if id.is_constant() {
            self.compile_const_path(id.const_names());
        } else if id.is_qualified() {
            self.compile_const_path(&Self::qualifier_names(id));
            self.gen.namespace_get(id.unqualified_name());
        } else {
            match self.scopes.find_var(id) {
                VarRef::Local(reference) => self.gen.push_local(reference),
                VarRef::Namespace(_) => {
                    self.gen.push_current_namespace();
                    self.gen.namespace_get(id.name());
                }
            }
        }
    }

    fn compile_list(
        &mut self,
        form: &Form,
        items: &[Form],
        tail: TailContext,
    ) -> Result<(), QuinceError> {
        let Some(head) = items.first() else {
            self.gen.push_literal(Value::List(List::empty()));
            return Ok(());
        };
        let args = &items[1..];
        if let Some(special) = head.as_identifier().and_then(|id| SpecialForm::lookup(id.name())) {
            return self.compile_special(special, form, args, tail);
        }
        if let Cow::Owned(expanded) = macroexpand(self.ctx, form, &self.file)? {
            return self.compile(&expanded, tail);
        }
        self.gen.set_span(form.span);
        self.compile_call(form, head, args, tail)
    }

    fn compile_special(
        &mut self,
        special: SpecialForm,
        form: &Form,
        args: &[Form],
        tail: TailContext,
    ) -> Result<(), QuinceError> {
        match special {
            SpecialForm::Def => self.compile_def(form, args),
            SpecialForm::If => self.compile_if(form, args, tail),
            SpecialForm::Do => self.compile_do(form.span, args, tail),
            SpecialForm::Quote => self.compile_quote(form, args),
            SpecialForm::Let => self.compile_let(form, args, tail, "let"),
            SpecialForm::Loop => self.compile_let(form, args, TailContext::Tail, "loop"),
            SpecialForm::Recur => self.compile_recur(form, args, tail),
            SpecialForm::Fn => self.compile_fn(form, args),
            SpecialForm::Send => self.compile_send(form, args),
            SpecialForm::Try => self.compile_try(form, args).map(|_| ()),
        }
    }

    fn compile_call(
        &mut self,
        form: &Form,
        head: &Form,
        args: &[Form],
        tail: TailContext,
    ) -> Result<(), QuinceError> {
        if let Some(id) = head.as_identifier() {
            let is_global = id.name() != "self"
                && !id.is_constant()
                && !id.is_qualified()
                && matches!(self.scopes.find_var(id), VarRef::Namespace(_));
            if is_global {
                if let Some(expansion) = self.inline_expansion(form, id, args)? {
                    return self.compile(&expansion, tail);
                }
                let is_fn = self.ctx.var_home(id).is_some_and(|ns| ns.is_fn(id.name()));
                if is_fn {
                    self.compile_each(args)?;
                    self.gen.set_span(form.span);
                    self.gen.call_namespace_fn(id.name(), args.len());
                    return Ok(());
                }
            }
        }
        self.compile(head, TailContext::Value)?;
        self.compile_each(args)?;
        self.gen.set_span(form.span);
        self.gen.call(args.len());
        Ok(())
    }

    /// Expansion produced by a var's `:inline` function, when its optional
    /// `:inline-arities` predicate accepts this call.
    fn inline_expansion(
        &self,
        form: &Form,
        id: &Identifier,
        args: &[Form],
    ) -> Result<Option<Form>, QuinceError> {
        let Some(ns) = self.ctx.var_home(id) else {
            return Ok(None);
        };
        let Some(inliner) = ns.meta_entry(id.name(), "inline") else {
            return Ok(None);
        };
        if inliner.is_nil() {
            return Ok(None);
        }
        let wrap = |err: QuinceError| match err {
            QuinceError::Interrupted => err,
            other => QuinceError::compile(
                &self.file,
                form.line(),
                format!("Error while inlining '{}': {}", id.name(), other),
            ),
        };
        if let Some(pred) = ns.meta_entry(id.name(), "inline-arities") {
            let accepted = self
                .ctx
                .call_value(&pred, vec![Value::Int(args.len() as i64)])
                .map_err(wrap)?;
            if !accepted.is_truthy() {
                return Ok(None);
            }
        }
        let values = args.iter().map(Form::to_value).collect();
        let expansion = self
            .ctx
            .call_value(&inliner, values)
            .and_then(|value| Form::from_value(&value, form.span))
            .map_err(wrap)?;
        Ok(Some(expansion))
    }

    // (def target value?)
    fn compile_def(&mut self, form: &Form, args: &[Form]) -> Result<(), QuinceError> {
        if args.is_empty() {
            return self.error(form.line(), "Too few arguments to def");
        }
        if args.len() > 2 {
            return self.error(form.line(), "Too many arguments to def");
        }
        let Some(target) = args[0].as_identifier() else {
            return self.error(form.line(), "First argument to def must be an identifier");
        };
        if target.name() == "self" {
            return self.error(form.line(), "Can't change the value of self");
        }
        let nil = Form::nil(form.span);
        let value = args.get(1).unwrap_or(&nil);

        if target.is_constant() {
            let names = target.const_names();
            let Some((last, parents)) = names.split_last() else {
                return self.error(form.line(), "First argument to def must be an identifier");
            };
            self.gen.push_const_top();
            for parent in parents {
                self.gen.open_module(parent);
            }
            self.compile(value, TailContext::Value)?;
            self.gen.set_span(form.span);
            self.gen.const_set(last);
        } else {
            if target.is_qualified() {
                self.compile_const_path(&Self::qualifier_names(target));
            } else {
                self.gen.push_current_namespace();
            }
            self.compile(value, TailContext::Value)?;
            self.gen.set_span(form.span);
            self.gen.namespace_set(target.unqualified_name());
        }
        Ok(())
    }

    // (if cond then else?)
    fn compile_if(
        &mut self,
        form: &Form,
        args: &[Form],
        tail: TailContext,
    ) -> Result<(), QuinceError> {
        if args.len() < 2 {
            return self.error(form.line(), "Too few arguments to if");
        }
        if args.len() > 3 {
            return self.error(form.line(), "Too many arguments to if");
        }
        let else_label = self.gen.new_label();
        let end_label = self.gen.new_label();

        self.compile(&args[0], TailContext::Value)?;
        self.gen.goto_if_false(else_label);
        self.compile(&args[1], tail)?;
        self.gen.goto(end_label);
        self.gen.set_label(else_label);
        match args.get(2) {
            Some(otherwise) => self.compile(otherwise, tail)?,
            None => {
                self.gen.set_span(form.span);
                self.gen.push_nil();
            }
        }
        self.gen.set_label(end_label);
        Ok(())
    }

    // (do body*)
    pub fn compile_do(
        &mut self,
        span: Span,
        body: &[Form],
        tail: TailContext,
    ) -> Result<(), QuinceError> {
        let Some((last, init)) = body.split_last() else {
            self.gen.set_span(span);
            self.gen.push_nil();
            return Ok(());
        };
        for form in init {
            self.compile(form, TailContext::Value)?;
            self.gen.pop();
        }
        self.compile(last, tail)
    }

    // (quote form)
    fn compile_quote(&mut self, form: &Form, args: &[Form]) -> Result<(), QuinceError> {
        match args {
            [] => self.error(form.line(), "Too few arguments to quote"),
            [quoted] => {
                self.compile_quoted(quoted);
                Ok(())
            }
            _ => self.error(form.line(), "Too many arguments to quote"),
        }
    }

    fn compile_quoted(&mut self, form: &Form) {
        self.gen.set_span(form.span);
        match &form.kind {
            FormKind::Identifier(id) => self.gen.intern_identifier(id.name()),
            FormKind::List(items) if items.is_empty() => {
                self.gen.push_literal(Value::List(List::empty()))
            }
            FormKind::List(items) => {
                self.compile_quoted_each(items);
                self.gen.make_list(items.len());
            }
            FormKind::Array(items) => {
                self.compile_quoted_each(items);
                self.gen.make_array(items.len());
            }
            FormKind::Hash(items) => {
                self.compile_quoted_each(items);
                self.gen.make_hash(items.len() / 2);
            }
            FormKind::Set(items) => {
                self.compile_quoted_each(items);
                self.gen.make_set(items.len());
            }
            FormKind::String(s) => {
                self.gen.push_literal(Value::string(s.clone()));
                self.gen.string_dup();
            }
            _ => self.gen.push_literal(form.to_value()),
        }
    }

    fn compile_quoted_each(&mut self, items: &[Form]) {
        for item in items {
            self.compile_quoted(item);
        }
    }

    /// Runs `body` inside a fresh `let` frame, popping it on every path.
    fn in_let_scope<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, QuinceError>,
    ) -> Result<T, QuinceError> {
        self.scopes.push_let();
        let result = body(self);
        self.scopes.pop();
        result
    }

    // (let [binding*] body*) and (loop [binding*] body*)
    fn compile_let(
        &mut self,
        form: &Form,
        args: &[Form],
        tail: TailContext,
        kind: &str,
    ) -> Result<(), QuinceError> {
        let Some((bindings, body)) = args.split_first() else {
            return self.error(form.line(), format!("Too few arguments to {}", kind));
        };
        let Some(bindings) = bindings.as_array() else {
            return self.error(
                form.line(),
                format!("First argument to {} must be an array literal", kind),
            );
        };
        if bindings.len() % 2 != 0 {
            return self.error(
                form.line(),
                format!("Bindings array for {} must contain an even number of forms", kind),
            );
        }
        let is_loop = kind == "loop";

        self.in_let_scope(|c| {
            for pair in bindings.chunks(2) {
                let Some(name) = pair[0].as_identifier() else {
                    return c.error(
                        pair[0].line(),
                        format!("Binding targets in {} must be identifiers", kind),
                    );
                };
                c.compile(&pair[1], TailContext::Value)?;
                let slot = c.scopes.new_local(name);
                c.gen.set_local(local(slot));
                c.gen.pop();
            }
            if is_loop {
                let label = c.gen.new_label();
                c.gen.set_label(label);
                c.scopes.set_loop_target(label);
            }
            c.compile_do(form.span, body, tail)
        })
    }

    // (recur args*)
    fn compile_recur(
        &mut self,
        form: &Form,
        args: &[Form],
        tail: TailContext,
    ) -> Result<(), QuinceError> {
        let Some(target) = self.scopes.find_recur_target() else {
            return self.error(form.line(), "No recursion target found for recur");
        };
        if tail != TailContext::Tail {
            return self.error(form.line(), "Can only recur from tail position");
        }
        if target.slots.len() != args.len() {
            return self.error(
                form.line(),
                "Arity of recur does not match enclosing loop or fn",
            );
        }
        self.compile_each(args)?;
        self.gen.set_span(form.span);
        for slot in target.slots.iter().rev() {
            self.gen.set_local(local(*slot));
            self.gen.pop();
        }
        self.gen.check_interrupts();
        self.gen.goto(target.label);
        Ok(())
    }

    // (fn name? "doc"? [args*] body*) or (fn name? "doc"? ([args*] body*)+)
    fn compile_fn(&mut self, form: &Form, args: &[Form]) -> Result<(), QuinceError> {
        let definition = parse_fn(args).or_else(|msg| self.error(form.line(), msg))?;
        for overload in &definition.overloads {
            if let Some(dup) = overload.args.duplicate_name() {
                return self.error(
                    form.line(),
                    format!("Duplicate argument name '{}'", dup.name()),
                );
            }
        }

        let self_slot = self.scopes.push_fn(definition.name.clone()).self_slot();
        let outer = std::mem::replace(&mut self.gen, Generator::new(self.file.clone()));
        self.gen.set_span(form.span);
        let body = self.compile_fn_body(&definition);
        let inner = std::mem::replace(&mut self.gen, outer);
        self.scopes.pop();
        let local_count = body?;

        let chunk = inner
            .close()
            .or_else(|msg| self.error(form.line(), msg))?;
        let shapes: Vec<ArityShape> = definition.overloads.iter().map(|o| o.args.shape()).collect();
        let (first, last) = match (shapes.first(), shapes.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return self.error(form.line(), "Expected argument list or arity overload in fn definition"),
        };
        let proto = FunctionPrototype {
            name: definition.name.as_ref().map(|id| id.name().to_string()),
            doc: definition.doc.clone(),
            chunk,
            required_args: first.required,
            total_args: last.total(),
            splat_index: last.variadic.then(|| last.total()),
            local_count,
        };
        self.gen.set_span(form.span);
        self.gen.create_closure(proto);
        if let Some(slot) = self_slot {
            self.gen.set_local(local(slot));
        }
        Ok(())
    }

    /// Emits the overload selector followed by every overload body. Returns
    /// the number of slots the function frame needs.
    fn compile_fn_body(&mut self, definition: &FnDefinition) -> Result<usize, QuinceError> {
        let overloads = &definition.overloads;
        let shapes: Vec<ArityShape> = overloads.iter().map(|o| o.args.shape()).collect();
        let entry_labels: Vec<_> = if overloads.len() > 1 {
            overloads.iter().map(|_| self.gen.new_label()).collect()
        } else {
            Vec::new()
        };

        if overloads.len() > 1 {
            let plan = dispatch_plan(&shapes);
            let nomatch = self.gen.new_label();
            for step in &plan.steps {
                match *step {
                    DispatchStep::ToOverload { passed, overload } => {
                        self.gen.passed_arg(passed);
                        self.gen.goto_if_true(entry_labels[overload]);
                    }
                    DispatchStep::NoMatch { passed } => {
                        self.gen.passed_arg(passed);
                        self.gen.goto_if_true(nomatch);
                    }
                    DispatchStep::Always { overload } => self.gen.goto(entry_labels[overload]),
                }
            }
            if plan.nomatch_possible {
                self.gen.set_label(nomatch);
                self.gen.push_const_top();
                self.gen.find_const("ArgumentError");
                self.gen.push_literal(Value::string("No matching overload"));
                self.gen.string_dup();
                self.gen.send("new", 1);
                self.gen.raise_exception();
            }
        }

        let mut local_count = 0;
        for (i, overload) in overloads.iter().enumerate() {
            let args = &overload.args;
            self.scopes.push_overload();
            if let Some(label) = entry_labels.get(i) {
                self.gen.set_label(*label);
            }
            let result = self.compile_overload(definition, i);
            if let Some(Scope::Overload(scope)) = self.scopes.pop() {
                local_count = local_count.max(scope.local_count());
            }
            result?;
            local_count = local_count.max(args.num_total() + usize::from(args.is_variadic()));
        }
        Ok(local_count)
    }

    fn compile_overload(
        &mut self,
        definition: &FnDefinition,
        index: usize,
    ) -> Result<(), QuinceError> {
        let overload = &definition.overloads[index];
        let args = &overload.args;
        for name in &args.required {
            self.scopes.new_local(name);
        }

        let mut next_optional = self.gen.new_label();
        for (name, default) in &args.optional {
            let slot = self.scopes.new_local(name);
            self.gen.passed_arg(slot);
            self.gen.goto_if_true(next_optional);
            self.compile(default, TailContext::Value)?;
            self.gen.set_local(local(slot));
            self.gen.pop();
            self.gen.set_label(next_optional);
            next_optional = self.gen.new_label();
        }

        if let Some(rest) = &args.rest {
            self.scopes.new_local(rest);
            self.scopes.mark_splat();
        }

        self.gen.set_label(next_optional);

        if let Some(block) = &args.block {
            let slot = self.scopes.new_local(block);
            self.scopes.mark_block_arg(slot);
            self.gen.push_block();
            self.gen.set_local(local(slot));
            self.gen.pop();
        }
        self.scopes.set_loop_target(next_optional);

        let span = self.gen.span();
        self.compile_do(span, &overload.body, TailContext::Tail)?;
        self.gen.ret();
        Ok(())
    }

    // (. receiver method args*), with `& splat` and `| block` tails, or
    // (. receiver (method args*))
    fn compile_send(&mut self, form: &Form, args: &[Form]) -> Result<(), QuinceError> {
        if args.len() < 2 {
            return self.error(
                form.line(),
                "Too few arguments to send expression, expecting (. receiver method ...)",
            );
        }
        let receiver = &args[0];
        let (method, call_args) = match &args[1].kind {
            FormKind::List(items) => {
                if args.len() > 2 {
                    return self.error(
                        form.line(),
                        "Invalid send expression, expecting (. receiver (method ...))",
                    );
                }
                match items.split_first() {
                    Some((method, rest)) => (method, rest),
                    None => {
                        return self.error(
                            form.line(),
                            "Method in send expression must be an identifier",
                        )
                    }
                }
            }
            _ => (&args[1], &args[2..]),
        };
        let Some(method) = method.as_identifier() else {
            return self.error(form.line(), "Method in send expression must be an identifier");
        };

        let mut call_args: Vec<&Form> = call_args.iter().collect();
        let block_arg = Self::take_marked_tail(&mut call_args, "|");
        let splat_arg = Self::take_marked_tail(&mut call_args, "&");
        for arg in &call_args {
            if arg.is_identifier_named("&") {
                return self.error(form.line(), "Incorrect use of & in send expression");
            }
            if arg.is_identifier_named("|") {
                return self.error(form.line(), "Incorrect use of | in send expression");
            }
        }

        self.compile(receiver, TailContext::Value)?;
        for arg in &call_args {
            self.compile(arg, TailContext::Value)?;
        }
        if block_arg.is_none() && splat_arg.is_none() {
            self.gen.set_span(form.span);
            self.gen.send(method.name(), call_args.len());
            return Ok(());
        }
        if let Some(splat) = splat_arg {
            self.compile(splat, TailContext::Value)?;
            if splat.as_array().is_none() {
                self.gen.cast_array();
            }
        }
        match block_arg {
            Some(block) => self.compile(block, TailContext::Value)?,
            None => self.gen.push_nil(),
        }
        self.gen.set_span(form.span);
        if splat_arg.is_some() {
            self.gen.send_with_splat(method.name(), call_args.len());
        } else {
            self.gen.send_with_block(method.name(), call_args.len());
        }
        Ok(())
    }

    /// Removes a trailing `marker form` pair, returning the form.
    fn take_marked_tail<'f>(args: &mut Vec<&'f Form>, marker: &str) -> Option<&'f Form> {
        let len = args.len();
        if len >= 2 && args[len - 2].is_identifier_named(marker) {
            let tail = args.pop();
            args.pop();
            tail
        } else {
            None
        }
    }

    // (try body* (rescue name|[name condition*] body*)* (ensure body*)?)
    pub fn compile_try(&mut self, form: &Form, args: &[Form]) -> Result<TryRouting, QuinceError> {
        let parts = parse_try(args).or_else(|msg| self.error(form.line(), msg))?;

        let ensure_labels = parts
            .ensure
            .as_ref()
            .map(|_| (self.gen.new_label(), self.gen.new_label()));
        if let Some((ensure_ex, _)) = ensure_labels {
            self.gen.setup_handler(ensure_ex);
        }

        let routing = TryRouting {
            normal: self.gen.new_label(),
            rescued: parts.rescues.iter().map(|_| self.gen.new_label()).collect(),
            propagate: self.gen.new_label(),
        };
        let rescue_label = self.gen.new_label();

        let outer_state = self.gen.new_stack_local();
        self.gen.save_exception(outer_state);

        self.gen.setup_handler(rescue_label);
        self.compile_do(form.span, &parts.body, TailContext::Value)?;
        self.gen.set_span(form.span);
        self.gen.pop_handler();
        self.gen.goto(routing.label_for(TryOutcome::Normal));

        self.gen.set_label(rescue_label);
        let raised_state = self.gen.new_stack_local();
        self.gen.save_exception(raised_state);
        self.gen.push_current_exception();

        for (i, clause) in parts.rescues.iter().enumerate() {
            let body_label = self.gen.new_label();
            let next_clause = self.gen.new_label();
            let default_condition = [Form::identifier(self.intern("StandardError"), form.span)];
            let conditions: &[Form] = if clause.conditions.is_empty() {
                &default_condition
            } else {
                &clause.conditions
            };
            for condition in conditions {
                self.gen.dup();
                self.compile(condition, TailContext::Value)?;
                self.gen.swap();
                self.gen.send("===", 1);
                self.gen.goto_if_true(body_label);
            }
            self.gen.goto(next_clause);

            self.gen.set_label(body_label);
            self.in_let_scope(|c| {
                let slot = c.scopes.new_local(&clause.name);
                c.gen.set_local(local(slot));
                c.gen.pop();
                c.compile_do(form.span, &clause.body, TailContext::Value)
            })?;
            self.gen.clear_exception();
            self.gen.goto(routing.label_for(TryOutcome::Rescued(i)));
            self.gen.set_label(next_clause);
        }

        self.gen.pop();
        self.gen.goto(routing.label_for(TryOutcome::Propagate));
        self.gen.set_label(routing.propagate);
        self.gen.restore_exception(raised_state);
        self.gen.reraise();

        self.gen.set_label(routing.normal);
        for label in &routing.rescued {
            self.gen.set_label(*label);
        }
        self.gen.restore_exception(outer_state);

        if let (Some((ensure_ex, ensure_ok)), Some(ensure)) = (ensure_labels, &parts.ensure) {
            self.gen.pop_handler();
            self.gen.goto(ensure_ok);

            self.gen.set_label(ensure_ex);
            let ensure_state = self.gen.new_stack_local();
            self.gen.save_exception(ensure_state);
            for form in ensure {
                self.compile(form, TailContext::Value)?;
                self.gen.pop();
            }
            self.gen.restore_exception(ensure_state);
            self.gen.reraise();

            self.gen.set_label(ensure_ok);
            for form in ensure {
                self.compile(form, TailContext::Value)?;
                self.gen.pop();
            }
        }
        Ok(routing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_string;
    use crate::vm::bytecode::Instruction;

    fn read_one(src: &str) -> Form {
        read_string(src, "(test)", 1).expect("read").remove(0)
    }

    fn compile_err(src: &str) -> String {
        let ctx = RuntimeCtx::new();
        compile_toplevel(&ctx, &read_one(src), "(test)")
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn try_outcomes_route_to_shared_exit_or_reraise() {
        let ctx = RuntimeCtx::new();
        let form = read_one("(try (a) (rescue e 1) (rescue [e TypeError] 2) (ensure (b)))");
        let mut compiler = Compiler::new(&ctx, "(test)");
        let args = &form.as_list().expect("list")[1..];
        let routing = compiler.compile_try(&form, args).expect("compile");
        let chunk = compiler.gen.close().expect("close");

        let target = |outcome| chunk.label_target(routing.label_for(outcome)).expect("placed");
        let done = target(TryOutcome::Normal);
        assert_eq!(target(TryOutcome::Rescued(0)), done);
        assert_eq!(target(TryOutcome::Rescued(1)), done);
        assert!(matches!(chunk.code()[done], Instruction::RestoreException(0, _)));

        let propagate = target(TryOutcome::Propagate);
        assert_ne!(propagate, done);
        assert!(matches!(chunk.code()[propagate], Instruction::RestoreException(1, _)));
        assert!(matches!(chunk.code()[propagate + 1], Instruction::Reraise(_)));
        assert_eq!(routing.outcomes().len(), 4);
    }

    #[test]
    fn special_form_arity_errors() {
        assert_eq!(compile_err("(if 1)"), "(test):1: Too few arguments to if");
        assert_eq!(compile_err("(if 1 2 3 4)"), "(test):1: Too many arguments to if");
        assert_eq!(compile_err("(def)"), "(test):1: Too few arguments to def");
        assert_eq!(compile_err("(def a 1 2)"), "(test):1: Too many arguments to def");
        assert_eq!(
            compile_err("(def 1 2)"),
            "(test):1: First argument to def must be an identifier"
        );
        assert_eq!(compile_err("(def self 2)"), "(test):1: Can't change the value of self");
        assert_eq!(compile_err("(quote)"), "(test):1: Too few arguments to quote");
        assert_eq!(compile_err("(quote a b)"), "(test):1: Too many arguments to quote");
        assert_eq!(compile_err("(let)"), "(test):1: Too few arguments to let");
        assert_eq!(
            compile_err("(loop (a 1))"),
            "(test):1: First argument to loop must be an array literal"
        );
        assert_eq!(
            compile_err("(let [a] a)"),
            "(test):1: Bindings array for let must contain an even number of forms"
        );
        assert_eq!(
            compile_err("(let [:a 1] a)"),
            "(test):1: Binding targets in let must be identifiers"
        );
    }

    #[test]
    fn recur_errors() {
        assert_eq!(compile_err("(recur 1)"), "(test):1: No recursion target found for recur");
        assert_eq!(
            compile_err("(loop [a 1] (recur 1) 2)"),
            "(test):1: Can only recur from tail position"
        );
        assert_eq!(
            compile_err("(loop [a 1 b 2] (recur 1))"),
            "(test):1: Arity of recur does not match enclosing loop or fn"
        );
        assert_eq!(
            compile_err("(fn [a | b] (recur 1 2))"),
            "(test):1: Arity of recur does not match enclosing loop or fn"
        );
        assert_eq!(
            compile_err("(loop [a 1] (try (recur 2)))"),
            "(test):1: Can only recur from tail position"
        );
    }

    #[test]
    fn send_errors() {
        assert_eq!(
            compile_err("(. a)"),
            "(test):1: Too few arguments to send expression, expecting (. receiver method ...)"
        );
        assert_eq!(
            compile_err("(. a (b c) d)"),
            "(test):1: Invalid send expression, expecting (. receiver (method ...))"
        );
        assert_eq!(
            compile_err("(. a 1)"),
            "(test):1: Method in send expression must be an identifier"
        );
        assert_eq!(
            compile_err("(. a b & c d)"),
            "(test):1: Incorrect use of & in send expression"
        );
        assert_eq!(
            compile_err("(. a b | c & d)"),
            "(test):1: Incorrect use of | in send expression"
        );
    }

    #[test]
    fn fn_errors() {
        assert_eq!(
            compile_err("(fn [a a] a)"),
            "(test):1: Duplicate argument name 'a'"
        );
        assert_eq!(
            compile_err("(fn foo)"),
            "(test):1: Expected argument list or arity overload in fn definition"
        );
        assert_eq!(
            compile_err("(fn ([a] a) [b])"),
            "(test):1: Expected an arity overload (a list)"
        );
        assert_eq!(
            compile_err("(fn ((a) a))"),
            "(test):1: Argument list in overload must be an array literal"
        );
        assert_eq!(
            compile_err("(fn ([a] 1) ([b] 2))"),
            "(test):1: Can't have two overloads with the same arity"
        );
    }

    #[test]
    fn errors_report_the_line_of_the_offending_form() {
        assert_eq!(
            compile_err("(do 1\n  2\n  (if))"),
            "(test):3: Too few arguments to if"
        );
    }

    #[test]
    fn named_fn_stores_itself_in_the_enclosing_frame() {
        let ctx = RuntimeCtx::new();
        let compiled =
            compile_toplevel(&ctx, &read_one("(fn fact [n] (fact n))"), "(test)").expect("compile");
        assert_eq!(compiled.local_count, 1);
        let code = compiled.chunk.code();
        assert!(matches!(code[0], Instruction::CreateClosure(0, _)));
        assert!(matches!(
            code[1],
            Instruction::SetLocal(LocalReference { slot: 0, depth: 0 }, _)
        ));
        let body = compiled.chunk.functions()[0].chunk.code();
        assert!(body.iter().any(|instr| matches!(
            instr,
            Instruction::PushLocal(LocalReference { slot: 0, depth: 1 }, _)
        )));
    }
}
