use std::cell::Cell;
use std::fmt;
use std::fs;
use std::path::Path;
use std::panic;
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::ast::Form;
use crate::builtins::{self, arity_text, check_arity, int_arg, methods};
use crate::error::QuinceError;
use crate::interrupt::clear_interrupt;
use crate::namespace::{lookup_constant, Namespace, NamespaceRef};
use crate::options::EvalOptions;
use crate::reader::{Reader, ReaderOptions};
use crate::symbols::{Identifier, SymbolTable};
use crate::value::{Arity, Module, ModuleRef, Value};
use crate::vm::runtime::block_value;
use crate::vm::{call_closure, compile_toplevel, run_toplevel, CompiledForm};

const CURRENT_NS_VAR: &str = "*ns*";

/// Stack reserved by `with_eval_stack`. Every call level costs several host
/// frames, so the default thread stack runs out well before `max_depth`.
pub const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Runs `f` on a thread with `EVAL_STACK_SIZE` bytes of stack and waits for
/// it. Panics in `f` resume on the calling thread.
pub fn with_eval_stack<T, F>(f: F) -> Result<T, QuinceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = thread::Builder::new()
        .name("quince-eval".to_string())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(f)
        .map_err(|e| QuinceError::io("<eval thread>", e))?;
    match handle.join() {
        Ok(value) => Ok(value),
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Every top-level form of one source, compiled in order.
pub struct CompiledUnit {
    pub file: String,
    pub forms: Vec<CompiledForm>,
}

impl fmt::Display for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, form) in self.forms.iter().enumerate() {
            writeln!(f, "; {} form {} ({} locals)", self.file, i, form.local_count)?;
            write!(f, "{}", form.chunk)?;
        }
        Ok(())
    }
}

/// Interpreter state: the identifier table, the root of the constant tree
/// and the core namespace. The current namespace lives in the core `*ns*`
/// var so that `in-ns` is an ordinary function.
pub struct RuntimeCtx {
    symbols: Arc<SymbolTable>,
    root: ModuleRef,
    core: NamespaceRef,
    options: EvalOptions,
    call_depth: Cell<usize>,
}

/// Holds one level of call depth until dropped.
pub struct CallDepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for CallDepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Default for RuntimeCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeCtx {
    pub fn new() -> Self {
        Self::with_options(EvalOptions::default())
    }

    pub fn with_options(options: EvalOptions) -> Self {
        let root = Module::new_module("Object");
        let quince = Module::new_module("Quince");
        let core = Namespace::new("Quince::Core");
        quince.const_set("Core", Value::Namespace(core.clone()));
        root.const_set("Quince", Value::Module(quince));

        let ctx = Self {
            symbols: SymbolTable::global(),
            root,
            core,
            options,
            call_depth: Cell::new(0),
        };
        builtins::install(&ctx);
        ctx.set_current_namespace(ctx.core.clone());
        ctx
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn root(&self) -> &ModuleRef {
        &self.root
    }

    pub fn core(&self) -> &NamespaceRef {
        &self.core
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn call_depth(&self) -> usize {
        self.call_depth.get()
    }

    /// Enters one call level, raising `SystemStackError` past `max_depth`.
    pub fn enter_call(&self) -> Result<CallDepthGuard<'_>, QuinceError> {
        let depth = self.call_depth.get();
        if depth >= self.options.max_depth {
            return Err(QuinceError::stack_too_deep());
        }
        self.call_depth.set(depth + 1);
        Ok(CallDepthGuard {
            depth: &self.call_depth,
        })
    }

    pub fn current_namespace(&self) -> NamespaceRef {
        match self.core.lookup(CURRENT_NS_VAR) {
            Some(Value::Namespace(ns)) => ns,
            _ => self.core.clone(),
        }
    }

    pub fn set_current_namespace(&self, ns: NamespaceRef) {
        self.core.set_var(CURRENT_NS_VAR, Value::Namespace(ns));
    }

    /// Namespace a global identifier resolves to. `Ns/name` names `Ns`;
    /// plain names prefer the current namespace and then the core one.
    pub fn var_home(&self, id: &Identifier) -> Option<NamespaceRef> {
        if id.is_constant() {
            return None;
        }
        if let Some(path) = id.namespace_part() {
            let names: Vec<String> = path.split("::").map(str::to_string).collect();
            return match lookup_constant(&self.root, &names) {
                Ok(Value::Namespace(ns)) => Some(ns),
                _ => None,
            };
        }
        let current = self.current_namespace();
        if current.has_var(id.name()) {
            Some(current)
        } else if self.core.has_var(id.name()) {
            Some(self.core.clone())
        } else {
            None
        }
    }

    pub fn lookup_var(&self, name: &str) -> Result<Value, QuinceError> {
        self.namespace_get(&self.current_namespace(), name)
    }

    pub fn namespace_get(&self, ns: &NamespaceRef, name: &str) -> Result<Value, QuinceError> {
        if let Some(value) = ns.lookup(name) {
            return Ok(value);
        }
        if let Some(value) = self.core.lookup(name) {
            return Ok(value);
        }
        ns.get_var(name)
    }

    pub fn call_value(&self, callee: &Value, args: Vec<Value>) -> Result<Value, QuinceError> {
        self.call_with_block(callee, args, Value::Nil)
    }

    pub fn call_with_block(
        &self,
        callee: &Value,
        args: Vec<Value>,
        block: Value,
    ) -> Result<Value, QuinceError> {
        match callee {
            Value::Function(closure) => call_closure(self, closure, args, block),
            Value::Native(native) => {
                if !native.arity.accepts(args.len()) {
                    return Err(QuinceError::arity(args.len(), arity_text(native.arity)));
                }
                (native.func)(self, args)
            }
            Value::Method(method) => {
                let block = block_value(block)?;
                match &method.receiver {
                    Some(receiver) => self.send(receiver, &method.name, args, block),
                    None => {
                        let mut args = args.into_iter();
                        let receiver = args.next().ok_or_else(|| {
                            QuinceError::argument_error(format!(
                                "no receiver given for '{}'",
                                method.name
                            ))
                        })?;
                        self.send(&receiver, &method.name, args.collect(), block)
                    }
                }
            }
            Value::Array(items) => {
                check_arity(&args, Arity::exactly(1))?;
                let items = items.read();
                let index = int_arg(&args[0])?;
                let len = items.len() as i64;
                let resolved = if index < 0 { index + len } else { index };
                Ok(if (0..len).contains(&resolved) {
                    items[resolved as usize].clone()
                } else {
                    Value::Nil
                })
            }
            Value::Hash(table) => {
                check_arity(&args, Arity::range(1, 2))?;
                let found = table.read().get(&args[0]).cloned();
                Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Nil)))
            }
            Value::Set(set) => {
                check_arity(&args, Arity::exactly(1))?;
                Ok(if set.contains(&args[0]) {
                    args[0].clone()
                } else {
                    Value::Nil
                })
            }
            Value::Symbol(_) => {
                check_arity(&args, Arity::range(1, 2))?;
                let default = args.get(1).cloned().unwrap_or(Value::Nil);
                Ok(match &args[0] {
                    Value::Hash(table) => table.read().get(callee).cloned().unwrap_or(default),
                    Value::Set(set) if set.contains(callee) => callee.clone(),
                    _ => default,
                })
            }
            other => Err(QuinceError::no_method_error(format!(
                "undefined method 'call' for {}:{}",
                other,
                builtins::classes::classes().class_of(other).name()
            ))),
        }
    }

    pub fn send(
        &self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        block: Option<Value>,
    ) -> Result<Value, QuinceError> {
        methods::send(self, receiver, name, args, block)
    }

    fn compile_form(&self, form: &Form, file: &str) -> Result<CompiledForm, QuinceError> {
        let compiled = compile_toplevel(self, form, file)?;
        debug!(
            file,
            line = form.line(),
            instructions = compiled.chunk.code().len(),
            "compiled top-level form"
        );
        if self.options.dump_bytecode {
            debug!("\n{}", compiled.chunk);
        }
        Ok(compiled)
    }

    fn run_form(&self, form: &CompiledForm) -> Result<Value, QuinceError> {
        let self_value = Value::Namespace(self.current_namespace());
        run_toplevel(self, &form.chunk, form.local_count, self_value)
    }

    fn reader(&self, code: &str, filename: &str, line: usize) -> Reader {
        let options = ReaderOptions::default()
            .with_source_name(filename)
            .with_start_line(line)
            .with_symbols(self.symbols.clone())
            .with_max_depth(self.options.max_depth);
        Reader::new_with_options(code, options)
    }

    /// Reads, compiles and runs one top-level form at a time so macros
    /// defined by a form are visible to the next. Returns the last value.
    pub fn eval_source(
        &self,
        code: &str,
        filename: &str,
        line: usize,
    ) -> Result<Value, QuinceError> {
        clear_interrupt();
        let mut reader = self.reader(code, filename, line);
        let mut result = Value::Nil;
        while let Some(form) = reader.read_next()? {
            let compiled = self.compile_form(&form, filename)?;
            result = self.run_form(&compiled)?;
        }
        Ok(result)
    }

    /// Evaluates `code` under the configured source name.
    pub fn eval(&self, code: &str) -> Result<Value, QuinceError> {
        let name = self.options.source_name.clone();
        self.eval_source(code, &name, 1)
    }

    pub fn eval_file(&self, path: impl AsRef<Path>) -> Result<Value, QuinceError> {
        let (name, code) = read_source(path.as_ref())?;
        self.eval_source(&code, &name, 1)
    }

    /// Compiles every top-level form of `code`. Each form also runs as soon
    /// as it is compiled, since later forms may use macros it defines.
    pub fn compile_string(
        &self,
        code: &str,
        filename: &str,
        line: usize,
    ) -> Result<CompiledUnit, QuinceError> {
        clear_interrupt();
        let mut reader = self.reader(code, filename, line);
        let mut forms = Vec::new();
        while let Some(form) = reader.read_next()? {
            let compiled = self.compile_form(&form, filename)?;
            self.run_form(&compiled)?;
            forms.push(compiled);
        }
        Ok(CompiledUnit {
            file: filename.to_string(),
            forms,
        })
    }

    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<CompiledUnit, QuinceError> {
        let (name, code) = read_source(path.as_ref())?;
        self.compile_string(&code, &name, 1)
    }

    /// Runs a compiled unit again and returns the value of its last form.
    pub fn run_unit(&self, unit: &CompiledUnit) -> Result<Value, QuinceError> {
        clear_interrupt();
        let mut result = Value::Nil;
        for form in &unit.forms {
            result = self.run_form(form)?;
        }
        Ok(result)
    }
}

fn read_source(path: &Path) -> Result<(String, String), QuinceError> {
    let name = path.display().to_string();
    let code = fs::read_to_string(path).map_err(|e| QuinceError::io(&name, e))?;
    Ok((name, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_the_core_namespace() {
        let ctx = RuntimeCtx::new();
        assert_eq!(ctx.current_namespace().name(), "Quince::Core");
        let value = ctx.eval("*ns*").expect("eval");
        assert_eq!(value.to_string(), "Quince::Core");
    }

    #[test]
    fn data_structures_are_callable() {
        let ctx = RuntimeCtx::new();
        let value = ctx
            .eval("[([10 20 30] -1) ({:a 1} :a) (:b {:b 2}) (#{3} 3) (#{3} 4)]")
            .expect("eval");
        assert_eq!(value.to_string(), "[30 1 2 3 nil]");
    }

    #[test]
    fn calling_a_number_is_a_no_method_error() {
        let ctx = RuntimeCtx::new();
        let err = ctx.eval_source("(1 2)", "t.qn", 4).unwrap_err();
        assert_eq!(
            crate::error::format_error(&err),
            "t.qn:4: NoMethodError: undefined method 'call' for 1:Integer"
        );
    }

    #[test]
    fn call_depth_is_released_when_guards_drop() {
        let ctx = RuntimeCtx::with_options(EvalOptions {
            max_depth: 2,
            ..Default::default()
        });
        let outer = ctx.enter_call().expect("first level");
        let inner = ctx.enter_call().expect("second level");
        let err = ctx.enter_call().err().expect("third level is too deep");
        assert_eq!(err.to_string(), "SystemStackError: stack level too deep");
        drop(inner);
        assert_eq!(ctx.call_depth(), 1);
        drop(outer);
        assert_eq!(ctx.call_depth(), 0);
    }

    #[test]
    fn empty_input_evaluates_to_nil() {
        let ctx = RuntimeCtx::new();
        assert_eq!(ctx.eval("  ; nothing\n").expect("eval"), Value::Nil);
    }

    #[test]
    fn compiled_units_run_again() {
        let ctx = RuntimeCtx::new();
        let unit = ctx
            .compile_string("(def counter [])\n(.push counter 1)", "unit.qn", 1)
            .expect("compile");
        assert_eq!(unit.forms.len(), 2);
        let value = ctx.run_unit(&unit).expect("run");
        assert_eq!(value.to_string(), "[1]");
        assert!(unit.to_string().contains("; unit.qn form 1"));
    }
}
