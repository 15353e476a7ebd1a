use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::builtins::classes::classes;
use crate::error::QuinceError;
use crate::interrupt::check_for_interrupt;
use crate::namespace::{const_get, const_set, open_module};
use crate::runtime::RuntimeCtx;
use crate::scope::LocalReference;
use crate::value::{
    BoundMethod, Closure, ExceptionObject, ExceptionRef, HashTable, List, Value,
};
use crate::vm::bytecode::{Chunk, Instruction, Label};

/// Slots of one function activation (or one top-level form). Closures keep
/// the scope they were created in alive through `parent`.
pub struct VariableScope {
    slots: RwLock<Vec<Value>>,
    parent: Option<Arc<VariableScope>>,
}

impl VariableScope {
    pub fn new(size: usize, parent: Option<Arc<VariableScope>>) -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(vec![Value::Nil; size]),
            parent,
        })
    }

    pub fn get(&self, slot: usize) -> Value {
        self.slots.read().get(slot).cloned().unwrap_or(Value::Nil)
    }

    pub fn set(&self, slot: usize, value: Value) {
        let mut slots = self.slots.write();
        if slot >= slots.len() {
            slots.resize(slot + 1, Value::Nil);
        }
        slots[slot] = value;
    }

    fn at_depth(self: &Arc<Self>, depth: usize) -> Option<Arc<VariableScope>> {
        let mut scope = self.clone();
        for _ in 0..depth {
            scope = scope.parent.clone()?;
        }
        Some(scope)
    }
}

pub struct Frame {
    pub scope: Arc<VariableScope>,
    pub self_value: Value,
    pub block: Value,
    /// Number of arguments the caller supplied.
    pub passed: usize,
}

struct Handler {
    target: usize,
    stack_depth: usize,
}

struct Vm<'a> {
    ctx: &'a RuntimeCtx,
    chunk: &'a Chunk,
    frame: Frame,
    ip: usize,
    stack: Vec<Value>,
    handlers: Vec<Handler>,
    current_exception: Option<ExceptionRef>,
    saved_exceptions: Vec<Option<ExceptionRef>>,
}

/// Runs a compiled top-level form with `self_value` as `self`.
pub fn run_toplevel(
    ctx: &RuntimeCtx,
    chunk: &Chunk,
    local_count: usize,
    self_value: Value,
) -> Result<Value, QuinceError> {
    let frame = Frame {
        scope: VariableScope::new(local_count, None),
        self_value,
        block: Value::Nil,
        passed: 0,
    };
    execute(ctx, chunk, frame)
}

/// Invokes a closure: checks the argument count against the prototype, lays
/// the arguments out in the new frame and runs the body.
pub fn call_closure(
    ctx: &RuntimeCtx,
    closure: &Arc<Closure>,
    mut args: Vec<Value>,
    block: Value,
) -> Result<Value, QuinceError> {
    let proto = &closure.proto;
    let argc = args.len();
    if argc < proto.required_args || (proto.splat_index.is_none() && argc > proto.total_args) {
        return Err(QuinceError::arity(argc, proto.arity_description()));
    }

    let size = proto
        .local_count
        .max(proto.total_args + usize::from(proto.splat_index.is_some()));
    let scope = VariableScope::new(size, Some(closure.scope.clone()));
    if let Some(splat) = proto.splat_index {
        let rest = if argc > proto.total_args {
            args.split_off(proto.total_args)
        } else {
            Vec::new()
        };
        scope.set(splat, Value::array(rest));
    }
    for (slot, arg) in args.into_iter().enumerate() {
        scope.set(slot, arg);
    }

    let frame = Frame {
        scope,
        self_value: closure.self_value.clone(),
        block,
        passed: argc,
    };
    let _depth = ctx.enter_call()?;
    execute(ctx, &proto.chunk, frame)
}

pub fn execute(ctx: &RuntimeCtx, chunk: &Chunk, frame: Frame) -> Result<Value, QuinceError> {
    let mut vm = Vm {
        ctx,
        chunk,
        frame,
        ip: 0,
        stack: Vec::with_capacity(16),
        handlers: Vec::new(),
        current_exception: None,
        saved_exceptions: Vec::new(),
    };
    vm.run()
}

/// Block argument as seen by the callee: `nil` means none and a symbol
/// becomes a proc that sends that message to its first argument.
pub fn block_value(block: Value) -> Result<Option<Value>, QuinceError> {
    match block {
        Value::Nil => Ok(None),
        Value::Symbol(name) => Ok(Some(Value::Method(Arc::new(BoundMethod {
            receiver: None,
            name,
        })))),
        callable if callable.is_callable() => Ok(Some(callable)),
        Value::Array(_) | Value::Hash(_) | Value::Set(_) => Ok(Some(block)),
        other => Err(QuinceError::type_error(format!(
            "wrong argument type {} (expected Proc)",
            other.type_name()
        ))),
    }
}

/// Converts a raised value into an exception: exception objects pass
/// through, strings become `RuntimeError`s and classes are instantiated.
pub fn exception_from_value(value: Value) -> QuinceError {
    match value {
        Value::Exception(exc) => QuinceError::Raised(exc),
        Value::String(message) => QuinceError::runtime(message.read().clone()),
        Value::Module(class) if class.is_subclass_of(&classes().exception) => {
            let message = class.name().to_string();
            QuinceError::Raised(ExceptionObject::new(class, message))
        }
        _ => QuinceError::type_error("exception class/object expected"),
    }
}

impl<'a> Vm<'a> {
    fn run(&mut self) -> Result<Value, QuinceError> {
        let chunk = self.chunk;
        loop {
            let Some(instr) = chunk.code().get(self.ip) else {
                return Ok(self.stack.pop().unwrap_or(Value::Nil));
            };
            self.ip += 1;
            match self.step(instr) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(err) => self.unwind(err, instr)?,
            }
        }
    }

    /// Transfers control to the innermost handler for runtime exceptions.
    /// Anything else, or an exception with no handler left, leaves the frame.
    fn unwind(&mut self, err: QuinceError, instr: &Instruction) -> Result<(), QuinceError> {
        if let QuinceError::Raised(exc) = &err {
            if let Some(handler) = self.handlers.pop() {
                trace!(exception = %exc, target = handler.target, "caught");
                self.stack.truncate(handler.stack_depth);
                self.current_exception = Some(exc.clone());
                self.ip = handler.target;
                return Ok(());
            }
        }
        Err(err.with_location(self.chunk.file(), instr.span().line))
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    fn peek(&self) -> Value {
        self.stack.last().cloned().unwrap_or(Value::Nil)
    }

    fn jump(&mut self, label: Label) -> Result<(), QuinceError> {
        self.ip = self
            .chunk
            .label_target(label)
            .ok_or_else(|| QuinceError::runtime(format!("Jump to unplaced label {}", label)))?;
        Ok(())
    }

    fn scope_at(&self, reference: LocalReference) -> Result<Arc<VariableScope>, QuinceError> {
        self.frame.scope.at_depth(reference.depth).ok_or_else(|| {
            QuinceError::runtime(format!(
                "No enclosing scope at depth {}",
                reference.depth
            ))
        })
    }

    fn step(&mut self, instr: &Instruction) -> Result<Option<Value>, QuinceError> {
        match instr {
            Instruction::PushNil(_) => self.stack.push(Value::Nil),
            Instruction::PushTrue(_) => self.stack.push(Value::Bool(true)),
            Instruction::PushFalse(_) => self.stack.push(Value::Bool(false)),
            Instruction::PushSelf(_) => self.stack.push(self.frame.self_value.clone()),
            Instruction::PushLiteral(index, _) => {
                let value = self.chunk.literals().get(*index).cloned().ok_or_else(|| {
                    QuinceError::runtime(format!("Missing literal #{}", index))
                })?;
                self.stack.push(value);
            }
            Instruction::StringDup(_) => {
                let value = self.pop();
                let value = match value {
                    Value::String(s) => Value::string(s.read().clone()),
                    other => other,
                };
                self.stack.push(value);
            }
            Instruction::PushLocal(reference, _) => {
                let value = self.scope_at(*reference)?.get(reference.slot);
                self.stack.push(value);
            }
            Instruction::SetLocal(reference, _) => {
                let value = self.peek();
                self.scope_at(*reference)?.set(reference.slot, value);
            }
            Instruction::Pop(_) => {
                self.pop();
            }
            Instruction::Dup(_) => self.stack.push(self.peek()),
            Instruction::Swap(_) => {
                let len = self.stack.len();
                if len >= 2 {
                    self.stack.swap(len - 1, len - 2);
                }
            }
            Instruction::Goto(label, _) => self.jump(*label)?,
            Instruction::GotoIfFalse(label, _) => {
                if !self.pop().is_truthy() {
                    self.jump(*label)?;
                }
            }
            Instruction::GotoIfTrue(label, _) => {
                if self.pop().is_truthy() {
                    self.jump(*label)?;
                }
            }
            Instruction::CreateClosure(index, _) => {
                let proto = self.chunk.functions().get(*index).cloned().ok_or_else(|| {
                    QuinceError::runtime(format!("Missing function #{}", index))
                })?;
                self.stack.push(Value::Function(Arc::new(Closure {
                    proto,
                    scope: self.frame.scope.clone(),
                    self_value: self.frame.self_value.clone(),
                })));
            }
            Instruction::PassedArg(index, _) => {
                self.stack.push(Value::Bool(self.frame.passed > *index));
            }
            Instruction::PushBlock(_) => self.stack.push(self.frame.block.clone()),
            Instruction::Call(argc, _) => {
                let args = self.pop_n(*argc);
                let callee = self.pop();
                let result = self.ctx.call_value(&callee, args)?;
                self.stack.push(result);
            }
            Instruction::CallNamespaceFn(name, argc, _) => {
                let args = self.pop_n(*argc);
                let callee = self.ctx.lookup_var(name)?;
                let result = self.ctx.call_value(&callee, args)?;
                self.stack.push(result);
            }
            Instruction::Send(name, argc, _) => {
                let args = self.pop_n(*argc);
                let receiver = self.pop();
                let result = self.ctx.send(&receiver, name, args, None)?;
                self.stack.push(result);
            }
            Instruction::SendWithBlock(name, argc, _) => {
                let block = block_value(self.pop())?;
                let args = self.pop_n(*argc);
                let receiver = self.pop();
                let result = self.ctx.send(&receiver, name, args, block)?;
                self.stack.push(result);
            }
            Instruction::SendWithSplat(name, argc, _) => {
                let block = block_value(self.pop())?;
                let splat = self.pop();
                let mut args = self.pop_n(*argc);
                args.extend(splat.seq_items().unwrap_or_else(|| vec![splat]));
                let receiver = self.pop();
                let result = self.ctx.send(&receiver, name, args, block)?;
                self.stack.push(result);
            }
            Instruction::CastArray(_) => {
                let value = self.pop();
                let cast = match value {
                    Value::Array(_) => value,
                    other => match other.seq_items() {
                        Some(items) => Value::array(items),
                        None => Value::array(vec![other]),
                    },
                };
                self.stack.push(cast);
            }
            Instruction::MakeArray(count, _) => {
                let items = self.pop_n(*count);
                self.stack.push(Value::array(items));
            }
            Instruction::MakeHash(pairs, _) => {
                let items = self.pop_n(pairs * 2);
                let mut table = HashTable::new();
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    table.insert(key, value);
                }
                self.stack.push(Value::hash(table));
            }
            Instruction::MakeSet(count, _) => {
                let items = self.pop_n(*count);
                self.stack.push(Value::set(items));
            }
            Instruction::MakeList(count, _) => {
                let items = self.pop_n(*count);
                self.stack.push(Value::List(List::from_vec(items)));
            }
            Instruction::InternIdentifier(name, _) => {
                self.stack
                    .push(Value::Identifier(self.ctx.symbols().intern(name)));
            }
            Instruction::PushConstTop(_) => self.stack.push(Value::Module(self.ctx.root().clone())),
            Instruction::FindConst(name, _) => {
                let parent = self.pop();
                let value = const_get(&parent, name).ok_or_else(|| {
                    QuinceError::name_error(format!(
                        "uninitialized constant {}",
                        self.qualified_const(&parent, name)
                    ))
                })?;
                self.stack.push(value);
            }
            Instruction::OpenModule(name, _) => {
                let parent = self.pop();
                let module = open_module(&parent, name)?;
                self.stack.push(module);
            }
            Instruction::ConstSet(name, _) => {
                let value = self.pop();
                let parent = self.pop();
                let value = const_set(&parent, name, value)?;
                self.stack.push(value);
            }
            Instruction::PushCurrentNamespace(_) => {
                self.stack
                    .push(Value::Namespace(self.ctx.current_namespace()));
            }
            Instruction::NamespaceGet(name, _) => {
                let target = self.pop();
                let value = match target {
                    Value::Namespace(ns) => self.ctx.namespace_get(&ns, name)?,
                    Value::Module(_) => Value::Method(Arc::new(BoundMethod {
                        receiver: Some(target),
                        name: name.clone(),
                    })),
                    other => {
                        return Err(QuinceError::type_error(format!(
                            "{} is not a namespace",
                            other
                        )))
                    }
                };
                self.stack.push(value);
            }
            Instruction::NamespaceSet(name, _) => {
                let value = self.pop();
                match self.pop() {
                    Value::Namespace(ns) => ns.set_var(name, value.clone()),
                    other => {
                        return Err(QuinceError::type_error(format!(
                            "{} is not a namespace",
                            other
                        )))
                    }
                }
                self.stack.push(value);
            }
            Instruction::SetupHandler(label, _) => {
                let target = self.chunk.label_target(*label).ok_or_else(|| {
                    QuinceError::runtime(format!("Handler at unplaced label {}", label))
                })?;
                self.handlers.push(Handler {
                    target,
                    stack_depth: self.stack.len(),
                });
            }
            Instruction::PopHandler(_) => {
                self.handlers.pop();
            }
            Instruction::PushCurrentException(_) => {
                let value = self
                    .current_exception
                    .clone()
                    .map_or(Value::Nil, Value::Exception);
                self.stack.push(value);
            }
            Instruction::ClearException(_) => self.current_exception = None,
            Instruction::SaveException(slot, _) => {
                if *slot >= self.saved_exceptions.len() {
                    self.saved_exceptions.resize(slot + 1, None);
                }
                self.saved_exceptions[*slot] = self.current_exception.clone();
            }
            Instruction::RestoreException(slot, _) => {
                self.current_exception = self.saved_exceptions.get(*slot).cloned().flatten();
            }
            Instruction::Reraise(_) => {
                if let Some(exc) = self.current_exception.clone() {
                    return Err(QuinceError::Raised(exc));
                }
            }
            Instruction::RaiseException(_) => return Err(exception_from_value(self.pop())),
            Instruction::CheckInterrupts(_) => check_for_interrupt()?,
            Instruction::Ret(_) => return Ok(Some(self.pop())),
        }
        Ok(None)
    }

    fn qualified_const(&self, parent: &Value, name: &str) -> String {
        match parent {
            Value::Module(m) if !Arc::ptr_eq(m, self.ctx.root()) => {
                format!("{}::{}", m.name(), name)
            }
            _ => name.to_string(),
        }
    }
}
