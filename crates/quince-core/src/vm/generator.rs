use std::sync::Arc;

use crate::ast::Span;
use crate::scope::LocalReference;
use crate::value::Value;
use crate::vm::bytecode::{Chunk, FunctionPrototype, Instruction, Label};

/// Emits instructions for one top-level form or one function body.
pub struct Generator {
    code: Vec<Instruction>,
    literals: Vec<Value>,
    functions: Vec<Arc<FunctionPrototype>>,
    labels: Vec<Option<usize>>,
    referenced: Vec<bool>,
    span: Span,
    file: String,
    stack_locals: usize,
}

impl Generator {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            code: Vec::new(),
            literals: Vec::new(),
            functions: Vec::new(),
            labels: Vec::new(),
            referenced: Vec::new(),
            span: Span::default(),
            file: file.into(),
            stack_locals: 0,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Span attached to instructions emitted from now on.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn line(&self) -> usize {
        self.span.line
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        self.referenced.push(false);
        Label(self.labels.len() - 1)
    }

    /// Places `label` at the next instruction.
    pub fn set_label(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.code.len());
        }
    }

    pub fn is_label_set(&self, label: Label) -> bool {
        self.labels.get(label.0).is_some_and(Option::is_some)
    }

    fn emit(&mut self, make: impl FnOnce(Span) -> Instruction) {
        let instr = make(self.span);
        self.code.push(instr);
    }

    fn reference(&mut self, label: Label) -> Label {
        if let Some(flag) = self.referenced.get_mut(label.0) {
            *flag = true;
        }
        label
    }

    fn add_literal(&mut self, value: Value) -> usize {
        self.literals.push(value);
        self.literals.len() - 1
    }

    pub fn push_nil(&mut self) {
        self.emit(Instruction::PushNil);
    }

    pub fn push_true(&mut self) {
        self.emit(Instruction::PushTrue);
    }

    pub fn push_false(&mut self) {
        self.emit(Instruction::PushFalse);
    }

    pub fn push_self(&mut self) {
        self.emit(Instruction::PushSelf);
    }

    pub fn push_literal(&mut self, value: Value) {
        match value {
            Value::Nil => self.push_nil(),
            Value::Bool(true) => self.push_true(),
            Value::Bool(false) => self.push_false(),
            other => {
                let idx = self.add_literal(other);
                self.emit(|span| Instruction::PushLiteral(idx, span));
            }
        }
    }

    pub fn string_dup(&mut self) {
        self.emit(Instruction::StringDup);
    }

    pub fn push_local(&mut self, reference: LocalReference) {
        self.emit(|span| Instruction::PushLocal(reference, span));
    }

    pub fn set_local(&mut self, reference: LocalReference) {
        self.emit(|span| Instruction::SetLocal(reference, span));
    }

    pub fn pop(&mut self) {
        self.emit(Instruction::Pop);
    }

    pub fn dup(&mut self) {
        self.emit(Instruction::Dup);
    }

    pub fn swap(&mut self) {
        self.emit(Instruction::Swap);
    }

    pub fn goto(&mut self, label: Label) {
        let label = self.reference(label);
        self.emit(|span| Instruction::Goto(label, span));
    }

    pub fn goto_if_false(&mut self, label: Label) {
        let label = self.reference(label);
        self.emit(|span| Instruction::GotoIfFalse(label, span));
    }

    pub fn goto_if_true(&mut self, label: Label) {
        let label = self.reference(label);
        self.emit(|span| Instruction::GotoIfTrue(label, span));
    }

    pub fn create_closure(&mut self, proto: FunctionPrototype) {
        self.functions.push(Arc::new(proto));
        let idx = self.functions.len() - 1;
        self.emit(|span| Instruction::CreateClosure(idx, span));
    }

    pub fn passed_arg(&mut self, index: usize) {
        self.emit(|span| Instruction::PassedArg(index, span));
    }

    pub fn push_block(&mut self) {
        self.emit(Instruction::PushBlock);
    }

    pub fn call(&mut self, argc: usize) {
        self.emit(|span| Instruction::Call(argc, span));
    }

    pub fn call_namespace_fn(&mut self, name: &str, argc: usize) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::CallNamespaceFn(name, argc, span));
    }

    pub fn send(&mut self, name: &str, argc: usize) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::Send(name, argc, span));
    }

    pub fn send_with_block(&mut self, name: &str, argc: usize) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::SendWithBlock(name, argc, span));
    }

    pub fn send_with_splat(&mut self, name: &str, argc: usize) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::SendWithSplat(name, argc, span));
    }

    pub fn cast_array(&mut self) {
        self.emit(Instruction::CastArray);
    }

    pub fn make_array(&mut self, count: usize) {
        self.emit(|span| Instruction::MakeArray(count, span));
    }

    pub fn make_hash(&mut self, pairs: usize) {
        self.emit(|span| Instruction::MakeHash(pairs, span));
    }

    pub fn make_set(&mut self, count: usize) {
        self.emit(|span| Instruction::MakeSet(count, span));
    }

    pub fn make_list(&mut self, count: usize) {
        self.emit(|span| Instruction::MakeList(count, span));
    }

    pub fn intern_identifier(&mut self, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::InternIdentifier(name, span));
    }

    pub fn push_const_top(&mut self) {
        self.emit(Instruction::PushConstTop);
    }

    pub fn find_const(&mut self, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::FindConst(name, span));
    }

    /// Like `find_const`, but creates an empty module when missing.
    pub fn open_module(&mut self, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::OpenModule(name, span));
    }

    pub fn const_set(&mut self, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::ConstSet(name, span));
    }

    pub fn push_current_namespace(&mut self) {
        self.emit(Instruction::PushCurrentNamespace);
    }

    pub fn namespace_get(&mut self, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::NamespaceGet(name, span));
    }

    pub fn namespace_set(&mut self, name: &str) {
        let name: Arc<str> = Arc::from(name);
        self.emit(|span| Instruction::NamespaceSet(name, span));
    }

    pub fn setup_handler(&mut self, label: Label) {
        let label = self.reference(label);
        self.emit(|span| Instruction::SetupHandler(label, span));
    }

    pub fn pop_handler(&mut self) {
        self.emit(Instruction::PopHandler);
    }

    pub fn push_current_exception(&mut self) {
        self.emit(Instruction::PushCurrentException);
    }

    pub fn clear_exception(&mut self) {
        self.emit(Instruction::ClearException);
    }

    /// Reserves a frame-private slot for saved exception state.
    pub fn new_stack_local(&mut self) -> usize {
        self.stack_locals += 1;
        self.stack_locals - 1
    }

    pub fn save_exception(&mut self, slot: usize) {
        self.emit(|span| Instruction::SaveException(slot, span));
    }

    pub fn restore_exception(&mut self, slot: usize) {
        self.emit(|span| Instruction::RestoreException(slot, span));
    }

    pub fn reraise(&mut self) {
        self.emit(Instruction::Reraise);
    }

    pub fn raise_exception(&mut self) {
        self.emit(Instruction::RaiseException);
    }

    pub fn check_interrupts(&mut self) {
        self.emit(Instruction::CheckInterrupts);
    }

    pub fn ret(&mut self) {
        self.emit(Instruction::Ret);
    }

    /// Resolves labels and produces the chunk. Fails when a jump refers to a
    /// label that was never placed.
    pub fn close(self) -> Result<Chunk, String> {
        let mut targets = Vec::with_capacity(self.labels.len());
        for (idx, (target, used)) in self.labels.iter().zip(&self.referenced).enumerate() {
            match target {
                Some(at) => targets.push(*at),
                None if *used => return Err(format!("Label {} was never set", Label(idx))),
                None => targets.push(usize::MAX),
            }
        }
        Ok(Chunk::from_parts(
            self.code,
            self.literals,
            self.functions,
            targets,
            self.file,
        ))
    }
}
