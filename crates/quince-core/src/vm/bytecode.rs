use std::fmt;
use std::sync::Arc;

use crate::ast::Span;
use crate::scope::LocalReference;
use crate::value::Value;

/// Jump target. Resolved to an instruction index when the generator closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub usize);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug)]
pub struct FunctionPrototype {
    pub name: Option<String>,
    pub doc: Option<String>,
    pub chunk: Chunk,
    /// Fewest arguments any overload accepts.
    pub required_args: usize,
    /// Most positional arguments any overload binds.
    pub total_args: usize,
    /// Slot receiving surplus arguments as an array.
    pub splat_index: Option<usize>,
    pub local_count: usize,
}

impl FunctionPrototype {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Arity in the `N` / `N+` / `N..M` notation used by error messages.
    pub fn arity_description(&self) -> String {
        if self.splat_index.is_some() {
            format!("{}+", self.required_args)
        } else if self.required_args == self.total_args {
            self.required_args.to_string()
        } else {
            format!("{}..{}", self.required_args, self.total_args)
        }
    }
}

#[derive(Clone, Debug)]
pub enum Instruction {
    PushNil(Span),
    PushTrue(Span),
    PushFalse(Span),
    PushSelf(Span),
    PushLiteral(usize, Span),
    /// Replaces the string on top of the stack with a fresh copy.
    StringDup(Span),
    PushLocal(LocalReference, Span),
    /// Stores the top of the stack without popping it.
    SetLocal(LocalReference, Span),
    Pop(Span),
    Dup(Span),
    Swap(Span),
    Goto(Label, Span),
    GotoIfFalse(Label, Span),
    GotoIfTrue(Label, Span),
    CreateClosure(usize, Span),
    /// Pushes whether argument `n` (0-based) was supplied by the caller.
    PassedArg(usize, Span),
    PushBlock(Span),
    Call(usize, Span),
    CallNamespaceFn(Arc<str>, usize, Span),
    Send(Arc<str>, usize, Span),
    SendWithBlock(Arc<str>, usize, Span),
    SendWithSplat(Arc<str>, usize, Span),
    CastArray(Span),
    MakeArray(usize, Span),
    /// Pops `n` key/value pairs.
    MakeHash(usize, Span),
    MakeSet(usize, Span),
    MakeList(usize, Span),
    InternIdentifier(Arc<str>, Span),
    PushConstTop(Span),
    FindConst(Arc<str>, Span),
    OpenModule(Arc<str>, Span),
    ConstSet(Arc<str>, Span),
    PushCurrentNamespace(Span),
    NamespaceGet(Arc<str>, Span),
    NamespaceSet(Arc<str>, Span),
    SetupHandler(Label, Span),
    PopHandler(Span),
    PushCurrentException(Span),
    ClearException(Span),
    SaveException(usize, Span),
    RestoreException(usize, Span),
    Reraise(Span),
    RaiseException(Span),
    CheckInterrupts(Span),
    Ret(Span),
}

impl Instruction {
    pub fn span(&self) -> Span {
        match self {
            Instruction::PushNil(span)
            | Instruction::PushTrue(span)
            | Instruction::PushFalse(span)
            | Instruction::PushSelf(span)
            | Instruction::PushLiteral(_, span)
            | Instruction::StringDup(span)
            | Instruction::PushLocal(_, span)
            | Instruction::SetLocal(_, span)
            | Instruction::Pop(span)
            | Instruction::Dup(span)
            | Instruction::Swap(span)
            | Instruction::Goto(_, span)
            | Instruction::GotoIfFalse(_, span)
            | Instruction::GotoIfTrue(_, span)
            | Instruction::CreateClosure(_, span)
            | Instruction::PassedArg(_, span)
            | Instruction::PushBlock(span)
            | Instruction::Call(_, span)
            | Instruction::CallNamespaceFn(_, _, span)
            | Instruction::Send(_, _, span)
            | Instruction::SendWithBlock(_, _, span)
            | Instruction::SendWithSplat(_, _, span)
            | Instruction::CastArray(span)
            | Instruction::MakeArray(_, span)
            | Instruction::MakeHash(_, span)
            | Instruction::MakeSet(_, span)
            | Instruction::MakeList(_, span)
            | Instruction::InternIdentifier(_, span)
            | Instruction::PushConstTop(span)
            | Instruction::FindConst(_, span)
            | Instruction::OpenModule(_, span)
            | Instruction::ConstSet(_, span)
            | Instruction::PushCurrentNamespace(span)
            | Instruction::NamespaceGet(_, span)
            | Instruction::NamespaceSet(_, span)
            | Instruction::SetupHandler(_, span)
            | Instruction::PopHandler(span)
            | Instruction::PushCurrentException(span)
            | Instruction::ClearException(span)
            | Instruction::SaveException(_, span)
            | Instruction::RestoreException(_, span)
            | Instruction::Reraise(span)
            | Instruction::RaiseException(span)
            | Instruction::CheckInterrupts(span)
            | Instruction::Ret(span) => *span,
        }
    }

    fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::PushNil(_) => "push_nil",
            Instruction::PushTrue(_) => "push_true",
            Instruction::PushFalse(_) => "push_false",
            Instruction::PushSelf(_) => "push_self",
            Instruction::PushLiteral(..) => "push_literal",
            Instruction::StringDup(_) => "string_dup",
            Instruction::PushLocal(..) => "push_local",
            Instruction::SetLocal(..) => "set_local",
            Instruction::Pop(_) => "pop",
            Instruction::Dup(_) => "dup",
            Instruction::Swap(_) => "swap",
            Instruction::Goto(..) => "goto",
            Instruction::GotoIfFalse(..) => "goto_if_false",
            Instruction::GotoIfTrue(..) => "goto_if_true",
            Instruction::CreateClosure(..) => "create_closure",
            Instruction::PassedArg(..) => "passed_arg",
            Instruction::PushBlock(_) => "push_block",
            Instruction::Call(..) => "call",
            Instruction::CallNamespaceFn(..) => "call_ns_fn",
            Instruction::Send(..) => "send",
            Instruction::SendWithBlock(..) => "send_with_block",
            Instruction::SendWithSplat(..) => "send_with_splat",
            Instruction::CastArray(_) => "cast_array",
            Instruction::MakeArray(..) => "make_array",
            Instruction::MakeHash(..) => "make_hash",
            Instruction::MakeSet(..) => "make_set",
            Instruction::MakeList(..) => "make_list",
            Instruction::InternIdentifier(..) => "intern_identifier",
            Instruction::PushConstTop(_) => "push_const_top",
            Instruction::FindConst(..) => "find_const",
            Instruction::OpenModule(..) => "open_module",
            Instruction::ConstSet(..) => "const_set",
            Instruction::PushCurrentNamespace(_) => "push_current_ns",
            Instruction::NamespaceGet(..) => "ns_get",
            Instruction::NamespaceSet(..) => "ns_set",
            Instruction::SetupHandler(..) => "setup_handler",
            Instruction::PopHandler(_) => "pop_handler",
            Instruction::PushCurrentException(_) => "push_current_exception",
            Instruction::ClearException(_) => "clear_exception",
            Instruction::SaveException(..) => "save_exception",
            Instruction::RestoreException(..) => "restore_exception",
            Instruction::Reraise(_) => "reraise",
            Instruction::RaiseException(_) => "raise_exc",
            Instruction::CheckInterrupts(_) => "check_interrupts",
            Instruction::Ret(_) => "ret",
        }
    }

    fn operands(&self, chunk: &Chunk) -> String {
        match self {
            Instruction::PushLiteral(idx, _) => match chunk.literals.get(*idx) {
                Some(value) => format!("{} ; {}", idx, value),
                None => idx.to_string(),
            },
            Instruction::PushLocal(r, _) | Instruction::SetLocal(r, _) => {
                format!("{} @{}", r.slot, r.depth)
            }
            Instruction::Goto(label, _)
            | Instruction::GotoIfFalse(label, _)
            | Instruction::GotoIfTrue(label, _)
            | Instruction::SetupHandler(label, _) => match chunk.label_targets.get(label.0) {
                Some(target) => format!("{} -> {:04}", label, target),
                None => label.to_string(),
            },
            Instruction::CreateClosure(idx, _) => match chunk.functions.get(*idx) {
                Some(proto) => format!("{} ; {}", idx, proto.name().unwrap_or("fn")),
                None => idx.to_string(),
            },
            Instruction::CallNamespaceFn(name, argc, _)
            | Instruction::Send(name, argc, _)
            | Instruction::SendWithBlock(name, argc, _)
            | Instruction::SendWithSplat(name, argc, _) => format!("{} {}", name, argc),
            Instruction::PassedArg(n, _)
            | Instruction::Call(n, _)
            | Instruction::MakeArray(n, _)
            | Instruction::MakeHash(n, _)
            | Instruction::MakeSet(n, _)
            | Instruction::MakeList(n, _)
            | Instruction::SaveException(n, _)
            | Instruction::RestoreException(n, _) => n.to_string(),
            Instruction::InternIdentifier(name, _)
            | Instruction::FindConst(name, _)
            | Instruction::OpenModule(name, _)
            | Instruction::ConstSet(name, _)
            | Instruction::NamespaceGet(name, _)
            | Instruction::NamespaceSet(name, _) => name.to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Chunk {
    code: Vec<Instruction>,
    literals: Vec<Value>,
    functions: Vec<Arc<FunctionPrototype>>,
    label_targets: Vec<usize>,
    file: String,
}

impl Chunk {
    pub(crate) fn from_parts(
        code: Vec<Instruction>,
        literals: Vec<Value>,
        functions: Vec<Arc<FunctionPrototype>>,
        label_targets: Vec<usize>,
        file: String,
    ) -> Self {
        Self {
            code,
            literals,
            functions,
            label_targets,
            file,
        }
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    pub fn functions(&self) -> &[Arc<FunctionPrototype>] {
        &self.functions
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn label_target(&self, label: Label) -> Option<usize> {
        self.label_targets.get(label.0).copied()
    }

    fn write_disassembly(&self, f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
        writeln!(f, "== {} ({}) ==", title, self.file)?;
        let mut line = 0;
        for (idx, instr) in self.code.iter().enumerate() {
            let span = instr.span();
            let line_col = if span.line == line {
                "   |".to_string()
            } else {
                line = span.line;
                format!("{:4}", span.line)
            };
            let operands = instr.operands(self);
            if operands.is_empty() {
                writeln!(f, "{:04} {} {}", idx, line_col, instr.mnemonic())?;
            } else {
                writeln!(f, "{:04} {} {:<22} {}", idx, line_col, instr.mnemonic(), operands)?;
            }
        }
        for proto in &self.functions {
            writeln!(f)?;
            let title = format!(
                "fn {} [{} args, {} locals]",
                proto.name().unwrap_or("__fn__"),
                proto.arity_description(),
                proto.local_count
            );
            proto.chunk.write_disassembly(f, &title)?;
        }
        Ok(())
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_disassembly(f, "toplevel")
    }
}
