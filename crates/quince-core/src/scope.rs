use crate::symbols::Identifier;
use crate::vm::bytecode::Label;

/// Address of a local: slot within the owning function frame plus the number
/// of function boundaries between the use site and that frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalReference {
    pub slot: usize,
    pub depth: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarRef {
    Local(LocalReference),
    /// Not a local; resolved against the current namespace at runtime.
    Namespace(Identifier),
}

#[derive(Clone, Debug)]
pub struct RecurTarget {
    pub label: Label,
    pub slots: Vec<usize>,
}

type Bindings = Vec<(Identifier, usize)>;

fn bind(bindings: &mut Bindings, name: &Identifier, slot: usize) {
    match bindings.iter_mut().find(|(n, _)| n == name) {
        Some(entry) => entry.1 = slot,
        None => bindings.push((name.clone(), slot)),
    }
}

fn lookup(bindings: &Bindings, name: &Identifier) -> Option<usize> {
    bindings.iter().find(|(n, _)| n == name).map(|(_, slot)| *slot)
}

#[derive(Debug, Default)]
pub struct TopLevelScope {
    variables: Bindings,
    local_count: usize,
}

#[derive(Debug)]
pub struct FnScope {
    name: Option<Identifier>,
    self_slot: Option<usize>,
}

impl FnScope {
    pub fn name(&self) -> Option<&Identifier> {
        self.name.as_ref()
    }

    /// Slot in the enclosing frame that receives the closure when named.
    pub fn self_slot(&self) -> Option<usize> {
        self.self_slot
    }
}

#[derive(Debug, Default)]
pub struct OverloadScope {
    variables: Bindings,
    local_count: usize,
    splat: bool,
    block_arg: Option<usize>,
    loop_label: Option<Label>,
    recur_slots: Vec<usize>,
}

impl OverloadScope {
    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn is_splat(&self) -> bool {
        self.splat
    }

    pub fn block_arg(&self) -> Option<usize> {
        self.block_arg
    }
}

#[derive(Debug, Default)]
pub struct LetScope {
    variables: Bindings,
    loop_label: Option<Label>,
    recur_slots: Vec<usize>,
}

#[derive(Debug)]
pub enum Scope {
    TopLevel(TopLevelScope),
    Fn(FnScope),
    Overload(OverloadScope),
    Let(LetScope),
}

/// Lexical scope frames, innermost last. The bottom frame is always the
/// top-level scope.
#[derive(Debug)]
pub struct ScopeChain {
    frames: Vec<Scope>,
}

impl Default for ScopeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeChain {
    pub fn new() -> Self {
        Self {
            frames: vec![Scope::TopLevel(TopLevelScope::default())],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Enters a function. A named function reserves a slot for itself in the
    /// enclosing storage so its body can refer to it directly.
    pub fn push_fn(&mut self, name: Option<Identifier>) -> &FnScope {
        let self_slot = name.as_ref().map(|name| self.new_local(name));
        self.frames.push(Scope::Fn(FnScope { name, self_slot }));
        match self.frames.last() {
            Some(Scope::Fn(scope)) => scope,
            _ => unreachable!("just pushed a fn scope"),
        }
    }

    pub fn push_overload(&mut self) {
        self.frames.push(Scope::Overload(OverloadScope::default()));
    }

    pub fn push_let(&mut self) {
        self.frames.push(Scope::Let(LetScope::default()));
    }

    /// Leaves the innermost frame. The top-level frame is never popped.
    pub fn pop(&mut self) -> Option<Scope> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn find_var(&self, name: &Identifier) -> VarRef {
        let mut depth = 0;
        for frame in self.frames.iter().rev() {
            let found = match frame {
                Scope::Let(scope) => lookup(&scope.variables, name),
                Scope::Overload(scope) => lookup(&scope.variables, name),
                Scope::TopLevel(scope) => lookup(&scope.variables, name),
                Scope::Fn(scope) => {
                    if let (Some(own), Some(slot)) = (&scope.name, scope.self_slot) {
                        if own == name {
                            return VarRef::Local(LocalReference {
                                slot,
                                depth: depth + 1,
                            });
                        }
                    }
                    depth += 1;
                    None
                }
            };
            if let Some(slot) = found {
                return VarRef::Local(LocalReference { slot, depth });
            }
        }
        VarRef::Namespace(name.clone())
    }

    /// Declares `name` in the innermost binding frame and gives it a fresh
    /// slot in the nearest frame that owns storage.
    pub fn new_local(&mut self, name: &Identifier) -> usize {
        let slot = self.store_new_local();
        for frame in self.frames.iter_mut().rev() {
            match frame {
                Scope::Let(scope) => {
                    bind(&mut scope.variables, name, slot);
                    break;
                }
                Scope::Overload(scope) => {
                    bind(&mut scope.variables, name, slot);
                    break;
                }
                Scope::TopLevel(scope) => {
                    bind(&mut scope.variables, name, slot);
                    break;
                }
                Scope::Fn(_) => continue,
            }
        }
        slot
    }

    /// Allocates the next slot of the nearest storage-owning frame, walking
    /// outward past `let` frames.
    pub fn store_new_local(&mut self) -> usize {
        for frame in self.frames.iter_mut().rev() {
            let count = match frame {
                Scope::Overload(scope) => &mut scope.local_count,
                Scope::TopLevel(scope) => &mut scope.local_count,
                Scope::Let(_) | Scope::Fn(_) => continue,
            };
            let slot = *count;
            *count += 1;
            return slot;
        }
        unreachable!("scope chain always ends in a top-level scope")
    }

    /// Slot count of the nearest storage-owning frame.
    pub fn local_count(&self) -> usize {
        for frame in self.frames.iter().rev() {
            match frame {
                Scope::Overload(scope) => return scope.local_count,
                Scope::TopLevel(scope) => return scope.local_count,
                Scope::Let(_) | Scope::Fn(_) => continue,
            }
        }
        0
    }

    /// Marks the innermost overload as taking a rest argument.
    pub fn mark_splat(&mut self) {
        if let Some(Scope::Overload(scope)) = self.frames.last_mut() {
            scope.splat = true;
        }
    }

    /// Records the innermost overload's block argument; `recur` never rebinds it.
    pub fn mark_block_arg(&mut self, slot: usize) {
        if let Some(Scope::Overload(scope)) = self.frames.last_mut() {
            scope.block_arg = Some(slot);
        }
    }

    /// Makes the innermost `let` or overload a recursion target that jumps to
    /// `label` and rebinds the variables declared so far.
    pub fn set_loop_target(&mut self, label: Label) {
        match self.frames.last_mut() {
            Some(Scope::Let(scope)) => {
                scope.recur_slots = scope.variables.iter().map(|(_, slot)| *slot).collect();
                scope.loop_label = Some(label);
            }
            Some(Scope::Overload(scope)) => {
                let block = scope.block_arg;
                scope.recur_slots = scope
                    .variables
                    .iter()
                    .map(|(_, slot)| *slot)
                    .filter(|slot| Some(*slot) != block)
                    .collect();
                scope.loop_label = Some(label);
            }
            _ => {}
        }
    }

    /// Nearest enclosing `loop` or fn overload.
    pub fn find_recur_target(&self) -> Option<RecurTarget> {
        for frame in self.frames.iter().rev() {
            match frame {
                Scope::Let(scope) => {
                    if let Some(label) = scope.loop_label {
                        return Some(RecurTarget {
                            label,
                            slots: scope.recur_slots.clone(),
                        });
                    }
                }
                Scope::Overload(scope) => {
                    return scope.loop_label.map(|label| RecurTarget {
                        label,
                        slots: scope.recur_slots.clone(),
                    })
                }
                Scope::Fn(_) | Scope::TopLevel(_) => return None,
            }
        }
        None
    }
}
