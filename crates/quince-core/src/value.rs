use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use num::rational::Rational64;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use regex::Regex;

use crate::ast::RegexOptions;
use crate::error::QuinceError;
use crate::namespace::NamespaceRef;
use crate::runtime::RuntimeCtx;
use crate::symbols::{is_identifier_char, Identifier};
use crate::vm::bytecode::FunctionPrototype;
use crate::vm::runtime::VariableScope;

pub type StrRef = Arc<RwLock<String>>;
pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
pub type HashRef = Arc<RwLock<HashTable>>;
pub type ModuleRef = Arc<Module>;
pub type ExceptionRef = Arc<ExceptionObject>;
pub type NativeFnPtr = fn(&RuntimeCtx, Vec<Value>) -> Result<Value, QuinceError>;

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Rational(Rational64),
    String(StrRef),
    Symbol(Arc<str>),
    Regex(RegexValue),
    Identifier(Identifier),
    List(List),
    Array(ArrayRef),
    Hash(HashRef),
    Set(im::HashSet<Value>),
    Function(Arc<Closure>),
    Native(Arc<NativeFn>),
    Method(Arc<BoundMethod>),
    Module(ModuleRef),
    Namespace(NamespaceRef),
    Exception(ExceptionRef),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::new(RwLock::new(s.into())))
    }

    pub fn symbol(s: &str) -> Value {
        Value::Symbol(Arc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn hash(table: HashTable) -> Value {
        Value::Hash(Arc::new(RwLock::new(table)))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Set(items.into_iter().collect())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(List::from_vec(items))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Method(_)
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "NilClass",
            Value::Bool(true) => "TrueClass",
            Value::Bool(false) => "FalseClass",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Rational(_) => "Rational",
            Value::String(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::Regex(_) => "Regexp",
            Value::Identifier(_) => "Identifier",
            Value::List(_) => "List",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Set(_) => "Set",
            Value::Function(_) | Value::Native(_) => "Proc",
            Value::Method(_) => "Method",
            Value::Module(m) if m.is_class() => "Class",
            Value::Module(_) => "Module",
            Value::Namespace(_) => "Namespace",
            Value::Exception(_) => "Exception",
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.read().clone()),
            _ => None,
        }
    }

    /// Elements of any sequential value; `nil` is the empty sequence.
    pub fn seq_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Nil => Some(Vec::new()),
            Value::List(list) => Some(list.to_vec()),
            Value::Array(items) => Some(items.read().clone()),
            Value::Set(set) => Some(set.iter().cloned().collect()),
            Value::Hash(table) => Some(
                table
                    .read()
                    .iter()
                    .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Text used by `str`, `puts` and string interpolation: strings are raw,
    /// everything else prints as source.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::String(s) => s.read().clone(),
            Value::Symbol(s) => s.to_string(),
            Value::Identifier(id) => id.name().to_string(),
            Value::Exception(exc) => exc.message().to_string(),
            Value::Module(m) => m.name().to_string(),
            Value::Namespace(ns) => ns.name().to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || a.to_bits() == b.to_bits(),
            (Value::Rational(a), Value::Rational(b)) => a == b,
            (Value::String(a), Value::String(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Identifier(a), Value::Identifier(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Hash(a), Value::Hash(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => {
                a.name == b.name && a.receiver == b.receiver
            }
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Float(f) => {
                if *f == 0.0 {
                    0u64.hash(state)
                } else {
                    f.to_bits().hash(state)
                }
            }
            Value::Rational(r) => r.hash(state),
            Value::String(s) => s.read().hash(state),
            Value::Symbol(s) => s.hash(state),
            Value::Regex(r) => r.source.hash(state),
            Value::Identifier(id) => id.hash(state),
            Value::List(list) => {
                for item in list.iter() {
                    item.hash(state);
                }
            }
            Value::Array(items) => items.read().hash(state),
            Value::Hash(table) => table.read().len().hash(state),
            Value::Set(set) => set.len().hash(state),
            Value::Function(f) => (Arc::as_ptr(f) as usize).hash(state),
            Value::Native(f) => (Arc::as_ptr(f) as usize).hash(state),
            Value::Method(m) => m.name.hash(state),
            Value::Module(m) => (Arc::as_ptr(m) as usize).hash(state),
            Value::Namespace(ns) => (Arc::as_ptr(ns) as usize).hash(state),
            Value::Exception(e) => (Arc::as_ptr(e) as usize).hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

fn write_seq<'a>(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    close: &str,
    items: impl Iterator<Item = &'a Value>,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            '\x1b' => out.push_str("\\e"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn format_float(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    let text = n.to_string();
    if text.contains(['.', 'e']) {
        text
    } else {
        format!("{}.0", text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => f.write_str(&format_float(*n)),
            Value::Rational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Value::String(s) => write!(f, "\"{}\"", escape_string(&s.read())),
            Value::Symbol(s) => {
                if !s.is_empty() && s.chars().all(is_identifier_char) && !s.starts_with(':') {
                    write!(f, ":{}", s)
                } else {
                    write!(f, ":\"{}\"", escape_string(s))
                }
            }
            Value::Regex(r) => {
                write!(f, "#r/{}/{}", r.source.replace('/', "\\/"), r.options.letters())
            }
            Value::Identifier(id) => write!(f, "{}", id),
            Value::List(list) => write_seq(f, "(", ")", list.iter()),
            Value::Array(items) => write_seq(f, "[", "]", items.read().iter()),
            Value::Hash(table) => {
                f.write_str("{")?;
                for (i, (k, v)) in table.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Set(set) => write_seq(f, "#{", "}", set.iter()),
            Value::Function(closure) => match closure.proto.name() {
                Some(name) => write!(f, "#<Proc {}>", name),
                None => f.write_str("#<Proc>"),
            },
            Value::Native(native) => write!(f, "#<Proc {}>", native.name),
            Value::Method(m) => match &m.receiver {
                Some(receiver) => {
                    write!(f, "#<Method {}/{}>", receiver.to_display_string(), m.name)
                }
                None => write!(f, "#<Proc :{}>", m.name),
            },
            Value::Module(m) => f.write_str(m.name()),
            Value::Namespace(ns) => f.write_str(ns.name()),
            Value::Exception(exc) => write!(f, "#<{}: {}>", exc.class().name(), exc.message()),
        }
    }
}

enum ListCell {
    Empty,
    Cons { head: Value, tail: List, len: usize },
}

/// Persistent singly-linked list. Every empty list is the same shared
/// instance.
#[derive(Clone)]
pub struct List(Arc<ListCell>);

static EMPTY_LIST: Lazy<List> = Lazy::new(|| List(Arc::new(ListCell::Empty)));

impl List {
    pub fn empty() -> List {
        EMPTY_LIST.clone()
    }

    /// Whether this is the shared empty list.
    pub fn is_empty_singleton(&self) -> bool {
        Arc::ptr_eq(&self.0, &EMPTY_LIST.0)
    }

    pub fn cons(head: Value, tail: List) -> List {
        let len = tail.len() + 1;
        List(Arc::new(ListCell::Cons { head, tail, len }))
    }

    pub fn from_vec(items: Vec<Value>) -> List {
        items
            .into_iter()
            .rev()
            .fold(List::empty(), |tail, head| List::cons(head, tail))
    }

    pub fn len(&self) -> usize {
        match &*self.0 {
            ListCell::Empty => 0,
            ListCell::Cons { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&*self.0, ListCell::Empty)
    }

    pub fn first(&self) -> Option<&Value> {
        match &*self.0 {
            ListCell::Empty => None,
            ListCell::Cons { head, .. } => Some(head),
        }
    }

    pub fn rest(&self) -> List {
        match &*self.0 {
            ListCell::Empty => List::empty(),
            ListCell::Cons { tail, .. } => tail.clone(),
        }
    }

    pub fn iter(&self) -> ListIter<'_> {
        ListIter { cursor: self }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().cloned().collect()
    }
}

// Unlinks the spine iteratively so long lists do not overflow the stack.
impl Drop for ListCell {
    fn drop(&mut self) {
        let ListCell::Cons { tail, .. } = self else {
            return;
        };
        let mut next = std::mem::replace(tail, List::empty());
        loop {
            let List(cell) = next;
            match Arc::try_unwrap(cell) {
                Ok(mut inner) => match &mut inner {
                    ListCell::Cons { tail, .. } => next = std::mem::replace(tail, List::empty()),
                    ListCell::Empty => break,
                },
                Err(_) => break,
            }
        }
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

pub struct ListIter<'a> {
    cursor: &'a List,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match &*self.cursor.0 {
            ListCell::Empty => None,
            ListCell::Cons { head, tail, .. } => {
                self.cursor = tail;
                Some(head)
            }
        }
    }
}

/// Insertion-ordered key/value table backing hash literals.
#[derive(Clone, Debug, Default)]
pub struct HashTable {
    entries: Vec<(Value, Value)>,
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> + '_ {
        self.entries.iter()
    }
}

impl PartialEq for HashTable {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl FromIterator<(Value, Value)> for HashTable {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        let mut table = HashTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

#[derive(Clone)]
pub struct RegexValue {
    regex: Arc<Regex>,
    source: Arc<str>,
    options: RegexOptions,
}

impl RegexValue {
    pub fn new(source: &str, options: RegexOptions) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Arc::new(options.build(source)?),
            source: Arc::from(source),
            options,
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn options(&self) -> RegexOptions {
        self.options
    }
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.options == other.options
    }
}

/// Function value produced by `fn`.
pub struct Closure {
    pub proto: Arc<FunctionPrototype>,
    pub scope: Arc<VariableScope>,
    pub self_value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub const fn at_least(n: usize) -> Self {
        Self { min: n, max: None }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

pub struct NativeFn {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFnPtr,
}

/// `Module/name` reference to a method of a non-namespace module. Without a
/// receiver it sends `name` to its first argument (a symbol passed as a block).
pub struct BoundMethod {
    pub receiver: Option<Value>,
    pub name: Arc<str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Object,
    Module,
    Class,
    NilClass,
    TrueClass,
    FalseClass,
    Integer,
    Float,
    Rational,
    String,
    Symbol,
    Regexp,
    Identifier,
    List,
    Array,
    Hash,
    Set,
    Proc,
    Method,
    Namespace,
    Exception,
    Kernel,
}

/// Class or module. Holds a constant table so `Foo::Bar` paths can be walked
/// and extended.
pub struct Module {
    name: String,
    superclass: Option<ModuleRef>,
    is_class: bool,
    builtin: Option<Builtin>,
    constants: RwLock<HashMap<String, Value>>,
}

impl Module {
    pub fn new_module(name: impl Into<String>) -> ModuleRef {
        Arc::new(Self {
            name: name.into(),
            superclass: None,
            is_class: false,
            builtin: None,
            constants: RwLock::new(HashMap::new()),
        })
    }

    pub fn new_class(
        name: impl Into<String>,
        superclass: Option<ModuleRef>,
        builtin: Option<Builtin>,
    ) -> ModuleRef {
        Arc::new(Self {
            name: name.into(),
            superclass,
            is_class: true,
            builtin,
            constants: RwLock::new(HashMap::new()),
        })
    }

    pub fn new_builtin_module(name: impl Into<String>, builtin: Builtin) -> ModuleRef {
        Arc::new(Self {
            name: name.into(),
            superclass: None,
            is_class: false,
            builtin: Some(builtin),
            constants: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_class(&self) -> bool {
        self.is_class
    }

    pub fn builtin(&self) -> Option<Builtin> {
        self.builtin
    }

    pub fn superclass(&self) -> Option<&ModuleRef> {
        self.superclass.as_ref()
    }

    pub fn const_get(&self, name: &str) -> Option<Value> {
        self.constants.read().get(name).cloned()
    }

    pub fn const_set(&self, name: &str, value: Value) {
        self.constants.write().insert(name.to_string(), value);
    }

    pub fn const_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.constants.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// `self` or one of its superclasses is `ancestor`.
    pub fn is_subclass_of(self: &Arc<Self>, ancestor: &ModuleRef) -> bool {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if Arc::ptr_eq(&class, ancestor) {
                return true;
            }
            current = class.superclass.clone();
        }
        false
    }

    pub fn ancestors(self: &Arc<Self>) -> Vec<ModuleRef> {
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(class) = current {
            current = class.superclass.clone();
            out.push(class);
        }
        out
    }
}

/// Raised exception instance.
pub struct ExceptionObject {
    class: ModuleRef,
    message: String,
    location: OnceCell<(String, usize)>,
}

impl ExceptionObject {
    pub fn new(class: ModuleRef, message: impl Into<String>) -> ExceptionRef {
        Arc::new(Self {
            class,
            message: message.into(),
            location: OnceCell::new(),
        })
    }

    pub fn class(&self) -> &ModuleRef {
        &self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// File and line the exception first escaped from; set once.
    pub fn location(&self) -> Option<&(String, usize)> {
        self.location.get()
    }

    pub fn set_location(&self, file: &str, line: usize) {
        let _ = self.location.set((file.to_string(), line));
    }

    pub fn is_a(&self, class: &ModuleRef) -> bool {
        self.class.is_subclass_of(class)
    }
}

impl fmt::Debug for ExceptionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class.name(), self.message)
    }
}

impl fmt::Display for ExceptionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class.name(), self.message)
    }
}
