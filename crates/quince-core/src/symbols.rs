use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

static CONSTANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Z]\w*::)*[A-Z]\w*$").expect("constant regex"));

static GLOBAL_SYMBOLS: Lazy<Arc<SymbolTable>> = Lazy::new(|| Arc::new(SymbolTable::new()));

/// Characters that may never appear in a bare identifier.
pub fn is_identifier_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, '\'' | '`' | '~' | '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | ','))
}

/// Classification computed once when a name is first interned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentifierKind {
    Plain,
    Constant(Vec<String>),
    Qualified { namespace: String, name: String },
}

/// Backing storage of an interned name. Deliberately not `Clone`: the only way
/// to obtain another handle to an identifier is through its table.
#[derive(Debug)]
pub struct IdentifierData {
    name: Arc<str>,
    kind: IdentifierKind,
}

/// Interned name. Two identifiers compare equal only when they are the same
/// interned object.
#[derive(Clone)]
pub struct Identifier(Arc<IdentifierData>);

impl Identifier {
    /// Interns `name` in the process-wide table.
    pub fn intern(name: &str) -> Identifier {
        SymbolTable::global().intern(name)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn name_arc(&self) -> Arc<str> {
        self.0.name.clone()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.0.kind, IdentifierKind::Constant(_))
    }

    /// Segments of a `Foo::Bar` path; empty for non-constants.
    pub fn const_names(&self) -> &[String] {
        match &self.0.kind {
            IdentifierKind::Constant(names) => names,
            _ => &[],
        }
    }

    pub fn is_qualified(&self) -> bool {
        matches!(self.0.kind, IdentifierKind::Qualified { .. })
    }

    /// Constant path on the left of `/` for qualified names.
    pub fn namespace_part(&self) -> Option<&str> {
        match &self.0.kind {
            IdentifierKind::Qualified { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    pub fn unqualified_name(&self) -> &str {
        match &self.0.kind {
            IdentifierKind::Qualified { name, .. } => name,
            _ => &self.0.name,
        }
    }

    /// Whether `self` and `other` are the very same interned object.
    pub fn same(&self, other: &Identifier) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn classify(name: &str) -> IdentifierKind {
        if CONSTANT_RE.is_match(name) {
            return IdentifierKind::Constant(name.split("::").map(str::to_string).collect());
        }
        let mut parts = name.split('/');
        if let (Some(ns), Some(local), None) = (parts.next(), parts.next(), parts.next()) {
            if CONSTANT_RE.is_match(ns) && !local.is_empty() {
                return IdentifierKind::Qualified {
                    namespace: ns.to_string(),
                    name: local.to_string(),
                };
            }
        }
        IdentifierKind::Plain
    }

    /// True when the printed name would read back as this identifier without
    /// the `#|...|` escape.
    pub fn is_readable_bare(&self) -> bool {
        let name = self.name();
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if matches!(name, "true" | "false" | "nil") || first == ':' || first == '#' {
            return false;
        }
        if first.is_ascii_digit() {
            return false;
        }
        if matches!(first, '+' | '-') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
            return false;
        }
        name.chars().all(is_identifier_char)
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.name())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_readable_bare() {
            return f.write_str(self.name());
        }
        f.write_str("#|")?;
        for c in self.name().chars() {
            match c {
                '|' => f.write_str("\\|")?,
                '\\' => f.write_str("\\\\")?,
                '\n' => f.write_str("\\n")?,
                '\t' => f.write_str("\\t")?,
                other => write!(f, "{}", other)?,
            }
        }
        f.write_str("|")
    }
}

/// Interning table plus the gensym counter. One table is shared by everything
/// that compiles a program; tests may build a private one.
pub struct SymbolTable {
    names: Mutex<HashMap<Arc<str>, Identifier>>,
    gensym_counter: AtomicU64,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            names: Mutex::new(HashMap::new()),
            gensym_counter: AtomicU64::new(0),
        }
    }

    pub fn global() -> Arc<SymbolTable> {
        GLOBAL_SYMBOLS.clone()
    }

    pub fn intern(&self, name: &str) -> Identifier {
        let mut names = self.names.lock();
        if let Some(id) = names.get(name) {
            return id.clone();
        }
        let key: Arc<str> = Arc::from(name);
        let id = Identifier(Arc::new(IdentifierData {
            name: key.clone(),
            kind: Identifier::classify(name),
        }));
        names.insert(key, id.clone());
        id
    }

    /// Fresh name of the form `prefix__N`.
    pub fn gensym_name(&self, prefix: &str) -> String {
        let n = self.gensym_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}__{}", prefix, n)
    }

    pub fn gensym(&self, prefix: &str) -> Identifier {
        let name = self.gensym_name(prefix);
        self.intern(&name)
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every interned name and restarts gensym numbering. Identifiers
    /// handed out earlier no longer match fresh interns, so only tests that
    /// own a private table may call this.
    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.names.lock().clear();
        self.gensym_counter.store(0, Ordering::Relaxed);
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_the_same_object() {
        let table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("foo");
        let c = table.intern("bar");
        assert!(a.same(&b));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn classifies_constants_and_qualified_names() {
        let table = SymbolTable::new();
        let konst = table.intern("Foo::Bar");
        assert!(konst.is_constant());
        assert_eq!(konst.const_names(), ["Foo".to_string(), "Bar".to_string()]);

        let qualified = table.intern("Kernel/raise");
        assert!(qualified.is_qualified());
        assert_eq!(qualified.namespace_part(), Some("Kernel"));
        assert_eq!(qualified.unqualified_name(), "raise");

        for plain in ["foo", "a/b", "/", "Foo/bar/baz", "foo::Bar"] {
            let id = table.intern(plain);
            assert!(!id.is_constant(), "{plain}");
            assert!(!id.is_qualified(), "{plain}");
            assert_eq!(id.unqualified_name(), plain);
        }
    }

    #[test]
    fn gensym_counts_per_table() {
        let table = SymbolTable::new();
        assert_eq!(table.gensym("g").name(), "g__1");
        assert_eq!(table.gensym("p1").name(), "p1__2");
        table.reset();
        assert_eq!(table.gensym_name("x"), "x__1");
    }

    #[test]
    fn unreadable_names_print_with_pipes() {
        let table = SymbolTable::new();
        assert_eq!(table.intern("foo-bar?").to_string(), "foo-bar?");
        assert_eq!(table.intern("nil").to_string(), "#|nil|");
        assert_eq!(table.intern("12ab").to_string(), "#|12ab|");
        assert_eq!(table.intern("a b").to_string(), "#|a b|");
        assert_eq!(table.intern("-").to_string(), "-");
    }
}
