use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::QuinceError;
use crate::value::{Module, ModuleRef, Value};

pub type NamespaceRef = Arc<Namespace>;

#[derive(Clone, Debug)]
pub struct Var {
    pub value: Value,
    pub meta: Option<Value>,
}

/// Named store of global variables. Keeps track of which vars hold callables
/// so direct calls can skip the generic call path.
pub struct Namespace {
    name: String,
    vars: RwLock<HashMap<String, Var>>,
    fns: RwLock<HashSet<String>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> NamespaceRef {
        Arc::new(Self {
            name: name.into(),
            vars: RwLock::new(HashMap::new()),
            fns: RwLock::new(HashSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds `name`. Any previous metadata is dropped along with the old value.
    pub fn set_var(&self, name: &str, value: Value) {
        {
            let mut fns = self.fns.write();
            if value.is_callable() {
                fns.insert(name.to_string());
            } else {
                fns.remove(name);
            }
        }
        self.vars
            .write()
            .insert(name.to_string(), Var { value, meta: None });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.vars.read().get(name).map(|var| var.value.clone())
    }

    pub fn get_var(&self, name: &str) -> Result<Value, QuinceError> {
        self.lookup(name).ok_or_else(|| {
            QuinceError::name_error(format!("Undefined variable '{}' on {}", name, self.name))
        })
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.vars.read().contains_key(name)
    }

    pub fn is_fn(&self, name: &str) -> bool {
        self.fns.read().contains(name)
    }

    pub fn metadata(&self, name: &str) -> Option<Value> {
        self.vars.read().get(name).and_then(|var| var.meta.clone())
    }

    pub fn set_meta(&self, name: &str, meta: Value) -> Result<(), QuinceError> {
        let mut vars = self.vars.write();
        let var = vars.get_mut(name).ok_or_else(|| {
            QuinceError::name_error(format!("Undefined variable '{}' on {}", name, self.name))
        })?;
        var.meta = if meta.is_nil() { None } else { Some(meta) };
        Ok(())
    }

    /// Value stored under `key` (a symbol) in the var's metadata hash.
    pub fn meta_entry(&self, name: &str, key: &str) -> Option<Value> {
        match self.metadata(name)? {
            Value::Hash(table) => table.read().get(&Value::symbol(key)).cloned(),
            _ => None,
        }
    }

    pub fn is_macro(&self, name: &str) -> bool {
        self.meta_entry(name, "macro")
            .is_some_and(|flag| flag.is_truthy())
    }

    pub fn var_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.vars.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.name)
    }
}

/// Follows `names` from `root`, failing on the first unbound segment.
pub fn lookup_constant(root: &ModuleRef, names: &[String]) -> Result<Value, QuinceError> {
    let mut current = Value::Module(root.clone());
    for (i, name) in names.iter().enumerate() {
        current = const_get(&current, name).ok_or_else(|| {
            QuinceError::name_error(format!("uninitialized constant {}", names[..=i].join("::")))
        })?;
    }
    Ok(current)
}

pub fn const_get(parent: &Value, name: &str) -> Option<Value> {
    match parent {
        Value::Module(module) => module.const_get(name),
        _ => None,
    }
}

/// Returns the module bound to `name` under `parent`, creating an empty one
/// when the constant is missing.
pub fn open_module(parent: &Value, name: &str) -> Result<Value, QuinceError> {
    let Value::Module(module) = parent else {
        return Err(QuinceError::type_error(format!("{} is not a module", parent)));
    };
    if let Some(existing) = module.const_get(name) {
        return Ok(existing);
    }
    let full_name = qualified_name(module, name);
    let created = Value::Module(Module::new_module(full_name));
    module.const_set(name, created.clone());
    Ok(created)
}

pub fn const_set(parent: &Value, name: &str, value: Value) -> Result<Value, QuinceError> {
    match parent {
        Value::Module(module) => {
            module.const_set(name, value.clone());
            Ok(value)
        }
        other => Err(QuinceError::type_error(format!("{} is not a module", other))),
    }
}

fn qualified_name(parent: &ModuleRef, name: &str) -> String {
    if parent.name() == "Object" {
        name.to_string()
    } else {
        format!("{}::{}", parent.name(), name)
    }
}

/// Finds the namespace at a constant path, creating it (and any missing
/// enclosing modules) when absent.
pub fn find_or_create(root: &ModuleRef, names: &[String]) -> Result<NamespaceRef, QuinceError> {
    let Some((last, parents)) = names.split_last() else {
        return Err(QuinceError::argument_error("empty namespace name"));
    };
    let mut parent = Value::Module(root.clone());
    for name in parents {
        parent = open_module(&parent, name)?;
    }
    match const_get(&parent, last) {
        Some(Value::Namespace(ns)) => Ok(ns),
        Some(other) => Err(QuinceError::type_error(format!(
            "{} is not a namespace",
            other
        ))),
        None => {
            let ns = Namespace::new(names.join("::"));
            const_set(&parent, last, Value::Namespace(ns.clone()))?;
            Ok(ns)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::core::native;
    use crate::value::Arity;

    fn identity(_: &crate::runtime::RuntimeCtx, args: Vec<Value>) -> Result<Value, QuinceError> {
        Ok(args.into_iter().next().unwrap_or(Value::Nil))
    }

    #[test]
    fn tracks_callable_vars() {
        let ns = Namespace::new("Test");
        ns.set_var("f", native("f", Arity::exactly(1), identity));
        ns.set_var("x", Value::Int(1));
        assert!(ns.is_fn("f"));
        assert!(!ns.is_fn("x"));
        ns.set_var("f", Value::Nil);
        assert!(!ns.is_fn("f"));
    }

    #[test]
    fn unbound_names_raise_name_error() {
        let ns = Namespace::new("Foo");
        let err = ns.get_var("missing").unwrap_err();
        assert_eq!(err.to_string(), "NameError: Undefined variable 'missing' on Foo");
    }

    #[test]
    fn creates_namespaces_along_constant_paths() {
        let root = Module::new_class("Object", None, None);
        let names = vec!["Foo".to_string(), "Bar".to_string()];
        let ns = find_or_create(&root, &names).expect("create");
        assert_eq!(ns.name(), "Foo::Bar");
        let again = find_or_create(&root, &names).expect("find");
        assert!(Arc::ptr_eq(&ns, &again));
        match lookup_constant(&root, &["Foo".to_string()]).expect("module") {
            Value::Module(m) => assert_eq!(m.name(), "Foo"),
            other => panic!("expected module, got {:?}", other),
        }
    }
}
