use once_cell::sync::Lazy;

use crate::value::{Builtin, Module, ModuleRef, Value};

/// Builtin classes shared by every runtime.
pub struct BuiltinClasses {
    pub object: ModuleRef,
    pub module: ModuleRef,
    pub class: ModuleRef,
    pub nil_class: ModuleRef,
    pub true_class: ModuleRef,
    pub false_class: ModuleRef,
    pub integer: ModuleRef,
    pub float: ModuleRef,
    pub rational: ModuleRef,
    pub string: ModuleRef,
    pub symbol: ModuleRef,
    pub regexp: ModuleRef,
    pub identifier: ModuleRef,
    pub list: ModuleRef,
    pub array: ModuleRef,
    pub hash: ModuleRef,
    pub set: ModuleRef,
    pub proc_class: ModuleRef,
    pub method: ModuleRef,
    pub namespace: ModuleRef,
    pub kernel: ModuleRef,
    pub exception: ModuleRef,
    pub standard_error: ModuleRef,
    pub system_stack_error: ModuleRef,
    pub runtime_error: ModuleRef,
    pub argument_error: ModuleRef,
    pub type_error: ModuleRef,
    pub name_error: ModuleRef,
    pub no_method_error: ModuleRef,
    pub zero_division_error: ModuleRef,
    pub index_error: ModuleRef,
    pub key_error: ModuleRef,
}

static CLASSES: Lazy<BuiltinClasses> = Lazy::new(BuiltinClasses::boot);

pub fn classes() -> &'static BuiltinClasses {
    &CLASSES
}

impl BuiltinClasses {
    fn boot() -> Self {
        let object = Module::new_class("Object", None, Some(Builtin::Object));
        let class = |name: &str, builtin: Builtin| {
            Module::new_class(name, Some(object.clone()), Some(builtin))
        };
        let module = class("Module", Builtin::Module);
        let exception = class("Exception", Builtin::Exception);
        let standard_error =
            Module::new_class("StandardError", Some(exception.clone()), None);
        let error = |name: &str, parent: &ModuleRef| {
            Module::new_class(name, Some(parent.clone()), None)
        };
        let name_error = error("NameError", &standard_error);
        let index_error = error("IndexError", &standard_error);
        Self {
            class: Module::new_class("Class", Some(module.clone()), Some(Builtin::Class)),
            module,
            nil_class: class("NilClass", Builtin::NilClass),
            true_class: class("TrueClass", Builtin::TrueClass),
            false_class: class("FalseClass", Builtin::FalseClass),
            integer: class("Integer", Builtin::Integer),
            float: class("Float", Builtin::Float),
            rational: class("Rational", Builtin::Rational),
            string: class("String", Builtin::String),
            symbol: class("Symbol", Builtin::Symbol),
            regexp: class("Regexp", Builtin::Regexp),
            identifier: class("Identifier", Builtin::Identifier),
            list: class("List", Builtin::List),
            array: class("Array", Builtin::Array),
            hash: class("Hash", Builtin::Hash),
            set: class("Set", Builtin::Set),
            proc_class: class("Proc", Builtin::Proc),
            method: class("Method", Builtin::Method),
            namespace: class("Namespace", Builtin::Namespace),
            kernel: Module::new_builtin_module("Kernel", Builtin::Kernel),
            runtime_error: error("RuntimeError", &standard_error),
            argument_error: error("ArgumentError", &standard_error),
            type_error: error("TypeError", &standard_error),
            no_method_error: error("NoMethodError", &name_error),
            zero_division_error: error("ZeroDivisionError", &standard_error),
            key_error: error("KeyError", &index_error),
            system_stack_error: error("SystemStackError", &exception),
            index_error,
            name_error,
            standard_error,
            exception,
            object,
        }
    }

    /// Every builtin, in the order they are bound as root constants.
    pub fn all(&self) -> Vec<&ModuleRef> {
        vec![
            &self.object,
            &self.module,
            &self.class,
            &self.nil_class,
            &self.true_class,
            &self.false_class,
            &self.integer,
            &self.float,
            &self.rational,
            &self.string,
            &self.symbol,
            &self.regexp,
            &self.identifier,
            &self.list,
            &self.array,
            &self.hash,
            &self.set,
            &self.proc_class,
            &self.method,
            &self.namespace,
            &self.kernel,
            &self.exception,
            &self.standard_error,
            &self.system_stack_error,
            &self.runtime_error,
            &self.argument_error,
            &self.type_error,
            &self.name_error,
            &self.no_method_error,
            &self.zero_division_error,
            &self.index_error,
            &self.key_error,
        ]
    }

    pub fn class_of(&self, value: &Value) -> ModuleRef {
        match value {
            Value::Nil => self.nil_class.clone(),
            Value::Bool(true) => self.true_class.clone(),
            Value::Bool(false) => self.false_class.clone(),
            Value::Int(_) => self.integer.clone(),
            Value::Float(_) => self.float.clone(),
            Value::Rational(_) => self.rational.clone(),
            Value::String(_) => self.string.clone(),
            Value::Symbol(_) => self.symbol.clone(),
            Value::Regex(_) => self.regexp.clone(),
            Value::Identifier(_) => self.identifier.clone(),
            Value::List(_) => self.list.clone(),
            Value::Array(_) => self.array.clone(),
            Value::Hash(_) => self.hash.clone(),
            Value::Set(_) => self.set.clone(),
            Value::Function(_) | Value::Native(_) => self.proc_class.clone(),
            Value::Method(_) => self.method.clone(),
            Value::Module(m) if m.is_class() => self.class.clone(),
            Value::Module(_) => self.module.clone(),
            Value::Namespace(_) => self.namespace.clone(),
            Value::Exception(exc) => exc.class().clone(),
        }
    }

    /// `value.is_a?(class)`.
    pub fn is_a(&self, value: &Value, class: &ModuleRef) -> bool {
        self.class_of(value).is_subclass_of(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_hierarchy() {
        let c = classes();
        assert!(c.no_method_error.is_subclass_of(&c.name_error));
        assert!(c.no_method_error.is_subclass_of(&c.standard_error));
        assert!(c.key_error.is_subclass_of(&c.index_error));
        assert!(!c.standard_error.is_subclass_of(&c.argument_error));
        assert!(c.exception.is_subclass_of(&c.object));
        assert!(c.system_stack_error.is_subclass_of(&c.exception));
        assert!(!c.system_stack_error.is_subclass_of(&c.standard_error));
    }

    #[test]
    fn classifies_values() {
        let c = classes();
        assert!(c.is_a(&Value::Int(1), &c.integer));
        assert!(c.is_a(&Value::string("x"), &c.object));
        assert!(!c.is_a(&Value::Nil, &c.string));
    }
}
