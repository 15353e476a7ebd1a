use std::fmt;

use thiserror::Error;

use crate::builtins::classes::classes;
use crate::value::{ExceptionObject, ExceptionRef, ModuleRef};

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";
pub const WARN_TAG: &str = "\x1b[33m[WARN]\x1b[0m";

#[derive(Clone, Debug)]
pub struct SyntaxErrorData {
    pub filename: String,
    pub line: usize,
    pub message: String,
    /// More input might complete the construct.
    pub incomplete: bool,
}

impl fmt::Display for SyntaxErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.filename, self.line, self.message)
    }
}

#[derive(Clone, Debug)]
pub struct CompileErrorData {
    pub filename: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for CompileErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.filename, self.line, self.message)
    }
}

#[derive(Clone, Debug)]
pub struct IoErrorData {
    pub path: String,
    pub message: String,
}

impl fmt::Display for IoErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Error, Debug, Clone)]
pub enum QuinceError {
    #[error("{0}")]
    Syntax(SyntaxErrorData),

    #[error("{0}")]
    Compile(CompileErrorData),

    /// Runtime exception; the only kind `rescue` can catch.
    #[error("{0}")]
    Raised(ExceptionRef),

    #[error("execution interrupted")]
    Interrupted,

    #[error("{0}")]
    Io(IoErrorData),
}

impl QuinceError {
    pub fn syntax(filename: &str, line: usize, message: impl Into<String>) -> Self {
        QuinceError::Syntax(SyntaxErrorData {
            filename: filename.to_string(),
            line,
            message: message.into(),
            incomplete: false,
        })
    }

    pub fn incomplete(filename: &str, line: usize, message: impl Into<String>) -> Self {
        QuinceError::Syntax(SyntaxErrorData {
            filename: filename.to_string(),
            line,
            message: message.into(),
            incomplete: true,
        })
    }

    pub fn compile(filename: &str, line: usize, message: impl Into<String>) -> Self {
        QuinceError::Compile(CompileErrorData {
            filename: filename.to_string(),
            line,
            message: message.into(),
        })
    }

    pub fn io(path: &str, err: std::io::Error) -> Self {
        QuinceError::Io(IoErrorData {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    /// Raises a fresh instance of `class`.
    pub fn raise(class: &ModuleRef, message: impl Into<String>) -> Self {
        QuinceError::Raised(ExceptionObject::new(class.clone(), message))
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::raise(&classes().runtime_error, message)
    }

    pub fn argument_error(message: impl Into<String>) -> Self {
        Self::raise(&classes().argument_error, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raise(&classes().type_error, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::raise(&classes().name_error, message)
    }

    pub fn no_method_error(message: impl Into<String>) -> Self {
        Self::raise(&classes().no_method_error, message)
    }

    pub fn zero_division() -> Self {
        Self::raise(&classes().zero_division_error, "divided by 0")
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::raise(&classes().index_error, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::raise(&classes().key_error, message)
    }

    pub fn stack_too_deep() -> Self {
        Self::raise(&classes().system_stack_error, "stack level too deep")
    }

    pub fn arity(got: usize, expected: impl fmt::Display) -> Self {
        Self::argument_error(format!(
            "wrong number of arguments ({} for {})",
            got, expected
        ))
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, QuinceError::Syntax(data) if data.incomplete)
    }

    pub fn exception(&self) -> Option<&ExceptionRef> {
        match self {
            QuinceError::Raised(exc) => Some(exc),
            _ => None,
        }
    }

    /// Records where a runtime exception first escaped. Static errors already
    /// carry their position.
    pub fn with_location(self, file: &str, line: usize) -> Self {
        if let QuinceError::Raised(exc) = &self {
            exc.set_location(file, line);
        }
        self
    }
}

/// Renders an error for terminal output.
pub fn format_error(err: &QuinceError) -> String {
    match err {
        QuinceError::Raised(exc) => match exc.location() {
            Some((file, line)) => format!("{}:{}: {}", file, line, exc),
            None => exc.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_errors_use_file_line_prefix() {
        let err = QuinceError::syntax("a.qn", 3, "Unexpected character: )");
        assert_eq!(err.to_string(), "a.qn:3: Unexpected character: )");
        assert!(!err.is_incomplete());

        let err = QuinceError::incomplete("(eval)", 1, "Unexpected end of program, expected )");
        assert!(err.is_incomplete());

        let err = QuinceError::compile("b.qn", 7, "Too few arguments to if");
        assert_eq!(err.to_string(), "b.qn:7: Too few arguments to if");
    }

    #[test]
    fn raised_errors_remember_first_location() {
        let err = QuinceError::argument_error("No matching overload")
            .with_location("c.qn", 2)
            .with_location("c.qn", 9);
        assert_eq!(format_error(&err), "c.qn:2: ArgumentError: No matching overload");
    }
}
