pub mod bytecode;
pub mod compiler;
pub mod generator;
pub mod runtime;

pub use bytecode::{Chunk, FunctionPrototype, Instruction, Label};
pub use compiler::{compile_toplevel, CompiledForm, TailContext};
pub use runtime::{call_closure, run_toplevel, VariableScope};
