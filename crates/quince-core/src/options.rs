use std::env;

pub const DEFAULT_MACROEXPAND_LIMIT: usize = 10_000;
pub const DEFAULT_MAX_DEPTH: usize = 2_000;

fn env_flag(name: &str) -> bool {
    let Ok(value) = env::var(name) else {
        return false;
    };
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok()?.trim().parse().ok()
}

pub fn dump_bytecode_from_env() -> bool {
    env_flag("QUINCE_DUMP_BYTECODE")
}

pub fn macroexpand_limit_from_env() -> usize {
    env_usize("QUINCE_MACROEXPAND_LIMIT")
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MACROEXPAND_LIMIT)
}

/// Bound shared by call depth, reader nesting and compiler recursion.
pub fn max_depth_from_env() -> usize {
    env_usize("QUINCE_MAX_DEPTH")
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_DEPTH)
}

#[derive(Clone, Debug)]
pub struct EvalOptions {
    /// Log the disassembly of every compiled top-level form.
    pub dump_bytecode: bool,
    /// Expansion steps allowed for one form before giving up.
    pub macroexpand_limit: usize,
    /// Deepest nesting of calls, of read forms and of compiled forms.
    pub max_depth: usize,
    /// Diagnostic name for code evaluated from a string.
    pub source_name: String,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            dump_bytecode: dump_bytecode_from_env(),
            macroexpand_limit: macroexpand_limit_from_env(),
            max_depth: max_depth_from_env(),
            source_name: "(eval)".to_string(),
        }
    }
}
