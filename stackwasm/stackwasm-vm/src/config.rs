//! Execution-time configuration for the interpreter.

use std::env;

/// Default hard limit on nested function activations.
pub const CALL_DEPTH_LIMIT: usize = 1024;

/// Knobs applied to every invocation made through a `Module`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Activations allowed at once before `Trap::CallStackExhausted`.
    pub max_call_depth: usize,
    /// Skip direct self-calls that repeat the caller's arguments with no effect in between.
    pub recursion_guard: bool,
    /// Skip backward branches that would re-enter a loop in the state it was entered with.
    /// The whole frame counts as state, so a loop that changes only a local keeps
    /// running; under an always-true `br_if` that is until the local wraps, about
    /// 2^32 iterations for an i32 counter.
    pub loop_guard: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            max_call_depth: CALL_DEPTH_LIMIT,
            recursion_guard: true,
            loop_guard: true,
        }
    }
}

impl ExecutionOptions {
    /// Defaults overlaid with `STACKWASM_CALL_DEPTH_LIMIT`, `STACKWASM_RECURSION_GUARD`
    /// and `STACKWASM_LOOP_GUARD`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(limit) = env::var("STACKWASM_CALL_DEPTH_LIMIT")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
        {
            options.max_call_depth = limit;
        }
        if let Some(flag) = env_flag("STACKWASM_RECURSION_GUARD") {
            options.recursion_guard = flag;
        }
        if let Some(flag) = env_flag("STACKWASM_LOOP_GUARD") {
            options.loop_guard = flag;
        }
        options
    }

    pub fn with_max_call_depth(mut self, limit: usize) -> Self {
        self.max_call_depth = limit;
        self
    }

    pub fn with_recursion_guard(mut self, enabled: bool) -> Self {
        self.recursion_guard = enabled;
        self
    }

    pub fn with_loop_guard(mut self, enabled: bool) -> Self {
        self.loop_guard = enabled;
        self
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|raw| parse_flag(&raw))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_both_guards() {
        let options = ExecutionOptions::default();
        assert_eq!(options.max_call_depth, CALL_DEPTH_LIMIT);
        assert!(options.recursion_guard);
        assert!(options.loop_guard);
    }

    #[test]
    fn builder_setters() {
        let options = ExecutionOptions::default()
            .with_max_call_depth(8)
            .with_loop_guard(false);
        assert_eq!(options.max_call_depth, 8);
        assert!(!options.loop_guard);
        assert!(options.recursion_guard);
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" False "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
