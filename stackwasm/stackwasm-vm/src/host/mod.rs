//! Host bindings for imported functions.

pub mod func;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Trap;
use crate::model::{FuncType, Value};
pub use func::HostFunc;

/// Supplies native callbacks for a module's function imports at decode time.
/// Returning `None` leaves the import unbound; calling it then traps.
pub trait ImportResolver {
    fn resolve_func(&self, module: &str, name: &str, ty: &FuncType) -> Option<Arc<HostFunc>>;
}

/// Resolver that binds nothing.
impl ImportResolver for () {
    fn resolve_func(&self, _module: &str, _name: &str, _ty: &FuncType) -> Option<Arc<HostFunc>> {
        None
    }
}

/// Map-backed resolver keyed by `(module, name)`.
#[derive(Default, Clone)]
pub struct Imports {
    funcs: HashMap<(String, String), Arc<HostFunc>>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` as `module.name`, replacing any earlier binding.
    pub fn func<F>(mut self, module: &str, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, Trap> + Send + Sync + 'static,
    {
        self.insert(module, name, f);
        self
    }

    pub fn insert<F>(&mut self, module: &str, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, Trap> + Send + Sync + 'static,
    {
        self.funcs
            .insert((module.to_string(), name.to_string()), Arc::new(f));
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl ImportResolver for Imports {
    fn resolve_func(&self, module: &str, name: &str, _ty: &FuncType) -> Option<Arc<HostFunc>> {
        self.funcs
            .get(&(module.to_string(), name.to_string()))
            .cloned()
    }
}

impl fmt::Debug for Imports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .funcs
            .keys()
            .map(|(module, name)| format!("{module}.{name}"))
            .collect();
        names.sort();
        f.debug_struct("Imports").field("funcs", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_functions_only() {
        let imports = Imports::new().func("env", "double", |args| match args {
            [Value::I32(v)] => Ok(vec![Value::I32(v * 2)]),
            _ => Err(Trap::Host("bad args".into())),
        });
        let ty = FuncType::default();
        let f = imports.resolve_func("env", "double", &ty).unwrap();
        assert_eq!(f(&[Value::I32(21)]).unwrap(), vec![Value::I32(42)]);
        assert!(imports.resolve_func("env", "Double", &ty).is_none());
        assert!(().resolve_func("env", "double", &ty).is_none());
        assert_eq!(format!("{imports:?}"), "Imports { funcs: [\"env.double\"] }");
    }
}
