use crate::error::Trap;
use crate::model::Value;

/// Native callback bound to an imported function. Receives the arguments in
/// declaration order and returns the declared results in order.
pub type HostFunc = dyn Fn(&[Value]) -> Result<Vec<Value>, Trap> + Send + Sync;
