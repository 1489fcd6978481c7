//! Runtime state owned by a module: memories, globals and the shared store.

pub mod global;
pub mod memory;
pub mod store;

pub use global::GlobalSlot;
pub use memory::{Memory, MAX_PAGES, PAGE_SIZE};
pub use store::Store;
