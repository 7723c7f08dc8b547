// SPDX-License-Identifier: MIT

//! State held during a run
//!
//! - `ValueStore` - addressable store of every value a run produces
//! - `VariableContext` - variables seen by conditional branches

mod context;
mod store;

pub use context::VariableContext;
pub use store::{MemoryStore, ValueStore};
