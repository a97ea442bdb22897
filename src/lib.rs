//! cellcall - native-call marshaling for an embedded cell-based script VM
//!
//! Script code queues arguments on a [`NativeInvoker`]; `execute` copies
//! arrays and strings onto the context's heap-stack, calls the host native with
//! a count-prefixed cell frame, writes mutated buffers back and pops every
//! block in reverse order, on success and failure alike.

pub mod cell;
pub mod config;
pub mod context;
pub mod error;
pub mod invoker;
pub mod logging;

// Re-export core types
pub use cell::{Cell, LocalAddr, CELL_SIZE};
pub use config::Config;
pub use context::{PendingException, PluginContext, ScriptContext};
pub use error::{ErrorCode, InvokeFailure};
pub use invoker::{Native, NativeFn, NativeInvoker, MAX_EXEC_PARAMS};
