//! Invoker - calling host natives with script-marshaled arguments
//!
//! Architecture:
//! - `params.rs` - bounded parameter queue and slot descriptors
//! - `native.rs` - native function descriptors
//! - `frame.rs` - call frame and heap blocks held for one call
//! - `exception.rs` - error scope around one execution
//! - `native_invoker.rs` - the call site: push, execute, cancel
//! - `legacy.rs` - inert compatibility entry points
//!
//! Call sequence: snapshot and reset the queue, allocate and fill heap blocks
//! in push order, call the native, then copy back and pop blocks newest first.
//! A failed allocation skips the call but still unwinds what was allocated.

mod exception;
mod frame;
mod legacy;
mod native;
mod native_invoker;
mod params;

pub use legacy::RuntimeId;
pub use native::{Native, NativeFn};
pub use native_invoker::NativeInvoker;
pub use params::{
    ParamQueue, ParamSlot, StringEncoding, StringFlags, StringSource, COPYBACK, MAX_EXEC_PARAMS,
    STRING_BINARY, STRING_COPY, STRING_UTF8,
};

#[cfg(test)]
mod tests;
