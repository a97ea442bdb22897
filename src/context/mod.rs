//! Script context - the VM surface the invoker marshals against
//!
//! Architecture:
//! - `PluginContext` - heap-stack, string transcoding and error channel
//!   the invoker consumes (implemented by the embedding VM)
//! - `script.rs` - `ScriptContext`, a self-contained implementation
//! - `heap.rs` - LIFO arena backing `ScriptContext`
//! - `strings.rs` - ASCII and UTF-8 copy primitives
//!
//! Contexts are single-threaded and take `&self` everywhere: natives called
//! through the invoker receive the same context and may call back into it.

mod heap;
mod script;
pub mod strings;

pub use heap::{HeapStack, HeapStats};
pub use script::ScriptContext;

use core::ptr::NonNull;

use crate::cell::{Cell, LocalAddr};
use crate::error::ErrorCode;

/// Error raised inside a context and not yet consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingException {
    pub code: ErrorCode,
    pub message: String,
}

impl PendingException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Exception carrying the code's own description
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.to_string())
    }
}

/// Operations a script context exposes to native-call marshaling
///
/// # Safety
///
/// The invoker and the provided `read_cells`/`write_cells` copy through the
/// pointers this trait hands out without further checks. Implementors must
/// guarantee that:
/// - a pointer returned by `heap_alloc(cells)` is valid for reads and writes of
///   `cells` cells and stays valid, without moving, until the matching
///   `heap_pop`;
/// - a pointer returned by `local_to_phys_addr(addr, cells)` is valid for reads
///   and writes of `cells` cells for as long as the block containing it is live;
/// - no returned region overlaps memory the caller owns outside script memory.
///
/// Implementing it without `unsafe` is rejected:
///
/// ```compile_fail,E0200
/// use core::ptr::NonNull;
/// use cellcall::{Cell, ErrorCode, LocalAddr, PendingException, PluginContext};
///
/// struct Unchecked;
///
/// impl PluginContext for Unchecked {
///     fn heap_alloc(&self, _: u32) -> Result<(LocalAddr, NonNull<Cell>), ErrorCode> {
///         Err(ErrorCode::HeapLow)
///     }
///     fn heap_pop(&self, _: LocalAddr) -> Result<(), ErrorCode> {
///         Err(ErrorCode::HeapMin)
///     }
///     fn local_to_phys_addr(&self, _: LocalAddr, _: u32) -> Result<NonNull<Cell>, ErrorCode> {
///         Ok(NonNull::dangling())
///     }
///     fn string_to_local(&self, _: LocalAddr, _: usize, _: &[u8]) -> Result<usize, ErrorCode> {
///         Ok(0)
///     }
///     fn string_to_local_utf8(&self, _: LocalAddr, _: usize, _: &[u8]) -> Result<usize, ErrorCode> {
///         Ok(0)
///     }
///     fn local_to_string(&self, _: LocalAddr) -> Result<String, ErrorCode> {
///         Ok(String::new())
///     }
///     fn report_error(&self, _: ErrorCode) {}
///     fn report_native_error(&self, _: &str) -> Cell {
///         0
///     }
///     fn last_error(&self) -> Option<ErrorCode> {
///         None
///     }
///     fn take_exception(&self) -> Option<PendingException> {
///         None
///     }
/// }
/// ```
pub unsafe trait PluginContext {
    /// Push `cells` cells onto the heap-stack
    fn heap_alloc(&self, cells: u32) -> Result<(LocalAddr, NonNull<Cell>), ErrorCode>;

    /// Pop the most recent heap-stack block, which must start at `addr`
    fn heap_pop(&self, addr: LocalAddr) -> Result<(), ErrorCode>;

    /// Resolve `cells` cells of script memory at `addr`
    fn local_to_phys_addr(&self, addr: LocalAddr, cells: u32) -> Result<NonNull<Cell>, ErrorCode>;

    /// Copy a C string into script memory, truncating byte-wise
    fn string_to_local(&self, addr: LocalAddr, max_bytes: usize, src: &[u8]) -> Result<usize, ErrorCode>;

    /// Copy a C string into script memory without splitting UTF-8 sequences
    fn string_to_local_utf8(
        &self,
        addr: LocalAddr,
        max_bytes: usize,
        src: &[u8],
    ) -> Result<usize, ErrorCode>;

    /// Read a NUL-terminated string out of script memory
    fn local_to_string(&self, addr: LocalAddr) -> Result<String, ErrorCode>;

    /// Raise `code` unless an error is already pending
    fn report_error(&self, code: ErrorCode);

    /// Raise a native error with a custom message; returns 0 for `return` chaining
    fn report_native_error(&self, message: &str) -> Cell;

    /// Code of the pending error, if any
    fn last_error(&self) -> Option<ErrorCode>;

    /// Consume the pending error
    fn take_exception(&self) -> Option<PendingException>;

    fn clear_last_error(&self) {
        self.take_exception();
    }

    /// Copy `out.len()` cells from script memory
    fn read_cells(&self, addr: LocalAddr, out: &mut [Cell]) -> Result<(), ErrorCode> {
        let cells = u32::try_from(out.len()).map_err(|_| ErrorCode::Param)?;
        let phys = self.local_to_phys_addr(addr, cells)?;
        unsafe {
            core::ptr::copy_nonoverlapping(phys.as_ptr(), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Copy `src` into script memory
    fn write_cells(&self, addr: LocalAddr, src: &[Cell]) -> Result<(), ErrorCode> {
        let cells = u32::try_from(src.len()).map_err(|_| ErrorCode::Param)?;
        let phys = self.local_to_phys_addr(addr, cells)?;
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), phys.as_ptr(), src.len());
        }
        Ok(())
    }
}
