//! Self-contained script context: heap-stack plus error channel

use core::cell::RefCell;
use core::ptr::NonNull;

use super::heap::{HeapStack, HeapStats};
use super::strings;
use super::{PendingException, PluginContext};
use crate::cell::{Cell, LocalAddr};
use crate::config::HeapConfig;
use crate::error::ErrorCode;
use crate::logging;

/// Script context owning its own heap-stack
#[derive(Debug)]
pub struct ScriptContext {
    heap: RefCell<HeapStack>,
    exception: RefCell<Option<PendingException>>,
}

impl ScriptContext {
    /// Context with a heap of `heap_cells` cells
    ///
    /// Returns `None` if the host refuses the region.
    pub fn new(heap_cells: usize) -> Option<Self> {
        Some(Self {
            heap: RefCell::new(HeapStack::new(heap_cells)?),
            exception: RefCell::new(None),
        })
    }

    pub fn from_config(config: &HeapConfig) -> Option<Self> {
        Self::new(config.cells)
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.borrow().stats()
    }

    /// Live heap-stack blocks
    pub fn heap_depth(&self) -> usize {
        self.heap.borrow().depth()
    }

    /// Pending error without consuming it
    pub fn pending_exception(&self) -> Option<PendingException> {
        self.exception.borrow().clone()
    }

    fn raise(&self, exception: PendingException) {
        let mut slot = self.exception.borrow_mut();
        match slot.as_ref() {
            Some(pending) => logging::log_dropped_error(pending.code, exception.code),
            None => *slot = Some(exception),
        }
    }

    fn write_string(
        &self,
        addr: LocalAddr,
        max_bytes: usize,
        copy: impl FnOnce(&mut [u8]) -> usize,
    ) -> Result<usize, ErrorCode> {
        let (ptr, available) = self.heap.borrow().bytes_from(addr)?;
        if max_bytes > available {
            return Err(ErrorCode::InvalidAddress);
        }
        let dest = unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), max_bytes) };
        Ok(copy(dest))
    }
}

// Blocks live in one region acquired up front and never moved; `phys` and
// `bytes_from` only resolve addresses inside the used part of the heap.
unsafe impl PluginContext for ScriptContext {
    fn heap_alloc(&self, cells: u32) -> Result<(LocalAddr, NonNull<Cell>), ErrorCode> {
        self.heap.borrow_mut().alloc(cells as usize)
    }

    fn heap_pop(&self, addr: LocalAddr) -> Result<(), ErrorCode> {
        self.heap.borrow_mut().pop(addr)
    }

    fn local_to_phys_addr(&self, addr: LocalAddr, cells: u32) -> Result<NonNull<Cell>, ErrorCode> {
        self.heap.borrow().phys(addr, cells as usize)
    }

    fn string_to_local(&self, addr: LocalAddr, max_bytes: usize, src: &[u8]) -> Result<usize, ErrorCode> {
        self.write_string(addr, max_bytes, |dest| strings::copy_ascii(dest, src))
    }

    fn string_to_local_utf8(
        &self,
        addr: LocalAddr,
        max_bytes: usize,
        src: &[u8],
    ) -> Result<usize, ErrorCode> {
        self.write_string(addr, max_bytes, |dest| strings::copy_utf8(dest, src))
    }

    fn local_to_string(&self, addr: LocalAddr) -> Result<String, ErrorCode> {
        let (ptr, available) = self.heap.borrow().bytes_from(addr)?;
        let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), available) };
        let text = strings::c_str_bytes(bytes);
        if text.len() == bytes.len() {
            // Unterminated inside the live heap
            return Err(ErrorCode::InvalidAddress);
        }
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    fn report_error(&self, code: ErrorCode) {
        self.raise(PendingException::from_code(code));
    }

    fn report_native_error(&self, message: &str) -> Cell {
        self.raise(PendingException::new(ErrorCode::Native, message));
        0
    }

    fn last_error(&self) -> Option<ErrorCode> {
        self.exception.borrow().as_ref().map(|pending| pending.code)
    }

    fn take_exception(&self) -> Option<PendingException> {
        self.exception.borrow_mut().take()
    }
}
