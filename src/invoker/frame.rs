//! Call frame - argument cells plus the heap blocks held for one call
//!
//! Blocks are released in reverse order by `unwind`, or by `Drop` if the frame
//! is abandoned (a panicking native); only `unwind` after a completed call
//! copies data back.

use core::ptr::NonNull;

use smallvec::SmallVec;

use super::native::NativeFn;
use super::params::MAX_EXEC_PARAMS;
use crate::cell::{Cell, LocalAddr, CELL_SIZE};
use crate::context::PluginContext;
use crate::logging;

/// Progress of a call through the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallPhase {
    Marshaling,
    Calling,
    CopyingBack,
    Unwound,
}

/// Caller buffer a block is written back to
#[derive(Debug, Clone, Copy)]
pub(crate) enum CopyBack {
    Cells { dest: NonNull<Cell>, cells: usize },
    Bytes { dest: NonNull<u8>, len: usize },
}

/// Heap block owned by the frame
#[derive(Debug)]
pub(crate) struct HeldBlock {
    pub index: usize,
    pub addr: LocalAddr,
    pub phys: NonNull<Cell>,
    pub copy_back: Option<CopyBack>,
}

pub(crate) struct HeapFrame<'a> {
    ctx: &'a dyn PluginContext,
    native: &'a str,
    params: [Cell; MAX_EXEC_PARAMS + 1],
    held: SmallVec<[HeldBlock; MAX_EXEC_PARAMS]>,
    phase: CallPhase,
}

impl<'a> HeapFrame<'a> {
    pub fn new(ctx: &'a dyn PluginContext, native: &'a str) -> Self {
        Self {
            ctx,
            native,
            params: [0; MAX_EXEC_PARAMS + 1],
            held: SmallVec::new(),
            phase: CallPhase::Marshaling,
        }
    }

    /// Set argument `index` (frame slot `index + 1`)
    #[inline]
    pub fn set_arg(&mut self, index: usize, value: Cell) {
        self.params[index + 1] = value;
    }

    /// Take ownership of a freshly allocated block
    pub fn hold(&mut self, block: HeldBlock) {
        self.held.push(block);
    }

    #[inline]
    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Invoke `func` with the first `argc` arguments
    pub fn call(&mut self, func: NativeFn, argc: usize) -> Cell {
        debug_assert_eq!(self.phase, CallPhase::Marshaling);
        self.params[0] = argc as Cell;
        self.phase = CallPhase::Calling;

        let result = func(self.ctx, &self.params[..=argc]);

        self.phase = CallPhase::CopyingBack;
        logging::log_native_return(self.native, result);
        result
    }

    /// Copy back (if the call ran) and pop every held block, newest first
    pub fn unwind(&mut self) {
        let copy = self.phase == CallPhase::CopyingBack;

        while let Some(block) = self.held.pop() {
            if copy {
                if let Some(target) = block.copy_back {
                    unsafe { Self::copy_back(&block, target) };
                }
            }
            if let Err(err) = self.ctx.heap_pop(block.addr) {
                logging::log_heap_pop_failure(self.native, block.addr, err);
                self.ctx.report_error(err);
            }
        }

        self.phase = CallPhase::Unwound;
    }

    unsafe fn copy_back(block: &HeldBlock, target: CopyBack) {
        match target {
            CopyBack::Bytes { dest, len } => {
                core::ptr::copy_nonoverlapping(block.phys.as_ptr() as *const u8, dest.as_ptr(), len);
                logging::log_copy_back(block.index, block.addr, len);
            }
            CopyBack::Cells { dest, cells: 1 } => {
                dest.as_ptr().write(block.phys.as_ptr().read());
                logging::log_copy_back(block.index, block.addr, CELL_SIZE);
            }
            CopyBack::Cells { dest, cells } => {
                core::ptr::copy_nonoverlapping(block.phys.as_ptr(), dest.as_ptr(), cells);
                logging::log_copy_back(block.index, block.addr, cells * CELL_SIZE);
            }
        }
    }
}

impl Drop for HeapFrame<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            // Abandoned mid-call: release without copying back.
            self.phase = CallPhase::Unwound;
            self.unwind();
        }
    }
}
