//! Heap-stack arena - LIFO cell blocks for call-scoped buffers
//!
//! Design: One host region acquired up front so host pointers never move.
//! Blocks are carved off a heap pointer and must be popped in exact reverse
//! order; the block stack catches any pop that is not the most recent block.

use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

use crate::cell::{Cell, LocalAddr, CELL_SIZE};
use crate::error::ErrorCode;
use crate::logging;

/// Live block bookkeeping
#[derive(Debug, Clone, Copy)]
struct HeapBlock {
    offset: usize,
    cells: usize,
}

/// Heap usage counters for leak and ordering checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live: usize,
    pub allocations: u64,
    pub frees: u64,
    pub used_cells: usize,
    pub high_water_cells: usize,
    pub capacity_cells: usize,
}

/// LIFO arena over a fixed host region
pub struct HeapStack {
    base: NonNull<Cell>,
    layout: Layout,
    capacity: usize,
    hp: usize,
    blocks: Vec<HeapBlock>,
    allocations: u64,
    frees: u64,
    high_water: usize,
}

impl HeapStack {
    /// Acquire a zeroed region of `cells` cells
    pub fn new(cells: usize) -> Option<Self> {
        // Zero-sized layouts cannot be allocated; keep one spare cell.
        let layout = Layout::array::<Cell>(cells.max(1)).ok()?;
        let base = NonNull::new(unsafe { alloc_zeroed(layout) } as *mut Cell)?;

        Some(Self {
            base,
            layout,
            capacity: cells,
            hp: 0,
            blocks: Vec::new(),
            allocations: 0,
            frees: 0,
            high_water: 0,
        })
    }

    /// Push a block of `cells` cells
    pub fn alloc(&mut self, cells: usize) -> Result<(LocalAddr, NonNull<Cell>), ErrorCode> {
        let end = self.hp.checked_add(cells).ok_or(ErrorCode::HeapLow)?;
        if end > self.capacity {
            return Err(ErrorCode::HeapLow);
        }

        let offset = self.hp;
        let addr = Self::addr_of(offset)?;
        let phys = unsafe {
            let ptr = self.base.as_ptr().add(offset);
            core::ptr::write_bytes(ptr, 0, cells);
            NonNull::new_unchecked(ptr)
        };

        self.hp = end;
        self.high_water = self.high_water.max(end);
        self.allocations += 1;
        self.blocks.push(HeapBlock { offset, cells });

        logging::log_heap_alloc(addr, cells);
        Ok((addr, phys))
    }

    /// Pop the most recent block, which must start at `addr`
    pub fn pop(&mut self, addr: LocalAddr) -> Result<(), ErrorCode> {
        let top = *self.blocks.last().ok_or(ErrorCode::HeapMin)?;
        let expected = Self::addr_of(top.offset)?;
        if expected != addr {
            logging::log_lifo_violation(expected, addr);
            return Err(ErrorCode::InvalidAddress);
        }

        self.blocks.pop();
        self.hp = top.offset;
        self.frees += 1;

        logging::log_heap_free(addr, top.cells);
        Ok(())
    }

    /// Resolve `cells` cells at `addr` inside the used part of the heap
    pub fn phys(&self, addr: LocalAddr, cells: usize) -> Result<NonNull<Cell>, ErrorCode> {
        let offset = self.cell_offset(addr)?;
        let end = offset.checked_add(cells).ok_or(ErrorCode::InvalidAddress)?;
        if end > self.hp {
            return Err(ErrorCode::InvalidAddress);
        }
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }

    /// Host bytes from `addr` to the top of the used heap
    pub fn bytes_from(&self, addr: LocalAddr) -> Result<(NonNull<u8>, usize), ErrorCode> {
        let offset = self.cell_offset(addr)?;
        if offset > self.hp {
            return Err(ErrorCode::InvalidAddress);
        }
        let ptr = unsafe { self.base.as_ptr().add(offset) as *mut u8 };
        Ok((unsafe { NonNull::new_unchecked(ptr) }, (self.hp - offset) * CELL_SIZE))
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live: self.blocks.len(),
            allocations: self.allocations,
            frees: self.frees,
            used_cells: self.hp,
            high_water_cells: self.high_water,
            capacity_cells: self.capacity,
        }
    }

    fn cell_offset(&self, addr: LocalAddr) -> Result<usize, ErrorCode> {
        let bytes = addr.offset();
        if bytes % CELL_SIZE != 0 {
            return Err(ErrorCode::InvalidAddress);
        }
        Ok(bytes / CELL_SIZE)
    }

    fn addr_of(offset: usize) -> Result<LocalAddr, ErrorCode> {
        offset
            .checked_mul(CELL_SIZE)
            .and_then(|bytes| u32::try_from(bytes).ok())
            .map(LocalAddr::new)
            .ok_or(ErrorCode::HeapLow)
    }
}

impl Drop for HeapStack {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base.as_ptr() as *mut u8, self.layout);
        }
    }
}

impl core::fmt::Debug for HeapStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapStack")
            .field("capacity", &self.capacity)
            .field("hp", &self.hp)
            .field("depth", &self.blocks.len())
            .finish()
    }
}
