//! Cell model - the VM's fixed-width scalar unit
//!
//! Design: Every script value crossing the native boundary is a 32-bit cell.
//! Integers travel as-is, floats as their reinterpreted bit pattern, and
//! arrays/strings as the local address of a heap block.

use core::fmt;

/// Signed cell, the unit of every call frame slot
pub type Cell = i32;

/// Unsigned view of a cell
pub type UCell = u32;

/// Size of one cell in bytes
pub const CELL_SIZE: usize = core::mem::size_of::<Cell>();

/// Script-visible address (byte offset into script memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct LocalAddr(pub UCell);

impl LocalAddr {
    #[inline]
    pub const fn new(offset: UCell) -> Self {
        Self(offset)
    }

    /// Reinterpret a call-frame cell as an address
    #[inline]
    pub const fn from_cell(cell: Cell) -> Self {
        Self(cell as UCell)
    }

    /// Address as it is stored in a call frame
    #[inline]
    pub const fn to_cell(self) -> Cell {
        self.0 as Cell
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reinterpret a float's bit pattern as a cell
#[inline]
pub const fn float_to_cell(value: f32) -> Cell {
    value.to_bits() as Cell
}

/// Reinterpret a cell's bit pattern as a float
#[inline]
pub const fn cell_to_float(cell: Cell) -> f32 {
    f32::from_bits(cell as UCell)
}

/// Cells needed to hold `bytes` bytes
#[inline]
pub const fn cells_for_bytes(bytes: usize) -> usize {
    (bytes + CELL_SIZE - 1) / CELL_SIZE
}
