//! Parameter queue - the pending definition of the next native call
//!
//! Design: Fixed capacity of `MAX_EXEC_PARAMS` inline slots that never spill
//! to the heap. Each slot is a scalar, an array or a string; arrays and
//! strings are "marked" and get a heap-stack block at call time.

use core::ptr::NonNull;

use smallvec::SmallVec;

use crate::cell::{cells_for_bytes, Cell};
use crate::error::{ErrorCode, ErrorLatch};

/// Maximum parameters per call, shared with the native ABI
pub const MAX_EXEC_PARAMS: usize = 32;

/// Copy-back flag: write the heap block back to the caller after the call
pub const COPYBACK: u32 = 1 << 0;

/// String flag: transcode as UTF-8, never splitting a sequence
pub const STRING_UTF8: u32 = 1 << 0;
/// String flag: copy the caller's buffer into the heap block before the call
pub const STRING_COPY: u32 = 1 << 1;
/// String flag: copy the caller's buffer byte for byte
pub const STRING_BINARY: u32 = 1 << 2;

/// How string bytes are written into script memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    /// Byte-wise C string copy into the packed cell representation
    #[default]
    Ascii,
    /// C string copy truncated on a code-point boundary
    Utf8,
    /// Exact copy of the whole buffer
    Binary,
}

/// Input policy of a string parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringFlags {
    pub copy: bool,
    pub encoding: StringEncoding,
}

impl StringFlags {
    pub const fn new(copy: bool, encoding: StringEncoding) -> Self {
        Self { copy, encoding }
    }

    /// Decode raw ABI bits (`STRING_*`); UTF-8 wins over binary
    pub const fn from_bits(bits: u32) -> Self {
        let encoding = if bits & STRING_UTF8 != 0 {
            StringEncoding::Utf8
        } else if bits & STRING_BINARY != 0 {
            StringEncoding::Binary
        } else {
            StringEncoding::Ascii
        };
        Self {
            copy: bits & STRING_COPY != 0,
            encoding,
        }
    }

}

/// Where a string parameter's input bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringSource {
    /// Allocate only
    None,
    /// Caller-owned buffer of the slot's byte length
    Borrowed(NonNull<u8>),
    /// Snapshot taken at push time
    Owned(Box<[u8]>),
}

impl StringSource {
    /// Input bytes, `len` long for borrowed buffers
    ///
    /// # Safety
    /// A borrowed buffer must still be valid for `len` bytes.
    pub(crate) unsafe fn bytes(&self, len: usize) -> Option<&[u8]> {
        match self {
            Self::None => None,
            Self::Borrowed(ptr) => Some(core::slice::from_raw_parts(ptr.as_ptr(), len)),
            Self::Owned(bytes) => Some(bytes),
        }
    }

    /// Destination for copy-back; only borrowed buffers can receive one
    pub(crate) fn destination(&self) -> Option<NonNull<u8>> {
        match self {
            Self::Borrowed(ptr) => Some(*ptr),
            Self::None | Self::Owned(_) => None,
        }
    }
}

/// One queued argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSlot {
    /// Passed inline in the call frame
    Scalar(Cell),
    /// Block of `cells` cells, optionally seeded from and written back to `source`
    Array {
        source: Option<NonNull<Cell>>,
        cells: u32,
        copy_back: bool,
    },
    /// Block sized for `bytes` bytes, transcoded per `flags`
    String {
        source: StringSource,
        bytes: u32,
        flags: StringFlags,
        copy_back: bool,
    },
}

impl ParamSlot {
    /// Whether the slot needs a heap-stack block
    #[inline]
    pub fn is_marked(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }

    /// Cells the slot occupies on the heap-stack
    pub fn heap_cells(&self) -> u32 {
        match self {
            Self::Scalar(_) => 0,
            Self::Array { cells, .. } => *cells,
            Self::String { bytes, .. } => cells_for_bytes(*bytes as usize) as u32,
        }
    }
}

/// Bounded queue of pending arguments plus its error latch
#[derive(Debug, Default)]
pub struct ParamQueue {
    slots: SmallVec<[ParamSlot; MAX_EXEC_PARAMS]>,
    latch: ErrorLatch,
}

impl ParamQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot; a full queue latches `ParamsMax` and stays unchanged
    pub fn push(&mut self, slot: ParamSlot) -> Result<(), ErrorCode> {
        if self.slots.len() >= MAX_EXEC_PARAMS {
            return Err(self.latch.set(ErrorCode::ParamsMax));
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn push_scalar(&mut self, value: Cell) -> Result<(), ErrorCode> {
        self.push(ParamSlot::Scalar(value))
    }

    /// Copy-back is dropped when there is no source to write to
    pub fn push_array(
        &mut self,
        source: Option<NonNull<Cell>>,
        cells: u32,
        copy_back: bool,
    ) -> Result<(), ErrorCode> {
        self.push(ParamSlot::Array {
            copy_back: copy_back && source.is_some(),
            source,
            cells,
        })
    }

    pub fn push_string(
        &mut self,
        source: StringSource,
        bytes: u32,
        flags: StringFlags,
        copy_back: bool,
    ) -> Result<(), ErrorCode> {
        self.push(ParamSlot::String {
            source,
            bytes,
            flags,
            copy_back,
        })
    }

    /// Drop queued slots and clear the latch
    pub fn cancel(&mut self) {
        self.slots.clear();
        self.latch.clear();
    }

    /// Move the queued call out, leaving this queue empty
    pub fn take(&mut self) -> ParamQueue {
        core::mem::take(self)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn latched(&self) -> Option<ErrorCode> {
        self.latch.get()
    }

    #[inline]
    pub fn slots(&self) -> &[ParamSlot] {
        &self.slots
    }
}
