//! Error codes shared by the invoker and the script context
//!
//! Codes keep the VM's historical numbering so they can be handed back to
//! script code unchanged. Zero ("no error") is never materialized; success is
//! `Ok(..)`.

use crate::cell::Cell;

/// Numeric VM error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum ErrorCode {
    #[error("Not enough space on the heap")]
    HeapLow = 3,
    #[error("Invalid parameter or parameter type")]
    Param = 4,
    #[error("Invalid memory address")]
    InvalidAddress = 5,
    #[error("Heap underflow")]
    HeapMin = 13,
    #[error("Native is not bound")]
    InvalidNative = 21,
    #[error("Maximum number of parameters reached")]
    ParamsMax = 22,
    #[error("Native detected error")]
    Native = 23,
    #[error("Function or plugin is not runnable")]
    NotRunnable = 24,
}

impl ErrorCode {
    /// Numeric code as seen by script code
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            3 => Some(Self::HeapLow),
            4 => Some(Self::Param),
            5 => Some(Self::InvalidAddress),
            13 => Some(Self::HeapMin),
            21 => Some(Self::InvalidNative),
            22 => Some(Self::ParamsMax),
            23 => Some(Self::Native),
            24 => Some(Self::NotRunnable),
            _ => None,
        }
    }
}

/// Sticky error state for queuing failures
///
/// Once set, the code stays until [`ErrorLatch::clear`] is called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorLatch(Option<ErrorCode>);

impl ErrorLatch {
    #[inline]
    pub const fn new() -> Self {
        Self(None)
    }

    /// Latch `code` and hand it back for returning
    #[inline]
    pub fn set(&mut self, code: ErrorCode) -> ErrorCode {
        self.0 = Some(code);
        code
    }

    #[inline]
    pub fn get(&self) -> Option<ErrorCode> {
        self.0
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = None;
    }
}

/// Failed invocation as seen by the caller of `execute_ex`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} (error {})", code.code())]
pub struct InvokeFailure {
    pub code: ErrorCode,
    /// Rendered diagnostic, present only when the caller asked for one
    pub message: Option<String>,
    /// Native return value, present when the call itself executed
    pub result: Option<Cell>,
}
