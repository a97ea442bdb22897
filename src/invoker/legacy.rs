//! Call-compatibility surface kept for old embedders
//!
//! These entry points predate the queue-and-execute path and do nothing; they
//! never touch the queue or the heap-stack.

use std::rc::Rc;

use super::NativeInvoker;
use crate::cell::Cell;
use crate::context::PluginContext;
use crate::error::ErrorCode;

/// Runtime that owns a script function; natives have none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeId(pub u32);

impl NativeInvoker {
    #[deprecated(note = "queue arguments with the push_* methods and call execute")]
    pub fn call_function(&self, _params: &[Cell]) -> Result<Cell, ErrorCode> {
        Ok(0)
    }

    #[deprecated(note = "queue arguments with the push_* methods and call execute")]
    pub fn call_function2(
        &self,
        _ctx: &Rc<dyn PluginContext>,
        _params: &[Cell],
    ) -> Result<Cell, ErrorCode> {
        Ok(0)
    }

    #[deprecated(note = "use execute")]
    pub fn execute2(&self, _ctx: &Rc<dyn PluginContext>) -> Result<Cell, ErrorCode> {
        Ok(0)
    }

    #[deprecated(note = "natives have no function id")]
    pub fn function_id(&self) -> u32 {
        0
    }

    #[deprecated(note = "natives have no parent runtime")]
    pub fn parent_runtime(&self) -> Option<RuntimeId> {
        None
    }
}
