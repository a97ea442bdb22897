//! Native function descriptors

use core::fmt;

use crate::cell::Cell;
use crate::context::PluginContext;

/// Host function callable from script code
///
/// `params[0]` holds the argument count, arguments follow in push order.
pub type NativeFn = fn(ctx: &dyn PluginContext, params: &[Cell]) -> Cell;

/// Named native, bound or awaiting a host binding
#[derive(Clone)]
pub struct Native {
    name: String,
    func: Option<NativeFn>,
}

impl Native {
    pub fn new(name: impl Into<String>, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            func: Some(func),
        }
    }

    /// Declared by a plugin but not provided by the host
    pub fn unbound(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn func(&self) -> Option<NativeFn> {
        self.func
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.func.is_some()
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}
