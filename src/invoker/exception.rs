//! Exception scope around one `execute`
//!
//! Entering clears whatever error the context still holds, so a failure from
//! an earlier, unrelated call cannot be attributed to this one. Leaving
//! consumes anything raised inside, so nothing leaks to the caller's context.

use crate::context::{PendingException, PluginContext};
use crate::logging;

pub(crate) struct ExceptionScope<'a> {
    ctx: &'a dyn PluginContext,
    native: &'a str,
    debug: bool,
}

impl<'a> ExceptionScope<'a> {
    pub fn enter(ctx: &'a dyn PluginContext, native: &'a str) -> Self {
        ctx.clear_last_error();
        Self {
            ctx,
            native,
            debug: false,
        }
    }

    /// Log caught errors, for callers that do not read the message
    pub fn debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    /// Take the error raised inside the scope, if any
    pub fn catch(&self) -> Option<PendingException> {
        let caught = self.ctx.take_exception()?;
        if self.debug {
            logging::log_uncaught_error(self.native, caught.code, &caught.message);
        }
        Some(caught)
    }
}

impl Drop for ExceptionScope<'_> {
    fn drop(&mut self) {
        self.catch();
    }
}
