//! Native invoker - queue arguments, marshal them, call the native, unwind
//!
//! Re-entrancy: the only mutable state is the queue, and `invoke` moves it out
//! before touching the heap-stack. A native may push onto and execute the very
//! invoker that is calling it; the nested call starts from an empty queue and
//! its heap blocks sit on top of ours until it has fully unwound.

use core::cell::RefCell;
use core::ptr::NonNull;
use std::rc::Rc;

use tracing::debug_span;

use super::exception::ExceptionScope;
use super::frame::{CallPhase, CopyBack, HeapFrame, HeldBlock};
use super::native::Native;
use super::params::{
    ParamQueue, ParamSlot, StringEncoding, StringFlags, StringSource, COPYBACK, MAX_EXEC_PARAMS,
};
use crate::cell::{float_to_cell, Cell, LocalAddr};
use crate::config::InvokerConfig;
use crate::context::{strings, PluginContext};
use crate::error::{ErrorCode, InvokeFailure};
use crate::logging;

/// Call site bound to one context and one native
pub struct NativeInvoker {
    context: Rc<dyn PluginContext>,
    native: Rc<Native>,
    queue: RefCell<ParamQueue>,
    log_uncaught_errors: bool,
}

impl NativeInvoker {
    pub fn new(context: Rc<dyn PluginContext>, native: Rc<Native>) -> Self {
        Self::with_config(context, native, &InvokerConfig::default())
    }

    pub fn with_config(
        context: Rc<dyn PluginContext>,
        native: Rc<Native>,
        config: &InvokerConfig,
    ) -> Self {
        Self {
            context,
            native,
            queue: RefCell::new(ParamQueue::new()),
            log_uncaught_errors: config.log_uncaught_errors,
        }
    }

    // ========================================================================
    // Queue building
    // ========================================================================

    /// Queue an inline cell
    pub fn push_scalar(&self, value: Cell) -> Result<(), ErrorCode> {
        self.push_with(|queue| queue.push_scalar(value))
    }

    /// Queue a float as its bit pattern
    pub fn push_float(&self, value: f32) -> Result<(), ErrorCode> {
        self.push_scalar(float_to_cell(value))
    }

    /// Queue a one-cell reference
    ///
    /// # Safety
    /// `cell` must stay valid for reads (and writes, with copy-back) until the
    /// queue is executed or cancelled.
    pub unsafe fn push_scalar_by_ref(&self, cell: *mut Cell, copy_back: bool) -> Result<(), ErrorCode> {
        self.push_array(cell, 1, copy_back)
    }

    /// Queue a one-float reference
    ///
    /// # Safety
    /// Same contract as [`NativeInvoker::push_scalar_by_ref`].
    pub unsafe fn push_float_by_ref(&self, value: *mut f32, copy_back: bool) -> Result<(), ErrorCode> {
        self.push_scalar_by_ref(value as *mut Cell, copy_back)
    }

    /// Queue an array of `cells` cells, seeded from `array` when non-null
    ///
    /// Copy-back is ignored for a null `array`.
    ///
    /// # Safety
    /// A non-null `array` must stay valid for `cells` cells until the queue is
    /// executed or cancelled.
    pub unsafe fn push_array(&self, array: *mut Cell, cells: u32, copy_back: bool) -> Result<(), ErrorCode> {
        self.push_with(|queue| queue.push_array(NonNull::new(array), cells, copy_back))
    }

    /// Queue a read-only string: ASCII copy, sized for the text plus NUL
    ///
    /// Like a C string, the text ends at its first NUL.
    pub fn push_string(&self, text: &str) -> Result<(), ErrorCode> {
        let text = strings::c_str_bytes(text.as_bytes());
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text);
        bytes.push(0);
        let len = u32::try_from(bytes.len()).map_err(|_| ErrorCode::Param)?;

        self.push_with(|queue| {
            queue.push_string(
                StringSource::Owned(bytes.into_boxed_slice()),
                len,
                StringFlags::new(true, StringEncoding::Ascii),
                false,
            )
        })
    }

    /// Queue a string buffer of `length` bytes with explicit policy
    ///
    /// `string_flags` takes `STRING_*` bits, `copy_flags` takes `COPYBACK`.
    ///
    /// # Safety
    /// A non-null `buffer` must stay valid for `length` bytes (writable with
    /// copy-back) until the queue is executed or cancelled.
    pub unsafe fn push_string_ex(
        &self,
        buffer: *mut u8,
        length: u32,
        string_flags: u32,
        copy_flags: u32,
    ) -> Result<(), ErrorCode> {
        let source = match NonNull::new(buffer) {
            Some(ptr) => StringSource::Borrowed(ptr),
            None => StringSource::None,
        };
        self.push_with(|queue| {
            queue.push_string(
                source,
                length,
                StringFlags::from_bits(string_flags),
                copy_flags & COPYBACK != 0,
            )
        })
    }

    /// Discard queued arguments and clear a latched error
    pub fn cancel(&self) {
        self.queue.borrow_mut().cancel();
    }

    fn push_with(&self, push: impl FnOnce(&mut ParamQueue) -> Result<(), ErrorCode>) -> Result<(), ErrorCode> {
        let result = push(&mut self.queue.borrow_mut());
        if result == Err(ErrorCode::ParamsMax) {
            logging::log_queue_overflow(self.native.name(), MAX_EXEC_PARAMS);
        }
        result
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run the queued call; uncaught errors are logged rather than rendered
    pub fn execute(&self) -> Result<Cell, ErrorCode> {
        self.execute_ex(None).map_err(|failure| failure.code)
    }

    /// Run the queued call
    ///
    /// With `message_size = Some(n)` a failure carries the diagnostic message,
    /// cut to fit a NUL-terminated buffer of `n` bytes.
    pub fn execute_ex(&self, message_size: Option<usize>) -> Result<Cell, InvokeFailure> {
        let ctx = &*self.context;
        let name = self.native.name();
        let span = debug_span!("native_invoke", native = name, argc = self.pending_params());
        let _enter = span.enter();
        let _perf = logging::perf::track("native_invoke");

        let mut scope = ExceptionScope::enter(ctx, name);
        scope.debug(message_size.is_none() && self.log_uncaught_errors);

        let result = self.invoke();

        match scope.catch() {
            None => Ok(result.unwrap_or_default()),
            Some(caught) => Err(InvokeFailure {
                code: caught.code,
                message: message_size.map(|size| {
                    strings::truncate_str(&caught.message, size.saturating_sub(1)).to_string()
                }),
                result,
            }),
        }
    }

    /// Run the queued call, rendering a failure message into script memory
    ///
    /// A zero `size` means no buffer, as with [`NativeInvoker::execute`].
    pub fn execute_to_local(&self, buffer: LocalAddr, size: usize) -> Result<Cell, ErrorCode> {
        if size == 0 {
            return self.execute();
        }
        self.execute_ex(Some(size)).map_err(|failure| {
            let message = failure.message.unwrap_or_default();
            if let Err(err) = self.context.string_to_local_utf8(buffer, size, message.as_bytes()) {
                tracing::warn!(%buffer, size, error = %err, "could not write error message");
            }
            failure.code
        })
    }

    /// Marshal, call and unwind; returns the native's result if it ran
    ///
    /// Every failure is reported through the context.
    fn invoke(&self) -> Option<Cell> {
        let ctx = &*self.context;
        let name = self.native.name();

        let Some(func) = self.native.func() else {
            self.cancel();
            ctx.report_error(ErrorCode::NotRunnable);
            return None;
        };
        if let Some(err) = self.latched_error() {
            self.cancel();
            ctx.report_error(err);
            return None;
        }

        // Detach the queued call before anything can re-enter.
        let queued = self.queue.borrow_mut().take();
        let argc = queued.len();

        let mut frame = HeapFrame::new(ctx, name);
        let mut marshaled = true;
        for (index, slot) in queued.slots().iter().enumerate() {
            if let Err(err) = Self::marshal(ctx, &mut frame, index, slot) {
                logging::log_marshal_failure(name, index, err);
                ctx.report_error(err);
                marshaled = false;
                break;
            }
        }

        let result = marshaled.then(|| frame.call(func, argc));
        frame.unwind();
        debug_assert_eq!(frame.phase(), CallPhase::Unwound);

        result
    }

    fn marshal(
        ctx: &dyn PluginContext,
        frame: &mut HeapFrame<'_>,
        index: usize,
        slot: &ParamSlot,
    ) -> Result<(), ErrorCode> {
        let (source, copy_back) = match slot {
            ParamSlot::Scalar(value) => {
                frame.set_arg(index, *value);
                return Ok(());
            }
            ParamSlot::Array { source, cells, copy_back } => {
                let target = source
                    .filter(|_| *copy_back)
                    .map(|dest| CopyBack::Cells { dest, cells: *cells as usize });
                (*source, target)
            }
            ParamSlot::String { source, bytes, copy_back, .. } => {
                let target = source
                    .destination()
                    .filter(|_| *copy_back)
                    .map(|dest| CopyBack::Bytes { dest, len: *bytes as usize });
                (None, target)
            }
        };

        let (addr, phys) = ctx.heap_alloc(slot.heap_cells())?;
        frame.hold(HeldBlock { index, addr, phys, copy_back });
        frame.set_arg(index, addr.to_cell());

        match slot {
            ParamSlot::Array { cells, .. } => {
                if let Some(src) = source {
                    unsafe {
                        core::ptr::copy_nonoverlapping(src.as_ptr(), phys.as_ptr(), *cells as usize);
                    }
                }
            }
            ParamSlot::String { source, bytes, flags, .. } if flags.copy => {
                let len = *bytes as usize;
                if let Some(src) = unsafe { source.bytes(len) } {
                    Self::copy_string(ctx, addr, phys, len, src, *flags)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn copy_string(
        ctx: &dyn PluginContext,
        addr: LocalAddr,
        phys: NonNull<Cell>,
        len: usize,
        src: &[u8],
        flags: StringFlags,
    ) -> Result<(), ErrorCode> {
        match flags.encoding {
            StringEncoding::Utf8 => ctx.string_to_local_utf8(addr, len, src).map(drop),
            StringEncoding::Ascii => ctx.string_to_local(addr, len, src).map(drop),
            StringEncoding::Binary => {
                let len = len.min(src.len());
                unsafe {
                    core::ptr::copy_nonoverlapping(src.as_ptr(), phys.as_ptr() as *mut u8, len);
                }
                Ok(())
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Name of the bound native, for diagnostics
    #[inline]
    pub fn debug_name(&self) -> &str {
        self.native.name()
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.native.is_bound()
    }

    #[inline]
    pub fn parent_context(&self) -> &Rc<dyn PluginContext> {
        &self.context
    }

    /// Arguments queued for the next call
    pub fn pending_params(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn latched_error(&self) -> Option<ErrorCode> {
        self.queue.borrow().latched()
    }
}

impl Drop for NativeInvoker {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl core::fmt::Debug for NativeInvoker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeInvoker")
            .field("native", &self.native)
            .field("pending", &self.pending_params())
            .field("latched", &self.latched_error())
            .finish()
    }
}
