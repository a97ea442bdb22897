//! Invoker tests - queue, marshaling, copy-back and unwinding
//!
//! Natives are plain function pointers, so observations made inside a call
//! are passed out through thread-locals.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use super::*;
use crate::cell::{cell_to_float, float_to_cell, Cell, LocalAddr};
use crate::config::InvokerConfig;
use crate::context::{PluginContext, ScriptContext};
use crate::error::ErrorCode;

thread_local! {
    static SEEN: RefCell<Vec<Cell>> = RefCell::new(Vec::new());
    static CALLS: StdCell<usize> = StdCell::new(0);
    static CALLER_BUFFER: StdCell<*const Cell> = StdCell::new(core::ptr::null());
    static SEEN_DURING_CALL: RefCell<Vec<Cell>> = RefCell::new(Vec::new());
    static SEEN_BYTES: RefCell<Vec<u8>> = RefCell::new(Vec::new());
}

fn setup(heap_cells: usize, func: NativeFn) -> (Rc<ScriptContext>, NativeInvoker) {
    CALLS.with(|c| c.set(0));
    let ctx = Rc::new(ScriptContext::new(heap_cells).expect("heap region"));
    let invoker = NativeInvoker::new(ctx.clone(), Rc::new(Native::new("test_native", func)));
    (ctx, invoker)
}

fn calls() -> usize {
    CALLS.with(|c| c.get())
}

fn record_params(_ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
    CALLS.with(|c| c.set(c.get() + 1));
    SEEN.with(|seen| *seen.borrow_mut() = params.to_vec());
    params[0]
}

fn seen() -> Vec<Cell> {
    SEEN.with(|seen| seen.borrow().clone())
}

/// (scalar, array[3]) -> scalar + sum(array), doubling the array in place
fn double_array(ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
    CALLS.with(|c| c.set(c.get() + 1));
    let addr = LocalAddr::from_cell(params[2]);
    let mut cells = [0; 3];
    ctx.read_cells(addr, &mut cells).unwrap();

    let sum = params[1] + cells.iter().sum::<Cell>();
    for cell in &mut cells {
        *cell *= 2;
    }
    ctx.write_cells(addr, &cells).unwrap();

    // The caller's buffer must not change before the call returns.
    let caller = CALLER_BUFFER.with(|b| b.get());
    if !caller.is_null() {
        let snapshot = unsafe { core::slice::from_raw_parts(caller, 3) }.to_vec();
        SEEN_DURING_CALL.with(|s| *s.borrow_mut() = snapshot);
    }
    sum
}

/// (string) -> length, recording the string as the native sees it
fn read_string(ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
    CALLS.with(|c| c.set(c.get() + 1));
    let text = ctx.local_to_string(LocalAddr::from_cell(params[1])).unwrap();
    let len = text.len() as Cell;
    SEEN_BYTES.with(|s| *s.borrow_mut() = text.into_bytes());
    len
}

/// (buffer of >= 2 cells) -> 0, recording its first 8 bytes and overwriting them
fn rewrite_bytes(ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
    CALLS.with(|c| c.set(c.get() + 1));
    let addr = LocalAddr::from_cell(params[1]);
    let phys = ctx.local_to_phys_addr(addr, 2).unwrap();
    let bytes = unsafe { core::slice::from_raw_parts_mut(phys.as_ptr() as *mut u8, 8) };
    SEEN_BYTES.with(|s| *s.borrow_mut() = bytes.to_vec());
    bytes.copy_from_slice(b"written\0");
    0
}

fn fail_with_message(ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
    CALLS.with(|c| c.set(c.get() + 1));
    if params[0] > 0 {
        let addr = LocalAddr::from_cell(params[1]);
        ctx.write_cells(addr, &[99]).unwrap();
    }
    ctx.report_native_error("invalid handle 7");
    7
}

fn leak_block(ctx: &dyn PluginContext, _params: &[Cell]) -> Cell {
    CALLS.with(|c| c.set(c.get() + 1));
    ctx.heap_alloc(1).unwrap();
    0
}

// ===== Parameter queue =====

#[test]
fn queue_accepts_exactly_max_params() {
    let (_ctx, invoker) = setup(64, record_params);
    for i in 0..MAX_EXEC_PARAMS {
        invoker.push_scalar(i as Cell).unwrap();
    }
    assert_eq!(invoker.pending_params(), MAX_EXEC_PARAMS);

    assert_eq!(invoker.push_scalar(99), Err(ErrorCode::ParamsMax));
    assert_eq!(invoker.push_string("x"), Err(ErrorCode::ParamsMax));
    assert_eq!(invoker.pending_params(), MAX_EXEC_PARAMS);
    assert_eq!(invoker.latched_error(), Some(ErrorCode::ParamsMax));
}

#[test]
fn latched_error_blocks_execute_until_cancelled_by_it() {
    let (ctx, invoker) = setup(64, record_params);
    let mut array = [1, 2];
    for _ in 0..MAX_EXEC_PARAMS - 1 {
        invoker.push_scalar(1).unwrap();
    }
    unsafe { invoker.push_array(array.as_mut_ptr(), 2, true).unwrap() };
    assert_eq!(invoker.push_scalar(2), Err(ErrorCode::ParamsMax));

    assert_eq!(invoker.execute(), Err(ErrorCode::ParamsMax));
    assert_eq!(calls(), 0);
    assert_eq!(ctx.heap_stats().allocations, 0);

    // The failed execute cancelled the queue and cleared the latch.
    assert_eq!(invoker.pending_params(), 0);
    assert_eq!(invoker.latched_error(), None);
    assert_eq!(invoker.execute(), Ok(0));
    assert_eq!(calls(), 1);
}

#[test]
fn cancel_clears_queue_and_latch_and_is_idempotent() {
    let (_ctx, invoker) = setup(64, record_params);
    invoker.cancel();

    for _ in 0..=MAX_EXEC_PARAMS {
        let _ = invoker.push_scalar(5);
    }
    invoker.cancel();
    invoker.cancel();
    assert_eq!(invoker.pending_params(), 0);
    assert_eq!(invoker.latched_error(), None);

    assert_eq!(invoker.execute(), Ok(0));
    assert_eq!(seen(), vec![0]);
}

#[test]
fn string_flags_decode_abi_bits() {
    assert_eq!(
        StringFlags::from_bits(STRING_COPY | STRING_UTF8),
        StringFlags::new(true, StringEncoding::Utf8)
    );
    assert_eq!(
        StringFlags::from_bits(STRING_BINARY),
        StringFlags::new(false, StringEncoding::Binary)
    );
    assert_eq!(
        StringFlags::from_bits(STRING_UTF8 | STRING_BINARY).encoding,
        StringEncoding::Utf8
    );
    assert_eq!(StringFlags::from_bits(0), StringFlags::default());
}

#[test]
fn slots_report_marking_and_heap_size() {
    let mut queue = ParamQueue::new();
    queue.push_scalar(3).unwrap();
    queue.push_array(None, 4, true).unwrap();
    queue
        .push_string(StringSource::None, 9, StringFlags::default(), false)
        .unwrap();

    let slots = queue.slots();
    assert!(!slots[0].is_marked());
    assert!(slots[1].is_marked());
    assert!(slots[2].is_marked());
    assert_eq!(slots[1].heap_cells(), 4);
    assert_eq!(slots[2].heap_cells(), 3);

    // Copy-back without a source is dropped at push time
    assert!(matches!(slots[1], ParamSlot::Array { copy_back: false, .. }));

    let taken = queue.take();
    assert_eq!(taken.len(), 3);
    assert!(queue.is_empty());
}

// ===== Scalars =====

#[test]
fn scalars_land_in_frame_after_count() {
    let (_ctx, invoker) = setup(64, record_params);
    invoker.push_scalar(10).unwrap();
    invoker.push_scalar(-3).unwrap();
    invoker.push_float(1.5).unwrap();

    assert_eq!(invoker.execute(), Ok(3));
    let frame = seen();
    assert_eq!(frame[..3], [3, 10, -3]);
    assert_eq!(cell_to_float(frame[3]), 1.5);
}

#[test]
fn successful_execute_leaves_queue_empty() {
    let (_ctx, invoker) = setup(64, record_params);
    invoker.push_scalar(1).unwrap();
    invoker.execute().unwrap();
    assert_eq!(invoker.pending_params(), 0);

    invoker.execute().unwrap();
    assert_eq!(seen(), vec![0]);
}

// ===== Arrays =====

#[test]
fn array_copy_back_applies_after_return() {
    let (ctx, invoker) = setup(64, double_array);
    let mut array = [1, 2, 3];
    CALLER_BUFFER.with(|b| b.set(array.as_ptr()));

    invoker.push_scalar(42).unwrap();
    unsafe { invoker.push_array(array.as_mut_ptr(), 3, true).unwrap() };
    let result = invoker.execute();
    CALLER_BUFFER.with(|b| b.set(core::ptr::null()));

    assert_eq!(result, Ok(48));
    assert_eq!(SEEN_DURING_CALL.with(|s| s.borrow().clone()), vec![1, 2, 3]);
    assert_eq!(array, [2, 4, 6]);
    assert_eq!(ctx.heap_stats().live, 0);
}

#[test]
fn array_without_copy_back_is_left_alone() {
    let (ctx, invoker) = setup(64, double_array);
    let mut array = [1, 2, 3];

    invoker.push_scalar(0).unwrap();
    unsafe { invoker.push_array(array.as_mut_ptr(), 3, false).unwrap() };
    assert_eq!(invoker.execute(), Ok(6));
    assert_eq!(array, [1, 2, 3]);
    assert_eq!(ctx.heap_stats().frees, 1);
}

#[test]
fn null_array_is_allocated_but_not_seeded() {
    let (_ctx, invoker) = setup(64, double_array);
    invoker.push_scalar(5).unwrap();
    unsafe { invoker.push_array(core::ptr::null_mut(), 3, true).unwrap() };
    assert_eq!(invoker.execute(), Ok(5));
}

#[test]
fn by_ref_scalars_copy_back_one_cell() {
    fn bump(ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
        let cell = LocalAddr::from_cell(params[1]);
        let float = LocalAddr::from_cell(params[2]);
        let mut value = [0];
        ctx.read_cells(cell, &mut value).unwrap();
        ctx.write_cells(cell, &[value[0] + 1]).unwrap();
        ctx.write_cells(float, &[float_to_cell(2.5)]).unwrap();
        0
    }

    let (_ctx, invoker) = setup(16, bump);
    let mut value: Cell = 41;
    let mut ratio: f32 = 0.0;
    let mut neighbour: [Cell; 2] = [7, 7];
    unsafe {
        invoker.push_scalar_by_ref(&mut value, true).unwrap();
        invoker.push_float_by_ref(&mut ratio, true).unwrap();
        invoker.push_scalar_by_ref(neighbour.as_mut_ptr(), false).unwrap();
    }
    invoker.execute().unwrap();

    assert_eq!(value, 42);
    assert_eq!(ratio, 2.5);
    assert_eq!(neighbour, [7, 7]);
}

// ===== Strings =====

#[test]
fn push_string_is_copied_in_as_ascii() {
    let (ctx, invoker) = setup(64, read_string);
    invoker.push_string("hello, native").unwrap();
    assert_eq!(invoker.execute(), Ok(13));
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), b"hello, native");
    assert_eq!(ctx.heap_stats().high_water_cells, 4);
}

#[test]
fn push_string_is_sized_up_to_first_nul() {
    let (ctx, invoker) = setup(64, read_string);
    invoker.push_string("ab\0cdefghij").unwrap();
    assert_eq!(invoker.execute(), Ok(2));
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), b"ab");
    // "ab" plus NUL fits one cell
    assert_eq!(ctx.heap_stats().high_water_cells, 1);
}

#[test]
fn utf8_string_is_cut_on_code_point_boundary() {
    let (_ctx, invoker) = setup(64, read_string);
    // 61 C3 A9 C3 A9 00 squeezed into 4 bytes: only "aé" plus NUL fits
    let mut buffer = *b"a\xC3\xA9\xC3\xA9\0";
    unsafe {
        invoker
            .push_string_ex(buffer.as_mut_ptr(), 4, STRING_COPY | STRING_UTF8, 0)
            .unwrap();
    }
    assert_eq!(invoker.execute(), Ok(3));
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), "aé".as_bytes());

    let mut buffer = *b"a\xC3\xA9\0";
    unsafe {
        invoker
            .push_string_ex(buffer.as_mut_ptr(), 3, STRING_COPY | STRING_UTF8, 0)
            .unwrap();
    }
    assert_eq!(invoker.execute(), Ok(1));
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), b"a");
}

#[test]
fn ascii_string_truncates_byte_wise() {
    fn peek_cell(ctx: &dyn PluginContext, params: &[Cell]) -> Cell {
        let phys = ctx.local_to_phys_addr(LocalAddr::from_cell(params[1]), 1).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(phys.as_ptr() as *const u8, 4) };
        SEEN_BYTES.with(|s| *s.borrow_mut() = bytes.to_vec());
        0
    }

    let (_ctx, invoker) = setup(64, peek_cell);
    let mut buffer = *b"a\xC3\xA9\0";
    unsafe {
        invoker
            .push_string_ex(buffer.as_mut_ptr(), 3, STRING_COPY, 0)
            .unwrap();
    }
    invoker.execute().unwrap();
    // Half a sequence survives, then the terminator
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), [b'a', 0xC3, 0, 0]);
}

#[test]
fn binary_string_is_copied_exactly() {
    let (_ctx, invoker) = setup(64, rewrite_bytes);
    let mut buffer = [1u8, 0, 2, 0, 3, 0, 4, 0];
    unsafe {
        invoker
            .push_string_ex(buffer.as_mut_ptr(), 8, STRING_COPY | STRING_BINARY, 0)
            .unwrap();
    }
    invoker.execute().unwrap();
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), [1, 0, 2, 0, 3, 0, 4, 0]);
    // No copy-back requested
    assert_eq!(buffer, [1, 0, 2, 0, 3, 0, 4, 0]);
}

#[test]
fn string_copy_back_writes_whole_buffer() {
    let (_ctx, invoker) = setup(64, rewrite_bytes);
    let mut buffer = *b"original";
    unsafe {
        invoker
            .push_string_ex(buffer.as_mut_ptr(), 8, 0, COPYBACK)
            .unwrap();
    }
    invoker.execute().unwrap();

    // Without STRING_COPY the native saw a zeroed block
    assert_eq!(SEEN_BYTES.with(|s| s.borrow().clone()), [0; 8]);
    assert_eq!(&buffer, b"written\0");
}

// ===== Failures =====

#[test]
fn heap_exhaustion_skips_call_and_unwinds_prior_blocks() {
    let (ctx, invoker) = setup(4, record_params);
    let mut small = [1, 2];
    let mut large = [0; 4];

    invoker.push_scalar(1).unwrap();
    unsafe {
        invoker.push_array(small.as_mut_ptr(), 2, true).unwrap();
        invoker.push_array(large.as_mut_ptr(), 4, true).unwrap();
    }
    invoker.push_scalar(2).unwrap();

    let failure = invoker.execute_ex(Some(128)).unwrap_err();
    assert_eq!(failure.code, ErrorCode::HeapLow);
    assert_eq!(failure.message.as_deref(), Some("Not enough space on the heap"));
    assert_eq!(failure.result, None);
    assert_eq!(calls(), 0);

    let stats = ctx.heap_stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.live, 0);
    // Nothing copied back when the call was skipped
    assert_eq!(small, [1, 2]);
    assert_eq!(invoker.pending_params(), 0);
}

#[test]
fn unbound_native_is_not_runnable() {
    let ctx = Rc::new(ScriptContext::new(16).unwrap());
    let invoker = NativeInvoker::new(ctx.clone(), Rc::new(Native::unbound("missing")));
    assert!(!invoker.is_runnable());
    assert_eq!(invoker.debug_name(), "missing");

    invoker.push_scalar(1).unwrap();
    assert_eq!(invoker.execute(), Err(ErrorCode::NotRunnable));
    assert_eq!(invoker.pending_params(), 0);
    assert_eq!(ctx.heap_stats().allocations, 0);
    assert!(ctx.pending_exception().is_none());
}

#[test]
fn native_error_wins_and_copy_back_still_happens() {
    let (ctx, invoker) = setup(16, fail_with_message);
    let mut value: Cell = 1;
    unsafe { invoker.push_scalar_by_ref(&mut value, true).unwrap() };

    let failure = invoker.execute_ex(Some(64)).unwrap_err();
    assert_eq!(failure.code, ErrorCode::Native);
    assert_eq!(failure.message.as_deref(), Some("invalid handle 7"));
    assert_eq!(failure.result, Some(7));
    assert_eq!(value, 99);
    assert_eq!(ctx.heap_stats().live, 0);
    assert!(ctx.pending_exception().is_none());
}

#[test]
fn message_is_cut_to_buffer_size() {
    let (_ctx, invoker) = setup(16, fail_with_message);
    let failure = invoker.execute_ex(Some(8)).unwrap_err();
    assert_eq!(failure.message.as_deref(), Some("invalid"));

    let failure = invoker.execute_ex(None).unwrap_err();
    assert_eq!(failure.message, None);
}

#[test]
fn execute_to_local_renders_message_into_script_memory() {
    let (ctx, invoker) = setup(32, fail_with_message);
    let (buffer, _) = ctx.heap_alloc(4).unwrap();

    assert_eq!(invoker.execute_to_local(buffer, 16), Err(ErrorCode::Native));
    assert_eq!(ctx.local_to_string(buffer).unwrap(), "invalid handle ");

    ctx.heap_pop(buffer).unwrap();
}

#[test]
fn stale_context_error_does_not_fail_next_call() {
    let (ctx, invoker) = setup(16, record_params);
    ctx.report_error(ErrorCode::HeapMin);
    assert_eq!(invoker.execute(), Ok(0));
    assert!(ctx.pending_exception().is_none());
}

#[test]
fn out_of_order_heap_release_is_reported() {
    let (ctx, invoker) = setup(16, leak_block);
    let mut value: Cell = 0;
    unsafe { invoker.push_scalar_by_ref(&mut value, false).unwrap() };

    assert_eq!(invoker.execute(), Err(ErrorCode::InvalidAddress));
    assert_eq!(calls(), 1);
    // The native's own block is still on top of ours
    assert_eq!(ctx.heap_depth(), 2);
}

#[test]
fn config_can_silence_uncaught_error_logging() {
    let ctx = Rc::new(ScriptContext::new(16).unwrap());
    let config = InvokerConfig {
        log_uncaught_errors: false,
    };
    let invoker = NativeInvoker::with_config(
        ctx,
        Rc::new(Native::new("fails", fail_with_message)),
        &config,
    );
    assert_eq!(invoker.execute(), Err(ErrorCode::Native));
}

#[test]
#[allow(deprecated)]
fn legacy_entry_points_are_inert() {
    let (ctx, invoker) = setup(16, record_params);
    invoker.push_scalar(3).unwrap();

    assert_eq!(invoker.call_function(&[1, 2]), Ok(0));
    assert_eq!(invoker.execute2(invoker.parent_context()), Ok(0));
    assert_eq!(invoker.call_function2(invoker.parent_context(), &[]), Ok(0));
    assert_eq!(invoker.function_id(), 0);
    assert_eq!(invoker.parent_runtime(), None);

    assert_eq!(calls(), 0);
    assert_eq!(invoker.pending_params(), 1);
    assert_eq!(ctx.heap_stats().allocations, 0);
}
