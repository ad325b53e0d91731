//! C bindings for the bridge.
//!
//! The process holds one bridge, created by `bidi_bridge_init`, which fixes the protocol
//! selection for every call that follows. All entry points return an [`ErrorCode`] as `int`.
//!
//! Callbacks run on bridge-owned threads, possibly before `bidi_stream_start` has written the
//! handle back to the caller, which is why every callback carries the handle. Every non-null
//! buffer handed to a read callback must be given back exactly once through the release
//! function passed alongside it. A null release function means the bridge keeps ownership and
//! the pointer is only valid for the duration of the callback.

use std::ffi::{c_int, c_void};
use std::future::Future;
use std::ptr;
use std::slice;
use std::sync::{Arc, LazyLock, OnceLock};

use bytes::Bytes;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::buffer::{OwnedBuffer, ReleaseLedger};
use crate::codec::{self, DECODE_ERROR_SEQUENCE, MalformedRecord, RecordAux, Variant};
use crate::config::BridgeConfig;
use crate::dispatch::CallObserver;
use crate::error::{BridgeError, ErrorCode};
use crate::handle::CallHandle;
use crate::protocol::{Protocol, ProtocolSelection};
use crate::registry::error::UnknownHandle;
use crate::transport::{EchoService, HandlerRegistry, LocalTransport};

// ─── Callback types ─────────────────────────────────────────────────────────

/// Release capability handed out with a delivered buffer.
pub type ReleaseFn = Option<unsafe extern "C" fn(ptr: *mut c_void)>;

/// Response callback for framed calls: receives an encoded stream record.
pub type ReadCallback =
    unsafe extern "C" fn(handle: u64, ptr: *mut c_void, len: c_int, release: ReleaseFn);

/// Response callback for native calls: receives the raw payload and the remote's sequence.
pub type ReadNativeCallback = unsafe extern "C" fn(
    handle: u64,
    ptr: *mut c_void,
    len: c_int,
    release: ReleaseFn,
    sequence: i32,
);

/// Terminal callback, invoked exactly once per started call.
pub type DoneCallback = unsafe extern "C" fn(handle: u64, error_code: c_int);

// ─── Process-wide state ─────────────────────────────────────────────────────

struct Context {
    runtime: Runtime,
    bridge: Bridge,
    handlers: Arc<HandlerRegistry>,
}

static CONTEXT: OnceLock<Context> = OnceLock::new();

static LEDGER: LazyLock<ReleaseLedger> = LazyLock::new(ReleaseLedger::new);

/// Largest buffer a callback's `int` length can describe.
const MAX_DELIVERY: usize = c_int::MAX as usize;

fn init(protocol: c_int) -> Result<(), BridgeError> {
    let protocol = ProtocolSelection::from_raw(protocol)?;
    if CONTEXT.get().is_some() {
        return Err(BridgeError::AlreadyInitialized);
    }

    // A host may already have installed a subscriber.
    let _ = tracing_subscriber::fmt().try_init();

    let config = BridgeConfig::builder().protocol(protocol).build();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("bidi-bridge")
        .enable_all()
        .build()
        .map_err(|e| BridgeError::Init(format!("failed to build runtime: {e}")))?;

    let handlers = Arc::new(HandlerRegistry::new());
    let transport = Arc::new(LocalTransport::new(Arc::clone(&handlers)));
    let bridge = Bridge::new(config, transport, runtime.handle().clone());

    CONTEXT
        .set(Context {
            runtime,
            bridge,
            handlers,
        })
        .map_err(|_| BridgeError::AlreadyInitialized)?;

    info!(protocol = ?protocol, "Bridge initialized");
    Ok(())
}

fn context() -> Result<&'static Context, BridgeError> {
    CONTEXT.get().ok_or(BridgeError::NotInitialized)
}

/// Resolve a raw handle. Before init no handle has ever been issued, so every raw value is
/// unknown.
fn resolve(raw: u64) -> Result<(&'static Context, CallHandle), BridgeError> {
    let unknown = || UnknownHandle { handle: raw };
    let handle = CallHandle::from_raw(raw).ok_or_else(unknown)?;
    let ctx = CONTEXT.get().ok_or_else(unknown)?;
    Ok((ctx, handle))
}

/// Run `fut` to completion on the bridge runtime from a foreign thread.
fn block_on<F: Future>(runtime: &Runtime, fut: F) -> F::Output {
    if Handle::try_current().is_ok() {
        // Called from inside a callback; step off the worker before blocking on it.
        tokio::task::block_in_place(|| runtime.handle().block_on(fut))
    } else {
        runtime.block_on(fut)
    }
}

fn status_of(op: &'static str, result: Result<(), BridgeError>) -> c_int {
    match result {
        Ok(()) => ErrorCode::Ok.as_raw(),
        Err(e) => {
            debug!(op, error = %e, "Call rejected");
            e.code().as_raw()
        }
    }
}

unsafe fn payload<'a>(ptr: *const c_void, len: c_int) -> Result<&'a [u8], BridgeError> {
    match usize::try_from(len) {
        Err(_) => Err(BridgeError::InvalidArgument("negative payload length")),
        Ok(0) => Ok(&[]),
        Ok(_) if ptr.is_null() => Err(BridgeError::InvalidArgument("null payload pointer")),
        Ok(len) => Ok(unsafe { slice::from_raw_parts(ptr.cast::<u8>(), len) }),
    }
}

/// Lend `bytes` to the caller, writing the pointer and length through the out parameters.
unsafe fn lend_out(
    bytes: Bytes,
    out_ptr: *mut *mut c_void,
    out_len: *mut c_int,
) -> Result<(), BridgeError> {
    let len = c_int::try_from(bytes.len())
        .map_err(|_| BridgeError::InvalidArgument("buffer too large for the C boundary"))?;
    let ptr = LEDGER
        .lend(bytes)
        .map_or(ptr::null_mut(), |(ptr, _)| ptr.cast::<c_void>());
    unsafe {
        *out_ptr = ptr;
        *out_len = len;
    }
    Ok(())
}

// ─── Callback adapter ───────────────────────────────────────────────────────

enum ReadSink {
    Framed(ReadCallback),
    Native(ReadNativeCallback),
}

/// Forwards a call's events to the caller's C callbacks.
struct NativeObserver {
    read: ReadSink,
    done: DoneCallback,
}

impl NativeObserver {
    /// What a receiver gets in place of a message it cannot be handed.
    fn decode_marker(&self) -> (Bytes, i32) {
        match self.read {
            ReadSink::Framed(_) => (Bytes::new(), 0),
            ReadSink::Native(_) => (Bytes::new(), DECODE_ERROR_SEQUENCE),
        }
    }

    /// Substitute the decode marker for a buffer longer than `limit`, so the receiver still
    /// sees one delivery per inbound message.
    fn fit(&self, handle: CallHandle, bytes: Bytes, sequence: i32, limit: usize) -> (Bytes, i32) {
        if bytes.len() <= limit {
            return (bytes, sequence);
        }
        error!(
            handle = %handle,
            len = bytes.len(),
            "Response too large for the C boundary, delivering decode marker"
        );
        self.decode_marker()
    }
}

impl CallObserver for NativeObserver {
    fn on_response(&self, handle: CallHandle, message: Result<OwnedBuffer, MalformedRecord>) {
        let (bytes, sequence) = match (&self.read, message) {
            (_, Ok(buffer)) => {
                let sequence = buffer.sequence().unwrap_or_default();
                (buffer.into_bytes(), sequence)
            }
            // Framed receivers decode records themselves, so they get the original bytes.
            (ReadSink::Framed(_), Err(malformed)) => (malformed.raw, 0),
            (ReadSink::Native(_), Err(_)) => self.decode_marker(),
        };

        let (bytes, sequence) = self.fit(handle, bytes, sequence, MAX_DELIVERY);
        let len = c_int::try_from(bytes.len()).unwrap_or_default();

        let (ptr, release): (*mut c_void, ReleaseFn) = match LEDGER.lend(bytes) {
            Some((ptr, _)) => (
                ptr.cast(),
                Some(bidi_bridge_release as unsafe extern "C" fn(*mut c_void)),
            ),
            None => (ptr::null_mut(), None),
        };

        match self.read {
            ReadSink::Framed(read) => unsafe { read(handle.get(), ptr, len, release) },
            ReadSink::Native(read) => unsafe { read(handle.get(), ptr, len, release, sequence) },
        }
    }

    fn on_done(&self, handle: CallHandle, code: ErrorCode) {
        unsafe { (self.done)(handle.get(), code.as_raw()) }
    }
}

unsafe fn start(read: ReadSink, done: Option<DoneCallback>, out_handle: *mut u64) -> c_int {
    let Some(done) = done else {
        return ErrorCode::InvalidArgument.as_raw();
    };
    if out_handle.is_null() {
        return ErrorCode::InvalidArgument.as_raw();
    }

    let variant = match read {
        ReadSink::Framed(_) => Variant::Framed,
        ReadSink::Native(_) => Variant::Native,
    };

    let started = context().and_then(|ctx| {
        let observer = Arc::new(NativeObserver { read, done });
        block_on(&ctx.runtime, ctx.bridge.start(variant, observer))
    });

    match started {
        Ok(handle) => {
            unsafe { *out_handle = handle.get() };
            ErrorCode::Ok.as_raw()
        }
        Err(e) => {
            warn!(error = %e, variant = ?variant, "Stream start failed");
            e.code().as_raw()
        }
    }
}

// ─── Setup ──────────────────────────────────────────────────────────────────

/// Create the process-wide bridge with the given protocol selection
/// (0 = unset, 1 = gRPC, 2 = Connect).
///
/// Must be called exactly once, before any stream activity. A second call returns
/// `AlreadyInitialized` and changes nothing.
#[unsafe(no_mangle)]
pub extern "C" fn bidi_bridge_init(protocol: c_int) -> c_int {
    status_of("init", init(protocol))
}

/// Register the built-in echo service under `protocol` (1 = gRPC, 2 = Connect).
#[unsafe(no_mangle)]
pub extern "C" fn bidi_bridge_register_echo_service(protocol: c_int) -> c_int {
    let registered = ProtocolSelection::from_raw(protocol).and_then(|selection| {
        let ProtocolSelection::Only(protocol) = selection else {
            return Err(BridgeError::InvalidArgument("echo service needs an explicit protocol"));
        };
        let ctx = context()?;
        register_echo(ctx, protocol)
    });
    status_of("register_echo_service", registered)
}

fn register_echo(ctx: &Context, protocol: Protocol) -> Result<(), BridgeError> {
    let service = ctx.bridge.config().service.clone();
    ctx.handlers.register(protocol, service, EchoService)?;
    Ok(())
}

// ─── Framed streams ─────────────────────────────────────────────────────────

/// Start a framed bidirectional call. On success the handle is written to `out_handle`.
///
/// # Safety
/// `out_handle` must be valid for writes. The callbacks must stay callable until the done
/// callback for this call has returned.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_stream_start(
    on_read: Option<ReadCallback>,
    on_done: Option<DoneCallback>,
    out_handle: *mut u64,
) -> c_int {
    let Some(on_read) = on_read else {
        return ErrorCode::InvalidArgument.as_raw();
    };
    unsafe { start(ReadSink::Framed(on_read), on_done, out_handle) }
}

/// Queue an encoded stream record. The bytes are copied before this returns.
///
/// # Safety
/// `ptr` must point to `len` readable bytes (it may be null when `len` is 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_stream_send(handle: u64, ptr: *const c_void, len: c_int) -> c_int {
    let sent = resolve(handle).and_then(|(ctx, handle)| {
        let record = unsafe { payload(ptr, len) }?;
        ctx.bridge.send(handle, record)
    });
    status_of("send", sent)
}

/// End the outbound half of a framed call.
#[unsafe(no_mangle)]
pub extern "C" fn bidi_stream_close_send(handle: u64) -> c_int {
    let closed = resolve(handle).and_then(|(ctx, handle)| ctx.bridge.close_send(handle));
    status_of("close_send", closed)
}

// ─── Native streams ─────────────────────────────────────────────────────────

/// Start a native bidirectional call. On success the handle is written to `out_handle`.
///
/// # Safety
/// Same contract as [`bidi_stream_start`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_stream_start_native(
    on_read: Option<ReadNativeCallback>,
    on_done: Option<DoneCallback>,
    out_handle: *mut u64,
) -> c_int {
    let Some(on_read) = on_read else {
        return ErrorCode::InvalidArgument.as_raw();
    };
    unsafe { start(ReadSink::Native(on_read), on_done, out_handle) }
}

/// Queue raw payload bytes with a caller-chosen sequence number.
///
/// # Safety
/// `ptr` must point to `len` readable bytes (it may be null when `len` is 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_stream_send_native(
    handle: u64,
    ptr: *const c_void,
    len: c_int,
    sequence: i32,
) -> c_int {
    let sent = resolve(handle).and_then(|(ctx, handle)| {
        let bytes = unsafe { payload(ptr, len) }?;
        ctx.bridge.send_native(handle, bytes, sequence)
    });
    status_of("send_native", sent)
}

/// End the outbound half of a native call.
#[unsafe(no_mangle)]
pub extern "C" fn bidi_stream_close_send_native(handle: u64) -> c_int {
    bidi_stream_close_send(handle)
}

// ─── Buffers ────────────────────────────────────────────────────────────────

/// Give back a buffer lent by the bridge. Null is ignored; releasing a pointer twice is logged
/// and otherwise ignored.
///
/// # Safety
/// `ptr` must not be used after this returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_bridge_release(ptr: *mut c_void) {
    if !ptr.is_null() {
        LEDGER.release(ptr);
    }
}

/// Encode `payload` as a stream record carrying `sequence`.
///
/// The record is written to `out_ptr`/`out_len` and must be given back with
/// [`bidi_bridge_release`]. An empty record comes back as a null pointer.
///
/// # Safety
/// `ptr` must point to `len` readable bytes; the out parameters must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_bridge_encode_record(
    ptr: *const c_void,
    len: c_int,
    sequence: i32,
    out_ptr: *mut *mut c_void,
    out_len: *mut c_int,
) -> c_int {
    if out_ptr.is_null() || out_len.is_null() {
        return ErrorCode::InvalidArgument.as_raw();
    }

    let encoded = unsafe { payload(ptr, len) }.and_then(|payload| {
        let record = codec::encode_record(
            payload,
            RecordAux {
                sequence,
                repeat: 0,
            },
        );
        unsafe { lend_out(record, out_ptr, out_len) }
    });
    status_of("encode_record", encoded)
}

/// Extract the payload (field 1) from an encoded stream record.
///
/// The payload is written to `out_ptr`/`out_len` and must be given back with
/// [`bidi_bridge_release`]. An empty payload comes back as a null pointer.
///
/// # Safety
/// `ptr` must point to `len` readable bytes; the out parameters must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bidi_bridge_decode_payload(
    ptr: *const c_void,
    len: c_int,
    out_ptr: *mut *mut c_void,
    out_len: *mut c_int,
) -> c_int {
    if out_ptr.is_null() || out_len.is_null() {
        return ErrorCode::InvalidArgument.as_raw();
    }

    let decoded = unsafe { payload(ptr, len) }.and_then(|record| {
        let payload = codec::decode_payload(record)?;
        unsafe { lend_out(payload, out_ptr, out_len) }
    });
    status_of("decode_payload", decoded)
}
