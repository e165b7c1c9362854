//! # llembed-ffi
//!
//! C ABI over the process-wide session in `llembed_engine::global`.
//!
//! ```c
//! int    llembed_init(const char *model_path, int n_threads);
//! int    llembed_dimension(void);
//! float *llembed_embed(const char *text, int *count);
//! void   llembed_free_output(float *embedding);
//! void   llembed_free(void);
//! int    llembed_copy_memory_buffer(const void *buffer, size_t size);
//! int    llembed_last_status(void);
//! ```
//!
//! `llembed_embed` returns a `malloc`ed array of `llembed_dimension()` floats
//! and sets `*count` to 1, or returns `NULL` with `*count` set to 0. The
//! array must be released with `llembed_free_output`.
//!
//! ## Status codes
//!
//! `llembed_last_status` reports the outcome of the last call on the calling
//! thread:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | invalid argument (null pointer or non UTF-8 text) |
//! | 2-11 | embedding failure kinds (2 = not initialized, 8 = no pooling, ...) |
//! | 20-26 | initialization failure kinds |
//! | 30-31 | staging failure kinds |

use libc::{c_char, c_float, c_int, c_void, size_t};
use llembed_engine::global;
use std::cell::Cell;
use std::ffi::CStr;
use tracing::{debug, error, warn};

pub const LLEMBED_OK: c_int = 0;
pub const LLEMBED_INVALID_ARGUMENT: c_int = 1;

thread_local! {
    static LAST_STATUS: Cell<c_int> = const { Cell::new(LLEMBED_OK) };
}

fn set_status(code: c_int) {
    LAST_STATUS.with(|s| s.set(code));
}

/// Borrow a C string as UTF-8, recording an invalid-argument status on failure.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for `'a`.
unsafe fn borrow_str<'a>(ptr: *const c_char, what: &str) -> Option<&'a str> {
    if ptr.is_null() {
        warn!("null {what} passed across the C boundary");
        set_status(LLEMBED_INVALID_ARGUMENT);
        return None;
    }
    match CStr::from_ptr(ptr).to_str() {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("invalid UTF-8 in {what}: {e}");
            set_status(LLEMBED_INVALID_ARGUMENT);
            None
        }
    }
}

/// Initialize the process-wide session.
///
/// Returns 0 on success (including when already initialized, whatever the
/// arguments) and 1 on failure. `model_path` may be `"memory:"` after
/// [`llembed_copy_memory_buffer`].
///
/// # Safety
///
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn llembed_init(model_path: *const c_char, n_threads: c_int) -> c_int {
    if global::is_initialized() {
        debug!("Already initialized; arguments ignored");
        set_status(LLEMBED_OK);
        return 0;
    }
    let Some(source) = borrow_str(model_path, "model path") else {
        return 1;
    };
    match global::initialize(source, n_threads) {
        Ok(()) => {
            set_status(LLEMBED_OK);
            0
        }
        Err(e) => {
            error!("Failed to initialize from {source}: {e}");
            set_status(e.code());
            1
        }
    }
}

/// Embedding width, or -1 when not initialized.
#[no_mangle]
pub extern "C" fn llembed_dimension() -> c_int {
    set_status(LLEMBED_OK);
    global::dimension()
}

/// Embed `text`.
///
/// # Safety
///
/// `text` must be null or a valid NUL-terminated string; `count` must be null
/// or point to writable memory for one `int`.
#[no_mangle]
pub unsafe extern "C" fn llembed_embed(text: *const c_char, count: *mut c_int) -> *mut c_float {
    let write_count = |n: c_int| {
        if !count.is_null() {
            // SAFETY: checked non-null; the caller guarantees it is writable.
            *count = n;
        }
    };
    write_count(0);

    let Some(text) = borrow_str(text, "text") else {
        return std::ptr::null_mut();
    };

    let embedding = match global::embed(text) {
        Ok(embedding) => embedding,
        Err(e) => {
            set_status(e.code());
            return std::ptr::null_mut();
        }
    };

    let len = embedding.values.len();
    let bytes = len.max(1) * std::mem::size_of::<c_float>();
    let out = libc::malloc(bytes).cast::<c_float>();
    if out.is_null() {
        error!("Failed to allocate {len} floats for the embedding");
        set_status(llembed_core::EmbedError::Allocation { len }.code());
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(embedding.values.as_ptr(), out, len);

    write_count(1);
    set_status(LLEMBED_OK);
    out
}

/// Release an array returned by [`llembed_embed`]. Null is ignored.
///
/// # Safety
///
/// `embedding` must be null or a pointer returned by [`llembed_embed`] that
/// has not been freed.
#[no_mangle]
pub unsafe extern "C" fn llembed_free_output(embedding: *mut c_float) {
    if !embedding.is_null() {
        libc::free(embedding.cast::<c_void>());
    }
}

/// Release the process-wide session. Safe to call repeatedly.
#[no_mangle]
pub extern "C" fn llembed_free() {
    global::shutdown();
    set_status(LLEMBED_OK);
}

/// Copy model bytes into the staging buffer for a later `"memory:"` init.
///
/// Returns 0 on success and 1 on failure. Any previously staged buffer is
/// released first, so on failure nothing is staged.
///
/// # Safety
///
/// `buffer` must point to `size` readable bytes (or be null with `size` 0).
#[no_mangle]
pub unsafe extern "C" fn llembed_copy_memory_buffer(buffer: *const c_void, size: size_t) -> c_int {
    let bytes: &[u8] = if buffer.is_null() {
        if size != 0 {
            warn!("null buffer with size {size}");
            global::release_memory_buffer();
            set_status(LLEMBED_INVALID_ARGUMENT);
            return 1;
        }
        &[]
    } else {
        std::slice::from_raw_parts(buffer.cast::<u8>(), size)
    };

    match global::supply_memory_buffer(bytes) {
        Ok(()) => {
            set_status(LLEMBED_OK);
            0
        }
        Err(e) => {
            error!("Failed to stage model buffer: {e}");
            set_status(e.code());
            1
        }
    }
}

/// Status of the last call made on this thread.
#[no_mangle]
pub extern "C" fn llembed_last_status() -> c_int {
    LAST_STATUS.with(Cell::get)
}
