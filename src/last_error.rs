//! Per-thread last-error channel read by C callers.
//!
//! Each thread keeps exactly one `(kind, message)` pair. A failing call on a
//! thread overwrites it; successful calls leave it alone. The pointer handed
//! out by [`last_error_ptr`] stays valid until the next failing call on the
//! same thread.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use crate::error::{EmbedError, ErrorKind};

struct LastError {
    kind: ErrorKind,
    message: CString,
}

thread_local! {
    static LAST_ERROR: RefCell<LastError> = RefCell::new(LastError {
        kind: ErrorKind::None,
        message: CString::default(),
    });
}

/// Record `err` as the calling thread's last error.
pub fn set_last_error(err: &EmbedError) {
    let message = to_c_message(&err.to_string());
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = LastError {
            kind: err.kind(),
            message,
        };
    });
}

/// Message of the calling thread's last error, empty if none was recorded.
#[must_use]
pub fn last_error_message() -> String {
    LAST_ERROR.with(|slot| slot.borrow().message.to_string_lossy().into_owned())
}

#[must_use]
pub fn last_error_kind() -> ErrorKind {
    LAST_ERROR.with(|slot| slot.borrow().kind)
}

/// Borrowed pointer to the calling thread's last message.
///
/// The backing `CString` lives in thread-local storage and is only replaced by
/// [`set_last_error`] on the same thread.
#[must_use]
pub fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| slot.borrow().message.as_ptr())
}

// Interior NULs would truncate the message on the C side.
fn to_c_message(msg: &str) -> CString {
    let bytes: Vec<u8> = msg
        .bytes()
        .map(|b| if b == 0 { b' ' } else { b })
        .collect();
    CString::new(bytes).unwrap_or_default()
}
